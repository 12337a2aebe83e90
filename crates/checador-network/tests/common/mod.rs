//! Test brokers and registries served on loopback ports.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::codec::Decoder;

use checador_network::{ChannelEvent, ChannelEvents};
use checador_protocol::{Command, Frame, StompCodec, StompItem, frames};

/// Broker side of one accepted STOMP connection.
pub struct BrokerConnection {
    ws: WebSocketStream<TcpStream>,
    codec: StompCodec,
    buffer: BytesMut,
    /// The client's CONNECT frame.
    pub connect: Frame,
}

impl BrokerConnection {
    /// Next frame or heart-beat from the client. `None` once the client has
    /// gone away.
    pub async fn next_item(&mut self) -> Option<StompItem> {
        loop {
            if let Some(item) = self.codec.decode(&mut self.buffer).unwrap() {
                return Some(item);
            }

            match self.ws.next().await? {
                Ok(Message::Text(text)) => self.buffer.extend_from_slice(text.as_bytes()),
                Ok(Message::Binary(data)) => self.buffer.extend_from_slice(&data),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    /// Next frame from the client, skipping heart-beats.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            if let StompItem::Frame(frame) = self.next_item().await? {
                return Some(frame);
            }
        }
    }

    /// Next frame with the given command, failing the test after 5 seconds.
    pub async fn expect(&mut self, command: Command) -> Frame {
        let frame = tokio::time::timeout(Duration::from_secs(5), self.next_frame())
            .await
            .expect("timed out waiting for client frame")
            .expect("client closed the connection");
        assert_eq!(frame.command(), command, "unexpected frame {frame:?}");
        frame
    }

    pub async fn send(&mut self, frame: Frame) {
        let text = String::from_utf8(frame.to_bytes().to_vec()).unwrap();
        self.ws.send(Message::text(text)).await.unwrap();
    }

    /// Publish a scan payload to `subscription`.
    pub async fn publish(&mut self, subscription: &str, destination: &str, body: &str) {
        self.send(frames::message(subscription, destination, "m-1", body))
            .await;
    }

    /// Close the socket from the broker side.
    pub async fn drop_connection(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// Start a WebSocket STOMP broker answering CONNECT with `heart_beat`.
///
/// Returns the `ws://` URL and a receiver yielding each connection after its
/// handshake.
pub async fn start_broker(heart_beat: &'static str) -> (String, mpsc::UnboundedReceiver<BrokerConnection>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                continue;
            };

            let mut connection = BrokerConnection {
                ws,
                codec: StompCodec::new(),
                buffer: BytesMut::new(),
                connect: Frame::new(Command::Connect),
            };
            let Some(connect) = connection.next_frame().await else {
                continue;
            };
            connection.connect = connect;
            connection
                .send(
                    Frame::new(Command::Connected)
                        .with_header("version", "1.2")
                        .with_header("heart-beat", heart_beat),
                )
                .await;

            if tx.send(connection).is_err() {
                break;
            }
        }
    });

    (format!("ws://{addr}/ws"), rx)
}

/// Address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

pub async fn next_connection(
    connections: &mut mpsc::UnboundedReceiver<BrokerConnection>,
) -> BrokerConnection {
    tokio::time::timeout(Duration::from_secs(5), connections.recv())
        .await
        .expect("timed out waiting for client connection")
        .expect("broker stopped")
}

/// Next channel event, failing the test after 5 seconds.
pub async fn next_event(events: &mut ChannelEvents) -> ChannelEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for channel event")
        .expect("channel event stream ended")
}
