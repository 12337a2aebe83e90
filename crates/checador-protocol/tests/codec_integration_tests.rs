//! Integration tests for StompCodec with Tokio streams.
//!
//! These tests run a client and a broker side over an in-memory duplex
//! stream, covering the handshake, subscription traffic and heart-beats.

use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio_util::codec::Framed;
use checador_protocol::{Command, HeartBeat, StompCodec, StompItem, frames};

/// Helper function to create a framed duplex stream for testing.
fn create_framed_duplex(
    buffer_size: usize,
) -> (
    Framed<DuplexStream, StompCodec>,
    Framed<DuplexStream, StompCodec>,
) {
    let (client, server) = tokio::io::duplex(buffer_size);
    (
        Framed::new(client, StompCodec::new()),
        Framed::new(server, StompCodec::new()),
    )
}

async fn next_frame(framed: &mut Framed<DuplexStream, StompCodec>) -> checador_protocol::Frame {
    loop {
        match framed.next().await.unwrap().unwrap() {
            StompItem::Frame(frame) => return frame,
            StompItem::Heartbeat => continue,
        }
    }
}

#[tokio::test]
async fn test_handshake_and_subscription() {
    let (mut client, mut broker) = create_framed_duplex(4096);
    let hb = HeartBeat::new(Duration::from_secs(4), Duration::from_secs(4));

    client.send(frames::connect("localhost", hb)).await.unwrap();

    let connect = next_frame(&mut broker).await;
    assert_eq!(connect.command(), Command::Connect);
    assert_eq!(connect.header("heart-beat"), Some("4000,4000"));

    broker.send(frames::connected("1.2", hb)).await.unwrap();
    let connected = next_frame(&mut client).await;
    assert_eq!(connected.command(), Command::Connected);
    assert_eq!(connected.header("version"), Some("1.2"));

    client
        .send(frames::subscribe("sub-0", "/topic/checador/LECTOR-01"))
        .await
        .unwrap();
    let subscribe = next_frame(&mut broker).await;
    assert_eq!(subscribe.header("destination"), Some("/topic/checador/LECTOR-01"));

    let body = r#"{"readerName":"LECTOR-01","identificado":true,"empleadoId":7,"nombreCompleto":"Ana Ruiz"}"#;
    broker
        .send(frames::message("sub-0", "/topic/checador/LECTOR-01", "m-1", body))
        .await
        .unwrap();

    let message = next_frame(&mut client).await;
    assert_eq!(message.command(), Command::Message);
    assert_eq!(message.header("subscription"), Some("sub-0"));
    assert_eq!(message.body_str(), Some(body));
}

#[tokio::test]
async fn test_heartbeats_interleaved_with_frames() {
    let (mut client, mut broker) = create_framed_duplex(1024);

    broker.send(StompItem::Heartbeat).await.unwrap();
    broker.send(frames::receipt("r-1")).await.unwrap();
    broker.send(StompItem::Heartbeat).await.unwrap();

    assert_eq!(client.next().await.unwrap().unwrap(), StompItem::Heartbeat);
    assert!(matches!(
        client.next().await.unwrap().unwrap(),
        StompItem::Frame(f) if f.command() == Command::Receipt
    ));
    assert_eq!(client.next().await.unwrap().unwrap(), StompItem::Heartbeat);
}

#[tokio::test]
async fn test_frame_split_across_writes() {
    let (raw_client, raw_broker) = tokio::io::duplex(1024);
    let mut client = Framed::new(raw_client, StompCodec::new());
    let mut raw_broker = raw_broker;

    let bytes = frames::message("sub-0", "/topic/checador/R1", "m-9", "{}").to_bytes();
    let (head, tail) = bytes.split_at(bytes.len() / 2);

    raw_broker.write_all(head).await.unwrap();
    raw_broker.flush().await.unwrap();
    tokio::task::yield_now().await;
    raw_broker.write_all(tail).await.unwrap();

    let frame = next_frame(&mut client).await;
    assert_eq!(frame.header("message-id"), Some("m-9"));
    assert_eq!(frame.body_str(), Some("{}"));
}

#[tokio::test]
async fn test_error_frame_surfaces_message_header() {
    let (mut client, mut broker) = create_framed_duplex(1024);

    broker
        .send(frames::error("Invalid destination", "no such topic"))
        .await
        .unwrap();

    let frame = next_frame(&mut client).await;
    assert_eq!(frame.command(), Command::Error);
    assert_eq!(frame.header("message"), Some("Invalid destination"));
}

#[tokio::test]
async fn test_stream_ends_cleanly_when_peer_closes() {
    let (mut client, broker) = create_framed_duplex(1024);
    drop(broker);

    assert!(client.next().await.is_none());
}
