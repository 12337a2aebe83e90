//! Event channel over STOMP 1.2 on a WebSocket.
//!
//! # Architecture
//!
//! ```text
//! StompChannel (owner's task)
//!     │  commands (subscribe / unsubscribe / disconnect)
//!     ▼
//! Worker task ───(WebSocket)───> broker
//!     │  StompCodec over message payloads
//!     ▼
//! ChannelEvents (Connected, Scan, Disconnected, Error, GaveUp)
//! ```
//!
//! The worker owns the socket. It connects, performs the STOMP handshake,
//! then multiplexes broker traffic, owner commands and heart-beats until the
//! connection drops. After a drop it waits the fixed reconnect delay and
//! starts over; live subscriptions are discarded on every drop.
//!
//! A connection is considered dead when nothing arrives from the broker for
//! twice the negotiated heart-beat interval.

use std::collections::HashMap;
use std::time::Duration;

use bytes::BytesMut;
use chrono::Utc;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, info, trace, warn};
use url::Url;

use checador_core::{ReaderId, ScanEvent};
use checador_protocol::{Command, Frame, HeartBeat, NegotiatedHeartBeat, StompCodec, StompItem, frames, headers};

use super::{ChannelEvent, ChannelEvents, ConnectionState, EventChannel, SubscriptionHandle};
use crate::config::ChannelConfig;
use crate::error::ChannelError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Limit for the polite DISCONNECT on shutdown.
const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

/// STOMP-over-WebSocket event channel.
///
/// # Example
///
/// ```no_run
/// use checador_core::ReaderId;
/// use checador_network::{ChannelConfig, ChannelEvent, EventChannel, StompChannel};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let reader = ReaderId::new("LECTOR-01")?;
/// let (mut channel, mut events) = StompChannel::new(ChannelConfig::new("ws://10.0.0.5:8080/ws"));
///
/// channel.connect();
/// while let Some(event) = events.recv().await {
///     match event {
///         ChannelEvent::Connected => {
///             channel.subscribe(&reader)?;
///         }
///         ChannelEvent::Scan { event, .. } => println!("scan: {:?}", event),
///         other => println!("{:?}", other),
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StompChannel {
    config: ChannelConfig,
    events: mpsc::UnboundedSender<ChannelEvent>,
    commands: Option<mpsc::UnboundedSender<ChannelCommand>>,
    state: watch::Receiver<ConnectionState>,
    next_subscription: u64,
}

#[derive(Debug)]
enum ChannelCommand {
    Subscribe(SubscriptionHandle),
    Unsubscribe(SubscriptionHandle),
    Disconnect,
}

impl StompChannel {
    /// Create a disconnected channel and the receiver for its events.
    pub fn new(config: ChannelConfig) -> (Self, ChannelEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        let (_, state) = watch::channel(ConnectionState::Disconnected);

        let channel = Self {
            config,
            events,
            commands: None,
            state,
            next_subscription: 0,
        };
        (channel, rx)
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn running(&self) -> bool {
        self.commands.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

impl EventChannel for StompChannel {
    /// Spawn the connection worker on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    fn connect(&mut self) {
        if self.running() {
            debug!("Event channel already running");
            return;
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        let worker = Worker {
            config: self.config.clone(),
            commands: command_rx,
            events: self.events.clone(),
            state: state_tx,
        };
        tokio::spawn(worker.run());

        self.commands = Some(command_tx);
        self.state = state_rx;
    }

    fn subscribe(&mut self, reader: &ReaderId) -> Result<SubscriptionHandle, ChannelError> {
        if !self.is_connected() {
            return Err(ChannelError::NotConnected);
        }
        let commands = self.commands.as_ref().ok_or(ChannelError::NotConnected)?;

        self.next_subscription += 1;
        let handle = SubscriptionHandle::new(self.next_subscription, reader.clone());
        commands
            .send(ChannelCommand::Subscribe(handle.clone()))
            .map_err(|_| ChannelError::Closed)?;

        Ok(handle)
    }

    fn unsubscribe(&mut self, handle: &SubscriptionHandle) -> Result<(), ChannelError> {
        match &self.commands {
            Some(commands) => commands
                .send(ChannelCommand::Unsubscribe(handle.clone()))
                .map_err(|_| ChannelError::Closed),
            None => Ok(()),
        }
    }

    fn disconnect(&mut self) {
        if let Some(commands) = self.commands.take() {
            debug!("Disconnecting event channel");
            let _ = commands.send(ChannelCommand::Disconnect);
        }
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }
}

/// Background task owning the socket.
struct Worker {
    config: ChannelConfig,
    commands: mpsc::UnboundedReceiver<ChannelCommand>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    state: watch::Sender<ConnectionState>,
}

/// Outcome of one connection attempt.
enum Attempt {
    Connected(Session),
    Failed(ChannelError),
    Stop,
}

/// How a live connection ended.
enum Exit {
    Closed,
    Lost(String),
}

/// A connection past the STOMP handshake.
struct Session {
    sink: SplitSink<WsStream, Message>,
    stream: SplitStream<WsStream>,
    codec: StompCodec,
    buffer: BytesMut,
    heartbeat: NegotiatedHeartBeat,
}

impl Worker {
    async fn run(mut self) {
        let mut failures = 0u32;

        loop {
            match self.establish().await {
                Attempt::Stop => return self.finish("client disconnect"),
                Attempt::Connected(session) => {
                    failures = 0;
                    self.state.send_replace(ConnectionState::Connected);
                    info!(url = %self.config.url, "Event channel connected");
                    self.emit(ChannelEvent::Connected);

                    match self.serve(session).await {
                        Exit::Closed => return self.finish("client disconnect"),
                        Exit::Lost(reason) => {
                            warn!(url = %self.config.url, "Event channel lost: {}", reason);
                            self.state.send_replace(ConnectionState::Disconnected);
                            self.emit(ChannelEvent::Disconnected { reason });
                        }
                    }
                }
                Attempt::Failed(e) => {
                    failures += 1;
                    warn!(url = %self.config.url, attempt = failures, "Event channel connect failed: {}", e);
                    self.emit(ChannelEvent::Error {
                        message: e.to_string(),
                    });

                    if let Some(max) = self.config.max_reconnect_attempts
                        && failures >= max
                    {
                        warn!(attempts = failures, "Giving up on event channel");
                        self.state.send_replace(ConnectionState::Disconnected);
                        self.emit(ChannelEvent::GaveUp { attempts: failures });
                        return;
                    }
                }
            }

            self.state
                .send_replace(ConnectionState::Reconnecting { attempt: failures + 1 });
            debug!(
                delay_ms = self.config.reconnect_delay.as_millis() as u64,
                "Waiting before reconnect"
            );
            if !self.wait(self.config.reconnect_delay).await {
                return self.finish("client disconnect");
            }
        }
    }

    fn emit(&self, event: ChannelEvent) {
        // The owner may have gone away; nothing left to notify then.
        let _ = self.events.send(event);
    }

    fn finish(&self, reason: &str) {
        debug!("Event channel stopped: {}", reason);
        self.state.send_replace(ConnectionState::Disconnected);
        self.emit(ChannelEvent::Disconnected {
            reason: reason.to_string(),
        });
    }

    /// Connect and handshake, abandoning the attempt on `Disconnect`.
    async fn establish(&mut self) -> Attempt {
        let url = self.config.url.clone();
        let heartbeat = self.config.heartbeat;
        let timeout = self.config.connect_timeout;

        let connecting = tokio::time::timeout(timeout, open_session(&url, heartbeat));
        tokio::pin!(connecting);

        loop {
            tokio::select! {
                result = &mut connecting => {
                    return match result {
                        Ok(Ok(session)) => Attempt::Connected(session),
                        Ok(Err(e)) => Attempt::Failed(e),
                        Err(_) => Attempt::Failed(ChannelError::ConnectTimeout(timeout.as_millis() as u64)),
                    };
                }
                command = self.commands.recv() => match command {
                    Some(ChannelCommand::Disconnect) | None => return Attempt::Stop,
                    Some(other) => debug!(?other, "Ignoring command while connecting"),
                },
            }
        }
    }

    /// Sleep for `delay`; returns `false` if a disconnect arrived meanwhile.
    async fn wait(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    Some(ChannelCommand::Disconnect) | None => return false,
                    Some(other) => debug!(?other, "Ignoring command while reconnecting"),
                },
            }
        }
    }

    async fn serve(&mut self, session: Session) -> Exit {
        let Session {
            mut sink,
            mut stream,
            mut codec,
            mut buffer,
            heartbeat,
        } = session;

        let mut subscriptions: HashMap<String, SubscriptionHandle> = HashMap::new();
        let mut beat = heartbeat.send_every.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let read_deadline = heartbeat.read_deadline();
        let mut last_read = Instant::now();

        debug!(
            send_every = ?heartbeat.send_every,
            expect_every = ?heartbeat.expect_every,
            "Heart-beat negotiated"
        );

        // Frames that arrived together with CONNECTED
        if let Err(reason) = dispatch(&self.events, &mut codec, &mut buffer, &subscriptions) {
            return Exit::Lost(reason);
        }

        loop {
            let deadline = read_deadline.map(|d| last_read + d);

            tokio::select! {
                incoming = stream.next() => {
                    let message = match incoming {
                        Some(Ok(message)) => message,
                        Some(Err(e)) => return Exit::Lost(format!("WebSocket error: {e}")),
                        None => return Exit::Lost("connection closed".to_string()),
                    };
                    last_read = Instant::now();

                    match absorb(&mut buffer, message) {
                        Err(reason) => return Exit::Lost(reason),
                        Ok(false) => continue,
                        Ok(true) => {}
                    }
                    if let Err(reason) = dispatch(&self.events, &mut codec, &mut buffer, &subscriptions) {
                        return Exit::Lost(reason);
                    }
                }
                command = self.commands.recv() => match command {
                    Some(ChannelCommand::Subscribe(handle)) => {
                        let id = handle.wire_id();
                        let frame = frames::subscribe(&id, &handle.reader().topic());
                        if let Err(e) = send_item(&mut sink, &mut codec, frame).await {
                            return Exit::Lost(e.to_string());
                        }
                        debug!(subscription = %handle, "Subscribed");
                        subscriptions.insert(id, handle);
                    }
                    Some(ChannelCommand::Unsubscribe(handle)) => {
                        let id = handle.wire_id();
                        if subscriptions.remove(&id).is_none() {
                            trace!(subscription = %handle, "Unsubscribe for inactive subscription");
                            continue;
                        }
                        if let Err(e) = send_item(&mut sink, &mut codec, frames::unsubscribe(&id)).await {
                            return Exit::Lost(e.to_string());
                        }
                        debug!(subscription = %handle, "Unsubscribed");
                    }
                    Some(ChannelCommand::Disconnect) | None => {
                        close(&mut sink, &mut codec).await;
                        return Exit::Closed;
                    }
                },
                _ = tick(&mut beat) => {
                    if let Err(e) = send_item(&mut sink, &mut codec, StompItem::Heartbeat).await {
                        return Exit::Lost(e.to_string());
                    }
                    trace!("Heart-beat sent");
                }
                _ = expire(deadline) => {
                    let silence = read_deadline.unwrap_or_default();
                    return Exit::Lost(format!(
                        "no data from broker for {}ms",
                        silence.as_millis()
                    ));
                }
            }
        }
    }
}

/// Open the WebSocket and complete the STOMP handshake.
async fn open_session(url: &str, heartbeat: HeartBeat) -> Result<Session, ChannelError> {
    let parsed = Url::parse(url).map_err(|e| ChannelError::InvalidUrl {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    let host = parsed.host_str().unwrap_or("localhost").to_string();

    debug!(%url, "Opening WebSocket");
    let (ws, _response) = connect_async(url).await?;
    let (mut sink, mut stream) = ws.split();
    let mut codec = StompCodec::new();
    let mut buffer = BytesMut::new();

    send_item(&mut sink, &mut codec, frames::connect(&host, heartbeat)).await?;

    loop {
        let message = match stream.next().await {
            Some(message) => message?,
            None => {
                return Err(ChannelError::ConnectionLost(
                    "closed during handshake".to_string(),
                ));
            }
        };
        if !absorb(&mut buffer, message).map_err(ChannelError::ConnectionLost)? {
            continue;
        }

        while let Some(item) = codec.decode(&mut buffer)? {
            let StompItem::Frame(frame) = item else {
                continue;
            };

            match frame.command() {
                Command::Connected => {
                    let server = match frame.header(headers::HEART_BEAT) {
                        Some(value) => value.parse::<HeartBeat>()?,
                        None => HeartBeat::disabled(),
                    };
                    debug!(
                        version = frame.header(headers::VERSION).unwrap_or("1.0"),
                        heart_beat = %server,
                        "STOMP session established"
                    );

                    return Ok(Session {
                        sink,
                        stream,
                        codec,
                        buffer,
                        heartbeat: heartbeat.negotiate(&server),
                    });
                }
                Command::Error => {
                    return Err(ChannelError::Rejected(
                        frame
                            .header(headers::MESSAGE)
                            .unwrap_or("unknown error")
                            .to_string(),
                    ));
                }
                other => debug!(command = %other, "Ignoring frame before CONNECTED"),
            }
        }
    }
}

/// Append a WebSocket message's payload to `buffer`.
///
/// Returns `Ok(false)` for control messages carrying no STOMP data and
/// `Err(reason)` when the broker closed the socket.
fn absorb(buffer: &mut BytesMut, message: Message) -> Result<bool, String> {
    match message {
        Message::Text(text) => {
            buffer.extend_from_slice(text.as_bytes());
            Ok(true)
        }
        Message::Binary(data) => {
            buffer.extend_from_slice(&data);
            Ok(true)
        }
        Message::Close(frame) => Err(match frame {
            Some(frame) => {
                let reason: &str = &frame.reason;
                format!("closed by broker ({}): {reason}", u16::from(frame.code))
            }
            None => "closed by broker".to_string(),
        }),
        _ => Ok(false),
    }
}

/// Decode and route every complete frame in `buffer`.
///
/// Returns `Err(reason)` when the connection can no longer be used.
fn dispatch(
    events: &mpsc::UnboundedSender<ChannelEvent>,
    codec: &mut StompCodec,
    buffer: &mut BytesMut,
    subscriptions: &HashMap<String, SubscriptionHandle>,
) -> Result<(), String> {
    loop {
        let item = match codec.decode(buffer) {
            Ok(Some(item)) => item,
            Ok(None) => return Ok(()),
            Err(e) => return Err(format!("protocol error: {e}")),
        };

        let StompItem::Frame(frame) = item else {
            trace!("Heart-beat received");
            continue;
        };

        match frame.command() {
            Command::Message => deliver(events, subscriptions, &frame),
            Command::Error => {
                let message = frame
                    .header(headers::MESSAGE)
                    .unwrap_or("broker error")
                    .to_string();
                let _ = events.send(ChannelEvent::Error {
                    message: message.clone(),
                });
                return Err(format!("broker error: {message}"));
            }
            Command::Receipt => {
                debug!(receipt = ?frame.header(headers::RECEIPT_ID), "Receipt received");
            }
            other => debug!(command = %other, "Ignoring unexpected frame"),
        }
    }
}

fn deliver(
    events: &mpsc::UnboundedSender<ChannelEvent>,
    subscriptions: &HashMap<String, SubscriptionHandle>,
    frame: &Frame,
) {
    let Some(handle) = frame
        .header(headers::SUBSCRIPTION)
        .and_then(|id| subscriptions.get(id))
    else {
        debug!(
            subscription = ?frame.header(headers::SUBSCRIPTION),
            "MESSAGE for inactive subscription"
        );
        return;
    };

    match ScanEvent::from_json(frame.body(), Utc::now()) {
        Ok(event) => {
            if event.reader_id != *handle.reader() {
                warn!(
                    subscription = %handle,
                    reader = %event.reader_id,
                    "Scan payload names a different reader"
                );
            }
            trace!(subscription = %handle, identified = event.identified, "Scan received");
            let _ = events.send(ChannelEvent::Scan {
                handle: handle.clone(),
                event,
            });
        }
        Err(e) => warn!(subscription = %handle, "Dropping malformed scan payload: {}", e),
    }
}

async fn send_item(
    sink: &mut SplitSink<WsStream, Message>,
    codec: &mut StompCodec,
    item: impl Into<StompItem>,
) -> Result<(), ChannelError> {
    let mut buf = BytesMut::new();
    Encoder::<StompItem>::encode(codec, item.into(), &mut buf)?;

    let message = match String::from_utf8(buf.to_vec()) {
        Ok(text) => Message::text(text),
        Err(e) => Message::binary(e.into_bytes()),
    };
    sink.send(message).await?;
    Ok(())
}

/// Send DISCONNECT and close the socket, without waiting long for either.
async fn close(sink: &mut SplitSink<WsStream, Message>, codec: &mut StompCodec) {
    let goodbye = async {
        send_item(sink, codec, frames::disconnect("disconnect")).await?;
        sink.close().await?;
        Ok::<_, ChannelError>(())
    };

    match tokio::time::timeout(CLOSE_TIMEOUT, goodbye).await {
        Ok(Ok(())) => debug!("Event channel closed"),
        Ok(Err(e)) => warn!("Error closing event channel: {}", e),
        Err(_) => warn!("Close timeout ({}ms)", CLOSE_TIMEOUT.as_millis()),
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
