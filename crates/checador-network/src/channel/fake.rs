//! Scriptable event channel for tests.
//!
//! `FakeChannel` never touches the network. Tests drive it with the `emit_*`
//! helpers and inspect the calls a component made on it. Clones share state,
//! so the test keeps one clone while the component under test owns another.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::trace;

use checador_core::{ReaderId, ScanEvent};

use super::{ChannelEvent, ChannelEvents, EventChannel, SubscriptionHandle};
use crate::error::ChannelError;

/// A call made on a [`FakeChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCall {
    Connect,
    Subscribe(ReaderId),
    Unsubscribe(SubscriptionHandle),
    Disconnect,
}

#[derive(Debug)]
struct FakeState {
    events: mpsc::UnboundedSender<ChannelEvent>,
    connected: bool,
    connect_on_demand: bool,
    subscriptions: BTreeMap<u64, SubscriptionHandle>,
    next_subscription: u64,
    calls: Vec<ChannelCall>,
    fail_subscribe: bool,
}

/// In-memory [`EventChannel`].
///
/// # Example
///
/// ```
/// use chrono::Utc;
/// use checador_core::{ReaderId, ScanEvent};
/// use checador_network::{ChannelEvent, EventChannel, FakeChannel};
///
/// let reader = ReaderId::new("LECTOR-01").unwrap();
/// let (mut channel, mut events) = FakeChannel::new();
///
/// channel.connect();
/// assert_eq!(events.try_recv().unwrap(), ChannelEvent::Connected);
///
/// let handle = channel.subscribe(&reader).unwrap();
/// assert!(channel.emit_scan(ScanEvent::unidentified(reader, Utc::now())));
/// assert!(matches!(
///     events.try_recv().unwrap(),
///     ChannelEvent::Scan { handle: h, .. } if h == handle
/// ));
/// ```
#[derive(Debug, Clone)]
pub struct FakeChannel {
    state: Arc<Mutex<FakeState>>,
}

impl FakeChannel {
    /// Fake that reports `Connected` as soon as `connect` is called.
    pub fn new() -> (Self, ChannelEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        let state = FakeState {
            events,
            connected: false,
            connect_on_demand: true,
            subscriptions: BTreeMap::new(),
            next_subscription: 0,
            calls: Vec::new(),
            fail_subscribe: false,
        };

        (
            Self {
                state: Arc::new(Mutex::new(state)),
            },
            rx,
        )
    }

    /// Fake whose `connect` only records the call; the test decides when
    /// (and whether) the connection comes up via [`emit_connected`].
    ///
    /// [`emit_connected`]: FakeChannel::emit_connected
    pub fn manual() -> (Self, ChannelEvents) {
        let (channel, rx) = Self::new();
        channel.lock().connect_on_demand = false;
        (channel, rx)
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Deliver an arbitrary event.
    pub fn emit(&self, event: ChannelEvent) {
        trace!(?event, "Fake channel emit");
        let _ = self.lock().events.send(event);
    }

    /// Bring the connection up and report it.
    pub fn emit_connected(&self) {
        self.lock().connected = true;
        self.emit(ChannelEvent::Connected);
    }

    /// Drop the connection, discarding subscriptions as a real broker would.
    pub fn emit_disconnected(&self, reason: impl Into<String>) {
        {
            let mut state = self.lock();
            state.connected = false;
            state.subscriptions.clear();
        }
        self.emit(ChannelEvent::Disconnected {
            reason: reason.into(),
        });
    }

    pub fn emit_error(&self, message: impl Into<String>) {
        self.emit(ChannelEvent::Error {
            message: message.into(),
        });
    }

    /// Publish `event` on its reader's topic.
    ///
    /// Returns `false` (and delivers nothing) if no live subscription covers
    /// the reader.
    pub fn emit_scan(&self, event: ScanEvent) -> bool {
        let handle = {
            let state = self.lock();
            if !state.connected {
                return false;
            }
            state
                .subscriptions
                .values()
                .find(|h| *h.reader() == event.reader_id)
                .cloned()
        };

        match handle {
            Some(handle) => {
                self.emit(ChannelEvent::Scan { handle, event });
                true
            }
            None => false,
        }
    }

    /// Make subsequent `subscribe` calls fail.
    pub fn fail_subscribe(&self, fail: bool) {
        self.lock().fail_subscribe = fail;
    }

    pub fn calls(&self) -> Vec<ChannelCall> {
        self.lock().calls.clone()
    }

    pub fn count_calls(&self, predicate: impl Fn(&ChannelCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Live subscriptions, oldest first.
    pub fn subscriptions(&self) -> Vec<SubscriptionHandle> {
        self.lock().subscriptions.values().cloned().collect()
    }
}

impl EventChannel for FakeChannel {
    fn connect(&mut self) {
        let auto = {
            let mut state = self.lock();
            state.calls.push(ChannelCall::Connect);
            state.connect_on_demand && !state.connected
        };
        if auto {
            self.emit_connected();
        }
    }

    fn subscribe(&mut self, reader: &ReaderId) -> Result<SubscriptionHandle, ChannelError> {
        let mut state = self.lock();
        state.calls.push(ChannelCall::Subscribe(reader.clone()));

        if !state.connected {
            return Err(ChannelError::NotConnected);
        }
        if state.fail_subscribe {
            return Err(ChannelError::ConnectionLost(
                "subscription refused".to_string(),
            ));
        }

        state.next_subscription += 1;
        let handle = SubscriptionHandle::new(state.next_subscription, reader.clone());
        state.subscriptions.insert(handle.id(), handle.clone());
        Ok(handle)
    }

    fn unsubscribe(&mut self, handle: &SubscriptionHandle) -> Result<(), ChannelError> {
        let mut state = self.lock();
        state.calls.push(ChannelCall::Unsubscribe(handle.clone()));
        state.subscriptions.remove(&handle.id());
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut state = self.lock();
        state.calls.push(ChannelCall::Disconnect);
        state.connected = false;
        state.subscriptions.clear();
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }
}
