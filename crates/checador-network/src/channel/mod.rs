//! Reader event channel.
//!
//! A persistent publish/subscribe connection delivering scan events for the
//! readers a kiosk has subscribed to. Control methods never block: results of
//! connecting, losing the connection and incoming scans all arrive as
//! [`ChannelEvent`]s on the receiver handed out when the channel is created.
//!
//! Subscriptions do not survive a reconnect. The owner is expected to
//! subscribe again every time it sees [`ChannelEvent::Connected`].

mod fake;
mod stomp;

pub use fake::{ChannelCall, FakeChannel};
pub use stomp::StompChannel;

use std::fmt;

use tokio::sync::mpsc;

use checador_core::{ReaderId, ScanEvent};

use crate::error::ChannelError;

/// Receiving end of a channel's event stream.
pub type ChannelEvents = mpsc::UnboundedReceiver<ChannelEvent>;

/// Something that happened on the event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A connection is established; earlier subscriptions are gone.
    Connected,

    /// The connection was lost or closed.
    Disconnected { reason: String },

    /// A connection attempt or the broker failed.
    Error { message: String },

    /// A scan published on a subscribed reader's topic.
    Scan {
        handle: SubscriptionHandle,
        event: ScanEvent,
    },

    /// Reconnection stopped after the configured number of attempts.
    GaveUp { attempts: u32 },
}

/// Handle identifying one live subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    reader: ReaderId,
}

impl SubscriptionHandle {
    pub(crate) fn new(id: u64, reader: ReaderId) -> Self {
        Self { id, reader }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn reader(&self) -> &ReaderId {
        &self.reader
    }

    /// Subscription id used on the wire.
    pub(crate) fn wire_id(&self) -> String {
        format!("sub-{}", self.id)
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.wire_id(), self.reader)
    }
}

/// Connection lifecycle as seen by the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting {
        attempt: u32,
    },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Client side of a reader event channel.
pub trait EventChannel {
    /// Start connecting in the background.
    ///
    /// Returns immediately; the outcome is reported as `Connected` or
    /// `Error` events. Calling it while already running has no effect.
    fn connect(&mut self);

    /// Subscribe to `reader`'s scan topic.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::NotConnected` when there is no live connection.
    fn subscribe(&mut self, reader: &ReaderId) -> Result<SubscriptionHandle, ChannelError>;

    /// Drop a subscription.
    ///
    /// Unknown or already dropped handles are ignored, as is calling this
    /// while disconnected.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Closed` only if the channel can no longer
    /// accept requests at all.
    fn unsubscribe(&mut self, handle: &SubscriptionHandle) -> Result<(), ChannelError>;

    /// Close the connection and stop reconnecting.
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;
}
