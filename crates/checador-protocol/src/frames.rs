//! Constructors for the frames the checador client and its test brokers
//! exchange.
//!
//! # Example
//! ```
//! use checador_protocol::{Command, HeartBeat, frames};
//! use std::time::Duration;
//!
//! let hb = HeartBeat::new(Duration::from_secs(4), Duration::from_secs(4));
//! let connect = frames::connect("localhost", hb);
//!
//! assert_eq!(connect.command(), Command::Connect);
//! assert_eq!(connect.header("heart-beat"), Some("4000,4000"));
//! ```

use crate::command::Command;
use crate::frame::{Frame, headers};
use crate::heartbeat::HeartBeat;

/// Protocol versions offered in `CONNECT`.
pub const ACCEPT_VERSIONS: &str = "1.2,1.1,1.0";

/// `CONNECT` frame offering all supported versions.
pub fn connect(host: &str, heart_beat: HeartBeat) -> Frame {
    Frame::new(Command::Connect)
        .with_header(headers::ACCEPT_VERSION, ACCEPT_VERSIONS)
        .with_header(headers::HOST, host)
        .with_header(headers::HEART_BEAT, heart_beat.to_string())
}

/// `SUBSCRIBE` with automatic acknowledgement.
pub fn subscribe(id: &str, destination: &str) -> Frame {
    Frame::new(Command::Subscribe)
        .with_header(headers::ID, id)
        .with_header(headers::DESTINATION, destination)
        .with_header(headers::ACK, "auto")
}

pub fn unsubscribe(id: &str) -> Frame {
    Frame::new(Command::Unsubscribe).with_header(headers::ID, id)
}

/// `DISCONNECT` asking the broker to confirm with a receipt.
pub fn disconnect(receipt: &str) -> Frame {
    Frame::new(Command::Disconnect).with_header(headers::RECEIPT, receipt)
}

/// `SEND` with a JSON body.
pub fn send_json(destination: &str, body: impl Into<String>) -> Frame {
    Frame::new(Command::Send)
        .with_header(headers::DESTINATION, destination)
        .with_header(headers::CONTENT_TYPE, "application/json")
        .with_body(body.into())
}

/// Broker `CONNECTED` reply.
pub fn connected(version: &str, heart_beat: HeartBeat) -> Frame {
    Frame::new(Command::Connected)
        .with_header(headers::VERSION, version)
        .with_header(headers::HEART_BEAT, heart_beat.to_string())
}

/// Broker `MESSAGE` delivering a JSON body to one subscription.
pub fn message(subscription: &str, destination: &str, message_id: &str, body: impl Into<String>) -> Frame {
    Frame::new(Command::Message)
        .with_header(headers::SUBSCRIPTION, subscription)
        .with_header(headers::DESTINATION, destination)
        .with_header(headers::MESSAGE_ID, message_id)
        .with_header(headers::CONTENT_TYPE, "application/json")
        .with_body(body.into())
}

pub fn receipt(receipt_id: &str) -> Frame {
    Frame::new(Command::Receipt).with_header(headers::RECEIPT_ID, receipt_id)
}

/// Broker `ERROR` with a short summary and optional detail body.
pub fn error(message: &str, detail: &str) -> Frame {
    Frame::new(Command::Error)
        .with_header(headers::MESSAGE, message)
        .with_body(detail.to_string())
}
