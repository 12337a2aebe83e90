//! STOMP 1.2 framing for the checador event channel.
//!
//! The scan service publishes reader events through a STOMP broker. This
//! crate holds the frame model, header escaping, heart-beat negotiation and
//! a tokio-util codec; transport and subscription bookkeeping live in
//! `checador-network`.

pub mod codec;
pub mod command;
pub mod error;
pub mod frame;
pub mod frames;
pub mod heartbeat;

pub use codec::{StompCodec, StompItem};
pub use command::Command;
pub use error::{ProtocolError, Result};
pub use frame::{Frame, headers};
pub use heartbeat::{HeartBeat, NegotiatedHeartBeat};
