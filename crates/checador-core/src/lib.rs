//! Core types shared by the checador reader session crates.
//!
//! Identifiers ([`ReaderId`], [`SessionId`]), the scan event model, the
//! entry/exit classification seam and the persistent session identity live
//! here so the network, kiosk and monitor crates agree on one vocabulary.

pub mod classify;
pub mod constants;
pub mod error;
pub mod event;
pub mod session;
pub mod types;

pub use classify::{ActionClassifier, TimeOfDayClassifier};
pub use error::{Error, Result};
pub use event::{ScanEvent, ScanPayload};
pub use session::SessionStore;
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
