//! Kiosk side of a checador reader session.
//!
//! - [`ScanMachine`]: the scan state machine (`Idle → Ready → Success |
//!   Failed → Ready`, plus `Error`), a pure input/output contract.
//! - [`KioskSession`]: drives the machine from a [`ReservationClient`], an
//!   [`EventChannel`] and the settle timer on one task, and performs the
//!   teardown sequence on shutdown.
//!
//! [`ReservationClient`]: checador_network::ReservationClient
//! [`EventChannel`]: checador_network::EventChannel

pub mod config;
pub mod error;
pub mod session;
pub mod state_machine;

pub use config::SettleConfig;
pub use error::{MachineError, SessionError};
pub use session::{KioskSession, SessionCommand, SessionControl};
pub use state_machine::{
    PendingRequest, Readiness, RecentScan, ScanMachine, ScanMachineBuilder, ScanOutcome,
    ScanState, SessionSnapshot, StateTransition,
};
