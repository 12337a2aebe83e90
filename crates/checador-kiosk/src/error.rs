use thiserror::Error;

use checador_network::{ReservationError, ScanServiceError};

use crate::state_machine::ScanState;

/// Cause carried by the `Error` state of a kiosk session.
///
/// Every variant names the step that failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Could not reserve reader: {0}")]
    Reservation(#[from] ReservationError),

    #[error("Could not start scan service: {0}")]
    ScanService(#[from] ScanServiceError),

    #[error("Event channel failed: {0}")]
    Channel(String),

    #[error("Could not subscribe to reader events: {0}")]
    Subscription(String),

    #[error("Event channel gave up after {attempts} reconnect attempts")]
    ChannelGaveUp { attempts: u32 },
}

impl SessionError {
    pub fn channel(message: impl Into<String>) -> Self {
        SessionError::Channel(message.into())
    }

    pub fn subscription(message: impl Into<String>) -> Self {
        SessionError::Subscription(message.into())
    }

    /// Returns `true` if the failure came from the reader registry.
    pub fn is_registry(&self) -> bool {
        matches!(
            self,
            SessionError::Reservation(_) | SessionError::ScanService(_)
        )
    }
}

/// Misuse of the scan state machine itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MachineError {
    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: ScanState, to: ScanState },

    #[error("Scan machine has been torn down")]
    TornDown,
}
