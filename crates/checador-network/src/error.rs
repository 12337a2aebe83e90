//! Error types for registry and event channel operations.

use checador_protocol::ProtocolError;

/// Errors from the reservation half of the reader registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReservationError {
    /// Another session holds the reader.
    #[error("Reader {reader} is already reserved by another session")]
    AlreadyReserved { reader: String },

    /// The reader is unknown to the registry or offline.
    #[error("Reader {reader} is unavailable: {message}")]
    ReaderUnavailable { reader: String, message: String },

    /// Force release of a reader nobody holds.
    #[error("Reader {reader} is not reserved")]
    NotReserved { reader: String },

    /// Registry answered with an unexpected status.
    #[error("Registry rejected request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Registry could not be reached.
    #[error("Registry transport error: {message}")]
    Transport { message: String },

    /// Registry answered with a body that could not be understood.
    #[error("Invalid registry response: {message}")]
    InvalidResponse { message: String },

    /// Client-side settings are unusable (bad base URL, TLS setup).
    #[error("Registry configuration error: {message}")]
    Configuration { message: String },
}

impl ReservationError {
    pub fn already_reserved(reader: impl Into<String>) -> Self {
        Self::AlreadyReserved {
            reader: reader.into(),
        }
    }

    pub fn unavailable(reader: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ReaderUnavailable {
            reader: reader.into(),
            message: message.into(),
        }
    }

    pub fn not_reserved(reader: impl Into<String>) -> Self {
        Self::NotReserved {
            reader: reader.into(),
        }
    }

    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns `true` if the request may not have reached the registry.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

/// Errors from the remote scan service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScanServiceError {
    #[error("Failed to start scanning on {reader}: {message}")]
    StartFailed { reader: String, message: String },

    #[error("Failed to stop scanning on {reader}: {message}")]
    StopFailed { reader: String, message: String },

    #[error("Scan service transport error: {message}")]
    Transport { message: String },
}

impl ScanServiceError {
    pub fn start_failed(reader: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StartFailed {
            reader: reader.into(),
            message: message.into(),
        }
    }

    pub fn stop_failed(reader: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StopFailed {
            reader: reader.into(),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }
}

/// Errors from the event channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Operation needs a live connection.
    #[error("Event channel is not connected")]
    NotConnected,

    /// The channel's background task has stopped.
    #[error("Event channel is closed")]
    Closed,

    #[error("Invalid channel URL {url}: {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Connection timeout after {0}ms")]
    ConnectTimeout(u64),

    /// Broker refused the STOMP handshake.
    #[error("Broker rejected connection: {0}")]
    Rejected(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reservation_error_display() {
        assert_eq!(
            ReservationError::already_reserved("LECTOR-01").to_string(),
            "Reader LECTOR-01 is already reserved by another session"
        );
        assert_eq!(
            ReservationError::rejected(500, "boom").to_string(),
            "Registry rejected request (HTTP 500): boom"
        );
    }

    #[test]
    fn test_is_transport() {
        assert!(ReservationError::transport("connection refused").is_transport());
        assert!(!ReservationError::not_reserved("R1").is_transport());
    }

    #[test]
    fn test_scan_service_error_display() {
        let error = ScanServiceError::start_failed("R1", "device busy");
        assert_eq!(error.to_string(), "Failed to start scanning on R1: device busy");
    }

    #[test]
    fn test_channel_error_from_protocol() {
        let error: ChannelError = ProtocolError::InvalidUtf8.into();
        assert!(matches!(error, ChannelError::Protocol(_)));
    }
}
