//! Core constants for the checador reader session pipeline.
//!
//! This module centralizes every timing value, limit and naming rule shared
//! by the reservation client, the event channel and the scan state machine.
//! Values marked as defaults can be overridden through the configuration
//! structs of the crates that consume them.
//!
//! # Usage
//!
//! ```
//! use checador_core::constants::*;
//! use std::time::Duration;
//!
//! let settle = Duration::from_millis(DEFAULT_SUCCESS_SETTLE_MS);
//! assert_eq!(settle, Duration::from_secs(5));
//! assert_eq!(TOPIC_PREFIX, "/topic/checador/");
//! ```

// ============================================================================
// Event Channel Naming
// ============================================================================

/// Prefix of every per-reader topic on the event channel.
///
/// The full destination is the prefix followed by the reader id:
///
/// ```text
/// /topic/checador/{readerId}
/// ```
///
/// # Examples
///
/// ```
/// use checador_core::constants::TOPIC_PREFIX;
///
/// let topic = format!("{TOPIC_PREFIX}{}", "LECTOR-01");
/// assert_eq!(topic, "/topic/checador/LECTOR-01");
/// ```
pub const TOPIC_PREFIX: &str = "/topic/checador/";

// ============================================================================
// Identifier Limits
// ============================================================================

/// Maximum length of a reader identifier in bytes.
pub const MAX_READER_ID_LENGTH: usize = 128;

/// Maximum length of a session identifier in bytes.
pub const MAX_SESSION_ID_LENGTH: usize = 128;

// ============================================================================
// Event Channel Timing
// ============================================================================

/// Fixed delay between reconnection attempts, in milliseconds.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 5000;

/// Outgoing heart-beat interval, in milliseconds.
///
/// The client promises to send something (a frame or an EOL) at least this
/// often once the broker accepts the heart-beat negotiation.
pub const DEFAULT_HEARTBEAT_OUTGOING_MS: u64 = 4000;

/// Incoming heart-beat interval, in milliseconds.
///
/// The client asks the broker to send something at least this often. A
/// connection that stays silent for twice the negotiated value is treated as
/// half-open and dropped.
pub const DEFAULT_HEARTBEAT_INCOMING_MS: u64 = 4000;

/// Timeout for establishing the WebSocket and receiving `CONNECTED`.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

// ============================================================================
// Registry Timing
// ============================================================================

/// Timeout applied to every HTTP call against the reader registry.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Interval between reservation monitor polls, in milliseconds.
pub const DEFAULT_MONITOR_POLL_MS: u64 = 10_000;

// ============================================================================
// Scan State Machine Timing
// ============================================================================

/// Settle delay after a recognized scan in normal mode.
pub const DEFAULT_SUCCESS_SETTLE_MS: u64 = 5000;

/// Settle delay after any scan in quick mode.
pub const DEFAULT_QUICK_SETTLE_MS: u64 = 1500;

/// Settle delay after an unrecognized scan.
pub const DEFAULT_FAILED_SETTLE_MS: u64 = 2000;

/// Number of recognized scans kept in the recent list shown to the operator.
pub const RECENT_SCANS_CAPACITY: usize = 5;

// ============================================================================
// Classification
// ============================================================================

/// Hour of day (local time) from which a recognized scan counts as an exit.
///
/// Scans strictly before this hour classify as entries. This is a stand-in
/// rule: see [`crate::classify::TimeOfDayClassifier`].
pub const DEFAULT_EXIT_CUTOFF_HOUR: u32 = 12;

// ============================================================================
// Display Messages
// ============================================================================

/// Status text while the reader waits for a finger.
pub const MSG_READY: &str = "Coloque su dedo en el lector";

/// Status text after a recognized fingerprint when the subject is not shown.
pub const MSG_RECOGNIZED: &str = "Huella reconocida";

/// Status text after an unrecognized fingerprint.
pub const MSG_NOT_RECOGNIZED: &str = "Huella no reconocida";

/// Status text while the reader is being reserved and started.
pub const MSG_INITIALIZING: &str = "Inicializando lector...";
