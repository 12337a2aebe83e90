//! Error types for STOMP frame parsing and encoding.

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while reading or writing STOMP frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The first line of a frame is not a STOMP command.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// A header line has no `:` separator.
    #[error("Malformed header line: {0}")]
    MalformedHeader(String),

    /// A header uses an escape sequence STOMP 1.2 does not define.
    #[error("Invalid escape sequence in header: {0}")]
    InvalidEscape(String),

    /// Command or header bytes are not valid UTF-8.
    #[error("Frame head is not valid UTF-8")]
    InvalidUtf8,

    /// The `content-length` header is not a number.
    #[error("Invalid content-length: {0}")]
    InvalidContentLength(String),

    /// The byte after a `content-length` body is not NUL.
    #[error("Frame body not terminated by NUL")]
    MissingTerminator,

    /// A frame grew past the configured size limit.
    #[error("Frame too large: {size} bytes exceeds limit of {max_size}")]
    FrameTooLarge { size: usize, max_size: usize },

    /// A required header is absent.
    #[error("Missing required header: {0}")]
    MissingHeader(&'static str),

    /// The `heart-beat` header is not `<cx>,<cy>`.
    #[error("Invalid heart-beat header: {0}")]
    InvalidHeartBeat(String),

    /// The buffer ended before a complete frame.
    #[error("Incomplete frame")]
    Incomplete,

    /// I/O failure from the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
