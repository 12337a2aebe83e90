use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Identifier errors
    #[error("Invalid reader id: {0}")]
    InvalidReaderId(String),

    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    // Payload errors
    #[error("Invalid scan payload: {0}")]
    InvalidPayload(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Session storage errors
    #[error("Session store error at {path}: {message}")]
    SessionStore { path: String, message: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
