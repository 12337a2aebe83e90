use crate::{
    Result,
    constants::{MAX_READER_ID_LENGTH, MAX_SESSION_ID_LENGTH, TOPIC_PREFIX},
    error::Error,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a physical fingerprint reader.
///
/// Reader ids are opaque to this crate but must be usable both as a URL path
/// segment and as the tail of a channel topic, so they cannot be blank,
/// contain control characters or a `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReaderId(String);

impl ReaderId {
    /// Create a new reader id with validation.
    ///
    /// Surrounding whitespace is trimmed before validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidReaderId` if the id is empty, longer than
    /// [`MAX_READER_ID_LENGTH`] bytes, or contains `/` or control characters.
    pub fn new(id: impl AsRef<str>) -> Result<Self> {
        let id = id.as_ref().trim();

        if id.is_empty() {
            return Err(Error::InvalidReaderId("reader id is empty".to_string()));
        }
        if id.len() > MAX_READER_ID_LENGTH {
            return Err(Error::InvalidReaderId(format!(
                "reader id must be at most {MAX_READER_ID_LENGTH} bytes, got {}",
                id.len()
            )));
        }
        if id.chars().any(|c| c == '/' || c.is_control()) {
            return Err(Error::InvalidReaderId(format!(
                "reader id contains '/' or control characters: {id:?}"
            )));
        }

        Ok(ReaderId(id.to_string()))
    }

    /// Wrap a reader name exactly as the registry reported it.
    ///
    /// No trimming or validation is applied, so the name can be sent back
    /// to the registry unchanged (for example to force a release).
    #[must_use]
    pub fn from_registry(name: impl Into<String>) -> Self {
        ReaderId(name.into())
    }

    /// Get the reader id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Channel destination carrying this reader's scan events.
    ///
    /// # Examples
    ///
    /// ```
    /// use checador_core::ReaderId;
    ///
    /// let reader = ReaderId::new("LECTOR-01").unwrap();
    /// assert_eq!(reader.topic(), "/topic/checador/LECTOR-01");
    /// ```
    #[must_use]
    pub fn topic(&self) -> String {
        format!("{TOPIC_PREFIX}{}", self.0)
    }
}

impl fmt::Display for ReaderId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ReaderId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ReaderId::new(s)
    }
}

impl TryFrom<String> for ReaderId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        ReaderId::new(value)
    }
}

impl From<ReaderId> for String {
    fn from(id: ReaderId) -> Self {
        id.0
    }
}

/// Identifier of one kiosk installation.
///
/// A session id is created once and persisted (see
/// [`SessionStore`](crate::session::SessionStore)); it is not tied to any
/// particular reader.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Create a session id from an existing value.
    ///
    /// # Errors
    /// Returns `Error::InvalidSessionId` if the value is empty, too long, or
    /// contains whitespace or non-ASCII characters.
    pub fn new(id: impl AsRef<str>) -> Result<Self> {
        let id = id.as_ref().trim();

        if id.is_empty() {
            return Err(Error::InvalidSessionId("session id is empty".to_string()));
        }
        if id.len() > MAX_SESSION_ID_LENGTH {
            return Err(Error::InvalidSessionId(format!(
                "session id must be at most {MAX_SESSION_ID_LENGTH} bytes, got {}",
                id.len()
            )));
        }
        if !id.is_ascii() || id.chars().any(|c| c.is_ascii_whitespace() || c.is_control()) {
            return Err(Error::InvalidSessionId(format!(
                "session id must be printable ASCII without spaces: {id:?}"
            )));
        }

        Ok(SessionId(id.to_string()))
    }

    /// Wrap a session id exactly as the registry reported it.
    ///
    /// Other installations may use ids this crate would not generate, so
    /// values read back from the registry are kept verbatim.
    #[must_use]
    pub fn from_registry(id: impl Into<String>) -> Self {
        SessionId(id.into())
    }

    /// Generate a fresh random session id (UUID v4).
    #[must_use]
    pub fn generate() -> Self {
        SessionId(uuid::Uuid::new_v4().to_string())
    }

    /// Get the session id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        SessionId::new(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        SessionId::new(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

/// Person identified by a fingerprint scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Employee id as reported by the scan service.
    pub id: String,

    /// Full display name.
    pub name: String,

    /// Tax id (RFC), when the scan service includes it.
    pub rfc: Option<String>,
}

impl Subject {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            rfc: None,
        }
    }

    pub fn with_rfc(mut self, rfc: impl Into<String>) -> Self {
        self.rfc = Some(rfc.into());
        self
    }
}

/// Attendance action attributed to a recognized scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceAction {
    Entry,
    Exit,
}

impl AttendanceAction {
    /// Returns `true` if action is Entry.
    #[inline]
    #[must_use]
    pub fn is_entry(self) -> bool {
        matches!(self, AttendanceAction::Entry)
    }

    /// Returns `true` if action is Exit.
    #[inline]
    #[must_use]
    pub fn is_exit(self) -> bool {
        matches!(self, AttendanceAction::Exit)
    }
}

impl fmt::Display for AttendanceAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AttendanceAction::Entry => write!(f, "Entrada"),
            AttendanceAction::Exit => write!(f, "Salida"),
        }
    }
}

/// One row of the registry's reservation listing.
///
/// This is a point-in-time read: by the time anyone acts on it the
/// reservation may already have been released or taken by another session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationListEntry {
    #[serde(rename = "readerName")]
    pub reader_id: ReaderId,

    #[serde(rename = "sessionId")]
    pub session_id: SessionId,
}

impl ReservationListEntry {
    pub fn new(reader_id: ReaderId, session_id: SessionId) -> Self {
        Self {
            reader_id,
            session_id,
        }
    }
}
