//! Scan events published by the remote scan service.
//!
//! The scan service publishes one JSON document per fingerprint read on the
//! reader's topic. [`ScanPayload`] mirrors that document field by field;
//! [`ScanEvent`] is the validated form consumed by the kiosk state machine.
//!
//! # Wire Format
//!
//! ```text
//! {
//!   "readerName": "LECTOR-01",
//!   "identificado": true,
//!   "empleadoId": 1042,
//!   "nombreCompleto": "Ana Ruiz",
//!   "rfc": "RUAA800101XX1"
//! }
//! ```
//!
//! `empleadoId` is sent as a number by some scan service versions and as a
//! string by others; both are accepted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{ReaderId, Result, Subject, error::Error};

/// Raw scan document as published on the event channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanPayload {
    #[serde(rename = "readerName")]
    pub reader_name: String,

    #[serde(rename = "identificado")]
    pub identified: bool,

    #[serde(
        rename = "empleadoId",
        default,
        deserialize_with = "deserialize_employee_id"
    )]
    pub employee_id: Option<String>,

    #[serde(rename = "nombreCompleto", default)]
    pub full_name: Option<String>,

    #[serde(default)]
    pub rfc: Option<String>,
}

fn deserialize_employee_id<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum EmployeeId {
        Number(i64),
        Text(String),
    }

    Ok(
        Option::<EmployeeId>::deserialize(deserializer)?.map(|id| match id {
            EmployeeId::Number(n) => n.to_string(),
            EmployeeId::Text(s) => s,
        }),
    )
}

impl ScanPayload {
    /// Parse a payload from the body of a channel message.
    ///
    /// # Errors
    /// Returns `Error::Json` if the body is not a valid scan document.
    pub fn from_json(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Serialize the payload to its JSON wire form.
    ///
    /// # Errors
    /// Returns `Error::Json` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A single fingerprint read reported for one reader.
///
/// Events are transient: the state machine consumes each one once and never
/// stores it beyond the recent-scans list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEvent {
    /// Reader that produced the read.
    pub reader_id: ReaderId,

    /// Whether the fingerprint matched a known subject.
    pub identified: bool,

    /// Matched subject id, if any.
    pub subject_id: Option<String>,

    /// Matched subject display name, if any.
    pub subject_name: Option<String>,

    /// Matched subject tax id, if any.
    pub rfc: Option<String>,

    /// When the event was received by this client.
    pub timestamp: DateTime<Utc>,
}

impl ScanEvent {
    /// Build a recognized scan event.
    pub fn identified(reader_id: ReaderId, subject: Subject, timestamp: DateTime<Utc>) -> Self {
        Self {
            reader_id,
            identified: true,
            subject_id: Some(subject.id),
            subject_name: Some(subject.name),
            rfc: subject.rfc,
            timestamp,
        }
    }

    /// Build an unrecognized scan event.
    pub fn unidentified(reader_id: ReaderId, timestamp: DateTime<Utc>) -> Self {
        Self {
            reader_id,
            identified: false,
            subject_id: None,
            subject_name: None,
            rfc: None,
            timestamp,
        }
    }

    /// Validate a wire payload and stamp it with the receive time.
    ///
    /// # Errors
    /// Returns `Error::InvalidPayload` if the payload names an invalid reader.
    pub fn from_payload(payload: ScanPayload, timestamp: DateTime<Utc>) -> Result<Self> {
        let reader_id = ReaderId::new(&payload.reader_name)
            .map_err(|e| Error::InvalidPayload(format!("readerName: {e}")))?;

        Ok(Self {
            reader_id,
            identified: payload.identified,
            subject_id: payload.employee_id,
            subject_name: payload.full_name,
            rfc: payload.rfc,
            timestamp,
        })
    }

    /// Parse and validate a channel message body.
    ///
    /// # Errors
    /// Returns an error if the body is not JSON or fails validation.
    pub fn from_json(body: &[u8], timestamp: DateTime<Utc>) -> Result<Self> {
        Self::from_payload(ScanPayload::from_json(body)?, timestamp)
    }

    /// Convert back to the wire payload.
    pub fn to_payload(&self) -> ScanPayload {
        ScanPayload {
            reader_name: self.reader_id.to_string(),
            identified: self.identified,
            employee_id: self.subject_id.clone(),
            full_name: self.subject_name.clone(),
            rfc: self.rfc.clone(),
        }
    }

    /// The recognized subject, for identified events.
    ///
    /// Missing id or name fields on an identified event are reported as empty
    /// strings rather than dropping the match.
    pub fn subject(&self) -> Option<Subject> {
        if !self.identified {
            return None;
        }

        Some(Subject {
            id: self.subject_id.clone().unwrap_or_default(),
            name: self.subject_name.clone().unwrap_or_default(),
            rfc: self.rfc.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_parse_identified_payload_numeric_id() {
        let body = br#"{"readerName":"LECTOR-01","identificado":true,"empleadoId":1042,"nombreCompleto":"Ana Ruiz","rfc":"RUAA800101XX1"}"#;
        let event = ScanEvent::from_json(body, now()).unwrap();

        assert_eq!(event.reader_id.as_str(), "LECTOR-01");
        assert!(event.identified);

        let subject = event.subject().unwrap();
        assert_eq!(subject.id, "1042");
        assert_eq!(subject.name, "Ana Ruiz");
        assert_eq!(subject.rfc.as_deref(), Some("RUAA800101XX1"));
    }

    #[test]
    fn test_parse_identified_payload_string_id() {
        let body = br#"{"readerName":"LECTOR-01","identificado":true,"empleadoId":"E-7","nombreCompleto":"Luis Paz"}"#;
        let event = ScanEvent::from_json(body, now()).unwrap();

        assert_eq!(event.subject_id.as_deref(), Some("E-7"));
        assert_eq!(event.rfc, None);
    }

    #[test]
    fn test_parse_unidentified_payload_with_nulls() {
        let body = br#"{"readerName":"LECTOR-01","identificado":false,"empleadoId":null,"nombreCompleto":null,"rfc":null}"#;
        let event = ScanEvent::from_json(body, now()).unwrap();

        assert!(!event.identified);
        assert!(event.subject().is_none());
    }

    #[test]
    fn test_parse_rejects_missing_identified_flag() {
        let body = br#"{"readerName":"LECTOR-01"}"#;
        assert!(matches!(
            ScanEvent::from_json(body, now()),
            Err(Error::Json(_))
        ));
    }

    #[test]
    fn test_parse_rejects_invalid_reader() {
        let body = br#"{"readerName":"","identificado":false}"#;
        assert!(matches!(
            ScanEvent::from_json(body, now()),
            Err(Error::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_identified_with_missing_name_keeps_match() {
        let reader = ReaderId::new("LECTOR-01").unwrap();
        let mut event = ScanEvent::identified(reader, Subject::new("9", "X"), now());
        event.subject_name = None;

        let subject = event.subject().unwrap();
        assert_eq!(subject.id, "9");
        assert_eq!(subject.name, "");
    }

    #[test]
    fn test_payload_uses_wire_field_names() {
        let reader = ReaderId::new("LECTOR-03").unwrap();
        let event = ScanEvent::identified(reader, Subject::new("5", "Eva Sol"), now());
        let json = event.to_payload().to_json().unwrap();

        assert!(json.contains("\"readerName\":\"LECTOR-03\""));
        assert!(json.contains("\"identificado\":true"));
        assert!(json.contains("\"nombreCompleto\":\"Eva Sol\""));
    }
}
