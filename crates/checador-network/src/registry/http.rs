//! Reader registry over HTTP.
//!
//! Endpoints, relative to the configured base URL:
//!
//! | Operation           | Request                                      |
//! |---------------------|----------------------------------------------|
//! | `reserve`           | `POST /reserve/{reader}?sessionId=`          |
//! | `start_scanning`    | `POST /checador/start/{reader}?sessionId=`   |
//! | `stop_scanning`     | `POST /checador/stop/{reader}`               |
//! | `release`           | `POST /release/{reader}?sessionId=`          |
//! | `force_release`     | `POST /readers/release?readerName=`          |
//! | `list_reserved`     | `GET /readers/reserved`                      |
//! | `available_readers` | `GET /readers`                               |
//!
//! Failures carry a JSON body `{"message": "..."}` when the server has
//! something to say.

use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, trace, warn};
use url::Url;

use checador_core::{ReaderId, ReservationListEntry, SessionId};

use super::ReaderRegistry;
use crate::config::RegistryConfig;
use crate::error::{ReservationError, ScanServiceError};

/// Registry client backed by `reqwest`.
///
/// Cloning is cheap; clones share the connection pool.
///
/// # Example
///
/// ```no_run
/// use checador_core::{ReaderId, SessionId};
/// use checador_network::{HttpRegistry, ReaderRegistry, RegistryConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let registry = HttpRegistry::new(RegistryConfig::new("http://10.0.0.5:8080"))?;
/// let reader = ReaderId::new("LECTOR-01")?;
/// let session = SessionId::generate();
///
/// registry.reserve(&reader, &session).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    client: Client,
    base_url: Url,
}

/// Non-success outcome of a registry request.
#[derive(Debug)]
enum HttpFailure {
    Status { status: StatusCode, message: String },
    Transport(String),
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawReservation {
    #[serde(rename = "readerName")]
    reader_name: String,

    #[serde(rename = "sessionId")]
    session_id: String,
}

impl HttpRegistry {
    /// Create a client for the registry at `config.base_url`.
    ///
    /// # Errors
    ///
    /// Returns `ReservationError::Configuration` if the base URL cannot be
    /// parsed or cannot carry path segments.
    pub fn new(config: RegistryConfig) -> Result<Self, ReservationError> {
        let base_url = Url::parse(&config.base_url).map_err(|e| {
            ReservationError::configuration(format!("invalid base URL {}: {e}", config.base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ReservationError::configuration(format!(
                "base URL {} cannot carry a path",
                config.base_url
            )));
        }

        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ReservationError::configuration(e.to_string()))?;

        debug!(base_url = %base_url, "Created HTTP registry client");
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str], query: &[(&str, &str)]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        url
    }

    async fn execute(&self, method: Method, url: Url) -> Result<Response, HttpFailure> {
        trace!(%method, %url, "Registry request");

        let response = self
            .client
            .request(method, url)
            .send()
            .await
            .map_err(|e| HttpFailure::Transport(describe(&e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = error_message(response).await;
        debug!(status = status.as_u16(), %message, "Registry request failed");
        Err(HttpFailure::Status { status, message })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: Url,
    ) -> Result<T, ReservationError> {
        let response = self
            .execute(Method::GET, url)
            .await
            .map_err(reservation_failure)?;

        response
            .json::<T>()
            .await
            .map_err(|e| ReservationError::invalid_response(e.to_string()))
    }
}

impl ReaderRegistry for HttpRegistry {
    async fn reserve(
        &self,
        reader: &ReaderId,
        session: &SessionId,
    ) -> Result<(), ReservationError> {
        let url = self.endpoint(
            &["reserve", reader.as_str()],
            &[("sessionId", session.as_str())],
        );

        match self.execute(Method::POST, url).await {
            Ok(_) => Ok(()),
            Err(HttpFailure::Status { status, .. }) if status == StatusCode::CONFLICT => {
                Err(ReservationError::already_reserved(reader.as_str()))
            }
            Err(HttpFailure::Status { status, message })
                if status == StatusCode::NOT_FOUND
                    || status == StatusCode::SERVICE_UNAVAILABLE =>
            {
                Err(ReservationError::unavailable(reader.as_str(), message))
            }
            Err(failure) => Err(reservation_failure(failure)),
        }
    }

    async fn start_scanning(
        &self,
        reader: &ReaderId,
        session: &SessionId,
    ) -> Result<(), ScanServiceError> {
        let url = self.endpoint(
            &["checador", "start", reader.as_str()],
            &[("sessionId", session.as_str())],
        );

        match self.execute(Method::POST, url).await {
            Ok(_) => Ok(()),
            Err(HttpFailure::Status { status, message }) => Err(ScanServiceError::start_failed(
                reader.as_str(),
                format!("HTTP {}: {message}", status.as_u16()),
            )),
            Err(HttpFailure::Transport(message)) => Err(ScanServiceError::transport(message)),
        }
    }

    async fn stop_scanning(&self, reader: &ReaderId) -> Result<(), ScanServiceError> {
        let url = self.endpoint(&["checador", "stop", reader.as_str()], &[]);

        match self.execute(Method::POST, url).await {
            Ok(_) => Ok(()),
            Err(HttpFailure::Status { status, message }) => Err(ScanServiceError::stop_failed(
                reader.as_str(),
                format!("HTTP {}: {message}", status.as_u16()),
            )),
            Err(HttpFailure::Transport(message)) => Err(ScanServiceError::transport(message)),
        }
    }

    async fn release(
        &self,
        reader: &ReaderId,
        session: &SessionId,
    ) -> Result<(), ReservationError> {
        let url = self.endpoint(
            &["release", reader.as_str()],
            &[("sessionId", session.as_str())],
        );

        self.execute(Method::POST, url)
            .await
            .map(|_| ())
            .map_err(reservation_failure)
    }

    async fn force_release(&self, reader: &ReaderId) -> Result<(), ReservationError> {
        let url = self.endpoint(&["readers", "release"], &[("readerName", reader.as_str())]);

        match self.execute(Method::POST, url).await {
            Ok(_) => Ok(()),
            Err(HttpFailure::Status { status, .. }) if status == StatusCode::NOT_FOUND => {
                Err(ReservationError::not_reserved(reader.as_str()))
            }
            Err(failure) => Err(reservation_failure(failure)),
        }
    }

    async fn list_reserved(&self) -> Result<Vec<ReservationListEntry>, ReservationError> {
        let url = self.endpoint(&["readers", "reserved"], &[]);
        let raw: Vec<RawReservation> = self.get_json(url).await?;

        let entries = raw
            .into_iter()
            .map(|entry| {
                ReservationListEntry::new(
                    ReaderId::from_registry(entry.reader_name),
                    SessionId::from_registry(entry.session_id),
                )
            })
            .collect();

        Ok(entries)
    }

    async fn available_readers(&self) -> Result<Vec<ReaderId>, ReservationError> {
        let url = self.endpoint(&["readers"], &[]);
        let names: Vec<String> = self.get_json(url).await?;

        Ok(names
            .into_iter()
            .filter_map(|name| match ReaderId::new(&name) {
                Ok(reader) => Some(reader),
                Err(e) => {
                    warn!(%name, "Skipping malformed reader name: {}", e);
                    None
                }
            })
            .collect())
    }
}

fn reservation_failure(failure: HttpFailure) -> ReservationError {
    match failure {
        HttpFailure::Status { status, message } => {
            ReservationError::rejected(status.as_u16(), message)
        }
        HttpFailure::Transport(message) => ReservationError::transport(message),
    }
}

fn describe(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        format!("request timed out: {error}")
    } else if error.is_connect() {
        format!("connection failed: {error}")
    } else {
        error.to_string()
    }
}

/// Best available description of a failed response.
async fn error_message(response: Response) -> String {
    let status = response.status();
    let fallback = || {
        status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string()
    };

    let Ok(text) = response.text().await else {
        return fallback();
    };

    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(ErrorBody {
            message: Some(message),
        }) if !message.is_empty() => message,
        _ if !text.trim().is_empty() => text.trim().to_string(),
        _ => fallback(),
    }
}
