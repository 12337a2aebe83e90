//! Session-bound view of the reader registry.

use tracing::{debug, info, warn};

use checador_core::{ReaderId, ReservationListEntry, SessionId};

use crate::error::{ReservationError, ScanServiceError};
use crate::registry::ReaderRegistry;

/// Reservation client for one kiosk session.
///
/// Wraps a [`ReaderRegistry`] together with the session id every request is
/// made on behalf of. Starting the scan service is the second half of a
/// two-step acquisition: if it fails after the reader was reserved, the
/// reservation is released before the error is returned, so a failed start
/// never leaves a reader locked.
#[derive(Debug, Clone)]
pub struct ReservationClient<R> {
    registry: R,
    session: SessionId,
}

impl<R: ReaderRegistry> ReservationClient<R> {
    pub fn new(registry: R, session: SessionId) -> Self {
        Self { registry, session }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Reserve `reader` for this session.
    pub async fn reserve(&self, reader: &ReaderId) -> Result<(), ReservationError> {
        debug!(reader = %reader, session = %self.session, "Reserving reader");

        match self.registry.reserve(reader, &self.session).await {
            Ok(()) => {
                info!(reader = %reader, "Reader reserved");
                Ok(())
            }
            Err(e) => {
                warn!(reader = %reader, "Reservation failed: {}", e);
                Err(e)
            }
        }
    }

    /// Start the scan service on a reader this session has reserved.
    ///
    /// On failure the reservation is released (best effort) and the start
    /// error is returned.
    pub async fn start_scanning(&self, reader: &ReaderId) -> Result<(), ScanServiceError> {
        debug!(reader = %reader, "Starting scan service");

        match self.registry.start_scanning(reader, &self.session).await {
            Ok(()) => {
                info!(reader = %reader, "Scan service started");
                Ok(())
            }
            Err(e) => {
                warn!(reader = %reader, "Scan service failed to start: {}", e);
                if let Err(release) = self.registry.release(reader, &self.session).await {
                    warn!(reader = %reader, "Compensating release failed: {}", release);
                } else {
                    debug!(reader = %reader, "Compensating release done");
                }
                Err(e)
            }
        }
    }

    /// Reserve `reader` and start scanning on it.
    pub async fn acquire(&self, reader: &ReaderId) -> Result<(), AcquireError> {
        self.reserve(reader).await?;
        self.start_scanning(reader).await?;
        Ok(())
    }

    pub async fn stop_scanning(&self, reader: &ReaderId) -> Result<(), ScanServiceError> {
        debug!(reader = %reader, "Stopping scan service");
        self.registry.stop_scanning(reader).await
    }

    pub async fn release(&self, reader: &ReaderId) -> Result<(), ReservationError> {
        debug!(reader = %reader, session = %self.session, "Releasing reader");
        self.registry.release(reader, &self.session).await
    }

    /// Administrative release, regardless of holder.
    pub async fn force_release(&self, reader: &ReaderId) -> Result<(), ReservationError> {
        info!(reader = %reader, "Force releasing reader");
        self.registry.force_release(reader).await
    }

    pub async fn list_reserved(&self) -> Result<Vec<ReservationListEntry>, ReservationError> {
        self.registry.list_reserved().await
    }

    pub async fn available_readers(&self) -> Result<Vec<ReaderId>, ReservationError> {
        self.registry.available_readers().await
    }
}

/// Failure of the combined reserve-and-start step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AcquireError {
    #[error(transparent)]
    Reservation(#[from] ReservationError),

    #[error(transparent)]
    ScanService(#[from] ScanServiceError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{InMemoryRegistry, RegistryCall};

    fn setup() -> (ReservationClient<InMemoryRegistry>, InMemoryRegistry, ReaderId) {
        let registry = InMemoryRegistry::new();
        let client = ReservationClient::new(registry.clone(), SessionId::new("kiosk-a").unwrap());
        (client, registry, ReaderId::new("LECTOR-01").unwrap())
    }

    #[tokio::test]
    async fn test_acquire_reserves_and_starts() {
        let (client, registry, reader) = setup();

        client.acquire(&reader).await.unwrap();

        assert_eq!(registry.holder(&reader), Some(client.session().clone()));
        assert!(registry.is_scanning(&reader));
    }

    #[tokio::test]
    async fn test_failed_start_releases_reservation() {
        let (client, registry, reader) = setup();
        registry.fail_next_start("scanner not attached");

        let result = client.acquire(&reader).await;

        assert!(matches!(result, Err(AcquireError::ScanService(_))));
        assert_eq!(registry.holder(&reader), None);
        assert_eq!(
            registry.calls().last(),
            Some(&RegistryCall::Release(reader.clone(), client.session().clone()))
        );
    }

    #[tokio::test]
    async fn test_rejected_reserve_does_not_start() {
        let (client, registry, reader) = setup();
        registry
            .reserve(&reader, &SessionId::new("kiosk-b").unwrap())
            .await
            .unwrap();

        let result = client.acquire(&reader).await;

        assert!(matches!(
            result,
            Err(AcquireError::Reservation(ReservationError::AlreadyReserved { .. }))
        ));
        assert_eq!(
            registry.count_calls(|c| matches!(c, RegistryCall::StartScanning(..))),
            0
        );
    }
}
