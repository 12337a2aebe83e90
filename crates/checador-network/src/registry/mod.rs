//! Reader registry: the server-side authority over reader reservations.
//!
//! The registry decides who holds a reader. Clients never keep their own
//! reservation map; every answer here comes from the registry at the time of
//! the call.
//!
//! Methods use native `async fn` (Edition 2024 RPITIT). The returned futures
//! are not required to be `Send`, so callers drive them on their own task.

#![allow(async_fn_in_trait)]

mod http;
mod memory;

pub use http::HttpRegistry;
pub use memory::{InMemoryRegistry, RegistryCall};

use checador_core::{ReaderId, ReservationListEntry, SessionId};

use crate::error::{ReservationError, ScanServiceError};

/// Remote reader registry and scan service.
pub trait ReaderRegistry {
    /// Reserve `reader` for `session`.
    ///
    /// # Errors
    ///
    /// - `AlreadyReserved` if another session holds the reader
    /// - `ReaderUnavailable` if the registry does not know the reader
    /// - `Transport` if the registry could not be reached
    async fn reserve(&self, reader: &ReaderId, session: &SessionId)
    -> Result<(), ReservationError>;

    /// Ask the scan service to start reading fingerprints on `reader`.
    async fn start_scanning(
        &self,
        reader: &ReaderId,
        session: &SessionId,
    ) -> Result<(), ScanServiceError>;

    /// Ask the scan service to stop reading on `reader`.
    async fn stop_scanning(&self, reader: &ReaderId) -> Result<(), ScanServiceError>;

    /// Release `session`'s reservation of `reader`.
    ///
    /// Releasing a reservation the session does not hold succeeds without
    /// touching any other session's reservation.
    async fn release(&self, reader: &ReaderId, session: &SessionId)
    -> Result<(), ReservationError>;

    /// Administrative release of `reader`, whoever holds it.
    async fn force_release(&self, reader: &ReaderId) -> Result<(), ReservationError>;

    /// Snapshot of current reservations, with names and session ids kept
    /// exactly as the registry reports them.
    async fn list_reserved(&self) -> Result<Vec<ReservationListEntry>, ReservationError>;

    /// Readers known to the registry.
    async fn available_readers(&self) -> Result<Vec<ReaderId>, ReservationError>;
}
