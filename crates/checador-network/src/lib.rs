//! Network clients for the checador kiosk.
//!
//! This crate talks to the two remote services a kiosk session depends on:
//!
//! - **Reader registry** ([`ReaderRegistry`]): reserves readers for a session
//!   and starts or stops the fingerprint scan service. [`HttpRegistry`] is the
//!   production client, [`InMemoryRegistry`] a test double that enforces the
//!   same rules. [`ReservationClient`] binds a registry to one session id.
//! - **Event channel** ([`EventChannel`]): a reconnecting publish/subscribe
//!   connection delivering scan events per reader. [`StompChannel`] speaks
//!   STOMP over WebSocket; [`FakeChannel`] is driven by tests.
//!
//! # Example
//!
//! ```no_run
//! use checador_core::{ReaderId, SessionId};
//! use checador_network::{HttpRegistry, RegistryConfig, ReservationClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = HttpRegistry::new(RegistryConfig::new("http://10.0.0.5:8080"))?;
//! let client = ReservationClient::new(registry, SessionId::generate());
//!
//! let reader = ReaderId::new("LECTOR-01")?;
//! client.acquire(&reader).await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod registry;
pub mod reservation;

pub use channel::{
    ChannelCall, ChannelEvent, ChannelEvents, ConnectionState, EventChannel, FakeChannel,
    StompChannel, SubscriptionHandle,
};
pub use config::{ChannelConfig, RegistryConfig};
pub use error::{ChannelError, ReservationError, ScanServiceError};
pub use registry::{HttpRegistry, InMemoryRegistry, ReaderRegistry, RegistryCall};
pub use reservation::{AcquireError, ReservationClient};
