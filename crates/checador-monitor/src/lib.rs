//! Administrative reservation monitor for checador readers.
//!
//! [`ReservationMonitor`] polls the registry's reservation list and lets an
//! administrator force-release readers held by stuck kiosk sessions.

pub mod config;
pub mod monitor;

pub use config::MonitorConfig;
pub use monitor::{ForceReleaseReport, MonitorCommand, MonitorEvent, ReservationMonitor};
