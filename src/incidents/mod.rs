//! Incident lifecycle and automated response
//!
//! Qualifying active alerts are promoted to incidents, each incident gets the
//! response actions its severity calls for, and every change is written
//! through to durable storage so open incidents survive a restart.

/// Incident and response action records
pub mod incident;
/// Incident creation, response dispatch and aging
pub mod manager;
/// Durable incident storage
pub mod store;

pub use incident::{ActionStatus, ActionType, Incident, IncidentAge, IncidentStatus, ResponseAction};
pub use manager::{IncidentCounters, IncidentManager};
pub use store::{FileIncidentStore, IncidentSink};
