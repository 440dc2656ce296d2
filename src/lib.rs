/// Error types for every subsystem
pub mod error;

/// Shared data model: severities, raw alerts and signal snapshots
pub mod events;

/// Configuration management
pub mod config;

/// Signal collection from monitoring producers
pub mod collectors;

/// Time-bounded metric history
pub mod history;

/// Trend models, prediction and anomaly detection
pub mod analysis;

/// Alert correlation
pub mod correlation;

/// Active alert table and notification channels
pub mod alerts;

/// Incident lifecycle and automated response
pub mod incidents;

/// Atomic JSON persistence
pub mod persistence;

/// Reports, exit status and shutdown state
pub mod report;

/// Periodic loops and monitoring cadence
pub mod scheduler;

/// Self-monitoring of the watchtower process
pub mod monitoring;

/// Component wiring and process lifecycle
pub mod orchestrator;

// Re-export commonly used types
pub use config::Config;
pub use error::{ConfigError, ModelError, PersistenceError, ProducerError, ResponseError};
pub use events::{RawAlert, Severity, SignalSnapshot};
pub use orchestrator::Orchestrator;
pub use report::{ExitStatus, OverallStatus, Report};
