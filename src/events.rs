//! Core signal types shared by every stage of the monitoring pipeline
//!
//! This module defines the raw alerts and signal snapshots produced by
//! monitoring producers, and the severity scale used for every comparison
//! and max operation in the crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Number of message characters that take part in an alert fingerprint
const FINGERPRINT_PREFIX_LEN: usize = 50;

/// Severity level for raw alerts, correlated alerts and incidents
///
/// The derived ordering is total: `Info < Warning < High < Critical`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational signal, no action required
    Info,
    /// Warning that may require attention
    Warning,
    /// High severity issue, eligible for incident creation
    High,
    /// Critical issue requiring immediate attention
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single alert raised by a producer or by the predictor
///
/// Raw alerts are never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawAlert {
    /// Component that raised the alert (producer id, `predictor`, ...)
    pub source: String,
    /// Severity assigned by the source
    pub severity: Severity,
    /// Human-readable alert text
    pub message: String,
    /// When the alert was raised
    pub timestamp: Timestamp,
}

impl RawAlert {
    pub fn new(
        source: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            source: source.into(),
            severity,
            message: message.into(),
            timestamp,
        }
    }

    /// Stable key derived from source, severity and the message prefix
    ///
    /// The same alert re-raised on a later cycle yields the same fingerprint,
    /// which is what lets the active alert table track occurrences.
    pub fn fingerprint(&self) -> String {
        let prefix: String = self
            .message
            .to_lowercase()
            .chars()
            .take(FINGERPRINT_PREFIX_LEN)
            .collect();
        format!("{}:{}:{}", self.source, self.severity, prefix.trim())
    }
}

/// Payload returned by a producer's "current state" operation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProducerReport {
    /// Alerts currently raised by the producer
    #[serde(default)]
    pub alerts: Vec<RawAlert>,
    /// Current metric readings keyed by metric name
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

/// One producer's reading at a point in time
///
/// Snapshots are immutable once collected. A snapshot with `error` set is a
/// degraded "data unavailable" signal and carries no metrics or alerts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalSnapshot {
    pub producer_id: String,
    pub timestamp: Timestamp,
    pub metric_values: BTreeMap<String, f64>,
    pub raw_alerts: Vec<RawAlert>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SignalSnapshot {
    /// Build a healthy snapshot from a producer report
    pub fn from_report(
        producer_id: impl Into<String>,
        timestamp: Timestamp,
        report: ProducerReport,
    ) -> Self {
        Self {
            producer_id: producer_id.into(),
            timestamp,
            metric_values: report.metrics,
            raw_alerts: report.alerts,
            error: None,
        }
    }

    /// Build a degraded snapshot for a producer that failed this cycle
    pub fn unavailable(
        producer_id: impl Into<String>,
        timestamp: Timestamp,
        error: impl Into<String>,
    ) -> Self {
        Self {
            producer_id: producer_id.into(),
            timestamp,
            metric_values: BTreeMap::new(),
            raw_alerts: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::High);
        assert!(Severity::High < Severity::Critical);
        assert_eq!(
            [Severity::Warning, Severity::Critical, Severity::Info]
                .iter()
                .max(),
            Some(&Severity::Critical)
        );
    }

    #[test]
    fn test_severity_serialization() {
        assert_eq!(serde_json::to_string(&Severity::High).unwrap(), "\"high\"");
        assert_eq!(
            serde_json::from_str::<Severity>("\"critical\"").unwrap(),
            Severity::Critical
        );
    }

    #[test]
    fn test_fingerprint_is_stable_across_timestamps() {
        let now = Utc::now();
        let first = RawAlert::new("sysA", Severity::Critical, "Memory exhausted", now);
        let later = RawAlert::new(
            "sysA",
            Severity::Critical,
            "memory exhausted",
            now + chrono::Duration::minutes(5),
        );
        assert_eq!(first.fingerprint(), later.fingerprint());
        assert_eq!(first.fingerprint(), "sysA:critical:memory exhausted");
    }

    #[test]
    fn test_fingerprint_uses_message_prefix_only() {
        let now = Utc::now();
        let base = "x".repeat(FINGERPRINT_PREFIX_LEN);
        let a = RawAlert::new("s", Severity::Info, format!("{}tail-one", base), now);
        let b = RawAlert::new("s", Severity::Info, format!("{}tail-two", base), now);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_producer_report_defaults_missing_fields() {
        let report: ProducerReport = serde_json::from_str(r#"{"metrics": {"cpu": 12.5}}"#).unwrap();
        assert!(report.alerts.is_empty());
        assert_eq!(report.metrics.get("cpu"), Some(&12.5));
    }

    #[test]
    fn test_unavailable_snapshot_is_degraded() {
        let snapshot = SignalSnapshot::unavailable("security", Utc::now(), "timed out");
        assert!(snapshot.is_degraded());
        assert!(snapshot.metric_values.is_empty());
        assert!(snapshot.raw_alerts.is_empty());
    }
}
