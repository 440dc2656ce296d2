//! Alert correlator
//!
//! Groups the raw alerts of one cycle into correlated alerts. Alerts are
//! visited in collection order; each alert not yet grouped seeds a new group
//! and every later ungrouped alert joins the first group whose members are
//! all similar to it. The visiting order makes the partition deterministic,
//! and requiring similarity to every member keeps dissimilar alerts apart
//! even when a third alert resembles both.

use crate::correlation::policy::{KeywordSeverityPolicy, SimilarityPolicy};
use crate::events::{RawAlert, Severity, Timestamp};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationKind {
    /// Wraps a single raw alert
    Individual,
    /// Two or more raw alerts believed to share a root cause
    Correlated,
}

/// A deduplicated, possibly merged view of one or more raw alerts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelatedAlert {
    /// Stable key used by the active alert table
    pub id: String,
    #[serde(rename = "type")]
    pub kind: CorrelationKind,
    /// Maximum severity among the member alerts
    pub severity: Severity,
    pub message: String,
    pub sources: BTreeSet<String>,
    pub alerts: Vec<RawAlert>,
    pub confidence: f64,
    pub first_timestamp: Timestamp,
    pub last_timestamp: Timestamp,
}

impl CorrelatedAlert {
    pub fn individual(alert: RawAlert) -> Self {
        Self {
            id: alert.fingerprint(),
            kind: CorrelationKind::Individual,
            severity: alert.severity,
            message: alert.message.clone(),
            sources: BTreeSet::from([alert.source.clone()]),
            first_timestamp: alert.timestamp,
            last_timestamp: alert.timestamp,
            confidence: 1.0,
            alerts: vec![alert],
        }
    }

    /// Merge a group of at least two alerts
    ///
    /// Falls back to an individual alert for a single-member group.
    pub fn correlated(alerts: Vec<RawAlert>) -> Option<Self> {
        let first = alerts.first()?.clone();
        if alerts.len() == 1 {
            return Some(Self::individual(first));
        }

        let sources: BTreeSet<String> = alerts.iter().map(|a| a.source.clone()).collect();
        let severity = alerts
            .iter()
            .map(|a| a.severity)
            .max()
            .unwrap_or(first.severity);
        let first_timestamp = alerts.iter().map(|a| a.timestamp).min().unwrap_or(first.timestamp);
        let last_timestamp = alerts.iter().map(|a| a.timestamp).max().unwrap_or(first.timestamp);
        let confidence = (0.3 * sources.len() as f64 + 0.1 * alerts.len() as f64).min(1.0);

        let message = format!(
            "{} related alerts from {}: {}",
            alerts.len(),
            sources.iter().cloned().collect::<Vec<_>>().join(", "),
            first.message
        );

        Some(Self {
            id: group_id(&alerts),
            kind: CorrelationKind::Correlated,
            severity,
            message,
            sources,
            alerts,
            confidence,
            first_timestamp,
            last_timestamp,
        })
    }

    pub fn is_correlated(&self) -> bool {
        self.kind == CorrelationKind::Correlated
    }
}

/// `corr_` followed by a hash of the sorted member fingerprints
fn group_id(alerts: &[RawAlert]) -> String {
    let fingerprints: BTreeSet<String> = alerts.iter().map(RawAlert::fingerprint).collect();
    let mut hasher = DefaultHasher::new();
    for fingerprint in &fingerprints {
        fingerprint.hash(&mut hasher);
    }
    format!("corr_{:016x}", hasher.finish())
}

/// Partitions raw alerts into correlated alerts using a similarity policy
pub struct Correlator {
    policy: Box<dyn SimilarityPolicy>,
}

impl Correlator {
    pub fn new(policy: Box<dyn SimilarityPolicy>) -> Self {
        Self { policy }
    }

    pub fn policy_name(&self) -> &str {
        self.policy.name()
    }

    /// Group alerts, returning groups in the order their first member was collected
    pub fn correlate(&self, alerts: &[RawAlert]) -> Vec<CorrelatedAlert> {
        let groups = self.partition(alerts);
        let correlated: Vec<CorrelatedAlert> = groups
            .into_iter()
            .filter_map(|members| {
                CorrelatedAlert::correlated(members.into_iter().map(|i| alerts[i].clone()).collect())
            })
            .collect();

        debug!(
            "Correlated {} raw alerts into {} alerts using '{}'",
            alerts.len(),
            correlated.len(),
            self.policy.name()
        );
        correlated
    }

    /// Index groups in collection order
    fn partition(&self, alerts: &[RawAlert]) -> Vec<Vec<usize>> {
        let mut groups: Vec<Vec<usize>> = Vec::new();

        for (index, alert) in alerts.iter().enumerate() {
            let home = groups.iter_mut().find(|members| {
                members
                    .iter()
                    .all(|&member| self.policy.similar(&alerts[member], alert))
            });
            match home {
                Some(members) => members.push(index),
                None => groups.push(vec![index]),
            }
        }

        groups
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new(Box::new(KeywordSeverityPolicy::default()))
    }
}
