//! Consolidated reports and the shutdown state snapshot

use crate::alerts::ActiveAlertEntry;
use crate::analysis::{AnomalyRecord, Prediction};
use crate::correlation::CorrelatedAlert;
use crate::error::PersistenceError;
use crate::events::{Severity, Timestamp};
use crate::incidents::{Incident, IncidentAge, IncidentCounters};
use crate::monitoring::SelfMonitoringMetrics;
use crate::persistence::write_json_atomic;
use log::{debug, info, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Open incidents older than this are called out in recommendations
const STALE_INCIDENT_MINUTES: i64 = 60;

pub const NO_ACTION_REQUIRED: &str = "No action required";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Warning,
    Critical,
}

impl OverallStatus {
    /// Critical if any alert is critical, warning if any is high or warning
    pub fn from_alerts<'a>(alerts: impl IntoIterator<Item = &'a CorrelatedAlert>) -> Self {
        match alerts.into_iter().map(|a| a.severity).max() {
            Some(Severity::Critical) => OverallStatus::Critical,
            Some(Severity::High) | Some(Severity::Warning) => OverallStatus::Warning,
            Some(Severity::Info) | None => OverallStatus::Healthy,
        }
    }
}

/// Process exit status derived from a report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Healthy,
    Critical,
    /// Active alert volume above the noise threshold
    Noisy,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Healthy => 0,
            ExitStatus::Critical => 2,
            ExitStatus::Noisy => 3,
        }
    }
}

/// Everything a report is built from
#[derive(Debug, Clone)]
pub struct ReportInputs {
    pub timestamp: Timestamp,
    pub active_alerts: Vec<ActiveAlertEntry>,
    pub counters: IncidentCounters,
    pub open_incidents: Vec<IncidentAge>,
    pub predictions: Vec<Prediction>,
    pub anomalies: Vec<AnomalyRecord>,
    pub degraded_producers: Vec<String>,
    pub noise_threshold: usize,
}

/// Consolidated summary refreshed once per reporting iteration
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub timestamp: Timestamp,
    pub overall_status: OverallStatus,
    pub active_alerts: Vec<CorrelatedAlert>,
    pub incidents_created_count: u64,
    pub automated_responses_count: u64,
    pub failed_responses_count: u64,
    pub open_incidents: Vec<IncidentAge>,
    pub predictions: Vec<Prediction>,
    pub anomalies: Vec<AnomalyRecord>,
    pub degraded_producers: Vec<String>,
    pub recommendations: Vec<String>,
}

impl Report {
    pub fn build(inputs: ReportInputs) -> Self {
        let recommendations = recommendations(&inputs);
        let active_alerts: Vec<CorrelatedAlert> =
            inputs.active_alerts.into_iter().map(|entry| entry.alert).collect();

        Self {
            timestamp: inputs.timestamp,
            overall_status: OverallStatus::from_alerts(&active_alerts),
            active_alerts,
            incidents_created_count: inputs.counters.incidents_created,
            automated_responses_count: inputs.counters.automated_responses(),
            failed_responses_count: inputs.counters.responses_failed,
            open_incidents: inputs.open_incidents,
            predictions: inputs.predictions,
            anomalies: inputs.anomalies,
            degraded_producers: inputs.degraded_producers,
            recommendations,
        }
    }

    /// Critical alerts win over alert volume
    pub fn exit_status(&self, noise_threshold: usize) -> ExitStatus {
        if self.overall_status == OverallStatus::Critical {
            ExitStatus::Critical
        } else if self.active_alerts.len() > noise_threshold {
            ExitStatus::Noisy
        } else {
            ExitStatus::Healthy
        }
    }

    /// Short multi-line summary for terminal output
    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("Status: {:?}", self.overall_status),
            format!("Active alerts: {}", self.active_alerts.len()),
        ];
        for alert in &self.active_alerts {
            lines.push(format!("  [{}] {}", alert.severity, alert.message));
        }
        lines.push(format!(
            "Incidents created: {}, open: {}",
            self.incidents_created_count,
            self.open_incidents.len()
        ));
        lines.push(format!(
            "Automated responses: {} ({} failed)",
            self.automated_responses_count, self.failed_responses_count
        ));
        if !self.degraded_producers.is_empty() {
            lines.push(format!(
                "Degraded producers: {}",
                self.degraded_producers.join(", ")
            ));
        }
        lines.push("Recommendations:".to_string());
        for recommendation in &self.recommendations {
            lines.push(format!("  - {}", recommendation));
        }
        lines.join("\n")
    }
}

fn recommendations(inputs: &ReportInputs) -> Vec<String> {
    let mut out = Vec::new();

    let critical = inputs
        .active_alerts
        .iter()
        .filter(|entry| entry.alert.severity == Severity::Critical)
        .count();
    if critical > 0 {
        out.push(format!(
            "Investigate {} critical alert(s) immediately",
            critical
        ));
    }

    if inputs.counters.responses_failed > 0 {
        out.push(format!(
            "Review {} failed automated response action(s)",
            inputs.counters.responses_failed
        ));
    }

    for incident in &inputs.open_incidents {
        if incident.age_minutes >= STALE_INCIDENT_MINUTES {
            out.push(format!(
                "Incident {} has been open for {} minutes: {}",
                incident.id, incident.age_minutes, incident.description
            ));
        }
    }

    for prediction in &inputs.predictions {
        out.push(format!(
            "{} is predicted to reach {:.1} within {}h ({}); plan capacity or remediation",
            prediction.metric, prediction.predicted_value, prediction.horizon_hours, prediction.threshold
        ));
    }

    for anomaly in &inputs.anomalies {
        out.push(format!(
            "Check {}: latest value {:.2} deviates {:.1} standard deviations from baseline",
            anomaly.metric, anomaly.value, anomaly.deviation
        ));
    }

    if !inputs.degraded_producers.is_empty() {
        out.push(format!(
            "Restore unavailable producers: {}",
            inputs.degraded_producers.join(", ")
        ));
    }

    if inputs.active_alerts.len() > inputs.noise_threshold {
        out.push(format!(
            "Alert volume ({}) exceeds the noise threshold of {}; tune alert sources",
            inputs.active_alerts.len(),
            inputs.noise_threshold
        ));
    }

    if out.is_empty() {
        out.push(NO_ACTION_REQUIRED.to_string());
    }
    out
}

/// Process state persisted once on shutdown
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub timestamp: Timestamp,
    pub active_alerts: Vec<ActiveAlertEntry>,
    pub counters: IncidentCounters,
    pub open_incidents: Vec<Incident>,
    pub self_monitoring: SelfMonitoringMetrics,
}

const ARCHIVE_PREFIX: &str = "report-";

/// Writes reports and state snapshots under one directory
///
/// At most `keep` timestamped reports are kept; the oldest are deleted after
/// each write.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    directory: PathBuf,
    keep: usize,
}

impl ReportWriter {
    pub fn new(directory: impl Into<PathBuf>, keep: usize) -> Self {
        Self {
            directory: directory.into(),
            keep: keep.max(1),
        }
    }

    pub fn ensure_directory(&self) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.directory)?;
        Ok(())
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn latest_path(&self) -> PathBuf {
        self.directory.join("latest.json")
    }

    pub fn state_path(&self) -> PathBuf {
        self.directory.join("state.json")
    }

    /// Write `latest.json` and a timestamped copy, returning the copy's path
    pub fn write_report(&self, report: &Report) -> Result<PathBuf, PersistenceError> {
        let archived = self.directory.join(format!(
            "{}{}.json",
            ARCHIVE_PREFIX,
            report.timestamp.format("%Y%m%dT%H%M%SZ")
        ));
        write_json_atomic(&archived, report)?;
        write_json_atomic(&self.latest_path(), report)?;
        debug!("Report written to {}", archived.display());

        if let Err(e) = self.prune_archives() {
            warn!("Failed to prune old reports in {}: {}", self.directory.display(), e);
        }
        Ok(archived)
    }

    /// Delete the oldest timestamped reports beyond the retention count
    ///
    /// Returns the number of files removed.
    pub fn prune_archives(&self) -> Result<usize, PersistenceError> {
        let mut archives = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let path = entry?.path();
            let is_archive = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(ARCHIVE_PREFIX) && name.ends_with(".json"));
            if is_archive {
                archives.push(path);
            }
        }
        if archives.len() <= self.keep {
            return Ok(0);
        }

        // Timestamped names sort chronologically
        archives.sort();
        let excess = archives.len() - self.keep;
        for path in &archives[..excess] {
            fs::remove_file(path)?;
        }
        debug!("Pruned {} old reports", excess);
        Ok(excess)
    }

    pub fn write_state(&self, state: &StateSnapshot) -> Result<(), PersistenceError> {
        write_json_atomic(&self.state_path(), state)?;
        info!("State snapshot written to {}", self.state_path().display());
        Ok(())
    }
}
