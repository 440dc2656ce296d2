use crate::collectors::{MonitoringProducer, ProducerFuture};
use crate::config::ProducerConfig;
use crate::error::ProducerError;
use crate::events::{ProducerReport, RawAlert, Severity, Timestamp};
use chrono::Utc;
use log::debug;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::process::Stdio;
use tokio::process::Command;

/// Producer backed by an external command
///
/// The command is spawned once per collection cycle and must print a JSON
/// object on stdout, either `{"alerts": [...], "metrics": {...}}` or
/// `{"error": "..."}`. Alerts may omit `source` and `timestamp`; they default
/// to the producer name and the collection time. The child is killed if the
/// collector's timeout drops the future.
pub struct CommandProducer {
    name: String,
    program: String,
    args: Vec<String>,
}

/// Wire format printed by producer commands
#[derive(Debug, Deserialize)]
struct WireReport {
    #[serde(default)]
    alerts: Vec<WireAlert>,
    #[serde(default)]
    metrics: BTreeMap<String, f64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireAlert {
    #[serde(default)]
    source: Option<String>,
    severity: Severity,
    message: String,
    #[serde(default)]
    timestamp: Option<Timestamp>,
}

impl CommandProducer {
    /// Create a producer from a name and an argv list
    ///
    /// # Errors
    ///
    /// Returns `ProducerError::Unavailable` when `command` is empty.
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Result<Self, ProducerError> {
        let name = name.into();
        let mut parts = command.into_iter();
        let program = parts
            .next()
            .ok_or_else(|| ProducerError::Unavailable(format!("producer '{}' has no command", name)))?;
        Ok(Self {
            name,
            program,
            args: parts.collect(),
        })
    }

    pub fn from_config(config: &ProducerConfig) -> Result<Self, ProducerError> {
        Self::new(config.name.clone(), config.command.clone())
    }

    /// Parse the JSON printed by a producer command
    fn parse_report(&self, stdout: &[u8], collected_at: Timestamp) -> Result<ProducerReport, ProducerError> {
        let wire: WireReport = serde_json::from_slice(stdout)
            .map_err(|e| ProducerError::ParseError(format!("{}: {}", self.name, e)))?;

        if let Some(error) = wire.error {
            return Err(ProducerError::Unavailable(format!("{}: {}", self.name, error)));
        }

        let alerts = wire
            .alerts
            .into_iter()
            .map(|alert| RawAlert {
                source: alert.source.unwrap_or_else(|| self.name.clone()),
                severity: alert.severity,
                message: alert.message,
                timestamp: alert.timestamp.unwrap_or(collected_at),
            })
            .collect();

        Ok(ProducerReport {
            alerts,
            metrics: wire.metrics,
        })
    }

    async fn run(&self) -> Result<ProducerReport, ProducerError> {
        debug!("Running producer '{}': {} {:?}", self.name, self.program, self.args);

        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProducerError::CommandFailed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        self.parse_report(&output.stdout, Utc::now())
    }
}

impl MonitoringProducer for CommandProducer {
    fn id(&self) -> &str {
        &self.name
    }

    fn current_state(&self) -> ProducerFuture<'_> {
        Box::pin(self.run())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn producer() -> CommandProducer {
        CommandProducer::new("security", vec!["true".to_string()]).unwrap()
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(CommandProducer::new("empty", Vec::new()).is_err());
    }

    #[test]
    fn test_parse_report_fills_defaults() {
        let now = Utc::now();
        let report = producer()
            .parse_report(
                br#"{"alerts": [{"severity": "high", "message": "failed logins spiking"}],
                     "metrics": {"failed_logins": 42}}"#,
                now,
            )
            .unwrap();

        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.alerts[0].source, "security");
        assert_eq!(report.alerts[0].severity, Severity::High);
        assert_eq!(report.alerts[0].timestamp, now);
        assert_eq!(report.metrics["failed_logins"], 42.0);
    }

    #[test]
    fn test_parse_report_keeps_explicit_source() {
        let report = producer()
            .parse_report(
                br#"{"alerts": [{"source": "ids", "severity": "info", "message": "scan",
                                 "timestamp": "2024-01-01T00:00:00Z"}]}"#,
                Utc::now(),
            )
            .unwrap();
        assert_eq!(report.alerts[0].source, "ids");
        assert_eq!(report.alerts[0].timestamp.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_error_payload_is_unavailable() {
        let result = producer().parse_report(br#"{"error": "backend down"}"#, Utc::now());
        assert!(matches!(result, Err(ProducerError::Unavailable(msg)) if msg.contains("backend down")));
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let result = producer().parse_report(b"not json", Utc::now());
        assert!(matches!(result, Err(ProducerError::ParseError(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_command_and_parses_stdout() {
        let producer = CommandProducer::new(
            "perf",
            vec![
                "sh".to_string(),
                "-c".to_string(),
                r#"echo '{"metrics": {"latency_ms": 250.5}}'"#.to_string(),
            ],
        )
        .unwrap();

        let report = producer.current_state().await.unwrap();
        assert_eq!(report.metrics["latency_ms"], 250.5);
        assert!(report.alerts.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_is_command_failure() {
        let producer = CommandProducer::new(
            "perf",
            vec!["sh".to_string(), "-c".to_string(), "echo boom >&2; exit 3".to_string()],
        )
        .unwrap();

        let result = producer.current_state().await;
        assert!(matches!(result, Err(ProducerError::CommandFailed(msg)) if msg.contains("boom")));
    }

    #[tokio::test]
    async fn test_missing_program_is_io_error() {
        let producer =
            CommandProducer::new("ghost", vec!["/nonexistent/watchtower-producer".to_string()]).unwrap();
        let result = producer.current_state().await;
        assert!(matches!(result, Err(ProducerError::IoError(_))));
    }
}
