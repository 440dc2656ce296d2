//! Configuration management
//!
//! Configuration is read from a TOML file. Every section carries serde
//! defaults so a partial file (or no file at all) yields a working setup.

use crate::analysis::{ThresholdDirection, ThresholdRule};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest accepted loop period or producer timeout (one week)
pub const MAX_INTERVAL_SECONDS: u64 = 7 * 24 * 3600;
/// Longest accepted prediction horizon (one year)
pub const MAX_HORIZON_HOURS: f64 = 24.0 * 365.0;
/// Longest accepted history retention or training lookback
pub const MAX_PERIOD_DAYS: i64 = 3650;
/// Longest accepted monitoring elevation (one week)
pub const MAX_ELEVATION_MINUTES: u64 = 7 * 24 * 60;
/// Longest accepted correlation window or active alert retention (30 days)
pub const MAX_CORRELATION_SECONDS: i64 = 30 * 24 * 3600;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub correlation: CorrelationConfig,
    #[serde(default)]
    pub incidents: IncidentConfig,
    #[serde(default)]
    pub reporting: ReportingConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub producers: Vec<ProducerConfig>,
}

/// Monitoring loop cadence and producer polling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitoringConfig {
    pub interval_seconds: u64,
    pub producer_timeout_seconds: u64,
    /// Monitoring period while a critical incident has elevated monitoring
    pub elevated_interval_seconds: u64,
    /// How long elevated monitoring lasts after the last critical incident
    pub elevation_minutes: u64,
    /// Register the built-in self-health producer
    pub self_health: bool,
    pub memory_warning_mb: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            producer_timeout_seconds: 10,
            elevated_interval_seconds: 10,
            elevation_minutes: 30,
            self_health: true,
            memory_warning_mb: 500,
        }
    }
}

/// Model training, prediction and anomaly detection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    pub interval_seconds: u64,
    pub lookback_days: i64,
    pub horizon_hours: f64,
    pub confidence_threshold: f64,
    pub anomaly_threshold: f64,
    /// New samples that make a trained model stale
    pub retrain_after_samples: usize,
    pub min_series_samples: usize,
    pub min_count_samples: usize,
    /// Predicted alerts per cycle above which a count model raises an alert
    pub alert_count_threshold: f64,
    pub thresholds: Vec<ThresholdRule>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 300,
            lookback_days: 7,
            horizon_hours: 24.0,
            confidence_threshold: 0.7,
            anomaly_threshold: 2.5,
            retrain_after_samples: 12,
            min_series_samples: 5,
            min_count_samples: 3,
            alert_count_threshold: 10.0,
            thresholds: vec![
                ThresholdRule::new("health_score", ThresholdDirection::Below, 80.0, 60.0),
                ThresholdRule::new("latency_ms", ThresholdDirection::Above, 5000.0, 10000.0),
            ],
        }
    }
}

/// Alert correlation policy and active alert retention
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CorrelationConfig {
    pub window_seconds: i64,
    pub keyword_overlap_threshold: f64,
    pub min_shared_keywords: usize,
    pub retention_seconds: i64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            window_seconds: 300,
            keyword_overlap_threshold: 0.3,
            min_shared_keywords: 1,
            retention_seconds: 3600,
        }
    }
}

/// Incident creation thresholds and storage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IncidentConfig {
    pub critical_threshold: f64,
    pub high_threshold: f64,
    /// High severity individual alerts need more occurrences than this
    pub min_occurrences: u32,
    /// Whether high severity incidents get an incident record action
    pub record_high_severity: bool,
    pub directory: PathBuf,
}

impl Default for IncidentConfig {
    fn default() -> Self {
        Self {
            critical_threshold: 0.9,
            high_threshold: 0.7,
            min_occurrences: 3,
            record_high_severity: true,
            directory: PathBuf::from("data/incidents"),
        }
    }
}

/// Reporting loop and exit status settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReportingConfig {
    pub interval_seconds: u64,
    pub directory: PathBuf,
    /// Active alert count above which the alert volume counts as noise
    pub noise_threshold: usize,
    /// Timestamped reports kept in the directory; older ones are deleted
    pub keep_reports: usize,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 3600,
            directory: PathBuf::from("data/reports"),
            noise_threshold: 50,
            keep_reports: 168,
        }
    }
}

/// Historical store bounds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HistoryConfig {
    pub retention_days: i64,
    pub max_samples_per_metric: usize,
    /// Where the history is saved between runs
    pub file: PathBuf,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            max_samples_per_metric: 10_000,
            file: PathBuf::from("data/history.json"),
        }
    }
}

/// Notification channels for automated responses
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NotificationConfig {
    pub rate_limit_per_minute: usize,
    pub webhook_url: Option<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 3,
            webhook_url: None,
        }
    }
}

/// An external producer run as a command printing a JSON producer report
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProducerConfig {
    pub name: String,
    pub command: Vec<String>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ReadError` if the file cannot be read,
    /// `ConfigError::TomlError` if it is not valid TOML for this schema and
    /// `ConfigError::ValidationError` if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every value is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut intervals = vec![
            ("monitoring.interval_seconds", self.monitoring.interval_seconds),
            (
                "monitoring.producer_timeout_seconds",
                self.monitoring.producer_timeout_seconds,
            ),
            (
                "monitoring.elevated_interval_seconds",
                self.monitoring.elevated_interval_seconds,
            ),
            ("analysis.interval_seconds", self.analysis.interval_seconds),
            ("reporting.interval_seconds", self.reporting.interval_seconds),
        ];
        intervals.extend(
            self.producers
                .iter()
                .filter_map(|producer| producer.timeout_seconds.map(|secs| ("producers.timeout_seconds", secs))),
        );
        for (name, value) in intervals {
            if value == 0 || value > MAX_INTERVAL_SECONDS {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be between 1 and {}, got {}",
                    name, MAX_INTERVAL_SECONDS, value
                )));
            }
        }
        if self.monitoring.elevation_minutes > MAX_ELEVATION_MINUTES {
            return Err(ConfigError::ValidationError(format!(
                "monitoring.elevation_minutes must be at most {}, got {}",
                MAX_ELEVATION_MINUTES, self.monitoring.elevation_minutes
            )));
        }

        let unit_ratios = [
            ("analysis.confidence_threshold", self.analysis.confidence_threshold),
            (
                "correlation.keyword_overlap_threshold",
                self.correlation.keyword_overlap_threshold,
            ),
            ("incidents.critical_threshold", self.incidents.critical_threshold),
            ("incidents.high_threshold", self.incidents.high_threshold),
        ];
        for (name, value) in unit_ratios {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be between 0 and 1, got {}",
                    name, value
                )));
            }
        }

        if !(self.analysis.anomaly_threshold.is_finite() && self.analysis.anomaly_threshold > 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "analysis.anomaly_threshold must be a positive number, got {}",
                self.analysis.anomaly_threshold
            )));
        }
        if !(self.analysis.horizon_hours > 0.0 && self.analysis.horizon_hours <= MAX_HORIZON_HOURS) {
            return Err(ConfigError::ValidationError(format!(
                "analysis.horizon_hours must be in (0, {}], got {}",
                MAX_HORIZON_HOURS, self.analysis.horizon_hours
            )));
        }
        if !(self.analysis.alert_count_threshold.is_finite() && self.analysis.alert_count_threshold >= 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "analysis.alert_count_threshold must be a non-negative number, got {}",
                self.analysis.alert_count_threshold
            )));
        }

        let periods = [
            ("analysis.lookback_days", self.analysis.lookback_days),
            ("history.retention_days", self.history.retention_days),
        ];
        for (name, value) in periods {
            if !(1..=MAX_PERIOD_DAYS).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be between 1 and {}, got {}",
                    name, MAX_PERIOD_DAYS, value
                )));
            }
        }
        if self.analysis.min_series_samples < 2 || self.analysis.min_count_samples < 2 {
            return Err(ConfigError::ValidationError(
                "models need at least 2 samples to fit a trend".to_string(),
            ));
        }
        if !(0..=MAX_CORRELATION_SECONDS).contains(&self.correlation.window_seconds)
            || !(1..=MAX_CORRELATION_SECONDS).contains(&self.correlation.retention_seconds)
        {
            return Err(ConfigError::ValidationError(format!(
                "correlation window must be within [0, {max}] seconds and retention within [1, {max}]",
                max = MAX_CORRELATION_SECONDS
            )));
        }
        if self.history.max_samples_per_metric == 0 {
            return Err(ConfigError::ValidationError(
                "history.max_samples_per_metric must be greater than zero".to_string(),
            ));
        }
        for rule in &self.analysis.thresholds {
            rule.validate().map_err(ConfigError::ValidationError)?;
        }
        for producer in &self.producers {
            if producer.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "producer name must not be empty".to_string(),
                ));
            }
            if producer.command.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "producer '{}' has no command",
                    producer.name
                )));
            }
        }

        Ok(())
    }
}

impl MonitoringConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn elevated_interval(&self) -> Duration {
        Duration::from_secs(self.elevated_interval_seconds)
    }

    pub fn producer_timeout(&self) -> Duration {
        Duration::from_secs(self.producer_timeout_seconds)
    }

    pub fn elevation(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.elevation_minutes.min(MAX_ELEVATION_MINUTES) as i64)
    }
}

impl AnalysisConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::days(self.lookback_days.clamp(1, MAX_PERIOD_DAYS))
    }
}

impl CorrelationConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_seconds.clamp(0, MAX_CORRELATION_SECONDS))
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retention_seconds.clamp(1, MAX_CORRELATION_SECONDS))
    }
}

impl HistoryConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days.clamp(1, MAX_PERIOD_DAYS))
    }
}

impl ReportingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.monitoring.interval_seconds, 30);
        assert_eq!(config.analysis.interval_seconds, 300);
        assert_eq!(config.reporting.interval_seconds, 3600);
        assert_eq!(config.analysis.confidence_threshold, 0.7);
        assert_eq!(config.analysis.anomaly_threshold, 2.5);
        assert_eq!(config.correlation.window_seconds, 300);
        assert_eq!(config.correlation.retention_seconds, 3600);
        assert_eq!(config.incidents.critical_threshold, 0.9);
        assert_eq!(config.incidents.high_threshold, 0.7);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [monitoring]
            interval_seconds = 15

            [[producers]]
            name = "security"
            command = ["/usr/local/bin/security-probe", "--json"]
            timeout_seconds = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.monitoring.interval_seconds, 15);
        assert_eq!(config.monitoring.producer_timeout_seconds, 10);
        assert_eq!(config.producers.len(), 1);
        assert_eq!(config.producers[0].timeout_seconds, Some(5));
        assert_eq!(config.analysis.thresholds.len(), 2);
    }

    #[test]
    fn test_custom_thresholds_replace_defaults() {
        let config = Config::from_toml_str(
            r#"
            [[analysis.thresholds]]
            metric = "disk_free_pct"
            direction = "below"
            warning = 15.0
            critical = 5.0
            "#,
        )
        .unwrap();
        assert_eq!(config.analysis.thresholds.len(), 1);
        assert_eq!(config.analysis.thresholds[0].metric, "disk_free_pct");
    }

    #[test]
    fn test_invalid_ratio_rejected() {
        let result = Config::from_toml_str(
            r#"
            [analysis]
            confidence_threshold = 1.5
            "#,
        );
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = Config::default();
        config.reporting.interval_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_out_of_range_horizon_rejected() {
        for horizon in ["1e18", "nan", "inf", "0.0", "-2.0"] {
            let result = Config::from_toml_str(&format!("[analysis]\nhorizon_hours = {}", horizon));
            assert!(
                matches!(result, Err(ConfigError::ValidationError(_))),
                "horizon_hours = {} accepted",
                horizon
            );
        }
        assert!(Config::from_toml_str("[analysis]\nhorizon_hours = 8760.0").is_ok());
    }

    #[test]
    fn test_non_finite_analysis_thresholds_rejected() {
        assert!(Config::from_toml_str("[analysis]\nanomaly_threshold = nan").is_err());
        assert!(Config::from_toml_str("[analysis]\nanomaly_threshold = inf").is_err());
        assert!(Config::from_toml_str("[analysis]\nalert_count_threshold = nan").is_err());
        assert!(Config::from_toml_str("[analysis]\nconfidence_threshold = nan").is_err());
    }

    #[test]
    fn test_periods_bounded() {
        let mut config = Config::default();
        config.history.retention_days = i64::MAX;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.analysis.lookback_days = MAX_PERIOD_DAYS + 1;
        assert!(config.validate().is_err());
        config.analysis.lookback_days = MAX_PERIOD_DAYS;
        assert!(config.validate().is_ok());

        let mut config = Config::default();
        config.monitoring.elevation_minutes = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.correlation.retention_seconds = i64::MAX;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.correlation.window_seconds = MAX_CORRELATION_SECONDS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_intervals_bounded() {
        let mut config = Config::default();
        config.analysis.interval_seconds = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.producers.push(ProducerConfig {
            name: "slow".to_string(),
            command: vec!["probe".to_string()],
            timeout_seconds: Some(MAX_INTERVAL_SECONDS + 1),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_helpers_never_overflow() {
        let mut config = Config::default();
        config.monitoring.elevation_minutes = u64::MAX;
        config.analysis.lookback_days = i64::MAX;
        config.history.retention_days = i64::MAX;
        config.correlation.window_seconds = i64::MIN;

        assert_eq!(
            config.monitoring.elevation(),
            chrono::Duration::minutes(MAX_ELEVATION_MINUTES as i64)
        );
        assert_eq!(config.analysis.lookback(), chrono::Duration::days(MAX_PERIOD_DAYS));
        assert_eq!(config.history.retention(), chrono::Duration::days(MAX_PERIOD_DAYS));
        assert_eq!(config.correlation.window(), chrono::Duration::zero());
    }

    #[test]
    fn test_producer_without_command_rejected() {
        let mut config = Config::default();
        config.producers.push(ProducerConfig {
            name: "empty".to_string(),
            command: Vec::new(),
            timeout_seconds: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml_is_toml_error() {
        let result = Config::from_toml_str("[monitoring\ninterval_seconds = ");
        assert!(matches!(result, Err(ConfigError::TomlError(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[reporting]\nnoise_threshold = 7").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.reporting.noise_threshold, 7);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let result = Config::from_file(Path::new("/nonexistent/watchtower.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError(_))));
    }
}
