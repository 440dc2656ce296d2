use crate::analysis::model::{ModelKind, TrendModel};
use crate::events::{RawAlert, Severity, Timestamp};
use serde::Serialize;

/// Source name of alerts raised from anomalies
pub const ANOMALY_SOURCE: &str = "anomaly_detector";

/// A latest value that deviates strongly from its model's baseline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyRecord {
    pub metric: String,
    pub value: f64,
    pub baseline_mean: f64,
    pub baseline_stddev: f64,
    /// Distance from the mean in standard deviations
    pub deviation: f64,
    pub severity: Severity,
}

impl AnomalyRecord {
    pub fn to_raw_alert(&self, timestamp: Timestamp) -> RawAlert {
        RawAlert::new(
            ANOMALY_SOURCE,
            self.severity,
            format!(
                "Anomalous value for {}: {:.2} is {:.1} standard deviations from baseline {:.2}",
                self.metric, self.value, self.deviation, self.baseline_mean
            ),
            timestamp,
        )
    }
}

/// Z-score detector over the baselines of trained series models
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    threshold: f64,
}

impl AnomalyDetector {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// `|value - mean| / stddev`, treated as 0 when the baseline has no spread
    pub fn deviation(value: f64, mean: f64, stddev: f64) -> f64 {
        if stddev <= 0.0 || !stddev.is_finite() {
            0.0
        } else {
            (value - mean).abs() / stddev
        }
    }

    pub fn check(&self, model: &TrendModel) -> Option<AnomalyRecord> {
        if model.kind != ModelKind::Series || !model.is_usable() {
            return None;
        }
        let value = model.latest_value?;
        let deviation = Self::deviation(value, model.baseline_mean, model.baseline_stddev);
        if deviation <= self.threshold {
            return None;
        }

        let severity = if deviation > 2.0 * self.threshold {
            Severity::Critical
        } else {
            Severity::Warning
        };
        Some(AnomalyRecord {
            metric: model.metric.clone(),
            value,
            baseline_mean: model.baseline_mean,
            baseline_stddev: model.baseline_stddev,
            deviation,
            severity,
        })
    }

    pub fn detect<'a>(&self, models: impl IntoIterator<Item = &'a TrendModel>) -> Vec<AnomalyRecord> {
        models.into_iter().filter_map(|model| self.check(model)).collect()
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(2.5)
    }
}
