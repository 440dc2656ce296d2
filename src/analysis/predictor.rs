use crate::analysis::model::{ModelKind, TrainingSettings, TrendModel};
use crate::config::AnalysisConfig;
use crate::events::{RawAlert, Severity, Timestamp};
use chrono::{Duration, Timelike};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Source name of alerts raised from predictions
pub const PREDICTOR_SOURCE: &str = "predictor";

/// Which side of a threshold is dangerous
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdDirection {
    /// Values below the bound are dangerous (health scores, free space)
    Below,
    /// Values above the bound are dangerous (latency, error rates)
    Above,
}

/// Danger threshold for a metric family
///
/// A rule for `health_score` applies to `health_score` and to every
/// producer-qualified key ending in `.health_score`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub metric: String,
    pub direction: ThresholdDirection,
    pub warning: f64,
    pub critical: f64,
}

impl ThresholdRule {
    pub fn new(metric: impl Into<String>, direction: ThresholdDirection, warning: f64, critical: f64) -> Self {
        Self {
            metric: metric.into(),
            direction,
            warning,
            critical,
        }
    }

    pub fn matches(&self, metric: &str) -> bool {
        metric == self.metric
            || metric
                .strip_suffix(self.metric.as_str())
                .is_some_and(|prefix| prefix.ends_with('.'))
    }

    /// Whether `value` is on the dangerous side of `bound`
    fn crosses(&self, value: f64, bound: f64) -> bool {
        match self.direction {
            ThresholdDirection::Below => value < bound,
            ThresholdDirection::Above => value > bound,
        }
    }

    /// Severity for a projected value, `None` when it stays safe
    pub fn classify(&self, value: f64) -> Option<Severity> {
        if self.crosses(value, self.critical) {
            Some(Severity::Critical)
        } else if self.crosses(value, self.warning) {
            Some(Severity::Warning)
        } else {
            None
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.metric.trim().is_empty() {
            return Err("threshold metric must not be empty".to_string());
        }
        if !self.warning.is_finite() || !self.critical.is_finite() {
            return Err(format!("threshold for '{}' must be finite", self.metric));
        }
        let ordered = match self.direction {
            ThresholdDirection::Below => self.critical <= self.warning,
            ThresholdDirection::Above => self.critical >= self.warning,
        };
        if !ordered {
            return Err(format!(
                "critical bound for '{}' must lie beyond the warning bound",
                self.metric
            ));
        }
        Ok(())
    }
}

impl fmt::Display for ThresholdRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.direction {
            ThresholdDirection::Below => "<",
            ThresholdDirection::Above => ">",
        };
        write!(f, "{} {} {}", self.metric, op, self.warning)
    }
}

/// Confidence-scored forecast of a threshold breach
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub metric: String,
    pub current_value: f64,
    pub predicted_value: f64,
    pub confidence: f64,
    pub horizon_hours: f64,
    pub severity: Severity,
    /// Human-readable description of the breached threshold
    pub threshold: String,
}

impl Prediction {
    pub fn to_raw_alert(&self, timestamp: Timestamp) -> RawAlert {
        RawAlert::new(
            PREDICTOR_SOURCE,
            self.severity,
            format!(
                "Predicted threshold breach for {} ({}): {:.1} expected in {}h, currently {:.1} (confidence {:.0}%)",
                self.metric,
                self.threshold,
                self.predicted_value,
                self.horizon_hours,
                self.current_value,
                self.confidence * 100.0
            ),
            timestamp,
        )
    }
}

/// Projects trained models forward and reports likely threshold breaches
#[derive(Debug, Clone)]
pub struct Predictor {
    rules: Vec<ThresholdRule>,
    horizon_hours: f64,
    confidence_threshold: f64,
    alert_count_threshold: f64,
    settings: TrainingSettings,
}

impl Predictor {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            rules: config.thresholds.clone(),
            horizon_hours: config.horizon_hours,
            confidence_threshold: config.confidence_threshold,
            alert_count_threshold: config.alert_count_threshold,
            settings: TrainingSettings::from_config(config),
        }
    }

    /// Predictions for every model that clears both the threshold and confidence gates
    pub fn predict<'a>(&self, models: impl IntoIterator<Item = &'a TrendModel>, now: Timestamp) -> Vec<Prediction> {
        models
            .into_iter()
            .filter_map(|model| self.predict_model(model, now))
            .collect()
    }

    /// Forecast a single model, `None` when nothing should be reported
    pub fn predict_model(&self, model: &TrendModel, now: Timestamp) -> Option<Prediction> {
        if let Err(e) = model.ensure_usable(&self.settings) {
            debug!("Skipping prediction: {}", e);
            return None;
        }
        let current = model.latest_value?;

        let (predicted, severity, threshold) = match model.kind {
            ModelKind::Series => {
                let rule = self.rules.iter().find(|rule| rule.matches(&model.metric))?;
                let predicted = current + model.slope * self.horizon_hours;
                let severity = rule.classify(predicted)?;
                (predicted, severity, rule.to_string())
            }
            ModelKind::Count => {
                let target = Duration::try_seconds((self.horizon_hours * 3600.0) as i64)
                    .and_then(|horizon| now.checked_add_signed(horizon))?;
                let seasonal = model
                    .hourly_mean(target.hour())
                    .unwrap_or(model.baseline_mean);
                let predicted = (seasonal + model.slope * self.horizon_hours).max(0.0);
                if predicted <= self.alert_count_threshold {
                    debug!(
                        "Predicted alert count {:.1} for '{}' within threshold",
                        predicted, model.metric
                    );
                    return None;
                }
                let severity = if predicted > 2.0 * self.alert_count_threshold {
                    Severity::Critical
                } else {
                    Severity::Warning
                };
                (predicted, severity, format!("alert count > {}", self.alert_count_threshold))
            }
        };

        let confidence = model.accuracy.min(model.trend_strength());
        if confidence <= self.confidence_threshold {
            debug!(
                "Dropping low-confidence prediction for '{}': {:.2} <= {:.2}",
                model.metric, confidence, self.confidence_threshold
            );
            return None;
        }

        Some(Prediction {
            metric: model.metric.clone(),
            current_value: current,
            predicted_value: predicted,
            confidence,
            horizon_hours: self.horizon_hours,
            severity,
            threshold,
        })
    }
}
