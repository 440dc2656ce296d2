//! Statistical analysis over the historical store
//!
//! Models are deliberately simple: a linear trend, a baseline mean and
//! standard deviation, and an hour-of-day profile. Predictions and anomalies
//! are emitted as raw alerts so they flow through correlation like any other
//! signal.

/// Per-metric trend model training and the model registry
pub mod model;

/// Threshold-breach prediction from trained models
pub mod predictor;

/// Z-score anomaly detection against model baselines
pub mod anomaly;

pub use anomaly::{AnomalyDetector, AnomalyRecord};
pub use model::{ModelKind, ModelRegistry, RefreshSummary, TrainingSettings, TrendDirection, TrendModel};
pub use predictor::{Prediction, Predictor, ThresholdDirection, ThresholdRule};
