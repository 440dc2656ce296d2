use crate::config::AnalysisConfig;
use crate::error::ModelError;
use crate::events::Timestamp;
use crate::history::{HistoricalStore, Sample, ALERTS_TOTAL_METRIC, ALERT_COUNT_SUFFIX};
use chrono::{Duration, Timelike};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;

/// Slope magnitude (per hour) below which a trend counts as flat
pub const STABLE_SLOPE: f64 = 0.01;

/// Window of the trailing moving average
const MOVING_AVERAGE_WINDOW: usize = 3;

/// What a model's samples represent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Continuous measurement such as a health score or latency
    Series,
    /// Number of alerts observed per cycle
    Count,
}

impl ModelKind {
    /// Alert count series train count models, everything else a series model
    pub fn for_metric(metric: &str) -> Self {
        let is_count = metric == ALERTS_TOTAL_METRIC
            || metric
                .rsplit_once('.')
                .is_some_and(|(_, suffix)| suffix == ALERT_COUNT_SUFFIX);
        if is_count {
            ModelKind::Count
        } else {
            ModelKind::Series
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

/// Knobs for training and retraining
#[derive(Debug, Clone)]
pub struct TrainingSettings {
    pub min_series_samples: usize,
    pub min_count_samples: usize,
    /// New samples since training that make a model stale
    pub retrain_after_samples: usize,
    pub lookback: Duration,
}

impl TrainingSettings {
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self {
            min_series_samples: config.min_series_samples,
            min_count_samples: config.min_count_samples,
            retrain_after_samples: config.retrain_after_samples.max(1),
            lookback: config.lookback(),
        }
    }

    pub fn min_samples(&self, kind: ModelKind) -> usize {
        match kind {
            ModelKind::Series => self.min_series_samples,
            ModelKind::Count => self.min_count_samples,
        }
    }
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self::from_config(&AnalysisConfig::default())
    }
}

/// Per-metric statistical summary used for prediction and anomaly detection
#[derive(Debug, Clone, Serialize)]
pub struct TrendModel {
    pub metric: String,
    pub kind: ModelKind,
    pub baseline_mean: f64,
    pub baseline_stddev: f64,
    /// Change per hour from the least-squares fit
    pub slope: f64,
    pub intercept: f64,
    pub direction: TrendDirection,
    /// Mean of the latest values
    pub moving_average: Option<f64>,
    /// Mean value per hour of day (0-23)
    pub hourly_profile: BTreeMap<u32, f64>,
    pub latest_value: Option<f64>,
    pub latest_timestamp: Option<Timestamp>,
    pub sample_count: usize,
    /// Heuristic gate for emitting predictions, not a statistical guarantee
    pub accuracy: f64,
    pub insufficient_data: bool,
    pub trained_at: Timestamp,
}

impl TrendModel {
    /// Train a model from time-ordered samples
    ///
    /// Fewer samples than the kind's minimum yield a model flagged
    /// `insufficient_data` with zero accuracy; such a model is never used.
    pub fn train(
        metric: &str,
        kind: ModelKind,
        samples: &[Sample],
        settings: &TrainingSettings,
        now: Timestamp,
    ) -> Self {
        let n = samples.len();
        let latest = samples.last();
        let mut model = Self {
            metric: metric.to_string(),
            kind,
            baseline_mean: 0.0,
            baseline_stddev: 0.0,
            slope: 0.0,
            intercept: 0.0,
            direction: TrendDirection::Stable,
            moving_average: None,
            hourly_profile: BTreeMap::new(),
            latest_value: latest.map(|(_, v)| *v),
            latest_timestamp: latest.map(|(ts, _)| *ts),
            sample_count: n,
            accuracy: 0.0,
            insufficient_data: true,
            trained_at: now,
        };

        if n < settings.min_samples(kind) || n == 0 {
            return model;
        }

        let values: Vec<f64> = samples.iter().map(|(_, v)| *v).collect();
        let mean = values.iter().sum::<f64>() / n as f64;
        let variance = if n > 1 {
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64
        } else {
            0.0
        };

        let (slope, intercept) = linear_fit(samples);
        let window = &values[n.saturating_sub(MOVING_AVERAGE_WINDOW)..];

        model.baseline_mean = mean;
        model.baseline_stddev = variance.sqrt();
        model.slope = slope;
        model.intercept = intercept;
        model.direction = if slope.abs() <= STABLE_SLOPE {
            TrendDirection::Stable
        } else if slope > 0.0 {
            TrendDirection::Increasing
        } else {
            TrendDirection::Decreasing
        };
        model.moving_average = Some(window.iter().sum::<f64>() / window.len() as f64);
        model.hourly_profile = hourly_profile(samples);
        model.accuracy = match kind {
            ModelKind::Series => (0.7 + n as f64 / 100.0).min(0.95),
            ModelKind::Count => (0.6 + n as f64 / 50.0).min(0.9),
        };
        model.insufficient_data = false;
        model
    }

    pub fn is_usable(&self) -> bool {
        !self.insufficient_data && self.latest_value.is_some()
    }

    /// Fail with `InsufficientData` unless the model may be used
    pub fn ensure_usable(&self, settings: &TrainingSettings) -> Result<(), ModelError> {
        if self.is_usable() {
            Ok(())
        } else {
            Err(ModelError::InsufficientData {
                metric: self.metric.clone(),
                needed: settings.min_samples(self.kind),
                have: self.sample_count,
            })
        }
    }

    pub fn has_strong_trend(&self) -> bool {
        self.slope.abs() > STABLE_SLOPE
    }

    /// Confidence factor contributed by the strength of the trend
    pub fn trend_strength(&self) -> f64 {
        match (self.kind, self.has_strong_trend()) {
            (ModelKind::Series, true) => 0.9,
            (ModelKind::Series, false) => 0.6,
            (ModelKind::Count, true) => 0.85,
            (ModelKind::Count, false) => 0.4,
        }
    }

    /// Mean value observed at `hour` of day, if any sample fell in that hour
    pub fn hourly_mean(&self, hour: u32) -> Option<f64> {
        self.hourly_profile.get(&hour).copied()
    }

    /// Number of samples newer than the model's latest training sample
    fn new_samples_since_training(&self, samples: &[Sample]) -> usize {
        match self.latest_timestamp {
            Some(latest) => samples.iter().filter(|(ts, _)| *ts > latest).count(),
            None => samples.len(),
        }
    }
}

/// Least-squares slope (per hour) and intercept over hours since the first sample
fn linear_fit(samples: &[Sample]) -> (f64, f64) {
    let Some((origin, _)) = samples.first() else {
        return (0.0, 0.0);
    };

    let points: Vec<(f64, f64)> = samples
        .iter()
        .map(|(ts, v)| ((*ts - *origin).num_milliseconds() as f64 / 3_600_000.0, *v))
        .collect();
    let n = points.len() as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / n;

    let sxx: f64 = points.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
    let sxy: f64 = points
        .iter()
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();

    if sxx == 0.0 {
        return (0.0, mean_y);
    }
    let slope = sxy / sxx;
    (slope, mean_y - slope * mean_x)
}

fn hourly_profile(samples: &[Sample]) -> BTreeMap<u32, f64> {
    let mut buckets: BTreeMap<u32, (f64, usize)> = BTreeMap::new();
    for (ts, value) in samples {
        let bucket = buckets.entry(ts.hour()).or_insert((0.0, 0));
        bucket.0 += value;
        bucket.1 += 1;
    }
    buckets
        .into_iter()
        .map(|(hour, (sum, count))| (hour, sum / count as f64))
        .collect()
}

/// Outcome of one registry refresh
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub trained: usize,
    pub insufficient: usize,
    pub removed: usize,
}

/// One trend model per metric, retrained when stale
#[derive(Debug, Default)]
pub struct ModelRegistry {
    settings: TrainingSettings,
    models: BTreeMap<String, TrendModel>,
}

impl ModelRegistry {
    pub fn new(settings: TrainingSettings) -> Self {
        Self {
            settings,
            models: BTreeMap::new(),
        }
    }

    pub fn settings(&self) -> &TrainingSettings {
        &self.settings
    }

    /// Retrain every metric in the store whose model is missing or stale
    ///
    /// A model is stale once `retrain_after_samples` samples arrived after
    /// it was trained; an insufficient-data model is retried on any new
    /// sample. `force` retrains every metric. Models of metrics no longer in
    /// the store are dropped.
    pub fn refresh(&mut self, store: &HistoricalStore, now: Timestamp, force: bool) -> RefreshSummary {
        let mut summary = RefreshSummary::default();
        let metrics = store.metrics();

        let before = self.models.len();
        self.models.retain(|metric, _| metrics.contains(metric));
        summary.removed = before - self.models.len();

        for metric in metrics {
            let samples = store.recent_at(&metric, self.settings.lookback, now);

            let stale = match self.models.get(&metric) {
                None => true,
                Some(_) if force => true,
                Some(model) => {
                    let fresh = model.new_samples_since_training(&samples);
                    fresh >= self.settings.retrain_after_samples
                        || (model.insufficient_data && fresh > 0)
                }
            };
            if !stale {
                continue;
            }

            let kind = ModelKind::for_metric(&metric);
            let model = TrendModel::train(&metric, kind, &samples, &self.settings, now);
            match model.ensure_usable(&self.settings) {
                Ok(()) => debug!(
                    "Trained {:?} model for '{}': slope={:.4}/h mean={:.2} accuracy={:.2}",
                    kind, metric, model.slope, model.baseline_mean, model.accuracy
                ),
                Err(e) => {
                    debug!("{}", e);
                    summary.insufficient += 1;
                }
            }
            summary.trained += 1;
            self.models.insert(metric, model);
        }

        if summary.insufficient > 0 {
            warn!(
                "{} of {} retrained models have insufficient data and will not be used",
                summary.insufficient, summary.trained
            );
        }
        if summary.trained > 0 {
            info!(
                "Model refresh: {} trained, {} total, {} removed",
                summary.trained,
                self.models.len(),
                summary.removed
            );
        }
        summary
    }

    pub fn get(&self, metric: &str) -> Option<&TrendModel> {
        self.models.get(metric)
    }

    /// All models ordered by metric name
    pub fn models(&self) -> impl Iterator<Item = &TrendModel> {
        self.models.values()
    }

    pub fn usable_count(&self) -> usize {
        self.models.values().filter(|m| m.is_usable()).count()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    fn settings() -> TrainingSettings {
        TrainingSettings::default()
    }

    #[test]
    fn test_kind_for_metric() {
        assert_eq!(ModelKind::for_metric("system.alert_count"), ModelKind::Count);
        assert_eq!(ModelKind::for_metric("core.alerts_total"), ModelKind::Count);
        assert_eq!(ModelKind::for_metric("system.health_score"), ModelKind::Series);
        assert_eq!(ModelKind::for_metric("alert_count"), ModelKind::Series);
    }

    #[test]
    fn test_declining_health_trend() {
        let samples = hourly(&[100.0, 100.0, 99.0, 98.0, 97.0, 96.0]);
        let now = samples[5].0;
        let model = TrendModel::train("system.health_score", ModelKind::Series, &samples, &settings(), now);

        assert!(model.is_usable());
        assert!((model.slope - (-15.0 / 17.5)).abs() < 1e-9);
        assert_eq!(model.direction, TrendDirection::Decreasing);
        assert!((model.baseline_mean - 98.333_333).abs() < 1e-4);
        assert!((model.moving_average.unwrap() - 97.0).abs() < 1e-9);
        assert_eq!(model.latest_value, Some(96.0));
        assert!((model.accuracy - 0.76).abs() < 1e-9);
        assert!((model.trend_strength() - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_sample_standard_deviation() {
        let samples = hourly(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        let model = TrendModel::train("m", ModelKind::Series, &samples, &settings(), base_time());
        // Sum of squared deviations is 32 over 7 degrees of freedom
        assert!((model.baseline_stddev - (32.0f64 / 7.0).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_flat_series_is_stable() {
        let samples = hourly(&[50.0; 6]);
        let model = TrendModel::train("m", ModelKind::Series, &samples, &settings(), base_time());
        assert_eq!(model.direction, TrendDirection::Stable);
        assert_eq!(model.baseline_stddev, 0.0);
        assert!((model.trend_strength() - 0.6).abs() < f64::EPSILON);
    }

    #[test]
    fn test_insufficient_series_data() {
        let samples = hourly(&[1.0, 2.0, 3.0, 4.0]);
        let model = TrendModel::train("m", ModelKind::Series, &samples, &settings(), base_time());
        assert!(model.insufficient_data);
        assert_eq!(model.accuracy, 0.0);
        assert_eq!(
            model.ensure_usable(&settings()),
            Err(ModelError::InsufficientData {
                metric: "m".to_string(),
                needed: 5,
                have: 4
            })
        );
    }

    #[test]
    fn test_count_model_needs_three_samples() {
        let two = TrendModel::train("a.alert_count", ModelKind::Count, &hourly(&[1.0, 2.0]), &settings(), base_time());
        assert!(two.insufficient_data);

        let three = TrendModel::train("a.alert_count", ModelKind::Count, &hourly(&[1.0, 2.0, 3.0]), &settings(), base_time());
        assert!(!three.insufficient_data);
        assert!((three.accuracy - 0.66).abs() < 1e-9);
        assert!((three.trend_strength() - 0.85).abs() < f64::EPSILON);
    }

    #[test]
    fn test_accuracy_is_capped() {
        let values: Vec<f64> = (0..200).map(|i| i as f64).collect();
        let series = TrendModel::train("m", ModelKind::Series, &hourly(&values), &settings(), base_time());
        let count = TrendModel::train("m", ModelKind::Count, &hourly(&values), &settings(), base_time());
        assert_eq!(series.accuracy, 0.95);
        assert_eq!(count.accuracy, 0.9);
    }

    #[test]
    fn test_hourly_profile_groups_by_hour() {
        let samples = vec![
            (base_time(), 2.0),
            (base_time() + Duration::minutes(30), 4.0),
            (base_time() + Duration::hours(1), 10.0),
        ];
        let model = TrendModel::train("x.alert_count", ModelKind::Count, &samples, &settings(), base_time());
        assert_eq!(model.hourly_mean(12), Some(3.0));
        assert_eq!(model.hourly_mean(13), Some(10.0));
        assert_eq!(model.hourly_mean(3), None);
    }

    #[test]
    fn test_registry_trains_and_retrains_when_stale() {
        let store = HistoricalStore::default();
        let mut registry = ModelRegistry::new(TrainingSettings {
            retrain_after_samples: 3,
            ..settings()
        });
        let samples = hourly(&[10.0, 11.0, 12.0, 13.0, 14.0]);
        for (ts, v) in &samples {
            store.record("perf.latency_ms", *ts, *v);
        }
        let now = samples[4].0;

        let summary = registry.refresh(&store, now, false);
        assert_eq!(summary.trained, 1);
        assert_eq!(registry.usable_count(), 1);

        // Nothing new: model stays
        assert_eq!(registry.refresh(&store, now, false).trained, 0);

        // Two new samples are not enough, three are
        store.record("perf.latency_ms", now + Duration::hours(1), 15.0);
        store.record("perf.latency_ms", now + Duration::hours(2), 16.0);
        assert_eq!(registry.refresh(&store, now + Duration::hours(2), false).trained, 0);
        store.record("perf.latency_ms", now + Duration::hours(3), 17.0);
        assert_eq!(registry.refresh(&store, now + Duration::hours(3), false).trained, 1);
        assert_eq!(registry.get("perf.latency_ms").unwrap().sample_count, 8);

        // Forced retraining ignores staleness
        assert_eq!(registry.refresh(&store, now + Duration::hours(3), true).trained, 1);
    }

    #[test]
    fn test_registry_retries_insufficient_models_on_new_data() {
        let store = HistoricalStore::default();
        let mut registry = ModelRegistry::new(settings());
        store.record("m", base_time(), 1.0);

        let summary = registry.refresh(&store, base_time(), false);
        assert_eq!(summary.insufficient, 1);
        assert_eq!(registry.usable_count(), 0);

        store.record("m", base_time() + Duration::minutes(1), 2.0);
        let summary = registry.refresh(&store, base_time() + Duration::minutes(1), false);
        assert_eq!(summary.trained, 1);
        assert_eq!(registry.get("m").unwrap().sample_count, 2);
    }

    #[test]
    fn test_registry_drops_models_for_vanished_metrics() {
        let store = HistoricalStore::new(Duration::hours(1), 100);
        let mut registry = ModelRegistry::new(settings());
        store.record("m", base_time(), 1.0);
        registry.refresh(&store, base_time(), false);
        assert_eq!(registry.len(), 1);

        store.compact(base_time() + Duration::hours(2));
        let summary = registry.refresh(&store, base_time() + Duration::hours(2), false);
        assert_eq!(summary.removed, 1);
        assert!(registry.is_empty());
    }
}

#[cfg(test)]
mod property_tests {
    use super::test_support::*;
    use super::*;
    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn prop_too_few_samples_always_insufficient(values: Vec<u8>, series: bool) -> bool {
        let settings = TrainingSettings::default();
        let kind = if series { ModelKind::Series } else { ModelKind::Count };
        let min = settings.min_samples(kind);
        let values: Vec<f64> = values.into_iter().take(min - 1).map(f64::from).collect();

        let model = TrendModel::train("m", kind, &hourly(&values), &settings, base_time());
        model.insufficient_data && model.accuracy == 0.0 && model.ensure_usable(&settings).is_err()
    }

    #[quickcheck]
    fn prop_accuracy_within_bounds(values: Vec<u8>) -> bool {
        let values: Vec<f64> = values.into_iter().map(f64::from).collect();
        let model = TrendModel::train("m", ModelKind::Series, &hourly(&values), &TrainingSettings::default(), base_time());
        (0.0..=0.95).contains(&model.accuracy)
    }
}
