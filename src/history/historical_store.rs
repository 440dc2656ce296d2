//! Historical store with per-metric rolling buffers
//!
//! Every metric reported by a producer is stored under `<producer>.<metric>`
//! in its own time-ordered buffer. Buffers are bounded by a retention period
//! and a sample count; reads return owned copies so the analysis loop never
//! observes a half-applied append from the monitoring loop. The whole store
//! can be saved to and merged back from a JSON file between runs.

use crate::error::PersistenceError;
use crate::events::{SignalSnapshot, Timestamp};
use crate::persistence::{read_json, write_json_atomic};
use chrono::Duration;
use log::debug;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

/// Suffix of the per-producer series counting raw alerts in each snapshot
pub const ALERT_COUNT_SUFFIX: &str = "alert_count";

/// Series recorded by the orchestrator with the total raw alerts per cycle
pub const ALERTS_TOTAL_METRIC: &str = "core.alerts_total";

/// One recorded value of a metric
pub type Sample = (Timestamp, f64);

#[derive(Debug, Default)]
struct StoreInner {
    series: BTreeMap<String, VecDeque<Sample>>,
}

/// Shared, cheaply cloneable store of metric history
///
/// Clones share the same underlying buffers.
#[derive(Debug, Clone)]
pub struct HistoricalStore {
    inner: Arc<RwLock<StoreInner>>,
    /// Samples older than this are ignored on read and dropped on compaction
    retention: Duration,
    /// Maximum number of samples kept per metric
    max_samples: usize,
}

impl HistoricalStore {
    /// Create an empty store
    ///
    /// # Arguments
    ///
    /// * `retention` - Maximum age of a stored sample
    /// * `max_samples` - Maximum number of samples per metric
    pub fn new(retention: Duration, max_samples: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner::default())),
            retention,
            max_samples: max_samples.max(1),
        }
    }

    /// Record every metric of a snapshot plus its alert count
    ///
    /// Degraded snapshots carry no data and are skipped.
    pub fn append(&self, snapshot: &SignalSnapshot) {
        if snapshot.is_degraded() {
            debug!(
                "Skipping degraded snapshot from '{}' for history",
                snapshot.producer_id
            );
            return;
        }

        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        for (metric, value) in &snapshot.metric_values {
            let key = format!("{}.{}", snapshot.producer_id, metric);
            self.insert(&mut inner, key, snapshot.timestamp, *value);
        }
        let key = format!("{}.{}", snapshot.producer_id, ALERT_COUNT_SUFFIX);
        self.insert(
            &mut inner,
            key,
            snapshot.timestamp,
            snapshot.raw_alerts.len() as f64,
        );
    }

    /// Record a single value for a core-generated series
    pub fn record(&self, metric: &str, timestamp: Timestamp, value: f64) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        self.insert(&mut inner, metric.to_string(), timestamp, value);
    }

    /// Samples of `metric` within `lookback` of the current time
    pub fn recent(&self, metric: &str, lookback: Duration) -> Vec<Sample> {
        self.recent_at(metric, lookback, chrono::Utc::now())
    }

    /// Samples of `metric` in `[now - lookback, now]`, oldest first
    ///
    /// The window is additionally clipped to the retention period.
    pub fn recent_at(&self, metric: &str, lookback: Duration, now: Timestamp) -> Vec<Sample> {
        let cutoff = now - lookback.min(self.retention);
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);

        let Some(buffer) = inner.series.get(metric) else {
            return Vec::new();
        };

        let start = buffer.partition_point(|(ts, _)| *ts < cutoff);
        buffer
            .range(start..)
            .take_while(|(ts, _)| *ts <= now)
            .copied()
            .collect()
    }

    /// Drop samples older than the retention period and empty series
    ///
    /// Returns the number of samples removed.
    pub fn compact(&self, now: Timestamp) -> usize {
        let cutoff = now - self.retention;
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        let mut removed = 0;
        for buffer in inner.series.values_mut() {
            while buffer.front().is_some_and(|(ts, _)| *ts < cutoff) {
                buffer.pop_front();
                removed += 1;
            }
        }
        inner.series.retain(|_, buffer| !buffer.is_empty());

        if removed > 0 {
            debug!("Compacted {} expired history samples", removed);
        }
        removed
    }

    /// Names of all metrics with at least one stored sample
    pub fn metrics(&self) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.series.keys().cloned().collect()
    }

    /// Number of samples stored for `metric`, including expired ones not yet compacted
    pub fn sample_count(&self, metric: &str) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.series.get(metric).map_or(0, VecDeque::len)
    }

    /// Write every stored series to `path`, returning the number of samples saved
    ///
    /// Missing parent directories are created.
    pub fn save(&self, path: &Path) -> Result<usize, PersistenceError> {
        let series: BTreeMap<String, Vec<Sample>> = {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            inner
                .series
                .iter()
                .map(|(metric, buffer)| (metric.clone(), buffer.iter().copied().collect()))
                .collect()
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        write_json_atomic(path, &series)?;

        let saved: usize = series.values().map(Vec::len).sum();
        debug!("Saved {} history samples to {}", saved, path.display());
        Ok(saved)
    }

    /// Merge series written by [`save`](Self::save) into this store
    ///
    /// Samples already outside the retention period at `now` are skipped and
    /// the per-metric bound still applies. A missing file loads nothing.
    /// Returns the number of samples read within retention.
    pub fn load(&self, path: &Path, now: Timestamp) -> Result<usize, PersistenceError> {
        if !path.exists() {
            return Ok(0);
        }
        let series: BTreeMap<String, Vec<Sample>> = read_json(path)?;
        let cutoff = now - self.retention;

        let mut loaded = 0;
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        for (metric, samples) in series {
            for (timestamp, value) in samples.into_iter().filter(|(ts, _)| *ts >= cutoff) {
                self.insert(&mut inner, metric.clone(), timestamp, value);
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    fn insert(&self, inner: &mut StoreInner, key: String, timestamp: Timestamp, value: f64) {
        if !value.is_finite() {
            debug!("Ignoring non-finite value for '{}'", key);
            return;
        }

        let buffer = inner.series.entry(key).or_default();
        if buffer.back().map_or(true, |(last, _)| *last <= timestamp) {
            buffer.push_back((timestamp, value));
        } else {
            // Out-of-order sample, keep the buffer sorted
            let index = buffer.partition_point(|(ts, _)| *ts <= timestamp);
            buffer.insert(index, (timestamp, value));
        }

        while buffer.len() > self.max_samples {
            buffer.pop_front();
        }
    }
}

impl Default for HistoricalStore {
    fn default() -> Self {
        Self::new(Duration::days(30), 10_000)
    }
}
