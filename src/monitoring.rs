//! Self-monitoring metrics for the watchtower core
//!
//! Tracks the health of the core itself: resident memory, how long each
//! scheduling loop iteration takes and how many ticks were skipped because
//! the previous iteration was still running.

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Maximum number of latency samples kept per loop
const MAX_LATENCY_SAMPLES: usize = 100;

/// Self-monitoring snapshot for the watchtower process
#[derive(Debug, Clone, Serialize)]
pub struct SelfMonitoringMetrics {
    /// Current memory usage in bytes
    pub memory_usage_bytes: u64,
    /// Average iteration latency per loop in milliseconds
    pub avg_cycle_latency_ms: BTreeMap<String, f64>,
    /// Ticks skipped per loop because an iteration was still running
    pub skipped_ticks: BTreeMap<String, u64>,
    /// Timestamp when these metrics were collected
    pub timestamp: DateTime<Utc>,
}

impl SelfMonitoringMetrics {
    /// Worst average latency across all loops
    pub fn max_avg_latency_ms(&self) -> f64 {
        self.avg_cycle_latency_ms
            .values()
            .copied()
            .fold(0.0, f64::max)
    }
}

/// Tracks loop latency and skipped ticks; shared between loops via `Arc`
#[derive(Debug, Default)]
pub struct SelfMonitoringCollector {
    latencies: Mutex<HashMap<String, VecDeque<Duration>>>,
    skipped: Mutex<HashMap<String, u64>>,
}

impl SelfMonitoringCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record how long one iteration of `loop_name` took
    pub fn record_cycle_latency(&self, loop_name: &str, duration: Duration) {
        debug!("Recording {} cycle latency: {:?}", loop_name, duration);

        let mut latencies = self.latencies.lock().unwrap_or_else(PoisonError::into_inner);
        let samples = latencies.entry(loop_name.to_string()).or_default();
        samples.push_back(duration);

        while samples.len() > MAX_LATENCY_SAMPLES {
            samples.pop_front();
        }
    }

    /// Record that a tick of `loop_name` fired while the previous iteration was busy
    pub fn record_skipped_tick(&self, loop_name: &str) {
        let mut skipped = self.skipped.lock().unwrap_or_else(PoisonError::into_inner);
        *skipped.entry(loop_name.to_string()).or_insert(0) += 1;
    }

    /// Number of skipped ticks recorded for a loop
    pub fn skipped_ticks(&self, loop_name: &str) -> u64 {
        let skipped = self.skipped.lock().unwrap_or_else(PoisonError::into_inner);
        skipped.get(loop_name).copied().unwrap_or(0)
    }

    /// Collect current self-monitoring metrics
    pub fn collect_metrics(&self) -> SelfMonitoringMetrics {
        let avg_cycle_latency_ms = {
            let latencies = self.latencies.lock().unwrap_or_else(PoisonError::into_inner);
            latencies
                .iter()
                .filter(|(_, samples)| !samples.is_empty())
                .map(|(name, samples)| {
                    let total_ms: f64 = samples.iter().map(|d| d.as_secs_f64() * 1000.0).sum();
                    (name.clone(), total_ms / samples.len() as f64)
                })
                .collect()
        };

        let skipped_ticks = {
            let skipped = self.skipped.lock().unwrap_or_else(PoisonError::into_inner);
            skipped.iter().map(|(k, v)| (k.clone(), *v)).collect()
        };

        let metrics = SelfMonitoringMetrics {
            memory_usage_bytes: current_memory_usage(),
            avg_cycle_latency_ms,
            skipped_ticks,
            timestamp: Utc::now(),
        };

        debug!(
            "Self-monitoring metrics: memory={}MB, max_cycle_latency={:.1}ms",
            metrics.memory_usage_bytes / 1024 / 1024,
            metrics.max_avg_latency_ms()
        );

        metrics
    }

    /// Log a one-line summary, warning about skipped ticks
    pub fn log_summary(&self) {
        let metrics = self.collect_metrics();
        info!(
            "Self-monitoring: memory={}MB, cycle latency {:?}",
            metrics.memory_usage_bytes / 1024 / 1024,
            metrics.avg_cycle_latency_ms
        );
        for (loop_name, count) in &metrics.skipped_ticks {
            if *count > 0 {
                warn!(
                    "{} loop skipped {} tick(s) because an iteration overran its period",
                    loop_name, count
                );
            }
        }
    }
}

/// Measures one loop iteration; the latency is recorded by `finish`
pub struct CycleTimer {
    start_time: Instant,
    loop_name: &'static str,
    collector: Arc<SelfMonitoringCollector>,
}

impl CycleTimer {
    pub fn start(loop_name: &'static str, collector: Arc<SelfMonitoringCollector>) -> Self {
        Self {
            start_time: Instant::now(),
            loop_name,
            collector,
        }
    }

    /// Finish timing and record the latency
    pub fn finish(self) -> Duration {
        let duration = self.start_time.elapsed();
        self.collector
            .record_cycle_latency(self.loop_name, duration);
        duration
    }
}

/// Resident memory of the current process in bytes, 0 when unknown
pub fn current_memory_usage() -> u64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmRSS:") {
                    if let Some(kb) = rest
                        .split_whitespace()
                        .next()
                        .and_then(|kb_str| kb_str.parse::<u64>().ok())
                    {
                        return kb * 1024;
                    }
                }
            }
        }
    }

    #[cfg(unix)]
    {
        // Fallback: peak usage from rusage
        // SAFETY: getrusage only writes into the zeroed struct we pass in.
        unsafe {
            let mut usage: libc::rusage = std::mem::zeroed();
            if libc::getrusage(libc::RUSAGE_SELF, &mut usage) == 0 {
                // ru_maxrss is in KB on Linux, bytes on macOS
                #[cfg(target_os = "macos")]
                return usage.ru_maxrss as u64;

                #[cfg(not(target_os = "macos"))]
                return (usage.ru_maxrss as u64) * 1024;
            }
        }
    }

    0
}

/// One-minute load average, if the platform exposes it
pub fn load_average() -> Option<f64> {
    #[cfg(unix)]
    {
        let mut loads = [0.0f64; 3];
        // SAFETY: the buffer holds the 3 samples getloadavg may write.
        let written = unsafe { libc::getloadavg(loads.as_mut_ptr(), 3) };
        if written >= 1 {
            return Some(loads[0]);
        }
    }

    None
}
