use crate::collectors::{MonitoringProducer, ProducerFuture};
use crate::events::{ProducerReport, RawAlert, Severity};
use crate::monitoring::{current_memory_usage, load_average, SelfMonitoringCollector};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Producer id used for the watchtower's own health signals
pub const SELF_HEALTH_PRODUCER: &str = "watchtower";

/// Reports the resource usage of the watchtower process itself
///
/// Metrics: `memory_rss_mb`, `load_average_1m` (when available) and
/// `cycle_latency_ms`, the worst average loop iteration latency. A warning
/// alert is raised when resident memory exceeds the configured limit.
pub struct SelfHealthProducer {
    monitor: Arc<SelfMonitoringCollector>,
    memory_warning_mb: u64,
}

impl SelfHealthProducer {
    pub fn new(monitor: Arc<SelfMonitoringCollector>, memory_warning_mb: u64) -> Self {
        Self {
            monitor,
            memory_warning_mb,
        }
    }

    fn build_report(&self, memory_bytes: u64, load: Option<f64>) -> ProducerReport {
        let memory_mb = memory_bytes as f64 / 1024.0 / 1024.0;
        let mut metrics = BTreeMap::new();
        metrics.insert("memory_rss_mb".to_string(), memory_mb);
        if let Some(load) = load {
            metrics.insert("load_average_1m".to_string(), load);
        }
        metrics.insert(
            "cycle_latency_ms".to_string(),
            self.monitor.collect_metrics().max_avg_latency_ms(),
        );

        let mut alerts = Vec::new();
        if memory_mb > self.memory_warning_mb as f64 {
            alerts.push(RawAlert::new(
                SELF_HEALTH_PRODUCER,
                Severity::Warning,
                format!(
                    "Watchtower memory usage high: {:.0}MB exceeds {}MB",
                    memory_mb, self.memory_warning_mb
                ),
                Utc::now(),
            ));
        }

        ProducerReport { alerts, metrics }
    }
}

impl MonitoringProducer for SelfHealthProducer {
    fn id(&self) -> &str {
        SELF_HEALTH_PRODUCER
    }

    fn current_state(&self) -> ProducerFuture<'_> {
        let report = self.build_report(current_memory_usage(), load_average());
        Box::pin(async move { Ok(report) })
    }
}
