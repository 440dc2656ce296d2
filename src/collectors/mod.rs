//! Signal collection from monitoring producers
//!
//! Producers are registered explicitly at construction time. Each collection
//! cycle polls every producer concurrently with a bounded timeout; a failing
//! or hanging producer yields a degraded snapshot instead of aborting the
//! cycle.

/// Producer that runs an external command emitting a JSON report
pub mod command_producer;

/// Producer reporting the health of the watchtower process itself
pub mod self_health;

pub use command_producer::CommandProducer;
pub use self_health::SelfHealthProducer;

use crate::error::ProducerError;
use crate::events::{ProducerReport, SignalSnapshot};
use chrono::Utc;
use log::{debug, error, warn};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Boxed future returned by [`MonitoringProducer::current_state`]
pub type ProducerFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ProducerReport, ProducerError>> + Send + 'a>>;

/// A source of health, performance or security signals
pub trait MonitoringProducer: Send + Sync {
    /// Stable identifier used as the snapshot's producer id
    fn id(&self) -> &str;

    /// Return the producer's current alerts and metric readings
    fn current_state(&self) -> ProducerFuture<'_>;
}

struct RegisteredProducer {
    producer: Arc<dyn MonitoringProducer>,
    timeout: Duration,
}

/// Polls every registered producer once per monitoring cycle
pub struct SignalCollector {
    producers: Vec<RegisteredProducer>,
    default_timeout: Duration,
}

impl SignalCollector {
    /// Create a collector with no producers
    ///
    /// # Arguments
    ///
    /// * `default_timeout` - Upper bound for a single producer call
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            producers: Vec::new(),
            default_timeout,
        }
    }

    /// Register a producer using the default timeout
    pub fn register(&mut self, producer: Arc<dyn MonitoringProducer>) {
        let timeout = self.default_timeout;
        self.register_with_timeout(producer, timeout);
    }

    /// Register a producer with its own timeout
    pub fn register_with_timeout(&mut self, producer: Arc<dyn MonitoringProducer>, timeout: Duration) {
        debug!(
            "Registering producer '{}' with timeout {:?}",
            producer.id(),
            timeout
        );
        self.producers.push(RegisteredProducer { producer, timeout });
    }

    pub fn producer_count(&self) -> usize {
        self.producers.len()
    }

    pub fn producer_ids(&self) -> Vec<String> {
        self.producers
            .iter()
            .map(|p| p.producer.id().to_string())
            .collect()
    }

    /// Collect one snapshot per registered producer
    ///
    /// Producers run concurrently; snapshots are returned in registration
    /// order. Partial results are always returned: failures and timeouts
    /// become degraded snapshots and are never retried within the cycle.
    pub async fn collect(&self) -> Vec<SignalSnapshot> {
        let handles: Vec<_> = self
            .producers
            .iter()
            .map(|registered| {
                let producer = Arc::clone(&registered.producer);
                let timeout = registered.timeout;
                tokio::spawn(async move { poll_producer(producer.as_ref(), timeout).await })
            })
            .collect();

        let mut snapshots = Vec::with_capacity(handles.len());
        for (registered, handle) in self.producers.iter().zip(handles) {
            match handle.await {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => {
                    error!(
                        "Producer task for '{}' failed: {}",
                        registered.producer.id(),
                        e
                    );
                    snapshots.push(SignalSnapshot::unavailable(
                        registered.producer.id(),
                        Utc::now(),
                        format!("producer task failed: {}", e),
                    ));
                }
            }
        }

        snapshots
    }
}

/// Poll one producer, converting every failure into a degraded snapshot
async fn poll_producer(producer: &dyn MonitoringProducer, timeout: Duration) -> SignalSnapshot {
    let outcome = match tokio::time::timeout(timeout, producer.current_state()).await {
        Ok(result) => result,
        Err(_) => Err(ProducerError::Timeout {
            producer: producer.id().to_string(),
            timeout,
        }),
    };

    match outcome {
        Ok(report) => {
            debug!(
                "Producer '{}' returned {} alerts and {} metrics",
                producer.id(),
                report.alerts.len(),
                report.metrics.len()
            );
            SignalSnapshot::from_report(producer.id(), Utc::now(), report)
        }
        Err(e) => {
            warn!("Producer '{}' unavailable this cycle: {}", producer.id(), e);
            SignalSnapshot::unavailable(producer.id(), Utc::now(), e.to_string())
        }
    }
}
