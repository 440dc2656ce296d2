//! Periodic loop scheduling
//!
//! Each loop is a ticker plus a shutdown receiver. An iteration runs as its
//! own task; a tick that fires while the previous iteration is still running
//! is skipped and counted, never queued. On shutdown no further ticks fire
//! and the in-flight iteration is awaited before the loop returns.

use crate::events::Timestamp;
use crate::monitoring::SelfMonitoringCollector;
use log::{debug, error, info, warn};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};

/// Monitoring period that tightens temporarily after critical incidents
#[derive(Debug)]
pub struct MonitoringCadence {
    normal: Duration,
    elevated: Duration,
    elevated_until: Mutex<Option<Timestamp>>,
}

impl MonitoringCadence {
    pub fn new(normal: Duration, elevated: Duration) -> Self {
        Self {
            normal,
            elevated: elevated.min(normal),
            elevated_until: Mutex::new(None),
        }
    }

    /// Use the elevated period until `now + duration`, extending any current elevation
    pub fn elevate(&self, now: Timestamp, duration: chrono::Duration) -> Timestamp {
        let mut until = self.elevated_until.lock().unwrap_or_else(PoisonError::into_inner);
        let target = now + duration;
        let effective = match *until {
            Some(existing) if existing > target => existing,
            _ => target,
        };
        *until = Some(effective);
        info!(
            "Monitoring elevated to every {:?} until {}",
            self.elevated,
            effective.to_rfc3339()
        );
        effective
    }

    pub fn is_elevated(&self, now: Timestamp) -> bool {
        let until = self.elevated_until.lock().unwrap_or_else(PoisonError::into_inner);
        until.is_some_and(|until| now < until)
    }

    pub fn period(&self, now: Timestamp) -> Duration {
        if self.is_elevated(now) {
            self.elevated
        } else {
            self.normal
        }
    }
}

fn ticker(period: Duration, start_now: bool) -> Interval {
    let mut ticker = if start_now {
        interval(period)
    } else {
        interval_at(Instant::now() + period, period)
    };
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Resolves when the in-flight iteration finishes, never when idle
async fn join_in_flight(in_flight: &mut Option<JoinHandle<()>>) -> Result<(), JoinError> {
    match in_flight.as_mut() {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

/// Rebuild the ticker when the period changed
fn retune<P: Fn() -> Duration>(name: &str, period: &P, current: &mut Duration, ticks: &mut Interval) {
    let next = period();
    if next != *current {
        info!("{} loop period changed from {:?} to {:?}", name, current, next);
        *current = next;
        *ticks = ticker(next, false);
    }
}

/// Run `task` every `period()` until `shutdown` turns true
///
/// The first iteration starts immediately. The period is re-read whenever
/// an iteration starts or finishes, and the ticker is rebuilt if it changed.
/// Returns the number of iterations started.
pub async fn run_periodic<P, F, Fut>(
    name: &'static str,
    period: P,
    mut shutdown: watch::Receiver<bool>,
    monitor: Arc<SelfMonitoringCollector>,
    task: F,
) -> u64
where
    P: Fn() -> Duration,
    F: Fn() -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    if *shutdown.borrow() {
        return 0;
    }

    let mut current = period();
    let mut ticks = ticker(current, true);
    let mut in_flight: Option<JoinHandle<()>> = None;
    let mut started = 0u64;

    info!("Starting {} loop every {:?}", name, current);

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                if in_flight.as_ref().is_some_and(|handle| !handle.is_finished()) {
                    monitor.record_skipped_tick(name);
                    warn!("{} iteration still running, skipping tick", name);
                    continue;
                }
                if let Some(handle) = in_flight.take() {
                    if let Err(e) = handle.await {
                        error!("{} iteration panicked: {}", name, e);
                    }
                }

                debug!("{} tick", name);
                in_flight = Some(tokio::spawn(task()));
                started += 1;
                retune(name, &period, &mut current, &mut ticks);
            }
            result = join_in_flight(&mut in_flight), if in_flight.is_some() => {
                in_flight = None;
                if let Err(e) = result {
                    error!("{} iteration panicked: {}", name, e);
                }
                retune(name, &period, &mut current, &mut ticks);
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    if let Some(handle) = in_flight {
        info!("Waiting for in-flight {} iteration to finish", name);
        if let Err(e) = handle.await {
            error!("{} iteration panicked during shutdown: {}", name, e);
        }
    }
    info!("{} loop stopped after {} iterations", name, started);
    started
}
