//! Wires the components together and owns the shared runtime state
//!
//! The orchestrator is constructed explicitly and shared as an `Arc` with the
//! three scheduling loops. It is the only holder of mutable shared state: the
//! active alert table and cycle counters live behind one async mutex, the
//! incident manager behind another. Neither lock is ever held while the other
//! is taken.

use crate::alerts::{ActiveAlertEntry, ActiveAlertTable, LogNotifier, NotificationDispatcher, Notifier, WebhookNotifier};
use crate::analysis::{AnomalyDetector, AnomalyRecord, ModelRegistry, Prediction, Predictor, RefreshSummary, TrainingSettings};
use crate::collectors::{CommandProducer, SelfHealthProducer, SignalCollector};
use crate::config::Config;
use crate::correlation::{Correlator, KeywordSeverityPolicy};
use crate::events::{RawAlert, Timestamp};
use crate::history::{HistoricalStore, ALERTS_TOTAL_METRIC};
use crate::incidents::{FileIncidentStore, Incident, IncidentAge, IncidentManager, IncidentSink};
use crate::monitoring::{CycleTimer, SelfMonitoringCollector};
use crate::report::{Report, ReportInputs, ReportWriter, StateSnapshot};
use crate::scheduler::{run_periodic, MonitoringCadence};
use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::fs;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{watch, Mutex as AsyncMutex};

/// Iteration and failure counts per loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleCounters {
    pub monitoring: u64,
    pub analysis: u64,
    pub reporting: u64,
    pub report_failures: u64,
}

/// State shared by all three loops
#[derive(Debug)]
struct OrchestratorState {
    active_alerts: ActiveAlertTable,
    predictions: Vec<Prediction>,
    anomalies: Vec<AnomalyRecord>,
    degraded_producers: Vec<String>,
    cycles: CycleCounters,
}

/// Outcome of one monitoring iteration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitoringSummary {
    pub snapshots: usize,
    pub degraded: usize,
    pub raw_alerts: usize,
    pub correlated_alerts: usize,
    pub expired_alerts: usize,
    pub incidents_opened: Vec<String>,
}

/// Outcome of one analysis iteration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisSummary {
    pub refresh: RefreshSummary,
    pub usable_models: usize,
    pub predictions: usize,
    pub anomalies: usize,
}

pub struct Orchestrator {
    config: Arc<Config>,
    collector: SignalCollector,
    history: HistoricalStore,
    correlator: Correlator,
    models: Mutex<ModelRegistry>,
    predictor: Predictor,
    anomaly_detector: AnomalyDetector,
    incidents: AsyncMutex<IncidentManager>,
    state: AsyncMutex<OrchestratorState>,
    reports: ReportWriter,
    monitor: Arc<SelfMonitoringCollector>,
    cadence: Arc<MonitoringCadence>,
}

impl Orchestrator {
    /// Build an orchestrator with the producers and channels named in `config`
    ///
    /// # Errors
    ///
    /// Fails if a producer or notification channel is misconfigured or the
    /// stored incidents cannot be listed.
    pub fn new(config: Config) -> Result<Self> {
        let monitor = Arc::new(SelfMonitoringCollector::new());
        let mut collector = SignalCollector::new(config.monitoring.producer_timeout());

        for producer_config in &config.producers {
            let producer = CommandProducer::from_config(producer_config)
                .with_context(|| format!("invalid producer '{}'", producer_config.name))?;
            match producer_config.timeout_seconds {
                Some(secs) => collector.register_with_timeout(Arc::new(producer), std::time::Duration::from_secs(secs)),
                None => collector.register(Arc::new(producer)),
            }
        }
        if config.monitoring.self_health {
            collector.register(Arc::new(SelfHealthProducer::new(
                Arc::clone(&monitor),
                config.monitoring.memory_warning_mb,
            )));
        }

        let mut channels: Vec<Arc<dyn Notifier>> = vec![Arc::new(LogNotifier)];
        if let Some(url) = &config.notifications.webhook_url {
            channels.push(Arc::new(
                WebhookNotifier::new(url.clone()).context("failed to set up webhook notifications")?,
            ));
        }
        let dispatcher = NotificationDispatcher::new(channels, config.notifications.rate_limit_per_minute);
        let sink = FileIncidentStore::new(&config.incidents.directory);

        Self::with_components(config, collector, Box::new(sink), dispatcher, monitor)
    }

    /// Build an orchestrator around explicitly constructed components
    pub fn with_components(
        config: Config,
        collector: SignalCollector,
        sink: Box<dyn IncidentSink>,
        dispatcher: NotificationDispatcher,
        monitor: Arc<SelfMonitoringCollector>,
    ) -> Result<Self> {
        let cadence = Arc::new(MonitoringCadence::new(
            config.monitoring.interval(),
            config.monitoring.elevated_interval(),
        ));
        let incidents = IncidentManager::load(
            config.incidents.clone(),
            sink,
            Arc::new(dispatcher),
            Arc::clone(&cadence),
            config.monitoring.elevation(),
        )
        .context("failed to load stored incidents")?;

        let history = HistoricalStore::new(config.history.retention(), config.history.max_samples_per_metric);
        match history.load(&config.history.file, Utc::now()) {
            Ok(0) => {}
            Ok(restored) => info!(
                "Restored {} history samples from {}",
                restored,
                config.history.file.display()
            ),
            Err(e) => warn!(
                "Starting with empty history, cannot load {}: {}",
                config.history.file.display(),
                e
            ),
        }

        info!(
            "Orchestrator ready with {} producers: {}",
            collector.producer_count(),
            collector.producer_ids().join(", ")
        );

        Ok(Self {
            history,
            correlator: Correlator::new(Box::new(KeywordSeverityPolicy::from_config(&config.correlation))),
            models: Mutex::new(ModelRegistry::new(TrainingSettings::from_config(&config.analysis))),
            predictor: Predictor::new(&config.analysis),
            anomaly_detector: AnomalyDetector::new(config.analysis.anomaly_threshold),
            incidents: AsyncMutex::new(incidents),
            state: AsyncMutex::new(OrchestratorState {
                active_alerts: ActiveAlertTable::new(config.correlation.retention()),
                predictions: Vec::new(),
                anomalies: Vec::new(),
                degraded_producers: Vec::new(),
                cycles: CycleCounters::default(),
            }),
            reports: ReportWriter::new(&config.reporting.directory, config.reporting.keep_reports),
            config: Arc::new(config),
            collector,
            monitor,
            cadence,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn history(&self) -> &HistoricalStore {
        &self.history
    }

    pub fn cadence(&self) -> &MonitoringCadence {
        &self.cadence
    }

    pub async fn cycle_counters(&self) -> CycleCounters {
        self.state.lock().await.cycles
    }

    pub async fn active_alerts(&self) -> Vec<ActiveAlertEntry> {
        self.state.lock().await.active_alerts.snapshot()
    }

    pub async fn run_monitoring_cycle(&self) -> MonitoringSummary {
        self.monitoring_cycle_at(Utc::now()).await
    }

    /// Collect, record history, correlate, update the active alert table and respond
    pub async fn monitoring_cycle_at(&self, now: Timestamp) -> MonitoringSummary {
        let timer = CycleTimer::start("monitoring", Arc::clone(&self.monitor));
        let snapshots = self.collector.collect().await;

        let mut summary = MonitoringSummary {
            snapshots: snapshots.len(),
            ..MonitoringSummary::default()
        };
        let mut raw_alerts: Vec<RawAlert> = Vec::new();
        let mut degraded = Vec::new();
        for snapshot in &snapshots {
            self.history.append(snapshot);
            if snapshot.is_degraded() {
                degraded.push(snapshot.producer_id.clone());
            }
            raw_alerts.extend(snapshot.raw_alerts.iter().cloned());
        }
        self.history.record(ALERTS_TOTAL_METRIC, now, raw_alerts.len() as f64);
        summary.degraded = degraded.len();
        summary.raw_alerts = raw_alerts.len();

        let correlated = self.correlator.correlate(&raw_alerts);
        summary.correlated_alerts = correlated.len();

        let touched = {
            let mut state = self.state.lock().await;
            let touched: Vec<ActiveAlertEntry> = correlated
                .into_iter()
                .map(|alert| state.active_alerts.upsert(alert, now).clone())
                .collect();
            summary.expired_alerts = state.active_alerts.cleanup(now);
            state.degraded_producers = degraded;
            state.cycles.monitoring += 1;
            touched
        };

        {
            let mut incidents = self.incidents.lock().await;
            summary.incidents_opened = incidents.evaluate(&touched, now).await;
            let pending = incidents.flush_pending();
            if pending > 0 {
                warn!("{} incident records still waiting to be written", pending);
            }
        }

        let elapsed = timer.finish();
        debug!(
            "Monitoring cycle: {} snapshots ({} degraded), {} raw -> {} correlated alerts, {} incidents opened in {:?}",
            summary.snapshots,
            summary.degraded,
            summary.raw_alerts,
            summary.correlated_alerts,
            summary.incidents_opened.len(),
            elapsed
        );
        summary
    }

    pub async fn run_analysis_cycle(&self, force: bool) -> AnalysisSummary {
        self.analysis_cycle_at(Utc::now(), force).await
    }

    /// Retrain stale models, then raise predictive and anomaly alerts
    pub async fn analysis_cycle_at(&self, now: Timestamp, force: bool) -> AnalysisSummary {
        let timer = CycleTimer::start("analysis", Arc::clone(&self.monitor));
        let compacted = self.history.compact(now);
        if compacted > 0 {
            debug!("Compacted {} expired samples", compacted);
        }

        let (refresh, usable_models, predictions, anomalies) = {
            let mut models = self.models.lock().unwrap_or_else(PoisonError::into_inner);
            let refresh = models.refresh(&self.history, now, force);
            let predictions = self.predictor.predict(models.models(), now);
            let anomalies = self.anomaly_detector.detect(models.models());
            (refresh, models.usable_count(), predictions, anomalies)
        };

        let raw_alerts: Vec<RawAlert> = predictions
            .iter()
            .map(|p| p.to_raw_alert(now))
            .chain(anomalies.iter().map(|a| a.to_raw_alert(now)))
            .collect();
        let correlated = self.correlator.correlate(&raw_alerts);

        let summary = AnalysisSummary {
            refresh,
            usable_models,
            predictions: predictions.len(),
            anomalies: anomalies.len(),
        };

        {
            let mut state = self.state.lock().await;
            for alert in correlated {
                state.active_alerts.upsert(alert, now);
            }
            state.predictions = predictions;
            state.anomalies = anomalies;
            state.cycles.analysis += 1;
        }
        self.save_history();

        let elapsed = timer.finish();
        if summary.predictions > 0 || summary.anomalies > 0 {
            info!(
                "Analysis raised {} predictions and {} anomalies from {} usable models",
                summary.predictions, summary.anomalies, summary.usable_models
            );
        }
        debug!("Analysis cycle finished in {:?}", elapsed);
        summary
    }

    /// Write the history file, logging a failure; the next save retries
    fn save_history(&self) {
        if let Err(e) = self.history.save(&self.config.history.file) {
            error!(
                "Failed to save history to {}: {}",
                self.config.history.file.display(),
                e
            );
        }
    }

    pub async fn run_reporting_cycle(&self) -> Report {
        self.reporting_cycle_at(Utc::now()).await
    }

    /// Build and persist a report; a failed write is retried on the next iteration
    pub async fn reporting_cycle_at(&self, now: Timestamp) -> Report {
        let timer = CycleTimer::start("reporting", Arc::clone(&self.monitor));
        let report = self.build_report(now).await;

        let written = self
            .reports
            .ensure_directory()
            .and_then(|()| self.reports.write_report(&report));
        {
            let mut state = self.state.lock().await;
            state.cycles.reporting += 1;
            match written {
                Ok(path) => info!(
                    "Report written to {} (status {:?}, {} active alerts)",
                    path.display(),
                    report.overall_status,
                    report.active_alerts.len()
                ),
                Err(e) => {
                    state.cycles.report_failures += 1;
                    error!("Failed to write report, will retry next cycle: {}", e);
                }
            }
        }

        self.monitor.log_summary();
        timer.finish();
        report
    }

    /// Report over the current state without persisting it
    pub async fn build_report(&self, now: Timestamp) -> Report {
        let (active_alerts, predictions, anomalies, degraded_producers) = {
            let state = self.state.lock().await;
            (
                state.active_alerts.snapshot(),
                state.predictions.clone(),
                state.anomalies.clone(),
                state.degraded_producers.clone(),
            )
        };
        let (counters, open_incidents) = {
            let incidents = self.incidents.lock().await;
            (incidents.counters(), incidents.aging(now))
        };

        Report::build(ReportInputs {
            timestamp: now,
            active_alerts,
            counters,
            open_incidents,
            predictions,
            anomalies,
            degraded_producers,
            noise_threshold: self.config.reporting.noise_threshold,
        })
    }

    /// One monitoring, forced analysis and reporting pass without starting loops
    pub async fn analyze_once(&self) -> Report {
        let now = Utc::now();
        self.monitoring_cycle_at(now).await;
        self.analysis_cycle_at(now, true).await;
        self.reporting_cycle_at(now).await
    }

    pub async fn open_incidents(&self) -> Vec<IncidentAge> {
        self.incidents.lock().await.aging(Utc::now())
    }

    /// Close an open incident by id
    ///
    /// Returns `Ok(None)` if no open incident has that id.
    pub async fn close_incident(&self, id: &str) -> Result<Option<Incident>> {
        let closed = self
            .incidents
            .lock()
            .await
            .close(id, Utc::now())
            .with_context(|| format!("failed to persist closure of incident {}", id))?;
        Ok(closed)
    }

    /// Run the three loops until `shutdown` turns true, then persist final state
    ///
    /// # Errors
    ///
    /// Fails without starting any loop if the data directories cannot be created.
    pub async fn start(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.reports.ensure_directory().with_context(|| {
            format!(
                "cannot create report directory {}",
                self.reports.directory().display()
            )
        })?;
        fs::create_dir_all(&self.config.incidents.directory).with_context(|| {
            format!(
                "cannot create incident directory {}",
                self.config.incidents.directory.display()
            )
        })?;

        info!(
            "Starting loops: monitoring every {:?}, analysis every {:?}, reporting every {:?}",
            self.config.monitoring.interval(),
            self.config.analysis.interval(),
            self.config.reporting.interval()
        );

        let cadence = Arc::clone(&self.cadence);
        let analysis_period = self.config.analysis.interval();
        let reporting_period = self.config.reporting.interval();

        let monitoring = run_periodic(
            "monitoring",
            move || cadence.period(Utc::now()),
            shutdown.clone(),
            Arc::clone(&self.monitor),
            {
                let orchestrator = Arc::clone(&self);
                move || {
                    let orchestrator = Arc::clone(&orchestrator);
                    async move {
                        orchestrator.run_monitoring_cycle().await;
                    }
                }
            },
        );
        let analysis = run_periodic(
            "analysis",
            move || analysis_period,
            shutdown.clone(),
            Arc::clone(&self.monitor),
            {
                let orchestrator = Arc::clone(&self);
                move || {
                    let orchestrator = Arc::clone(&orchestrator);
                    async move {
                        orchestrator.run_analysis_cycle(false).await;
                    }
                }
            },
        );
        let reporting = run_periodic(
            "reporting",
            move || reporting_period,
            shutdown,
            Arc::clone(&self.monitor),
            {
                let orchestrator = Arc::clone(&self);
                move || {
                    let orchestrator = Arc::clone(&orchestrator);
                    async move {
                        orchestrator.run_reporting_cycle().await;
                    }
                }
            },
        );

        let (monitoring_runs, analysis_runs, reporting_runs) = tokio::join!(monitoring, analysis, reporting);
        info!(
            "All loops stopped ({} monitoring, {} analysis, {} reporting iterations)",
            monitoring_runs, analysis_runs, reporting_runs
        );

        self.persist_final_state().await;
        Ok(())
    }

    /// Write the final report, the history and `state.json`, logging failures
    async fn persist_final_state(&self) {
        let now = Utc::now();
        self.save_history();
        let report = self.build_report(now).await;
        if let Err(e) = self.reports.write_report(&report) {
            error!("Failed to write final report: {}", e);
        }

        let active_alerts = self.state.lock().await.active_alerts.snapshot();
        let (counters, open_incidents) = {
            let mut incidents = self.incidents.lock().await;
            let pending = incidents.flush_pending();
            if pending > 0 {
                error!("{} incident records could not be written before shutdown", pending);
            }
            (
                incidents.counters(),
                incidents.open_incidents().into_iter().cloned().collect(),
            )
        };

        let snapshot = StateSnapshot {
            timestamp: now,
            active_alerts,
            counters,
            open_incidents,
            self_monitoring: self.monitor.collect_metrics(),
        };
        if let Err(e) = self.reports.write_state(&snapshot) {
            error!("Failed to write state snapshot: {}", e);
        }
    }
}
