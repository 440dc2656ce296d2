use crate::alerts::{ActiveAlertEntry, Notification, NotificationDispatcher};
use crate::config::IncidentConfig;
use crate::error::PersistenceError;
use crate::events::{Severity, Timestamp};
use crate::incidents::incident::{ActionType, Incident, IncidentAge, IncidentStatus, ResponseAction};
use crate::incidents::store::IncidentSink;
use crate::scheduler::MonitoringCadence;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Cumulative incident and response counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentCounters {
    pub incidents_created: u64,
    pub responses_completed: u64,
    pub responses_failed: u64,
    pub persistence_failures: u64,
}

impl IncidentCounters {
    pub fn automated_responses(&self) -> u64 {
        self.responses_completed + self.responses_failed
    }
}

/// Owns every incident opened by this process and drives automated response
pub struct IncidentManager {
    config: IncidentConfig,
    sink: Box<dyn IncidentSink>,
    dispatcher: Arc<NotificationDispatcher>,
    cadence: Arc<MonitoringCadence>,
    elevation: chrono::Duration,
    incidents: BTreeMap<String, Incident>,
    /// Source alert id to the open incident it created
    open_by_source: HashMap<String, String>,
    /// Incidents whose latest state has not reached storage yet
    pending: BTreeSet<String>,
    counters: IncidentCounters,
}

impl IncidentManager {
    /// Create a manager, repopulating open incidents from storage
    ///
    /// # Errors
    ///
    /// Returns the sink's error if stored incidents cannot be listed.
    pub fn load(
        config: IncidentConfig,
        sink: Box<dyn IncidentSink>,
        dispatcher: Arc<NotificationDispatcher>,
        cadence: Arc<MonitoringCadence>,
        elevation: chrono::Duration,
    ) -> Result<Self, PersistenceError> {
        let mut manager = Self {
            config,
            sink,
            dispatcher,
            cadence,
            elevation,
            incidents: BTreeMap::new(),
            open_by_source: HashMap::new(),
            pending: BTreeSet::new(),
            counters: IncidentCounters::default(),
        };

        for incident in manager.sink.load_all()? {
            if incident.is_open() {
                manager
                    .open_by_source
                    .insert(incident.source_alert_id.clone(), incident.id.clone());
                manager.incidents.insert(incident.id.clone(), incident);
            }
        }
        if !manager.incidents.is_empty() {
            info!("Restored {} open incidents", manager.incidents.len());
        }
        Ok(manager)
    }

    /// Whether an active alert qualifies for an incident
    ///
    /// Critical alerts need `critical_threshold` confidence. High alerts need
    /// `high_threshold` confidence and must either be correlated or have been
    /// seen more than `min_occurrences` times.
    pub fn should_open(&self, entry: &ActiveAlertEntry) -> bool {
        let alert = &entry.alert;
        match alert.severity {
            Severity::Critical => alert.confidence >= self.config.critical_threshold,
            Severity::High => {
                alert.confidence >= self.config.high_threshold
                    && (alert.is_correlated() || entry.occurrence_count > self.config.min_occurrences)
            }
            Severity::Warning | Severity::Info => false,
        }
    }

    /// Open incidents for qualifying entries, returning the new incident ids
    ///
    /// An alert that already has an open incident does not open another.
    pub async fn evaluate(&mut self, entries: &[ActiveAlertEntry], now: Timestamp) -> Vec<String> {
        let mut created = Vec::new();
        for entry in entries {
            if !self.should_open(entry) || self.open_by_source.contains_key(&entry.alert.id) {
                continue;
            }
            created.push(self.open(entry, now).await);
        }
        created
    }

    /// Open an incident and run its automated response
    ///
    /// The incident is kept even if every response action fails.
    pub async fn open(&mut self, entry: &ActiveAlertEntry, now: Timestamp) -> String {
        let mut incident = Incident::open(entry, now);
        warn!(
            "Opening {} incident {} for {}: {}",
            incident.severity, incident.id, incident.source_alert_id, incident.description
        );

        let initial_save = self.sink.save(&incident);
        if let Err(e) = &initial_save {
            error!("Failed to persist incident {}: {}", incident.id, e);
            self.counters.persistence_failures += 1;
        }

        let actions = self.respond(&incident, initial_save, now).await;
        for action in &actions {
            if action.is_failed() {
                self.counters.responses_failed += 1;
                warn!(
                    "Response action {} for incident {} failed: {}",
                    action.action_type, incident.id, action.detail
                );
            } else {
                self.counters.responses_completed += 1;
            }
        }
        incident.response_actions.extend(actions);

        let id = incident.id.clone();
        self.counters.incidents_created += 1;
        self.open_by_source
            .insert(incident.source_alert_id.clone(), id.clone());
        self.incidents.insert(id.clone(), incident);
        self.persist(&id);
        id
    }

    /// Response actions for a freshly opened incident
    async fn respond(
        &self,
        incident: &Incident,
        initial_save: Result<(), PersistenceError>,
        now: Timestamp,
    ) -> Vec<ResponseAction> {
        let mut actions = Vec::new();
        let record_action = |result: Result<(), PersistenceError>| match result {
            Ok(()) => ResponseAction::completed(
                ActionType::IncidentRecord,
                self.sink.location(),
                now,
                "incident record written",
            ),
            Err(e) => ResponseAction::failed(ActionType::IncidentRecord, self.sink.location(), now, e),
        };

        match incident.severity {
            Severity::Critical => {
                actions.push(record_action(initial_save));
                actions.push(self.notify(incident, true, now).await);
                let until = self.cadence.elevate(now, self.elevation);
                actions.push(ResponseAction::completed(
                    ActionType::ElevatedMonitoring,
                    "monitoring_loop",
                    now,
                    format!("elevated until {}", until.to_rfc3339()),
                ));
            }
            _ => {
                if self.config.record_high_severity {
                    actions.push(record_action(initial_save));
                }
                actions.push(self.notify(incident, false, now).await);
            }
        }
        actions
    }

    async fn notify(&self, incident: &Incident, emergency: bool, now: Timestamp) -> ResponseAction {
        let action_type = if emergency {
            ActionType::EmergencyNotification
        } else {
            ActionType::Notification
        };
        let notification = Notification::new(
            incident.id.clone(),
            incident.severity,
            &format!("{} incident: {}", incident.severity, incident.description),
            &incident.impact_assessment,
            emergency,
        );
        let target = self.dispatcher.channel_names().join(",");

        match self.dispatcher.dispatch(&notification).await {
            Ok(delivered) => ResponseAction::completed(
                action_type,
                target,
                now,
                format!("delivered via {}", delivered.join(", ")),
            ),
            Err(e) => ResponseAction::failed(action_type, target, now, e),
        }
    }

    /// Write an incident, queueing it for retry on failure
    ///
    /// A closed incident is forgotten once its final state is stored.
    fn persist(&mut self, id: &str) {
        let Some(incident) = self.incidents.get(id) else {
            return;
        };
        match self.sink.save(incident) {
            Ok(()) => {
                self.pending.remove(id);
                if !incident.is_open() {
                    self.incidents.remove(id);
                }
            }
            Err(e) => {
                error!("Failed to persist incident {}, will retry: {}", id, e);
                self.counters.persistence_failures += 1;
                self.pending.insert(id.to_string());
            }
        }
    }

    /// Retry writes that failed earlier, returning how many are still pending
    pub fn flush_pending(&mut self) -> usize {
        let ids: Vec<String> = self.pending.iter().cloned().collect();
        for id in ids {
            self.persist(&id);
        }
        self.pending.len()
    }

    /// Close an open incident
    ///
    /// Returns `Ok(None)` when no open incident has this id.
    ///
    /// # Errors
    ///
    /// The incident is closed in memory even if the write fails; the write is
    /// retried by `flush_pending` and the error is returned.
    pub fn close(&mut self, id: &str, now: Timestamp) -> Result<Option<Incident>, PersistenceError> {
        let Some(incident) = self.incidents.get_mut(id) else {
            return Ok(None);
        };
        if !incident.is_open() {
            return Ok(None);
        }

        incident.status = IncidentStatus::Closed;
        incident.closed_at = Some(now);
        let closed = incident.clone();
        self.open_by_source.remove(&closed.source_alert_id);
        info!("Closed incident {}", id);

        match self.sink.save(&closed) {
            Ok(()) => {
                self.pending.remove(id);
                self.incidents.remove(id);
                Ok(Some(closed))
            }
            Err(e) => {
                self.counters.persistence_failures += 1;
                self.pending.insert(id.to_string());
                Err(e)
            }
        }
    }

    /// Open incidents with their age, oldest first
    pub fn aging(&self, now: Timestamp) -> Vec<IncidentAge> {
        let mut ages: Vec<IncidentAge> = self
            .incidents
            .values()
            .filter(|incident| incident.is_open())
            .map(|incident| incident.age(now))
            .collect();
        ages.sort_by(|a, b| b.age_minutes.cmp(&a.age_minutes).then_with(|| a.id.cmp(&b.id)));
        ages
    }

    pub fn get(&self, id: &str) -> Option<&Incident> {
        self.incidents.get(id)
    }

    pub fn open_incidents(&self) -> Vec<&Incident> {
        self.incidents.values().filter(|i| i.is_open()).collect()
    }

    pub fn open_count(&self) -> usize {
        self.open_by_source.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn counters(&self) -> IncidentCounters {
        self.counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::notifier::testing::RecordingNotifier;
    use crate::alerts::Notifier;
    use crate::correlation::CorrelatedAlert;
    use crate::events::RawAlert;
    use crate::incidents::store::{FileIncidentStore, MockIncidentSink};
    use crate::incidents::ActionStatus;
    use chrono::{Duration, Utc};
    use std::io;
    use tempfile::TempDir;

    fn entry(severity: Severity, message: &str, occurrences: u32) -> ActiveAlertEntry {
        let now = Utc::now();
        ActiveAlertEntry {
            alert: CorrelatedAlert::individual(RawAlert::new("db", severity, message, now)),
            first_seen: now,
            last_seen: now,
            occurrence_count: occurrences,
        }
    }

    fn correlated_high() -> ActiveAlertEntry {
        let now = Utc::now();
        let alert = CorrelatedAlert::correlated(vec![
            RawAlert::new("api", Severity::High, "connection pool exhausted", now),
            RawAlert::new("worker", Severity::High, "connection pool exhausted", now),
        ])
        .unwrap();
        ActiveAlertEntry {
            alert,
            first_seen: now,
            last_seen: now,
            occurrence_count: 1,
        }
    }

    fn cadence() -> Arc<MonitoringCadence> {
        Arc::new(MonitoringCadence::new(
            std::time::Duration::from_secs(30),
            std::time::Duration::from_secs(10),
        ))
    }

    fn manager_with(sink: Box<dyn IncidentSink>, dispatcher: NotificationDispatcher, config: IncidentConfig) -> IncidentManager {
        IncidentManager::load(config, sink, Arc::new(dispatcher), cadence(), Duration::minutes(30)).unwrap()
    }

    fn file_manager(dir: &TempDir) -> IncidentManager {
        manager_with(
            Box::new(FileIncidentStore::new(dir.path())),
            NotificationDispatcher::with_log_channel(3),
            IncidentConfig::default(),
        )
    }

    fn io_failure() -> PersistenceError {
        PersistenceError::IoError(io::Error::new(io::ErrorKind::Other, "disk full"))
    }

    #[test]
    fn test_open_rules() {
        let dir = TempDir::new().unwrap();
        let manager = file_manager(&dir);

        assert!(manager.should_open(&entry(Severity::Critical, "memory exhausted", 1)));
        assert!(!manager.should_open(&entry(Severity::High, "slow queries", 1)));
        assert!(!manager.should_open(&entry(Severity::High, "slow queries", 3)));
        assert!(manager.should_open(&entry(Severity::High, "slow queries", 4)));
        assert!(manager.should_open(&correlated_high()));
        assert!(!manager.should_open(&entry(Severity::Warning, "queue growing", 100)));
    }

    #[test]
    fn test_low_confidence_critical_not_opened() {
        let dir = TempDir::new().unwrap();
        let manager = file_manager(&dir);
        let mut low = entry(Severity::Critical, "memory exhausted", 1);
        low.alert.confidence = 0.8;
        assert!(!manager.should_open(&low));
    }

    #[tokio::test]
    async fn test_critical_incident_actions() {
        let dir = TempDir::new().unwrap();
        let mut manager = file_manager(&dir);
        let now = Utc::now();

        let id = manager.open(&entry(Severity::Critical, "memory exhausted", 1), now).await;
        let incident = manager.get(&id).unwrap();

        let types: Vec<ActionType> = incident.response_actions.iter().map(|a| a.action_type).collect();
        assert_eq!(
            types,
            vec![
                ActionType::IncidentRecord,
                ActionType::EmergencyNotification,
                ActionType::ElevatedMonitoring
            ]
        );
        assert!(incident.response_actions.iter().all(|a| a.status == ActionStatus::Completed));
        assert!(manager.cadence.is_elevated(now + Duration::minutes(10)));

        let counters = manager.counters();
        assert_eq!(counters.incidents_created, 1);
        assert_eq!(counters.automated_responses(), 3);

        // The stored record includes the actions
        let stored = FileIncidentStore::new(dir.path()).load_all().unwrap();
        assert_eq!(stored[0].response_actions.len(), 3);
    }

    #[tokio::test]
    async fn test_high_incident_actions() {
        let dir = TempDir::new().unwrap();
        let mut manager = file_manager(&dir);
        let id = manager.open(&correlated_high(), Utc::now()).await;

        let types: Vec<ActionType> = manager.get(&id).unwrap().response_actions.iter().map(|a| a.action_type).collect();
        assert_eq!(types, vec![ActionType::IncidentRecord, ActionType::Notification]);
    }

    #[tokio::test]
    async fn test_high_incident_without_record_still_has_action() {
        let dir = TempDir::new().unwrap();
        let config = IncidentConfig {
            record_high_severity: false,
            ..IncidentConfig::default()
        };
        let mut manager = manager_with(
            Box::new(FileIncidentStore::new(dir.path())),
            NotificationDispatcher::with_log_channel(3),
            config,
        );
        let id = manager.open(&correlated_high(), Utc::now()).await;
        let actions = &manager.get(&id).unwrap().response_actions;
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].action_type, ActionType::Notification);
    }

    #[tokio::test]
    async fn test_incident_exists_when_every_action_fails() {
        let mut sink = MockIncidentSink::new();
        sink.expect_load_all().returning(|| Ok(Vec::new()));
        sink.expect_save().returning(|_| Err(io_failure()));
        sink.expect_location().returning(|| "memory".to_string());

        let dispatcher = NotificationDispatcher::new(
            vec![Arc::new(RecordingNotifier::failing()) as Arc<dyn Notifier>],
            3,
        );
        let mut manager = manager_with(Box::new(sink), dispatcher, IncidentConfig::default());

        let id = manager.open(&correlated_high(), Utc::now()).await;
        let incident = manager.get(&id).unwrap();

        assert_eq!(incident.response_actions.len(), 2);
        assert!(incident.response_actions.iter().all(|a| a.is_failed()));
        assert_eq!(manager.counters().responses_failed, 2);
        assert_eq!(manager.pending_count(), 1);
        assert!(manager.counters().persistence_failures >= 2);
    }

    #[tokio::test]
    async fn test_rate_limited_notification_recorded_as_failed() {
        let dir = TempDir::new().unwrap();
        let mut manager = manager_with(
            Box::new(FileIncidentStore::new(dir.path())),
            NotificationDispatcher::with_log_channel(0),
            IncidentConfig::default(),
        );
        let id = manager.open(&correlated_high(), Utc::now()).await;
        let actions = &manager.get(&id).unwrap().response_actions;
        assert!(actions[1].is_failed());
        assert!(actions[1].detail.contains("Rate limit"));
    }

    #[tokio::test]
    async fn test_pending_writes_flushed_when_storage_recovers() {
        let mut sink = MockIncidentSink::new();
        sink.expect_load_all().returning(|| Ok(Vec::new()));
        sink.expect_location().returning(|| "memory".to_string());
        let mut calls = 0;
        sink.expect_save().returning(move |_| {
            calls += 1;
            if calls <= 2 {
                Err(io_failure())
            } else {
                Ok(())
            }
        });

        let mut manager = manager_with(
            Box::new(sink),
            NotificationDispatcher::with_log_channel(3),
            IncidentConfig::default(),
        );
        manager.open(&entry(Severity::Critical, "memory exhausted", 1), Utc::now()).await;
        assert_eq!(manager.pending_count(), 1);

        assert_eq!(manager.flush_pending(), 0);
        assert_eq!(manager.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_incident_dropped_after_delayed_write() {
        let mut sink = MockIncidentSink::new();
        sink.expect_load_all().returning(|| Ok(Vec::new()));
        sink.expect_location().returning(|| "memory".to_string());
        // Open and its response write succeed, the close write fails once
        let mut calls = 0;
        sink.expect_save().returning(move |_| {
            calls += 1;
            if calls == 3 {
                Err(io_failure())
            } else {
                Ok(())
            }
        });

        let mut manager = manager_with(
            Box::new(sink),
            NotificationDispatcher::with_log_channel(3),
            IncidentConfig::default(),
        );
        let now = Utc::now();
        let id = manager.open(&entry(Severity::Critical, "memory exhausted", 1), now).await;
        assert_eq!(manager.pending_count(), 0);

        assert!(manager.close(&id, now).is_err());
        assert_eq!(manager.pending_count(), 1);
        assert_eq!(manager.get(&id).unwrap().status, IncidentStatus::Closed);
        assert!(manager.aging(now).is_empty());

        assert_eq!(manager.flush_pending(), 0);
        assert!(manager.get(&id).is_none());
        assert!(manager.open_incidents().is_empty());
    }

    #[tokio::test]
    async fn test_evaluate_deduplicates_by_source_alert() {
        let dir = TempDir::new().unwrap();
        let mut manager = file_manager(&dir);
        let critical = entry(Severity::Critical, "memory exhausted", 1);
        let entries = vec![critical.clone(), entry(Severity::Warning, "queue growing", 1)];

        assert_eq!(manager.evaluate(&entries, Utc::now()).await.len(), 1);
        assert!(manager.evaluate(&entries, Utc::now()).await.is_empty());
        assert_eq!(manager.open_count(), 1);
    }

    #[tokio::test]
    async fn test_close_and_reopen() {
        let dir = TempDir::new().unwrap();
        let mut manager = file_manager(&dir);
        let critical = entry(Severity::Critical, "memory exhausted", 1);
        let now = Utc::now();
        let id = manager.open(&critical, now).await;

        let closed = manager.close(&id, now + Duration::hours(1)).unwrap().unwrap();
        assert_eq!(closed.status, IncidentStatus::Closed);
        assert!(manager.close(&id, now).unwrap().is_none());
        assert_eq!(manager.open_count(), 0);

        // A closed incident no longer blocks a new one for the same alert
        assert_eq!(manager.evaluate(&[critical], now).await.len(), 1);
    }

    #[tokio::test]
    async fn test_load_restores_only_open_incidents() {
        let dir = TempDir::new().unwrap();
        let now = Utc::now();
        let (open_id, closed_id) = {
            let mut manager = file_manager(&dir);
            let open_id = manager.open(&entry(Severity::Critical, "memory exhausted", 1), now).await;
            let closed_id = manager.open(&correlated_high(), now).await;
            manager.close(&closed_id, now).unwrap();
            (open_id, closed_id)
        };

        let restored = file_manager(&dir);
        assert!(restored.get(&open_id).is_some());
        assert!(restored.get(&closed_id).is_none());
        assert_eq!(restored.open_count(), 1);
        assert_eq!(restored.counters().incidents_created, 0);
    }

    #[tokio::test]
    async fn test_aging_orders_oldest_first() {
        let dir = TempDir::new().unwrap();
        let mut manager = file_manager(&dir);
        let now = Utc::now();
        let old = manager
            .open(&entry(Severity::Critical, "memory exhausted", 1), now - Duration::hours(2))
            .await;
        manager.open(&correlated_high(), now - Duration::minutes(10)).await;

        let ages = manager.aging(now);
        assert_eq!(ages.len(), 2);
        assert_eq!(ages[0].id, old);
        assert_eq!(ages[0].age_minutes, 120);
        assert_eq!(ages[1].age_minutes, 10);
    }
}
