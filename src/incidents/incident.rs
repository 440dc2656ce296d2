use crate::alerts::ActiveAlertEntry;
use crate::events::{Severity, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Durable incident record written to storage
    IncidentRecord,
    /// Notification that bypasses rate limiting
    EmergencyNotification,
    Notification,
    /// Monitoring loop switched to its elevated period
    ElevatedMonitoring,
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionType::IncidentRecord => "incident_record",
            ActionType::EmergencyNotification => "emergency_notification",
            ActionType::Notification => "notification",
            ActionType::ElevatedMonitoring => "elevated_monitoring",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Completed,
    Failed,
}

/// One automated response attempt, immutable once recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseAction {
    pub action_type: ActionType,
    pub target: String,
    pub status: ActionStatus,
    pub initiated_at: Timestamp,
    /// Outcome details, including the error for failed actions
    #[serde(default)]
    pub detail: String,
}

impl ResponseAction {
    pub fn completed(action_type: ActionType, target: impl Into<String>, at: Timestamp, detail: impl Into<String>) -> Self {
        Self {
            action_type,
            target: target.into(),
            status: ActionStatus::Completed,
            initiated_at: at,
            detail: detail.into(),
        }
    }

    pub fn failed(action_type: ActionType, target: impl Into<String>, at: Timestamp, error: impl fmt::Display) -> Self {
        Self {
            action_type,
            target: target.into(),
            status: ActionStatus::Failed,
            initiated_at: at,
            detail: error.to_string(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == ActionStatus::Failed
    }
}

/// A confirmed operational problem that needs tracking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub status: IncidentStatus,
    pub severity: Severity,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<Timestamp>,
    /// Active alert table key of the alert that opened the incident
    pub source_alert_id: String,
    pub description: String,
    pub impact_assessment: String,
    /// Appended while open, never removed
    pub response_actions: Vec<ResponseAction>,
}

impl Incident {
    /// Open a new incident for an active alert
    pub fn open(entry: &ActiveAlertEntry, now: Timestamp) -> Self {
        let alert = &entry.alert;
        let sources: Vec<&str> = alert.sources.iter().map(String::as_str).collect();
        Self {
            id: Uuid::new_v4().to_string(),
            status: IncidentStatus::Open,
            severity: alert.severity,
            created_at: now,
            closed_at: None,
            source_alert_id: alert.id.clone(),
            description: alert.message.clone(),
            impact_assessment: format!(
                "{} severity affecting {} ({} raw alerts, seen {} times since {}, confidence {:.0}%)",
                alert.severity,
                sources.join(", "),
                alert.alerts.len(),
                entry.occurrence_count,
                entry.first_seen.to_rfc3339(),
                alert.confidence * 100.0
            ),
            response_actions: Vec::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == IncidentStatus::Open
    }

    pub fn failed_actions(&self) -> usize {
        self.response_actions.iter().filter(|a| a.is_failed()).count()
    }

    pub fn age(&self, now: Timestamp) -> IncidentAge {
        IncidentAge {
            id: self.id.clone(),
            severity: self.severity,
            source_alert_id: self.source_alert_id.clone(),
            description: self.description.clone(),
            created_at: self.created_at,
            age_minutes: (now - self.created_at).num_minutes().max(0),
        }
    }
}

/// How long an open incident has been open
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentAge {
    pub id: String,
    pub severity: Severity,
    pub source_alert_id: String,
    pub description: String,
    pub created_at: Timestamp,
    pub age_minutes: i64,
}
