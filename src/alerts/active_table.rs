use crate::correlation::CorrelatedAlert;
use crate::events::{Severity, Timestamp};
use chrono::Duration;
use log::debug;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// A currently relevant alert and its history across cycles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveAlertEntry {
    pub alert: CorrelatedAlert,
    pub first_seen: Timestamp,
    pub last_seen: Timestamp,
    pub occurrence_count: u32,
}

/// Rolling set of active alerts keyed by correlated alert id
///
/// Every key maps to exactly one current alert; an upsert replaces the
/// stored alert and keeps `first_seen`.
#[derive(Debug)]
pub struct ActiveAlertTable {
    retention: Duration,
    entries: HashMap<String, ActiveAlertEntry>,
}

impl ActiveAlertTable {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            entries: HashMap::new(),
        }
    }

    /// Insert or refresh an alert seen at `now`
    pub fn upsert(&mut self, alert: CorrelatedAlert, now: Timestamp) -> &ActiveAlertEntry {
        match self.entries.entry(alert.id.clone()) {
            Entry::Occupied(occupied) => {
                let entry = occupied.into_mut();
                entry.alert = alert;
                entry.last_seen = entry.last_seen.max(now);
                entry.occurrence_count = entry.occurrence_count.saturating_add(1);
                entry
            }
            Entry::Vacant(vacant) => vacant.insert(ActiveAlertEntry {
                alert,
                first_seen: now,
                last_seen: now,
                occurrence_count: 1,
            }),
        }
    }

    /// Drop entries whose `last_seen` is older than the retention window
    pub fn cleanup(&mut self, now: Timestamp) -> usize {
        let cutoff = now - self.retention;
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.last_seen >= cutoff);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!("Removed {} expired active alerts", removed);
        }
        removed
    }

    pub fn get(&self, key: &str) -> Option<&ActiveAlertEntry> {
        self.entries.get(key)
    }

    /// Entries ordered by severity (highest first), then key
    pub fn entries(&self) -> Vec<&ActiveAlertEntry> {
        let mut entries: Vec<&ActiveAlertEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| {
            (Reverse(a.alert.severity), &a.alert.id).cmp(&(Reverse(b.alert.severity), &b.alert.id))
        });
        entries
    }

    /// Owned copy of the ordered entries for reporting
    pub fn snapshot(&self) -> Vec<ActiveAlertEntry> {
        self.entries().into_iter().cloned().collect()
    }

    pub fn count_at_least(&self, severity: Severity) -> usize {
        self.entries
            .values()
            .filter(|entry| entry.alert.severity >= severity)
            .count()
    }

    pub fn max_severity(&self) -> Option<Severity> {
        self.entries.values().map(|entry| entry.alert.severity).max()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ActiveAlertTable {
    fn default() -> Self {
        Self::new(Duration::hours(1))
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use crate::events::RawAlert;
    use chrono::{TimeZone, Utc};
    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn prop_cleanup_leaves_no_stale_entries(offsets: Vec<(u8, u16)>, retention_minutes: u8) -> bool {
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let mut table = ActiveAlertTable::new(Duration::minutes(retention_minutes as i64));

        for (key, minute) in &offsets {
            let seen = base + Duration::minutes(*minute as i64 % 600);
            let raw = RawAlert::new(format!("src{}", key % 20), Severity::Warning, "flapping check", seen);
            table.upsert(CorrelatedAlert::individual(raw), seen);
        }

        let now = base + Duration::minutes(600);
        table.cleanup(now);
        let cutoff = now - Duration::minutes(retention_minutes as i64);
        table.entries().iter().all(|entry| entry.last_seen >= cutoff)
    }
}
