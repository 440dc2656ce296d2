use crate::config::CorrelationConfig;
use crate::events::RawAlert;
use chrono::Duration;
use std::collections::BTreeSet;

/// Words too common in alert text to indicate a shared cause
const STOP_WORDS: &[&str] = &[
    "and", "are", "for", "from", "has", "have", "into", "not", "the", "this", "that", "was",
    "were", "with",
];

/// Minimum keyword length
const MIN_KEYWORD_LEN: usize = 3;

/// Decides whether two raw alerts are likely manifestations of one problem
pub trait SimilarityPolicy: Send + Sync {
    /// Whether `a` and `b` belong in the same correlation group
    fn similar(&self, a: &RawAlert, b: &RawAlert) -> bool;

    /// Get a human-readable name for this policy
    fn name(&self) -> &str;
}

/// Lowercase alphanumeric tokens of at least three characters, minus stop words
pub fn extract_keywords(message: &str) -> BTreeSet<String> {
    message
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() >= MIN_KEYWORD_LEN)
        .map(str::to_lowercase)
        .filter(|token| !STOP_WORDS.contains(&token.as_str()))
        .collect()
}

/// Keyword overlap or severity match within a time window
///
/// Two alerts are similar when they fall within `window` of each other and
/// either their keyword sets overlap by more than `overlap_threshold`
/// (intersection over union), or they share a severity and at least
/// `min_shared_keywords` keywords.
#[derive(Debug, Clone)]
pub struct KeywordSeverityPolicy {
    pub overlap_threshold: f64,
    pub window: Duration,
    pub min_shared_keywords: usize,
}

impl KeywordSeverityPolicy {
    pub fn new(overlap_threshold: f64, window: Duration, min_shared_keywords: usize) -> Self {
        Self {
            overlap_threshold,
            window,
            min_shared_keywords,
        }
    }

    pub fn from_config(config: &CorrelationConfig) -> Self {
        Self::new(
            config.keyword_overlap_threshold,
            config.window(),
            config.min_shared_keywords,
        )
    }

    fn within_window(&self, a: &RawAlert, b: &RawAlert) -> bool {
        (a.timestamp - b.timestamp).abs() <= self.window
    }
}

impl Default for KeywordSeverityPolicy {
    fn default() -> Self {
        Self::from_config(&CorrelationConfig::default())
    }
}

impl SimilarityPolicy for KeywordSeverityPolicy {
    fn similar(&self, a: &RawAlert, b: &RawAlert) -> bool {
        if !self.within_window(a, b) {
            return false;
        }

        let keywords_a = extract_keywords(&a.message);
        let keywords_b = extract_keywords(&b.message);
        let shared = keywords_a.intersection(&keywords_b).count();
        if shared == 0 {
            return false;
        }

        let union = keywords_a.union(&keywords_b).count();
        let overlap = shared as f64 / union as f64;

        overlap > self.overlap_threshold
            || (a.severity == b.severity && shared >= self.min_shared_keywords)
    }

    fn name(&self) -> &str {
        "keyword_severity"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Severity;
    use chrono::Utc;

    fn alert(source: &str, severity: Severity, message: &str, offset_secs: i64) -> RawAlert {
        RawAlert::new(source, severity, message, Utc::now() + Duration::seconds(offset_secs))
    }

    #[test]
    fn test_extract_keywords() {
        let keywords = extract_keywords("Memory exhausted on db-01: the OOM killer ran");
        let expected: BTreeSet<String> = ["memory", "exhausted", "oom", "killer", "ran"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(keywords, expected);
        assert!(extract_keywords("ok").is_empty());
    }

    #[test]
    fn test_same_severity_with_shared_keyword() {
        let policy = KeywordSeverityPolicy::default();
        let a = alert("sysA", Severity::Critical, "memory exhausted", 0);
        let b = alert("sysB", Severity::Critical, "memory exhaustion detected", 10);
        // Overlap is 1/4, below 0.3, but severity matches
        assert!(policy.similar(&a, &b));
    }

    #[test]
    fn test_high_overlap_across_severities() {
        let policy = KeywordSeverityPolicy::default();
        let a = alert("api", Severity::Warning, "database connection pool saturated", 0);
        let b = alert("worker", Severity::High, "database connection pool timeout", 60);
        assert!(policy.similar(&a, &b));
    }

    #[test]
    fn test_low_overlap_different_severity() {
        let policy = KeywordSeverityPolicy::default();
        let a = alert("sysA", Severity::Critical, "memory exhausted", 0);
        let b = alert("sysB", Severity::Warning, "memory exhaustion detected", 10);
        assert!(!policy.similar(&a, &b));
    }

    #[test]
    fn test_outside_window() {
        let policy = KeywordSeverityPolicy::default();
        let a = alert("sysA", Severity::Critical, "memory exhausted", 0);
        let b = alert("sysB", Severity::Critical, "memory exhausted", 301);
        assert!(!policy.similar(&a, &b));
        assert!(!policy.similar(&b, &a));
    }

    #[test]
    fn test_same_severity_still_needs_a_shared_keyword() {
        let policy = KeywordSeverityPolicy::new(0.3, Duration::seconds(300), 0);
        let a = alert("a", Severity::Info, "dns ok", 0);
        let b = alert("b", Severity::Info, "disk full", 0);
        assert!(!policy.similar(&a, &b));
    }
}
