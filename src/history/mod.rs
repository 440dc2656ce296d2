/// Time-bounded per-metric sample storage
pub mod historical_store;

pub use historical_store::{HistoricalStore, Sample, ALERT_COUNT_SUFFIX, ALERTS_TOTAL_METRIC};
