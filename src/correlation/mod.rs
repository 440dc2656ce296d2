/// Alert grouping into correlated alerts
pub mod correlator;
/// Pairwise similarity policies
pub mod policy;

pub use correlator::{CorrelatedAlert, CorrelationKind, Correlator};
pub use policy::{extract_keywords, KeywordSeverityPolicy, SimilarityPolicy};
