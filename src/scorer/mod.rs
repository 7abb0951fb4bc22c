//! Fitness scoring at subject, iteration and cross-generation granularity
//!
//! ```text
//! MetricSource ──> SubjectMetrics ──SubjectScorer──> SubjectScore (per subject)
//!                                                        │
//!                                  IterationScorer <─────┘
//!                                        │
//!                                  IterationScore (mean, baseline, champion)
//!                                        │
//!                   HistoricalBestPerformerScorer (generation-weighted best)
//! ```

mod command;
mod historical;
mod iteration;
mod linear;

pub use command::{parse_metrics, CommandMetricSource};
pub use historical::{
    BestPerformer, GenerationNumberWeightedBestPerformerScorer, GenerationWeighting,
    HistoricalBestPerformerScorer,
};
pub use iteration::{IterationScore, IterationScorer, SubjectScore};
pub use linear::LinearCombinationScorer;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::subject::Subject;
use crate::Result;

/// Named sub-metrics reported by one subject (e.g. `throughput`, `p99_latency_ms`).
pub type SubjectMetrics = BTreeMap<String, f64>;

/// Collects sub-metrics from a running subject.
#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Observe `subject` after it has been reconfigured.
    ///
    /// # Errors
    ///
    /// Any error excludes the subject from this iteration's scoring.
    async fn observe(&self, subject: &Subject) -> Result<SubjectMetrics>;
}

/// Reduces a subject's sub-metrics to one fitness value (higher is better).
pub trait SubjectScorer: Send + Sync {
    /// Fitness of one subject.
    fn score(&self, metrics: &SubjectMetrics) -> f64;
}
