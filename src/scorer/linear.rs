//! Weighted linear combination of sub-metrics.

use std::collections::BTreeMap;

use tracing::debug;

use super::{SubjectMetrics, SubjectScorer};

/// `score = Σ weight(metric) × value(metric)`.
///
/// Metrics without a weight are ignored; weighted metrics a subject did not
/// report contribute nothing. Negative weights express "lower is better"
/// metrics such as latency.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearCombinationScorer {
    weights: BTreeMap<String, f64>,
}

impl LinearCombinationScorer {
    /// Create a scorer from metric weights.
    #[must_use]
    pub const fn new(weights: BTreeMap<String, f64>) -> Self {
        Self { weights }
    }

    /// Configured weights.
    #[must_use]
    pub const fn weights(&self) -> &BTreeMap<String, f64> {
        &self.weights
    }
}

impl SubjectScorer for LinearCombinationScorer {
    fn score(&self, metrics: &SubjectMetrics) -> f64 {
        self.weights
            .iter()
            .map(|(name, weight)| match metrics.get(name) {
                Some(value) if value.is_finite() => weight * value,
                Some(_) | None => {
                    debug!(metric = %name, "metric missing or non-finite, contributes 0");
                    0.0
                }
            })
            .sum()
    }
}
