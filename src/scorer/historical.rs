//! Cross-generation best performer tracking.
//!
//! Later generations are trusted more: a newer score is compared against the
//! incumbent after both are weighted by their own generation number, so a
//! slightly lower score observed much later can displace an older best.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::experiment::CandidateConfig;
use crate::history::PipelineHistoryState;

/// How a generation number turns into a trust weight.
///
/// Generations are 1-based; generation 0 is weighted as generation 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationWeighting {
    /// `w(g) = g`
    #[default]
    Linear,
    /// `w(g) = 1 + ln(g)`
    Logarithmic,
    /// `w(g) = 1`; plain best-score-wins
    Constant,
}

impl GenerationWeighting {
    /// Weight of generation `generation`. Always at least 1.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn weight(self, generation: u64) -> f64 {
        let g = generation.max(1) as f64;
        match self {
            Self::Linear => g,
            Self::Logarithmic => 1.0 + g.ln(),
            Self::Constant => 1.0,
        }
    }

    /// `score` weighted by generation `generation`.
    ///
    /// Negative scores are divided instead of multiplied so a larger weight
    /// always moves a score upward.
    #[must_use]
    pub fn weighted(self, score: f64, generation: u64) -> f64 {
        let weight = self.weight(generation);
        if score >= 0.0 {
            score * weight
        } else {
            score / weight
        }
    }
}

/// Best configuration seen so far across generations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestPerformer {
    /// Winning configuration
    pub candidate: CandidateConfig,
    /// Raw (unweighted) fitness it scored
    pub score: f64,
    /// Generation it scored in
    pub generation: u64,
}

/// Keeps the best performer across generations.
pub trait HistoricalBestPerformerScorer: Send + Sync {
    /// Current best, if any generation has been offered.
    fn best(&self) -> Option<&BestPerformer>;

    /// Offer a generation's champion. Returns `true` if it became the new best.
    fn offer(&mut self, candidate: &CandidateConfig, score: f64, generation: u64) -> bool;

    /// Restore the best performer from a pipeline's history.
    ///
    /// States are expected in ascending `end_timestamp` order; the last one
    /// carrying a best performer wins.
    fn seed_from_history(&mut self, states: &[PipelineHistoryState]);
}

/// [`HistoricalBestPerformerScorer`] that weights scores by generation number.
///
/// A new champion replaces the incumbent iff
/// `weighted(new, g_new) > weighted(best, g_best)`. Ties keep the incumbent.
#[derive(Debug, Clone, Default)]
pub struct GenerationNumberWeightedBestPerformerScorer {
    weighting: GenerationWeighting,
    best: Option<BestPerformer>,
}

impl GenerationNumberWeightedBestPerformerScorer {
    /// Create an empty scorer.
    #[must_use]
    pub const fn new(weighting: GenerationWeighting) -> Self {
        Self {
            weighting,
            best: None,
        }
    }

    /// Weighting in use.
    #[must_use]
    pub const fn weighting(&self) -> GenerationWeighting {
        self.weighting
    }
}

impl HistoricalBestPerformerScorer for GenerationNumberWeightedBestPerformerScorer {
    fn best(&self) -> Option<&BestPerformer> {
        self.best.as_ref()
    }

    fn offer(&mut self, candidate: &CandidateConfig, score: f64, generation: u64) -> bool {
        if !score.is_finite() {
            return false;
        }
        let replace = self.best.as_ref().map_or(true, |best| {
            self.weighting.weighted(score, generation)
                > self.weighting.weighted(best.score, best.generation)
        });
        if replace {
            info!(generation, score, "new best performer");
            self.best = Some(BestPerformer {
                candidate: candidate.clone(),
                score,
                generation,
            });
        }
        replace
    }

    fn seed_from_history(&mut self, states: &[PipelineHistoryState]) {
        if let Some(best) = states.iter().rev().find_map(|s| s.best_performer().cloned()) {
            info!(
                generation = best.generation,
                score = best.score,
                "best performer restored from history"
            );
            self.best = Some(best);
        }
    }
}
