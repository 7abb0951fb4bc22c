//! Proposal of each generation's candidate configurations
//!
//! A [`Hypothesizer`] sees the flag space, the historical best performer and
//! the pipeline's history, and proposes one candidate per experimental
//! subject. Control subjects always run [`ParameterSpace::baseline`] and are
//! not part of the request.

mod neighborhood;

pub use neighborhood::NeighborhoodHypothesizer;

use crate::experiment::{CandidateConfig, ParameterSpace};
use crate::history::PipelineHistoryState;
use crate::scorer::BestPerformer;
use crate::Result;

/// Everything a hypothesizer may consult for one generation.
#[derive(Debug, Clone, Copy)]
pub struct HypothesisRequest<'a> {
    /// Generation being proposed (1-based)
    pub generation: u64,
    /// Number of candidates wanted
    pub slots: usize,
    /// Tunable flags
    pub space: &'a ParameterSpace,
    /// Best performer across earlier generations
    pub best: Option<&'a BestPerformer>,
    /// Earlier iteration snapshots, oldest first
    pub history: &'a [PipelineHistoryState],
}

/// Proposes candidate configurations.
pub trait Hypothesizer: Send + Sync {
    /// Exactly `request.slots` candidates, each inside `request.space`.
    ///
    /// # Errors
    ///
    /// A failure here fails the iteration's HYPOTHESIZE step.
    fn propose(&mut self, request: &HypothesisRequest<'_>) -> Result<Vec<CandidateConfig>>;
}
