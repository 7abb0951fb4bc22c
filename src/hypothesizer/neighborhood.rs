//! Random-walk search around the historical best.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::{HypothesisRequest, Hypothesizer};
use crate::config::HypothesizerConfig;
use crate::experiment::{CandidateConfig, ParameterRange, ParameterSpace};
use crate::Result;

/// Attempts at finding an untried candidate before accepting a repeat.
const MAX_DRAWS: usize = 16;

/// Neighborhood search.
///
/// - No best yet: every slot is sampled uniformly from the space.
/// - Otherwise slot 0 re-runs the best itself, and each other slot is either a
///   uniform sample (probability `exploration_rate`) or the best moved by up
///   to `radius_steps` steps per flag.
///
/// Candidates already tried in earlier generations, or earlier in the same
/// generation, are redrawn a bounded number of times.
#[derive(Debug)]
pub struct NeighborhoodHypothesizer {
    exploration_rate: f64,
    radius_steps: i64,
    rng: StdRng,
}

impl NeighborhoodHypothesizer {
    /// Create from configuration; `seed: None` seeds from OS entropy.
    #[must_use]
    pub fn new(config: &HypothesizerConfig) -> Self {
        let rng = config
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);
        Self {
            exploration_rate: if config.exploration_rate.is_nan() {
                0.0
            } else {
                config.exploration_rate.clamp(0.0, 1.0)
            },
            radius_steps: config.radius_steps.max(1),
            rng,
        }
    }

    fn uniform(&mut self, space: &ParameterSpace) -> CandidateConfig {
        let mut candidate = CandidateConfig::new();
        for range in space.ranges() {
            let offset = self.rng.gen_range(0..range.cardinality());
            candidate.set(range.flag.clone(), range.min + offset * range.step);
        }
        candidate
    }

    fn neighbor(&mut self, space: &ParameterSpace, center: &CandidateConfig) -> CandidateConfig {
        let mut candidate = CandidateConfig::new();
        for range in space.ranges() {
            let origin = center.get(&range.flag).unwrap_or(range.default);
            let moved = origin.saturating_add(self.step_offset(range));
            candidate.set(range.flag.clone(), range.normalize(moved));
        }
        candidate
    }

    fn step_offset(&mut self, range: &ParameterRange) -> i64 {
        self.rng
            .gen_range(-self.radius_steps..=self.radius_steps)
            .saturating_mul(range.step)
    }
}

impl Hypothesizer for NeighborhoodHypothesizer {
    fn propose(&mut self, request: &HypothesisRequest<'_>) -> Result<Vec<CandidateConfig>> {
        let space = request.space;
        let mut seen: HashSet<CandidateConfig> = request
            .history
            .iter()
            .flat_map(|state| state.subjects())
            .filter(|record| !record.is_control())
            .map(|record| record.candidate().clone())
            .collect();

        let best = request.best.map(|b| space.normalize(&b.candidate));
        let mut proposals = Vec::with_capacity(request.slots);

        for slot in 0..request.slots {
            let candidate = match &best {
                Some(best) if slot == 0 => best.clone(),
                Some(best) => {
                    let explore = self.rng.gen_bool(self.exploration_rate);
                    self.draw(&seen, |h| {
                        if explore {
                            h.uniform(space)
                        } else {
                            h.neighbor(space, best)
                        }
                    })
                }
                None => self.draw(&seen, |h| h.uniform(space)),
            };
            seen.insert(candidate.clone());
            proposals.push(candidate);
        }

        debug!(
            generation = request.generation,
            proposals = proposals.len(),
            has_best = best.is_some(),
            "hypotheses proposed"
        );
        Ok(proposals)
    }
}

impl NeighborhoodHypothesizer {
    fn draw(
        &mut self,
        seen: &HashSet<CandidateConfig>,
        mut sample: impl FnMut(&mut Self) -> CandidateConfig,
    ) -> CandidateConfig {
        let mut candidate = sample(self);
        for _ in 1..MAX_DRAWS {
            if !seen.contains(&candidate) {
                break;
            }
            candidate = sample(self);
        }
        candidate
    }
}
