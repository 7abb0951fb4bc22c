//! Per-iteration aggregation of subject scores.

use serde::{Deserialize, Serialize};

use crate::experiment::CandidateConfig;
use crate::subject::SubjectKey;

/// Fitness of one healthy subject in one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectScore {
    /// Which subject
    pub subject: SubjectKey,
    /// Whether it ran the baseline configuration
    pub control: bool,
    /// Configuration it ran
    pub candidate: CandidateConfig,
    /// Fitness (higher is better)
    pub score: f64,
}

/// Aggregate fitness of one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationScore {
    /// Generation number (1-based)
    pub generation: u64,
    /// Mean fitness of healthy experimental subjects
    pub mean: Option<f64>,
    /// Mean fitness of healthy control subjects
    pub baseline_mean: Option<f64>,
    /// Best-scoring experimental subject
    pub champion: Option<SubjectScore>,
    /// Number of subjects that contributed a score
    pub scored_subjects: usize,
}

impl IterationScore {
    /// Fitness gain of the experimental mean over the baseline mean.
    #[must_use]
    pub fn improvement_over_baseline(&self) -> Option<f64> {
        Some(self.mean? - self.baseline_mean?)
    }
}

/// Aggregates the subject scores of one iteration.
///
/// Created fresh for every iteration; the accumulated scores never outlive it.
#[derive(Debug, Default)]
pub struct IterationScorer {
    scores: Vec<SubjectScore>,
}

impl IterationScorer {
    /// Empty scorer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one subject's score; non-finite scores are dropped.
    pub fn add(&mut self, score: SubjectScore) {
        if score.score.is_finite() {
            self.scores.push(score);
        }
    }

    /// Scores recorded so far.
    #[must_use]
    pub fn scores(&self) -> &[SubjectScore] {
        &self.scores
    }

    /// Aggregate into the generation's [`IterationScore`].
    ///
    /// The champion is the highest experimental score; ties go to the lowest
    /// subject key so the result does not depend on completion order.
    #[must_use]
    pub fn finish(&self, generation: u64) -> IterationScore {
        let experimental: Vec<&SubjectScore> = self.scores.iter().filter(|s| !s.control).collect();
        let controls: Vec<&SubjectScore> = self.scores.iter().filter(|s| s.control).collect();

        let champion = experimental
            .iter()
            .copied()
            .max_by(|a, b| {
                a.score
                    .total_cmp(&b.score)
                    .then_with(|| b.subject.cmp(&a.subject))
            })
            .cloned();

        IterationScore {
            generation,
            mean: mean(&experimental),
            baseline_mean: mean(&controls),
            champion,
            scored_subjects: self.scores.len(),
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(scores: &[&SubjectScore]) -> Option<f64> {
    if scores.is_empty() {
        return None;
    }
    Some(scores.iter().map(|s| s.score).sum::<f64>() / scores.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(index: usize, control: bool, value: f64) -> SubjectScore {
        SubjectScore {
            subject: SubjectKey {
                group: "xx/tuner/frontend".to_string(),
                index,
            },
            control,
            candidate: CandidateConfig::new().with("-XX:NewRatio", i64::try_from(index).unwrap()),
            score: value,
        }
    }

    #[test]
    fn test_aggregates_experimental_and_baseline() {
        let mut scorer = IterationScorer::new();
        scorer.add(score(0, false, 4.0));
        scorer.add(score(1, false, 8.0));
        scorer.add(score(2, true, 3.0));

        let result = scorer.finish(3);
        assert_eq!(result.generation, 3);
        assert_eq!(result.mean, Some(6.0));
        assert_eq!(result.baseline_mean, Some(3.0));
        assert_eq!(result.improvement_over_baseline(), Some(3.0));
        assert_eq!(result.champion.unwrap().subject.index, 1);
        assert_eq!(result.scored_subjects, 3);
    }

    #[test]
    fn test_ties_go_to_lowest_subject() {
        let mut scorer = IterationScorer::new();
        scorer.add(score(5, false, 7.0));
        scorer.add(score(2, false, 7.0));

        assert_eq!(scorer.finish(1).champion.unwrap().subject.index, 2);
    }

    #[test]
    fn test_controls_never_champion() {
        let mut scorer = IterationScorer::new();
        scorer.add(score(0, true, 100.0));
        scorer.add(score(1, false, f64::NAN));

        let result = scorer.finish(1);
        assert!(result.champion.is_none());
        assert_eq!(result.mean, None);
        assert_eq!(result.scored_subjects, 1);
    }
}
