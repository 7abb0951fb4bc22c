//! Population health check after each generate step.

use serde::{Deserialize, Serialize};

use crate::config::ValidationConfig;
use crate::experiment::{SubjectHealth, SubjectRecord};
use crate::subject::SubjectKey;

/// How the population fared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Every subject is healthy
    Healthy,
    /// Some subjects are unhealthy; score the rest
    Degraded,
    /// Too few healthy subjects; fail the pipeline
    BelowFloor,
}

/// Result of validating one generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Subjects in the generation
    pub total: usize,
    /// Healthy subjects, controls included
    pub healthy: usize,
    /// Healthy experimental subjects
    pub healthy_experimental: usize,
    /// Unhealthy subjects and why
    pub unhealthy: Vec<(SubjectKey, String)>,
    /// Overall verdict
    pub verdict: Verdict,
}

impl ValidationReport {
    /// Share of healthy subjects; 0 for an empty population.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn healthy_fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.healthy as f64 / self.total as f64
        }
    }
}

/// Iteration-scoped health checker.
#[derive(Debug, Clone)]
pub struct Validator {
    config: ValidationConfig,
}

impl Validator {
    /// Create a validator with the given health bounds.
    #[must_use]
    pub const fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Validate a generation's records.
    ///
    /// Pending records count as unhealthy.
    #[must_use]
    pub fn validate(&self, records: &[&SubjectRecord]) -> ValidationReport {
        let mut healthy = 0;
        let mut healthy_experimental = 0;
        let mut unhealthy = Vec::new();

        for record in records {
            match record.health() {
                SubjectHealth::Healthy => {
                    healthy += 1;
                    if !record.is_control() {
                        healthy_experimental += 1;
                    }
                }
                SubjectHealth::Unhealthy { reason } => {
                    unhealthy.push((record.subject().clone(), reason.clone()));
                }
                SubjectHealth::Pending => {
                    unhealthy.push((record.subject().clone(), "never configured".to_string()));
                }
            }
        }

        let mut report = ValidationReport {
            total: records.len(),
            healthy,
            healthy_experimental,
            unhealthy,
            verdict: Verdict::Healthy,
        };
        report.verdict = if report.total == 0
            || report.healthy_fraction() < self.config.min_healthy_fraction
            || healthy_experimental < self.config.min_healthy_subjects
        {
            Verdict::BelowFloor
        } else if report.unhealthy.is_empty() {
            Verdict::Healthy
        } else {
            Verdict::Degraded
        };
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::CandidateConfig;

    fn record(index: usize, control: bool, healthy: bool) -> SubjectRecord {
        let mut record = SubjectRecord::new(
            SubjectKey {
                group: "xx/tuner/frontend".to_string(),
                index,
            },
            1,
            CandidateConfig::new(),
        )
        .control(control);
        if healthy {
            record.mark_healthy();
        } else {
            record.mark_unhealthy("restart failed");
        }
        record
    }

    fn validate(records: &[SubjectRecord], floor: f64) -> ValidationReport {
        let validator = Validator::new(ValidationConfig {
            min_healthy_fraction: floor,
            min_healthy_subjects: 1,
        });
        validator.validate(&records.iter().collect::<Vec<_>>())
    }

    #[test]
    fn test_all_healthy() {
        let report = validate(&[record(0, false, true), record(1, true, true)], 0.5);
        assert_eq!(report.verdict, Verdict::Healthy);
        assert_eq!(report.healthy_experimental, 1);
    }

    #[test]
    fn test_degraded_above_floor() {
        let report = validate(
            &[record(0, false, true), record(1, false, true), record(2, false, false)],
            0.5,
        );
        assert_eq!(report.verdict, Verdict::Degraded);
        assert_eq!(report.unhealthy.len(), 1);
        assert_eq!(report.unhealthy[0].0.index, 2);
    }

    #[test]
    fn test_below_fraction_floor() {
        let report = validate(
            &[record(0, false, true), record(1, false, false), record(2, false, false)],
            0.5,
        );
        assert_eq!(report.verdict, Verdict::BelowFloor);
    }

    #[test]
    fn test_only_controls_healthy_is_below_floor() {
        let report = validate(&[record(0, false, false), record(1, true, true)], 0.0);
        assert_eq!(report.verdict, Verdict::BelowFloor);
    }

    #[test]
    fn test_empty_population_is_below_floor() {
        assert_eq!(validate(&[], 0.0).verdict, Verdict::BelowFloor);
    }
}
