//! Subject Record - one subject's participation in one generation

use serde::{Deserialize, Serialize};

use super::CandidateConfig;
use crate::scorer::SubjectMetrics;
use crate::subject::SubjectKey;

/// Outcome of reconfiguring and observing a subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubjectHealth {
    /// Configuration not yet applied.
    Pending,
    /// Configuration applied and the subject is serving.
    Healthy,
    /// Configuration could not be applied or the subject stopped reporting.
    Unhealthy {
        /// What went wrong
        reason: String,
    },
}

/// Subject Record tracks what a subject ran in a generation and how it did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectRecord {
    subject: SubjectKey,
    generation: u64,
    candidate: CandidateConfig,
    control: bool,
    health: SubjectHealth,
    metrics: SubjectMetrics,
    score: Option<f64>,
}

impl SubjectRecord {
    /// Create a pending record.
    #[must_use]
    pub fn new(subject: SubjectKey, generation: u64, candidate: CandidateConfig) -> Self {
        Self {
            subject,
            generation,
            candidate,
            control: false,
            health: SubjectHealth::Pending,
            metrics: SubjectMetrics::new(),
            score: None,
        }
    }

    /// Mark the record as belonging to a control subject.
    #[must_use]
    pub const fn control(mut self, control: bool) -> Self {
        self.control = control;
        self
    }

    /// Subject key.
    #[must_use]
    pub const fn subject(&self) -> &SubjectKey {
        &self.subject
    }

    /// Generation number.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Configuration the subject was given.
    #[must_use]
    pub const fn candidate(&self) -> &CandidateConfig {
        &self.candidate
    }

    /// Whether the subject runs the baseline.
    #[must_use]
    pub const fn is_control(&self) -> bool {
        self.control
    }

    /// Current health.
    #[must_use]
    pub const fn health(&self) -> &SubjectHealth {
        &self.health
    }

    /// Whether the subject is healthy.
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        matches!(self.health, SubjectHealth::Healthy)
    }

    /// Observed sub-metrics.
    #[must_use]
    pub const fn metrics(&self) -> &SubjectMetrics {
        &self.metrics
    }

    /// Fitness, once scored.
    #[must_use]
    pub const fn score(&self) -> Option<f64> {
        self.score
    }

    /// Configuration applied successfully.
    pub fn mark_healthy(&mut self) {
        self.health = SubjectHealth::Healthy;
    }

    /// Configuration failed or the subject stopped reporting.
    pub fn mark_unhealthy(&mut self, reason: impl Into<String>) {
        self.health = SubjectHealth::Unhealthy {
            reason: reason.into(),
        };
        self.score = None;
    }

    /// Attach observed metrics and the fitness derived from them.
    pub fn record_score(&mut self, metrics: SubjectMetrics, score: f64) {
        self.metrics = metrics;
        self.score = Some(score);
    }
}
