//! In-process population for dry runs and tests
//!
//! [`SimulatedPopulation`] answers censuses from a table of group sizes,
//! remembers which candidate each subject was given, and reports metrics by
//! evaluating an objective function over that candidate. Subjects can be made
//! to reject their configuration and censuses can be delayed or made to fail
//! transiently.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};

use super::{GroupIdentity, Subject, SubjectKey, SubjectManipulator};
use crate::experiment::CandidateConfig;
use crate::scorer::{MetricSource, SubjectMetrics};
use crate::{Error, Result};

/// Maps the candidate a subject runs to the metrics it would report.
pub type Objective = Arc<dyn Fn(&CandidateConfig) -> SubjectMetrics + Send + Sync>;

/// Simulated population.
pub struct SimulatedPopulation {
    populations: DashMap<String, usize>,
    census_delay: Duration,
    pending_census_failures: AtomicUsize,
    failing_subjects: DashSet<(String, usize)>,
    applied: DashMap<SubjectKey, CandidateConfig>,
    applications: AtomicUsize,
    objective: Objective,
}

impl SimulatedPopulation {
    /// Empty population; the default objective reports `throughput` as the
    /// sum of all flag values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            populations: DashMap::new(),
            census_delay: Duration::ZERO,
            pending_census_failures: AtomicUsize::new(0),
            failing_subjects: DashSet::new(),
            applied: DashMap::new(),
            applications: AtomicUsize::new(0),
            objective: Arc::new(|candidate: &CandidateConfig| {
                #[allow(clippy::cast_precision_loss)]
                let total = candidate.iter().map(|(_, v)| v as f64).sum::<f64>();
                BTreeMap::from([("throughput".to_string(), total)])
            }),
        }
    }

    /// Register a group of `size` subjects.
    #[must_use]
    pub fn with_group(self, name: impl Into<String>, size: usize) -> Self {
        self.populations.insert(name.into(), size);
        self
    }

    /// Delay every census by `delay`.
    #[must_use]
    pub const fn with_census_delay(mut self, delay: Duration) -> Self {
        self.census_delay = delay;
        self
    }

    /// Make subject `index` of `group` reject every configuration.
    #[must_use]
    pub fn with_failing_subject(self, group: impl Into<String>, index: usize) -> Self {
        self.failing_subjects.insert((group.into(), index));
        self
    }

    /// Replace the objective function.
    #[must_use]
    pub fn with_objective(
        mut self,
        objective: impl Fn(&CandidateConfig) -> SubjectMetrics + Send + Sync + 'static,
    ) -> Self {
        self.objective = Arc::new(objective);
        self
    }

    /// Make the next `count` censuses fail with a temporary failure.
    pub fn fail_next_censuses(&self, count: usize) {
        self.pending_census_failures.store(count, Ordering::SeqCst);
    }

    /// Change the size of a group.
    pub fn set_population(&self, name: &str, size: usize) {
        self.populations.insert(name.to_string(), size);
    }

    /// Candidate last applied to a subject.
    #[must_use]
    pub fn applied(&self, key: &SubjectKey) -> Option<CandidateConfig> {
        self.applied.get(key).map(|entry| entry.value().clone())
    }

    /// Total successful configuration applications.
    #[must_use]
    pub fn applications(&self) -> usize {
        self.applications.load(Ordering::SeqCst)
    }
}

impl Default for SimulatedPopulation {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SubjectManipulator for SimulatedPopulation {
    async fn population_size(&self, group: &GroupIdentity) -> Result<usize> {
        if !self.census_delay.is_zero() {
            tokio::time::sleep(self.census_delay).await;
        }
        let failed = self
            .pending_census_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(Error::temporary(format!("census of {group} unavailable")));
        }
        self.populations
            .get(&group.name)
            .map(|size| *size.value())
            .ok_or_else(|| Error::permanent(format!("no population named {}", group.name)))
    }

    async fn apply_configuration(
        &self,
        subject: &Subject,
        candidate: &CandidateConfig,
        _args: &[String],
    ) -> Result<()> {
        if self
            .failing_subjects
            .contains(&(subject.group().name.clone(), subject.index()))
        {
            return Err(Error::temporary(format!(
                "{} rejected its configuration",
                subject.key()
            )));
        }
        self.applied.insert(subject.key(), candidate.clone());
        self.applications.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl MetricSource for SimulatedPopulation {
    async fn observe(&self, subject: &Subject) -> Result<SubjectMetrics> {
        let candidate = self.applied(&subject.key()).ok_or_else(|| {
            Error::temporary(format!("{} has not been configured yet", subject.key()))
        })?;
        Ok((self.objective)(&candidate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(name: &str) -> GroupIdentity {
        GroupIdentity {
            cluster_name: "xx".to_string(),
            name: name.to_string(),
            user_name: "tuner".to_string(),
        }
    }

    #[tokio::test]
    async fn test_transient_census_failures_drain() {
        let population = SimulatedPopulation::new().with_group("frontend", 3);
        population.fail_next_censuses(2);

        assert!(population.population_size(&identity("frontend")).await.is_err());
        assert!(population.population_size(&identity("frontend")).await.is_err());
        assert_eq!(population.population_size(&identity("frontend")).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_unknown_group_is_permanent() {
        let population = SimulatedPopulation::new();
        let result = population.population_size(&identity("missing")).await;
        assert!(matches!(result, Err(Error::PermanentFailure(_))));
    }
}
