//! Experiment Db - per-pipeline record of what every subject ran
//!
//! Generations are kept in order; within a generation records are keyed by
//! subject, so per-subject score series come back ordered by generation.

use std::collections::BTreeMap;

use super::SubjectRecord;
use crate::subject::SubjectKey;

/// In-memory database of subject records, grouped by generation.
#[derive(Debug, Default)]
pub struct ExperimentDb {
    generations: BTreeMap<u64, BTreeMap<SubjectKey, SubjectRecord>>,
}

impl ExperimentDb {
    /// Create a new empty experiment database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the database holds no generations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.generations.is_empty()
    }

    /// Number of generations recorded.
    #[must_use]
    pub fn generation_count(&self) -> usize {
        self.generations.len()
    }

    /// Highest generation recorded.
    #[must_use]
    pub fn current_generation(&self) -> Option<u64> {
        self.generations.keys().next_back().copied()
    }

    /// Start a generation with its initial records, replacing any previous
    /// attempt at the same generation.
    pub fn begin_generation(&mut self, generation: u64, records: Vec<SubjectRecord>) {
        let records = records
            .into_iter()
            .map(|record| (record.subject().clone(), record))
            .collect();
        self.generations.insert(generation, records);
    }

    /// Get a record.
    #[must_use]
    pub fn get(&self, generation: u64, subject: &SubjectKey) -> Option<&SubjectRecord> {
        self.generations.get(&generation)?.get(subject)
    }

    /// Get a record for update.
    pub fn get_mut(&mut self, generation: u64, subject: &SubjectKey) -> Option<&mut SubjectRecord> {
        self.generations.get_mut(&generation)?.get_mut(subject)
    }

    /// All records of a generation, ordered by subject.
    #[must_use]
    pub fn records_for_generation(&self, generation: u64) -> Vec<&SubjectRecord> {
        self.generations
            .get(&generation)
            .map(|records| records.values().collect())
            .unwrap_or_default()
    }

    /// Healthy records of a generation, ordered by subject.
    #[must_use]
    pub fn healthy_records(&self, generation: u64) -> Vec<&SubjectRecord> {
        self.records_for_generation(generation)
            .into_iter()
            .filter(|record| record.is_healthy())
            .collect()
    }

    /// `(generation, score)` series for one subject, ordered by generation.
    #[must_use]
    pub fn scores_for_subject(&self, subject: &SubjectKey) -> Vec<(u64, f64)> {
        self.generations
            .iter()
            .filter_map(|(generation, records)| {
                records
                    .get(subject)
                    .and_then(SubjectRecord::score)
                    .map(|score| (*generation, score))
            })
            .collect()
    }

    /// Drop generations older than `keep` most recent ones.
    pub fn retain_latest(&mut self, keep: usize) {
        while self.generations.len() > keep {
            self.generations.pop_first();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::CandidateConfig;

    fn key(index: usize) -> SubjectKey {
        SubjectKey {
            group: "xx/tuner/frontend".to_string(),
            index,
        }
    }

    fn record(index: usize, generation: u64) -> SubjectRecord {
        SubjectRecord::new(key(index), generation, CandidateConfig::new())
    }

    #[test]
    fn test_store_default() {
        let store = ExperimentDb::new();
        assert!(store.is_empty());
        assert_eq!(store.generation_count(), 0);
        assert_eq!(store.current_generation(), None);
    }

    #[test]
    fn test_healthy_records() {
        let mut store = ExperimentDb::new();
        store.begin_generation(1, vec![record(1, 1), record(0, 1)]);
        store.get_mut(1, &key(1)).unwrap().mark_healthy();
        store.get_mut(1, &key(0)).unwrap().mark_unhealthy("restart failed");

        assert_eq!(store.records_for_generation(1)[0].subject(), &key(0));
        let healthy = store.healthy_records(1);
        assert_eq!(healthy.len(), 1);
        assert_eq!(healthy[0].subject(), &key(1));
    }

    #[test]
    fn test_scores_for_subject_ordering() {
        let mut store = ExperimentDb::new();

        // Add out of order
        for generation in [3, 1, 2] {
            store.begin_generation(generation, vec![record(0, generation)]);
            #[allow(clippy::cast_precision_loss)]
            let score = generation as f64;
            store
                .get_mut(generation, &key(0))
                .unwrap()
                .record_score(Default::default(), score);
        }

        assert_eq!(
            store.scores_for_subject(&key(0)),
            vec![(1, 1.0), (2, 2.0), (3, 3.0)]
        );
        assert_eq!(store.current_generation(), Some(3));
    }

    #[test]
    fn test_retain_latest() {
        let mut store = ExperimentDb::new();
        for generation in 1..=5 {
            store.begin_generation(generation, vec![record(0, generation)]);
        }
        store.retain_latest(2);
        assert_eq!(store.generation_count(), 2);
        assert!(store.get(3, &key(0)).is_none());
        assert!(store.get(4, &key(0)).is_some());
    }
}
