//! In-memory history store using `DashMap`.
//!
//! Data is lost on process restart.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use super::{HistoryDatastore, PipelineHistoryState};
use crate::pipeline::PipelineId;
use crate::Result;

/// In-memory [`HistoryDatastore`].
///
/// The per-id shard lock of the map serializes writers of one pipeline while
/// other pipelines write concurrently. Each write is a binary-search insert.
#[derive(Debug, Default)]
pub struct MemoryHistoryDatastore {
    states: DashMap<PipelineId, Vec<PipelineHistoryState>>,
}

impl MemoryHistoryDatastore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of snapshots across all pipelines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.iter().map(|entry| entry.value().len()).sum()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[async_trait]
impl HistoryDatastore for MemoryHistoryDatastore {
    async fn write_state(&self, state: PipelineHistoryState) -> Result<()> {
        debug!(
            pipeline_id = %state.pipeline_id(),
            iteration = state.iteration(),
            "history state written"
        );
        let mut timeline = self.states.entry(state.pipeline_id().clone()).or_default();
        let at = timeline.partition_point(|s| s.end_timestamp() <= state.end_timestamp());
        timeline.insert(at, state);
        Ok(())
    }

    async fn list_pipeline_ids(&self) -> Result<BTreeSet<PipelineId>> {
        Ok(self.states.iter().map(|entry| entry.key().clone()).collect())
    }

    async fn get_states_for_pipeline_id(
        &self,
        pipeline_id: &PipelineId,
    ) -> Result<Vec<PipelineHistoryState>> {
        Ok(self
            .states
            .get(pipeline_id)
            .map(|timeline| timeline.value().clone())
            .unwrap_or_default())
    }

    async fn get_states_for_pipeline_id_after(
        &self,
        pipeline_id: &PipelineId,
        after: DateTime<Utc>,
    ) -> Result<Vec<PipelineHistoryState>> {
        Ok(self
            .states
            .get(pipeline_id)
            .map(|timeline| {
                let start = timeline.partition_point(|s| s.end_timestamp() <= after);
                timeline[start..].to_vec()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn state(id: &str, iteration: u64, ms: i64) -> PipelineHistoryState {
        PipelineHistoryState::builder(PipelineId::new(id), iteration, at(ms)).build()
    }

    #[tokio::test]
    async fn test_out_of_order_writes_are_sorted() {
        let store = MemoryHistoryDatastore::new();
        for (iteration, ms) in [(3, 300), (1, 100), (2, 200)] {
            store.write_state(state("p", iteration, ms)).await.unwrap();
        }

        let iterations: Vec<u64> = store
            .get_states_for_pipeline_id(&PipelineId::new("p"))
            .await
            .unwrap()
            .iter()
            .map(PipelineHistoryState::iteration)
            .collect();
        assert_eq!(iterations, vec![1, 2, 3]);
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_equal_timestamps_keep_insertion_order() {
        let store = MemoryHistoryDatastore::new();
        store.write_state(state("p", 1, 100)).await.unwrap();
        store.write_state(state("p", 2, 100)).await.unwrap();

        let states = store.get_states_for_pipeline_id(&PipelineId::new("p")).await.unwrap();
        assert_eq!(states[0].iteration(), 1);
        assert_eq!(states[1].iteration(), 2);
    }

    #[tokio::test]
    async fn test_after_is_strict() {
        let store = MemoryHistoryDatastore::new();
        for (iteration, ms) in [(1, 100), (2, 200), (3, 300)] {
            store.write_state(state("p", iteration, ms)).await.unwrap();
        }
        let id = PipelineId::new("p");

        let after = store.get_states_for_pipeline_id_after(&id, at(200)).await.unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].iteration(), 3);
        assert_eq!(store.get_states_for_pipeline_id_after(&id, at(99)).await.unwrap().len(), 3);
        assert!(store.get_states_for_pipeline_id_after(&id, at(300)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_pipeline_is_empty() {
        let store = MemoryHistoryDatastore::new();
        let id = PipelineId::new("missing");
        assert!(store.get_states_for_pipeline_id(&id).await.unwrap().is_empty());
        assert!(store.get_states_for_pipeline_id_after(&id, at(0)).await.unwrap().is_empty());
        assert!(store.list_pipeline_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_writers() {
        let store = Arc::new(MemoryHistoryDatastore::new());
        let mut handles = vec![];

        for i in 0..50_i64 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let id = if i % 2 == 0 { "even" } else { "odd" };
                store
                    .write_state(state(id, u64::try_from(i).unwrap(), 1_000 - i))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len(), 50);
        let ids = store.list_pipeline_ids().await.unwrap();
        assert_eq!(ids.len(), 2);
        for id in ids {
            let states = store.get_states_for_pipeline_id(&id).await.unwrap();
            assert!(states
                .windows(2)
                .all(|w| w[0].end_timestamp() <= w[1].end_timestamp()));
        }
    }
}
