//! In-memory live-state store using `DashMap`.
//!
//! This is the default backend - data is lost on process restart.

use std::collections::BTreeSet;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{Datastore, PipelineState};
use crate::pipeline::PipelineId;
use crate::{Error, Result};

/// In-memory [`Datastore`].
#[derive(Debug, Default)]
pub struct InMemoryDatastore {
    pipelines: DashMap<PipelineId, PipelineState>,
}

impl InMemoryDatastore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored pipelines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

#[async_trait]
impl Datastore for InMemoryDatastore {
    async fn list_pipeline_ids(&self) -> Result<BTreeSet<PipelineId>> {
        Ok(self.pipelines.iter().map(|e| e.key().clone()).collect())
    }

    async fn get_pipelines(&self, ids: &[PipelineId]) -> Result<Vec<PipelineState>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.pipelines.get(id).map(|e| e.value().clone()))
            .collect())
    }

    async fn create_pipeline(&self, state: PipelineState, check_conflicts: bool) -> Result<()> {
        match self.pipelines.entry(state.pipeline_id.clone()) {
            Entry::Occupied(_) if check_conflicts => Err(Error::PipelineConflict(state.pipeline_id)),
            Entry::Occupied(mut entry) => {
                entry.insert(state);
                Ok(())
            }
            Entry::Vacant(entry) => {
                entry.insert(state);
                Ok(())
            }
        }
    }

    async fn write_pipelines(&self, states: Vec<PipelineState>) -> Result<()> {
        for state in states {
            self.pipelines.insert(state.pipeline_id.clone(), state);
        }
        Ok(())
    }

    async fn delete_pipeline(&self, pipeline_id: &PipelineId) -> Result<()> {
        self.pipelines.remove(pipeline_id);
        Ok(())
    }
}
