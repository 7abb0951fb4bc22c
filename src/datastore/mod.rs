//! Live, mutable state of every running pipeline
//!
//! A [`Datastore`] holds the latest [`PipelineState`] per pipeline id. It is
//! shared by all pipelines in the process: writers of one id are serialized,
//! writers of distinct ids are not.

mod memory;

pub use memory::InMemoryDatastore;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::pipeline::{PipelineId, PipelineStage};
use crate::scorer::BestPerformer;
use crate::Result;

/// Latest known state of one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    /// Pipeline
    pub pipeline_id: PipelineId,
    /// Configuration it runs with
    pub config: PipelineConfig,
    /// Current stage
    pub stage: PipelineStage,
    /// Current generation
    pub iteration: u64,
    /// Best performer so far
    pub best_performer: Option<BestPerformer>,
    /// Last update
    pub updated_at: DateTime<Utc>,
}

impl PipelineState {
    /// Fresh state of a pipeline that has not started iterating.
    #[must_use]
    pub const fn created(
        pipeline_id: PipelineId,
        config: PipelineConfig,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            pipeline_id,
            config,
            stage: PipelineStage::Created,
            iteration: 0,
            best_performer: None,
            updated_at: now,
        }
    }
}

/// Key/record store for live pipeline state.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Ids of all stored pipelines.
    async fn list_pipeline_ids(&self) -> Result<BTreeSet<PipelineId>>;

    /// States of the given pipelines; unknown ids are skipped.
    async fn get_pipelines(&self, ids: &[PipelineId]) -> Result<Vec<PipelineState>>;

    /// Store a new pipeline.
    ///
    /// # Errors
    ///
    /// With `check_conflicts`, returns [`crate::Error::PipelineConflict`] if the
    /// id is already stored; otherwise an existing state is overwritten.
    async fn create_pipeline(&self, state: PipelineState, check_conflicts: bool) -> Result<()>;

    /// Insert or overwrite states.
    async fn write_pipelines(&self, states: Vec<PipelineState>) -> Result<()>;

    /// Remove a pipeline. No-op if absent.
    async fn delete_pipeline(&self, pipeline_id: &PipelineId) -> Result<()>;
}
