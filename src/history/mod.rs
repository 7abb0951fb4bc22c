//! Append-only, time-ordered record of every pipeline's iteration boundaries
//!
//! Each [`PipelineHistoryState`] is an immutable snapshot written once when an
//! iteration ends (or the pipeline terminates). Stores keep each pipeline's
//! states in ascending `end_timestamp` order so range reads are a suffix.
//!
//! # Example
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use livetune::history::{HistoryDatastore, MemoryHistoryDatastore, PipelineHistoryState};
//! use livetune::pipeline::{PipelineId, PipelineStage};
//!
//! # async fn example() -> livetune::Result<()> {
//! let store = MemoryHistoryDatastore::new();
//! let id = PipelineId::new("gc-tuning");
//! let at = |ms| Utc.timestamp_millis_opt(ms).unwrap();
//!
//! store.write_state(PipelineHistoryState::builder(id.clone(), 2, at(200)).build()).await?;
//! store.write_state(PipelineHistoryState::builder(id.clone(), 1, at(100)).build()).await?;
//!
//! let states = store.get_states_for_pipeline_id(&id).await?;
//! assert_eq!(states[0].iteration(), 1);
//! assert_eq!(store.get_states_for_pipeline_id_after(&id, at(100)).await?.len(), 1);
//! # Ok(())
//! # }
//! ```

mod memory;

pub use memory::MemoryHistoryDatastore;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::experiment::SubjectRecord;
use crate::pipeline::{PipelineId, PipelineStage};
use crate::scorer::{BestPerformer, IterationScore};
use crate::Result;

/// Snapshot of one pipeline at one iteration boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineHistoryState {
    pipeline_id: PipelineId,
    iteration: u64,
    end_timestamp: DateTime<Utc>,
    stage: PipelineStage,
    iteration_score: Option<IterationScore>,
    best_performer: Option<BestPerformer>,
    subjects: Vec<SubjectRecord>,
}

impl PipelineHistoryState {
    /// Start building a snapshot.
    #[must_use]
    pub fn builder(
        pipeline_id: PipelineId,
        iteration: u64,
        end_timestamp: DateTime<Utc>,
    ) -> PipelineHistoryStateBuilder {
        PipelineHistoryStateBuilder::new(pipeline_id, iteration, end_timestamp)
    }

    /// Pipeline the snapshot belongs to.
    #[must_use]
    pub const fn pipeline_id(&self) -> &PipelineId {
        &self.pipeline_id
    }

    /// Generation number.
    #[must_use]
    pub const fn iteration(&self) -> u64 {
        self.iteration
    }

    /// When the iteration ended.
    #[must_use]
    pub const fn end_timestamp(&self) -> DateTime<Utc> {
        self.end_timestamp
    }

    /// Stage the pipeline was in when the snapshot was taken.
    #[must_use]
    pub const fn stage(&self) -> PipelineStage {
        self.stage
    }

    /// Aggregate score, absent if the iteration never scored.
    #[must_use]
    pub const fn iteration_score(&self) -> Option<&IterationScore> {
        self.iteration_score.as_ref()
    }

    /// Historical best performer as of this iteration.
    #[must_use]
    pub const fn best_performer(&self) -> Option<&BestPerformer> {
        self.best_performer.as_ref()
    }

    /// Per-subject outcomes.
    #[must_use]
    pub fn subjects(&self) -> &[SubjectRecord] {
        &self.subjects
    }
}

/// Builder for [`PipelineHistoryState`].
#[derive(Debug)]
pub struct PipelineHistoryStateBuilder {
    state: PipelineHistoryState,
}

impl PipelineHistoryStateBuilder {
    /// Create a builder with required fields; stage defaults to SCORE.
    #[must_use]
    pub const fn new(pipeline_id: PipelineId, iteration: u64, end_timestamp: DateTime<Utc>) -> Self {
        Self {
            state: PipelineHistoryState {
                pipeline_id,
                iteration,
                end_timestamp,
                stage: PipelineStage::Score,
                iteration_score: None,
                best_performer: None,
                subjects: Vec::new(),
            },
        }
    }

    /// Set the stage.
    #[must_use]
    pub const fn stage(mut self, stage: PipelineStage) -> Self {
        self.state.stage = stage;
        self
    }

    /// Set the aggregate score.
    #[must_use]
    pub fn iteration_score(mut self, score: IterationScore) -> Self {
        self.state.iteration_score = Some(score);
        self
    }

    /// Set the best performer marker.
    #[must_use]
    pub fn best_performer(mut self, best: Option<BestPerformer>) -> Self {
        self.state.best_performer = best;
        self
    }

    /// Set per-subject outcomes.
    #[must_use]
    pub fn subjects(mut self, subjects: Vec<SubjectRecord>) -> Self {
        self.state.subjects = subjects;
        self
    }

    /// Finish the snapshot.
    #[must_use]
    pub fn build(self) -> PipelineHistoryState {
        self.state
    }
}

/// Append-only per-pipeline timeline.
///
/// Writes for one pipeline id are serialized; writes for distinct ids may
/// proceed concurrently. An unknown id reads as an empty timeline.
#[async_trait]
pub trait HistoryDatastore: Send + Sync {
    /// Append a snapshot, keeping the pipeline's states in ascending
    /// `end_timestamp` order. Equal timestamps keep insertion order.
    async fn write_state(&self, state: PipelineHistoryState) -> Result<()>;

    /// Pipelines with at least one snapshot.
    async fn list_pipeline_ids(&self) -> Result<BTreeSet<PipelineId>>;

    /// Full timeline of a pipeline, oldest first.
    async fn get_states_for_pipeline_id(
        &self,
        pipeline_id: &PipelineId,
    ) -> Result<Vec<PipelineHistoryState>>;

    /// Snapshots with `end_timestamp > after`, oldest first.
    async fn get_states_for_pipeline_id_after(
        &self,
        pipeline_id: &PipelineId,
        after: DateTime<Utc>,
    ) -> Result<Vec<PipelineHistoryState>>;
}
