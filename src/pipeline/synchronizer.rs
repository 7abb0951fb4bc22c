//! Cross-shard coordination at iteration boundaries.
//!
//! Two strategies, selected by [`SyncMode`]:
//!
//! - [`EmptyPipelineSynchronizer`]: shards run independently; waits return
//!   [`SyncOutcome::Proceed`] immediately.
//! - [`IterationFinalizationSynchronizer`]: a barrier per
//!   `(pipeline id, iteration)`. A shard registers that it finalized the
//!   iteration, then waits until every expected shard has registered or the
//!   timeout elapses ([`SyncOutcome::Abort`]). A satisfied barrier stays
//!   satisfied, so late waiters proceed at once. Once a shard registers
//!   iteration `n`, every shard has passed the wait at `n - 2`, so barriers
//!   below `n - 1` are dropped.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::PipelineId;
use crate::config::SyncConfig;
use crate::{Error, Result};

/// Synchronization strictness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// No cross-shard coordination
    #[default]
    None,
    /// Barrier on every iteration finalization
    IterationFinalizationOnly,
}

/// Result of waiting at a barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Every expected shard finalized the iteration
    Proceed,
    /// Timed out; retry on the next tick
    Abort,
}

/// Iteration-boundary coordination between shards.
#[async_trait]
pub trait PipelineSynchronizer: Send + Sync {
    /// Strategy in use.
    fn mode(&self) -> SyncMode;

    /// Record that `shard` finalized `iteration` of `pipeline_id`. Idempotent.
    fn register_finalization(&self, shard: u32, pipeline_id: &PipelineId, iteration: u64);

    /// Wait until every expected shard finalized `iteration`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] when `cancel` fires first.
    async fn await_iteration_finalization(
        &self,
        pipeline_id: &PipelineId,
        iteration: u64,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome>;

    /// Withdraw `shard` from every barrier of a pipeline that is not yet
    /// satisfied. Registrations of other shards are kept.
    fn forget_pipeline(&self, shard: u32, pipeline_id: &PipelineId);
}

/// Build the synchronizer for `config`.
#[must_use]
pub fn for_mode(config: &SyncConfig) -> Arc<dyn PipelineSynchronizer> {
    match config.mode {
        SyncMode::None => Arc::new(EmptyPipelineSynchronizer),
        SyncMode::IterationFinalizationOnly => Arc::new(IterationFinalizationSynchronizer::new(
            config.expected_shards.iter().copied(),
            config.timeout(),
        )),
    }
}

/// No-op synchronizer.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyPipelineSynchronizer;

#[async_trait]
impl PipelineSynchronizer for EmptyPipelineSynchronizer {
    fn mode(&self) -> SyncMode {
        SyncMode::None
    }

    fn register_finalization(&self, _shard: u32, _pipeline_id: &PipelineId, _iteration: u64) {}

    async fn await_iteration_finalization(
        &self,
        _pipeline_id: &PipelineId,
        _iteration: u64,
        _cancel: &CancellationToken,
    ) -> Result<SyncOutcome> {
        Ok(SyncOutcome::Proceed)
    }

    fn forget_pipeline(&self, _shard: u32, _pipeline_id: &PipelineId) {}
}

type BarrierKey = (PipelineId, u64);

/// Barrier-with-timeout synchronizer.
///
/// Each barrier is a [`watch`] channel over the set of arrived shards, so
/// registration and the completeness check happen under one update and
/// waiters wake on every arrival.
#[derive(Debug)]
pub struct IterationFinalizationSynchronizer {
    expected: BTreeSet<u32>,
    timeout: Duration,
    barriers: DashMap<BarrierKey, watch::Sender<BTreeSet<u32>>>,
}

impl IterationFinalizationSynchronizer {
    /// Create a synchronizer expecting `expected_shards`.
    #[must_use]
    pub fn new(expected_shards: impl IntoIterator<Item = u32>, timeout: Duration) -> Self {
        Self {
            expected: expected_shards.into_iter().collect(),
            timeout,
            barriers: DashMap::new(),
        }
    }

    /// Shards this synchronizer waits for.
    #[must_use]
    pub const fn expected_shards(&self) -> &BTreeSet<u32> {
        &self.expected
    }

    /// Shards registered for an iteration so far.
    #[must_use]
    pub fn arrived(&self, pipeline_id: &PipelineId, iteration: u64) -> BTreeSet<u32> {
        self.barriers
            .get(&(pipeline_id.clone(), iteration))
            .map(|barrier| barrier.borrow().clone())
            .unwrap_or_default()
    }

    /// Whether every expected shard registered for an iteration.
    #[must_use]
    pub fn is_satisfied(&self, pipeline_id: &PipelineId, iteration: u64) -> bool {
        self.barriers
            .get(&(pipeline_id.clone(), iteration))
            .is_some_and(|barrier| self.expected.is_subset(&barrier.borrow()))
    }

    /// Number of barriers currently held, across all pipelines.
    #[must_use]
    pub fn barrier_count(&self) -> usize {
        self.barriers.len()
    }

    fn prune_before(&self, pipeline_id: &PipelineId, iteration: u64) {
        let Some(floor) = iteration.checked_sub(1) else {
            return;
        };
        self.barriers
            .retain(|(id, kept), _| id != pipeline_id || *kept >= floor);
    }

    fn barrier(&self, pipeline_id: &PipelineId, iteration: u64) -> watch::Receiver<BTreeSet<u32>> {
        self.barriers
            .entry((pipeline_id.clone(), iteration))
            .or_insert_with(|| watch::channel(BTreeSet::new()).0)
            .subscribe()
    }
}

#[async_trait]
impl PipelineSynchronizer for IterationFinalizationSynchronizer {
    fn mode(&self) -> SyncMode {
        SyncMode::IterationFinalizationOnly
    }

    fn register_finalization(&self, shard: u32, pipeline_id: &PipelineId, iteration: u64) {
        if !self.expected.contains(&shard) {
            warn!(shard, pipeline_id = %pipeline_id, iteration, "finalization from unexpected shard");
        }
        self.prune_before(pipeline_id, iteration);
        let mut complete = false;
        self.barriers
            .entry((pipeline_id.clone(), iteration))
            .or_insert_with(|| watch::channel(BTreeSet::new()).0)
            .send_modify(|arrived| {
                arrived.insert(shard);
                complete = self.expected.is_subset(arrived);
            });
        if complete {
            info!(pipeline_id = %pipeline_id, iteration, "iteration barrier satisfied");
        } else {
            debug!(shard, pipeline_id = %pipeline_id, iteration, "finalization registered");
        }
    }

    async fn await_iteration_finalization(
        &self,
        pipeline_id: &PipelineId,
        iteration: u64,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome> {
        let mut rx = self.barrier(pipeline_id, iteration);
        let expected = &self.expected;
        let satisfied = async move {
            rx.wait_for(|arrived| expected.is_subset(arrived))
                .await
                .is_ok()
        };

        tokio::select! {
            () = cancel.cancelled() => Err(Error::Cancelled),
            waited = tokio::time::timeout(self.timeout, satisfied) => match waited {
                Ok(true) => Ok(SyncOutcome::Proceed),
                Ok(false) => {
                    debug!(pipeline_id = %pipeline_id, iteration, "barrier dropped while waiting");
                    Ok(SyncOutcome::Abort)
                }
                Err(_) => {
                    warn!(
                        pipeline_id = %pipeline_id,
                        iteration,
                        timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                        arrived = ?self.arrived(pipeline_id, iteration),
                        "iteration barrier timed out"
                    );
                    Ok(SyncOutcome::Abort)
                }
            },
        }
    }

    fn forget_pipeline(&self, shard: u32, pipeline_id: &PipelineId) {
        self.barriers.retain(|(id, _), barrier| {
            if id != pipeline_id || self.expected.is_subset(&barrier.borrow()) {
                return true;
            }
            barrier.send_if_modified(|arrived| arrived.remove(&shard));
            !barrier.borrow().is_empty() || barrier.receiver_count() > 0
        });
        debug!(shard, pipeline_id = %pipeline_id, "shard withdrawn from pending barriers");
    }
}
