//! Pipeline lifecycle and iteration loop
//!
//! A pipeline runs generations until its iteration budget is spent, it
//! converges, it is stopped, or a permanent failure occurs:
//!
//! ```text
//!            ┌────────────────────── next generation ───────────────────────┐
//!            v                                                              │
//! CREATED ─> HYPOTHESIZE ─> GENERATE ─> VALIDATE ─> SCORE ─> (barrier) ─────┘
//!   census +    apply        health     observe +    register +
//!   proposals   candidates   floor      best update  wait for shards
//!
//! budget spent | converged | stopped ─> FINALIZED
//! permanent failure                  ─> FAILED
//! ```
//!
//! Temporary failures are retried on the next scheduling tick within the
//! per-step retry budget and escalate to a permanent failure once it is spent.

mod context;
mod id;
mod iteration;
mod manager;
mod retry;
mod stage;
mod synchronizer;

pub use context::{PipelineContext, Services};
pub use id::{PipelineId, PipelineIdGenerator};
pub use iteration::{IterationContext, IterationOutcome};
pub use manager::PipelineManager;
pub use stage::{PipelineStage, PipelineStageInfo, StageTracker};
pub use synchronizer::{
    for_mode, EmptyPipelineSynchronizer, IterationFinalizationSynchronizer, PipelineSynchronizer,
    SyncMode, SyncOutcome,
};

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ConfigManager;
use crate::datastore::PipelineState;
use crate::history::PipelineHistoryState;
use crate::hypothesizer::Hypothesizer;
use crate::{Error, Result};

/// Number of generations the experiment database keeps in memory.
const RETAINED_GENERATIONS: usize = 2;

/// One experiment run.
pub struct Pipeline {
    ctx: PipelineContext,
    /// Last generation scored by an earlier run under the same id.
    resumed_after: u64,
}

impl Pipeline {
    /// Assemble a pipeline; nothing runs until [`Pipeline::run`].
    #[must_use]
    pub fn new(
        id: PipelineId,
        services: Services,
        config_manager: Box<dyn ConfigManager>,
        hypothesizer: Box<dyn Hypothesizer>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            ctx: PipelineContext::new(id, services, config_manager, hypothesizer, cancel),
            resumed_after: 0,
        }
    }

    /// Pipeline id.
    #[must_use]
    pub const fn id(&self) -> &PipelineId {
        &self.ctx.id
    }

    /// Shared handle on the observable stage.
    #[must_use]
    pub fn stage_tracker(&self) -> Arc<StageTracker> {
        Arc::clone(&self.ctx.stage)
    }

    /// Create the pipeline's datastore record.
    ///
    /// A requested id may resume an existing record; a generated id must be
    /// new.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PipelineConflict`] if a generated id already exists,
    /// or whatever the datastore reports.
    pub async fn register(&self) -> Result<()> {
        let config = self.ctx.config();
        let services = &self.ctx.services;
        let state = PipelineState::created(
            self.ctx.id.clone(),
            config.as_ref().clone(),
            services.clock().now(),
        );
        services
            .datastore()
            .create_pipeline(state, config.requested_pipeline_id().is_none())
            .await
    }

    /// Drive the iteration loop to a terminal stage and return the final
    /// status. Never returns an error: failures end up in the status.
    pub async fn run(mut self) -> PipelineStageInfo {
        let (stage, detail, completed) = match self.iterate().await {
            Ok(reason) => {
                info!(pipeline_id = %self.ctx.id, reason = %reason, "pipeline finalized");
                (PipelineStage::Finalized, reason, true)
            }
            Err(Error::Cancelled) => {
                info!(pipeline_id = %self.ctx.id, "pipeline stopped");
                (PipelineStage::Finalized, "stopped".to_string(), false)
            }
            Err(e) => {
                error!(pipeline_id = %self.ctx.id, error = %e, "pipeline failed");
                (PipelineStage::Failed, e.to_string(), false)
            }
        };

        let iteration = self.ctx.stage.snapshot().iteration.max(self.resumed_after);
        let now = self.ctx.services.clock().now();
        if let Err(e) = self.ctx.stage.transition(stage, iteration, now, Some(detail)) {
            warn!(pipeline_id = %self.ctx.id, error = %e, "could not record terminal stage");
        }
        // Completed pipelines keep their barriers; peers may still be waiting.
        if !completed {
            let shard = self.ctx.services.settings().shard_index;
            self.ctx.services.synchronizer().forget_pipeline(shard, &self.ctx.id);
        }
        let info = self.ctx.stage.snapshot();
        self.persist_terminal(&info).await;
        info
    }

    async fn iterate(&mut self) -> Result<String> {
        let history = self
            .ctx
            .services
            .history()
            .get_states_for_pipeline_id(&self.ctx.id)
            .await?;
        self.ctx.best.seed_from_history(&history);
        let first = history
            .iter()
            .filter(|state| state.stage() == PipelineStage::Score)
            .map(PipelineHistoryState::iteration)
            .max()
            .map_or(1, |completed| completed + 1);
        self.resumed_after = first - 1;

        let config = self.ctx.config();
        let max = config.max_iterations;
        if first > 1 {
            info!(
                pipeline_id = %self.ctx.id,
                resume_at = first,
                max_iterations = max,
                "resuming from history"
            );
        }

        let mut stale = 0_u32;
        for generation in first..=max {
            if self.ctx.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let outcome = {
                let mut iteration = IterationContext::new(&mut self.ctx, generation);
                iteration.hypothesize().await?;
                iteration.generate().await?;
                iteration.validate()?;
                let outcome = iteration.score().await?;
                iteration.finalize().await?;
                outcome
            };
            self.ctx.experiment_db.retain_latest(RETAINED_GENERATIONS);

            stale = if outcome.improved { 0 } else { stale + 1 };
            if let Some(patience) = config.convergence_patience {
                if stale >= patience {
                    return Ok(format!(
                        "converged after generation {generation}: no new best performer in {patience} generations"
                    ));
                }
            }
        }
        Ok(format!("iteration budget of {max} spent"))
    }

    async fn persist_terminal(&self, info: &PipelineStageInfo) {
        let services = &self.ctx.services;
        let best = self.ctx.best.best().cloned();

        let state = PipelineHistoryState::builder(self.ctx.id.clone(), info.iteration, info.updated_at)
            .stage(info.stage)
            .best_performer(best.clone())
            .build();
        if let Err(e) = services.history().write_state(state).await {
            warn!(pipeline_id = %self.ctx.id, error = %e, "terminal history write failed");
        }

        let record = PipelineState {
            pipeline_id: self.ctx.id.clone(),
            config: self.ctx.config().as_ref().clone(),
            stage: info.stage,
            iteration: info.iteration,
            best_performer: best,
            updated_at: info.updated_at,
        };
        if let Err(e) = services.datastore().write_pipelines(vec![record]).await {
            warn!(pipeline_id = %self.ctx.id, error = %e, "terminal datastore write failed");
        }
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("ctx", &self.ctx).finish()
    }
}
