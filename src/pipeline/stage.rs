//! Pipeline stage state machine and its observable status record.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

use super::PipelineId;
use crate::{Error, Result};

/// Stage of a pipeline's iteration loop.
///
/// ```text
/// CREATED ──> HYPOTHESIZE ──> GENERATE ──> VALIDATE ──> SCORE ──┐
///                  ^                                             │
///                  └─────────────────────────────────────────────┘
/// any non-terminal stage ──> FINALIZED | FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStage {
    /// Constructed, loop not started
    Created,
    /// Proposing the next generation's candidates
    Hypothesize,
    /// Applying candidates to subjects
    Generate,
    /// Checking population health
    Validate,
    /// Scoring subjects and updating the historical best
    Score,
    /// Budget exhausted, converged or stopped
    Finalized,
    /// Unrecoverable failure
    Failed,
}

impl PipelineStage {
    /// Whether no transition leaves this stage.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finalized | Self::Failed)
    }

    /// Whether `self -> next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use PipelineStage::{Created, Failed, Finalized, Generate, Hypothesize, Score, Validate};
        match (self, next) {
            (Finalized | Failed, _) => false,
            (_, Finalized | Failed)
            | (Created | Score, Hypothesize)
            | (Hypothesize, Generate)
            | (Generate, Validate)
            | (Validate, Score) => true,
            _ => false,
        }
    }

    /// Upper-case stage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Hypothesize => "HYPOTHESIZE",
            Self::Generate => "GENERATE",
            Self::Validate => "VALIDATE",
            Self::Score => "SCORE",
            Self::Finalized => "FINALIZED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally observable status of one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStageInfo {
    /// Pipeline
    pub pipeline_id: PipelineId,
    /// Current stage
    pub stage: PipelineStage,
    /// Current generation (0 before the first HYPOTHESIZE)
    pub iteration: u64,
    /// When the stage last changed
    pub updated_at: DateTime<Utc>,
    /// Reason for the last terminal or degraded transition
    pub detail: Option<String>,
}

/// Owns a pipeline's [`PipelineStageInfo`] and enforces legal transitions.
///
/// Observers get a [`watch::Receiver`] and see every committed transition.
#[derive(Debug)]
pub struct StageTracker {
    tx: watch::Sender<PipelineStageInfo>,
}

impl StageTracker {
    /// Start in [`PipelineStage::Created`].
    #[must_use]
    pub fn new(pipeline_id: PipelineId, now: DateTime<Utc>) -> Self {
        let (tx, _) = watch::channel(PipelineStageInfo {
            pipeline_id,
            stage: PipelineStage::Created,
            iteration: 0,
            updated_at: now,
            detail: None,
        });
        Self { tx }
    }

    /// Current stage.
    #[must_use]
    pub fn stage(&self) -> PipelineStage {
        self.tx.borrow().stage
    }

    /// Copy of the current status.
    #[must_use]
    pub fn snapshot(&self) -> PipelineStageInfo {
        self.tx.borrow().clone()
    }

    /// Receiver that observes every transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<PipelineStageInfo> {
        self.tx.subscribe()
    }

    /// Move to `next` for generation `iteration`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] if the move is illegal; the stage
    /// is left unchanged.
    pub fn transition(
        &self,
        next: PipelineStage,
        iteration: u64,
        now: DateTime<Utc>,
        detail: Option<String>,
    ) -> Result<()> {
        let current = self.stage();
        if !current.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: current.to_string(),
                to: next.to_string(),
            });
        }
        self.tx.send_modify(|info| {
            info.stage = next;
            info.iteration = iteration;
            info.updated_at = now;
            info.detail = detail;
        });
        info!(
            pipeline_id = %self.tx.borrow().pipeline_id,
            iteration,
            from = %current,
            to = %next,
            "stage transition"
        );
        Ok(())
    }

    /// Attach a note to the current stage without changing it.
    pub fn annotate(&self, detail: impl Into<String>) {
        let detail = detail.into();
        self.tx.send_modify(|info| info.detail = Some(detail));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tracker() -> StageTracker {
        StageTracker::new(PipelineId::new("p"), Utc.timestamp_millis_opt(0).unwrap())
    }

    #[test]
    fn test_full_cycle() {
        let tracker = tracker();
        let now = Utc::now();
        for (iteration, stage) in [
            (1, PipelineStage::Hypothesize),
            (1, PipelineStage::Generate),
            (1, PipelineStage::Validate),
            (1, PipelineStage::Score),
            (2, PipelineStage::Hypothesize),
            (2, PipelineStage::Finalized),
        ] {
            tracker.transition(stage, iteration, now, None).unwrap();
        }
        assert_eq!(tracker.snapshot().iteration, 2);
        assert_eq!(tracker.stage(), PipelineStage::Finalized);
    }

    #[test]
    fn test_terminal_stages_are_final() {
        let tracker = tracker();
        let now = Utc::now();
        tracker
            .transition(PipelineStage::Failed, 0, now, Some("census".to_string()))
            .unwrap();

        let result = tracker.transition(PipelineStage::Hypothesize, 1, now, None);
        assert!(matches!(result, Err(Error::InvalidTransition { .. })));
        assert!(tracker.transition(PipelineStage::Finalized, 1, now, None).is_err());
        assert_eq!(tracker.snapshot().detail.as_deref(), Some("census"));
    }

    #[test]
    fn test_stages_cannot_be_skipped() {
        assert!(!PipelineStage::Hypothesize.can_transition_to(PipelineStage::Score));
        assert!(!PipelineStage::Created.can_transition_to(PipelineStage::Generate));
        assert!(!PipelineStage::Validate.can_transition_to(PipelineStage::Hypothesize));
    }

    #[test]
    fn test_subscribers_see_transitions() {
        let tracker = tracker();
        let rx = tracker.subscribe();
        tracker
            .transition(PipelineStage::Hypothesize, 1, Utc::now(), None)
            .unwrap();
        assert_eq!(rx.borrow().stage, PipelineStage::Hypothesize);
    }

    #[test]
    fn test_stage_serializes_upper_case() {
        assert_eq!(
            serde_json::to_string(&PipelineStage::Hypothesize).unwrap(),
            "\"HYPOTHESIZE\""
        );
    }
}
