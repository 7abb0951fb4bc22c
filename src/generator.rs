//! Applies a generation's candidates to subjects.
//!
//! One [`Generator`] is built per iteration. Every subject is reconfigured in
//! its own task, bounded by the manipulation deadline; a subject that fails
//! only marks itself unhealthy.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::experiment::{CandidateConfig, ParameterSpace};
use crate::subject::{Subject, SubjectKey, SubjectManipulator};
use crate::{Error, Result};

/// Outcome of reconfiguring one subject.
#[derive(Debug)]
pub struct Deployment {
    /// Subject that was reconfigured
    pub subject: SubjectKey,
    /// `Ok` if the subject accepted its configuration
    pub outcome: Result<()>,
}

/// Iteration-scoped deployer.
pub struct Generator {
    manipulator: Arc<dyn SubjectManipulator>,
    space: ParameterSpace,
    deadline: Duration,
}

impl Generator {
    /// Create a generator for one iteration.
    #[must_use]
    pub fn new(
        manipulator: Arc<dyn SubjectManipulator>,
        space: ParameterSpace,
        deadline: Duration,
    ) -> Self {
        Self {
            manipulator,
            space,
            deadline,
        }
    }

    /// Apply every assignment concurrently; results are ordered by subject.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fires; in-flight
    /// manipulations are aborted.
    pub async fn deploy(
        &self,
        assignments: Vec<(Subject, CandidateConfig)>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Deployment>> {
        let mut pending: BTreeSet<SubjectKey> = BTreeSet::new();
        let mut tasks = JoinSet::new();

        for (subject, candidate) in assignments {
            let key = subject.key();
            pending.insert(key.clone());
            let args = self.space.render(&candidate);
            let manipulator = Arc::clone(&self.manipulator);
            let deadline = self.deadline;
            tasks.spawn(async move {
                let applied = tokio::time::timeout(
                    deadline,
                    manipulator.apply_configuration(&subject, &candidate, &args),
                )
                .await;
                let outcome = applied.unwrap_or_else(|_| {
                    Err(Error::DeadlineExceeded {
                        operation: format!("reconfiguring {key}"),
                        deadline_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                    })
                });
                Deployment {
                    subject: key,
                    outcome,
                }
            });
        }

        let mut deployments = Vec::with_capacity(pending.len());
        loop {
            let joined = tokio::select! {
                () = cancel.cancelled() => {
                    tasks.abort_all();
                    return Err(Error::Cancelled);
                }
                joined = tasks.join_next() => joined,
            };
            match joined {
                None => break,
                Some(Ok(deployment)) => {
                    match &deployment.outcome {
                        Ok(()) => debug!(subject = %deployment.subject, "subject reconfigured"),
                        Err(e) => warn!(
                            subject = %deployment.subject,
                            error = %e,
                            "subject rejected configuration"
                        ),
                    }
                    pending.remove(&deployment.subject);
                    deployments.push(deployment);
                }
                Some(Err(e)) => warn!(error = %e, "reconfiguration task aborted"),
            }
        }

        // Subjects whose task panicked never reported back.
        deployments.extend(pending.into_iter().map(|subject| Deployment {
            subject,
            outcome: Err(Error::Other("reconfiguration task aborted".to_string())),
        }));
        deployments.sort_by(|a, b| a.subject.cmp(&b.subject));
        Ok(deployments)
    }
}
