//! [`SubjectManipulator`] that drives subjects through external commands.
//!
//! Census: runs the census command and parses an integer from stdout.
//! Reconfiguration: writes the rendered flags (one per line) to the subject's
//! settings file, then runs the restart command.
//!
//! Command templates expand `{cluster}`, `{group}`, `{user}` and, for
//! per-subject commands, `{index}`, `{address}`, `{config_path}`, `{flags}`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{GroupIdentity, Subject, SubjectManipulator};
use crate::experiment::CandidateConfig;
use crate::process::{ProcessInvoker, ProcessOutput};
use crate::{Error, Result};

/// Program-plus-arguments templates for the two manipulations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplates {
    /// Prints the population size of a group on stdout
    pub census: Vec<String>,
    /// Restarts one subject so it picks up its settings file
    pub restart: Vec<String>,
}

/// Command-backed manipulator.
pub struct CommandSubjectManipulator {
    invoker: Arc<dyn ProcessInvoker>,
    templates: CommandTemplates,
    deadline: Duration,
}

impl CommandSubjectManipulator {
    /// Create a manipulator; `deadline` bounds every command it runs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if a template has no program.
    pub fn new(
        invoker: Arc<dyn ProcessInvoker>,
        templates: CommandTemplates,
        deadline: Duration,
    ) -> Result<Self> {
        if templates.census.is_empty() || templates.restart.is_empty() {
            return Err(Error::InvalidConfig(
                "census and restart command templates need a program".to_string(),
            ));
        }
        Ok(Self {
            invoker,
            templates,
            deadline,
        })
    }

    async fn run(&self, command: Vec<String>) -> Result<ProcessOutput> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| Error::InvalidConfig("empty command template".to_string()))?;
        self.invoker.invoke(program, args, self.deadline).await
    }
}

pub(crate) fn expand(template: &[String], expand_part: impl Fn(&str) -> String) -> Vec<String> {
    template.iter().map(|part| expand_part(part)).collect()
}

fn expand_group(part: &str, group: &GroupIdentity) -> String {
    part.replace("{cluster}", &group.cluster_name)
        .replace("{group}", &group.name)
        .replace("{user}", &group.user_name)
}

/// Expand group placeholders plus `{index}`, `{address}` and `{config_path}`.
pub(crate) fn expand_subject(part: &str, subject: &Subject) -> String {
    expand_group(part, subject.group())
        .replace("{index}", &subject.index().to_string())
        .replace("{address}", &subject.serving_address())
        .replace("{config_path}", subject.config_path())
}

#[async_trait]
impl SubjectManipulator for CommandSubjectManipulator {
    async fn population_size(&self, group: &GroupIdentity) -> Result<usize> {
        let output = match self
            .run(expand(&self.templates.census, |part| expand_group(part, group)))
            .await
        {
            Ok(output) => output,
            Err(Error::Io(e)) => {
                return Err(Error::permanent(format!("census command cannot run: {e}")))
            }
            Err(e) => return Err(e),
        };

        if !output.success() {
            warn!(
                group = %group,
                exit_code = ?output.exit_code,
                stderr = %output.stderr.trim(),
                "census command failed"
            );
            return Err(Error::temporary(format!(
                "census of {group} exited with {:?}",
                output.exit_code
            )));
        }

        output.stdout.trim().parse::<usize>().map_err(|e| {
            Error::permanent(format!(
                "census of {group} printed {:?}, expected a subject count: {e}",
                output.stdout.trim()
            ))
        })
    }

    async fn apply_configuration(
        &self,
        subject: &Subject,
        _candidate: &CandidateConfig,
        args: &[String],
    ) -> Result<()> {
        let path = Path::new(subject.config_path());
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut contents = args.join("\n");
        contents.push('\n');
        tokio::fs::write(path, contents).await?;
        debug!(subject = %subject.key(), path = %path.display(), "settings file written");

        let flags = args.join(" ");
        let command = expand(&self.templates.restart, |part| {
            expand_subject(part, subject).replace("{flags}", &flags)
        });
        let output = self.run(command).await?;

        if output.success() {
            Ok(())
        } else {
            Err(Error::temporary(format!(
                "restart of {} exited with {:?}: {}",
                subject.key(),
                output.exit_code,
                output.stderr.trim()
            )))
        }
    }
}
