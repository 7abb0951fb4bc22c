//! [`MetricSource`] that scrapes `name=value` lines from a command's stdout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{MetricSource, SubjectMetrics};
use crate::process::ProcessInvoker;
use crate::subject::{expand, expand_subject, Subject};
use crate::{Error, Result};

/// Runs a per-subject command and parses its metrics.
///
/// Placeholders: `{cluster}`, `{group}`, `{user}`, `{index}`, `{address}`,
/// `{config_path}`. Blank lines and lines starting with `#` are skipped.
pub struct CommandMetricSource {
    invoker: Arc<dyn ProcessInvoker>,
    template: Vec<String>,
    deadline: Duration,
}

impl CommandMetricSource {
    /// Create a metric source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `template` has no program.
    pub fn new(
        invoker: Arc<dyn ProcessInvoker>,
        template: Vec<String>,
        deadline: Duration,
    ) -> Result<Self> {
        if template.is_empty() {
            return Err(Error::InvalidConfig(
                "metric command template needs a program".to_string(),
            ));
        }
        Ok(Self {
            invoker,
            template,
            deadline,
        })
    }
}

/// Parse `name=value` lines.
///
/// # Errors
///
/// Returns [`Error::PermanentFailure`] on a malformed line.
pub fn parse_metrics(output: &str) -> Result<SubjectMetrics> {
    let mut metrics = SubjectMetrics::new();
    for line in output.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (name, value) = line
            .split_once('=')
            .ok_or_else(|| Error::permanent(format!("metric line {line:?} is not name=value")))?;
        let value = value
            .trim()
            .parse::<f64>()
            .map_err(|e| Error::permanent(format!("metric {name}: {e}")))?;
        metrics.insert(name.trim().to_string(), value);
    }
    Ok(metrics)
}

#[async_trait]
impl MetricSource for CommandMetricSource {
    async fn observe(&self, subject: &Subject) -> Result<SubjectMetrics> {
        let command = expand(&self.template, |part| expand_subject(part, subject));
        let (program, args) = command
            .split_first()
            .ok_or_else(|| Error::InvalidConfig("empty metric command".to_string()))?;
        let output = self.invoker.invoke(program, args, self.deadline).await?;
        if !output.success() {
            return Err(Error::temporary(format!(
                "metric command for {} exited with {:?}",
                subject.key(),
                output.exit_code
            )));
        }
        let metrics = parse_metrics(&output.stdout)?;
        debug!(subject = %subject.key(), metrics = metrics.len(), "metrics observed");
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubjectGroupConfig;
    use crate::process::CmdProcessInvoker;
    use crate::subject::{SimulatedPopulation, SubjectGroup, TemplateAddressGenerator};
    use tokio_util::sync::CancellationToken;

    #[test]
    fn test_parse_metrics() {
        let metrics = parse_metrics("# scrape\nthroughput=120.5\n\n p99_latency_ms = 42 \n").unwrap();
        assert_eq!(metrics.get("throughput"), Some(&120.5));
        assert_eq!(metrics.get("p99_latency_ms"), Some(&42.0));
    }

    #[test]
    fn test_parse_metrics_rejects_garbage() {
        assert!(matches!(
            parse_metrics("throughput"),
            Err(Error::PermanentFailure(_))
        ));
        assert!(parse_metrics("throughput=fast").is_err());
    }

    #[tokio::test]
    async fn test_observe_expands_subject_placeholders() {
        let mut group = SubjectGroup::new(
            SubjectGroupConfig {
                cluster_name: "xx".to_string(),
                name: "frontend".to_string(),
                user_name: "tuner".to_string(),
                number_of_subjects: 0,
                number_of_default_subjects: 0,
                experiment_settings_files_dir: "/tmp/livetune".to_string(),
                serving_address_template: None,
            },
            Arc::new(TemplateAddressGenerator::default()),
            Duration::from_secs(1),
        );
        let population = SimulatedPopulation::new().with_group("frontend", 2);
        let subjects = group
            .initialize(&population, None, &CancellationToken::new())
            .await
            .unwrap();

        let source = CommandMetricSource::new(
            Arc::new(CmdProcessInvoker),
            vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo index={index}".to_string(),
            ],
            Duration::from_secs(5),
        )
        .unwrap();

        let metrics = source.observe(&subjects[1]).await.unwrap();
        assert_eq!(metrics.get("index"), Some(&1.0));
    }
}
