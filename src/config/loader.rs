//! TOML loading for [`Settings`] and [`PipelineConfig`].
//!
//! A successfully loaded value has always passed `validate()`.

use std::path::Path;

use super::{PipelineConfig, Settings};
use crate::Result;

/// Parse and validate process settings from TOML text.
///
/// # Errors
///
/// Returns [`crate::Error::ConfigParse`] for malformed TOML and
/// [`crate::Error::InvalidConfig`] when validation fails.
pub fn load_settings_from_str(content: &str) -> Result<Settings> {
    let settings: Settings = toml::from_str(content)?;
    settings.validate()?;
    Ok(settings)
}

/// Read, parse and validate process settings from a TOML file.
///
/// # Errors
///
/// Returns [`crate::Error::Io`] if the file cannot be read, otherwise as
/// [`load_settings_from_str`].
pub fn load_settings_from_file(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path)?;
    load_settings_from_str(&content)
}

/// Parse and validate a pipeline configuration from TOML text.
///
/// # Errors
///
/// Returns [`crate::Error::ConfigParse`] for malformed TOML and
/// [`crate::Error::InvalidConfig`] when validation fails.
///
/// # Example
///
/// ```rust
/// use livetune::config::load_pipeline_config_from_str;
///
/// let config = load_pipeline_config_from_str(r#"
///     max_iterations = 5
///
///     [[subject_groups]]
///     cluster_name = "xx"
///     name = "frontend"
///     user_name = "tuner"
///     experiment_settings_files_dir = "/var/livetune/frontend"
///
///     [[parameters]]
///     flag = "-XX:NewRatio"
///     min = 1
///     max = 8
///     default = 2
///
///     [scoring.weights]
///     throughput = 1.0
/// "#)?;
/// assert_eq!(config.max_iterations, 5);
/// # Ok::<(), livetune::Error>(())
/// ```
pub fn load_pipeline_config_from_str(content: &str) -> Result<PipelineConfig> {
    let config: PipelineConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Read, parse and validate a pipeline configuration from a TOML file.
///
/// # Errors
///
/// Returns [`crate::Error::Io`] if the file cannot be read, otherwise as
/// [`load_pipeline_config_from_str`].
pub fn load_pipeline_config_from_file(path: &Path) -> Result<PipelineConfig> {
    let content = std::fs::read_to_string(path)?;
    load_pipeline_config_from_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SyncMode;
    use crate::scorer::GenerationWeighting;
    use crate::Error;

    const PIPELINE: &str = r#"
        requested_pipeline_id = "gc-tuning"
        max_iterations = 7
        convergence_patience = 3

        [[subject_groups]]
        cluster_name = "xx"
        name = "frontend"
        user_name = "tuner"
        number_of_subjects = 10
        number_of_default_subjects = 2
        experiment_settings_files_dir = "/var/livetune/frontend"

        [[parameters]]
        flag = "-Xmx"
        separator = "none"
        min = 256
        max = 4096
        step = 256
        default = 1024
        suffix = "m"

        [sync]
        mode = "iteration_finalization_only"
        timeout_ms = 5000
        expected_shards = [0, 1, 2]

        [scoring]
        generation_weighting = "logarithmic"

        [scoring.weights]
        throughput = 1.0
        p99_latency_ms = -0.5
    "#;

    #[test]
    fn test_load_full_pipeline_config() {
        let config = load_pipeline_config_from_str(PIPELINE).unwrap();

        assert_eq!(config.requested_pipeline_id(), Some("gc-tuning"));
        assert_eq!(config.max_iterations, 7);
        assert_eq!(config.convergence_patience, Some(3));
        assert_eq!(config.subject_groups[0].number_of_default_subjects, 2);
        assert_eq!(config.parameters.ranges()[0].render(512), "-Xmx512m");
        assert_eq!(config.sync.mode, SyncMode::IterationFinalizationOnly);
        assert_eq!(config.sync.expected_shards, vec![0, 1, 2]);
        assert_eq!(config.scoring.generation_weighting, GenerationWeighting::Logarithmic);
        assert_eq!(config.scoring.weights.len(), 2);
        assert_eq!(config.retry_budget, 3);
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let result = load_pipeline_config_from_str("max_iterations = [");
        assert!(matches!(result, Err(Error::ConfigParse(_))));
    }

    #[test]
    fn test_semantic_violation_is_invalid_config() {
        let result = load_pipeline_config_from_str(&PIPELINE.replace("max_iterations = 7", "max_iterations = 0"));
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_settings_from_str_uses_defaults() {
        let settings = load_settings_from_str("shard_index = 1\nnum_shards = 3").unwrap();
        assert_eq!(settings.shard_index, 1);
        assert_eq!(settings.datastore, "memory");
        assert_eq!(settings.tick_interval_ms, 1_000);
    }

    #[test]
    fn test_settings_from_missing_file_is_io_error() {
        let result = load_settings_from_file(Path::new("/definitely/not/here.toml"));
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
