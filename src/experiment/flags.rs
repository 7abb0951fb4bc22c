//! Command-line flag model for candidate configurations
//!
//! A candidate configuration maps flag names to integer values. The
//! [`ParameterSpace`] knows, for every flag, the legal range, the step size,
//! and how to render the flag on a command line (`-Xmx1024m`,
//! `-XX:NewRatio=2`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Separator placed between a flag name and its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSeparator {
    /// Value follows the name directly (`-Xmx1024m`)
    None,
    /// Name and value are joined with `=` (`-XX:NewRatio=2`)
    #[default]
    Equal,
}

impl ValueSeparator {
    /// Text inserted between flag name and value.
    #[must_use]
    pub const fn infix(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Equal => "=",
        }
    }
}

/// Legal range and rendering rules for one tunable flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterRange {
    /// Flag name including its prefix (e.g. `-XX:NewRatio`)
    pub flag: String,
    /// Name/value separator
    #[serde(default)]
    pub separator: ValueSeparator,
    /// Smallest legal value
    pub min: i64,
    /// Largest legal value
    pub max: i64,
    /// Granularity of legal values, counted from `min`
    #[serde(default = "default_step")]
    pub step: i64,
    /// Value given to control subjects
    pub default: i64,
    /// Unit suffix appended after the value (e.g. `m` for megabytes)
    #[serde(default)]
    pub suffix: String,
}

const fn default_step() -> i64 {
    1
}

impl ParameterRange {
    /// Create a range with step 1, `=` separator and no suffix.
    #[must_use]
    pub fn new(flag: impl Into<String>, min: i64, max: i64, default: i64) -> Self {
        Self {
            flag: flag.into(),
            separator: ValueSeparator::Equal,
            min,
            max,
            step: 1,
            default,
            suffix: String::new(),
        }
    }

    /// Set the separator.
    #[must_use]
    pub const fn separator(mut self, separator: ValueSeparator) -> Self {
        self.separator = separator;
        self
    }

    /// Set the step.
    #[must_use]
    pub const fn step(mut self, step: i64) -> Self {
        self.step = step;
        self
    }

    /// Set the unit suffix.
    #[must_use]
    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    /// Check that the range is non-empty, the step positive and the default legal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.flag.trim().is_empty() {
            return Err(Error::InvalidConfig("parameter flag name is empty".to_string()));
        }
        if self.min > self.max {
            return Err(Error::InvalidConfig(format!(
                "parameter {}: min {} exceeds max {}",
                self.flag, self.min, self.max
            )));
        }
        if self.max.checked_sub(self.min).is_none() {
            return Err(Error::InvalidConfig(format!(
                "parameter {}: span from {} to {} does not fit in 64 bits",
                self.flag, self.min, self.max
            )));
        }
        if self.step <= 0 {
            return Err(Error::InvalidConfig(format!(
                "parameter {}: step must be positive, got {}",
                self.flag, self.step
            )));
        }
        if self.default < self.min || self.default > self.max {
            return Err(Error::InvalidConfig(format!(
                "parameter {}: default {} outside [{}, {}]",
                self.flag, self.default, self.min, self.max
            )));
        }
        Ok(())
    }

    /// Number of legal values in the range.
    #[must_use]
    pub const fn cardinality(&self) -> i64 {
        (self.max.saturating_sub(self.min) / self.step).saturating_add(1)
    }

    /// Clamp into `[min, max]` and snap down onto the step grid.
    #[must_use]
    pub fn normalize(&self, value: i64) -> i64 {
        let clamped = value.clamp(self.min, self.max);
        let offset = clamped.saturating_sub(self.min) / self.step * self.step;
        self.min + offset
    }

    /// Render `value` as a single command-line argument.
    #[must_use]
    pub fn render(&self, value: i64) -> String {
        format!(
            "{}{}{}{}",
            self.flag,
            self.separator.infix(),
            value,
            self.suffix
        )
    }
}

/// One proposed assignment of values to tunable flags.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct CandidateConfig {
    values: BTreeMap<String, i64>,
}

impl CandidateConfig {
    /// Create an empty candidate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    #[must_use]
    pub fn with(mut self, flag: impl Into<String>, value: i64) -> Self {
        self.values.insert(flag.into(), value);
        self
    }

    /// Set a flag value.
    pub fn set(&mut self, flag: impl Into<String>, value: i64) {
        self.values.insert(flag.into(), value);
    }

    /// Value for a flag, if assigned.
    #[must_use]
    pub fn get(&self, flag: &str) -> Option<i64> {
        self.values.get(flag).copied()
    }

    /// Iterate `(flag, value)` in flag order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Number of assigned flags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no flag is assigned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// The full set of tunable flags for one pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSpace {
    ranges: Vec<ParameterRange>,
}

impl ParameterSpace {
    /// Build a space, rejecting invalid or duplicate flags.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when a range is invalid or a flag repeats.
    pub fn new(ranges: Vec<ParameterRange>) -> Result<Self> {
        let space = Self { ranges };
        space.validate()?;
        Ok(space)
    }

    /// Validate every range and flag uniqueness.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] on the first violation.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for range in &self.ranges {
            range.validate()?;
            if !seen.insert(range.flag.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "parameter {} declared twice",
                    range.flag
                )));
            }
        }
        Ok(())
    }

    /// All ranges in declaration order.
    #[must_use]
    pub fn ranges(&self) -> &[ParameterRange] {
        &self.ranges
    }

    /// Range for a flag.
    #[must_use]
    pub fn range(&self, flag: &str) -> Option<&ParameterRange> {
        self.ranges.iter().find(|r| r.flag == flag)
    }

    /// Whether the space has no tunable flags.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Candidate with every flag at its default (what control subjects run).
    #[must_use]
    pub fn baseline(&self) -> CandidateConfig {
        let mut candidate = CandidateConfig::new();
        for range in &self.ranges {
            candidate.set(range.flag.clone(), range.default);
        }
        candidate
    }

    /// Force a candidate into the space: drop unknown flags, fill missing ones
    /// with defaults, clamp and snap the rest.
    #[must_use]
    pub fn normalize(&self, candidate: &CandidateConfig) -> CandidateConfig {
        let mut normalized = CandidateConfig::new();
        for range in &self.ranges {
            let value = candidate.get(&range.flag).unwrap_or(range.default);
            normalized.set(range.flag.clone(), range.normalize(value));
        }
        normalized
    }

    /// Render a candidate into command-line arguments, in declaration order.
    #[must_use]
    pub fn render(&self, candidate: &CandidateConfig) -> Vec<String> {
        self.ranges
            .iter()
            .filter_map(|range| candidate.get(&range.flag).map(|v| range.render(v)))
            .collect()
    }
}
