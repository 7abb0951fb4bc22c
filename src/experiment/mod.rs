//! Experiment model: the tunable flag space and what each subject ran
//!
//! ## Overview
//!
//! ```text
//! ParameterSpace ──> CandidateConfig ──render──> ["-Xmx512m", "-XX:NewRatio=3"]
//!                          │
//!                          └──< SubjectRecord (N per generation)
//!                                    │
//!                              ExperimentDb (generation-ordered)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use livetune::experiment::{ParameterRange, ParameterSpace, ValueSeparator};
//!
//! let space = ParameterSpace::new(vec![
//!     ParameterRange::new("-Xmx", 256, 2048, 512).step(256).suffix("m").separator(ValueSeparator::None),
//!     ParameterRange::new("-XX:NewRatio", 1, 8, 2),
//! ])
//! .unwrap();
//!
//! assert_eq!(space.render(&space.baseline()), vec!["-Xmx512m", "-XX:NewRatio=2"]);
//! ```

mod db;
mod flags;
mod record;

pub use db::ExperimentDb;
pub use flags::{CandidateConfig, ParameterRange, ParameterSpace, ValueSeparator};
pub use record::{SubjectHealth, SubjectRecord};
