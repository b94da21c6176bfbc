//! Funnel & A/A/B Experiment Analyzer Library
//!
//! This library provides tools to:
//! - Load and clean a tab-separated mobile-app event log
//! - Aggregate per-event counts and stage-to-stage funnel conversion
//! - Partition users by experiment group
//! - Run two-proportion z-tests for A/A and A/B comparisons
//! - Render the results as tables, Markdown, JSON or YAML

pub mod config;
pub mod error;
pub mod events;
pub mod funnel;
pub mod groups;
pub mod hypothesis;
pub mod pipeline;
pub mod report;

// Re-export common types
pub use config::Config;
pub use error::{Error, Result};
pub use events::{EventLog, EventRecord, GroupId};
pub use pipeline::AnalysisReport;
