//! Pipeline wiring: load -> clean -> funnel -> groups -> tests.
//!
//! Every stage takes the previous stage's output by reference and returns a
//! new value, so stages can be run and tested in isolation.

use serde::Serialize;
use tracing::info;

use crate::config::Config;
use crate::events::{self, CleaningReport, EventLog, LogSummary};
use crate::funnel::{self, FunnelReport};
use crate::groups::{self, GroupCounts};
use crate::hypothesis::{self, Comparison, ComparisonReport};
use crate::Result;

/// Everything one run of the pipeline produces.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub input_path: String,
    pub cleaning: CleaningReport,
    /// Deduplicated log before the date filter.
    pub summary_before_filter: LogSummary,
    pub summary: LogSummary,
    pub funnel: FunnelReport,
    pub groups: GroupCounts,
    pub comparisons: Vec<ComparisonReport>,
}

/// Load the configured input file and run every stage.
pub fn run(config: &Config) -> Result<AnalysisReport> {
    let raw = EventLog::load(&config.input_path, config.has_headers)?;
    let mut report = analyze(&raw, config)?;
    report.input_path = config.input_path.display().to_string();
    Ok(report)
}

/// Run every stage over an already loaded log.
pub fn analyze(raw: &EventLog, config: &Config) -> Result<AnalysisReport> {
    let (deduped, duplicates_removed) = raw.deduplicate();
    // Rows dropped by the date filter must still carry a known group
    groups::check_groups(&deduped, &config.groups)?;
    let summary_before_filter = deduped.summary();

    let (log, cleaning) =
        events::clean_deduplicated(deduped, raw.len(), duplicates_removed, config.date_cutoff);
    let summary = log.summary();

    let funnel = funnel::analyze(&log, &config.funnel_order);
    let groups = groups::partition(&log, &config.groups, config.initial_event())?;

    let comparisons: Vec<Comparison> = config.comparisons.iter().map(Comparison::from).collect();
    let comparisons = hypothesis::run_all(&groups, &comparisons);

    info!(
        rows = log.len(),
        users = summary.unique_users,
        comparisons = comparisons.len(),
        "Analysis complete"
    );

    Ok(AnalysisReport {
        input_path: String::new(),
        cleaning,
        summary_before_filter,
        summary,
        funnel,
        groups,
        comparisons,
    })
}
