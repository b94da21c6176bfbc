//! Report rendering: plain-text tables, Markdown, JSON and YAML.

use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::hypothesis::ComparisonReport;
use crate::pipeline::AnalysisReport;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Markdown,
    Json,
    Yaml,
}

impl OutputFormat {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "table" | "pretty" => Ok(Self::Table),
            "markdown" | "md" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            other => Err(Error::InvalidArgument(format!(
                "Unsupported format '{}'. Use table|markdown|json|yaml",
                other
            ))),
        }
    }
}

/// Which parts of the analysis to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sections {
    pub summary: bool,
    pub funnel: bool,
    pub groups: bool,
    pub tests: bool,
}

impl Sections {
    pub const ALL: Sections = Sections {
        summary: true,
        funnel: true,
        groups: true,
        tests: true,
    };

    pub const NONE: Sections = Sections {
        summary: false,
        funnel: false,
        groups: false,
        tests: false,
    };
}

pub fn render(report: &AnalysisReport, format: OutputFormat, sections: Sections) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(render_table(report, sections)),
        OutputFormat::Markdown => Ok(render_markdown(report, sections)),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&select(report, sections)?)?),
        OutputFormat::Yaml => Ok(serde_yaml::to_string(&select(report, sections)?)?),
    }
}

/// Write a rendered report, creating parent directories.
pub fn persist(path: &Path, payload: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, payload)?;
    info!("Saved report to {}", path.display());
    Ok(())
}

fn select(report: &AnalysisReport, sections: Sections) -> Result<Value> {
    let mut out = Map::new();
    out.insert("input_path".into(), Value::String(report.input_path.clone()));
    if sections.summary {
        out.insert("cleaning".into(), serde_json::to_value(&report.cleaning)?);
        out.insert(
            "summary_before_filter".into(),
            serde_json::to_value(&report.summary_before_filter)?,
        );
        out.insert("summary".into(), serde_json::to_value(&report.summary)?);
    }
    if sections.funnel {
        out.insert("funnel".into(), serde_json::to_value(&report.funnel)?);
    }
    if sections.groups {
        out.insert("groups".into(), serde_json::to_value(&report.groups)?);
    }
    if sections.tests {
        out.insert("comparisons".into(), serde_json::to_value(&report.comparisons)?);
    }
    Ok(Value::Object(out))
}

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    value
        .map(|v| format!("{:.*}", precision, v))
        .unwrap_or_else(|| "-".to_string())
}

fn fmt_date(date: Option<chrono::NaiveDate>) -> String {
    date.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max_len - 3).collect::<String>())
    }
}

fn heading(out: &mut Vec<String>, title: &str) {
    out.push(title.to_string());
    out.push("-".repeat(title.chars().count()));
}

fn render_table(report: &AnalysisReport, sections: Sections) -> String {
    let mut out = Vec::new();

    if sections.summary {
        let c = &report.cleaning;
        heading(&mut out, "=== Event log ===");
        out.push(format!("Rows read: {}", c.rows_read));
        out.push(format!("Duplicates removed: {}", c.duplicates_removed));
        let before = &report.summary_before_filter;
        out.push(format!(
            "Date range before filter: {} to {}",
            fmt_date(before.first_date),
            fmt_date(before.last_date)
        ));
        if let Some(f) = &c.date_filter {
            out.push(format!(
                "Dropped on or before {}: {} rows ({:.2}%), {} users ({:.2}%)",
                f.cutoff, f.rows_removed, f.rows_removed_pct, f.users_removed, f.users_removed_pct
            ));
        }
        let s = &report.summary;
        out.push(format!("Events kept: {}", s.total_events));
        out.push(format!("Unique users: {}", s.unique_users));
        out.push(format!(
            "Events per user: mean {:.1}, median {:.1}",
            s.mean_events_per_user, s.median_events_per_user
        ));
        out.push(format!(
            "Date range: {} to {}",
            fmt_date(s.first_date),
            fmt_date(s.last_date)
        ));
        if !before.events_per_day.is_empty() {
            out.push(String::new());
            out.push(format!("{:<12} {:>8}", "Date", "Events"));
            for d in &before.events_per_day {
                out.push(format!("{:<12} {:>8}", d.date, d.events));
            }
        }
        out.push(String::new());
    }

    if sections.funnel {
        let f = &report.funnel;
        heading(&mut out, "=== Funnel ===");
        if f.table.is_empty() {
            out.push("No events left after cleaning.".to_string());
        } else {
            out.push(format!(
                "{:<4} {:<28} {:>8} {:>8} {:>8}",
                "#", "Event", "Events", "Users", "Users %"
            ));
            for (i, e) in f.table.entries().iter().enumerate() {
                out.push(format!(
                    "{:<4} {:<28} {:>8} {:>8} {:>8.2}",
                    i + 1,
                    truncate(&e.event_name, 28),
                    e.occurrences,
                    e.unique_users,
                    e.user_share_pct
                ));
            }
        }
        out.push(String::new());
        out.push(format!("{:<52} {:>10}", "Step", "Conv %"));
        for step in f.steps.iter().chain(f.overall.iter()) {
            out.push(format!(
                "{:<52} {:>10}",
                truncate(&format!("{} -> {}", step.from, step.to), 52),
                fmt_opt(step.ratio, 2)
            ));
        }
        out.push(String::new());
    }

    if sections.groups {
        let g = &report.groups;
        heading(&mut out, "=== Groups ===");
        out.push(format!(
            "{:<8} {:<10} {:>8} {:>10}",
            "Group", "Role", "Users", "Baseline"
        ));
        for s in &g.groups {
            out.push(format!(
                "{:<8} {:<10} {:>8} {:>10}",
                s.group,
                if s.is_control { "control" } else { "treatment" },
                s.users,
                s.baseline_users
            ));
        }
        out.push(format!("Baseline event: {}", g.initial_event));
        if g.cross_group_users > 0 {
            out.push(format!(
                "Warning: {} users appear in more than one group",
                g.cross_group_users
            ));
        }
        out.push(String::new());
    }

    if sections.tests {
        heading(&mut out, "=== Hypothesis tests ===");
        for cmp in &report.comparisons {
            render_comparison_table(&mut out, cmp);
        }
        out.push(
            "No multiple-comparison correction is applied; see the family-wise bound per comparison."
                .to_string(),
        );
    }

    out.join("\n")
}

fn render_comparison_table(out: &mut Vec<String>, cmp: &ComparisonReport) {
    out.push(format!(
        "{} (alpha = {})",
        cmp.comparison.label, cmp.comparison.alpha
    ));
    out.push(format!(
        "{:<28} {:>13} {:>13} {:>8} {:>10}  {}",
        "Event", "A", "B", "z", "p-value", "Verdict"
    ));
    for r in &cmp.results {
        out.push(format!(
            "{:<28} {:>13} {:>13} {:>8} {:>10}  {}",
            truncate(&r.event_name, 28),
            format!("{}/{}", r.x1, r.n1),
            format!("{}/{}", r.x2, r.n2),
            fmt_opt(r.z, 3),
            fmt_opt(r.p_value, 4),
            r.verdict.as_str()
        ));
    }
    out.push(format!(
        "tests: {}, significant: {}, undefined: {}, family-wise error bound: {:.3}",
        cmp.tests_run, cmp.significant, cmp.undefined, cmp.familywise_error_bound
    ));
    out.push(String::new());
}

fn render_markdown(report: &AnalysisReport, sections: Sections) -> String {
    let mut lines = Vec::new();

    lines.push("# Funnel & experiment report".to_string());
    lines.push(String::new());
    if !report.input_path.is_empty() {
        lines.push(format!("- Input: `{}`", report.input_path));
    }

    if sections.summary {
        let c = &report.cleaning;
        let s = &report.summary;
        lines.push(format!(
            "- Rows read: {} | Duplicates removed: {} | Rows kept: {}",
            c.rows_read, c.duplicates_removed, c.rows_kept
        ));
        if let Some(f) = &c.date_filter {
            lines.push(format!(
                "- Date filter: kept dates after {}; dropped {} rows ({:.2}%) and {} users ({:.2}%)",
                f.cutoff, f.rows_removed, f.rows_removed_pct, f.users_removed, f.users_removed_pct
            ));
        }
        lines.push(format!(
            "- Users: {} | Events per user: mean {:.1}, median {:.1} | Period: {} → {}",
            s.unique_users,
            s.mean_events_per_user,
            s.median_events_per_user,
            fmt_date(s.first_date),
            fmt_date(s.last_date)
        ));
        lines.push(String::new());

        let before = &report.summary_before_filter;
        if !before.events_per_day.is_empty() {
            lines.push("**Events per day (before date filter)**".to_string());
            lines.push("| Date | Events |".to_string());
            lines.push("| --- | --- |".to_string());
            for d in &before.events_per_day {
                lines.push(format!("| {} | {} |", d.date, d.events));
            }
            lines.push(String::new());
        }
    }

    if sections.funnel {
        let f = &report.funnel;
        lines.push("## Funnel".to_string());
        lines.push("| Event | Events | Users | Users % |".to_string());
        lines.push("| --- | --- | --- | --- |".to_string());
        for e in f.table.entries() {
            lines.push(format!(
                "| {} | {} | {} | {:.2}% |",
                e.event_name, e.occurrences, e.unique_users, e.user_share_pct
            ));
        }
        lines.push(String::new());
        lines.push("| Step | From users | To users | Conversion |".to_string());
        lines.push("| --- | --- | --- | --- |".to_string());
        for step in f.steps.iter().chain(f.overall.iter()) {
            lines.push(format!(
                "| {} → {} | {} | {} | {} |",
                step.from,
                step.to,
                step.from_users,
                step.to_users,
                step.ratio
                    .map(|r| format!("{:.2}%", r))
                    .unwrap_or_else(|| "undefined".to_string())
            ));
        }
        lines.push(String::new());
    }

    if sections.groups {
        let g = &report.groups;
        lines.push("## Groups".to_string());
        lines.push(format!("Baseline event: `{}`", g.initial_event));
        lines.push(String::new());
        lines.push("| Group | Role | Users | Baseline |".to_string());
        lines.push("| --- | --- | --- | --- |".to_string());
        for s in &g.groups {
            lines.push(format!(
                "| {} | {} | {} | {} |",
                s.group,
                if s.is_control { "control" } else { "treatment" },
                s.users,
                s.baseline_users
            ));
        }
        if g.cross_group_users > 0 {
            lines.push(String::new());
            lines.push(format!(
                "> {} users appear in more than one group.",
                g.cross_group_users
            ));
        }
        lines.push(String::new());
    }

    if sections.tests {
        lines.push("## Hypothesis tests".to_string());
        lines.push(
            "Two-proportion z-tests against the baseline. No multiple-comparison correction is applied."
                .to_string(),
        );
        lines.push(String::new());
        for cmp in &report.comparisons {
            lines.push(format!(
                "### {} (α = {})",
                cmp.comparison.label, cmp.comparison.alpha
            ));
            lines.push("| Event | A | B | z | p-value | Verdict |".to_string());
            lines.push("| --- | --- | --- | --- | --- | --- |".to_string());
            for r in &cmp.results {
                lines.push(format!(
                    "| {} | {}/{} | {}/{} | {} | {} | {} |",
                    r.event_name,
                    r.x1,
                    r.n1,
                    r.x2,
                    r.n2,
                    fmt_opt(r.z, 3),
                    fmt_opt(r.p_value, 4),
                    r.verdict.as_str()
                ));
            }
            lines.push(String::new());
            lines.push(format!(
                "- Tests: {} | Significant: {} | Undefined: {} | Family-wise error bound: {:.3}{}",
                cmp.tests_run,
                cmp.significant,
                cmp.undefined,
                cmp.familywise_error_bound,
                cmp.bonferroni_alpha
                    .map(|a| format!(" | Bonferroni α: {:.4}", a))
                    .unwrap_or_default()
            ));
            lines.push(String::new());
        }
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::events::{EventLog, EventRecord};
    use crate::pipeline;

    fn sample_report() -> AnalysisReport {
        let mut config = Config::defaults();
        config.date_cutoff = None;
        let mut records = Vec::new();
        for (group, n) in [(246u32, 20), (247, 20), (248, 20)] {
            for i in 0..n {
                let user = format!("{}-{}", group, i);
                records.push(
                    EventRecord::from_epoch("MainScreenAppear", user.as_str(), 1_564_700_000, group)
                        .unwrap(),
                );
                if i < group as usize % 10 + 5 {
                    records.push(
                        EventRecord::from_epoch("OffersScreenAppear", user.as_str(), 1_564_700_100, group)
                            .unwrap(),
                    );
                }
            }
        }
        pipeline::analyze(&EventLog::new(records), &config).unwrap()
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!(OutputFormat::parse("table").unwrap(), OutputFormat::Table);
        assert_eq!(OutputFormat::parse("MD").unwrap(), OutputFormat::Markdown);
        assert_eq!(OutputFormat::parse("json").unwrap(), OutputFormat::Json);
        assert_eq!(OutputFormat::parse("yml").unwrap(), OutputFormat::Yaml);
        assert!(matches!(
            OutputFormat::parse("xml"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_render_table_contains_sections() {
        let text = render(&sample_report(), OutputFormat::Table, Sections::ALL).unwrap();
        assert!(text.contains("=== Event log ==="));
        assert!(text.contains("=== Funnel ==="));
        assert!(text.contains("MainScreenAppear -> OffersScreenAppear"));
        assert!(text.contains("=== Groups ==="));
        assert!(text.contains("246 vs 247 (alpha = 0.05)"));
        assert!(text.contains("No multiple-comparison correction"));
    }

    #[test]
    fn test_render_table_undefined_ratio_shows_dash() {
        let text = render(&sample_report(), OutputFormat::Table, Sections {
            funnel: true,
            ..Sections::NONE
        })
        .unwrap();
        // Nobody reached the cart, so Cart -> Payment has no base
        let line = text
            .lines()
            .find(|l| l.starts_with("CartScreenAppear -> PaymentScreenSuccessful"))
            .unwrap();
        assert!(line.trim_end().ends_with('-'));
        assert!(!text.contains("=== Groups ==="));
    }

    #[test]
    fn test_render_markdown() {
        let md = render(&sample_report(), OutputFormat::Markdown, Sections::ALL).unwrap();
        assert!(md.starts_with("# Funnel & experiment report"));
        assert!(md.contains("## Funnel"));
        assert!(md.contains("| MainScreenAppear → OffersScreenAppear |"));
        assert!(md.contains("undefined"));
        assert!(md.contains("### 246+247 vs 248 (α = 0.1)"));
    }

    #[test]
    fn test_render_json_selects_sections() {
        let json = render(&sample_report(), OutputFormat::Json, Sections {
            tests: true,
            ..Sections::NONE
        })
        .unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert!(value.get("comparisons").is_some());
        assert!(value.get("funnel").is_none());
        assert_eq!(value["comparisons"].as_array().unwrap().len(), 4);
        assert_eq!(value["comparisons"][0]["comparison"]["label"], "246 vs 247");
    }

    #[test]
    fn test_render_yaml() {
        let yaml = render(&sample_report(), OutputFormat::Yaml, Sections::ALL).unwrap();
        assert!(yaml.contains("funnel:"));
        assert!(yaml.contains("comparisons:"));
    }

    #[test]
    fn test_persist_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("report.md");
        persist(&path, "# report").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "# report");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("PaymentScreenSuccessful", 10), "Payment...");
    }
}
