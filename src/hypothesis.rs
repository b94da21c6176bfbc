//! Two-proportion z-tests between experiment groups.
//!
//! For every event, the share of baseline users (users who reached the
//! initial funnel event) that performed the event is compared between the
//! two sides of a comparison. Each comparison carries its own alpha.
//!
//! No multiple-comparison correction is applied to the verdicts. The
//! family-wise error bound and the Bonferroni threshold are reported next to
//! the results so the reader can judge the risk of false positives.

use serde::Serialize;
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::{debug, info};

use crate::config::ComparisonConfig;
use crate::events::GroupId;
use crate::groups::GroupCounts;
use crate::{Error, Result};

/// Test statistic and two-sided p-value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ZTest {
    pub p1: f64,
    pub p2: f64,
    pub p_pool: f64,
    pub z: f64,
    pub p_value: f64,
}

/// Pooled two-proportion z-test of x1/n1 against x2/n2.
pub fn two_proportion_z_test(x1: usize, n1: usize, x2: usize, n2: usize) -> Result<ZTest> {
    if n1 == 0 || n2 == 0 {
        return Err(Error::InsufficientSample(format!(
            "empty baseline (n1 = {}, n2 = {})",
            n1, n2
        )));
    }

    if x1 > n1 || x2 > n2 {
        return Err(Error::InvalidArgument(format!(
            "successes exceed baseline (x1 = {}, n1 = {}, x2 = {}, n2 = {})",
            x1, n1, x2, n2
        )));
    }

    let (x1f, n1f, x2f, n2f) = (x1 as f64, n1 as f64, x2 as f64, n2 as f64);
    let p1 = x1f / n1f;
    let p2 = x2f / n2f;
    let p_pool = (x1f + x2f) / (n1f + n2f);

    let variance = p_pool * (1.0 - p_pool) * (1.0 / n1f + 1.0 / n2f);
    if !(variance > 0.0) {
        return Err(Error::InsufficientSample(format!(
            "pooled proportion {:.4} leaves no variance",
            p_pool
        )));
    }

    let z = (p1 - p2) / variance.sqrt();
    let normal = Normal::new(0.0, 1.0).map_err(|e| Error::InvalidArgument(e.to_string()))?;
    let p_value = 2.0 * (1.0 - normal.cdf(z.abs()));

    Ok(ZTest {
        p1,
        p2,
        p_pool,
        z,
        p_value,
    })
}

/// Two sides of a test and the significance level to judge it at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub label: String,
    pub a: Vec<GroupId>,
    pub b: Vec<GroupId>,
    pub alpha: f64,
}

impl Comparison {
    pub fn new(a: Vec<GroupId>, b: Vec<GroupId>, alpha: f64) -> Self {
        let label = format!("{} vs {}", side_label(&a), side_label(&b));
        Self { label, a, b, alpha }
    }

    /// Same comparison with the sides swapped.
    pub fn swapped(&self) -> Self {
        Self::new(self.b.clone(), self.a.clone(), self.alpha)
    }
}

impl From<&ComparisonConfig> for Comparison {
    fn from(cfg: &ComparisonConfig) -> Self {
        let mut cmp = Comparison::new(cfg.a.clone(), cfg.b.clone(), cfg.alpha);
        if let Some(label) = &cfg.label {
            cmp.label = label.clone();
        }
        cmp
    }
}

fn side_label(groups: &[GroupId]) -> String {
    groups
        .iter()
        .map(GroupId::to_string)
        .collect::<Vec<_>>()
        .join("+")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Significant,
    NotSignificant,
    Undefined,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Significant => "significant",
            Verdict::NotSignificant => "not significant",
            Verdict::Undefined => "undefined",
        }
    }
}

/// One event tested within one comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestResult {
    pub event_name: String,
    pub group_a: Vec<GroupId>,
    pub group_b: Vec<GroupId>,
    pub alpha: f64,
    pub x1: usize,
    pub n1: usize,
    pub x2: usize,
    pub n2: usize,
    pub z: Option<f64>,
    pub p_value: Option<f64>,
    pub verdict: Verdict,
    /// Why the test could not be computed.
    pub reason: Option<String>,
}

impl TestResult {
    pub fn is_significant(&self) -> bool {
        self.verdict == Verdict::Significant
    }
}

/// All events tested for one comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonReport {
    pub comparison: Comparison,
    pub results: Vec<TestResult>,
    pub tests_run: usize,
    pub significant: usize,
    pub undefined: usize,
    /// 1 - (1 - alpha)^k for the k tests that ran; verdicts are not adjusted.
    pub familywise_error_bound: f64,
    /// alpha / k, for reference only.
    pub bonferroni_alpha: Option<f64>,
}

/// Test a single event for a comparison.
pub fn test_event(counts: &GroupCounts, cmp: &Comparison, event_name: &str) -> TestResult {
    let n1 = counts.baseline(&cmp.a);
    let n2 = counts.baseline(&cmp.b);
    let x1 = counts.users_with_event(event_name, &cmp.a);
    let x2 = counts.users_with_event(event_name, &cmp.b);

    let mut result = TestResult {
        event_name: event_name.to_string(),
        group_a: cmp.a.clone(),
        group_b: cmp.b.clone(),
        alpha: cmp.alpha,
        x1,
        n1,
        x2,
        n2,
        z: None,
        p_value: None,
        verdict: Verdict::Undefined,
        reason: None,
    };

    match two_proportion_z_test(x1, n1, x2, n2) {
        Ok(test) => {
            result.z = Some(test.z);
            result.p_value = Some(test.p_value);
            result.verdict = if test.p_value < cmp.alpha {
                Verdict::Significant
            } else {
                Verdict::NotSignificant
            };
        }
        Err(err) => {
            debug!(event = event_name, comparison = %cmp.label, "Test undefined: {}", err);
            result.reason = Some(err.to_string());
        }
    }

    result
}

/// Test every event seen in the partitioned log.
pub fn run_comparison(counts: &GroupCounts, cmp: &Comparison) -> ComparisonReport {
    let results: Vec<TestResult> = counts
        .event_names()
        .map(|event| test_event(counts, cmp, event))
        .collect();

    let undefined = results
        .iter()
        .filter(|r| r.verdict == Verdict::Undefined)
        .count();
    let significant = results.iter().filter(|r| r.is_significant()).count();
    let tests_run = results.len() - undefined;

    let familywise_error_bound = 1.0 - (1.0 - cmp.alpha).powi(tests_run as i32);
    let bonferroni_alpha = (tests_run > 0).then(|| cmp.alpha / tests_run as f64);

    info!(
        comparison = %cmp.label,
        alpha = cmp.alpha,
        tests = tests_run,
        significant,
        undefined,
        "Comparison tested"
    );

    ComparisonReport {
        comparison: cmp.clone(),
        results,
        tests_run,
        significant,
        undefined,
        familywise_error_bound,
        bonferroni_alpha,
    }
}

pub fn run_all(counts: &GroupCounts, comparisons: &[Comparison]) -> Vec<ComparisonReport> {
    comparisons
        .iter()
        .map(|cmp| run_comparison(counts, cmp))
        .collect()
}
