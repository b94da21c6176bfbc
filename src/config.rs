//! Configuration for the funnel analysis pipeline
//!
//! Loads configuration from funnel.yml, with environment overrides

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::events::GroupId;
use crate::{Error, Result};

/// Default constants (fallback if funnel.yml not found)
pub const CONFIG_FILE: &str = "funnel.yml";
pub const DEFAULT_INPUT_PATH: &str = "logs_exp_us.csv";
pub const DEFAULT_FUNNEL: [&str; 4] = [
    "MainScreenAppear",
    "OffersScreenAppear",
    "CartScreenAppear",
    "PaymentScreenSuccessful",
];
pub const CONTROL_GROUPS: [u32; 2] = [246, 247];
pub const TREATMENT_GROUP: u32 = 248;
pub const AA_ALPHA: f64 = 0.05;
pub const AB_ALPHA: f64 = 0.1;

/// First days of the reference log are a sparse warm-up period.
pub fn default_cutoff() -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(2019, 7, 31)
}

pub const ENV_INPUT_PATH: &str = "FUNNEL_INPUT_PATH";
pub const ENV_DATE_CUTOFF: &str = "FUNNEL_DATE_CUTOFF";

/// Which groups are controls and which receive the treatment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupsConfig {
    pub control: Vec<GroupId>,
    pub treatment: Vec<GroupId>,
}

impl Default for GroupsConfig {
    fn default() -> Self {
        Self {
            control: CONTROL_GROUPS.iter().copied().map(GroupId).collect(),
            treatment: vec![GroupId(TREATMENT_GROUP)],
        }
    }
}

impl GroupsConfig {
    /// Every known group id, controls first.
    pub fn all(&self) -> Vec<GroupId> {
        self.control
            .iter()
            .chain(self.treatment.iter())
            .copied()
            .collect()
    }

    pub fn contains(&self, id: GroupId) -> bool {
        self.control.contains(&id) || self.treatment.contains(&id)
    }
}

/// One pairwise comparison with its own significance level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonConfig {
    #[serde(default)]
    pub label: Option<String>,
    pub a: Vec<GroupId>,
    pub b: Vec<GroupId>,
    pub alpha: f64,
}

impl ComparisonConfig {
    pub fn new(a: Vec<GroupId>, b: Vec<GroupId>, alpha: f64) -> Self {
        Self {
            label: None,
            a,
            b,
            alpha,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Main configuration struct
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ConfigFile")]
pub struct Config {
    pub input_path: PathBuf,
    pub has_headers: bool,
    pub date_cutoff: Option<NaiveDate>,
    pub funnel_order: Vec<String>,
    pub groups: GroupsConfig,
    pub comparisons: Vec<ComparisonConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults()
    }
}

/// On-disk layout of [`Config`]. Missing comparisons are derived from the
/// groups given in the same file.
#[derive(Deserialize)]
#[serde(default)]
struct ConfigFile {
    input_path: PathBuf,
    has_headers: bool,
    date_cutoff: Option<NaiveDate>,
    funnel_order: Vec<String>,
    groups: GroupsConfig,
    comparisons: Option<Vec<ComparisonConfig>>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        let defaults = Config::defaults();
        Self {
            input_path: defaults.input_path,
            has_headers: defaults.has_headers,
            date_cutoff: defaults.date_cutoff,
            funnel_order: defaults.funnel_order,
            groups: defaults.groups,
            comparisons: None,
        }
    }
}

impl From<ConfigFile> for Config {
    fn from(file: ConfigFile) -> Self {
        let comparisons = file
            .comparisons
            .unwrap_or_else(|| default_comparisons(&file.groups));
        Self {
            input_path: file.input_path,
            has_headers: file.has_headers,
            date_cutoff: file.date_cutoff,
            funnel_order: file.funnel_order,
            groups: file.groups,
            comparisons,
        }
    }
}

impl Config {
    /// Built-in defaults matching the reference experiment.
    pub fn defaults() -> Self {
        let groups = GroupsConfig::default();
        Self {
            input_path: PathBuf::from(DEFAULT_INPUT_PATH),
            has_headers: true,
            date_cutoff: default_cutoff(),
            funnel_order: DEFAULT_FUNNEL.iter().map(|e| e.to_string()).collect(),
            comparisons: default_comparisons(&groups),
            groups,
        }
    }

    /// Load configuration from funnel.yml or use defaults.
    /// Environment variables take precedence over file values.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_dotenv();

        let config = match path {
            Some(p) => Self::load_from_file(p)?,
            None => Self::load_from_file(CONFIG_FILE)
                .or_else(|_| Self::load_from_file(Path::new("..").join(CONFIG_FILE)))
                .unwrap_or_else(|_| Self::defaults()),
        };

        let config = config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load .env file into environment variables using dotenvy
    fn load_dotenv() {
        if dotenvy::dotenv().is_err() {
            let _ = dotenvy::from_filename("../.env");
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Override file values with FUNNEL_* environment variables.
    fn apply_env(mut self) -> Result<Self> {
        if let Ok(path) = std::env::var(ENV_INPUT_PATH) {
            if !path.trim().is_empty() {
                self.input_path = PathBuf::from(path);
            }
        }
        if let Ok(raw) = std::env::var(ENV_DATE_CUTOFF) {
            self.date_cutoff = parse_cutoff(&raw)?;
        }
        Ok(self)
    }

    /// Check internal consistency of the funnel, groups and comparisons.
    pub fn validate(&self) -> Result<()> {
        if self.funnel_order.len() < 2 {
            return Err(Error::InvalidArgument(
                "funnel_order needs at least two events".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for event in &self.funnel_order {
            if !seen.insert(event.as_str()) {
                return Err(Error::InvalidArgument(format!(
                    "funnel_order repeats event {}",
                    event
                )));
            }
        }

        let all = self.groups.all();
        if all.is_empty() {
            return Err(Error::InvalidArgument("no experiment groups configured".to_string()));
        }
        let unique: HashSet<_> = all.iter().collect();
        if unique.len() != all.len() {
            return Err(Error::InvalidArgument(
                "a group id is listed more than once".to_string(),
            ));
        }

        for cmp in &self.comparisons {
            if cmp.a.is_empty() || cmp.b.is_empty() {
                return Err(Error::InvalidArgument(
                    "comparison sides must name at least one group".to_string(),
                ));
            }
            if let Some(unknown) = cmp.a.iter().chain(&cmp.b).find(|g| !self.groups.contains(**g)) {
                return Err(Error::InvalidArgument(format!(
                    "comparison references unknown group {}",
                    unknown
                )));
            }
            if cmp.a.iter().any(|g| cmp.b.contains(g)) {
                return Err(Error::InvalidArgument(
                    "comparison sides overlap".to_string(),
                ));
            }
            if !(cmp.alpha > 0.0 && cmp.alpha < 1.0) {
                return Err(Error::InvalidArgument(format!(
                    "alpha must be in (0, 1), got {}",
                    cmp.alpha
                )));
            }
        }
        Ok(())
    }

    /// Initial funnel event; the baseline for every test.
    pub fn initial_event(&self) -> &str {
        self.funnel_order.first().map(String::as_str).unwrap_or_default()
    }
}

/// Parse a cutoff date; `none`, `off` or an empty value disable the filter.
pub fn parse_cutoff(raw: &str) -> Result<Option<NaiveDate>> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("none") || raw.eq_ignore_ascii_case("off") {
        return Ok(None);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(Some)
        .map_err(|e| Error::InvalidArgument(format!("invalid cutoff date {}: {}", raw, e)))
}

/// A/A test between the first two controls, then every control (and the
/// pooled controls, when there are several) against every treatment group.
pub fn default_comparisons(groups: &GroupsConfig) -> Vec<ComparisonConfig> {
    let mut comparisons = Vec::new();

    if let [first, second, ..] = groups.control.as_slice() {
        comparisons.push(ComparisonConfig::new(vec![*first], vec![*second], AA_ALPHA));
    }

    for treatment in &groups.treatment {
        for control in &groups.control {
            comparisons.push(ComparisonConfig::new(vec![*control], vec![*treatment], AB_ALPHA));
        }
        if groups.control.len() > 1 {
            comparisons.push(ComparisonConfig::new(
                groups.control.clone(),
                vec![*treatment],
                AB_ALPHA,
            ));
        }
    }

    comparisons
}
