//! Funnel aggregation: per-event counts and stage-to-stage conversion.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

use crate::events::EventLog;
use crate::{Error, Result};

/// Counts for one event name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunnelEntry {
    pub event_name: String,
    pub occurrences: usize,
    pub unique_users: usize,
    /// Share of all users in the log who performed the event at least once.
    pub user_share_pct: f64,
}

/// Event counts ranked by unique users (desc), then event name (asc).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FunnelTable {
    entries: Vec<FunnelEntry>,
}

impl FunnelTable {
    pub fn from_log(log: &EventLog) -> Self {
        let mut occurrences: HashMap<&str, usize> = HashMap::new();
        let mut users: HashMap<&str, HashSet<&str>> = HashMap::new();
        let mut all_users: HashSet<&str> = HashSet::new();

        for r in log.iter() {
            *occurrences.entry(r.event_name.as_str()).or_default() += 1;
            users
                .entry(r.event_name.as_str())
                .or_default()
                .insert(r.user_id.as_str());
            all_users.insert(r.user_id.as_str());
        }

        let total_users = all_users.len();
        let mut entries: Vec<FunnelEntry> = occurrences
            .into_iter()
            .map(|(event, count)| {
                let unique_users = users.get(event).map(HashSet::len).unwrap_or(0);
                FunnelEntry {
                    event_name: event.to_string(),
                    occurrences: count,
                    unique_users,
                    user_share_pct: percent(unique_users, total_users).unwrap_or(0.0),
                }
            })
            .collect();

        entries.sort_by(|a, b| {
            b.unique_users
                .cmp(&a.unique_users)
                .then_with(|| a.event_name.cmp(&b.event_name))
        });

        Self { entries }
    }

    pub fn entries(&self) -> &[FunnelEntry] {
        &self.entries
    }

    pub fn get(&self, event_name: &str) -> Option<&FunnelEntry> {
        self.entries.iter().find(|e| e.event_name == event_name)
    }

    /// Unique users for an event; zero when the event never occurs.
    pub fn unique_users(&self, event_name: &str) -> usize {
        self.get(event_name).map(|e| e.unique_users).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Conversion between two funnel stages, in percent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionStep {
    pub from: String,
    pub to: String,
    pub from_users: usize,
    pub to_users: usize,
    /// `None` when nobody reached `from`.
    pub ratio: Option<f64>,
}

impl ConversionStep {
    pub fn new(from: &str, to: &str, table: &FunnelTable) -> Self {
        let from_users = table.unique_users(from);
        let to_users = table.unique_users(to);
        Self {
            from: from.to_string(),
            to: to.to_string(),
            from_users,
            to_users,
            ratio: percent(to_users, from_users),
        }
    }

    /// The ratio, or `DivisionUndefined` for a zero base.
    pub fn ratio(&self) -> Result<f64> {
        self.ratio.ok_or_else(|| Error::DivisionUndefined {
            from: self.from.clone(),
            to: self.to.clone(),
        })
    }

    pub fn is_defined(&self) -> bool {
        self.ratio.is_some()
    }
}

/// Output of the funnel stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunnelReport {
    pub funnel_order: Vec<String>,
    pub table: FunnelTable,
    pub steps: Vec<ConversionStep>,
    /// First funnel event to last.
    pub overall: Option<ConversionStep>,
}

impl FunnelReport {
    /// Steps whose base had no users.
    pub fn undefined_steps(&self) -> impl Iterator<Item = &ConversionStep> {
        self.steps
            .iter()
            .chain(self.overall.iter())
            .filter(|s| !s.is_defined())
    }
}

/// Aggregate a cleaned log along `funnel_order`.
pub fn analyze(log: &EventLog, funnel_order: &[String]) -> FunnelReport {
    let table = FunnelTable::from_log(log);

    let steps: Vec<ConversionStep> = funnel_order
        .windows(2)
        .map(|pair| ConversionStep::new(&pair[0], &pair[1], &table))
        .collect();

    let overall = match (funnel_order.first(), funnel_order.last()) {
        (Some(first), Some(last)) if funnel_order.len() > 1 => {
            Some(ConversionStep::new(first, last, &table))
        }
        _ => None,
    };

    let report = FunnelReport {
        funnel_order: funnel_order.to_vec(),
        table,
        steps,
        overall,
    };

    for step in report.undefined_steps() {
        warn!(from = %step.from, to = %step.to, "Conversion undefined: no users at base stage");
    }
    info!(
        events = report.table.len(),
        completion = ?report.overall.as_ref().and_then(|s| s.ratio),
        "Funnel aggregated"
    );

    report
}

fn percent(part: usize, whole: usize) -> Option<f64> {
    if whole == 0 {
        None
    } else {
        Some(part as f64 / whole as f64 * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_FUNNEL;
    use crate::events::EventRecord;

    fn record(event: &str, user: &str, ts: i64) -> EventRecord {
        EventRecord::from_epoch(event, user, ts, 246).unwrap()
    }

    fn default_order() -> Vec<String> {
        DEFAULT_FUNNEL.iter().map(|s| s.to_string()).collect()
    }

    fn funnel_log() -> EventLog {
        let mut records = Vec::new();
        // 4 users see the main screen, u1 twice
        for u in ["u1", "u2", "u3", "u4"] {
            records.push(record("MainScreenAppear", u, 10));
        }
        records.push(record("MainScreenAppear", "u1", 20));
        for u in ["u1", "u2"] {
            records.push(record("OffersScreenAppear", u, 30));
        }
        records.push(record("CartScreenAppear", "u1", 40));
        records.push(record("PaymentScreenSuccessful", "u1", 50));
        records.push(record("Tutorial", "u4", 5));
        EventLog::new(records)
    }

    #[test]
    fn test_table_counts() {
        let table = FunnelTable::from_log(&funnel_log());
        let main = table.get("MainScreenAppear").unwrap();
        assert_eq!(main.occurrences, 5);
        assert_eq!(main.unique_users, 4);
        assert!((main.user_share_pct - 100.0).abs() < 1e-9);
        assert_eq!(table.unique_users("OffersScreenAppear"), 2);
        assert_eq!(table.unique_users("NeverHappened"), 0);
    }

    #[test]
    fn test_unique_never_exceeds_occurrences() {
        let table = FunnelTable::from_log(&funnel_log());
        for entry in table.entries() {
            assert!(entry.unique_users <= entry.occurrences, "{}", entry.event_name);
        }
    }

    #[test]
    fn test_ranking_with_ties() {
        let table = FunnelTable::from_log(&funnel_log());
        let names: Vec<&str> = table.entries().iter().map(|e| e.event_name.as_str()).collect();
        // Cart, Payment and Tutorial tie at one user and fall back to name order
        assert_eq!(
            names,
            vec![
                "MainScreenAppear",
                "OffersScreenAppear",
                "CartScreenAppear",
                "PaymentScreenSuccessful",
                "Tutorial",
            ]
        );
    }

    #[test]
    fn test_conversion_steps() {
        let report = analyze(&funnel_log(), &default_order());
        assert_eq!(report.steps.len(), 3);

        let ratios: Vec<f64> = report.steps.iter().map(|s| s.ratio().unwrap()).collect();
        assert!((ratios[0] - 50.0).abs() < 1e-9);
        assert!((ratios[1] - 50.0).abs() < 1e-9);
        assert!((ratios[2] - 100.0).abs() < 1e-9);
        assert!(ratios.iter().all(|r| (0.0..=100.0).contains(r)));

        let overall = report.overall.as_ref().unwrap();
        assert_eq!(overall.from, "MainScreenAppear");
        assert_eq!(overall.to, "PaymentScreenSuccessful");
        assert!((overall.ratio().unwrap() - 25.0).abs() < 1e-9);
        assert_eq!(report.undefined_steps().count(), 0);
    }

    #[test]
    fn test_zero_base_is_undefined() {
        let log = EventLog::new(vec![record("OffersScreenAppear", "u1", 1)]);
        let report = analyze(&log, &default_order());

        let first = &report.steps[0];
        assert!(first.ratio.is_none());
        assert!(matches!(
            first.ratio(),
            Err(Error::DivisionUndefined { ref from, .. }) if from == "MainScreenAppear"
        ));
        // Offers -> Cart has a base and stays defined
        assert_eq!(report.steps[1].ratio().unwrap(), 0.0);
        assert_eq!(report.undefined_steps().count(), 3);
    }

    #[test]
    fn test_empty_log() {
        let report = analyze(&EventLog::default(), &default_order());
        assert!(report.table.is_empty());
        assert!(report.steps.iter().all(|s| !s.is_defined()));
        assert!(report.overall.as_ref().is_some_and(|s| !s.is_defined()));
    }

    #[test]
    fn test_custom_order() {
        let order = vec!["Tutorial".to_string(), "MainScreenAppear".to_string()];
        let report = analyze(&funnel_log(), &order);
        assert_eq!(report.steps.len(), 1);
        assert!((report.steps[0].ratio().unwrap() - 400.0).abs() < 1e-9);
    }

    #[test]
    fn test_table_serializes_as_list() {
        let table = FunnelTable::from_log(&funnel_log());
        let json = serde_json::to_value(&table).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["event_name"], "MainScreenAppear");
    }
}
