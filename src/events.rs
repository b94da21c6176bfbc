//! Event log loading and cleaning.
//!
//! The source is a tab-separated file with four positional columns:
//! event name, user id, epoch-seconds timestamp, experiment group id.
//! Header names are ignored; columns are always read by position.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

use crate::{Error, Result};

const COLUMNS: [&str; 4] = ["event_name", "user_id", "timestamp", "group"];

/// Experiment group identifier (e.g. 246, 247, 248).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct GroupId(pub u32);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single logged event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EventRecord {
    pub event_name: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub group: GroupId,
}

impl EventRecord {
    pub fn new(
        event_name: impl Into<String>,
        user_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        group: GroupId,
    ) -> Self {
        Self {
            event_name: event_name.into(),
            user_id: user_id.into(),
            timestamp,
            group,
        }
    }

    /// Build a record from an epoch-seconds timestamp.
    pub fn from_epoch(
        event_name: impl Into<String>,
        user_id: impl Into<String>,
        epoch_seconds: i64,
        group: u32,
    ) -> Result<Self> {
        let timestamp = DateTime::from_timestamp(epoch_seconds, 0).ok_or_else(|| {
            Error::MalformedInput(format!("timestamp {} is out of range", epoch_seconds))
        })?;
        Ok(Self::new(event_name, user_id, timestamp, GroupId(group)))
    }

    /// Calendar day (UTC) of the event.
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// Result of dropping the warm-up period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateFilterReport {
    pub cutoff: NaiveDate,
    pub rows_removed: usize,
    pub rows_removed_pct: f64,
    pub users_removed: usize,
    pub users_removed_pct: f64,
}

/// What the cleaning stage did to the raw log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleaningReport {
    pub rows_read: usize,
    pub duplicates_removed: usize,
    pub date_filter: Option<DateFilterReport>,
    pub rows_kept: usize,
}

/// Events on a single calendar day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub events: usize,
}

/// Descriptive statistics of a log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogSummary {
    pub total_events: usize,
    pub unique_users: usize,
    pub mean_events_per_user: f64,
    pub median_events_per_user: f64,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    pub events_per_day: Vec<DailyCount>,
}

/// Ordered, in-memory event log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventLog {
    records: Vec<EventRecord>,
}

impl From<Vec<EventRecord>> for EventLog {
    fn from(records: Vec<EventRecord>) -> Self {
        Self { records }
    }
}

impl EventLog {
    pub fn new(records: Vec<EventRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EventRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Load a TSV event log from disk.
    pub fn load<P: AsRef<Path>>(path: P, has_headers: bool) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let log = Self::read_tsv(file, has_headers)?;
        info!(path = %path.display(), rows = log.len(), "Loaded event log");
        Ok(log)
    }

    /// Parse a TSV event log from any reader.
    pub fn read_tsv<R: Read>(reader: R, has_headers: bool) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(has_headers)
            .flexible(true)
            .from_reader(reader);

        let mut records = Vec::new();
        for row in rdr.records() {
            let row = row?;
            let line = row.position().map(|p| p.line()).unwrap_or(0);
            records.push(parse_row(&row, line)?);
        }

        Ok(Self { records })
    }

    /// Remove fully identical rows, keeping the first occurrence.
    pub fn deduplicate(&self) -> (EventLog, usize) {
        let mut seen: HashSet<&EventRecord> = HashSet::with_capacity(self.records.len());
        let records: Vec<EventRecord> = self
            .records
            .iter()
            .filter(|r| seen.insert(*r))
            .cloned()
            .collect();
        let removed = self.records.len() - records.len();
        (EventLog { records }, removed)
    }

    /// Keep only records dated strictly after `cutoff`.
    pub fn filter_after(&self, cutoff: NaiveDate) -> (EventLog, DateFilterReport) {
        let records: Vec<EventRecord> = self
            .records
            .iter()
            .filter(|r| r.date() > cutoff)
            .cloned()
            .collect();
        let kept = EventLog { records };

        let rows_removed = self.len() - kept.len();
        let users_before = self.unique_users();
        let users_removed = users_before - kept.unique_users();

        let report = DateFilterReport {
            cutoff,
            rows_removed,
            rows_removed_pct: percent(rows_removed, self.len()),
            users_removed,
            users_removed_pct: percent(users_removed, users_before),
        };
        (kept, report)
    }

    pub fn unique_users(&self) -> usize {
        self.records
            .iter()
            .map(|r| r.user_id.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    /// Earliest and latest event dates.
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let first = self.records.iter().map(EventRecord::date).min()?;
        let last = self.records.iter().map(EventRecord::date).max()?;
        Some((first, last))
    }

    /// Distinct event names in lexical order.
    pub fn event_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .records
            .iter()
            .map(|r| r.event_name.as_str())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        names.sort_unstable();
        names
    }

    pub fn summary(&self) -> LogSummary {
        let mut per_user: BTreeMap<&str, usize> = BTreeMap::new();
        let mut per_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();
        for r in &self.records {
            *per_user.entry(r.user_id.as_str()).or_default() += 1;
            *per_day.entry(r.date()).or_default() += 1;
        }

        let unique_users = per_user.len();
        let mean_events_per_user = if unique_users > 0 {
            self.records.len() as f64 / unique_users as f64
        } else {
            0.0
        };

        let mut counts: Vec<usize> = per_user.into_values().collect();
        counts.sort_unstable();
        let median_events_per_user = median(&counts);

        let (first_date, last_date) = match self.date_range() {
            Some((first, last)) => (Some(first), Some(last)),
            None => (None, None),
        };

        LogSummary {
            total_events: self.records.len(),
            unique_users,
            mean_events_per_user,
            median_events_per_user,
            first_date,
            last_date,
            events_per_day: per_day
                .into_iter()
                .map(|(date, events)| DailyCount { date, events })
                .collect(),
        }
    }
}

/// Deduplicate, then drop everything up to and including `cutoff`.
pub fn clean(raw: &EventLog, cutoff: Option<NaiveDate>) -> (EventLog, CleaningReport) {
    let (deduped, duplicates_removed) = raw.deduplicate();
    clean_deduplicated(deduped, raw.len(), duplicates_removed, cutoff)
}

/// Second half of [`clean`] for a log the caller already deduplicated.
pub fn clean_deduplicated(
    deduped: EventLog,
    rows_read: usize,
    duplicates_removed: usize,
    cutoff: Option<NaiveDate>,
) -> (EventLog, CleaningReport) {
    info!(
        duplicates = duplicates_removed,
        remaining = deduped.len(),
        "Removed duplicate rows"
    );

    let (cleaned, date_filter) = match cutoff {
        Some(cutoff) => {
            let (filtered, report) = deduped.filter_after(cutoff);
            info!(
                %cutoff,
                rows_removed = report.rows_removed,
                rows_removed_pct = report.rows_removed_pct,
                users_removed = report.users_removed,
                "Dropped warm-up period"
            );
            (filtered, Some(report))
        }
        None => {
            debug!("No date cutoff configured");
            (deduped, None)
        }
    };

    let report = CleaningReport {
        rows_read,
        duplicates_removed,
        date_filter,
        rows_kept: cleaned.len(),
    };
    (cleaned, report)
}

fn parse_row(row: &csv::StringRecord, line: u64) -> Result<EventRecord> {
    if row.len() != COLUMNS.len() {
        return Err(Error::malformed(
            line,
            format!("expected {} columns, found {}", COLUMNS.len(), row.len()),
        ));
    }

    let mut fields = [""; 4];
    for (i, name) in COLUMNS.iter().enumerate() {
        let value = row.get(i).map(str::trim).unwrap_or_default();
        if value.is_empty() {
            return Err(Error::malformed(line, format!("missing {}", name)));
        }
        fields[i] = value;
    }

    let epoch: i64 = fields[2].parse().map_err(|_| {
        Error::malformed(line, format!("timestamp {:?} is not an integer", fields[2]))
    })?;
    let group: u32 = fields[3].parse().map_err(|_| {
        Error::malformed(line, format!("group {:?} is not an integer", fields[3]))
    })?;

    EventRecord::from_epoch(fields[0], fields[1], epoch, group)
        .map_err(|e| Error::malformed(line, e.to_string()))
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole > 0 {
        part as f64 / whole as f64 * 100.0
    } else {
        0.0
    }
}

fn median(sorted: &[usize]) -> f64 {
    match sorted.len() {
        0 => 0.0,
        n if n % 2 == 1 => sorted[n / 2] as f64,
        n => (sorted[n / 2 - 1] + sorted[n / 2]) as f64 / 2.0,
    }
}
