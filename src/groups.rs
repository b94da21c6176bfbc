//! Experiment group partitioning.
//!
//! Unique users per group, per group reaching the initial funnel event
//! (the test baseline), and per event per group.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{info, warn};

use crate::config::GroupsConfig;
use crate::events::{EventLog, EventRecord, GroupId};
use crate::{Error, Result};

/// User counts for one group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStats {
    pub group: GroupId,
    pub is_control: bool,
    pub users: usize,
    pub baseline_users: usize,
}

/// Output of the partition stage.
#[derive(Debug, Clone, Serialize)]
pub struct GroupCounts {
    pub initial_event: String,
    pub groups: Vec<GroupStats>,
    /// event name -> group -> unique users, baseline or not
    pub per_event: BTreeMap<String, BTreeMap<GroupId, usize>>,
    /// Users logged under more than one group.
    pub cross_group_users: usize,
    #[serde(skip)]
    event_users: HashMap<String, HashMap<GroupId, HashSet<String>>>,
}

impl GroupCounts {
    pub fn stats(&self, group: GroupId) -> Option<&GroupStats> {
        self.groups.iter().find(|g| g.group == group)
    }

    /// Unique users of `groups` (taken together) who reached the initial
    /// event and performed `event_name` in the same group.
    pub fn users_with_event(&self, event_name: &str, groups: &[GroupId]) -> usize {
        let (Some(by_group), Some(baseline)) = (
            self.event_users.get(event_name),
            self.event_users.get(&self.initial_event),
        ) else {
            return 0;
        };
        groups
            .iter()
            .filter_map(|g| Some((by_group.get(g)?, baseline.get(g)?)))
            .flat_map(|(users, reached)| users.intersection(reached))
            .collect::<HashSet<_>>()
            .len()
    }

    /// Baseline for a side of a comparison.
    pub fn baseline(&self, groups: &[GroupId]) -> usize {
        self.users_with_event(&self.initial_event, groups)
    }

    /// Event names seen in the partitioned log, lexical order.
    pub fn event_names(&self) -> impl Iterator<Item = &str> {
        self.per_event.keys().map(String::as_str)
    }
}

/// Fail on the first record whose group is not configured.
pub fn check_groups(log: &EventLog, config: &GroupsConfig) -> Result<()> {
    match log.iter().find(|r| !config.contains(r.group)) {
        Some(r) => Err(unknown_group(r)),
        None => Ok(()),
    }
}

fn unknown_group(r: &EventRecord) -> Error {
    Error::MalformedInput(format!(
        "unknown experiment group {} for user {} ({})",
        r.group, r.user_id, r.event_name
    ))
}

/// Split a cleaned log by experiment group.
pub fn partition(log: &EventLog, config: &GroupsConfig, initial_event: &str) -> Result<GroupCounts> {
    let mut users: HashMap<GroupId, HashSet<&str>> = HashMap::new();
    let mut event_users: HashMap<String, HashMap<GroupId, HashSet<String>>> = HashMap::new();
    let mut groups_of_user: HashMap<&str, HashSet<GroupId>> = HashMap::new();

    for r in log.iter() {
        if !config.contains(r.group) {
            return Err(unknown_group(r));
        }
        users.entry(r.group).or_default().insert(r.user_id.as_str());
        groups_of_user
            .entry(r.user_id.as_str())
            .or_default()
            .insert(r.group);
        event_users
            .entry(r.event_name.clone())
            .or_default()
            .entry(r.group)
            .or_default()
            .insert(r.user_id.clone());
    }

    let cross_group_users = groups_of_user.values().filter(|g| g.len() > 1).count();
    if cross_group_users > 0 {
        warn!(users = cross_group_users, "Users found in more than one experiment group");
    }

    let per_event: BTreeMap<String, BTreeMap<GroupId, usize>> = event_users
        .iter()
        .map(|(event, by_group)| {
            let counts = config
                .all()
                .into_iter()
                .map(|g| (g, by_group.get(&g).map(HashSet::len).unwrap_or(0)))
                .collect();
            (event.clone(), counts)
        })
        .collect();

    let groups: Vec<GroupStats> = config
        .all()
        .into_iter()
        .map(|g| GroupStats {
            group: g,
            is_control: config.control.contains(&g),
            users: users.get(&g).map(HashSet::len).unwrap_or(0),
            baseline_users: event_users
                .get(initial_event)
                .and_then(|by_group| by_group.get(&g))
                .map(HashSet::len)
                .unwrap_or(0),
        })
        .collect();

    for g in &groups {
        info!(
            group = %g.group,
            users = g.users,
            baseline = g.baseline_users,
            "Group partitioned"
        );
    }

    Ok(GroupCounts {
        initial_event: initial_event.to_string(),
        groups,
        per_event,
        cross_group_users,
        event_users,
    })
}
