use std::collections::HashMap;
use std::fmt;

use log::{debug, warn};
use serde::Serialize;

use crate::core::scope::{ProgramData, ScopeElement};
use crate::core::state::Snapshot;
use crate::modules::Platform;

/// Persisted program count above which an empty fresh poll is not trusted.
pub const DEFAULT_WIPE_THRESHOLD: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChangeKind {
    Added,
    Removed,
    Updated,
    ProgramRemoved,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Added => write!(f, "added"),
            ChangeKind::Removed => write!(f, "removed"),
            ChangeKind::Updated => write!(f, "updated"),
            ChangeKind::ProgramRemoved => write!(f, "program removed"),
        }
    }
}

/// One difference between the persisted and the fresh snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub platform: Platform,
    pub program_url: String,
    /// Empty for `ProgramRemoved`.
    pub target: String,
    pub in_scope: bool,
    pub old_value: Option<ScopeElement>,
    pub new_value: Option<ScopeElement>,
}

/// Result of comparing two snapshots.
#[derive(Debug, Clone, PartialEq)]
pub enum DiffOutcome {
    /// Nothing was persisted yet: store the fresh snapshot, report nothing.
    Baseline,
    Changes(Vec<ChangeEvent>),
    /// The fresh poll came back empty while many programs were persisted.
    /// Do not persist and do not trust this poll.
    SuspectedWipe { persisted_programs: usize },
}

impl DiffOutcome {
    pub fn should_persist(&self) -> bool {
        !matches!(self, DiffOutcome::SuspectedWipe { .. })
    }

    pub fn events(&self) -> &[ChangeEvent] {
        match self {
            DiffOutcome::Changes(events) => events,
            _ => &[],
        }
    }
}

/// Stateless snapshot comparison with a guard against mass-deletion noise.
#[derive(Debug, Clone, Copy)]
pub struct ChangeDetector {
    wipe_threshold: usize,
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self {
            wipe_threshold: DEFAULT_WIPE_THRESHOLD,
        }
    }
}

impl ChangeDetector {
    pub fn new(wipe_threshold: usize) -> Self {
        Self { wipe_threshold }
    }

    pub fn diff(&self, persisted: Option<&Snapshot>, fresh: &Snapshot) -> DiffOutcome {
        let Some(persisted) = persisted else {
            debug!("{}: no previous snapshot, recording baseline", fresh.platform);
            return DiffOutcome::Baseline;
        };

        if fresh.is_empty() && persisted.len() > self.wipe_threshold {
            warn!(
                "{}: fresh poll is empty but {} programs are on record, refusing to diff",
                fresh.platform,
                persisted.len()
            );
            return DiffOutcome::SuspectedWipe {
                persisted_programs: persisted.len(),
            };
        }

        let platform = fresh.platform;
        let mut events = Vec::new();

        for (url, old) in &persisted.programs {
            match fresh.programs.get(url) {
                None => events.push(ChangeEvent {
                    kind: ChangeKind::ProgramRemoved,
                    platform,
                    program_url: url.clone(),
                    target: String::new(),
                    in_scope: true,
                    old_value: None,
                    new_value: None,
                }),
                Some(new) => diff_program(platform, old, new, &mut events),
            }
        }

        for (url, new) in &fresh.programs {
            if !persisted.programs.contains_key(url) {
                let empty = ProgramData::new(url.clone());
                diff_program(platform, &empty, new, &mut events);
            }
        }

        DiffOutcome::Changes(events)
    }
}

fn diff_program(platform: Platform, old: &ProgramData, new: &ProgramData, events: &mut Vec<ChangeEvent>) {
    diff_table(platform, &new.url, true, &old.in_scope, &new.in_scope, events);
    diff_table(platform, &new.url, false, &old.out_of_scope, &new.out_of_scope, events);
}

fn keyed(elements: &[ScopeElement]) -> HashMap<(&str, &str), &ScopeElement> {
    elements
        .iter()
        .filter(|e| !e.is_no_scope_table())
        .map(|e| ((e.target.as_str(), e.category.as_str()), e))
        .collect()
}

fn diff_table(
    platform: Platform,
    url: &str,
    in_scope: bool,
    old: &[ScopeElement],
    new: &[ScopeElement],
    events: &mut Vec<ChangeEvent>,
) {
    let old_keyed = keyed(old);
    let new_keyed = keyed(new);

    let event = |kind, target: &str, old_value: Option<&ScopeElement>, new_value: Option<&ScopeElement>| ChangeEvent {
        kind,
        platform,
        program_url: url.to_string(),
        target: target.to_string(),
        in_scope,
        old_value: old_value.cloned(),
        new_value: new_value.cloned(),
    };

    for element in new.iter().filter(|e| !e.is_no_scope_table()) {
        let key = (element.target.as_str(), element.category.as_str());
        if !new_keyed.get(&key).is_some_and(|kept| std::ptr::eq(*kept, element)) {
            // duplicate key inside one table, the last copy wins
            continue;
        }
        match old_keyed.get(&key).copied() {
            None => events.push(event(ChangeKind::Added, &element.target, None, Some(element))),
            Some(previous) if previous.description != element.description => {
                events.push(event(ChangeKind::Updated, &element.target, Some(previous), Some(element)))
            }
            Some(_) => {}
        }
    }

    for element in old.iter().filter(|e| !e.is_no_scope_table()) {
        let key = (element.target.as_str(), element.category.as_str());
        if !old_keyed.get(&key).is_some_and(|kept| std::ptr::eq(*kept, element)) {
            continue;
        }
        if !new_keyed.contains_key(&key) {
            events.push(event(ChangeKind::Removed, &element.target, Some(element), None));
        }
    }
}
