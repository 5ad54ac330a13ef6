//! Matching groups against declared events and processed records.

use crate::config::EventInfo;
use crate::grouping::GroupedSensorFileSet;
use crate::scout::FileMetadata;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Read access to the persisted processed records.
pub trait ProcessedLookup {
    fn is_processed(&self, source_file: &str, event_label: &str) -> bool;
}

/// In-memory snapshot of processed (source_file, event_label) pairs.
#[derive(Debug, Default, Clone)]
pub struct ProcessedIndex {
    pairs: HashSet<(String, String)>,
}

impl ProcessedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, source_file: impl Into<String>, event_label: impl Into<String>) {
        self.pairs.insert((source_file.into(), event_label.into()));
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl ProcessedLookup for ProcessedIndex {
    fn is_processed(&self, source_file: &str, event_label: &str) -> bool {
        // HashSet<(String, String)> can't be probed with borrowed halves.
        self.pairs
            .contains(&(source_file.to_string(), event_label.to_string()))
    }
}

impl<S: Into<String>, E: Into<String>> FromIterator<(S, E)> for ProcessedIndex {
    fn from_iter<I: IntoIterator<Item = (S, E)>>(iter: I) -> Self {
        let mut index = Self::new();
        for (source_file, event_label) in iter {
            index.insert(source_file, event_label);
        }
        index
    }
}

/// A group paired with one event it still needs to be loaded for.
#[derive(Debug, Clone)]
pub struct MatchedPair {
    pub group: Arc<GroupedSensorFileSet>,
    pub event: EventInfo,
    /// Members with no processed record for `event`, in member order
    pub members: Vec<FileMetadata>,
}

impl MatchedPair {
    /// `group/event`, used as the subject of log entries.
    pub fn subject(&self) -> String {
        format!("{}/{}", self.group.display_key(), self.event.label)
    }

    /// Members left out because they were loaded for this event before.
    pub fn members_already_processed(&self) -> usize {
        self.group.members.len() - self.members.len()
    }
}

/// Counters from one matching pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MatchSummary {
    pub groups_considered: u64,
    /// No event window overlaps the group
    pub groups_without_event: u64,
    /// Every overlapping event is already processed
    pub groups_already_processed: u64,
    pub pairs_matched: u64,
    pub pairs_already_processed: u64,
}

#[derive(Debug, Default)]
pub struct MatchOutcome {
    pub pairs: Vec<MatchedPair>,
    /// `group/event` subjects dropped because every member was processed
    pub already_processed: Vec<String>,
    pub summary: MatchSummary,
}

/// Filters groups down to (group, event) pairs that still need loading.
pub struct EventMatcher<'a> {
    events: &'a [EventInfo],
}

impl<'a> EventMatcher<'a> {
    pub fn new(events: &'a [EventInfo]) -> Self {
        Self { events }
    }

    /// Emit one pair per (group, overlapping event) carrying the members
    /// with no processed record for that event. A pair whose members are all
    /// processed is dropped. Pairs keep group order, then event declaration
    /// order.
    pub fn match_groups(
        &self,
        groups: Vec<GroupedSensorFileSet>,
        processed: &dyn ProcessedLookup,
    ) -> MatchOutcome {
        let mut outcome = MatchOutcome::default();

        for group in groups {
            outcome.summary.groups_considered += 1;
            let group = Arc::new(group);

            let overlapping: Vec<&EventInfo> = self
                .events
                .iter()
                .filter(|event| {
                    event
                        .window()
                        .map(|w| group.time_span.overlaps(&w))
                        .unwrap_or(false)
                })
                .collect();

            if overlapping.is_empty() {
                outcome.summary.groups_without_event += 1;
                debug!(group = %group.display_key(), "No event overlaps group");
                continue;
            }

            let mut matched_any = false;
            for event in overlapping {
                let pending: Vec<FileMetadata> = group
                    .members
                    .iter()
                    .filter(|m| !processed.is_processed(&m.source_file, &event.label))
                    .cloned()
                    .collect();
                let pair = MatchedPair {
                    group: Arc::clone(&group),
                    event: event.clone(),
                    members: pending,
                };
                if pair.members.is_empty() {
                    outcome.summary.pairs_already_processed += 1;
                    debug!(
                        group = %group.display_key(),
                        event = %event.label,
                        "Group already processed for event"
                    );
                    outcome.already_processed.push(pair.subject());
                    continue;
                }
                matched_any = true;
                outcome.summary.pairs_matched += 1;
                outcome.pairs.push(pair);
            }

            if !matched_any {
                outcome.summary.groups_already_processed += 1;
            }
        }

        outcome
    }
}
