//! Append-only run timeline with full-state snapshots.
//!
//! Each state-changing event is appended with a copy of the complete
//! [`RunState`] taken right after the change, so observers can step
//! through a run without replaying transitions.
//!
//! Observation goes through [`TimelineView`] and [`Snapshot`]. A snapshot
//! only exposes read accessors and has no conversion back into a
//! `RunState`, so it cannot be fed into a patch or any other mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::definition::{CircuitId, NodeId};
use crate::state::{LinkFlags, NodeFlags, Position, RunState};

/// Kinds of timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    RunStart,
    CircuitSelected,
    NodeHacked,
    NodeBlocked,
    LinksDiscovered,
    CircuitChanged,
    CircuitCompleted,
    RunCompleted,
}

impl EventKind {
    pub const ALL: [EventKind; 8] = [
        EventKind::RunStart,
        EventKind::CircuitSelected,
        EventKind::NodeHacked,
        EventKind::NodeBlocked,
        EventKind::LinksDiscovered,
        EventKind::CircuitChanged,
        EventKind::CircuitCompleted,
        EventKind::RunCompleted,
    ];

    /// Compact numeric code for table storage.
    pub fn code(self) -> u8 {
        match self {
            EventKind::RunStart => 0,
            EventKind::CircuitSelected => 1,
            EventKind::NodeHacked => 2,
            EventKind::NodeBlocked => 3,
            EventKind::LinksDiscovered => 4,
            EventKind::CircuitChanged => 5,
            EventKind::CircuitCompleted => 6,
            EventKind::RunCompleted => 7,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }
}

/// Read-only copy of a run's state at one point of its timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(RunState);

impl Snapshot {
    pub fn position(&self) -> &Position {
        self.0.position()
    }

    pub fn node(&self, circuit_id: &str, node_id: &str) -> Option<NodeFlags> {
        self.0.circuit(circuit_id)?.node(node_id)
    }

    pub fn link(&self, circuit_id: &str, link_id: &str) -> Option<LinkFlags> {
        self.0.circuit(circuit_id)?.link(link_id)
    }

    /// Flags of the node the run stood on.
    pub fn position_node(&self) -> Option<NodeFlags> {
        let p = self.0.position();
        self.node(&p.circuit_id, &p.node_id)
    }

    pub fn circuit_ids(&self) -> Vec<&str> {
        self.0.circuits().map(|(id, _)| id).collect()
    }

    pub fn discovered_nodes(&self, circuit_id: &str) -> Vec<&str> {
        self.0
            .circuit(circuit_id)
            .map(|c| c.discovered_nodes().into_iter().collect())
            .unwrap_or_default()
    }

    pub fn discovered_links(&self, circuit_id: &str) -> Vec<&str> {
        self.0
            .circuit(circuit_id)
            .map(|c| c.discovered_links().into_iter().collect())
            .unwrap_or_default()
    }

    pub fn is_circuit_completed(&self, circuit_id: &str) -> bool {
        self.0.circuit(circuit_id).is_some_and(|c| c.is_completed())
    }

    pub fn failed_attempts(&self, circuit_id: &str, node_id: &str) -> u32 {
        self.0
            .circuit(circuit_id)
            .map(|c| c.failed_attempts(node_id))
            .unwrap_or(0)
    }
}

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEvent {
    pub index: u32,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub circuit_id: CircuitId,
    pub description: String,
    pub snapshot: Snapshot,
}

impl TimelineEvent {
    /// Node the run stood on when the event was recorded.
    pub fn position_node(&self) -> &NodeId {
        &self.snapshot.position().node_id
    }
}

/// The ordered event log of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    events: Vec<TimelineEvent>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a timeline from stored events. Indices must run 0, 1, 2, …
    pub fn from_events(mut events: Vec<TimelineEvent>) -> Result<Self, String> {
        events.sort_by_key(|e| e.index);
        for (i, event) in events.iter().enumerate() {
            if event.index as usize != i {
                return Err(format!(
                    "timeline gap: expected index {i}, found {}",
                    event.index
                ));
            }
        }
        Ok(Self { events })
    }

    /// Record an event with a snapshot of `state`. Returns its index.
    pub fn append(
        &mut self,
        kind: EventKind,
        circuit_id: &str,
        description: impl Into<String>,
        state: &RunState,
        at: DateTime<Utc>,
    ) -> u32 {
        let index = self.events.len() as u32;
        let description = description.into();
        log::debug!("timeline #{index} {kind:?} [{circuit_id}] {description}");
        self.events.push(TimelineEvent {
            index,
            kind,
            timestamp: at,
            circuit_id: circuit_id.to_string(),
            description,
            snapshot: Snapshot(state.clone()),
        });
        index
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    /// Events appended at or after `index`.
    pub fn since(&self, index: usize) -> &[TimelineEvent] {
        self.events.get(index..).unwrap_or(&[])
    }

    pub fn view(&self) -> TimelineView<'_> {
        TimelineView {
            events: &self.events,
        }
    }
}

/// Read-only projection over a timeline.
#[derive(Debug, Clone, Copy)]
pub struct TimelineView<'a> {
    events: &'a [TimelineEvent],
}

impl<'a> TimelineView<'a> {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn event(&self, index: u32) -> Option<&'a TimelineEvent> {
        self.events.get(index as usize)
    }

    pub fn snapshot_at(&self, index: u32) -> Option<&'a Snapshot> {
        self.event(index).map(|e| &e.snapshot)
    }

    pub fn latest(&self) -> Option<&'a Snapshot> {
        self.events.last().map(|e| &e.snapshot)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'a TimelineEvent> {
        self.events.iter()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.iter().map(|e| e.kind).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|e| e.kind == kind).count()
    }
}
