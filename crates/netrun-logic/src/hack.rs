//! Run transitions: hack, move, circuit switch and explicit link reveal.
//!
//! Each function takes the pinned definition and a [`RunRecord`], checks
//! every precondition before touching anything, then applies the change
//! and appends its timeline events. Callers work on a copy of the stored
//! record and persist it only when the transition returns `Ok`.
//!
//! # Hack resolution
//!
//! A hack compares the input against the current node's `cd`. Meeting or
//! exceeding it succeeds (ties succeed). On failure the node's fail mode
//! decides:
//!
//! | Fail mode | Node afterwards | Event |
//! |-----------|-----------------|-------|
//! | `WARNING` | unchanged, failed-attempt counter +1 | none |
//! | `BLOQUEO` | `BLOCKED` (terminal) | `NODE_BLOCKED` |
//!
//! Hacking the final node of a circuit completes it. Completing the last
//! incomplete circuit of the definition completes the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::definition::{get_circuit, get_link, get_node, FailMode, NodeId, ProjectDefinition};
use crate::discovery::{check_move, closure_after_hack, reveal_link as reveal_one, Revealed};
use crate::error::{EngineError, EngineResult};
use crate::run::{RunRecord, RunStatus};
use crate::state::{apply_patch, initialize, NodeStatus, Position, RunState, StatePatch};
use crate::timeline::EventKind;

/// A validated hack input value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HackInput(u32);

impl HackInput {
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// Parse a raw input such as a form field. Must be a non-negative integer.
    pub fn parse(raw: &str) -> EngineResult<Self> {
        let value: i64 = raw.trim().parse().map_err(|_| {
            EngineError::validation(format!("hack input '{raw}' is not an integer"))
        })?;
        Self::try_from(value)
    }
}

impl TryFrom<i64> for HackInput {
    type Error = EngineError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u32::try_from(value)
            .map(HackInput)
            .map_err(|_| EngineError::validation(format!("hack input {value} is out of range")))
    }
}

/// Outcome of one hack attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HackResult {
    pub success: bool,
    pub node_id: NodeId,
    pub node_status: NodeStatus,
    /// WARNING failures recorded against the node so far.
    pub failed_attempts: u32,
    pub newly_revealed: Revealed,
    pub circuit_completed: bool,
    pub run_completed: bool,
    pub state: RunState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveResult {
    pub position: Position,
    pub state: RunState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchResult {
    pub position: Position,
    /// True when the circuit was entered for the first time.
    pub first_visit: bool,
    pub state: RunState,
}

/// Attempt to hack the node the run is standing on.
pub fn attempt_hack(
    def: &ProjectDefinition,
    record: &mut RunRecord,
    input: HackInput,
    now: DateTime<Utc>,
) -> EngineResult<HackResult> {
    record.run.ensure_active()?;
    let Position {
        circuit_id,
        node_id,
    } = record.state.position().clone();
    let circuit = get_circuit(def, &circuit_id)?;
    let node = get_node(circuit, &node_id)?;
    let current = record.state.current()?;
    if current.is_completed() {
        return Err(EngineError::invalid_state(format!(
            "circuit '{circuit_id}' is already completed"
        )));
    }
    let status = record.state.current_node()?.status();
    if status.is_terminal() {
        return Err(EngineError::invalid_state(format!(
            "node '{node_id}' is already {status:?}"
        )));
    }

    if input.value() >= node.cd {
        let revealed = closure_after_hack(circuit, current, &node_id)?;
        let mut patch = revealed.to_patch().hack(node_id.as_str());
        if node.is_final {
            patch = patch.complete();
        }
        let next = apply_patch(current, circuit, &patch)?;
        record.state.replace_circuit(&circuit_id, next);

        let state = &record.state;
        record.timeline.append(
            EventKind::NodeHacked,
            &circuit_id,
            format!("Hacked {} (cd {}, rolled {})", node.name, node.cd, input.value()),
            state,
            now,
        );
        if !revealed.links.is_empty() {
            record.timeline.append(
                EventKind::LinksDiscovered,
                &circuit_id,
                format!("Discovered links: {}", revealed.links.join(", ")),
                state,
                now,
            );
        }

        let mut run_completed = false;
        if node.is_final {
            record.timeline.append(
                EventKind::CircuitCompleted,
                &circuit_id,
                format!("Circuit {} completed", circuit.name),
                state,
                now,
            );
            if state.all_circuits_completed(def) {
                record.run.status = RunStatus::Completed;
                run_completed = true;
                record.timeline.append(
                    EventKind::RunCompleted,
                    &circuit_id,
                    format!("Run {} completed", record.run.name),
                    state,
                    now,
                );
            }
        }
        log::info!(
            "run {}: hacked '{}' in '{}' ({} nodes, {} links revealed)",
            record.run.id,
            node_id,
            circuit_id,
            revealed.nodes.len(),
            revealed.links.len()
        );

        return Ok(HackResult {
            success: true,
            node_id,
            node_status: NodeStatus::Hacked,
            failed_attempts: record.state.current()?.failed_attempts(&node.id),
            newly_revealed: revealed,
            circuit_completed: node.is_final,
            run_completed,
            state: record.state.clone(),
        });
    }

    let (patch, node_status) = match node.fail_mode {
        FailMode::Warning => (
            StatePatch::new().failed_attempt(node_id.as_str()),
            NodeStatus::Discovered,
        ),
        FailMode::Bloqueo => (StatePatch::new().block(node_id.as_str()), NodeStatus::Blocked),
    };
    let next = apply_patch(current, circuit, &patch)?;
    record.state.replace_circuit(&circuit_id, next);

    match node.fail_mode {
        FailMode::Warning => log::warn!(
            "run {}: hack on '{}' failed ({} < cd {}), node stays open",
            record.run.id,
            node_id,
            input.value(),
            node.cd
        ),
        FailMode::Bloqueo => {
            log::warn!(
                "run {}: hack on '{}' failed ({} < cd {}), node blocked",
                record.run.id,
                node_id,
                input.value(),
                node.cd
            );
            record.timeline.append(
                EventKind::NodeBlocked,
                &circuit_id,
                format!("Blocked {} (cd {}, rolled {})", node.name, node.cd, input.value()),
                &record.state,
                now,
            );
        }
    }

    Ok(HackResult {
        success: false,
        node_id,
        node_status,
        failed_attempts: record.state.current()?.failed_attempts(&node.id),
        newly_revealed: Revealed::default(),
        circuit_completed: false,
        run_completed: false,
        state: record.state.clone(),
    })
}

/// Move to a discovered neighbour in the current circuit.
///
/// Moves reposition the run over already-discovered territory and never
/// append a timeline event.
pub fn move_to_node(
    def: &ProjectDefinition,
    record: &mut RunRecord,
    target: &str,
) -> EngineResult<MoveResult> {
    record.run.ensure_active()?;
    let circuit = get_circuit(def, &record.state.position().circuit_id)?;
    get_node(circuit, target)?;
    check_move(&record.state, target, circuit).map_err(|denial| {
        EngineError::invalid_move(format!(
            "'{}' -> '{target}': {denial}",
            record.state.position().node_id
        ))
    })?;
    record.state.set_node(target)?;
    log::debug!("run {}: moved to '{}'", record.run.id, target);
    Ok(MoveResult {
        position: record.state.position().clone(),
        state: record.state.clone(),
    })
}

/// Switch the run to another circuit of its definition.
///
/// The first visit initializes the circuit; later visits restore its
/// stored state and the node the run last stood on there.
pub fn switch_circuit(
    def: &ProjectDefinition,
    record: &mut RunRecord,
    target: &str,
    now: DateTime<Utc>,
) -> EngineResult<SwitchResult> {
    record.run.ensure_active()?;
    let circuit = get_circuit(def, target)?;
    if record.state.position().circuit_id == target {
        return Err(EngineError::invalid_state(format!(
            "run is already in circuit '{target}'"
        )));
    }

    let first_visit = !record.state.has_visited(target);
    if first_visit {
        let fresh = initialize(circuit)?;
        record.state.replace_circuit(target, fresh);
    }
    record.state.enter_circuit(target)?;

    let (kind, verb) = if first_visit {
        (EventKind::CircuitSelected, "Entered")
    } else {
        (EventKind::CircuitChanged, "Returned to")
    };
    record.timeline.append(
        kind,
        target,
        format!("{verb} circuit {}", circuit.name),
        &record.state,
        now,
    );
    log::info!("run {}: {} circuit '{}'", record.run.id, verb.to_lowercase(), target);

    Ok(SwitchResult {
        position: record.state.position().clone(),
        first_visit,
        state: record.state.clone(),
    })
}

/// Explicitly reveal a link of the current circuit, hidden or not.
pub fn reveal_link(
    def: &ProjectDefinition,
    record: &mut RunRecord,
    link_id: &str,
    now: DateTime<Utc>,
) -> EngineResult<Revealed> {
    record.run.ensure_active()?;
    let circuit_id = record.state.position().circuit_id.clone();
    let circuit = get_circuit(def, &circuit_id)?;
    get_link(circuit, link_id)?;
    let current = record.state.current()?;
    if current.is_link_discovered(link_id) {
        return Err(EngineError::invalid_state(format!(
            "link '{link_id}' is already discovered"
        )));
    }

    let revealed = reveal_one(circuit, current, link_id)?;
    let next = apply_patch(current, circuit, &revealed.to_patch())?;
    record.state.replace_circuit(&circuit_id, next);
    record.timeline.append(
        EventKind::LinksDiscovered,
        &circuit_id,
        format!("Revealed links: {}", revealed.links.join(", ")),
        &record.state,
        now,
    );
    log::info!("run {}: revealed link '{}'", record.run.id, link_id);
    Ok(revealed)
}
