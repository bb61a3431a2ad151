//! Flattened read models returned by `get_run_info`.
//!
//! Views join the pinned definition with the run state so clients do not
//! need both. Only discovered nodes and links are listed; undiscovered
//! topology never leaves the engine through a view.

use serde::{Deserialize, Serialize};

use crate::definition::{CircuitId, FailMode, LinkId, LinkStyle, NodeId, ProjectDefinition};
use crate::discovery::can_move_to;
use crate::run::{Run, RunRecord};
use crate::state::{NodeStatus, RunState};
use crate::timeline::TimelineEvent;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeView {
    pub id: NodeId,
    pub name: String,
    pub level: u32,
    pub cd: u32,
    pub fail_mode: FailMode,
    pub is_final: bool,
    pub status: NodeStatus,
    pub failed_attempts: u32,
    pub is_current: bool,
    /// The run could move here right now.
    pub can_move: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkView {
    pub id: LinkId,
    pub from: NodeId,
    pub to: NodeId,
    pub bidirectional: bool,
    pub style: LinkStyle,
    /// Link was hidden in the definition and has since been revealed.
    pub was_hidden: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitView {
    pub id: CircuitId,
    pub name: String,
    pub visited: bool,
    pub is_current: bool,
    pub completed: bool,
    pub nodes: Vec<NodeView>,
    pub links: Vec<LinkView>,
}

/// Everything a client needs to render one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunInfo {
    pub run: Run,
    pub state: RunState,
    pub circuits: Vec<CircuitView>,
    pub timeline: Vec<TimelineEvent>,
}

/// Build the view of every circuit in definition order.
pub fn circuit_views(def: &ProjectDefinition, state: &RunState) -> Vec<CircuitView> {
    let position = state.position();
    def.circuits
        .iter()
        .map(|circuit| {
            let is_current = circuit.id == position.circuit_id;
            let Some(cs) = state.circuit(&circuit.id) else {
                return CircuitView {
                    id: circuit.id.clone(),
                    name: circuit.name.clone(),
                    visited: false,
                    is_current,
                    completed: false,
                    nodes: Vec::new(),
                    links: Vec::new(),
                };
            };

            let nodes = circuit
                .nodes
                .iter()
                .filter_map(|n| {
                    let flags = cs.node(&n.id).filter(|f| f.discovered)?;
                    let here = is_current && n.id == position.node_id;
                    Some(NodeView {
                        id: n.id.clone(),
                        name: n.name.clone(),
                        level: n.level,
                        cd: n.cd,
                        fail_mode: n.fail_mode,
                        is_final: n.is_final,
                        status: flags.status(),
                        failed_attempts: cs.failed_attempts(&n.id),
                        is_current: here,
                        can_move: is_current && can_move_to(state, &n.id, circuit),
                    })
                })
                .collect();

            let links = circuit
                .links
                .iter()
                .filter(|l| cs.is_link_discovered(&l.id))
                .map(|l| LinkView {
                    id: l.id.clone(),
                    from: l.from.clone(),
                    to: l.to.clone(),
                    bidirectional: l.bidirectional,
                    style: l.style,
                    was_hidden: l.hidden,
                })
                .collect();

            CircuitView {
                id: circuit.id.clone(),
                name: circuit.name.clone(),
                visited: true,
                is_current,
                completed: cs.is_completed(),
                nodes,
                links,
            }
        })
        .collect()
}

impl RunInfo {
    pub fn build(def: &ProjectDefinition, record: RunRecord) -> Self {
        let circuits = circuit_views(def, &record.state);
        RunInfo {
            run: record.run,
            state: record.state,
            circuits,
            timeline: record.timeline.events().to_vec(),
        }
    }

    pub fn current_circuit(&self) -> Option<&CircuitView> {
        self.circuits.iter().find(|c| c.is_current)
    }
}
