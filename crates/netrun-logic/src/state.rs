//! Mutable per-run state: discovery, hack and block flags per circuit.
//!
//! A run keeps one [`CircuitState`] per visited circuit, keyed by circuit
//! id; `position.circuit_id` selects the active one. Circuit states are
//! never edited field by field. Every change is expressed as a
//! [`StatePatch`] and merged with [`apply_patch`], which rejects unknown
//! ids and any change that would break a flag invariant:
//!
//! - `hacked` implies `discovered`
//! - `blocked` implies `discovered` and not `hacked`, and never reverts
//! - nothing is ever un-discovered or un-hacked
//!
//! Flags serialize under their Spanish names (`descubierto`,
//! `hackeado`, `bloqueado`) so stored state matches existing clients.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::definition::{entry_node, Circuit, CircuitId, LinkId, NodeId, ProjectDefinition};
use crate::error::{EngineError, EngineResult};

/// Per-node flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFlags {
    #[serde(rename = "descubierto")]
    pub discovered: bool,
    #[serde(rename = "hackeado")]
    pub hacked: bool,
    #[serde(rename = "bloqueado")]
    pub blocked: bool,
}

impl NodeFlags {
    pub fn status(&self) -> NodeStatus {
        if self.blocked {
            NodeStatus::Blocked
        } else if self.hacked {
            NodeStatus::Hacked
        } else if self.discovered {
            NodeStatus::Discovered
        } else {
            NodeStatus::Undiscovered
        }
    }

    fn is_consistent(&self) -> bool {
        (!self.hacked || self.discovered) && (!self.blocked || (self.discovered && !self.hacked))
    }
}

/// Node lifecycle: `UNDISCOVERED → DISCOVERED → {HACKED | BLOCKED}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Undiscovered,
    Discovered,
    Hacked,
    Blocked,
}

impl NodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, NodeStatus::Hacked | NodeStatus::Blocked)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkFlags {
    #[serde(rename = "descubierto")]
    pub discovered: bool,
}

/// Where the run currently stands.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub circuit_id: CircuitId,
    pub node_id: NodeId,
}

/// State of one circuit within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitState {
    pub(crate) nodes: BTreeMap<NodeId, NodeFlags>,
    pub(crate) links: BTreeMap<LinkId, LinkFlags>,
    /// Failed WARNING attempts per node. Not a node state.
    #[serde(default)]
    pub(crate) failed_attempts: BTreeMap<NodeId, u32>,
    #[serde(default)]
    pub(crate) completed: bool,
    /// Node the run stood on when it last left this circuit.
    pub(crate) cursor: NodeId,
}

impl CircuitState {
    pub fn node(&self, node_id: &str) -> Option<NodeFlags> {
        self.nodes.get(node_id).copied()
    }

    pub fn link(&self, link_id: &str) -> Option<LinkFlags> {
        self.links.get(link_id).copied()
    }

    pub fn nodes(&self) -> impl Iterator<Item = (&str, NodeFlags)> {
        self.nodes.iter().map(|(id, f)| (id.as_str(), *f))
    }

    pub fn links(&self) -> impl Iterator<Item = (&str, LinkFlags)> {
        self.links.iter().map(|(id, f)| (id.as_str(), *f))
    }

    pub fn is_node_discovered(&self, node_id: &str) -> bool {
        self.node(node_id).is_some_and(|f| f.discovered)
    }

    pub fn is_link_discovered(&self, link_id: &str) -> bool {
        self.link(link_id).is_some_and(|f| f.discovered)
    }

    pub fn discovered_nodes(&self) -> BTreeSet<&str> {
        self.nodes()
            .filter(|(_, f)| f.discovered)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn discovered_links(&self) -> BTreeSet<&str> {
        self.links()
            .filter(|(_, f)| f.discovered)
            .map(|(id, _)| id)
            .collect()
    }

    pub fn failed_attempts(&self, node_id: &str) -> u32 {
        self.failed_attempts.get(node_id).copied().unwrap_or(0)
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn cursor(&self) -> &str {
        &self.cursor
    }
}

/// Fresh state for entering `circuit` for the first time.
///
/// Exactly the visible-by-default nodes are discovered, along with the
/// non-hidden links joining two of them. The cursor starts on the entry
/// node.
pub fn initialize(circuit: &Circuit) -> EngineResult<CircuitState> {
    let entry = entry_node(circuit)?;
    let nodes: BTreeMap<NodeId, NodeFlags> = circuit
        .nodes
        .iter()
        .map(|n| {
            (
                n.id.clone(),
                NodeFlags {
                    discovered: n.visible_by_default,
                    ..NodeFlags::default()
                },
            )
        })
        .collect();
    let visible = |id: &str| nodes.get(id).is_some_and(|f| f.discovered);
    let links = circuit
        .links
        .iter()
        .map(|l| {
            (
                l.id.clone(),
                LinkFlags {
                    discovered: !l.hidden && visible(&l.from) && visible(&l.to),
                },
            )
        })
        .collect();

    Ok(CircuitState {
        nodes,
        links,
        failed_attempts: BTreeMap::new(),
        completed: false,
        cursor: entry.id.clone(),
    })
}

/// A set of monotone changes to one circuit's state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatePatch {
    pub discover_nodes: BTreeSet<NodeId>,
    pub discover_links: BTreeSet<LinkId>,
    pub hack: Option<NodeId>,
    pub block: Option<NodeId>,
    pub failed_attempt: Option<NodeId>,
    pub complete: bool,
}

impl StatePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn discover_node(mut self, node_id: impl Into<NodeId>) -> Self {
        self.discover_nodes.insert(node_id.into());
        self
    }

    pub fn discover_link(mut self, link_id: impl Into<LinkId>) -> Self {
        self.discover_links.insert(link_id.into());
        self
    }

    pub fn hack(mut self, node_id: impl Into<NodeId>) -> Self {
        self.hack = Some(node_id.into());
        self
    }

    pub fn block(mut self, node_id: impl Into<NodeId>) -> Self {
        self.block = Some(node_id.into());
        self
    }

    pub fn failed_attempt(mut self, node_id: impl Into<NodeId>) -> Self {
        self.failed_attempt = Some(node_id.into());
        self
    }

    pub fn complete(mut self) -> Self {
        self.complete = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == StatePatch::default()
    }
}

/// Merge `patch` into a copy of `state`, validating every id and flag.
///
/// `state` is left untouched whether or not the merge succeeds.
pub fn apply_patch(
    state: &CircuitState,
    circuit: &Circuit,
    patch: &StatePatch,
) -> EngineResult<CircuitState> {
    let mut next = state.clone();

    for node_id in &patch.discover_nodes {
        node_entry(&mut next, circuit, node_id)?.discovered = true;
    }
    for link_id in &patch.discover_links {
        let Some(link) = circuit.find_link(link_id) else {
            return Err(EngineError::invalid_state(format!(
                "patch references unknown link '{link_id}' in circuit '{}'",
                circuit.id
            )));
        };
        // node discoveries above count, so a patch may reveal both together
        if !next.is_node_discovered(&link.from) || !next.is_node_discovered(&link.to) {
            return Err(EngineError::invalid_state(format!(
                "link '{link_id}' cannot be discovered before its endpoints"
            )));
        }
        let flags = next.links.get_mut(link_id).ok_or_else(|| {
            EngineError::invalid_state(format!("link '{link_id}' missing from run state"))
        })?;
        flags.discovered = true;
    }

    if let (Some(h), Some(b)) = (&patch.hack, &patch.block) {
        if h == b {
            return Err(EngineError::invalid_state(format!(
                "node '{h}' cannot be hacked and blocked at once"
            )));
        }
    }

    if let Some(node_id) = &patch.hack {
        let flags = node_entry(&mut next, circuit, node_id)?;
        require_open(node_id, flags)?;
        flags.hacked = true;
    }
    if let Some(node_id) = &patch.block {
        let flags = node_entry(&mut next, circuit, node_id)?;
        require_open(node_id, flags)?;
        flags.blocked = true;
    }
    if let Some(node_id) = &patch.failed_attempt {
        let flags = node_entry(&mut next, circuit, node_id)?;
        require_open(node_id, flags)?;
        *next.failed_attempts.entry(node_id.clone()).or_insert(0) += 1;
    }
    if patch.complete {
        next.completed = true;
    }

    if let Some((id, _)) = next.nodes.iter().find(|(_, f)| !f.is_consistent()) {
        return Err(EngineError::invalid_state(format!(
            "patch leaves node '{id}' with inconsistent flags"
        )));
    }
    Ok(next)
}

fn node_entry<'a>(
    state: &'a mut CircuitState,
    circuit: &Circuit,
    node_id: &str,
) -> EngineResult<&'a mut NodeFlags> {
    if circuit.find_node(node_id).is_none() {
        return Err(EngineError::invalid_state(format!(
            "patch references unknown node '{node_id}' in circuit '{}'",
            circuit.id
        )));
    }
    state
        .nodes
        .get_mut(node_id)
        .ok_or_else(|| EngineError::invalid_state(format!("node '{node_id}' missing from run state")))
}

fn require_open(node_id: &str, flags: &NodeFlags) -> EngineResult<()> {
    match flags.status() {
        NodeStatus::Discovered => Ok(()),
        NodeStatus::Undiscovered => Err(EngineError::invalid_state(format!(
            "node '{node_id}' is not discovered"
        ))),
        status => Err(EngineError::invalid_state(format!(
            "node '{node_id}' is already {status:?}"
        ))),
    }
}

/// Full state of a run across every circuit it has entered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub(crate) position: Position,
    pub(crate) circuits: BTreeMap<CircuitId, CircuitState>,
}

impl RunState {
    /// State for a new run: the first circuit of `def`, on its entry node.
    pub fn start(def: &ProjectDefinition) -> EngineResult<Self> {
        let circuit = def
            .circuits
            .first()
            .ok_or_else(|| EngineError::validation(format!("definition {} has no circuits", def.id)))?;
        let state = initialize(circuit)?;
        let position = Position {
            circuit_id: circuit.id.clone(),
            node_id: state.cursor.clone(),
        };
        let mut circuits = BTreeMap::new();
        circuits.insert(circuit.id.clone(), state);
        Ok(Self { position, circuits })
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn circuit(&self, circuit_id: &str) -> Option<&CircuitState> {
        self.circuits.get(circuit_id)
    }

    pub fn circuits(&self) -> impl Iterator<Item = (&str, &CircuitState)> {
        self.circuits.iter().map(|(id, s)| (id.as_str(), s))
    }

    pub fn has_visited(&self, circuit_id: &str) -> bool {
        self.circuits.contains_key(circuit_id)
    }

    /// State of the circuit the run is positioned in.
    pub fn current(&self) -> EngineResult<&CircuitState> {
        self.circuits.get(&self.position.circuit_id).ok_or_else(|| {
            EngineError::invalid_state(format!(
                "run positioned in unvisited circuit '{}'",
                self.position.circuit_id
            ))
        })
    }

    /// Flags of the current node.
    pub fn current_node(&self) -> EngineResult<NodeFlags> {
        self.current()?.node(&self.position.node_id).ok_or_else(|| {
            EngineError::invalid_state(format!(
                "position node '{}' missing from run state",
                self.position.node_id
            ))
        })
    }

    /// Whether every circuit of `def` has been completed.
    pub fn all_circuits_completed(&self, def: &ProjectDefinition) -> bool {
        def.circuits
            .iter()
            .all(|c| self.circuits.get(&c.id).is_some_and(|s| s.completed))
    }

    pub(crate) fn replace_circuit(&mut self, circuit_id: &str, state: CircuitState) {
        self.circuits.insert(circuit_id.to_string(), state);
    }

    /// Move within the current circuit. The target must be discovered.
    pub(crate) fn set_node(&mut self, node_id: &str) -> EngineResult<()> {
        if !self.current()?.is_node_discovered(node_id) {
            return Err(EngineError::invalid_state(format!(
                "cannot stand on undiscovered node '{node_id}'"
            )));
        }
        self.position.node_id = node_id.to_string();
        Ok(())
    }

    /// Leave the current circuit for `circuit_id`, which must already be
    /// present. The departing circuit remembers where the run stood.
    pub(crate) fn enter_circuit(&mut self, circuit_id: &str) -> EngineResult<()> {
        let departing = self.position.clone();
        let target_cursor = self
            .circuits
            .get(circuit_id)
            .map(|s| s.cursor.clone())
            .ok_or_else(|| {
                EngineError::invalid_state(format!("circuit '{circuit_id}' not initialized"))
            })?;
        if let Some(state) = self.circuits.get_mut(&departing.circuit_id) {
            state.cursor = departing.node_id;
        }
        self.position = Position {
            circuit_id: circuit_id.to_string(),
            node_id: target_cursor,
        };
        Ok(())
    }

    /// Check the flag and position invariants. Used by tests and the
    /// simulation harness; the engine maintains them by construction.
    pub fn check_invariants(&self, def: &ProjectDefinition) -> Result<(), String> {
        let current = self
            .circuits
            .get(&self.position.circuit_id)
            .ok_or_else(|| format!("position circuit '{}' not visited", self.position.circuit_id))?;
        if !current.is_node_discovered(&self.position.node_id) {
            return Err(format!(
                "position node '{}' is not discovered",
                self.position.node_id
            ));
        }
        for (circuit_id, state) in &self.circuits {
            let circuit = def
                .circuits
                .iter()
                .find(|c| &c.id == circuit_id)
                .ok_or_else(|| format!("state for unknown circuit '{circuit_id}'"))?;
            if let Some((id, _)) = state.nodes.iter().find(|(_, f)| !f.is_consistent()) {
                return Err(format!("node '{id}' has inconsistent flags"));
            }
            for link in &circuit.links {
                let both = state.is_node_discovered(&link.from) && state.is_node_discovered(&link.to);
                let shown = state.is_link_discovered(&link.id);
                if !link.hidden && both && !shown {
                    return Err(format!("link '{}' should be discovered", link.id));
                }
                if shown && !both {
                    return Err(format!("link '{}' discovered before its endpoints", link.id));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{FailMode, Link, LinkStyle, Node};
    use crate::error::ErrorCode;

    fn node(id: &str, level: u32, visible: bool) -> Node {
        Node {
            id: id.into(),
            name: id.into(),
            level,
            cd: 2,
            fail_mode: FailMode::Warning,
            visible_by_default: visible,
            is_final: false,
        }
    }

    fn link(id: &str, from: &str, to: &str, hidden: bool) -> Link {
        Link {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            hidden,
            bidirectional: false,
            style: LinkStyle::Solid,
            reveal: None,
        }
    }

    fn circuit() -> Circuit {
        Circuit {
            id: "c".into(),
            name: "C".into(),
            nodes: vec![
                node("b", 1, true),
                node("a", 0, true),
                node("x", 2, false),
            ],
            links: vec![
                link("ab", "a", "b", false),
                link("ab_hidden", "a", "b", true),
                link("bx", "b", "x", false),
            ],
        }
    }

    #[test]
    fn initialize_discovers_visible_nodes_only() {
        let s = initialize(&circuit()).unwrap();
        assert!(s.is_node_discovered("a"));
        assert!(s.is_node_discovered("b"));
        assert!(!s.is_node_discovered("x"));
        assert_eq!(s.cursor(), "a");
        assert!(!s.is_completed());
    }

    #[test]
    fn initialize_reveals_visible_links_but_not_hidden() {
        let s = initialize(&circuit()).unwrap();
        assert!(s.is_link_discovered("ab"));
        assert!(!s.is_link_discovered("ab_hidden"));
        assert!(!s.is_link_discovered("bx"));
    }

    #[test]
    fn flags_serialize_with_spanish_names() {
        let flags = NodeFlags {
            discovered: true,
            hacked: true,
            blocked: false,
        };
        let json = serde_json::to_value(flags).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"descubierto": true, "hackeado": true, "bloqueado": false})
        );
    }

    #[test]
    fn patch_discovers_and_hacks() {
        let c = circuit();
        let s = initialize(&c).unwrap();
        let patch = StatePatch::new()
            .hack("b")
            .discover_node("x")
            .discover_link("bx");
        let next = apply_patch(&s, &c, &patch).unwrap();
        assert_eq!(next.node("b").unwrap().status(), NodeStatus::Hacked);
        assert!(next.is_node_discovered("x"));
        assert!(next.is_link_discovered("bx"));
        // input untouched
        assert_eq!(s.node("b").unwrap().status(), NodeStatus::Discovered);
    }

    #[test]
    fn patch_with_unknown_ids_fails() {
        let c = circuit();
        let s = initialize(&c).unwrap();
        let err = apply_patch(&s, &c, &StatePatch::new().discover_node("ghost")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidState);
        let err = apply_patch(&s, &c, &StatePatch::new().discover_link("ghost")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidState);
    }

    #[test]
    fn link_needs_discovered_endpoints() {
        let c = circuit();
        let s = initialize(&c).unwrap();
        let err = apply_patch(&s, &c, &StatePatch::new().discover_link("bx")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidState);
        assert!(!s.is_link_discovered("bx"));

        // endpoint and link in the same patch is fine
        let patch = StatePatch::new().discover_node("x").discover_link("bx");
        let next = apply_patch(&s, &c, &patch).unwrap();
        assert!(next.is_link_discovered("bx"));
    }

    #[test]
    fn status_orders_along_the_lifecycle() {
        assert!(NodeStatus::Undiscovered < NodeStatus::Discovered);
        assert!(NodeStatus::Discovered < NodeStatus::Hacked);
        let terminal: BTreeSet<NodeStatus> = [NodeStatus::Blocked, NodeStatus::Hacked]
            .into_iter()
            .collect();
        assert!(terminal.iter().all(|s| s.is_terminal()));
    }

    #[test]
    fn cannot_hack_undiscovered_node() {
        let c = circuit();
        let s = initialize(&c).unwrap();
        let err = apply_patch(&s, &c, &StatePatch::new().hack("x")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidState);
    }

    #[test]
    fn hacked_and_blocked_nodes_are_terminal() {
        let c = circuit();
        let s = initialize(&c).unwrap();
        let hacked = apply_patch(&s, &c, &StatePatch::new().hack("a")).unwrap();
        assert!(apply_patch(&hacked, &c, &StatePatch::new().block("a")).is_err());
        assert!(apply_patch(&hacked, &c, &StatePatch::new().hack("a")).is_err());

        let blocked = apply_patch(&s, &c, &StatePatch::new().block("b")).unwrap();
        assert!(apply_patch(&blocked, &c, &StatePatch::new().hack("b")).is_err());
        assert!(apply_patch(&blocked, &c, &StatePatch::new().failed_attempt("b")).is_err());
    }

    #[test]
    fn hack_and_block_same_node_rejected() {
        let c = circuit();
        let s = initialize(&c).unwrap();
        let err = apply_patch(&s, &c, &StatePatch::new().hack("a").block("a")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidState);
    }

    #[test]
    fn failed_attempts_accumulate() {
        let c = circuit();
        let s = initialize(&c).unwrap();
        let once = apply_patch(&s, &c, &StatePatch::new().failed_attempt("a")).unwrap();
        let twice = apply_patch(&once, &c, &StatePatch::new().failed_attempt("a")).unwrap();
        assert_eq!(twice.failed_attempts("a"), 2);
        assert_eq!(twice.node("a").unwrap().status(), NodeStatus::Discovered);
    }

    #[test]
    fn run_state_starts_in_first_circuit() {
        let def = ProjectDefinition {
            id: 1,
            project_id: 1,
            version: 1,
            is_active: true,
            circuits: vec![circuit()],
        };
        let state = RunState::start(&def).unwrap();
        assert_eq!(state.position().circuit_id, "c");
        assert_eq!(state.position().node_id, "a");
        assert!(state.check_invariants(&def).is_ok());
        assert!(!state.all_circuits_completed(&def));
    }

    #[test]
    fn set_node_requires_discovery() {
        let def = ProjectDefinition {
            id: 1,
            project_id: 1,
            version: 1,
            is_active: true,
            circuits: vec![circuit()],
        };
        let mut state = RunState::start(&def).unwrap();
        assert!(state.set_node("x").is_err());
        assert!(state.set_node("b").is_ok());
        assert_eq!(state.position().node_id, "b");
    }
}
