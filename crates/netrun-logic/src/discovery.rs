//! Discovery closure and move legality.
//!
//! Hacking a node reveals its immediate surroundings: every non-hidden
//! link touching the node and the node at the other end. This is a
//! single hop. Neighbours revealed this way do not reveal anything
//! further until they are hacked themselves.
//!
//! Hidden links never appear through adjacency. They are revealed only
//! when their definition's reveal rule fires for the hacked node, or by
//! an explicit [`reveal_link`].
//!
//! After any reveal a settle pass discovers every remaining non-hidden
//! link whose two endpoints are now known, so the link invariant holds
//! for links between two freshly revealed neighbours too.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::definition::{get_link, get_node, Circuit, LinkId, NodeId};
use crate::error::EngineResult;
use crate::state::{CircuitState, RunState, StatePatch};

/// Ids that became visible as the result of one action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revealed {
    pub nodes: Vec<NodeId>,
    pub links: Vec<LinkId>,
}

impl Revealed {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.links.is_empty()
    }

    fn add_node(&mut self, node_id: &str) {
        if !self.nodes.iter().any(|n| n == node_id) {
            self.nodes.push(node_id.to_string());
        }
    }

    fn add_link(&mut self, link_id: &str) {
        if !self.links.iter().any(|l| l == link_id) {
            self.links.push(link_id.to_string());
        }
    }

    fn has_node(&self, node_id: &str) -> bool {
        self.nodes.iter().any(|n| n == node_id)
    }

    fn has_link(&self, link_id: &str) -> bool {
        self.links.iter().any(|l| l == link_id)
    }

    /// Patch that discovers everything in this set.
    pub fn to_patch(&self) -> StatePatch {
        StatePatch {
            discover_nodes: self.nodes.iter().cloned().collect(),
            discover_links: self.links.iter().cloned().collect(),
            ..StatePatch::default()
        }
    }
}

/// Known-or-about-to-be-known view used while building a closure.
struct Frontier<'a> {
    state: &'a CircuitState,
    revealed: Revealed,
}

impl<'a> Frontier<'a> {
    fn new(state: &'a CircuitState) -> Self {
        Self {
            state,
            revealed: Revealed::default(),
        }
    }

    fn node_known(&self, node_id: &str) -> bool {
        self.state.is_node_discovered(node_id) || self.revealed.has_node(node_id)
    }

    fn link_known(&self, link_id: &str) -> bool {
        self.state.is_link_discovered(link_id) || self.revealed.has_link(link_id)
    }

    fn reveal_node(&mut self, node_id: &str) {
        if !self.node_known(node_id) {
            self.revealed.add_node(node_id);
        }
    }

    fn reveal_link(&mut self, link_id: &str) {
        if !self.link_known(link_id) {
            self.revealed.add_link(link_id);
        }
    }

    fn settle(&mut self, circuit: &Circuit) {
        for link in &circuit.links {
            if !link.hidden && self.node_known(&link.from) && self.node_known(&link.to) {
                self.reveal_link(&link.id);
            }
        }
    }
}

/// One-hop reveal around `node_id` over non-hidden links.
pub fn reveal_from(
    circuit: &Circuit,
    state: &CircuitState,
    node_id: &str,
) -> EngineResult<Revealed> {
    get_node(circuit, node_id)?;
    let mut frontier = Frontier::new(state);
    expand(&mut frontier, circuit, node_id);
    frontier.settle(circuit);
    Ok(frontier.revealed)
}

fn expand(frontier: &mut Frontier<'_>, circuit: &Circuit, node_id: &str) {
    for link in circuit.links.iter().filter(|l| !l.hidden) {
        if let Some(other) = link.other_end(node_id) {
            frontier.reveal_link(&link.id);
            frontier.reveal_node(other);
        }
    }
}

/// Hidden links whose reveal rule fires when `node_id` is hacked.
pub fn hidden_links_triggered_by<'c>(circuit: &'c Circuit, node_id: &str) -> Vec<&'c str> {
    circuit
        .links
        .iter()
        .filter(|l| l.hidden && l.revealed_by_hack_of(node_id))
        .map(|l| l.id.as_str())
        .collect()
}

/// Everything a successful hack of `node_id` reveals: the one-hop
/// closure, hidden links whose rule fires, and their endpoints.
pub fn closure_after_hack(
    circuit: &Circuit,
    state: &CircuitState,
    node_id: &str,
) -> EngineResult<Revealed> {
    get_node(circuit, node_id)?;
    let mut frontier = Frontier::new(state);
    expand(&mut frontier, circuit, node_id);
    fire_reveal_rules(&mut frontier, circuit, node_id)?;
    frontier.settle(circuit);
    Ok(frontier.revealed)
}

/// Hidden links (and their endpoints) revealed by a hack of `node_id`,
/// without the one-hop closure.
pub fn reveal_hidden_on_hack(
    circuit: &Circuit,
    state: &CircuitState,
    node_id: &str,
) -> EngineResult<Revealed> {
    get_node(circuit, node_id)?;
    let mut frontier = Frontier::new(state);
    fire_reveal_rules(&mut frontier, circuit, node_id)?;
    frontier.settle(circuit);
    Ok(frontier.revealed)
}

fn fire_reveal_rules(
    frontier: &mut Frontier<'_>,
    circuit: &Circuit,
    node_id: &str,
) -> EngineResult<()> {
    for link_id in hidden_links_triggered_by(circuit, node_id) {
        let link = get_link(circuit, link_id)?;
        frontier.reveal_link(&link.id);
        frontier.reveal_node(&link.from);
        frontier.reveal_node(&link.to);
    }
    Ok(())
}

/// Explicitly reveal one link (hidden or not) and its endpoints.
///
/// Returns an empty set if the link is already discovered.
pub fn reveal_link(circuit: &Circuit, state: &CircuitState, link_id: &str) -> EngineResult<Revealed> {
    let link = get_link(circuit, link_id)?;
    let mut frontier = Frontier::new(state);
    if frontier.link_known(&link.id) {
        return Ok(Revealed::default());
    }
    frontier.reveal_link(&link.id);
    frontier.reveal_node(&link.from);
    frontier.reveal_node(&link.to);
    frontier.settle(circuit);
    Ok(frontier.revealed)
}

/// Why a move was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveDenial {
    /// Target is the current node.
    SameNode,
    /// Target id is not in the circuit.
    UnknownNode,
    /// Target has not been discovered yet.
    Undiscovered,
    /// No discovered link leads from the current node to the target.
    NoLink,
}

impl std::fmt::Display for MoveDenial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            MoveDenial::SameNode => "already on that node",
            MoveDenial::UnknownNode => "node does not exist in this circuit",
            MoveDenial::Undiscovered => "node not discovered",
            MoveDenial::NoLink => "no traversable link from the current node",
        };
        f.write_str(text)
    }
}

/// Check a move from the run's current node to `target` in `circuit`.
///
/// Links are directional: `from → to` always, `to → from` only when
/// bidirectional. Only discovered links can be followed. Blocked targets
/// are still discovered and can be entered; they just cannot be hacked.
pub fn check_move(state: &RunState, target: &str, circuit: &Circuit) -> Result<(), MoveDenial> {
    let current = &state.position().node_id;
    if current == target {
        return Err(MoveDenial::SameNode);
    }
    let circuit_state = state.current().map_err(|_| MoveDenial::UnknownNode)?;
    let flags = circuit_state.node(target).ok_or(MoveDenial::UnknownNode)?;
    if circuit.find_node(target).is_none() {
        return Err(MoveDenial::UnknownNode);
    }
    if !flags.discovered {
        return Err(MoveDenial::Undiscovered);
    }
    let linked = circuit
        .links
        .iter()
        .any(|l| l.allows(current, target) && circuit_state.is_link_discovered(&l.id));
    if linked {
        Ok(())
    } else {
        Err(MoveDenial::NoLink)
    }
}

pub fn can_move_to(state: &RunState, target: &str, circuit: &Circuit) -> bool {
    check_move(state, target, circuit).is_ok()
}

/// Nodes the run could move to right now, in definition order.
pub fn reachable_targets<'c>(state: &RunState, circuit: &'c Circuit) -> Vec<&'c str> {
    circuit
        .nodes
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| can_move_to(state, id, circuit))
        .collect()
}

/// Ids of discovered nodes in the given circuit state, for monotonicity checks.
pub fn discovered_ids(state: &CircuitState) -> (BTreeSet<String>, BTreeSet<String>) {
    (
        state.discovered_nodes().into_iter().map(String::from).collect(),
        state.discovered_links().into_iter().map(String::from).collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{FailMode, Link, LinkStyle, Node, ProjectDefinition, RevealRule};
    use crate::state::{apply_patch, initialize};

    fn node(id: &str, visible: bool) -> Node {
        Node {
            id: id.into(),
            name: id.into(),
            level: 0,
            cd: 1,
            fail_mode: FailMode::Warning,
            visible_by_default: visible,
            is_final: false,
        }
    }

    fn link(id: &str, from: &str, to: &str) -> Link {
        Link {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            hidden: false,
            bidirectional: false,
            style: LinkStyle::Solid,
            reveal: None,
        }
    }

    fn hidden(id: &str, from: &str, to: &str, reveal: Option<RevealRule>) -> Link {
        Link {
            hidden: true,
            reveal,
            ..link(id, from, to)
        }
    }

    //   entry → a → b → c
    //     ╲         ↗
    //      a2 ─────
    //   entry ⇢ backup (hidden)
    fn circuit() -> Circuit {
        Circuit {
            id: "c".into(),
            name: "C".into(),
            nodes: vec![
                node("entry", true),
                node("a", false),
                node("a2", false),
                node("b", false),
                node("c", false),
                node("backup", false),
            ],
            links: vec![
                link("l_ea", "entry", "a"),
                link("l_ea2", "entry", "a2"),
                link("l_ab", "a", "b"),
                link("l_a2b", "a2", "b"),
                link("l_bc", "b", "c"),
                link("l_bbackup", "b", "backup"),
                hidden("h_entry_backup", "entry", "backup", None),
            ],
        }
    }

    fn def(c: Circuit) -> ProjectDefinition {
        ProjectDefinition {
            id: 1,
            project_id: 1,
            version: 1,
            is_active: true,
            circuits: vec![c],
        }
    }

    fn hack(c: &Circuit, s: &CircuitState, node_id: &str) -> CircuitState {
        let revealed = closure_after_hack(c, s, node_id).unwrap();
        let patch = revealed.to_patch().hack(node_id);
        apply_patch(s, c, &patch).unwrap()
    }

    #[test]
    fn one_hop_reveal_does_not_cascade() {
        let c = circuit();
        let s = initialize(&c).unwrap();
        let r = reveal_from(&c, &s, "entry").unwrap();
        assert_eq!(r.nodes, vec!["a", "a2"]);
        assert_eq!(r.links, vec!["l_ea", "l_ea2"]);
        assert!(!r.has_node("b"));
    }

    #[test]
    fn reveal_only_adds_unknown_ids() {
        let c = circuit();
        let s = initialize(&c).unwrap();
        let s = hack(&c, &s, "entry");
        let s = hack(&c, &s, "a");
        let r = reveal_from(&c, &s, "b").unwrap();
        assert_eq!(r.nodes, vec!["c", "backup"]);
        assert_eq!(r.links, vec!["l_bc", "l_bbackup"]);
    }

    #[test]
    fn reveal_follows_incoming_links_too() {
        let c = circuit();
        let s = initialize(&c).unwrap();
        let s = apply_patch(&s, &c, &StatePatch::new().discover_node("b")).unwrap();
        // a → b points into b, but hacking b still reveals a
        let r = reveal_from(&c, &s, "b").unwrap();
        assert!(r.nodes.contains(&"a".to_string()));
        assert!(r.nodes.contains(&"a2".to_string()));
    }

    #[test]
    fn settle_reveals_links_between_known_nodes() {
        let c = circuit();
        let s = initialize(&c).unwrap();
        let s = hack(&c, &s, "entry");
        // hacking a reveals b; a2 was already known so l_a2b settles too
        let r = closure_after_hack(&c, &s, "a").unwrap();
        assert_eq!(r.nodes, vec!["b"]);
        assert!(r.links.contains(&"l_ab".to_string()));
        assert!(r.links.contains(&"l_a2b".to_string()));
    }

    #[test]
    fn hidden_link_not_revealed_by_adjacency() {
        let c = circuit();
        let s = initialize(&c).unwrap();
        let s = hack(&c, &s, "entry");
        let s = hack(&c, &s, "a");
        let s = hack(&c, &s, "b");
        // both endpoints of the hidden link are now discovered
        assert!(s.is_node_discovered("entry"));
        assert!(s.is_node_discovered("backup"));
        assert!(!s.is_link_discovered("h_entry_backup"));
    }

    #[test]
    fn explicit_reveal_exposes_hidden_link() {
        let c = circuit();
        let s = initialize(&c).unwrap();
        let r = reveal_link(&c, &s, "h_entry_backup").unwrap();
        assert_eq!(r.links, vec!["h_entry_backup"]);
        assert_eq!(r.nodes, vec!["backup"]);
        let s = apply_patch(&s, &c, &r.to_patch()).unwrap();
        assert!(reveal_link(&c, &s, "h_entry_backup").unwrap().is_empty());
    }

    #[test]
    fn reveal_rule_fires_on_hack() {
        let mut c = circuit();
        c.links.push(hidden(
            "h_a_c",
            "a",
            "c",
            Some(RevealRule::OnHack("a2".into())),
        ));
        c.links.push(hidden(
            "h_entry_c",
            "entry",
            "c",
            Some(RevealRule::OnEndpointHack),
        ));
        let s = initialize(&c).unwrap();
        let r = closure_after_hack(&c, &s, "entry").unwrap();
        assert!(r.links.contains(&"h_entry_c".to_string()));
        assert!(r.nodes.contains(&"c".to_string()));
        assert!(!r.links.contains(&"h_a_c".to_string()));

        let s = apply_patch(&s, &c, &r.to_patch().hack("entry")).unwrap();
        let r = closure_after_hack(&c, &s, "a2").unwrap();
        assert!(r.links.contains(&"h_a_c".to_string()));

        // hidden-only reveal skips the one-hop neighbours
        let only_hidden = reveal_hidden_on_hack(&c, &s, "a2").unwrap();
        assert_eq!(only_hidden.links, vec!["h_a_c"]);
        assert!(!only_hidden.links.contains(&"l_a2b".to_string()));
    }

    #[test]
    fn moves_follow_link_direction() {
        let c = circuit();
        let d = def(c.clone());
        let mut state = RunState::start(&d).unwrap();
        let cs = hack(&c, state.current().unwrap(), "entry");
        state.replace_circuit("c", cs);

        assert!(can_move_to(&state, "a", &c));
        assert_eq!(check_move(&state, "entry", &c), Err(MoveDenial::SameNode));
        assert_eq!(check_move(&state, "b", &c), Err(MoveDenial::Undiscovered));
        assert_eq!(check_move(&state, "nope", &c), Err(MoveDenial::UnknownNode));

        state.set_node("a").unwrap();
        // l_ea is one-way entry → a
        assert_eq!(check_move(&state, "entry", &c), Err(MoveDenial::NoLink));
    }

    #[test]
    fn bidirectional_links_allow_backtracking() {
        let mut c = circuit();
        c.links[0].bidirectional = true;
        let d = def(c.clone());
        let mut state = RunState::start(&d).unwrap();
        let cs = hack(&c, state.current().unwrap(), "entry");
        state.replace_circuit("c", cs);
        state.set_node("a").unwrap();
        assert!(can_move_to(&state, "entry", &c));
    }

    #[test]
    fn blocked_nodes_stay_walkable() {
        let c = circuit();
        let d = def(c.clone());
        let mut state = RunState::start(&d).unwrap();
        let cs = hack(&c, state.current().unwrap(), "entry");
        let cs = apply_patch(&cs, &c, &StatePatch::new().block("a")).unwrap();
        state.replace_circuit("c", cs);
        // blocked is still discovered, so the link into it can be followed
        assert_eq!(check_move(&state, "a", &c), Ok(()));
        assert_eq!(reachable_targets(&state, &c), vec!["a", "a2"]);
    }

    #[test]
    fn undiscovered_hidden_link_cannot_be_followed() {
        let c = circuit();
        let d = def(c.clone());
        let mut state = RunState::start(&d).unwrap();
        let cs = hack(&c, state.current().unwrap(), "entry");
        let cs = hack(&c, &cs, "a");
        let cs = hack(&c, &cs, "b");
        state.replace_circuit("c", cs);
        // backup is discovered, but only the hidden link joins it to entry
        assert_eq!(check_move(&state, "backup", &c), Err(MoveDenial::NoLink));
    }
}
