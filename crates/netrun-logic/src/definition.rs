//! Versioned circuit definitions consumed by the run engine.
//!
//! A project publishes definitions as JSON. The engine never works on the
//! raw payload: [`parse_definition`] deserializes it into the typed
//! [`ProjectDefinition`] model and validates the graph, rejecting anything
//! malformed before a run can reference it.
//!
//! Definitions are immutable once parsed and shared freely between runs.
//! A run is pinned to the definition id it was created with.
//!
//! ```
//! use netrun_logic::definition::{parse_definition, entry_node, get_circuit};
//!
//! let json = r#"{
//!     "id": 1, "projectId": 10, "version": 1, "isActive": true,
//!     "circuits": [{
//!         "id": "c1", "name": "Perimeter",
//!         "nodes": [
//!             { "id": "gate", "name": "Gate", "level": 0, "cd": 0,
//!               "failMode": "WARNING", "visibleByDefault": true },
//!             { "id": "core", "name": "Core", "level": 1, "cd": 8,
//!               "failMode": "BLOQUEO", "isFinal": true }
//!         ],
//!         "links": [{ "id": "l1", "from": "gate", "to": "core" }]
//!     }]
//! }"#;
//! let def = parse_definition(json).unwrap();
//! let circuit = get_circuit(&def, "c1").unwrap();
//! assert_eq!(entry_node(circuit).unwrap().id, "gate");
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{EngineError, EngineResult};

pub type ProjectId = u64;
pub type DefinitionId = u64;
pub type CircuitId = String;
pub type NodeId = String;
pub type LinkId = String;

/// Consequence of a failed hack attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailMode {
    /// Failure is logged; the node can be attempted again.
    Warning,
    /// Failure blocks the node for the rest of the run.
    Bloqueo,
}

/// Presentation hint carried through to map renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStyle {
    #[default]
    Solid,
    Dashed,
    Dotted,
}

/// When a hidden link becomes visible.
///
/// Hidden links without a rule are only revealed by an explicit
/// `reveal_link` action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevealRule {
    /// Hacking either endpoint reveals the link.
    OnEndpointHack,
    /// Hacking the named node (anywhere in the circuit) reveals the link.
    OnHack(NodeId),
}

/// A hackable point in a circuit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    /// Topological depth; layout and entry selection only.
    #[serde(default)]
    pub level: u32,
    /// Difficulty threshold. 0 always succeeds.
    pub cd: u32,
    pub fail_mode: FailMode,
    #[serde(default)]
    pub visible_by_default: bool,
    #[serde(default)]
    pub is_final: bool,
}

/// An edge between two nodes of the same circuit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub id: LinkId,
    pub from: NodeId,
    pub to: NodeId,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub bidirectional: bool,
    #[serde(default)]
    pub style: LinkStyle,
    #[serde(default)]
    pub reveal: Option<RevealRule>,
}

impl Link {
    /// The endpoint opposite `node`, if `node` is an endpoint.
    pub fn other_end(&self, node: &str) -> Option<&str> {
        if self.from == node {
            Some(&self.to)
        } else if self.to == node {
            Some(&self.from)
        } else {
            None
        }
    }

    pub fn touches(&self, node: &str) -> bool {
        self.from == node || self.to == node
    }

    /// Whether a move from `from` to `to` may use this link.
    pub fn allows(&self, from: &str, to: &str) -> bool {
        (self.from == from && self.to == to)
            || (self.bidirectional && self.to == from && self.from == to)
    }

    /// Whether hacking `node` fires this link's reveal rule.
    pub fn revealed_by_hack_of(&self, node: &str) -> bool {
        match &self.reveal {
            Some(RevealRule::OnEndpointHack) => self.touches(node),
            Some(RevealRule::OnHack(trigger)) => trigger == node,
            None => false,
        }
    }
}

/// One graph of nodes and links within a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Circuit {
    pub id: CircuitId,
    pub name: String,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub links: Vec<Link>,
}

impl Circuit {
    pub fn find_node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn find_link(&self, link_id: &str) -> Option<&Link> {
        self.links.iter().find(|l| l.id == link_id)
    }
}

/// An immutable, versioned project definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDefinition {
    pub id: DefinitionId,
    pub project_id: ProjectId,
    pub version: u32,
    #[serde(default)]
    pub is_active: bool,
    pub circuits: Vec<Circuit>,
}

impl ProjectDefinition {
    /// Build a definition from a stored circuits payload plus row metadata.
    ///
    /// The payload is the JSON object `{ "circuits": [...] }`.
    pub fn from_payload(
        id: DefinitionId,
        project_id: ProjectId,
        version: u32,
        is_active: bool,
        payload: &str,
    ) -> Result<Self, DefinitionError> {
        #[derive(Deserialize)]
        struct Payload {
            circuits: Vec<Circuit>,
        }
        let payload: Payload =
            serde_json::from_str(payload).map_err(|e| DefinitionError::Malformed(e.to_string()))?;
        let def = ProjectDefinition {
            id,
            project_id,
            version,
            is_active,
            circuits: payload.circuits,
        };
        validate_definition(&def)?;
        Ok(def)
    }

    /// Serialize the circuits back into the stored payload form.
    pub fn to_payload(&self) -> String {
        serde_json::json!({ "circuits": self.circuits }).to_string()
    }
}

/// Why a definition payload was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    #[error("malformed definition payload: {0}")]
    Malformed(String),
    #[error("definition has no circuits")]
    NoCircuits,
    #[error("duplicate circuit id '{0}'")]
    DuplicateCircuit(CircuitId),
    #[error("circuit '{circuit}' has no nodes")]
    EmptyCircuit { circuit: CircuitId },
    #[error("circuit '{circuit}': duplicate node id '{node}'")]
    DuplicateNode { circuit: CircuitId, node: NodeId },
    #[error("circuit '{circuit}': duplicate link id '{link}'")]
    DuplicateLink { circuit: CircuitId, link: LinkId },
    #[error("circuit '{circuit}': link '{link}' references unknown node '{node}'")]
    UnknownEndpoint {
        circuit: CircuitId,
        link: LinkId,
        node: NodeId,
    },
    #[error("circuit '{circuit}': link '{link}' connects a node to itself")]
    SelfLink { circuit: CircuitId, link: LinkId },
    #[error("circuit '{circuit}': reveal rule of link '{link}' names unknown node '{node}'")]
    UnknownRevealNode {
        circuit: CircuitId,
        link: LinkId,
        node: NodeId,
    },
    #[error("circuit '{circuit}' has no node visible by default")]
    NoEntryNode { circuit: CircuitId },
}

/// Deserialize and validate a full definition document.
pub fn parse_definition(json: &str) -> Result<ProjectDefinition, DefinitionError> {
    let def: ProjectDefinition =
        serde_json::from_str(json).map_err(|e| DefinitionError::Malformed(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Check the structural rules every definition must satisfy.
///
/// Solvability (a path to the final node that avoids blockable nodes) is
/// not checked.
pub fn validate_definition(def: &ProjectDefinition) -> Result<(), DefinitionError> {
    if def.circuits.is_empty() {
        return Err(DefinitionError::NoCircuits);
    }

    let mut circuit_ids = HashSet::new();
    for circuit in &def.circuits {
        if !circuit_ids.insert(circuit.id.as_str()) {
            return Err(DefinitionError::DuplicateCircuit(circuit.id.clone()));
        }
        validate_circuit(circuit)?;
    }
    Ok(())
}

fn validate_circuit(circuit: &Circuit) -> Result<(), DefinitionError> {
    if circuit.nodes.is_empty() {
        return Err(DefinitionError::EmptyCircuit {
            circuit: circuit.id.clone(),
        });
    }

    let mut node_ids = HashSet::new();
    for node in &circuit.nodes {
        if !node_ids.insert(node.id.as_str()) {
            return Err(DefinitionError::DuplicateNode {
                circuit: circuit.id.clone(),
                node: node.id.clone(),
            });
        }
    }

    let mut link_ids = HashSet::new();
    for link in &circuit.links {
        if !link_ids.insert(link.id.as_str()) {
            return Err(DefinitionError::DuplicateLink {
                circuit: circuit.id.clone(),
                link: link.id.clone(),
            });
        }
        for endpoint in [&link.from, &link.to] {
            if !node_ids.contains(endpoint.as_str()) {
                return Err(DefinitionError::UnknownEndpoint {
                    circuit: circuit.id.clone(),
                    link: link.id.clone(),
                    node: endpoint.clone(),
                });
            }
        }
        if link.from == link.to {
            return Err(DefinitionError::SelfLink {
                circuit: circuit.id.clone(),
                link: link.id.clone(),
            });
        }
        if let Some(RevealRule::OnHack(trigger)) = &link.reveal {
            if !node_ids.contains(trigger.as_str()) {
                return Err(DefinitionError::UnknownRevealNode {
                    circuit: circuit.id.clone(),
                    link: link.id.clone(),
                    node: trigger.clone(),
                });
            }
        }
    }

    if !circuit.nodes.iter().any(|n| n.visible_by_default) {
        return Err(DefinitionError::NoEntryNode {
            circuit: circuit.id.clone(),
        });
    }
    Ok(())
}

// ── Accessors ──────────────────────────────────────────────────────────

pub fn get_circuit<'a>(def: &'a ProjectDefinition, circuit_id: &str) -> EngineResult<&'a Circuit> {
    def.circuits
        .iter()
        .find(|c| c.id == circuit_id)
        .ok_or_else(|| {
            EngineError::not_found(format!("circuit '{circuit_id}' in definition {}", def.id))
        })
}

pub fn get_node<'a>(circuit: &'a Circuit, node_id: &str) -> EngineResult<&'a Node> {
    circuit.find_node(node_id).ok_or_else(|| {
        EngineError::not_found(format!("node '{node_id}' in circuit '{}'", circuit.id))
    })
}

pub fn get_link<'a>(circuit: &'a Circuit, link_id: &str) -> EngineResult<&'a Link> {
    circuit.find_link(link_id).ok_or_else(|| {
        EngineError::not_found(format!("link '{link_id}' in circuit '{}'", circuit.id))
    })
}

/// Links with `node_id` as either endpoint, in definition order.
pub fn adjacent_links<'a>(circuit: &'a Circuit, node_id: &str) -> EngineResult<Vec<&'a Link>> {
    get_node(circuit, node_id)?;
    Ok(circuit.links.iter().filter(|l| l.touches(node_id)).collect())
}

/// The node a run starts on when entering `circuit`.
///
/// Lowest `level` among visible-by-default nodes; ties go to the node
/// listed first so replays are reproducible.
pub fn entry_node(circuit: &Circuit) -> EngineResult<&Node> {
    circuit
        .nodes
        .iter()
        .filter(|n| n.visible_by_default)
        .min_by_key(|n| n.level)
        .ok_or_else(|| {
            EngineError::not_found(format!("entry node for circuit '{}'", circuit.id))
        })
}
