//! Engine tunables.
//!
//! Hosts load an [`EngineConfig`] from JSON (missing fields fall back to
//! defaults) and check it with [`validate_config`] before building a
//! service.
//!
//! ```
//! use netrun_logic::config::{validate_config, EngineConfig};
//!
//! let config = EngineConfig::from_json(r#"{ "maxRunNameLen": 40 }"#).unwrap();
//! assert_eq!(config.default_run_name_prefix, "Run");
//! assert!(validate_config(&config).is_empty());
//! ```

use serde::{Deserialize, Serialize};

use crate::definition::{CircuitId, NodeId, ProjectDefinition};

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Prefix for generated run names (`"<prefix> #<n>"`).
    pub default_run_name_prefix: String,
    /// Longest accepted run name, in characters, after trimming.
    pub max_run_name_len: usize,
    /// Largest accepted hack input. Larger values are a validation error.
    /// A node whose `cd` exceeds it can never be hacked; see
    /// [`validate_for_definition`].
    pub max_hack_input: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_run_name_prefix: "Run".to_string(),
            max_run_name_len: 120,
            max_hack_input: 1_000,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Problems found by [`validate_config`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigError {
    /// Run name prefix is blank.
    EmptyRunNamePrefix,
    /// Prefix plus the ` #<n>` suffix would not fit in the name limit.
    PrefixTooLong { prefix_len: usize, max: usize },
    /// Name limit of zero.
    ZeroRunNameLen,
    /// A zero input cap would only ever allow `cd = 0` hacks.
    ZeroHackInput,
    /// A node's `cd` is above the input cap, so no hack can ever succeed.
    UnhackableNode {
        circuit_id: CircuitId,
        node_id: NodeId,
        cd: u32,
        max: u32,
    },
}

/// Room reserved for the ` #<n>` suffix of generated names.
const NAME_SUFFIX_RESERVE: usize = 8;

/// Validate a configuration, returning all errors found.
pub fn validate_config(config: &EngineConfig) -> Vec<ConfigError> {
    let mut errors = Vec::new();

    let prefix_len = config.default_run_name_prefix.trim().chars().count();
    if prefix_len == 0 {
        errors.push(ConfigError::EmptyRunNamePrefix);
    }
    if config.max_run_name_len == 0 {
        errors.push(ConfigError::ZeroRunNameLen);
    } else if prefix_len + NAME_SUFFIX_RESERVE > config.max_run_name_len {
        errors.push(ConfigError::PrefixTooLong {
            prefix_len,
            max: config.max_run_name_len,
        });
    }
    if config.max_hack_input == 0 {
        errors.push(ConfigError::ZeroHackInput);
    }

    errors
}

/// Check a definition against the configured input cap, returning one
/// error per node that no accepted input could hack.
pub fn validate_for_definition(config: &EngineConfig, def: &ProjectDefinition) -> Vec<ConfigError> {
    def.circuits
        .iter()
        .flat_map(|c| {
            c.nodes
                .iter()
                .filter(|n| n.cd > config.max_hack_input)
                .map(|n| ConfigError::UnhackableNode {
                    circuit_id: c.id.clone(),
                    node_id: n.id.clone(),
                    cd: n.cd,
                    max: config.max_hack_input,
                })
        })
        .collect()
}
