//! SpacetimeDB table definitions for projects, definitions and runs.
//!
//! The tables are the persistence store of the run engine. Run state and
//! timeline snapshots are kept as JSON columns so the engine's serde
//! model stays the single source of truth for their shape.

use spacetimedb::{table, Identity, Timestamp};

// ============================================================================
// PROJECTS & ACCESS
// ============================================================================

/// A project owning circuit definitions.
#[table(name = project, public)]
#[derive(Clone)]
pub struct Project {
    #[primary_key]
    pub id: u64,
    pub name: String,
    /// Disabled projects accept no new runs.
    pub enabled: bool,
}

/// A user's role on a project.
#[table(name = project_member, public)]
#[derive(Clone)]
pub struct ProjectMember {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    pub project_id: u64,
    pub user_id: String,
    pub role: u8, // ProjectRole code
}

/// Identities with admin rights.
#[table(name = admin_user, public)]
pub struct AdminUser {
    #[primary_key]
    pub identity: Identity,
    pub granted_at: Timestamp,
}

// ============================================================================
// DEFINITIONS
// ============================================================================

/// A published definition version. `payload` is `{"circuits": [...]}`.
#[table(name = project_definition, public)]
#[derive(Clone)]
pub struct ProjectDefinitionRow {
    #[primary_key]
    pub id: u64,
    pub project_id: u64,
    pub version: u32,
    pub is_active: bool,
    pub payload: String,
}

// ============================================================================
// RUNS
// ============================================================================

#[table(name = run, public)]
#[derive(Clone)]
pub struct RunRow {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    pub project_id: u64,
    pub definition_id: u64,
    pub owner_user_id: String,
    pub name: String,
    pub status: u8, // RunStatus code
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub deleted_at: Option<Timestamp>,
    pub revision: u64,
    /// Serialized RunState.
    pub state: String,
}

/// One timeline entry. `(run_id, seq)` is unique.
#[table(name = timeline_event, public)]
#[derive(Clone)]
pub struct TimelineEventRow {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    pub run_id: u64,
    pub seq: u32,
    pub kind: u8, // EventKind code
    pub at: Timestamp,
    pub circuit_id: String,
    pub description: String,
    /// Serialized snapshot of the run state after the event.
    pub snapshot: String,
}
