//! Client-facing reducers for playing runs and administering projects.
//!
//! Run reducers build a [`RunService`] over the table adapters for the
//! duration of one transaction. A returned `Err` rolls the transaction back.

use netrun_logic::access::{require_admin, ProjectRole, Requester};
use netrun_logic::config::{validate_for_definition, ConfigError, EngineConfig};
use netrun_logic::definition::ProjectDefinition;
use netrun_logic::error::EngineError;
use netrun_logic::run::RunId;
use netrun_logic::RunService;
use spacetimedb::{reducer, Identity, ReducerContext, Table};

use crate::adapters::{DbAccess, DbClock, DbStore};
use crate::tables::*;

type Service<'a> = RunService<DbStore<'a>, DbAccess<'a>, DbClock<'a>>;

fn service(ctx: &ReducerContext) -> Service<'_> {
    RunService::new(DbStore::new(ctx), DbAccess::new(ctx), DbClock::new(ctx))
}

fn requester(ctx: &ReducerContext) -> Requester {
    Requester {
        user_id: ctx.sender.to_string(),
        is_admin: ctx.db.admin_user().identity().find(ctx.sender).is_some(),
    }
}

fn reject(e: EngineError) -> String {
    format!("{}: {}", e.code(), e)
}

fn ensure_admin(ctx: &ReducerContext, action: &str) -> Result<(), String> {
    require_admin(&requester(ctx))
        .into_result(action)
        .map_err(reject)
}

// ============================================================================
// LIFECYCLE
// ============================================================================

/// The publisher of the module becomes its first admin.
#[reducer(init)]
pub fn init(ctx: &ReducerContext) {
    log::info!("Module initialized, admin: {:?}", ctx.sender);
    ctx.db.admin_user().insert(AdminUser {
        identity: ctx.sender,
        granted_at: ctx.timestamp,
    });
}

// ============================================================================
// RUN REDUCERS
// ============================================================================

#[reducer]
pub fn create_run(ctx: &ReducerContext, project_id: u64, name: Option<String>) -> Result<(), String> {
    let created = service(ctx)
        .create_run(&requester(ctx), project_id, name.as_deref())
        .map_err(reject)?;
    log::info!("Run {} '{}' created", created.run_id, created.run_name);
    Ok(())
}

#[reducer]
pub fn attempt_hack(ctx: &ReducerContext, run_id: RunId, input: i64) -> Result<(), String> {
    let result = service(ctx)
        .attempt_hack(&requester(ctx), run_id, input)
        .map_err(reject)?;
    log::info!(
        "Run {}: hack on {} {} ({:?})",
        run_id,
        result.node_id,
        if result.success { "succeeded" } else { "failed" },
        result.node_status
    );
    Ok(())
}

#[reducer]
pub fn move_to_node(ctx: &ReducerContext, run_id: RunId, node_id: String) -> Result<(), String> {
    service(ctx)
        .move_to_node(&requester(ctx), run_id, &node_id)
        .map(|_| ())
        .map_err(reject)
}

#[reducer]
pub fn switch_circuit(
    ctx: &ReducerContext,
    run_id: RunId,
    circuit_id: String,
) -> Result<(), String> {
    service(ctx)
        .switch_circuit(&requester(ctx), run_id, &circuit_id)
        .map(|_| ())
        .map_err(reject)
}

/// Game-master reveal of a hidden link in the run's current circuit.
#[reducer]
pub fn reveal_link(ctx: &ReducerContext, run_id: RunId, link_id: String) -> Result<(), String> {
    service(ctx)
        .reveal_link(&requester(ctx), run_id, &link_id)
        .map(|_| ())
        .map_err(reject)
}

#[reducer]
pub fn delete_run(ctx: &ReducerContext, run_id: RunId) -> Result<(), String> {
    service(ctx)
        .delete_run(&requester(ctx), run_id)
        .map_err(reject)?;
    log::info!("Run {} deleted", run_id);
    Ok(())
}

// ============================================================================
// ADMIN REDUCERS
// ============================================================================

/// Publish a definition version. Activating it deactivates the project's
/// other versions; runs already started keep their pinned version.
#[reducer]
pub fn publish_definition(
    ctx: &ReducerContext,
    id: u64,
    project_id: u64,
    version: u32,
    payload: String,
    activate: bool,
) -> Result<(), String> {
    ensure_admin(ctx, "publish definition")?;
    if ctx.db.project().id().find(project_id).is_none() {
        return Err(reject(EngineError::not_found(format!(
            "project {project_id}"
        ))));
    }
    if ctx.db.project_definition().id().find(id).is_some() {
        return Err(reject(EngineError::invalid_state(format!(
            "definition {id} already exists"
        ))));
    }
    // Rejects malformed payloads before anything is written.
    let def = ProjectDefinition::from_payload(id, project_id, version, activate, &payload)
        .map_err(|e| reject(e.into()))?;
    let unhackable = validate_for_definition(&EngineConfig::default(), &def);
    if let Some(ConfigError::UnhackableNode { node_id, cd, max, .. }) = unhackable.first() {
        return Err(reject(EngineError::validation(format!(
            "node '{node_id}' has cd {cd}, above the hack input limit of {max}"
        ))));
    }

    if activate {
        let previous: Vec<ProjectDefinitionRow> = ctx
            .db
            .project_definition()
            .iter()
            .filter(|d| d.project_id == project_id && d.is_active)
            .collect();
        for row in previous {
            ctx.db.project_definition().id().update(ProjectDefinitionRow {
                is_active: false,
                ..row
            });
        }
    }
    ctx.db.project_definition().insert(ProjectDefinitionRow {
        id,
        project_id,
        version,
        is_active: activate,
        payload: def.to_payload(),
    });
    log::info!(
        "Definition {} v{} published for project {} ({} circuits, active: {})",
        id,
        version,
        project_id,
        def.circuits.len(),
        activate
    );
    Ok(())
}

/// Create or update a project.
#[reducer]
pub fn set_project(ctx: &ReducerContext, id: u64, name: String, enabled: bool) -> Result<(), String> {
    ensure_admin(ctx, "set project")?;
    let row = Project { id, name, enabled };
    if ctx.db.project().id().find(id).is_some() {
        ctx.db.project().id().update(row);
    } else {
        ctx.db.project().insert(row);
    }
    log::info!("Project {} set (enabled: {})", id, enabled);
    Ok(())
}

/// Set a user's project role. `None` removes the membership.
#[reducer]
pub fn set_member(
    ctx: &ReducerContext,
    project_id: u64,
    user: Identity,
    role: Option<u8>,
) -> Result<(), String> {
    ensure_admin(ctx, "set member")?;
    let role = match role {
        Some(code) => Some(ProjectRole::from_code(code).ok_or_else(|| {
            reject(EngineError::validation(format!("unknown role code {code}")))
        })?),
        None => None,
    };

    let user_id = user.to_string();
    let existing = ctx
        .db
        .project_member()
        .iter()
        .find(|m| m.project_id == project_id && m.user_id == user_id);
    match (existing, role) {
        (Some(member), Some(role)) => {
            ctx.db.project_member().id().update(ProjectMember {
                role: role.code(),
                ..member
            });
        }
        (Some(member), None) => {
            ctx.db.project_member().id().delete(member.id);
        }
        (None, Some(role)) => {
            ctx.db.project_member().insert(ProjectMember {
                id: 0,
                project_id,
                user_id,
                role: role.code(),
            });
        }
        (None, None) => {}
    }
    log::info!("Project {} member {:?} role set to {:?}", project_id, user, role);
    Ok(())
}

#[reducer]
pub fn grant_admin(ctx: &ReducerContext, user: Identity) -> Result<(), String> {
    ensure_admin(ctx, "grant admin")?;
    if ctx.db.admin_user().identity().find(user).is_none() {
        ctx.db.admin_user().insert(AdminUser {
            identity: user,
            granted_at: ctx.timestamp,
        });
        log::info!("Admin granted to {:?}", user);
    } else {
        log::warn!("{:?} is already an admin", user);
    }
    Ok(())
}
