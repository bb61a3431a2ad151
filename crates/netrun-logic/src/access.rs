//! Run access gateway.
//!
//! Authorization decisions for every run operation. Project membership and
//! project status live outside the engine and are read through an
//! [`AccessOracle`]; the functions here combine the oracle's answers with
//! run ownership and the requester's admin flag.
//!
//! # Roles
//!
//! | Role | Play (create runs) | Game-master (reveal links) |
//! |------|--------------------|----------------------------|
//! | `OWNER` | yes | yes |
//! | `EDITOR` | yes | yes |
//! | `PLAYER` | yes | no |
//! | `VIEWER` | no | no |
//!
//! Admins bypass every check. A run's owner may always access and
//! game-master their own run.
//!
//! ```
//! use netrun_logic::access::{can_access_run, Requester};
//! # use netrun_logic::run::{Run, RunStatus};
//! # let now = chrono::DateTime::from_timestamp(0, 0).unwrap();
//! # let run = Run { id: 1, project_id: 1, definition_id: 1, owner_user_id: "ana".into(),
//! #     name: "Run #1".into(), status: RunStatus::Active, created_at: now, updated_at: now,
//! #     deleted_at: None, revision: 0 };
//!
//! assert!(can_access_run(&Requester::user("ana"), &run).allowed);
//! assert!(!can_access_run(&Requester::user("bo"), &run).allowed);
//! assert!(can_access_run(&Requester::admin("root"), &run).allowed);
//! ```

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::definition::ProjectId;
use crate::error::{EngineError, EngineResult};
use crate::run::{Run, UserId};

/// Who is asking. Passed explicitly into every service call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requester {
    pub user_id: UserId,
    pub is_admin: bool,
}

impl Requester {
    pub fn user(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: false,
        }
    }

    pub fn admin(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            is_admin: true,
        }
    }
}

/// A user's role on a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectRole {
    Owner,
    Editor,
    Player,
    Viewer,
}

impl ProjectRole {
    pub fn can_play(self) -> bool {
        matches!(self, ProjectRole::Owner | ProjectRole::Editor | ProjectRole::Player)
    }

    pub fn can_game_master(self) -> bool {
        matches!(self, ProjectRole::Owner | ProjectRole::Editor)
    }

    pub fn code(self) -> u8 {
        match self {
            ProjectRole::Owner => 0,
            ProjectRole::Editor => 1,
            ProjectRole::Player => 2,
            ProjectRole::Viewer => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ProjectRole::Owner),
            1 => Some(ProjectRole::Editor),
            2 => Some(ProjectRole::Player),
            3 => Some(ProjectRole::Viewer),
            _ => None,
        }
    }
}

/// External source of project membership and status.
pub trait AccessOracle {
    /// The user's role on the project, or `None` if not a member.
    fn project_role(&self, user_id: &str, project_id: ProjectId)
        -> EngineResult<Option<ProjectRole>>;

    /// Whether the project accepts new runs.
    fn project_enabled(&self, project_id: ProjectId) -> EngineResult<bool>;
}

/// Result of an access check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessResult {
    pub allowed: bool,
    pub denial_reason: Option<DenialReason>,
    /// Granted only because the requester is an admin.
    pub is_override: bool,
}

impl AccessResult {
    fn allow() -> Self {
        Self {
            allowed: true,
            denial_reason: None,
            is_override: false,
        }
    }

    fn admin_override() -> Self {
        Self {
            allowed: true,
            denial_reason: None,
            is_override: true,
        }
    }

    fn deny(reason: DenialReason) -> Self {
        Self {
            allowed: false,
            denial_reason: Some(reason),
            is_override: false,
        }
    }

    /// `Ok` if allowed, otherwise `PermissionDenied` naming the action.
    pub fn into_result(self, action: &str) -> EngineResult<()> {
        match self.denial_reason {
            None if self.allowed => Ok(()),
            Some(reason) => Err(EngineError::permission_denied(format!("{action}: {reason}"))),
            None => Err(EngineError::permission_denied(action.to_string())),
        }
    }
}

/// Why access was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenialReason {
    /// Requester does not own the run.
    NotOwner,
    /// Requester has no role on the project.
    NotMember,
    /// Requester's role does not allow this action.
    InsufficientRole,
    /// Project is disabled.
    ProjectDisabled,
    /// Admin-only operation.
    AdminOnly,
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            DenialReason::NotOwner => "not the run owner",
            DenialReason::NotMember => "not a project member",
            DenialReason::InsufficientRole => "role does not allow this action",
            DenialReason::ProjectDisabled => "project is disabled",
            DenialReason::AdminOnly => "admin only",
        };
        f.write_str(text)
    }
}

/// Admin or run owner.
pub fn can_access_run(requester: &Requester, run: &Run) -> AccessResult {
    if run.owner_user_id == requester.user_id {
        AccessResult::allow()
    } else if requester.is_admin {
        AccessResult::admin_override()
    } else {
        AccessResult::deny(DenialReason::NotOwner)
    }
}

/// Admin, or a playing role on an enabled project.
pub fn can_create_run_in_project(
    oracle: &impl AccessOracle,
    requester: &Requester,
    project_id: ProjectId,
) -> EngineResult<AccessResult> {
    if requester.is_admin {
        return Ok(AccessResult::admin_override());
    }
    let result = match oracle.project_role(&requester.user_id, project_id)? {
        None => AccessResult::deny(DenialReason::NotMember),
        Some(role) if !role.can_play() => AccessResult::deny(DenialReason::InsufficientRole),
        Some(_) if !oracle.project_enabled(project_id)? => {
            AccessResult::deny(DenialReason::ProjectDisabled)
        }
        Some(_) => AccessResult::allow(),
    };
    Ok(result)
}

/// Admin, the run owner, or a game-master role on the run's project.
pub fn can_reveal_links(
    oracle: &impl AccessOracle,
    requester: &Requester,
    run: &Run,
) -> EngineResult<AccessResult> {
    if run.owner_user_id == requester.user_id {
        return Ok(AccessResult::allow());
    }
    if requester.is_admin {
        return Ok(AccessResult::admin_override());
    }
    let result = match oracle.project_role(&requester.user_id, run.project_id)? {
        Some(role) if role.can_game_master() => AccessResult::allow(),
        Some(_) => AccessResult::deny(DenialReason::InsufficientRole),
        None => AccessResult::deny(DenialReason::NotMember),
    };
    Ok(result)
}

/// Admin-only operations such as listing every run.
pub fn require_admin(requester: &Requester) -> AccessResult {
    if requester.is_admin {
        AccessResult::admin_override()
    } else {
        AccessResult::deny(DenialReason::AdminOnly)
    }
}

/// In-memory [`AccessOracle`] for tests and the simulation harness.
#[derive(Debug, Default)]
pub struct MemoryOracle {
    roles: RwLock<HashMap<(UserId, ProjectId), ProjectRole>>,
    disabled: RwLock<HashSet<ProjectId>>,
}

impl MemoryOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_role(&self, user_id: impl Into<UserId>, project_id: ProjectId, role: ProjectRole) {
        self.roles.write().insert((user_id.into(), project_id), role);
    }

    pub fn remove_member(&self, user_id: &str, project_id: ProjectId) {
        self.roles
            .write()
            .remove(&(user_id.to_string(), project_id));
    }

    pub fn set_enabled(&self, project_id: ProjectId, enabled: bool) {
        let mut disabled = self.disabled.write();
        if enabled {
            disabled.remove(&project_id);
        } else {
            disabled.insert(project_id);
        }
    }
}

impl AccessOracle for MemoryOracle {
    fn project_role(
        &self,
        user_id: &str,
        project_id: ProjectId,
    ) -> EngineResult<Option<ProjectRole>> {
        Ok(self
            .roles
            .read()
            .get(&(user_id.to_string(), project_id))
            .copied())
    }

    fn project_enabled(&self, project_id: ProjectId) -> EngineResult<bool> {
        Ok(!self.disabled.read().contains(&project_id))
    }
}
