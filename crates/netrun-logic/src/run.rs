//! Run metadata and the record the store keeps per run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::definition::{DefinitionId, ProjectId};
use crate::error::{EngineError, EngineResult};
use crate::state::RunState;
use crate::timeline::Timeline;

pub type RunId = u64;
pub type UserId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Active,
    Completed,
}

impl RunStatus {
    pub fn code(self) -> u8 {
        match self {
            RunStatus::Active => 0,
            RunStatus::Completed => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(RunStatus::Active),
            1 => Some(RunStatus::Completed),
            _ => None,
        }
    }
}

/// A persistent play-through of one pinned project definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: RunId,
    pub project_id: ProjectId,
    /// Definition the run was created with. Never follows later activations.
    pub definition_id: DefinitionId,
    pub owner_user_id: UserId,
    pub name: String,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    /// Bumped on every commit; the store rejects stale writers.
    pub revision: u64,
}

impl Run {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.status == RunStatus::Active
    }

    /// Fails with `InvalidState` unless the run can still be mutated.
    pub fn ensure_active(&self) -> EngineResult<()> {
        match self.status {
            RunStatus::Active => Ok(()),
            RunStatus::Completed => Err(EngineError::invalid_state(format!(
                "run {} is completed",
                self.id
            ))),
        }
    }
}

/// Everything persisted for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run: Run,
    pub state: RunState,
    pub timeline: Timeline,
}
