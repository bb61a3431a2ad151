//! Engine collaborators backed by the module's tables.
//!
//! Each adapter borrows the reducer context, so it lives exactly as long
//! as the transaction that created it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use netrun_logic::access::{AccessOracle, ProjectRole};
use netrun_logic::clock::Clock;
use netrun_logic::definition::{DefinitionId, ProjectDefinition, ProjectId};
use netrun_logic::error::EngineResult;
use netrun_logic::run::{Run, RunId, RunRecord, RunStatus};
use netrun_logic::state::RunState;
use netrun_logic::store::{RunCommit, RunStore, StoreError};
use netrun_logic::timeline::{EventKind, Snapshot, Timeline, TimelineEvent};
use spacetimedb::{ReducerContext, Table, Timestamp};

use crate::tables::*;

pub fn to_datetime(ts: Timestamp) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(ts.to_micros_since_unix_epoch()).unwrap_or_default()
}

pub fn to_timestamp(dt: DateTime<Utc>) -> Timestamp {
    Timestamp::from_micros_since_unix_epoch(dt.timestamp_micros())
}

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

// ============================================================================
// STORE
// ============================================================================

pub struct DbStore<'a> {
    ctx: &'a ReducerContext,
}

impl<'a> DbStore<'a> {
    pub fn new(ctx: &'a ReducerContext) -> Self {
        Self { ctx }
    }

    fn load_definition(row: &ProjectDefinitionRow) -> Result<Arc<ProjectDefinition>, StoreError> {
        ProjectDefinition::from_payload(
            row.id,
            row.project_id,
            row.version,
            row.is_active,
            &row.payload,
        )
        .map(Arc::new)
        .map_err(backend)
    }

    fn run_from_row(row: &RunRow) -> Result<Run, StoreError> {
        let status = RunStatus::from_code(row.status)
            .ok_or_else(|| backend(format!("run {} has unknown status {}", row.id, row.status)))?;
        Ok(Run {
            id: row.id,
            project_id: row.project_id,
            definition_id: row.definition_id,
            owner_user_id: row.owner_user_id.clone(),
            name: row.name.clone(),
            status,
            created_at: to_datetime(row.created_at),
            updated_at: to_datetime(row.updated_at),
            deleted_at: row.deleted_at.map(to_datetime),
            revision: row.revision,
        })
    }

    fn run_row(run: &Run, state: &RunState) -> Result<RunRow, StoreError> {
        Ok(RunRow {
            id: run.id,
            project_id: run.project_id,
            definition_id: run.definition_id,
            owner_user_id: run.owner_user_id.clone(),
            name: run.name.clone(),
            status: run.status.code(),
            created_at: to_timestamp(run.created_at),
            updated_at: to_timestamp(run.updated_at),
            deleted_at: run.deleted_at.map(to_timestamp),
            revision: run.revision,
            state: serde_json::to_string(state).map_err(backend)?,
        })
    }

    fn insert_event(&self, run_id: RunId, event: &TimelineEvent) -> Result<(), StoreError> {
        self.ctx.db.timeline_event().insert(TimelineEventRow {
            id: 0,
            run_id,
            seq: event.index,
            kind: event.kind.code(),
            at: to_timestamp(event.timestamp),
            circuit_id: event.circuit_id.clone(),
            description: event.description.clone(),
            snapshot: serde_json::to_string(&event.snapshot).map_err(backend)?,
        });
        Ok(())
    }

    fn event_count(&self, run_id: RunId) -> u32 {
        self.ctx
            .db
            .timeline_event()
            .iter()
            .filter(|e| e.run_id == run_id)
            .count() as u32
    }
}

impl RunStore for DbStore<'_> {
    fn active_definition(
        &self,
        project_id: ProjectId,
    ) -> Result<Option<Arc<ProjectDefinition>>, StoreError> {
        self.ctx
            .db
            .project_definition()
            .iter()
            .find(|d| d.project_id == project_id && d.is_active)
            .map(|row| Self::load_definition(&row))
            .transpose()
    }

    fn definition(&self, id: DefinitionId) -> Result<Option<Arc<ProjectDefinition>>, StoreError> {
        self.ctx
            .db
            .project_definition()
            .id()
            .find(id)
            .map(|row| Self::load_definition(&row))
            .transpose()
    }

    fn insert_run(&self, record: RunRecord) -> Result<RunId, StoreError> {
        let row = Self::run_row(&record.run, &record.state)?;
        let run_id = self.ctx.db.run().insert(RunRow { id: 0, ..row }).id;
        for event in record.timeline.events() {
            self.insert_event(run_id, event)?;
        }
        Ok(run_id)
    }

    fn load_run(&self, id: RunId) -> Result<Option<RunRecord>, StoreError> {
        let Some(row) = self.ctx.db.run().id().find(id) else {
            return Ok(None);
        };
        let run = Self::run_from_row(&row)?;
        let state: RunState = serde_json::from_str(&row.state).map_err(backend)?;

        let mut events = Vec::new();
        for e in self.ctx.db.timeline_event().iter().filter(|e| e.run_id == id) {
            let kind = EventKind::from_code(e.kind)
                .ok_or_else(|| backend(format!("event {} has unknown kind {}", e.id, e.kind)))?;
            let snapshot: Snapshot = serde_json::from_str(&e.snapshot).map_err(backend)?;
            events.push(TimelineEvent {
                index: e.seq,
                kind,
                timestamp: to_datetime(e.at),
                circuit_id: e.circuit_id,
                description: e.description,
                snapshot,
            });
        }
        let timeline = Timeline::from_events(events).map_err(StoreError::Backend)?;
        Ok(Some(RunRecord {
            run,
            state,
            timeline,
        }))
    }

    fn commit_run(&self, commit: RunCommit) -> Result<(), StoreError> {
        let run_id = commit.run.id;
        let current = self
            .ctx
            .db
            .run()
            .id()
            .find(run_id)
            .ok_or(StoreError::RunNotFound(run_id))?;
        if current.revision != commit.expected_revision {
            return Err(StoreError::Conflict {
                run_id,
                expected: commit.expected_revision,
                found: current.revision,
            });
        }

        let mut next = self.event_count(run_id);
        for event in &commit.new_events {
            if event.index != next {
                return Err(StoreError::TimelineGap {
                    run_id,
                    expected: next,
                    found: event.index,
                });
            }
            next += 1;
        }

        let row = Self::run_row(&commit.run, &commit.state)?;
        self.ctx.db.run().id().update(row);
        for event in &commit.new_events {
            self.insert_event(run_id, event)?;
        }
        Ok(())
    }

    fn list_runs(&self) -> Result<Vec<Run>, StoreError> {
        let mut runs = self
            .ctx
            .db
            .run()
            .iter()
            .map(|row| Self::run_from_row(&row))
            .collect::<Result<Vec<_>, _>>()?;
        runs.sort_by_key(|r| r.id);
        Ok(runs)
    }
}

// ============================================================================
// ACCESS
// ============================================================================

pub struct DbAccess<'a> {
    ctx: &'a ReducerContext,
}

impl<'a> DbAccess<'a> {
    pub fn new(ctx: &'a ReducerContext) -> Self {
        Self { ctx }
    }
}

impl AccessOracle for DbAccess<'_> {
    fn project_role(
        &self,
        user_id: &str,
        project_id: ProjectId,
    ) -> EngineResult<Option<ProjectRole>> {
        Ok(self
            .ctx
            .db
            .project_member()
            .iter()
            .find(|m| m.project_id == project_id && m.user_id == user_id)
            .and_then(|m| ProjectRole::from_code(m.role)))
    }

    fn project_enabled(&self, project_id: ProjectId) -> EngineResult<bool> {
        Ok(self
            .ctx
            .db
            .project()
            .id()
            .find(project_id)
            .is_some_and(|p| p.enabled))
    }
}

// ============================================================================
// CLOCK
// ============================================================================

/// The transaction's timestamp. Every event written by one reducer call
/// carries the same time.
pub struct DbClock<'a> {
    ctx: &'a ReducerContext,
}

impl<'a> DbClock<'a> {
    pub fn new(ctx: &'a ReducerContext) -> Self {
        Self { ctx }
    }
}

impl Clock for DbClock<'_> {
    fn now(&self) -> DateTime<Utc> {
        to_datetime(self.ctx.timestamp)
    }
}
