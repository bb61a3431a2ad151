//! Persistence seam for definitions, runs and timelines.
//!
//! The engine never talks to a database directly. [`RunStore`] is the
//! contract any backend implements; [`MemoryStore`] is the in-process
//! implementation used by tests, the simulation harness and the bincode
//! save files in [`crate::persistence`].
//!
//! Writes go through [`RunStore::commit_run`], which carries the whole
//! result of one mutation (run row, state, new timeline events) and is
//! applied all-or-nothing. The store rejects a commit whose expected
//! revision does not match what it holds.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::definition::{validate_definition, DefinitionId, ProjectDefinition, ProjectId};
use crate::run::{Run, RunId, RunRecord};
use crate::state::RunState;
use crate::timeline::{Timeline, TimelineEvent};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("run {0} not found")]
    RunNotFound(RunId),
    #[error("run {run_id}: expected revision {expected}, store has {found}")]
    Conflict {
        run_id: RunId,
        expected: u64,
        found: u64,
    },
    #[error("run {run_id}: next event index is {expected}, commit carries {found}")]
    TimelineGap {
        run_id: RunId,
        expected: u32,
        found: u32,
    },
    #[error("storage backend: {0}")]
    Backend(String),
}

/// The outcome of one mutation, written as a unit.
#[derive(Debug, Clone)]
pub struct RunCommit {
    /// Updated run row. `run.revision` is the new revision.
    pub run: Run,
    /// Revision the mutation was computed from.
    pub expected_revision: u64,
    pub state: RunState,
    /// Events appended by the mutation, in index order.
    pub new_events: Vec<TimelineEvent>,
}

pub trait RunStore {
    /// The definition currently active for `project_id`, if any.
    fn active_definition(
        &self,
        project_id: ProjectId,
    ) -> Result<Option<Arc<ProjectDefinition>>, StoreError>;

    fn definition(&self, id: DefinitionId) -> Result<Option<Arc<ProjectDefinition>>, StoreError>;

    /// Persist a new run. The store assigns and returns its id; the id in
    /// `record.run` is ignored.
    fn insert_run(&self, record: RunRecord) -> Result<RunId, StoreError>;

    /// Load a run with its state and full timeline. Soft-deleted runs are
    /// still returned; filtering is the caller's job.
    fn load_run(&self, id: RunId) -> Result<Option<RunRecord>, StoreError>;

    fn commit_run(&self, commit: RunCommit) -> Result<(), StoreError>;

    /// Every run row, deleted ones included, ordered by id.
    fn list_runs(&self) -> Result<Vec<Run>, StoreError>;
}

/// Everything a [`MemoryStore`] holds. Also the body of a save file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreContents {
    pub definitions: BTreeMap<DefinitionId, ProjectDefinition>,
    pub runs: BTreeMap<RunId, RunRecord>,
    pub next_run_id: RunId,
}

/// In-memory [`RunStore`] behind a `parking_lot::RwLock`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    definitions: BTreeMap<DefinitionId, Arc<ProjectDefinition>>,
    runs: BTreeMap<RunId, RunRecord>,
    next_run_id: RunId,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_contents(contents: StoreContents) -> Self {
        let inner = MemoryInner {
            definitions: contents
                .definitions
                .into_iter()
                .map(|(id, d)| (id, Arc::new(d)))
                .collect(),
            runs: contents.runs,
            next_run_id: contents.next_run_id,
        };
        Self {
            inner: RwLock::new(inner),
        }
    }

    /// Copy of everything held, for saving.
    pub fn contents(&self) -> StoreContents {
        let inner = self.inner.read();
        StoreContents {
            definitions: inner
                .definitions
                .iter()
                .map(|(id, d)| (*id, (**d).clone()))
                .collect(),
            runs: inner.runs.clone(),
            next_run_id: inner.next_run_id,
        }
    }

    /// Store a definition. If it is active, every other definition of the
    /// same project is deactivated so at most one stays active.
    pub fn publish_definition(&self, def: ProjectDefinition) -> Result<(), StoreError> {
        validate_definition(&def).map_err(|e| StoreError::Backend(e.to_string()))?;
        let mut inner = self.inner.write();
        if def.is_active {
            for other in inner.definitions.values_mut() {
                if other.project_id == def.project_id && other.id != def.id && other.is_active {
                    let mut copy = (**other).clone();
                    copy.is_active = false;
                    *other = Arc::new(copy);
                }
            }
        }
        log::info!(
            "published definition {} v{} for project {} (active: {})",
            def.id,
            def.version,
            def.project_id,
            def.is_active
        );
        inner.definitions.insert(def.id, Arc::new(def));
        Ok(())
    }

    pub fn run_count(&self) -> usize {
        self.inner.read().runs.len()
    }
}

impl RunStore for MemoryStore {
    fn active_definition(
        &self,
        project_id: ProjectId,
    ) -> Result<Option<Arc<ProjectDefinition>>, StoreError> {
        let inner = self.inner.read();
        Ok(inner
            .definitions
            .values()
            .find(|d| d.project_id == project_id && d.is_active)
            .cloned())
    }

    fn definition(&self, id: DefinitionId) -> Result<Option<Arc<ProjectDefinition>>, StoreError> {
        Ok(self.inner.read().definitions.get(&id).cloned())
    }

    fn insert_run(&self, mut record: RunRecord) -> Result<RunId, StoreError> {
        let mut inner = self.inner.write();
        inner.next_run_id += 1;
        let id = inner.next_run_id;
        record.run.id = id;
        inner.runs.insert(id, record);
        Ok(id)
    }

    fn load_run(&self, id: RunId) -> Result<Option<RunRecord>, StoreError> {
        Ok(self.inner.read().runs.get(&id).cloned())
    }

    fn commit_run(&self, commit: RunCommit) -> Result<(), StoreError> {
        let run_id = commit.run.id;
        let mut inner = self.inner.write();
        let record = inner
            .runs
            .get_mut(&run_id)
            .ok_or(StoreError::RunNotFound(run_id))?;

        if record.run.revision != commit.expected_revision {
            return Err(StoreError::Conflict {
                run_id,
                expected: commit.expected_revision,
                found: record.run.revision,
            });
        }
        let mut events = record.timeline.events().to_vec();
        for event in commit.new_events {
            let expected = events.len() as u32;
            if event.index != expected {
                return Err(StoreError::TimelineGap {
                    run_id,
                    expected,
                    found: event.index,
                });
            }
            events.push(event);
        }
        let timeline = Timeline::from_events(events).map_err(StoreError::Backend)?;

        record.run = commit.run;
        record.state = commit.state;
        record.timeline = timeline;
        Ok(())
    }

    fn list_runs(&self) -> Result<Vec<Run>, StoreError> {
        Ok(self
            .inner
            .read()
            .runs
            .values()
            .map(|r| r.run.clone())
            .collect())
    }
}
