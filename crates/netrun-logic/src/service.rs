//! Run service: the operation surface hosts call.
//!
//! Every mutation follows the same path:
//!
//! 1. validate raw input
//! 2. take the run's lock from [`RunLocks`]
//! 3. load the live record (deleted runs are `NotFound`)
//! 4. authorize through the gateway
//! 5. run the pure transition on the loaded copy
//! 6. bump the revision and write everything with one `commit_run`
//!
//! An error at any step returns before the commit, so the store never sees
//! a partial mutation. The lock serializes writers within one process; the
//! revision check in the store catches writers in other processes.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::access::{
    can_access_run, can_create_run_in_project, can_reveal_links, require_admin, AccessOracle,
    Requester,
};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::definition::{ProjectDefinition, ProjectId};
use crate::discovery::Revealed;
use crate::error::{EngineError, EngineResult};
use crate::hack::{self, HackInput, HackResult, MoveResult, SwitchResult};
use crate::run::{Run, RunId, RunRecord, RunStatus};
use crate::state::RunState;
use crate::store::{RunCommit, RunStore};
use crate::timeline::{EventKind, Timeline};
use crate::view::RunInfo;

/// Returned by [`RunService::create_run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedRun {
    pub run_id: RunId,
    pub run_name: String,
}

/// One mutex per run id with a mutation in flight.
///
/// Entries exist only while some caller holds or waits for them: every
/// [`acquire`](Self::acquire) is paired with a [`release`](Self::release)
/// that drops the entry once its last user is gone.
#[derive(Debug, Default)]
pub struct RunLocks {
    locks: Mutex<HashMap<RunId, Arc<Mutex<()>>>>,
}

impl RunLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, run_id: RunId) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(run_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Give back a handle from [`acquire`](Self::acquire). Call only after
    /// its guard is dropped.
    pub fn release(&self, run_id: RunId, handle: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock();
        let idle = locks
            .get(&run_id)
            .is_some_and(|held| Arc::ptr_eq(held, &handle) && Arc::strong_count(held) == 2);
        drop(handle);
        if idle {
            locks.remove(&run_id);
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct RunService<S, O, C> {
    store: S,
    oracle: O,
    clock: C,
    config: EngineConfig,
    locks: RunLocks,
    // serializes default-name numbering with the insert it names
    creating: Mutex<()>,
}

impl<S: RunStore, O: AccessOracle, C: Clock> RunService<S, O, C> {
    pub fn new(store: S, oracle: O, clock: C) -> Self {
        Self::with_config(store, oracle, clock, EngineConfig::default())
    }

    pub fn with_config(store: S, oracle: O, clock: C, config: EngineConfig) -> Self {
        Self {
            store,
            oracle,
            clock,
            config,
            locks: RunLocks::new(),
            creating: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Creation ──────────────────────────────────────────────────────

    /// Start a new run on the project's active definition.
    pub fn create_run(
        &self,
        requester: &Requester,
        project_id: ProjectId,
        name: Option<&str>,
    ) -> EngineResult<CreatedRun> {
        let access = can_create_run_in_project(&self.oracle, requester, project_id)?;
        if !access.allowed {
            log::warn!(
                "user {} denied run creation in project {}",
                requester.user_id,
                project_id
            );
        }
        access.into_result("create run")?;

        let def = self
            .store
            .active_definition(project_id)?
            .ok_or_else(|| {
                EngineError::not_found(format!("active definition for project {project_id}"))
            })?;
        let _creating = self.creating.lock();
        let run_name = self.resolve_run_name(requester, project_id, name)?;

        let now = self.clock.now();
        let state = RunState::start(&def)?;
        let mut timeline = Timeline::new();
        timeline.append(
            EventKind::RunStart,
            &state.position().circuit_id,
            format!("Run {run_name} started"),
            &state,
            now,
        );
        let record = RunRecord {
            run: Run {
                id: 0,
                project_id,
                definition_id: def.id,
                owner_user_id: requester.user_id.clone(),
                name: run_name.clone(),
                status: RunStatus::Active,
                created_at: now,
                updated_at: now,
                deleted_at: None,
                revision: 0,
            },
            state,
            timeline,
        };
        let run_id = self.store.insert_run(record)?;
        log::info!(
            "run {} '{}' created by {} on definition {} v{}",
            run_id,
            run_name,
            requester.user_id,
            def.id,
            def.version
        );
        Ok(CreatedRun { run_id, run_name })
    }

    fn resolve_run_name(
        &self,
        requester: &Requester,
        project_id: ProjectId,
        name: Option<&str>,
    ) -> EngineResult<String> {
        let trimmed = name.map(str::trim).unwrap_or_default();
        let name = if trimmed.is_empty() {
            let n = self
                .store
                .list_runs()?
                .iter()
                .filter(|r| r.project_id == project_id && r.owner_user_id == requester.user_id)
                .count()
                + 1;
            format!("{} #{n}", self.config.default_run_name_prefix.trim())
        } else {
            trimmed.to_string()
        };
        let len = name.chars().count();
        if len > self.config.max_run_name_len {
            return Err(EngineError::validation(format!(
                "run name is {len} characters, limit is {}",
                self.config.max_run_name_len
            )));
        }
        Ok(name)
    }

    // ── Transitions ───────────────────────────────────────────────────

    pub fn attempt_hack(
        &self,
        requester: &Requester,
        run_id: RunId,
        input: i64,
    ) -> EngineResult<HackResult> {
        let input = self.check_input(HackInput::try_from(input)?)?;
        self.hack_with(requester, run_id, input)
    }

    /// Same as [`attempt_hack`](Self::attempt_hack) for inputs that arrive
    /// as text, such as form fields.
    pub fn attempt_hack_raw(
        &self,
        requester: &Requester,
        run_id: RunId,
        raw: &str,
    ) -> EngineResult<HackResult> {
        let input = self.check_input(HackInput::parse(raw)?)?;
        self.hack_with(requester, run_id, input)
    }

    fn check_input(&self, input: HackInput) -> EngineResult<HackInput> {
        if input.value() > self.config.max_hack_input {
            return Err(EngineError::validation(format!(
                "hack input {} exceeds the maximum of {}",
                input.value(),
                self.config.max_hack_input
            )));
        }
        Ok(input)
    }

    fn hack_with(
        &self,
        requester: &Requester,
        run_id: RunId,
        input: HackInput,
    ) -> EngineResult<HackResult> {
        self.mutate(
            requester,
            run_id,
            "hack",
            |run| can_access_run(requester, run).into_result("hack"),
            |def, record, now| hack::attempt_hack(def, record, input, now),
        )
    }

    pub fn move_to_node(
        &self,
        requester: &Requester,
        run_id: RunId,
        node_id: &str,
    ) -> EngineResult<MoveResult> {
        self.mutate(
            requester,
            run_id,
            "move",
            |run| can_access_run(requester, run).into_result("move"),
            |def, record, _| hack::move_to_node(def, record, node_id),
        )
    }

    pub fn switch_circuit(
        &self,
        requester: &Requester,
        run_id: RunId,
        circuit_id: &str,
    ) -> EngineResult<SwitchResult> {
        self.mutate(
            requester,
            run_id,
            "switch circuit",
            |run| can_access_run(requester, run).into_result("switch circuit"),
            |def, record, now| hack::switch_circuit(def, record, circuit_id, now),
        )
    }

    /// Game-master action: reveal a link of the current circuit.
    pub fn reveal_link(
        &self,
        requester: &Requester,
        run_id: RunId,
        link_id: &str,
    ) -> EngineResult<Revealed> {
        self.mutate(
            requester,
            run_id,
            "reveal link",
            |run| can_reveal_links(&self.oracle, requester, run)?.into_result("reveal link"),
            |def, record, now| hack::reveal_link(def, record, link_id, now),
        )
    }

    /// Soft delete. The run and its history stay in the store but every
    /// later operation reports `NotFound`.
    pub fn delete_run(&self, requester: &Requester, run_id: RunId) -> EngineResult<()> {
        self.mutate(
            requester,
            run_id,
            "delete",
            |run| can_access_run(requester, run).into_result("delete run"),
            |_, record, now| {
                record.run.deleted_at = Some(now);
                Ok(())
            },
        )?;
        log::info!("run {} deleted by {}", run_id, requester.user_id);
        Ok(())
    }

    fn mutate<T>(
        &self,
        requester: &Requester,
        run_id: RunId,
        action: &str,
        authorize: impl FnOnce(&Run) -> EngineResult<()>,
        transition: impl FnOnce(&ProjectDefinition, &mut RunRecord, DateTime<Utc>) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let handle = self.locks.acquire(run_id);
        let result = {
            let _guard = handle.lock();
            self.mutate_locked(requester, run_id, action, authorize, transition)
        };
        self.locks.release(run_id, handle);
        result
    }

    fn mutate_locked<T>(
        &self,
        requester: &Requester,
        run_id: RunId,
        action: &str,
        authorize: impl FnOnce(&Run) -> EngineResult<()>,
        transition: impl FnOnce(&ProjectDefinition, &mut RunRecord, DateTime<Utc>) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let mut record = self.load_live(run_id)?;
        if let Err(e) = authorize(&record.run) {
            log::warn!("user {} denied {} on run {}: {}", requester.user_id, action, run_id, e);
            return Err(e);
        }
        let def = self.pinned_definition(&record.run)?;

        let expected_revision = record.run.revision;
        let prior_events = record.timeline.len();
        let now = self.clock.now();
        let out = match transition(def.as_ref(), &mut record, now) {
            Ok(out) => out,
            Err(e) => {
                log::warn!("run {} {} rejected: {}", run_id, action, e);
                return Err(e);
            }
        };

        record.run.revision = expected_revision + 1;
        record.run.updated_at = now;
        let new_events = record.timeline.since(prior_events).to_vec();
        self.store.commit_run(RunCommit {
            run: record.run,
            expected_revision,
            state: record.state,
            new_events,
        })?;
        Ok(out)
    }

    // ── Reads ─────────────────────────────────────────────────────────

    pub fn get_run_info(&self, requester: &Requester, run_id: RunId) -> EngineResult<RunInfo> {
        let record = self.load_live(run_id)?;
        can_access_run(requester, &record.run).into_result("view run")?;
        let def = self.pinned_definition(&record.run)?;
        Ok(RunInfo::build(&def, record))
    }

    /// The requester's own live runs, oldest first.
    pub fn list_user_runs(&self, requester: &Requester) -> EngineResult<Vec<Run>> {
        Ok(self
            .store
            .list_runs()?
            .into_iter()
            .filter(|r| !r.is_deleted() && r.owner_user_id == requester.user_id)
            .collect())
    }

    /// Every live run. Admin only.
    pub fn list_all_runs(&self, requester: &Requester) -> EngineResult<Vec<Run>> {
        require_admin(requester).into_result("list all runs")?;
        Ok(self
            .store
            .list_runs()?
            .into_iter()
            .filter(|r| !r.is_deleted())
            .collect())
    }

    fn load_live(&self, run_id: RunId) -> EngineResult<RunRecord> {
        match self.store.load_run(run_id)? {
            Some(record) if !record.run.is_deleted() => Ok(record),
            _ => Err(EngineError::not_found(format!("run {run_id}"))),
        }
    }

    fn pinned_definition(&self, run: &Run) -> EngineResult<Arc<ProjectDefinition>> {
        self.store.definition(run.definition_id)?.ok_or_else(|| {
            EngineError::not_found(format!(
                "definition {} of run {}",
                run.definition_id, run.id
            ))
        })
    }
}
