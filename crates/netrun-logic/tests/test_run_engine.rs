//! Integration tests for the run service.
//!
//! Exercises: create_run → attempt_hack / move_to_node / switch_circuit /
//! reveal_link → get_run_info, through the in-memory store and oracle.
//!
//! All tests are pure logic, no SpacetimeDB.

use netrun_logic::access::{MemoryOracle, ProjectRole, Requester};
use netrun_logic::clock::FixedClock;
use netrun_logic::definition::parse_definition;
use netrun_logic::error::ErrorCode;
use netrun_logic::run::{RunId, RunStatus};
use netrun_logic::service::RunService;
use netrun_logic::state::NodeStatus;
use netrun_logic::store::{MemoryStore, RunStore};
use netrun_logic::timeline::EventKind;

type Service = RunService<MemoryStore, MemoryOracle, FixedClock>;

const PROJECT: u64 = 1;
const DEMO: &str = include_str!("../../../data/demo_project.json");

// ── Helpers ────────────────────────────────────────────────────────────

fn service_with(definition: &str) -> Service {
    let store = MemoryStore::new();
    store
        .publish_definition(parse_definition(definition).expect("definition parses"))
        .expect("definition publishes");
    let oracle = MemoryOracle::new();
    oracle.set_role("ana", PROJECT, ProjectRole::Player);
    oracle.set_role("bo", PROJECT, ProjectRole::Player);
    oracle.set_role("gm", PROJECT, ProjectRole::Editor);
    oracle.set_role("vic", PROJECT, ProjectRole::Viewer);
    RunService::new(store, oracle, FixedClock::at_epoch())
}

fn ana() -> Requester {
    Requester::user("ana")
}

fn start(svc: &Service) -> RunId {
    svc.create_run(&ana(), PROJECT, None).unwrap().run_id
}

fn status(svc: &Service, run: RunId, circuit: &str, node: &str) -> NodeStatus {
    svc.get_run_info(&ana(), run)
        .unwrap()
        .state
        .circuit(circuit)
        .and_then(|c| c.node(node))
        .map(|f| f.status())
        .unwrap_or(NodeStatus::Undiscovered)
}

fn kinds(svc: &Service, run: RunId) -> Vec<EventKind> {
    svc.get_run_info(&ana(), run)
        .unwrap()
        .timeline
        .iter()
        .map(|e| e.kind)
        .collect()
}

/// entry (cd 0) → fw (BLOQUEO, cd 5), entry → relay (WARNING, cd 5),
/// relay → goal (final, cd 2).
const LINEAR: &str = r#"{
    "id": 1, "projectId": 1, "version": 1, "isActive": true,
    "circuits": [{
        "id": "c", "name": "C",
        "nodes": [
            {"id": "entry", "name": "Entry", "cd": 0, "failMode": "WARNING", "visibleByDefault": true},
            {"id": "fw", "name": "Firewall", "level": 1, "cd": 5, "failMode": "BLOQUEO"},
            {"id": "relay", "name": "Relay", "level": 1, "cd": 5, "failMode": "WARNING"},
            {"id": "goal", "name": "Goal", "level": 2, "cd": 2, "failMode": "WARNING", "isFinal": true}
        ],
        "links": [
            {"id": "entry_fw", "from": "entry", "to": "fw"},
            {"id": "entry_relay", "from": "entry", "to": "relay", "bidirectional": true},
            {"id": "relay_goal", "from": "relay", "to": "goal"}
        ]
    }]
}"#;

// ── Scenarios ──────────────────────────────────────────────────────────

#[test]
fn scenario_a_entry_hack_discovers_neighbours() {
    let svc = service_with(LINEAR);
    let run = start(&svc);

    let info = svc.get_run_info(&ana(), run).unwrap();
    let entry = info.state.circuit("c").unwrap().node("entry").unwrap();
    assert!(entry.discovered);
    assert!(!entry.hacked);
    assert_eq!(info.state.position().node_id, "entry");
    assert_eq!(kinds(&svc, run), vec![EventKind::RunStart]);

    let result = svc.attempt_hack(&ana(), run, 0).unwrap();
    assert!(result.success);
    assert_eq!(result.newly_revealed.nodes, vec!["fw", "relay"]);
    assert_eq!(status(&svc, run, "c", "relay"), NodeStatus::Discovered);
    assert_eq!(status(&svc, run, "c", "goal"), NodeStatus::Undiscovered);
}

#[test]
fn scenario_b_bloqueo_failure_is_terminal() {
    let svc = service_with(LINEAR);
    let run = start(&svc);
    svc.attempt_hack(&ana(), run, 0).unwrap();
    svc.move_to_node(&ana(), run, "fw").unwrap();

    let result = svc.attempt_hack(&ana(), run, 3).unwrap();
    assert!(!result.success);
    assert_eq!(result.node_status, NodeStatus::Blocked);
    assert_eq!(kinds(&svc, run).last(), Some(&EventKind::NodeBlocked));

    let before = svc.store().load_run(run).unwrap().unwrap();
    let err = svc.attempt_hack(&ana(), run, 10).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidState);
    assert_eq!(svc.store().load_run(run).unwrap().unwrap(), before);
}

#[test]
fn scenario_c_warning_failure_allows_retry() {
    let svc = service_with(LINEAR);
    let run = start(&svc);
    svc.attempt_hack(&ana(), run, 0).unwrap();
    svc.move_to_node(&ana(), run, "relay").unwrap();

    let failed = svc.attempt_hack(&ana(), run, 3).unwrap();
    assert!(!failed.success);
    assert_eq!(failed.node_status, NodeStatus::Discovered);
    assert_eq!(failed.failed_attempts, 1);
    assert_eq!(status(&svc, run, "c", "relay"), NodeStatus::Discovered);

    let retry = svc.attempt_hack(&ana(), run, 5).unwrap();
    assert!(retry.success);
    assert_eq!(status(&svc, run, "c", "relay"), NodeStatus::Hacked);
}

#[test]
fn scenario_d_hidden_link_needs_explicit_reveal() {
    let svc = service_with(DEMO);
    let run = start(&svc);
    svc.attempt_hack(&ana(), run, 0).unwrap();
    svc.move_to_node(&ana(), run, "relay").unwrap();
    svc.attempt_hack(&ana(), run, 5).unwrap();
    svc.move_to_node(&ana(), run, "archive").unwrap();
    svc.attempt_hack(&ana(), run, 4).unwrap();

    // both ends of gate_backup are known through other paths
    let info = svc.get_run_info(&ana(), run).unwrap();
    let perimetro = info.state.circuit("perimetro").unwrap();
    assert!(perimetro.is_node_discovered("gate"));
    assert!(perimetro.is_node_discovered("backup"));
    assert!(!perimetro.is_link_discovered("gate_backup"));
    let view = info.current_circuit().unwrap();
    assert!(view.links.iter().all(|l| l.id != "gate_backup"));

    // players cannot reveal on someone else's run; game-masters can
    let err = svc.reveal_link(&Requester::user("bo"), run, "gate_backup").unwrap_err();
    assert_eq!(err.code(), ErrorCode::PermissionDenied);
    let revealed = svc.reveal_link(&Requester::user("gm"), run, "gate_backup").unwrap();
    assert_eq!(revealed.links, vec!["gate_backup"]);
    assert_eq!(kinds(&svc, run).last(), Some(&EventKind::LinksDiscovered));

    let view = svc.get_run_info(&ana(), run).unwrap();
    let link = view
        .current_circuit()
        .unwrap()
        .links
        .iter()
        .find(|l| l.id == "gate_backup")
        .cloned()
        .unwrap();
    assert!(link.was_hidden);
}

#[test]
fn scenario_e_final_node_completes_single_circuit_run() {
    let svc = service_with(LINEAR);
    let run = start(&svc);
    svc.attempt_hack(&ana(), run, 0).unwrap();
    svc.move_to_node(&ana(), run, "relay").unwrap();
    svc.attempt_hack(&ana(), run, 9).unwrap();
    svc.move_to_node(&ana(), run, "goal").unwrap();

    let result = svc.attempt_hack(&ana(), run, 2).unwrap();
    assert!(result.circuit_completed);
    assert!(result.run_completed);

    let info = svc.get_run_info(&ana(), run).unwrap();
    assert_eq!(info.run.status, RunStatus::Completed);
    let k = kinds(&svc, run);
    assert_eq!(
        &k[k.len() - 2..],
        &[EventKind::CircuitCompleted, EventKind::RunCompleted]
    );

    for err in [
        svc.attempt_hack(&ana(), run, 9).unwrap_err(),
        svc.move_to_node(&ana(), run, "relay").unwrap_err(),
    ] {
        assert_eq!(err.code(), ErrorCode::InvalidState);
    }
}

// ── Policies ───────────────────────────────────────────────────────────

#[test]
fn hacked_node_rejects_repeat_without_side_effects() {
    let svc = service_with(LINEAR);
    let run = start(&svc);
    svc.attempt_hack(&ana(), run, 0).unwrap();
    let before = svc.store().load_run(run).unwrap().unwrap();

    let err = svc.attempt_hack(&ana(), run, 0).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidState);
    let after = svc.store().load_run(run).unwrap().unwrap();
    assert_eq!(after.run.revision, before.run.revision);
    assert_eq!(after.timeline.len(), before.timeline.len());
}

#[test]
fn threshold_tie_succeeds() {
    let svc = service_with(LINEAR);
    let run = start(&svc);
    svc.attempt_hack(&ana(), run, 0).unwrap();
    svc.move_to_node(&ana(), run, "fw").unwrap();
    assert!(svc.attempt_hack(&ana(), run, 5).unwrap().success);
}

#[test]
fn moves_never_append_timeline_events() {
    let svc = service_with(LINEAR);
    let run = start(&svc);
    svc.attempt_hack(&ana(), run, 0).unwrap();
    let before = kinds(&svc, run);

    svc.move_to_node(&ana(), run, "relay").unwrap();
    svc.move_to_node(&ana(), run, "entry").unwrap();
    svc.move_to_node(&ana(), run, "relay").unwrap();

    assert_eq!(kinds(&svc, run), before);
    let info = svc.get_run_info(&ana(), run).unwrap();
    assert_eq!(info.state.position().node_id, "relay");
    assert_eq!(info.run.revision, 4);
}

#[test]
fn blocked_node_can_be_revisited_but_not_hacked() {
    let two_way = LINEAR.replace(
        r#""to": "fw"}"#,
        r#""to": "fw", "bidirectional": true}"#,
    );
    let svc = service_with(&two_way);
    let run = start(&svc);
    svc.attempt_hack(&ana(), run, 0).unwrap();
    svc.move_to_node(&ana(), run, "fw").unwrap();
    assert!(!svc.attempt_hack(&ana(), run, 1).unwrap().success);
    svc.move_to_node(&ana(), run, "entry").unwrap();

    let moved = svc.move_to_node(&ana(), run, "fw").unwrap();
    assert_eq!(moved.position.node_id, "fw");
    assert_eq!(status(&svc, run, "c", "fw"), NodeStatus::Blocked);
    let err = svc.attempt_hack(&ana(), run, 9).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidState);
}

#[test]
fn illegal_moves_report_invalid_move() {
    let svc = service_with(LINEAR);
    let run = start(&svc);
    // relay is not discovered yet
    let err = svc.move_to_node(&ana(), run, "relay").unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidMove);

    svc.attempt_hack(&ana(), run, 0).unwrap();
    svc.move_to_node(&ana(), run, "fw").unwrap();
    // entry → fw is one-way
    let err = svc.move_to_node(&ana(), run, "entry").unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidMove);

    let err = svc.move_to_node(&ana(), run, "nowhere").unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[test]
fn circuit_switch_preserves_progress() {
    let svc = service_with(DEMO);
    let run = start(&svc);
    svc.attempt_hack(&ana(), run, 0).unwrap();
    svc.move_to_node(&ana(), run, "relay").unwrap();

    let first = svc.switch_circuit(&ana(), run, "nucleo").unwrap();
    assert!(first.first_visit);
    assert_eq!(first.position.node_id, "dock");
    svc.attempt_hack(&ana(), run, 0).unwrap();

    let back = svc.switch_circuit(&ana(), run, "perimetro").unwrap();
    assert!(!back.first_visit);
    assert_eq!(back.position.node_id, "relay");
    assert_eq!(status(&svc, run, "perimetro", "gate"), NodeStatus::Hacked);
    assert_eq!(status(&svc, run, "nucleo", "dock"), NodeStatus::Hacked);

    let k = kinds(&svc, run);
    assert_eq!(k.iter().filter(|e| **e == EventKind::CircuitSelected).count(), 1);
    assert_eq!(k.last(), Some(&EventKind::CircuitChanged));

    let err = svc.switch_circuit(&ana(), run, "perimetro").unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidState);
    let err = svc.switch_circuit(&ana(), run, "orbital").unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotFound);
}

#[test]
fn run_completes_only_after_every_circuit() {
    let svc = service_with(DEMO);
    let run = start(&svc);
    // perimetro: gate → relay → archive → vault
    svc.attempt_hack(&ana(), run, 0).unwrap();
    svc.move_to_node(&ana(), run, "relay").unwrap();
    svc.attempt_hack(&ana(), run, 5).unwrap();
    svc.move_to_node(&ana(), run, "archive").unwrap();
    svc.attempt_hack(&ana(), run, 4).unwrap();
    svc.move_to_node(&ana(), run, "vault").unwrap();
    let r = svc.attempt_hack(&ana(), run, 8).unwrap();
    assert!(r.circuit_completed);
    assert!(!r.run_completed);

    // nucleo: hacking ice reveals the hidden dock → kernel shortcut
    svc.switch_circuit(&ana(), run, "nucleo").unwrap();
    svc.attempt_hack(&ana(), run, 0).unwrap();
    svc.move_to_node(&ana(), run, "ice").unwrap();
    let ice = svc.attempt_hack(&ana(), run, 3).unwrap();
    assert!(ice.newly_revealed.links.contains(&"dock_kernel".to_string()));
    svc.move_to_node(&ana(), run, "kernel").unwrap();
    let r = svc.attempt_hack(&ana(), run, 6).unwrap();
    assert!(r.run_completed);

    let info = svc.get_run_info(&ana(), run).unwrap();
    assert_eq!(info.run.status, RunStatus::Completed);
    assert!(info.circuits.iter().all(|c| c.completed));
}

// ── Access ─────────────────────────────────────────────────────────────

#[test]
fn only_owner_or_admin_may_play_a_run() {
    let svc = service_with(LINEAR);
    let run = start(&svc);

    let err = svc.attempt_hack(&Requester::user("bo"), run, 0).unwrap_err();
    assert_eq!(err.code(), ErrorCode::PermissionDenied);
    let err = svc.get_run_info(&Requester::user("bo"), run).unwrap_err();
    assert_eq!(err.code(), ErrorCode::PermissionDenied);

    assert!(svc.attempt_hack(&Requester::admin("root"), run, 0).unwrap().success);
}

#[test]
fn viewers_cannot_start_or_reveal() {
    let svc = service_with(DEMO);
    let err = svc.create_run(&Requester::user("vic"), PROJECT, None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::PermissionDenied);

    let run = start(&svc);
    let err = svc.reveal_link(&Requester::user("vic"), run, "gate_backup").unwrap_err();
    assert_eq!(err.code(), ErrorCode::PermissionDenied);
}

#[test]
fn disabled_project_refuses_new_runs() {
    let svc = service_with(LINEAR);
    svc.oracle().set_enabled(PROJECT, false);
    let err = svc.create_run(&ana(), PROJECT, None).unwrap_err();
    assert_eq!(err.code(), ErrorCode::PermissionDenied);
}

// ── Definitions ────────────────────────────────────────────────────────

#[test]
fn run_stays_pinned_to_its_definition() {
    let svc = service_with(LINEAR);
    let old_run = start(&svc);

    let mut v2 = parse_definition(DEMO).unwrap();
    v2.id = 2;
    v2.version = 2;
    svc.store().publish_definition(v2).unwrap();

    // the old run keeps playing circuit "c" from version 1
    assert!(svc.attempt_hack(&ana(), old_run, 0).unwrap().success);
    svc.move_to_node(&ana(), old_run, "relay").unwrap();
    let info = svc.get_run_info(&ana(), old_run).unwrap();
    assert_eq!(info.run.definition_id, 1);
    assert_eq!(info.circuits.len(), 1);

    let new_run = start(&svc);
    let info = svc.get_run_info(&ana(), new_run).unwrap();
    assert_eq!(info.run.definition_id, 2);
    assert_eq!(info.state.position().circuit_id, "perimetro");
}

#[test]
fn malformed_definitions_are_validation_errors() {
    for payload in [
        "not json",
        r#"{"id":1,"projectId":1,"version":1,"circuits":[]}"#,
        r#"{"id":1,"projectId":1,"version":1,"circuits":[{"id":"c","name":"C",
            "nodes":[{"id":"a","name":"A","cd":0,"failMode":"WARNING","visibleByDefault":true}],
            "links":[{"id":"l","from":"a","to":"ghost"}]}]}"#,
    ] {
        let err: netrun_logic::EngineError = parse_definition(payload).unwrap_err().into();
        assert_eq!(err.code(), ErrorCode::ValidationError, "{payload}");
    }
}

// ── Timeline ───────────────────────────────────────────────────────────

#[test]
fn timeline_snapshots_replay_the_run() {
    let svc = service_with(LINEAR);
    let run = start(&svc);
    svc.attempt_hack(&ana(), run, 0).unwrap();
    svc.move_to_node(&ana(), run, "fw").unwrap();
    svc.attempt_hack(&ana(), run, 1).unwrap();

    let record = svc.store().load_run(run).unwrap().unwrap();
    let view = record.timeline.view();
    assert_eq!(
        view.kinds(),
        vec![
            EventKind::RunStart,
            EventKind::NodeHacked,
            EventKind::LinksDiscovered,
            EventKind::NodeBlocked,
        ]
    );
    for (i, event) in view.iter().enumerate() {
        assert_eq!(event.index as usize, i);
    }

    let start_snapshot = view.snapshot_at(0).unwrap();
    assert_eq!(start_snapshot.discovered_nodes("c"), vec!["entry"]);
    let hacked = view.snapshot_at(1).unwrap();
    assert!(hacked.node("c", "entry").unwrap().hacked);
    assert!(hacked.node("c", "fw").unwrap().discovered);
    let blocked = view.latest().unwrap();
    assert_eq!(blocked.position().node_id, "fw");
    assert!(blocked.node("c", "fw").unwrap().blocked);
}

#[test]
fn soft_deleted_runs_are_not_found() {
    let svc = service_with(LINEAR);
    let run = start(&svc);
    let err = svc.delete_run(&Requester::user("bo"), run).unwrap_err();
    assert_eq!(err.code(), ErrorCode::PermissionDenied);

    svc.delete_run(&ana(), run).unwrap();
    assert_eq!(
        svc.move_to_node(&ana(), run, "relay").unwrap_err().code(),
        ErrorCode::NotFound
    );
    assert_eq!(
        svc.delete_run(&ana(), run).unwrap_err().code(),
        ErrorCode::NotFound
    );
    assert!(svc.list_all_runs(&Requester::admin("root")).unwrap().is_empty());
}
