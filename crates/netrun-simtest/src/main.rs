//! NetRun Headless Run Harness
//!
//! Validates a project definition and drives the run engine without
//! SpacetimeDB: a scripted playthrough, access checks, a randomized play
//! sweep and a save/load roundtrip. Runs entirely in-process.
//!
//! Usage:
//!   cargo run -p netrun-simtest
//!   cargo run -p netrun-simtest -- --verbose
//!   cargo run -p netrun-simtest -- path/to/project.json --seed 7 --runs 200
//!   cargo run -p netrun-simtest -- --json

use std::collections::BTreeMap;

use netrun_logic::access::{MemoryOracle, ProjectRole, Requester};
use netrun_logic::clock::FixedClock;
use netrun_logic::config::{validate_for_definition, EngineConfig};
use netrun_logic::definition::{entry_node, parse_definition, ProjectDefinition, RevealRule};
use netrun_logic::error::ErrorCode;
use netrun_logic::persistence::{load_store, save_store};
use netrun_logic::run::{RunId, RunStatus};
use netrun_logic::store::{MemoryStore, RunStore};
use netrun_logic::timeline::EventKind;
use netrun_logic::RunService;
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

// ── Demo project (same JSON the tests use) ──────────────────────────────
const DEMO_JSON: &str = include_str!("../../../data/demo_project.json");

type Service = RunService<MemoryStore, MemoryOracle, FixedClock>;

// ── Test harness ────────────────────────────────────────────────────────

#[derive(Serialize)]
struct TestResult {
    name: String,
    passed: bool,
    detail: String,
}

impl TestResult {
    fn new(name: &str, passed: bool, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed,
            detail: detail.into(),
        }
    }
}

#[derive(Serialize)]
struct Report<'a> {
    passed: usize,
    failed: usize,
    results: &'a [TestResult],
}

/// Headless NetRun harness
#[derive(Parser, Debug)]
#[command(name = "netrun-simtest")]
#[command(about = "Validates a project definition and plays runs against it", long_about = None)]
struct Cli {
    /// Project definition JSON (defaults to the bundled demo project)
    path: Option<String>,

    /// Print every check, not only failures
    #[arg(short, long)]
    verbose: bool,

    /// Emit the report as JSON
    #[arg(long)]
    json: bool,

    /// Seed for the random sweep
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Number of runs in the random sweep
    #[arg(long, default_value = "100")]
    runs: usize,

    /// Maximum operations per swept run
    #[arg(long, default_value = "80")]
    steps: usize,
}

fn main() {
    let opts = Cli::parse();
    if !opts.json {
        println!("=== NetRun Run Harness ===\n");
    }

    let source = match &opts.path {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("cannot read {}: {}", path, e);
                std::process::exit(2);
            }
        },
        None => DEMO_JSON.to_string(),
    };

    let mut results = Vec::new();

    // 1. Definition validation
    let def = match parse_definition(&source) {
        Ok(def) => def,
        Err(e) => {
            results.push(TestResult::new("definition_parse", false, e.to_string()));
            finish(&results, &opts);
            return;
        }
    };
    header(&opts, "Definition");
    results.extend(validate_definition(&def, opts.verbose && !opts.json));

    // 2. Scripted playthrough (demo project only)
    if opts.path.is_none() {
        header(&opts, "Playthrough");
        results.extend(validate_playthrough(&def));
    }

    // 3. Access gateway
    header(&opts, "Access");
    results.extend(validate_access(&def));

    // 4. Randomized play sweep, 5. save/load of the swept store
    header(&opts, "Random Sweep");
    let (sweep, store) = validate_random_sweep(&def, &opts);
    results.extend(sweep);
    header(&opts, "Persistence");
    results.extend(validate_persistence(store));

    finish(&results, &opts);
}

fn finish(results: &[TestResult], opts: &Cli) {
    let passed = results.iter().filter(|r| r.passed).count();
    let failed = results.len() - passed;

    if opts.json {
        let report = Report {
            passed,
            failed,
            results,
        };
        match serde_json::to_string_pretty(&report) {
            Ok(s) => println!("{}", s),
            Err(e) => eprintln!("cannot serialize report: {}", e),
        }
    } else {
        println!();
        for r in results {
            let icon = if r.passed { "✓" } else { "✗" };
            if !r.passed || opts.verbose {
                println!("  {} {}: {}", icon, r.name, r.detail);
            }
        }
        println!(
            "\n=== RESULT: {}/{} passed, {} failed ===",
            passed,
            results.len(),
            failed
        );
    }

    if failed > 0 {
        std::process::exit(1);
    }
}

fn service(def: &ProjectDefinition) -> Option<Service> {
    let store = MemoryStore::new();
    store.publish_definition(def.clone()).ok()?;
    let oracle = MemoryOracle::new();
    oracle.set_role("ana", def.project_id, ProjectRole::Player);
    oracle.set_role("gm", def.project_id, ProjectRole::Editor);
    oracle.set_role("vic", def.project_id, ProjectRole::Viewer);
    Some(RunService::new(store, oracle, FixedClock::at_epoch()))
}

fn player() -> Requester {
    Requester::user("ana")
}

// ── 1. Definition ───────────────────────────────────────────────────────

fn validate_definition(def: &ProjectDefinition, verbose: bool) -> Vec<TestResult> {
    let mut results = Vec::new();

    results.push(TestResult::new(
        "definition_has_circuits",
        !def.circuits.is_empty(),
        format!("{} circuits loaded", def.circuits.len()),
    ));

    let no_entry: Vec<&str> = def
        .circuits
        .iter()
        .filter(|c| entry_node(c).is_err())
        .map(|c| c.id.as_str())
        .collect();
    results.push(TestResult::new(
        "definition_entry_nodes",
        no_entry.is_empty(),
        if no_entry.is_empty() {
            "every circuit has a visible entry node".to_string()
        } else {
            format!("circuits without entry: {:?}", no_entry)
        },
    ));

    let no_final: Vec<&str> = def
        .circuits
        .iter()
        .filter(|c| !c.nodes.iter().any(|n| n.is_final))
        .map(|c| c.id.as_str())
        .collect();
    results.push(TestResult::new(
        "definition_final_nodes",
        no_final.is_empty(),
        if no_final.is_empty() {
            "every circuit can be completed".to_string()
        } else {
            format!("circuits that can never complete: {:?}", no_final)
        },
    ));

    let unhackable = validate_for_definition(&EngineConfig::default(), def);
    results.push(TestResult::new(
        "definition_cd_within_input_limit",
        unhackable.is_empty(),
        if unhackable.is_empty() {
            "every node can be hacked with an accepted input".to_string()
        } else {
            format!("unhackable nodes: {:?}", unhackable)
        },
    ));

    // Hidden links nobody can reveal except a game-master
    let mut manual_only = 0;
    for circuit in &def.circuits {
        for link in circuit.links.iter().filter(|l| l.hidden) {
            match &link.reveal {
                None => manual_only += 1,
                Some(RevealRule::OnHack(_)) | Some(RevealRule::OnEndpointHack) => {}
            }
        }
    }
    let hidden: usize = def
        .circuits
        .iter()
        .map(|c| c.links.iter().filter(|l| l.hidden).count())
        .sum();
    results.push(TestResult::new(
        "definition_hidden_links",
        true,
        format!("{} hidden links, {} reveal only by hand", hidden, manual_only),
    ));

    if verbose {
        for c in &def.circuits {
            println!(
                "  circuit {:<12} {:>2} nodes {:>2} links",
                c.id,
                c.nodes.len(),
                c.links.len()
            );
        }
    }

    results
}

// ── 2. Playthrough ──────────────────────────────────────────────────────

fn validate_playthrough(def: &ProjectDefinition) -> Vec<TestResult> {
    let mut results = Vec::new();
    let Some(svc) = service(def) else {
        results.push(TestResult::new("play_setup", false, "definition rejected by store"));
        return results;
    };
    let ana = player();
    let run = match svc.create_run(&ana, def.project_id, None) {
        Ok(created) => {
            results.push(TestResult::new("play_create", true, created.run_name));
            created.run_id
        }
        Err(e) => {
            results.push(TestResult::new("play_create", false, e.to_string()));
            return results;
        }
    };

    // Entry hack discovers the gate's neighbours
    let entry = svc.attempt_hack(&ana, run, 0);
    results.push(TestResult::new(
        "play_entry_hack",
        entry
            .as_ref()
            .is_ok_and(|r| r.success && r.newly_revealed.nodes == ["firewall", "relay"]),
        format!("{:?}", entry.map(|r| r.newly_revealed.nodes)),
    ));

    // BLOQUEO failure is terminal
    let blocked = svc
        .move_to_node(&ana, run, "firewall")
        .and_then(|_| svc.attempt_hack(&ana, run, 2));
    let retry = svc.attempt_hack(&ana, run, 9);
    results.push(TestResult::new(
        "play_bloqueo_blocks",
        blocked.as_ref().is_ok_and(|r| !r.success)
            && retry.as_ref().is_err_and(|e| e.code() == ErrorCode::InvalidState),
        "firewall blocked, retry refused",
    ));
    let through_block = svc.move_to_node(&ana, run, "gate");
    results.push(TestResult::new(
        "play_blocked_one_way",
        through_block.is_err(),
        "firewall has no way back to the gate",
    ));

    // Restart from scratch on a second run for the main path
    let run = match svc.create_run(&ana, def.project_id, Some("Main path")) {
        Ok(created) => created.run_id,
        Err(e) => {
            results.push(TestResult::new("play_second_run", false, e.to_string()));
            return results;
        }
    };

    // WARNING failure keeps the node open
    let reached = svc
        .attempt_hack(&ana, run, 0)
        .and_then(|_| svc.move_to_node(&ana, run, "relay"));
    let events_before = timeline_len(&svc, run);
    let warned = reached.and_then(|_| svc.attempt_hack(&ana, run, 1));
    let events_after = timeline_len(&svc, run);
    let retried = svc.attempt_hack(&ana, run, 5);
    results.push(TestResult::new(
        "play_warning_retry",
        warned.as_ref().is_ok_and(|r| !r.success && r.failed_attempts == 1)
            && retried.as_ref().is_ok_and(|r| r.success),
        "relay failed once, then hacked",
    ));
    results.push(TestResult::new(
        "play_warning_silent",
        warned.is_ok() && events_after == events_before,
        format!("{} events before and after the failure", events_before),
    ));

    // Endpoint hack of backup reveals the hidden backup → vault link
    let backup = svc
        .move_to_node(&ana, run, "archive")
        .and_then(|_| svc.attempt_hack(&ana, run, 4))
        .and_then(|_| svc.move_to_node(&ana, run, "backup"))
        .and_then(|_| svc.attempt_hack(&ana, run, 6));
    results.push(TestResult::new(
        "play_endpoint_reveal",
        backup
            .as_ref()
            .is_ok_and(|r| r.newly_revealed.links.iter().any(|l| l == "backup_vault")),
        format!("{:?}", backup.map(|r| r.newly_revealed.links)),
    ));

    let vault = svc
        .move_to_node(&ana, run, "vault")
        .and_then(|_| svc.attempt_hack(&ana, run, 8));
    results.push(TestResult::new(
        "play_first_circuit",
        vault
            .as_ref()
            .is_ok_and(|r| r.circuit_completed && !r.run_completed),
        "perimetro completed, run still active",
    ));

    // Second circuit: hacking ice reveals dock → kernel
    let switched = svc.switch_circuit(&ana, run, "nucleo");
    let ice = svc
        .attempt_hack(&ana, run, 0)
        .and_then(|_| svc.move_to_node(&ana, run, "ice"))
        .and_then(|_| svc.attempt_hack(&ana, run, 3));
    results.push(TestResult::new(
        "play_switch_and_reveal",
        switched.as_ref().is_ok_and(|s| s.first_visit)
            && ice
                .as_ref()
                .is_ok_and(|r| r.newly_revealed.links.iter().any(|l| l == "dock_kernel")),
        "nucleo entered, dock_kernel revealed",
    ));

    let kernel = svc
        .move_to_node(&ana, run, "kernel")
        .and_then(|_| svc.attempt_hack(&ana, run, 6));
    let info = svc.get_run_info(&ana, run);
    results.push(TestResult::new(
        "play_run_completed",
        kernel.as_ref().is_ok_and(|r| r.run_completed)
            && info
                .as_ref()
                .is_ok_and(|i| i.run.status == RunStatus::Completed),
        "every circuit completed",
    ));

    if let Ok(Some(record)) = svc.store().load_run(run) {
        let view = record.timeline.view();
        let kinds = view.kinds();
        results.push(TestResult::new(
            "play_timeline",
            kinds.first() == Some(&EventKind::RunStart)
                && kinds.last() == Some(&EventKind::RunCompleted)
                && view.count(EventKind::CircuitCompleted) == 2,
            format!("{} events", kinds.len()),
        ));
    }

    results
}

fn timeline_len(svc: &Service, run: RunId) -> usize {
    svc.store()
        .load_run(run)
        .ok()
        .flatten()
        .map_or(0, |r| r.timeline.len())
}

// ── 3. Access ───────────────────────────────────────────────────────────

fn validate_access(def: &ProjectDefinition) -> Vec<TestResult> {
    let mut results = Vec::new();
    let Some(svc) = service(def) else {
        results.push(TestResult::new("access_setup", false, "definition rejected by store"));
        return results;
    };

    let viewer = svc.create_run(&Requester::user("vic"), def.project_id, None);
    results.push(TestResult::new(
        "access_viewer_cannot_start",
        viewer.is_err_and(|e| e.code() == ErrorCode::PermissionDenied),
        "viewers are refused",
    ));

    let Ok(created) = svc.create_run(&player(), def.project_id, None) else {
        results.push(TestResult::new("access_player_start", false, "player refused"));
        return results;
    };
    let intruder = svc.attempt_hack(&Requester::user("gm"), created.run_id, 0);
    results.push(TestResult::new(
        "access_foreign_run",
        intruder.is_err_and(|e| e.code() == ErrorCode::PermissionDenied),
        "only the owner plays a run",
    ));

    let admin = svc.attempt_hack(&Requester::admin("root"), created.run_id, 0);
    results.push(TestResult::new(
        "access_admin_override",
        admin.is_ok(),
        "admins may act on any run",
    ));

    results
}

// ── 4. Random sweep ─────────────────────────────────────────────────────

fn validate_random_sweep(def: &ProjectDefinition, opts: &Cli) -> (Vec<TestResult>, MemoryStore) {
    let mut results = Vec::new();
    let Some(svc) = service(def) else {
        results.push(TestResult::new("sweep_setup", false, "definition rejected by store"));
        return (results, MemoryStore::new());
    };
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let ana = player();
    let gm = Requester::user("gm");

    let mut outcomes: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut violations = Vec::new();
    let mut completed = 0;

    for _ in 0..opts.runs {
        let run = match svc.create_run(&ana, def.project_id, None) {
            Ok(c) => c.run_id,
            Err(e) => {
                violations.push(format!("create: {}", e));
                break;
            }
        };
        for step in 0..opts.steps {
            let state = match svc.get_run_info(&ana, run) {
                Ok(info) => info.state,
                Err(e) => {
                    violations.push(format!("run {} step {}: {}", run, step, e));
                    break;
                }
            };
            let Some(circuit) = def
                .circuits
                .iter()
                .find(|c| c.id == state.position().circuit_id)
            else {
                violations.push(format!("run {} positioned in unknown circuit", run));
                break;
            };

            let outcome = match rng.gen_range(0..10) {
                0..=3 => svc.attempt_hack(&ana, run, rng.gen_range(0..10)).map(|_| ()),
                4..=7 => {
                    let node = &circuit.nodes[rng.gen_range(0..circuit.nodes.len())].id;
                    svc.move_to_node(&ana, run, node).map(|_| ())
                }
                8 => {
                    let target = &def.circuits[rng.gen_range(0..def.circuits.len())].id;
                    svc.switch_circuit(&ana, run, target).map(|_| ())
                }
                _ if !circuit.links.is_empty() => {
                    let link = &circuit.links[rng.gen_range(0..circuit.links.len())].id;
                    svc.reveal_link(&gm, run, link).map(|_| ())
                }
                _ => Ok(()),
            };
            let key = match &outcome {
                Ok(()) => "ok",
                Err(e) => e.code().as_str(),
            };
            *outcomes.entry(key).or_default() += 1;
            if let Err(e) = &outcome {
                if !matches!(e.code(), ErrorCode::InvalidState | ErrorCode::InvalidMove) {
                    violations.push(format!("run {} step {}: unexpected {}", run, step, e));
                }
            }

            match svc.get_run_info(&ana, run) {
                Ok(info) => {
                    if let Err(v) = info.state.check_invariants(def) {
                        violations.push(format!("run {} step {}: {}", run, step, v));
                    }
                    if info.run.status == RunStatus::Completed {
                        completed += 1;
                        break;
                    }
                }
                Err(e) => violations.push(format!("run {} step {}: {}", run, step, e)),
            }
        }
    }

    results.push(TestResult::new(
        "sweep_invariants",
        violations.is_empty(),
        if violations.is_empty() {
            format!("{} runs × {} steps (seed {})", opts.runs, opts.steps, opts.seed)
        } else {
            format!("{} violations, first: {}", violations.len(), violations[0])
        },
    ));
    results.push(TestResult::new(
        "sweep_outcomes",
        outcomes.get("ok").copied().unwrap_or(0) > 0,
        format!("{:?}, {} runs completed", outcomes, completed),
    ));

    let store = MemoryStore::from_contents(svc.store().contents());
    (results, store)
}

// ── 5. Persistence ──────────────────────────────────────────────────────

fn validate_persistence(store: MemoryStore) -> Vec<TestResult> {
    let mut bytes = Vec::new();
    let roundtrip = save_store(&store, &mut bytes)
        .map_err(|e| e.to_string())
        .and_then(|_| load_store(bytes.as_slice()).map_err(|e| e.to_string()));
    vec![match roundtrip {
        Ok(loaded) => TestResult::new(
            "persistence_roundtrip",
            loaded.contents() == store.contents(),
            format!("{} runs, {} bytes", store.run_count(), bytes.len()),
        ),
        Err(e) => TestResult::new("persistence_roundtrip", false, e),
    }]
}

fn header(opts: &Cli, section: &str) {
    if !opts.json {
        println!("--- {} ---", section);
    }
}
