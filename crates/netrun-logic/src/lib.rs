//! Run engine for NetRun circuits.
//!
//! This crate holds every rule of a run: definition parsing, per-circuit
//! state, discovery, hack resolution, the timeline and access decisions.
//! It is independent of any database or runtime. Storage, project
//! membership and time come in through the [`store::RunStore`],
//! [`access::AccessOracle`] and [`clock::Clock`] traits, so the same code
//! runs inside the SpacetimeDB module, the simulation harness and tests.
//!
//! # Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`access`] | Requester, project roles, gateway checks, in-memory oracle |
//! | [`clock`] | Time source trait, system and fixed clocks |
//! | [`config`] | Engine tunables and validation |
//! | [`definition`] | Typed circuits/nodes/links, JSON parsing and validation |
//! | [`discovery`] | One-hop reveal closure, hidden-link rules, move legality |
//! | [`error`] | Error taxonomy with stable codes |
//! | [`hack`] | Hack, move, circuit switch and reveal transitions |
//! | [`persistence`] | Bincode save/load of the in-memory store |
//! | [`run`] | Run metadata and stored record |
//! | [`service`] | Operation surface: locking, authorization, single commit |
//! | [`state`] | Discovery/hack/block flags, patches, position |
//! | [`store`] | Persistence trait and in-memory store |
//! | [`timeline`] | Append-only event log with read-only snapshots |
//! | [`view`] | Flattened run views for clients |

pub mod access;
pub mod clock;
pub mod config;
pub mod definition;
pub mod discovery;
pub mod error;
pub mod hack;
pub mod persistence;
pub mod run;
pub mod service;
pub mod state;
pub mod store;
pub mod timeline;
pub mod view;

pub use error::{EngineError, EngineResult, ErrorCode};
pub use service::RunService;
