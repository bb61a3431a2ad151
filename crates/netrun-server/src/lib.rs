//! NetRun Server - SpacetimeDB Module
//!
//! Hosts the run engine as reducers over SpacetimeDB tables. Clients
//! subscribe to the `run` and `timeline_event` tables to render progress.

mod adapters;
mod reducers;
mod tables;

pub use reducers::*;
pub use tables::*;
