//! Shared domain types for the generation job orchestrator.
//!
//! Pure logic only: no I/O, no async. Everything here is consumed by the
//! event bus, the worker client, and the pipeline crates.

pub mod error;
pub mod job_events;
pub mod job_spec;
pub mod mime;
pub mod naming;
pub mod output;
pub mod template;
pub mod types;
