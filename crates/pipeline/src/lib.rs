//! Generation job orchestration.
//!
//! Wires the worker connection, the correlation registry, job submission
//! and the completion pipeline together behind [`Orchestrator`].
//!
//! - [`registry`] - in-memory `job_id -> JobContext` table with exactly-once claim.
//! - [`submitter`] - turns a request into a worker prompt and registers it.
//! - [`completion`] - downloads, stores and records a finished job's outputs.
//! - [`collaborators`] - traits for the stores and services this crate consumes.
//! - [`config`] - environment-driven settings.

pub mod collaborators;
pub mod completion;
pub mod config;
pub mod orchestrator;
pub mod registry;
pub mod submitter;

pub use orchestrator::{CancelError, Orchestrator, Services};
pub use submitter::{InputImage, SubmitError, SubmitRequest};
