//! ComfyUI WebSocket and REST client library.
//!
//! Provides typed frame parsing, the supervised streaming connection,
//! HTTP API wrappers for submission, staging, retrieval and cancellation,
//! and the reconnect delay policy.

pub mod api;
pub mod client;
pub mod messages;
pub mod processor;
pub mod reconnect;
pub mod supervisor;
