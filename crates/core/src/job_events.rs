//! Event topic and live-message type constants.
//!
//! Topic names are shared by the event bus, the orchestrator, and the
//! live-notification relay.

/// Every decoded worker frame, regardless of type.
pub const TOPIC_RAW_FRAME: &str = "raw-frame";

/// Synthesized completion / failure / cancellation notifications.
pub const TOPIC_GENERATION_RESULT: &str = "generation-result";

/// Live message type for a job whose outputs were persisted.
pub const MSG_TYPE_GENERATION_COMPLETED: &str = "generation_completed";

/// Live message type for a job the worker failed to execute.
pub const MSG_TYPE_GENERATION_FAILED: &str = "generation_failed";

/// Live message type for a job cancelled by the platform.
pub const MSG_TYPE_GENERATION_CANCELLED: &str = "generation_cancelled";

/// Live notification topic for one user's sessions.
pub fn user_topic(user_id: crate::types::DbId) -> String {
    format!("user:{user_id}")
}
