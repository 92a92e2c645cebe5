//! In-process event bus backed by `tokio::sync::broadcast` channels.
//!
//! [`EventBus`] carries two independent topics:
//!
//! - `raw-frame`: every decoded worker frame ([`RawFrameEvent`]);
//! - `generation-result`: synthesized job outcomes ([`GenerationEvent`]).
//!
//! It is designed to be shared via `Arc<EventBus>` across the application.

use chrono::{DateTime, Utc};
use genforge_core::job_events::{TOPIC_GENERATION_RESULT, TOPIC_RAW_FRAME};
use genforge_core::output::OutputRecord;
use genforge_core::types::DbId;
use serde::Serialize;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A worker frame as it came off the wire, after JSON decoding.
#[derive(Debug, Clone, Serialize)]
pub struct RawFrameEvent {
    /// The frame's `type` field, e.g. `"executed"`.
    pub frame_type: String,
    /// The frame's `data` field (`null` when absent).
    pub data: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl RawFrameEvent {
    pub fn new(frame_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            frame_type: frame_type.into(),
            data,
            received_at: Utc::now(),
        }
    }
}

/// Outcome of a correlated generation job.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerationEvent {
    /// At least one output of the job was persisted.
    Completed {
        job_id: String,
        user_id: DbId,
        template_id: DbId,
        outputs: Vec<OutputRecord>,
    },

    /// The worker reported an execution error for the job.
    Failed {
        job_id: String,
        user_id: DbId,
        template_id: DbId,
        error: String,
    },

    /// The job was removed from the worker queue by the platform.
    Cancelled {
        job_id: String,
        user_id: DbId,
        template_id: DbId,
    },
}

impl GenerationEvent {
    pub fn job_id(&self) -> &str {
        match self {
            Self::Completed { job_id, .. }
            | Self::Failed { job_id, .. }
            | Self::Cancelled { job_id, .. } => job_id,
        }
    }

    pub fn user_id(&self) -> DbId {
        match self {
            Self::Completed { user_id, .. }
            | Self::Failed { user_id, .. }
            | Self::Cancelled { user_id, .. } => *user_id,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for each broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// # Usage
///
/// ```rust
/// use genforge_events::bus::{EventBus, RawFrameEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe_raw();
///
/// bus.publish_raw(RawFrameEvent::new("status", serde_json::json!({})));
/// ```
pub struct EventBus {
    raw: broadcast::Sender<RawFrameEvent>,
    results: broadcast::Sender<GenerationEvent>,
}

impl EventBus {
    /// Create a bus whose channels each buffer `capacity` events.
    ///
    /// When a buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (raw, _) = broadcast::channel(capacity);
        let (results, _) = broadcast::channel(capacity);
        Self { raw, results }
    }

    /// Publish a decoded worker frame on the `raw-frame` topic.
    pub fn publish_raw(&self, event: RawFrameEvent) {
        // SendError only means there are zero receivers.
        let _ = self.raw.send(event);
    }

    /// Publish a job outcome on the `generation-result` topic.
    pub fn publish_result(&self, event: GenerationEvent) {
        tracing::debug!(
            topic = TOPIC_GENERATION_RESULT,
            job_id = %event.job_id(),
            "Publishing generation event",
        );
        let _ = self.results.send(event);
    }

    pub fn subscribe_raw(&self) -> broadcast::Receiver<RawFrameEvent> {
        self.raw.subscribe()
    }

    pub fn subscribe_results(&self) -> broadcast::Receiver<GenerationEvent> {
        self.results.subscribe()
    }

    /// Number of live subscribers on a topic, or `None` for an unknown topic.
    pub fn subscriber_count(&self, topic: &str) -> Option<usize> {
        match topic {
            TOPIC_RAW_FRAME => Some(self.raw.receiver_count()),
            TOPIC_GENERATION_RESULT => Some(self.results.receiver_count()),
            _ => None,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
