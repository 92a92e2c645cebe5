//! Generation-result relay to live end-user sessions.
//!
//! [`LiveRelay`] subscribes to the `generation-result` topic and forwards
//! each [`GenerationEvent`] to the owning user's live channel through a
//! [`LiveNotifier`]. It runs as a long-lived background task and stops
//! when the bus is dropped or its cancellation token fires.

use std::sync::Arc;

use async_trait::async_trait;
use genforge_core::error::CoreError;
use genforge_core::job_events::{
    user_topic, MSG_TYPE_GENERATION_CANCELLED, MSG_TYPE_GENERATION_COMPLETED,
    MSG_TYPE_GENERATION_FAILED,
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::bus::GenerationEvent;

/// Delivery transport for connected end-user sessions.
#[async_trait]
pub trait LiveNotifier: Send + Sync {
    /// Deliver `payload` to every session subscribed to `topic`.
    async fn notify(&self, topic: &str, payload: serde_json::Value) -> Result<(), CoreError>;
}

/// Build the JSON message pushed to end users for an event.
pub fn live_payload(event: &GenerationEvent) -> serde_json::Value {
    match event {
        GenerationEvent::Completed {
            job_id,
            template_id,
            outputs,
            ..
        } => serde_json::json!({
            "type": MSG_TYPE_GENERATION_COMPLETED,
            "job_id": job_id,
            "template_id": template_id,
            "outputs": outputs,
        }),
        GenerationEvent::Failed {
            job_id,
            template_id,
            error,
            ..
        } => serde_json::json!({
            "type": MSG_TYPE_GENERATION_FAILED,
            "job_id": job_id,
            "template_id": template_id,
            "error": error,
        }),
        GenerationEvent::Cancelled {
            job_id,
            template_id,
            ..
        } => serde_json::json!({
            "type": MSG_TYPE_GENERATION_CANCELLED,
            "job_id": job_id,
            "template_id": template_id,
        }),
    }
}

/// Forwards generation events to a [`LiveNotifier`].
pub struct LiveRelay {
    notifier: Arc<dyn LiveNotifier>,
}

impl LiveRelay {
    pub fn new(notifier: Arc<dyn LiveNotifier>) -> Self {
        Self { notifier }
    }

    /// Run the relay loop until the channel closes or `cancel` fires.
    pub async fn run(
        self,
        mut receiver: broadcast::Receiver<GenerationEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Live relay cancelled");
                    break;
                }
                received = receiver.recv() => received,
            };

            match received {
                Ok(event) => self.forward(&event).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Live relay lagged, some results were not delivered");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, live relay shutting down");
                    break;
                }
            }
        }
    }

    async fn forward(&self, event: &GenerationEvent) {
        let topic = user_topic(event.user_id());
        if let Err(e) = self.notifier.notify(&topic, live_payload(event)).await {
            tracing::error!(
                error = %e,
                job_id = %event.job_id(),
                topic = %topic,
                "Failed to deliver live notification",
            );
        }
    }
}
