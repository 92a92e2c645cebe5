//! WebSocket message processing loop.
//!
//! Reads raw frames from the worker connection, decodes each text frame
//! exactly once, publishes it on the `raw-frame` topic, then hands the
//! typed [`ComfyUIMessage`] to a [`FrameHandler`].

use futures::{Stream, StreamExt};
use genforge_events::{EventBus, RawFrameEvent};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;

use crate::messages::{ComfyUIMessage, RawFrame};

/// Consumer of typed worker messages.
///
/// Called on the receive loop: implementations must return promptly and
/// spawn anything that performs I/O.
pub trait FrameHandler: Send + Sync {
    fn handle(&self, message: ComfyUIMessage);
}

/// Why [`process_messages`] returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// The worker sent a Close frame or the stream was exhausted.
    Closed,
    /// A receive error ended the stream.
    Failed(String),
    /// The supervisor asked the loop to stop.
    Cancelled,
}

/// Process messages from a worker connection.
///
/// Loops until the WebSocket closes, encounters a fatal receive error,
/// the stream is exhausted, or `cancel` fires. Binary frames (preview
/// images) and ping/pong are ignored.
pub async fn process_messages<S>(
    ws_stream: &mut S,
    bus: &EventBus,
    handler: &dyn FrameHandler,
    cancel: &CancellationToken,
) -> StreamEnd
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return StreamEnd::Cancelled,
            next = ws_stream.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => handle_text_message(&text, bus, handler),
            Some(Ok(Message::Binary(_))) => {
                tracing::trace!("Ignoring binary message (preview image)");
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                // Handled automatically by tungstenite.
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(?frame, "Worker WebSocket closed");
                return StreamEnd::Closed;
            }
            Some(Ok(Message::Frame(_))) => {}
            Some(Err(e)) => {
                tracing::error!(error = %e, "WebSocket receive error");
                return StreamEnd::Failed(e.to_string());
            }
            None => return StreamEnd::Closed,
        }
    }
}

/// Decode a single text frame, publish it raw, then dispatch it typed.
pub fn handle_text_message(text: &str, bus: &EventBus, handler: &dyn FrameHandler) {
    let frame = match RawFrame::decode(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(
                error = %e,
                raw_message = %text,
                "Failed to decode worker frame",
            );
            return;
        }
    };

    bus.publish_raw(RawFrameEvent::new(
        frame.frame_type.clone(),
        frame.data.clone(),
    ));

    let frame_type = frame.frame_type.clone();
    match ComfyUIMessage::from_frame(frame) {
        Ok(Some(message)) => {
            log_message(&message);
            handler.handle(message);
        }
        Ok(None) => {
            tracing::trace!(frame_type = %frame_type, "Frame type not modelled, published raw only");
        }
        Err(e) => {
            tracing::warn!(error = %e, "Worker frame has an unexpected payload shape");
        }
    }
}

fn log_message(message: &ComfyUIMessage) {
    match message {
        ComfyUIMessage::Progress(data) => {
            let percent = if data.max > 0 {
                ((data.value as f64 / data.max as f64) * 100.0) as i16
            } else {
                0
            };
            tracing::debug!(value = data.value, max = data.max, percent, "Generation progress");
        }
        ComfyUIMessage::ExecutionStart(data) => {
            tracing::info!(prompt_id = %data.prompt_id, "Execution started");
        }
        ComfyUIMessage::Executing(data) => {
            tracing::debug!(prompt_id = ?data.prompt_id, node = ?data.node, "Executing node");
        }
        ComfyUIMessage::Executed(data) => {
            tracing::debug!(prompt_id = %data.prompt_id, node = ?data.node, "Node executed with output");
        }
        ComfyUIMessage::ExecutionError(data) => {
            tracing::error!(
                prompt_id = %data.prompt_id,
                node_id = ?data.node_id,
                error_type = %data.exception_type,
                error_message = %data.exception_message,
                "Execution error",
            );
        }
        ComfyUIMessage::ExecutionCached(data) => {
            tracing::debug!(prompt_id = %data.prompt_id, "Execution used cache");
        }
        ComfyUIMessage::Status(data) => {
            tracing::debug!(
                queue_remaining = data.status.exec_info.queue_remaining,
                "Worker queue status",
            );
        }
    }
}
