//! ComfyUI WebSocket message types and parser.
//!
//! ComfyUI sends JSON messages over WebSocket with the shape
//! `{"type": "<kind>", "data": {...}}`. Parsing happens in two steps:
//!
//! 1. [`RawFrame::decode`] turns the text into a `{type, data}` envelope.
//!    This is the only place the text is parsed; anything that fails here
//!    is a malformed frame.
//! 2. [`ComfyUIMessage::from_frame`] classifies the envelope into a typed
//!    variant. Frame types we do not model yield `None` and stay raw.

use serde::Deserialize;

/// Wire `type` of the per-node output frame that carries artifacts.
pub const FRAME_TYPE_EXECUTED: &str = "executed";

/// Errors produced while decoding worker frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameDecodeError {
    /// The text is not JSON, or lacks a string `type` field.
    #[error("Malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The envelope is valid but `data` does not match the known shape.
    #[error("Unexpected payload for '{frame_type}' frame: {source}")]
    Payload {
        frame_type: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A decoded `{type, data}` envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct RawFrame {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl RawFrame {
    /// Decode a WebSocket text frame.
    pub fn decode(text: &str) -> Result<Self, FrameDecodeError> {
        serde_json::from_str(text).map_err(FrameDecodeError::Malformed)
    }
}

/// All ComfyUI WebSocket message types the orchestrator understands.
#[derive(Debug, Clone)]
pub enum ComfyUIMessage {
    /// Server status broadcast (queue depth, etc.).
    Status(StatusData),

    /// A prompt has started executing.
    ExecutionStart(ExecutionStartData),

    /// Some nodes were skipped because their outputs are cached.
    ExecutionCached(ExecutionCachedData),

    /// A specific node is currently executing (or execution finished when `node` is `None`).
    Executing(ExecutingData),

    /// Progress update from a long-running node (e.g. KSampler).
    Progress(ProgressData),

    /// A node has finished and produced output.
    Executed(ExecutedData),

    /// Execution failed with an error.
    ExecutionError(ErrorData),
}

impl ComfyUIMessage {
    /// Classify a decoded envelope.
    ///
    /// Returns `Ok(None)` for frame types that are not modelled here.
    pub fn from_frame(frame: RawFrame) -> Result<Option<Self>, FrameDecodeError> {
        let RawFrame { frame_type, data } = frame;

        fn payload<T: serde::de::DeserializeOwned>(
            frame_type: &str,
            data: serde_json::Value,
        ) -> Result<T, FrameDecodeError> {
            serde_json::from_value(data).map_err(|source| FrameDecodeError::Payload {
                frame_type: frame_type.to_string(),
                source,
            })
        }

        let message = match frame_type.as_str() {
            "status" => Self::Status(payload(&frame_type, data)?),
            "execution_start" => Self::ExecutionStart(payload(&frame_type, data)?),
            "execution_cached" => Self::ExecutionCached(payload(&frame_type, data)?),
            "executing" => Self::Executing(payload(&frame_type, data)?),
            "progress" => Self::Progress(payload(&frame_type, data)?),
            FRAME_TYPE_EXECUTED => Self::Executed(payload(&frame_type, data)?),
            "execution_error" => Self::ExecutionError(payload(&frame_type, data)?),
            _ => return Ok(None),
        };
        Ok(Some(message))
    }

    /// The job this message refers to, if it names one.
    pub fn prompt_id(&self) -> Option<&str> {
        match self {
            Self::Status(_) => None,
            Self::ExecutionStart(d) => Some(&d.prompt_id),
            Self::ExecutionCached(d) => Some(&d.prompt_id),
            Self::Executing(d) => d.prompt_id.as_deref(),
            Self::Progress(d) => d.prompt_id.as_deref(),
            Self::Executed(d) => Some(&d.prompt_id),
            Self::ExecutionError(d) => Some(&d.prompt_id),
        }
    }
}

/// Queue status information.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: QueueStatus,
}

/// Current queue state.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

/// Execution queue statistics.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecInfo {
    pub queue_remaining: i32,
}

/// Payload for `execution_start` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionStartData {
    pub prompt_id: String,
}

/// Payload for `execution_cached` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionCachedData {
    pub prompt_id: String,
    /// Node IDs whose outputs were served from cache.
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// Payload for `executing` messages.
///
/// When `node` is `None`, execution of the prompt has completed.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Payload for `progress` messages (step-level progress within a node).
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    /// Current step number.
    pub value: i32,
    /// Total number of steps.
    pub max: i32,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Payload for `executed` messages (node output).
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedData {
    /// The node that produced this output.
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub output: ExecutedOutput,
    #[serde(alias = "jobId")]
    pub prompt_id: String,
}

impl ExecutedData {
    /// Final-kind artifacts in reported order (`images` first, then `gifs`).
    pub fn final_artifacts(&self) -> Vec<Artifact> {
        self.output
            .images
            .iter()
            .chain(self.output.gifs.iter())
            .filter(|a| a.kind.is_final())
            .cloned()
            .collect()
    }
}

/// Files a node reported. Other output keys (text, latents, ...) are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutedOutput {
    #[serde(default)]
    pub images: Vec<Artifact>,
    /// Animated outputs (GIF / MP4) from video-combine nodes.
    #[serde(default)]
    pub gifs: Vec<Artifact>,
}

/// One file produced by the worker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Artifact {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", alias = "kind", default)]
    pub kind: ArtifactKind,
}

/// Where the worker keeps a file; only `output` files are final.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Output,
    Temp,
    Input,
    #[default]
    #[serde(other)]
    Other,
}

impl ArtifactKind {
    pub fn is_final(self) -> bool {
        self == Self::Output
    }

    /// Value of the `type` query parameter on the retrieval endpoint.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Output => "output",
            Self::Temp => "temp",
            Self::Input => "input",
            Self::Other => "other",
        }
    }
}

/// Payload for `execution_error` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
    pub exception_message: String,
    #[serde(default)]
    pub exception_type: String,
}

/// Decode and classify a ComfyUI WebSocket text message in one call.
///
/// Returns `Ok(None)` for well-formed frames of a type we do not model.
pub fn parse_message(text: &str) -> Result<Option<ComfyUIMessage>, FrameDecodeError> {
    ComfyUIMessage::from_frame(RawFrame::decode(text)?)
}
