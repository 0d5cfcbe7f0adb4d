//! ComfyUI WebSocket message types and parser.
//!
//! ComfyUI sends JSON messages over WebSocket with the shape
//! `{"type": "<kind>", "data": {...}}`. Job monitoring only acts on
//! `executing`, `status` and `execution_error`; any other `type` parses to
//! [`ComfyUIMessage::Other`] so callers can ignore it without treating it
//! as a protocol fault.

use serde::Deserialize;

/// Messages the job monitor understands.
#[derive(Debug, Clone, PartialEq)]
pub enum ComfyUIMessage {
    /// Server status broadcast (queue depth).
    Status(StatusData),

    /// A node is executing (or the prompt finished when `node` is `None`).
    Executing(ExecutingData),

    /// Execution failed with an error.
    ExecutionError(ErrorData),

    /// Any other message type, e.g. `progress` or `executed`.
    Other(String),
}

/// Queue status information.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusData {
    pub status: QueueStatus,
}

/// Current queue state.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

/// Execution queue statistics.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecInfo {
    pub queue_remaining: i64,
}

/// Payload for `executing` messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    /// Present on current ComfyUI builds; older ones only send `node`.
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Payload for `execution_error` messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub exception_message: String,
    #[serde(default)]
    pub exception_type: String,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// A frame that could not be interpreted.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("Malformed message: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Malformed '{kind}' payload: {source}")]
    Payload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Parse a ComfyUI WebSocket text message.
///
/// Returns `Err` for invalid JSON, a missing `type`, or a recognized
/// `type` whose `data` has the wrong shape.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, MessageError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(MessageError::Malformed)?;

    match envelope.kind.as_str() {
        "status" => payload("status", envelope.data).map(ComfyUIMessage::Status),
        "executing" => payload("executing", envelope.data).map(ComfyUIMessage::Executing),
        "execution_error" => {
            payload("execution_error", envelope.data).map(ComfyUIMessage::ExecutionError)
        }
        _ => Ok(ComfyUIMessage::Other(envelope.kind)),
    }
}

fn payload<T: serde::de::DeserializeOwned>(
    kind: &'static str,
    data: serde_json::Value,
) -> Result<T, MessageError> {
    serde_json::from_value(data).map_err(|source| MessageError::Payload { kind, source })
}
