//! Line protocol spoken with the agent subprocess
//!
//! Outbound: one JSON object per line, `{"type":"prompt","message":...}`.
//!
//! Inbound: arbitrary lines. A JSON object whose `type` is
//! [`TURN_COMPLETE_MARKER`] ends the current turn; every other line is opaque
//! payload. Decoding is best-effort and never fails, see [`decode_line`].

mod codec;

pub use codec::RpcLineCodec;

use serde::Serialize;
use serde_json::Value;

/// Event type that marks the end of a prompt/response turn
pub const TURN_COMPLETE_MARKER: &str = "agent_end";

/// Commands written to the subprocess's stdin
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundCommand {
    /// Start a turn with the given prompt text
    Prompt {
        /// Normalized prompt text
        message: String,
    },
}

/// A line that parsed as JSON
#[derive(Debug, Clone, PartialEq)]
pub struct RpcEvent {
    /// The `type` field, when present and a string
    pub kind: Option<String>,
    /// The decoded line
    pub value: Value,
}

impl RpcEvent {
    /// Whether this event ends the current turn
    #[must_use]
    pub fn is_turn_complete(&self) -> bool {
        self.kind.as_deref() == Some(TURN_COMPLETE_MARKER)
    }
}

/// Result of best-effort line decoding
#[derive(Debug, Clone, PartialEq)]
pub enum LineEvent {
    /// The line is valid JSON
    Decoded(RpcEvent),
    /// The line is not JSON; kept verbatim
    Unparsed(String),
}

impl LineEvent {
    /// Whether this line ends the current turn
    #[must_use]
    pub fn is_turn_complete(&self) -> bool {
        matches!(self, Self::Decoded(event) if event.is_turn_complete())
    }
}

/// Decode one output line without ever failing
#[must_use]
pub fn decode_line(line: &str) -> LineEvent {
    match serde_json::from_str::<Value>(line) {
        Ok(value) => {
            let kind = value
                .get("type")
                .and_then(Value::as_str)
                .map(str::to_string);
            LineEvent::Decoded(RpcEvent { kind, value })
        }
        Err(_) => LineEvent::Unparsed(line.to_string()),
    }
}
