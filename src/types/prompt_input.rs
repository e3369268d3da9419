//! Prompt payload types
//!
//! A prompt payload is whatever the caller hands over: a plain string, a
//! message-like object with content parts, an object with a `text` field, or
//! any other JSON value. The normalizer in [`crate::prompt`] turns it into text.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Untyped prompt payload, consumed once per call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptPayload(Value);

impl PromptPayload {
    /// Wrap an arbitrary JSON value
    #[must_use]
    pub const fn new(value: Value) -> Self {
        Self(value)
    }

    /// Borrow the underlying JSON value
    #[must_use]
    pub const fn as_value(&self) -> &Value {
        &self.0
    }

    /// Take the underlying JSON value
    #[must_use]
    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<String> for PromptPayload {
    fn from(s: String) -> Self {
        Self(Value::String(s))
    }
}

impl From<&str> for PromptPayload {
    fn from(s: &str) -> Self {
        Self(Value::String(s.to_string()))
    }
}

impl From<Value> for PromptPayload {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl From<PromptMessage> for PromptPayload {
    fn from(message: PromptMessage) -> Self {
        // String keys and derived content parts; conversion cannot fail.
        Self(serde_json::json!({
            "role": message.role,
            "content": message.content,
        }))
    }
}

/// Message-like prompt holding an ordered sequence of content parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    /// Message role (usually "user")
    pub role: String,
    /// Ordered content parts
    pub content: Vec<ContentPart>,
}

impl PromptMessage {
    /// Create a user message from content parts
    pub fn user(content: impl IntoIterator<Item = ContentPart>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into_iter().collect(),
        }
    }
}

/// A single content part; either a bare string or a typed block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentPart {
    /// Bare string part
    String(String),
    /// Typed block, e.g. `{"type":"text","text":"..."}`
    Block {
        /// Block type
        #[serde(rename = "type")]
        kind: String,
        /// Text carried by the block, if any
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
}

impl ContentPart {
    /// Create a `{"type":"text"}` block
    pub fn text(text: impl Into<String>) -> Self {
        Self::Block {
            kind: "text".to_string(),
            text: Some(text.into()),
        }
    }
}

/// Prompt text after normalization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedPrompt {
    /// Text sent to the subprocess
    pub text: String,
    /// False only when the payload was already a plain string
    pub coerced: bool,
}
