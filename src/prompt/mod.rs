//! Prompt normalization
//!
//! Converts a [`PromptPayload`] of any shape into the single line of text the
//! subprocess receives. Normalization never fails: each strategy below either
//! produces text or passes, and the last resort always produces something.
//!
//! Order of strategies:
//!
//! 1. plain string, returned as is (`coerced == false`)
//! 2. `content` array: text of every part, non-empty parts joined with `\n`, trimmed
//! 3. top-level `text` string field
//! 4. `null`: empty text
//! 5. JSON serialization of the whole payload
//!
//! Everything past step 1 sets `coerced`, so callers can log that the payload
//! was reshaped.

use serde_json::Value;

use crate::types::prompt_input::{NormalizedPrompt, PromptPayload};

/// Preview length used in coercion diagnostics
pub const PREVIEW_CHARS: usize = 120;

/// A single extraction strategy; `None` means "does not apply"
type Strategy = fn(&Value) -> Option<String>;

const STRATEGIES: &[(&str, Strategy)] = &[
    ("content_parts", from_content_parts),
    ("text_field", from_text_field),
    ("null", from_null),
    ("json", from_json),
];

/// Normalize a prompt payload into text
#[must_use]
pub fn normalize(payload: &PromptPayload) -> NormalizedPrompt {
    let value = payload.as_value();

    if let Value::String(text) = value {
        return NormalizedPrompt {
            text: text.clone(),
            coerced: false,
        };
    }

    let text = STRATEGIES
        .iter()
        .find_map(|(name, strategy)| {
            let text = strategy(value)?;
            log::trace!("prompt normalized via {name} strategy");
            Some(text)
        })
        .unwrap_or_else(|| value.to_string());

    NormalizedPrompt {
        text,
        coerced: true,
    }
}

/// Join the text of every content part
///
/// A part contributes its own text when it is a string, its `text` field when
/// that is a string, and nothing otherwise.
pub fn from_content_parts(value: &Value) -> Option<String> {
    let parts = value.get("content")?.as_array()?;
    let joined = parts
        .iter()
        .filter_map(|part| match part {
            Value::String(text) => Some(text.as_str()),
            Value::Object(block) => block.get("text").and_then(Value::as_str),
            _ => None,
        })
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    let trimmed = joined.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Top-level `text` field, when it is a string
pub fn from_text_field(value: &Value) -> Option<String> {
    value.get("text")?.as_str().map(str::to_string)
}

/// Empty text for a null payload
pub fn from_null(value: &Value) -> Option<String> {
    value.is_null().then(String::new)
}

/// JSON serialization, when non-empty
pub fn from_json(value: &Value) -> Option<String> {
    serde_json::to_string(value)
        .ok()
        .filter(|json| !json.is_empty())
}

/// Char-boundary-safe preview of a payload's JSON text
#[must_use]
pub fn preview(payload: &PromptPayload, max_chars: usize) -> String {
    let json = match payload.as_value() {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    match json.char_indices().nth(max_chars) {
        Some((cut, _)) => json[..cut].to_string(),
        None => json,
    }
}
