//! Result normalization.
//!
//! Downstream consumers get one JSON shape regardless of how the tool
//! answered: the structured value as-is, or `{"content": [text, ...]}`
//! built from the content blocks in their original order.

use serde::Serialize;
use serde_json::{json, Value};

use crate::tools::protocol::ToolResult;

/// A tool result reduced to a single JSON-compatible value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum NormalizedValue {
    /// The tool's structured value, unchanged.
    Structured(Value),
    /// Text of every content block, in order.
    Fallback {
        /// One entry per block; non-text blocks contribute `""`.
        content: Vec<String>,
    },
}

impl NormalizedValue {
    /// Whether the tool produced a structured value.
    #[must_use]
    pub fn is_structured(&self) -> bool {
        matches!(self, Self::Structured(_))
    }

    /// Convert into a plain JSON value.
    #[must_use]
    pub fn into_json(self) -> Value {
        match self {
            Self::Structured(value) => value,
            Self::Fallback { content } => json!({ "content": content }),
        }
    }
}

/// Prefer the structured value; otherwise fall back to block text.
///
/// Content blocks accompanying a structured value are ignored.
#[must_use]
pub fn normalize(result: ToolResult) -> NormalizedValue {
    match result.structured {
        Some(value) => NormalizedValue::Structured(value),
        None => NormalizedValue::Fallback {
            content: result
                .content
                .into_iter()
                .map(|block| block.text.unwrap_or_default())
                .collect(),
        },
    }
}
