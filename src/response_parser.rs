//! Reply decoding for bundled calls.
//!
//! Bundled classification and task-extraction calls require the reply to
//! decode as a JSON object. Models occasionally wrap the object in code
//! fences or surrounding prose, so parsing falls back through three
//! tiers before failing:
//!
//! 1. Direct JSON parse
//! 2. Strip fence/marker artifacts and retry
//! 3. Extract a balanced JSON object from mixed content

use crate::error::{BatchError, BatchResult};
use crate::logging::{log_debug, log_warn};
use serde_json::Value;

/// Reply parser with fallback strategies.
pub(crate) struct ResponseParser;

impl ResponseParser {
    /// Decode reply content into a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::ParseError`] when no tier yields a non-empty
    /// JSON object.
    pub fn parse_json_object(raw: &str) -> BatchResult<Value> {
        // 1. Direct JSON parse
        if let Ok(value) = serde_json::from_str::<Value>(raw) {
            return Self::validate_and_return(value);
        }

        // 2. Clean known artifacts and retry
        let cleaned = Self::clean_artifacts(raw);
        if cleaned != raw {
            log_debug!(
                original_length = raw.len(),
                cleaned_length = cleaned.len(),
                "Cleaned artifacts from reply content"
            );
            if let Ok(value) = serde_json::from_str::<Value>(&cleaned) {
                return Self::validate_and_return(value);
            }
        }

        // 3. Extract JSON object from mixed content
        if let Some(json_str) = Self::extract_json_object(&cleaned) {
            if let Ok(value) = serde_json::from_str::<Value>(&json_str) {
                return Self::validate_and_return(value);
            }
        }

        let preview = raw.chars().take(200).collect::<String>();
        log_warn!(
            content_preview = %preview,
            "Failed to decode JSON object from reply content"
        );
        Err(BatchError::parse_error(format!(
            "Could not decode JSON object from: {}{}",
            preview,
            if raw.len() > 200 { "..." } else { "" }
        )))
    }

    fn validate_and_return(value: Value) -> BatchResult<Value> {
        match value.as_object() {
            Some(obj) if !obj.is_empty() => Ok(value),
            Some(_) => Err(BatchError::parse_error("Reply decoded to an empty object")),
            None => Err(BatchError::parse_error("Reply must be a JSON object")),
        }
    }

    /// Strip common model artifacts: code fences and channel markers.
    fn clean_artifacts(content: &str) -> String {
        content
            .replace("```json", "")
            .replace("```JSON", "")
            .replace("```", "")
            .replace("<|channel|>", "")
            .replace("<|end|>", "")
            .replace("<|start|>", "")
            .trim()
            .chars()
            .filter(|c| !c.is_control() || c.is_whitespace())
            .collect()
    }

    /// Extract a JSON object from mixed content (text + JSON).
    fn extract_json_object(content: &str) -> Option<String> {
        let start_idx = content.find('{')?;
        Self::extract_balanced_json(&content[start_idx..])
    }

    /// Extract balanced JSON from text, handling nested braces and string
    /// escapes.
    fn extract_balanced_json(text: &str) -> Option<String> {
        let chars: Vec<char> = text.chars().collect();
        let json_end = Self::find_balanced_json_end(&chars)?;
        Some(chars[0..=json_end].iter().collect())
    }

    fn find_balanced_json_end(chars: &[char]) -> Option<usize> {
        let mut brace_count = 0;
        let mut in_string = false;
        let mut escaped = false;

        for (char_idx, ch) in chars.iter().enumerate() {
            match ch {
                '"' if !escaped => in_string = !in_string,
                '\\' if in_string => escaped = !escaped,
                '{' if !in_string => brace_count += 1,
                '}' if !in_string => {
                    brace_count -= 1;
                    if brace_count == 0 {
                        return Some(char_idx);
                    }
                }
                _ => escaped = false,
            }

            if *ch != '\\' {
                escaped = false;
            }
        }

        None // Unbalanced braces
    }
}
