//! Pulling a JSON verdict out of model output.
//!
//! Small local models wrap JSON in code fences, prepend chatter, or append a
//! closing remark. We try the text as-is, then without fences, then the
//! outermost `{...}` span.

use kindred_core::JudgeError;
use serde::de::DeserializeOwned;

pub fn parse_verdict<T: DeserializeOwned>(text: &str) -> Result<T, JudgeError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(JudgeError::Malformed("empty response".into()));
    }

    if let Ok(v) = serde_json::from_str::<T>(trimmed) {
        return Ok(v);
    }

    let unfenced = strip_fences(trimmed);
    if let Ok(v) = serde_json::from_str::<T>(unfenced) {
        return Ok(v);
    }

    if let (Some(start), Some(end)) = (unfenced.find('{'), unfenced.rfind('}')) {
        if start < end {
            match serde_json::from_str::<T>(&unfenced[start..=end]) {
                Ok(v) => return Ok(v),
                Err(e) => return Err(JudgeError::Malformed(e.to_string())),
            }
        }
    }

    Err(JudgeError::Malformed(format!(
        "no JSON object in: {}",
        trimmed.chars().take(120).collect::<String>()
    )))
}

fn strip_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the language tag line.
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest,
    };
    rest.trim_end().trim_end_matches("```").trim()
}

/// Free-text replies: trim whitespace and surrounding quotes. Empty means failure.
pub fn clean_prose(text: &str) -> Result<String, JudgeError> {
    let cleaned = text.trim().trim_matches('"').trim();
    if cleaned.is_empty() {
        return Err(JudgeError::Malformed("empty text".into()));
    }
    Ok(cleaned.to_string())
}
