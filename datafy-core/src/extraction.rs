//! Pulling structured payloads out of free-text model replies

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[\w+-]*[ \t]*\r?\n(.*?)```").expect("valid regex"));

#[derive(Debug, Error)]
#[error("no JSON object found in model reply: {reason}")]
pub struct ExtractionError {
    pub reason: String,
    pub raw: String,
}

/// Contents of the first fenced block, or the whole reply, trimmed.
pub fn strip_code_fence(text: &str) -> &str {
    FENCED_BLOCK
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text)
        .trim()
}

/// Parse the JSON payload of a model reply.
///
/// Takes the fenced block if there is one, tries a direct parse, then falls
/// back to the first balanced `{...}` substring.
pub fn extract_json(text: &str) -> Result<Value, ExtractionError> {
    let candidate = strip_code_fence(text);

    let direct_error = match serde_json::from_str::<Value>(candidate) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    let Some(object) = first_balanced_object(candidate) else {
        return Err(ExtractionError {
            reason: direct_error.to_string(),
            raw: text.to_string(),
        });
    };

    serde_json::from_str(object).map_err(|e| ExtractionError {
        reason: e.to_string(),
        raw: text.to_string(),
    })
}

/// First `{...}` span whose braces balance, ignoring braces inside strings.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fenced_and_plain_replies_agree() {
        let plain = r#"{"intent": "visualization", "visualization_type": "bar"}"#;
        let fenced = format!("```json\n{}\n```", plain);

        assert_eq!(extract_json(plain).unwrap(), extract_json(&fenced).unwrap());
    }

    #[test]
    fn test_balanced_object_inside_prose() {
        let reply = r#"Sure! Here it is: {"a": {"b": "}"}, "c": 1} Hope that helps {x}"#;
        assert_eq!(extract_json(reply).unwrap(), json!({"a": {"b": "}"}, "c": 1}));
    }

    #[test]
    fn test_unparsable_reply_keeps_raw_text() {
        let err = extract_json("I cannot answer that").unwrap_err();
        assert_eq!(err.raw, "I cannot answer that");
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```python\nx = 1\n```"), "x = 1");
        assert_eq!(strip_code_fence("  x = 1  "), "x = 1");
    }
}
