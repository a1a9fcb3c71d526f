//! Recover a single top-level JSON object from chatty LLM text.
//!
//! Agents wrap JSON in explanations, markdown fences, and trailing prose.
//! One brace-walking scanner with explicit in-string tracking handles all of
//! it; there is deliberately no per-vendor formatting logic here.

use anyhow::Result;
use serde_json::Value;

use crate::core::error::EngineError;

/// Extract the first complete top-level JSON object from `text`.
///
/// Tolerates a leading/trailing triple-backtick fence (with or without a
/// language tag), prose before and after the object, and string literals
/// containing braces. Any failure is [`EngineError::MalformedAgentOutput`].
pub fn extract_object(text: &str) -> Result<Value> {
    let body = strip_fence(text);
    let candidate = first_balanced_object(body)
        .ok_or_else(|| EngineError::malformed("no JSON object found", text))?;
    let value: Value = serde_json::from_str(candidate)
        .map_err(|err| EngineError::malformed(format!("invalid JSON: {err}"), text))?;
    Ok(value)
}

/// Drop a leading code fence (and its closing fence) when the first
/// non-whitespace token is one. Inner fences are left alone; the brace
/// walker does not care about them.
fn strip_fence(text: &str) -> &str {
    let trimmed = text.trim_start();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return text;
    };
    // Skip the language tag line, e.g. ```json
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => return text,
    };
    match body.rfind("```") {
        Some(end) => &body[..end],
        None => body,
    }
}

/// Walk `text` tracking brace depth, skipping characters inside
/// double-quoted strings (escapes respected). Returns the substring spanning
/// the first object whose depth returns to zero.
fn first_balanced_object(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(idx);
                }
                depth += 1;
            }
            '}' => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        return Some(&text[start?..=idx]);
                    }
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
    fn extracts_bare_object() {
        let value = extract_object(r#"{"a": 1}"#).expect("extract");
        assert_eq!(value, json!({"a": 1}));
    }

    #[test]
    fn extracts_from_fenced_block_with_language_tag() {
        let text = "```json\n{\"vote\": \"approve\"}\n```";
        let value = extract_object(text).expect("extract");
        assert_eq!(value, json!({"vote": "approve"}));
    }

    #[test]
    fn extracts_from_fenced_block_without_tag() {
        let text = "```\n{\"a\": true}\n```";
        assert_eq!(extract_object(text).expect("extract"), json!({"a": true}));
    }

    #[test]
    fn extracts_with_prose_around_object() {
        let text = "Here is your plan:\n{\"steps\": [\"one\"]}\nHope that helps!";
        let value = extract_object(text).expect("extract");
        assert_eq!(value, json!({"steps": ["one"]}));
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scanner() {
        let text = r#"{"content": "fn main() { println!(\"{}\", 1); }"}"#;
        let value = extract_object(text).expect("extract");
        assert_eq!(
            value["content"],
            json!("fn main() { println!(\"{}\", 1); }")
        );
    }

    #[test]
    fn nested_objects_return_the_outermost() {
        let text = r#"noise {"outer": {"inner": 2}} trailing {"second": 3}"#;
        let value = extract_object(text).expect("extract");
        assert_eq!(value, json!({"outer": {"inner": 2}}));
    }

    #[test]
    fn all_wrapper_combinations_round_trip() {
        let object = json!({"verdict": "approved", "issues": []});
        let inner = serde_json::to_string_pretty(&object).expect("serialize");
        let wrapped = [
            inner.clone(),
            format!("Preamble text.\n{inner}"),
            format!("{inner}\nPostscript."),
            format!("Preamble.\n{inner}\nPostscript."),
            format!("```json\n{inner}\n```"),
            format!("```\n{inner}\n```"),
            format!("Lead-in prose:\n```json\n{inner}\n```\nWrap-up."),
        ];
        for text in wrapped {
            let value = extract_object(&text).expect("extract");
            assert_eq!(value, object, "failed for wrapper: {text:?}");
        }
    }

    #[test]
    fn missing_object_is_malformed_output() {
        let err = extract_object("no json here, sorry").unwrap_err();
        let engine = err.downcast_ref::<EngineError>().expect("engine error");
        assert_eq!(engine.kind(), "malformed_agent_output");
    }

    #[test]
    fn unbalanced_object_is_malformed_output() {
        let err = extract_object(r#"{"truncated": "mid"#).unwrap_err();
        let engine = err.downcast_ref::<EngineError>().expect("engine error");
        assert_eq!(engine.kind(), "malformed_agent_output");
    }

    #[test]
    fn invalid_json_inside_braces_is_malformed_output() {
        let err = extract_object("{not: valid}").unwrap_err();
        let engine = err.downcast_ref::<EngineError>().expect("engine error");
        assert_eq!(engine.kind(), "malformed_agent_output");
    }
}
