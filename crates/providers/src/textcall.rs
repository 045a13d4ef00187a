//! Tool-call recovery from unstructured model text.
//!
//! Weaker backends frequently emit tool invocations inline instead of
//! through the structured tool-call field, wrapped in tags like
//! `<functioncall>{...}</functioncall>`. This module finds those tags
//! and extracts the first balanced JSON object after each one using a
//! brace counter that is aware of strings and escapes, so braces inside
//! argument values do not terminate the scan early.

use px_domain::chat::ToolCall;
use serde_json::Value;

/// Tag markers that introduce an embedded tool call. Closing tags are
/// irrelevant; extraction stops at the balanced object.
const CALL_TAGS: &[&str] = &["<functioncall>", "<tool_call>", "[TOOL_CALL]"];

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Recovery
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Extract every embedded tool call from `content`, in document order.
///
/// Synthesized calls receive ids `textcall_0`, `textcall_1`, … in the
/// order their tags appear. A tag whose payload is missing, unbalanced,
/// or malformed is skipped; later tags are still attempted.
pub fn recover_tool_calls(content: &str) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    let mut cursor = 0;

    while let Some((tag_pos, tag)) = next_tag(content, cursor) {
        let after_tag = tag_pos + tag.len();
        cursor = after_tag;

        if let Some(object) = first_balanced_object(&content[after_tag..]) {
            // Advance past the consumed object so nested tags inside a
            // payload are not re-scanned.
            cursor = after_tag + object.len();
            if let Some(call) = parse_payload(object, calls.len()) {
                calls.push(call);
            }
        }
    }

    calls
}

/// True when `content` carries at least one call tag. Cheap pre-check
/// before running extraction.
pub fn contains_call_tag(content: &str) -> bool {
    CALL_TAGS.iter().any(|tag| content.contains(tag))
}

/// Find the earliest tag occurrence at or after `from`.
fn next_tag(content: &str, from: usize) -> Option<(usize, &'static str)> {
    CALL_TAGS
        .iter()
        .filter_map(|tag| content[from..].find(tag).map(|i| (from + i, *tag)))
        .min_by_key(|(pos, _)| *pos)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Brace counting
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Return the first balanced `{...}` object in `text`, honoring JSON
/// string and escape rules. `None` when no object opens or the braces
/// never balance.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }

    None
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payload parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Parse one extracted object as `{"name": string, "arguments": object
/// | string}` and synthesize a [`ToolCall`].
fn parse_payload(object: &str, index: usize) -> Option<ToolCall> {
    let value: Value = match serde_json::from_str(object) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "embedded tool call payload is not valid JSON");
            return None;
        }
    };

    let name = value.get("name")?.as_str()?.to_string();
    let arguments = match value.get("arguments") {
        Some(Value::Object(map)) => map.clone(),
        // String-typed arguments get a second parse; anything that
        // still isn't an object survives under "raw".
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => map,
            _ => raw_map(Value::String(s.clone())),
        },
        Some(other) => raw_map(other.clone()),
        None => serde_json::Map::new(),
    };

    Some(ToolCall {
        id: format!("textcall_{index}"),
        name,
        arguments,
        provider_ext: None,
    })
}

fn raw_map(value: Value) -> serde_json::Map<String, Value> {
    let mut map = serde_json::Map::new();
    map.insert("raw".into(), value);
    map
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
