use serde_json::Value;

use crate::error::{GraphRagError, Result};

/// Extract and parse a JSON value out of raw LLM output. Strips fenced
/// code blocks first; on strict-parse failure, retries once with a
/// lenient pass that tolerates trailing commas and single-quoted
/// strings. Never panics; returns `LLMParseFailed` for the caller to log
/// and skip that one chunk.
pub fn parse_json_response(raw: &str) -> Result<Value> {
    let stripped = strip_code_fence(raw);

    if let Ok(value) = serde_json::from_str::<Value>(&stripped) {
        return Ok(value);
    }

    let repaired = lenient_repair(&stripped);
    serde_json::from_str::<Value>(&repaired)
        .map_err(|e| GraphRagError::LLMParseFailed(format!("{e}: {raw}")))
}

/// Strip a leading/trailing ```json ... ``` or ``` ... ``` fence, if
/// present. Falls back to the original text when no fence is found.
fn strip_code_fence(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        let rest = rest.trim_start_matches('\n');
        if let Some(end) = rest.rfind("```") {
            return rest[..end].trim().to_string();
        }
        return rest.trim().to_string();
    }
    trimmed.to_string()
}

/// Tolerate trailing commas before `}`/`]` and single-quoted strings.
/// Not a full JSON5 parser — just the two failure modes LLMs actually
/// produce.
fn lenient_repair(text: &str) -> String {
    let no_trailing_commas = remove_trailing_commas(text);
    single_to_double_quotes(&no_trailing_commas)
}

fn remove_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

/// Swap single-quoted strings for double-quoted ones outside of existing
/// double-quoted strings. Best-effort: does not handle escaped quotes
/// inside single-quoted strings, which real JSON never needs anyway.
fn single_to_double_quotes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_double = false;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if !in_double => {
                in_double = true;
                out.push(c);
            }
            '"' if in_double => {
                in_double = false;
                out.push(c);
            }
            '\'' if !in_double => out.push('"'),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json() {
        let v = parse_json_response(r#"{"a": 1}"#).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn strips_fenced_code_block() {
        let raw = "```json\n{\"a\": 1}\n```";
        let v = parse_json_response(raw).unwrap();
        assert_eq!(v["a"], 1);
    }

    #[test]
    fn repairs_trailing_comma() {
        let raw = r#"{"a": 1, "b": [1, 2,],}"#;
        let v = parse_json_response(raw).unwrap();
        assert_eq!(v["b"][1], 2);
    }

    #[test]
    fn repairs_single_quotes() {
        let raw = "{'a': 'hello'}";
        let v = parse_json_response(raw).unwrap();
        assert_eq!(v["a"], "hello");
    }

    #[test]
    fn returns_parse_failed_on_garbage() {
        let result = parse_json_response("not json at all {{{");
        assert!(matches!(result, Err(GraphRagError::LLMParseFailed(_))));
    }
}
