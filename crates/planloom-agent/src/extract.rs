//! JSON extraction from responses that wrap the payload in prose.

use serde_json::Value;

/// Pull the JSON object out of a raw LM response.
///
/// Tries, in order: the whole trimmed text, the contents of the first fenced
/// code block, and the outermost `{...}` span — each both verbatim and after
/// cleanup (control chars stripped, trailing commas removed). Returns `None`
/// when nothing parses; contract normalization happens downstream.
pub fn extract_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();

    for candidate in candidates(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(&candidate) {
            return Some(v);
        }
        let cleaned = strip_trailing_commas(&strip_control_chars(&candidate));
        if let Ok(v) = serde_json::from_str::<Value>(&cleaned) {
            return Some(v);
        }
    }
    None
}

fn candidates(text: &str) -> Vec<String> {
    let mut out = vec![text.to_string()];
    if let Some(fenced) = fenced_block(text) {
        out.push(fenced);
    }
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            out.push(text[start..=end].to_string());
        }
    }
    out
}

/// The contents of the first ``` fence, with an optional language tag.
fn fenced_block(text: &str) -> Option<String> {
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim().to_string())
}

/// Drop control characters that break the parser, keeping \n and \t.
fn strip_control_chars(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

/// Remove commas that directly precede a closing brace or bracket, outside
/// of string literals.
fn strip_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let chars: Vec<char> = text.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next_meaningful = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if matches!(next_meaningful, Some('}') | Some(']')) {
                    // swallow the trailing comma
                } else {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_json() {
        let v = extract_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(v, json!({"a": 1}));
    }

    #[test]
    fn test_fenced_json() {
        let raw = "Here is the plan you asked for:\n```json\n{\"a\": 1}\n```\nLet me know!";
        let v = extract_json(raw).unwrap();
        assert_eq!(v, json!({"a": 1}));
    }

    #[test]
    fn test_json_embedded_in_prose() {
        let raw = "Sure! The result is {\"result_type\": \"NOOP\"} as requested.";
        let v = extract_json(raw).unwrap();
        assert_eq!(v["result_type"], "NOOP");
    }

    #[test]
    fn test_trailing_commas_removed() {
        let raw = r#"{"nodes": [{"task_id": "t1",}, ], "edges": [],}"#;
        let v = extract_json(raw).unwrap();
        assert_eq!(v["nodes"][0]["task_id"], "t1");
    }

    #[test]
    fn test_trailing_comma_inside_string_preserved() {
        let raw = r#"{"title": "a, }", "n": 1,}"#;
        let v = extract_json(raw).unwrap();
        assert_eq!(v["title"], "a, }");
        assert_eq!(v["n"], 1);
    }

    #[test]
    fn test_control_chars_stripped() {
        let raw = "{\"a\": \"b\"}\u{0000}";
        let v = extract_json(raw).unwrap();
        assert_eq!(v["a"], "b");
    }

    #[test]
    fn test_no_json_is_none() {
        assert!(extract_json("I cannot help with that.").is_none());
        assert!(extract_json("").is_none());
    }
}
