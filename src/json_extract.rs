use serde::de::DeserializeOwned;
use serde_json::Value;

/// Extract a JSON value from chatty model output.
///
/// Three strategies, first success wins:
/// 1. a fenced code block containing a JSON literal,
/// 2. the outermost array/object substring by bracket match,
/// 3. the whole trimmed response parsed verbatim.
///
/// Returns `None` when all three fail; the caller decides the fallback.
pub fn extract_json(response: &str) -> Option<Value> {
    if let Some(v) = from_fenced_block(response) {
        return Some(v);
    }
    if let Some(v) = from_outermost(response) {
        return Some(v);
    }
    serde_json::from_str(response.trim()).ok()
}

/// Typed variant of [`extract_json`].
pub fn extract_json_as<T: DeserializeOwned>(response: &str) -> Option<T> {
    let value = extract_json(response)?;
    serde_json::from_value(value).ok()
}

fn from_fenced_block(response: &str) -> Option<Value> {
    let mut rest = response;
    while let Some(start) = rest.find("```") {
        let after = &rest[start + 3..];
        // Skip an optional language tag on the fence line.
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        let end = body.find("```")?;
        let candidate = body[..end].trim();
        if let Ok(v) = serde_json::from_str(candidate) {
            return Some(v);
        }
        rest = &body[end + 3..];
    }
    None
}

fn from_outermost(response: &str) -> Option<Value> {
    for (open, close) in [('[', ']'), ('{', '}')] {
        let start = response.find(open);
        let end = response.rfind(close);
        if let (Some(s), Some(e)) = (start, end) {
            if s < e {
                if let Ok(v) = serde_json::from_str(&response[s..=e]) {
                    return Some(v);
                }
            }
        }
    }
    None
}

/// First `max` characters of a model response, for error surfacing.
pub fn truncate_response(response: &str, max: usize) -> String {
    response.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fenced_block_with_prose() {
        let response = "Here you go:\n```json\n[{\"panelid\": \"panel1\"}]\n```\nDone!";
        let v = extract_json(response).unwrap();
        assert_eq!(v, json!([{"panelid": "panel1"}]));
    }

    #[test]
    fn test_fenced_block_without_language_tag() {
        let response = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json(response).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn test_outermost_array_in_prose() {
        let response = "Sure! The panels are [1, 2, 3] as requested.";
        assert_eq!(extract_json(response).unwrap(), json!([1, 2, 3]));
    }

    #[test]
    fn test_outermost_object_in_prose() {
        let response = "Result: {\"ok\": true} -- let me know";
        assert_eq!(extract_json(response).unwrap(), json!({"ok": true}));
    }

    #[test]
    fn test_whole_response_verbatim() {
        assert_eq!(extract_json("  42  ").unwrap(), json!(42));
        assert_eq!(extract_json("\"text\"").unwrap(), json!("text"));
    }

    #[test]
    fn test_empty_and_garbage_return_none() {
        assert!(extract_json("").is_none());
        assert!(extract_json("no json here at all").is_none());
        assert!(extract_json("{ broken: ").is_none());
    }

    #[test]
    fn test_typed_extraction() {
        #[derive(serde::Deserialize)]
        struct P {
            panelid: String,
        }
        let response = "```json\n[{\"panelid\": \"panel1\"}, {\"panelid\": \"panel2\"}]\n```";
        let panels: Vec<P> = extract_json_as(response).unwrap();
        assert_eq!(panels.len(), 2);
        assert_eq!(panels[1].panelid, "panel2");
    }

    #[test]
    fn test_skips_non_json_fence_and_finds_later_array() {
        let response = "```\nnot json\n```\nbut here: [\"x\"]";
        assert_eq!(extract_json(response).unwrap(), json!(["x"]));
    }

    #[test]
    fn test_truncate_response() {
        assert_eq!(truncate_response("abcdef", 3), "abc");
        assert_eq!(truncate_response("ab", 500), "ab");
    }
}
