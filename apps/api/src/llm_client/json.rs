//! Lenient JSON recovery from free-form model output.
//!
//! Models wrap JSON in prose, fences, or trailing commentary. The extractors
//! try a fenced block first, then every opening bracket from last to first:
//! the whole tail, and failing that the balanced span starting there.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static FENCED_OBJECT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("valid regex"));
static FENCED_ARRAY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\[.*?\])\s*```").expect("valid regex"));

/// Finds the last parseable JSON object in `text`.
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    extract(text, &FENCED_OBJECT, '{', '}').and_then(|v| match v {
        Value::Object(map) => Some(map),
        _ => None,
    })
}

/// Finds the last parseable JSON array in `text`.
pub fn extract_json_array(text: &str) -> Option<Vec<Value>> {
    extract(text, &FENCED_ARRAY, '[', ']').and_then(|v| match v {
        Value::Array(items) => Some(items),
        _ => None,
    })
}

fn extract(text: &str, fenced: &Regex, open: char, close: char) -> Option<Value> {
    if let Some(caps) = fenced.captures(text) {
        if let Ok(value) = serde_json::from_str(&caps[1]) {
            return Some(value);
        }
    }

    let starts: Vec<usize> = text.match_indices(open).map(|(i, _)| i).collect();
    for &start in starts.iter().rev() {
        let tail = &text[start..];
        if let Ok(value) = serde_json::from_str(tail) {
            return Some(value);
        }
        if let Some(end) = balanced_end(tail, open, close) {
            if let Ok(value) = serde_json::from_str(&tail[..end]) {
                return Some(value);
            }
        }
    }
    None
}

/// Byte offset one past the bracket that closes the one at the start of `text`.
fn balanced_end(text: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 0i32;
    for (i, ch) in text.char_indices() {
        if ch == open {
            depth += 1;
        } else if ch == close {
            depth -= 1;
            if depth == 0 {
                return Some(i + ch.len_utf8());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_from_fenced_block() {
        let text = "Here you go:\n```json\n{\"condition\": \"pneumonia\"}\n```\nThanks";
        let obj = extract_json_object(text).unwrap();
        assert_eq!(obj["condition"], "pneumonia");
    }

    #[test]
    fn test_object_with_trailing_prose() {
        let text = "Analysis {\"a\": {\"b\": 1}} and some notes afterwards.";
        let obj = extract_json_object(text).unwrap();
        assert_eq!(obj["b"], 1);
    }

    #[test]
    fn test_object_prefers_last_parseable_start() {
        // Scanning from the last brace finds the inner object first.
        let text = "{\"outer\": {\"inner\": true}}";
        let obj = extract_json_object(text).unwrap();
        assert_eq!(obj["inner"], true);
    }

    #[test]
    fn test_array_with_leading_prose() {
        let text = "Alternatives:\n[{\"condition\": \"sarcoidosis\"}, {\"condition\": \"lymphoma\"}] done";
        let items = extract_json_array(text).unwrap();
        assert!(!items.is_empty());
    }

    #[test]
    fn test_array_fenced() {
        let text = "```\n[1, 2, 3]\n```";
        assert_eq!(extract_json_array(text).unwrap().len(), 3);
    }

    #[test]
    fn test_no_json_returns_none() {
        assert!(extract_json_object("no structured output here").is_none());
        assert!(extract_json_array("nothing [ unbalanced").is_none());
    }
}
