//! Lenient field deserializers for dataset payloads.
//!
//! Records pass through pandas exports, LLM extraction and Qdrant payloads, so
//! nulls stand in for empty lists, numbers arrive as strings and lists arrive
//! as comma-joined text.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// `null` becomes `T::default()`.
pub fn null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts `null`, an array of scalars, or a string. Strings are split on
/// commas that sit outside parentheses; `"[...]"`-style stringified lists are
/// parsed first.
pub fn lenient_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(value_to_list(&Value::deserialize(deserializer)?))
}

/// Accepts a string, a number or a bool and renders it as a string. Empty
/// strings and `"nan"` read as `None`.
pub fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(scalar_to_string(&Value::deserialize(deserializer)?))
}

/// Like `lenient_string`, with a missing value read as the empty string.
pub fn lenient_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(scalar_to_string(&Value::deserialize(deserializer)?).unwrap_or_default())
}

/// A string map whose scalar values are stringified. Nulls, blanks and
/// nested values are dropped; anything other than an object reads as empty.
pub fn lenient_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Object(entries) => entries
            .into_iter()
            .filter_map(|(key, value)| scalar_to_string(&value).map(|v| (key, v)))
            .collect(),
        _ => BTreeMap::new(),
    })
}

/// Accepts an integer, a float (rounded) or a numeric string.
pub fn lenient_u32<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u32),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f.round() as u32),
        _ => None,
    })
}

/// Accepts a number or a numeric string (`"85%"` reads as 85).
pub fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    })
}

pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty() && !s.eq_ignore_ascii_case("nan")).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub fn value_to_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(scalar_to_string).collect(),
        Value::String(s) => parse_list_text(s),
        _ => Vec::new(),
    }
}

/// Parses `"['a', 'b']"`, `'["a"]'` or plain comma-separated text.
pub fn parse_list_text(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        return Vec::new();
    }
    if let Some(inner) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        if let Ok(items) = serde_json::from_str::<Vec<Value>>(trimmed) {
            return items.iter().filter_map(scalar_to_string).collect();
        }
        return split_outside_parens(inner)
            .into_iter()
            .map(|item| item.trim_matches(|c| c == '\'' || c == '"').trim().to_string())
            .filter(|item| !item.is_empty())
            .collect();
    }
    split_outside_parens(trimmed)
}

/// Splits on commas at parenthesis depth zero.
/// `"aspirin (81 mg, daily), metformin"` yields two items.
pub fn split_outside_parens(text: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for ch in text.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => items.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    items.push(current);
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_outside_parens_keeps_dosing_together() {
        assert_eq!(
            split_outside_parens("aspirin (81 mg, daily), metformin, lisinopril"),
            vec!["aspirin (81 mg, daily)", "metformin", "lisinopril"]
        );
    }

    #[test]
    fn test_parse_python_style_list() {
        assert_eq!(
            parse_list_text("['Pneumonia', 'Effusion']"),
            vec!["Pneumonia", "Effusion"]
        );
        assert_eq!(parse_list_text("[\"a\", \"b\"]"), vec!["a", "b"]);
        assert!(parse_list_text("[]").is_empty());
        assert!(parse_list_text("nan").is_empty());
    }

    #[test]
    fn test_value_to_list_variants() {
        assert!(value_to_list(&Value::Null).is_empty());
        assert_eq!(value_to_list(&json!(["x", 2])), vec!["x", "2"]);
        assert_eq!(value_to_list(&json!("x, y")), vec!["x", "y"]);
    }

    #[test]
    fn test_scalar_to_string() {
        assert_eq!(scalar_to_string(&json!(2019)).as_deref(), Some("2019"));
        assert_eq!(scalar_to_string(&json!("  ")), None);
        assert_eq!(scalar_to_string(&json!("NaN")), None);
    }

    #[derive(Debug, Deserialize)]
    struct Labelled {
        #[serde(deserialize_with = "lenient_id")]
        id: String,
        #[serde(deserialize_with = "lenient_map")]
        extra: BTreeMap<String, String>,
    }

    #[test]
    fn test_lenient_id_and_map() {
        let parsed: Labelled = serde_json::from_value(json!({
            "id": 4411,
            "extra": {"bmi": 31.5, "smoker": false, "blood_type": "O+", "occupation": null, "notes": ["x"]}
        }))
        .unwrap();
        assert_eq!(parsed.id, "4411");
        assert_eq!(parsed.extra.len(), 3);
        assert_eq!(parsed.extra["bmi"], "31.5");
        assert_eq!(parsed.extra["smoker"], "false");
        assert_eq!(parsed.extra["blood_type"], "O+");

        let parsed: Labelled = serde_json::from_value(json!({"id": null, "extra": "n/a"})).unwrap();
        assert_eq!(parsed.id, "");
        assert!(parsed.extra.is_empty());
    }
}
