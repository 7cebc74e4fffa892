//! Recovering structured diagnoses from model output.
//!
//! JSON is tried first (see `llm_client::json`); when the model answers in
//! prose the headings and numbered lists are mined instead.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use super::state::{Alternative, ConditionCall, Differential, InitialDiagnosis};
use crate::llm_client::json::{extract_json_array, extract_json_object};

const MAX_PROSE_ITEMS: usize = 5;
const PROSE_CONFIDENCE: f64 = 85.0;
const PROSE_DIFFERENTIAL_CONFIDENCE: f64 = 50.0;
const EXTRACTED_NOTE: &str = "Extracted from text output";

static PRIMARY_PATTERNS: Lazy<[Regex; 2]> = Lazy::new(|| {
    [
        Regex::new(r"(?i)(?:PRIMARY DIAGNOSIS|Condition|Main Diagnosis)[:\s]*[-*]?\s*([^\n]+)")
            .expect("valid regex"),
        Regex::new(r"(?i)The (?:primary|main) diagnosis is[:\s]*([^\n.]+)").expect("valid regex"),
    ]
});
static CONFIDENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)Confidence[:\s]*(\d+)").expect("valid regex"));
static DIFFERENTIAL_SECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)DIFFERENTIAL DIAGNOS[EI]S?[:\s]*(.+?)(?:CRITICAL|CLINICAL REASONING|$)")
        .expect("valid regex")
});
static LIST_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\d+\.\s*\*\*|\d+\.\s*|[-*]\s*\*\*)([^*\n]+)").expect("valid regex")
});
static CRITICAL_SECTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)CRITICAL FINDINGS?[:\s]*(.+?)(?:CLINICAL REASONING|$)").expect("valid regex")
});
static BULLET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-*]\s*\*\*([^*]+)\*\*|[-*]\s*([^\n]+)").expect("valid regex"));
static ALTERNATIVE_PATTERNS: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        Regex::new(r"\d+\.\s*\*\*([^*]+)\*\*").expect("valid regex"),
        Regex::new(r"\d+\.\s*([^:\n]+?)(?::|\n)").expect("valid regex"),
        Regex::new(r"[-*]\s*\*\*([^*]+)\*\*").expect("valid regex"),
    ]
});

const NON_DIAGNOSIS_WORDS: &[&str] = &[
    "confidence",
    "evidence",
    "missed",
    "why",
    "risk",
    "test",
    "supporting",
];
const RISK_LEVELS: &[&str] = &["low", "medium", "high", "critical"];

fn clean_item(raw: &str) -> &str {
    raw.trim().trim_matches('*').trim()
}

fn to_initial(map: Map<String, Value>) -> Option<InitialDiagnosis> {
    serde_json::from_value(Value::Object(map)).ok()
}

/// Span from the first `{` to the last `}`. The last-object search lands on
/// nested differentials when the model adds a preamble.
fn outermost_object(text: &str) -> Option<Map<String, Value>> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// Initial diagnosis from JSON, else from prose headings.
pub fn parse_initial(text: &str) -> Option<InitialDiagnosis> {
    let last = extract_json_object(text).and_then(to_initial);
    if last.as_ref().is_some_and(InitialDiagnosis::is_usable) {
        return last;
    }
    outermost_object(text)
        .and_then(to_initial)
        .filter(InitialDiagnosis::is_usable)
        .or(last)
        .or_else(|| diagnosis_from_prose(text))
}

pub fn diagnosis_from_prose(text: &str) -> Option<InitialDiagnosis> {
    let mut result = InitialDiagnosis::default();

    for pattern in PRIMARY_PATTERNS.iter() {
        let Some(caps) = pattern.captures(text) else {
            continue;
        };
        let condition = clean_item(&caps[1]);
        if condition.chars().count() > 2 {
            result.acute_complication = Some(ConditionCall {
                condition: Some(condition.to_string()),
                confidence: Some(PROSE_CONFIDENCE),
                requires_intervention: None,
                reasoning: Some(EXTRACTED_NOTE.to_string()),
            });
            break;
        }
    }

    if let (Some(primary), Some(caps)) = (result.acute_complication.as_mut(), CONFIDENCE.captures(text)) {
        if let Ok(confidence) = caps[1].parse::<f64>() {
            primary.confidence = Some(confidence);
        }
    }

    if let Some(section) = DIFFERENTIAL_SECTION.captures(text) {
        result.differentials = LIST_ITEM
            .captures_iter(&section[1])
            .take(MAX_PROSE_ITEMS)
            .map(|caps| clean_item(caps.get(1).map_or("", |m| m.as_str())).to_string())
            .filter(|condition| {
                let lower = condition.to_lowercase();
                condition.chars().count() > 2
                    && !["confidence", "supporting", "against"]
                        .iter()
                        .any(|prefix| lower.starts_with(prefix))
            })
            .map(|condition| Differential {
                condition: Some(condition),
                confidence: Some(PROSE_DIFFERENTIAL_CONFIDENCE),
                ..Default::default()
            })
            .collect();
    }

    if let Some(section) = CRITICAL_SECTION.captures(text) {
        result.critical_findings = BULLET
            .captures_iter(&section[1])
            .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
            .map(|m| m.as_str().trim().to_string())
            .filter(|finding| !finding.is_empty())
            .take(MAX_PROSE_ITEMS)
            .collect();
    }

    let found = result.acute_complication.is_some()
        || !result.differentials.is_empty()
        || !result.critical_findings.is_empty();
    found.then_some(result)
}

/// Alternatives from a JSON array, an object wrapping one, prose lists, and
/// finally a single placeholder carrying the raw reply.
pub fn parse_alternatives(text: &str) -> Vec<Alternative> {
    if let Some(items) = extract_json_array(text) {
        return alternatives_from_values(items);
    }
    let wrapped = extract_json_object(text)
        .and_then(|map| map.into_iter().find_map(|(_, v)| match v {
            Value::Array(items) => Some(items),
            _ => None,
        }));
    if let Some(items) = wrapped {
        return alternatives_from_values(items);
    }
    if let Some(found) = alternatives_from_prose(text) {
        return found;
    }
    vec![Alternative {
        condition: Some("See raw output".to_string()),
        confidence: Some(0.0),
        risk_if_missed: Some("unknown".to_string()),
        raw_response: Some(text.to_string()),
        ..Default::default()
    }]
}

fn alternatives_from_values(items: Vec<Value>) -> Vec<Alternative> {
    items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect()
}

pub fn alternatives_from_prose(text: &str) -> Option<Vec<Alternative>> {
    for pattern in ALTERNATIVE_PATTERNS.iter() {
        let found: Vec<Alternative> = pattern
            .captures_iter(text)
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
            .filter(|condition| {
                let len = condition.chars().count();
                let lower = condition.to_lowercase();
                len > 3 && len < 100 && !NON_DIAGNOSIS_WORDS.iter().any(|w| lower.contains(w))
            })
            .map(|condition| Alternative {
                confidence: Some(confidence_after(text, &condition).unwrap_or(50.0)),
                why_missed: Some(EXTRACTED_NOTE.to_string()),
                risk_if_missed: Some(risk_after(text, &condition)),
                condition: Some(condition),
                ..Default::default()
            })
            .take(MAX_PROSE_ITEMS)
            .collect();
        if !found.is_empty() {
            return Some(found);
        }
    }
    None
}

fn confidence_after(text: &str, condition: &str) -> Option<f64> {
    let pattern = format!(r"(?s){}.*?[Cc]onfidence[:\s]*(\d+)", regex::escape(condition));
    let caps = Regex::new(&pattern).ok()?.captures(text)?;
    caps[1].parse().ok()
}

fn risk_after(text: &str, condition: &str) -> String {
    let pattern = format!(r"(?s){}.*?[Rr]isk[:\s]*(\w+)", regex::escape(condition));
    Regex::new(&pattern)
        .ok()
        .and_then(|re| re.captures(text))
        .map(|caps| caps[1].to_lowercase())
        .filter(|risk| RISK_LEVELS.contains(&risk.as_str()))
        .unwrap_or_else(|| "medium".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_from_json_with_preamble() {
        let text = r#"Here is my analysis:
{"acute_complication": {"condition": "Tension pneumothorax", "confidence": 90},
 "differentials": [{"condition": "Bullous emphysema", "confidence": 20,
   "supporting_evidence": ["hyperlucency"], "against_evidence": []}]}"#;
        let parsed = parse_initial(text).unwrap();
        assert!(parsed.is_usable());
        assert_eq!(parsed.differentials[0].supporting_evidence, vec!["hyperlucency"]);
    }

    #[test]
    fn test_initial_from_prose() {
        let text = "PRIMARY DIAGNOSIS: **Community-acquired pneumonia**\nConfidence: 78\n\n\
            DIFFERENTIAL DIAGNOSES:\n1. **Pulmonary embolism**\n2. Lung abscess\n3. Confidence notes\n\n\
            CRITICAL FINDINGS:\n- **Right lower lobe consolidation**\n- Small effusion\n\n\
            CLINICAL REASONING: fever and cough";
        let parsed = diagnosis_from_prose(text).unwrap();
        let primary = parsed.acute_complication.unwrap();
        assert_eq!(primary.condition.as_deref(), Some("Community-acquired pneumonia"));
        assert_eq!(primary.confidence, Some(78.0));
        let names: Vec<_> = parsed
            .differentials
            .iter()
            .filter_map(|d| d.condition.as_deref())
            .collect();
        assert_eq!(names, vec!["Pulmonary embolism", "Lung abscess"]);
        assert_eq!(
            parsed.critical_findings,
            vec!["Right lower lobe consolidation", "Small effusion"]
        );
    }

    #[test]
    fn test_prose_without_structure() {
        assert!(diagnosis_from_prose("I cannot tell from this image.").is_none());
    }

    #[test]
    fn test_alternatives_from_array() {
        let alts = parse_alternatives(
            r#"```json
[{"condition": "Sarcoidosis", "why_missed": "rare", "risk_if_missed": "high", "confidence": "30"}]
```"#,
        );
        assert_eq!(alts.len(), 1);
        assert_eq!(alts[0].confidence, Some(30.0));
    }

    #[test]
    fn test_alternatives_wrapped_in_object() {
        let alts = parse_alternatives(r#"{"alternatives": [{"condition": "Lymphoma"}]}"#);
        assert_eq!(alts[0].condition.as_deref(), Some("Lymphoma"));
    }

    #[test]
    fn test_alternatives_from_prose_with_risk() {
        let text = "1. **Pulmonary lymphoma** - Confidence: 25, Risk: high\n\
            2. **Fungal infection** (risk: extreme)";
        let alts = parse_alternatives(text);
        assert_eq!(alts.len(), 2);
        assert_eq!(alts[0].confidence, Some(25.0));
        assert_eq!(alts[0].risk_if_missed.as_deref(), Some("high"));
        assert_eq!(alts[1].risk_if_missed.as_deref(), Some("medium"));
    }

    #[test]
    fn test_alternatives_placeholder() {
        let alts = parse_alternatives("nothing useful");
        assert_eq!(alts.len(), 1);
        assert_eq!(alts[0].condition.as_deref(), Some("See raw output"));
        assert_eq!(alts[0].raw_response.as_deref(), Some("nothing useful"));
    }
}
