//! Typed state carried through the diagnosis graph.
//!
//! Model output is loosely shaped, so every field is optional or defaults and
//! numbers may arrive as strings.

use serde::{Deserialize, Serialize};

use crate::llm_client::InlineImage;
use crate::models::de::{lenient_f64, lenient_list, lenient_string, null_default};
use crate::models::CaseRecord;

/// A named condition with the model's confidence.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConditionCall {
    #[serde(deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(deserialize_with = "lenient_f64", skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_intervention: Option<bool>,
    #[serde(deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl ConditionCall {
    pub fn has_condition(&self) -> bool {
        self.condition.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Differential {
    #[serde(deserialize_with = "lenient_string")]
    pub condition: Option<String>,
    #[serde(deserialize_with = "lenient_f64")]
    pub confidence: Option<f64>,
    #[serde(deserialize_with = "lenient_list")]
    pub supporting_evidence: Vec<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub against_evidence: Vec<String>,
}

/// Initial structured diagnosis. `acute_complication` is the primary focus;
/// `primary_diagnosis` is accepted from older prompt variants.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InitialDiagnosis {
    #[serde(deserialize_with = "null_default", skip_serializing_if = "Option::is_none")]
    pub underlying_etiology: Option<ConditionCall>,
    #[serde(deserialize_with = "null_default", skip_serializing_if = "Option::is_none")]
    pub acute_complication: Option<ConditionCall>,
    #[serde(deserialize_with = "null_default", skip_serializing_if = "Option::is_none")]
    pub primary_diagnosis: Option<ConditionCall>,
    #[serde(deserialize_with = "null_default")]
    pub differentials: Vec<Differential>,
    #[serde(deserialize_with = "lenient_list")]
    pub critical_findings: Vec<String>,
    #[serde(deserialize_with = "lenient_string", skip_serializing_if = "Option::is_none")]
    pub clinical_reasoning: Option<String>,
    /// Unparsed model output when nothing structured could be recovered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

impl InitialDiagnosis {
    pub fn raw(response: impl Into<String>) -> Self {
        InitialDiagnosis {
            raw_response: Some(response.into()),
            ..Default::default()
        }
    }

    /// Good enough to stop retrying.
    pub fn is_usable(&self) -> bool {
        self.acute_complication.is_some() || !self.differentials.is_empty()
    }

    /// The condition the report leads with: acute complication, then the legacy
    /// primary field, then the underlying etiology.
    pub fn primary(&self) -> Option<&ConditionCall> {
        [
            self.acute_complication.as_ref(),
            self.primary_diagnosis.as_ref(),
            self.underlying_etiology.as_ref(),
        ]
        .into_iter()
        .flatten()
        .find(|call| call.has_condition())
    }

    /// Pretty JSON for prompts and chat context.
    pub fn to_prompt_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Alternative {
    #[serde(deserialize_with = "lenient_string")]
    pub condition: Option<String>,
    #[serde(deserialize_with = "lenient_f64")]
    pub confidence: Option<f64>,
    #[serde(deserialize_with = "lenient_string")]
    pub why_missed: Option<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub supporting_evidence: Vec<String>,
    #[serde(deserialize_with = "lenient_list")]
    pub confirmatory_tests: Vec<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub risk_if_missed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

/// A case image loaded for the model.
#[derive(Debug, Clone)]
pub struct CaseImage {
    pub image_id: String,
    pub image: InlineImage,
    pub caption: String,
    pub subtype: String,
    pub image_type: String,
}

#[derive(Debug, Clone, Default)]
pub struct DiagnosisState {
    pub case_id: String,
    pub case: CaseRecord,
    pub images: Vec<CaseImage>,
    pub initial_diagnosis: Option<InitialDiagnosis>,
    pub bias_notes: Option<String>,
    pub alternatives: Vec<Alternative>,
    pub final_report: Option<String>,
}

impl DiagnosisState {
    pub fn new(case_id: impl Into<String>) -> Self {
        DiagnosisState {
            case_id: case_id.into(),
            ..Default::default()
        }
    }

    pub fn differentials(&self) -> &[Differential] {
        self.initial_diagnosis
            .as_ref()
            .map(|d| d.differentials.as_slice())
            .unwrap_or_default()
    }
}

/// `85.0` renders as `85`, `72.5` as `72.5`, missing as `?`.
pub fn fmt_confidence(confidence: Option<f64>) -> String {
    match confidence {
        Some(c) if c.fract() == 0.0 => format!("{c:.0}"),
        Some(c) => format!("{c}"),
        None => "?".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_prefers_acute_complication() {
        let parsed: InitialDiagnosis = serde_json::from_str(
            r#"{
                "underlying_etiology": {"condition": "Lung cancer", "confidence": 70},
                "acute_complication": {"condition": "Malignant effusion", "confidence": "80%"},
                "differentials": null
            }"#,
        )
        .unwrap();
        assert_eq!(parsed.primary().unwrap().condition.as_deref(), Some("Malignant effusion"));
        assert_eq!(parsed.primary().unwrap().confidence, Some(80.0));
        assert!(parsed.is_usable());
    }

    #[test]
    fn test_primary_falls_back_to_etiology() {
        let parsed: InitialDiagnosis = serde_json::from_str(
            r#"{"acute_complication": {"confidence": 10}, "underlying_etiology": {"condition": "TB"}}"#,
        )
        .unwrap();
        assert_eq!(parsed.primary().unwrap().condition.as_deref(), Some("TB"));
    }

    #[test]
    fn test_raw_is_not_usable() {
        let raw = InitialDiagnosis::raw("prose");
        assert!(!raw.is_usable());
        assert!(raw.primary().is_none());
        assert!(raw.to_prompt_json().contains("\"raw_response\": \"prose\""));
    }

    #[test]
    fn test_fmt_confidence() {
        assert_eq!(fmt_confidence(Some(85.0)), "85");
        assert_eq!(fmt_confidence(Some(72.5)), "72.5");
        assert_eq!(fmt_confidence(None), "?");
    }
}
