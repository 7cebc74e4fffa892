// Prompts for the differential-diagnosis graph and case chat.

use super::state::CaseImage;
use crate::models::profile::Findings;
use crate::models::CaseRecord;

pub const DIAGNOSIS_SYSTEM: &str = "You are an expert AI medical diagnostic assistant.
You analyze clinical cases with the rigor of a senior physician, considering all
available information: patient history, symptoms, medications, imaging, and lab findings.
Be systematic, evidence-based, and transparent about your reasoning and uncertainty.
When asked for JSON output, respond with ONLY valid JSON, no markdown fences, no commentary before or after.";

pub const INITIAL_TASK: &str = r#"Analyze the clinical case and images above. Respond with ONLY a JSON object (no other text).

CRITICAL INSTRUCTIONS:
1. Separate the underlying etiology (root cause) from the acute complication or primary focus that requires immediate intervention.
2. MEDICAL REALITY CHECK: Never assign 100% confidence to any single condition. Always distribute probabilities to leave room for uncertainty and differentials.

Required JSON structure:
{
  "underlying_etiology": {"condition": "<name>", "confidence": <0-99>},
  "acute_complication": {"condition": "<name>", "confidence": <0-99>, "requires_intervention": true, "reasoning": "<1-2 sentences>"},
  "differentials": [
    {"condition": "<name>", "confidence": <0-99>, "supporting_evidence": ["<evidence>"], "against_evidence": ["<evidence>"]}
  ],
  "critical_findings": ["<finding>"],
  "clinical_reasoning": "<step-by-step reasoning>"
}

Provide 3-5 differentials. Be specific and evidence-based."#;

pub const STRICT_INITIAL_TASK: &str = r#"IMPORTANT: You MUST respond with ONLY valid JSON. No explanatory text before or after.

Analyze the clinical case. Return this exact JSON structure:
{"underlying_etiology": {"condition": "<name>", "confidence": <0-99>}, "acute_complication": {"condition": "<name>", "confidence": <0-99>, "requires_intervention": true, "reasoning": "<1-2 sentences>"}, "differentials": [{"condition": "<name>", "confidence": <0-99>, "supporting_evidence": ["<evidence>"], "against_evidence": ["<evidence>"]}], "critical_findings": ["<finding>"], "clinical_reasoning": "<reasoning>"}

Provide 3-5 differentials. Start your response with { and end with }."#;

/// Replace `{initial}`.
pub const BIAS_TASK_TEMPLATE: &str = r#"You have generated an initial diagnosis. Now perform a COGNITIVE BIAS AUDIT:

Initial diagnosis was:
{initial}

Check for these specific biases:
1. ANCHORING BIAS: Are you too fixated on the first or most obvious finding?
2. AVAILABILITY BIAS: Are common diagnoses being over-weighted?
3. PREMATURE CLOSURE: Have you stopped considering alternatives too early?
4. FRAMING EFFECT: How is the case presentation framing your thinking?
5. REPRESENTATIVE HEURISTIC: Are you pattern-matching too quickly?
6. RARE DISEASE NEGLECT: What uncommon but serious conditions are being missed?
7. CONFIRMATION BIAS: Are you selectively weighing evidence?

For each bias found, explain:
- What the bias is in this case
- How it might be skewing the diagnosis
- What to reconsider

Also identify: What diagnoses might a physician MISS due to these biases?"#;

/// Replace `{initial}` and `{bias_notes}`.
pub const ALTERNATIVES_TASK_TEMPLATE: &str = r#"Given this initial diagnosis and bias analysis, generate 3-5 alternative diagnoses that may have been missed.

Initial diagnosis:
{initial}

Bias analysis highlights:
{bias_notes}

Consider: atypical presentations, rare but serious conditions, dual pathology, mimickers, and systemic diseases.

Respond with ONLY a JSON array (no other text). Each element must have:
{"condition":"<name>","why_missed":"<reason>","supporting_evidence":["<evidence>"],"confirmatory_tests":["<test>"],"risk_if_missed":"high|medium|low|critical","confidence":<0-100>}"#;

fn or_na(value: Option<&str>) -> &str {
    value.unwrap_or("N/A")
}

fn joined_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "None documented".to_string()
    } else {
        items.join(", ")
    }
}

/// Clinical case block shared by every graph step, with captions for the
/// attached images.
pub fn clinical_case(case: &CaseRecord, images: &[CaseImage]) -> String {
    let patient = &case.patient;
    let presentation = &case.presentation;
    let study = &case.study;

    let mut text = format!(
        "=== CLINICAL CASE ===

PATIENT:
- Age: {} years, {}
- Immunocompromised: {}
- Comorbidities: {}
- Medications: {}
- Allergies: {}

PRESENTATION:
- Chief Complaint: {}
- Duration: {}
- HPI: {}
- Past Medical History: {}

IMAGING STUDY:
- Modality: {}
- Region: {}
- View: {}

RADIOLOGICAL FINDINGS:
",
        patient.age_years.map_or("unknown".to_string(), |a| a.to_string()),
        patient.sex.as_deref().unwrap_or("unknown"),
        patient.immunocompromised.as_deref().unwrap_or("unknown"),
        joined_or_none(&patient.comorbidities),
        joined_or_none(&patient.medications),
        patient.allergies.as_deref().unwrap_or("None documented"),
        or_na(presentation.chief_complaint.as_deref()),
        or_na(presentation.symptom_duration.as_deref()),
        or_na(presentation.hpi.as_deref()),
        or_na(presentation.pmh.as_deref()),
        or_na(study.modality.as_deref()),
        or_na(study.body_region.as_deref()),
        or_na(study.view_position.as_deref()),
    );

    text.push_str(&findings_lines(&case.findings));

    if !images.is_empty() {
        text.push_str("\nAVAILABLE IMAGES:\n");
        for (i, image) in images.iter().enumerate() {
            text.push_str(&format!("  Image {} ({}): {}\n", i + 1, image.subtype, image.caption));
        }
    }
    text
}

/// One `- REGION: {json}` line per findings region, whatever the body system.
fn findings_lines(findings: &Findings) -> String {
    let regions = match serde_json::to_value(findings) {
        Ok(serde_json::Value::Object(map)) if *findings != Findings::default() => map,
        _ => return "- No specific radiological findings documented.\n".to_string(),
    };
    regions
        .iter()
        .map(|(region, details)| format!("- {}: {details}\n", region.to_uppercase()))
        .collect()
}

/// `case block + task` for a graph step.
pub fn case_task(case: &CaseRecord, images: &[CaseImage], task: &str) -> String {
    format!("{}\n\n{task}", clinical_case(case, images))
}

/// System prompt for chatting about a diagnosed case. `diagnosis_json` is the
/// pretty-printed initial diagnosis.
pub fn chat_context(case: &CaseRecord, diagnosis_json: &str) -> String {
    let patient = &case.patient;
    let presentation = &case.presentation;
    let hpi: String = or_na(presentation.hpi.as_deref()).chars().take(500).collect();
    let list_or_none = |items: &[String]| {
        if items.is_empty() {
            "None".to_string()
        } else {
            items.join(", ")
        }
    };

    format!(
        "You are a medical AI assistant discussing a specific patient case. Use the case context below to answer questions accurately.

=== PATIENT CASE CONTEXT ===
Patient: {} y/o {}
Chief Complaint: {}
HPI: {hpi}
Comorbidities: {}
Medications: {}

=== AI DIAGNOSIS ===
{diagnosis_json}

=== GROUND TRUTH ===
Actual Diagnosis: {}
Differentials: {}

Answer the user's questions about this case. Be specific, cite findings from the case, and explain your reasoning. If asked about treatment or prognosis, note that this is for educational discussion only.",
        patient.age_years.map_or("?".to_string(), |a| a.to_string()),
        patient.sex.as_deref().unwrap_or("?"),
        or_na(presentation.chief_complaint.as_deref()),
        list_or_none(&patient.comorbidities),
        list_or_none(&patient.medications),
        or_na(case.assessment.diagnosis_primary.as_deref()),
        case.assessment.differential.join(", "),
    )
}
