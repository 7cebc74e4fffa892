// MedGemma prompts for the commentary endpoints.

use crate::llm_client::prompts::NO_FINAL_ANSWER;
use crate::models::CaseProfile;
use crate::text::clip_chars;

pub const EXPERT_ANSWER_MARKER: &str = "Expert Answer:";
pub const SYNTHESIS_MARKER: &str = "Clinical Synthesis:";
pub const IMAGING_MARKER: &str = "Imaging Context:";

pub fn box_prompt(diagnosis: &str) -> String {
    format!(
        "Return the bounding box coordinates [ymin, xmin, ymax, xmax] for the finding \
         '{diagnosis}' in this chest X-ray."
    )
}

pub fn commentary_prompt(
    diagnosis: &str,
    original_region: &str,
    match_region: &str,
    hpi: &str,
    outcome: &str,
) -> String {
    let or_missing = |s: &str| if s.trim().is_empty() { "not provided".to_string() } else { s.to_string() };
    format!(
        "You are a radiology AI assistant. Analyze this chest X-ray for suspected '{diagnosis}'. \
         The primary finding in the current image is in the {original_region}. \
         The historical twin case had primary involvement in the {match_region}. \
         Clinical history: {}. Historical outcome: {}. \
         Write exactly 5-6 sentences. Cover: (1) what the current finding looks like, \
         (2) why the highlighted region is clinically significant, \
         (3) how it visually compares to the historical case, \
         (4) what this similarity suggests prognostically. \
         Use **bold** for key medical terms. Do NOT repeat yourself. Stop after 6 sentences.",
        or_missing(hpi),
        or_missing(outcome),
    )
}

/// Markdown block describing the patient currently being worked up.
pub fn current_patient_block(profile: &CaseProfile) -> String {
    let patient = &profile.patient;
    let age = patient.age_years.map(|a| format!("{a}y ")).unwrap_or_default();
    let sex = patient.sex.as_deref().unwrap_or("unknown sex");
    let comorbidities = if patient.comorbidities.is_empty() {
        "none documented".to_string()
    } else {
        patient.comorbidities.join(", ")
    };
    let presentation = &profile.presentation;
    let complaint = presentation.chief_complaint.as_deref().unwrap_or("not specified");
    let hpi = clip_chars(presentation.hpi.as_deref().unwrap_or_default(), 300);
    let assessment = &profile.assessment;
    let diagnosis = assessment.diagnosis_primary.as_deref().unwrap_or("undetermined");
    let urgency = assessment.urgency.as_deref().unwrap_or_default();
    let icu = assessment
        .icu_candidate
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|icu| format!(" | ICU candidate: {icu}"))
        .unwrap_or_default();
    let findings = profile.findings.positive_findings();
    let findings = if findings.is_empty() {
        "none extracted".to_string()
    } else {
        findings.join(", ")
    };

    format!(
        "\n## Current Patient Profile\n\
         - **Demographics:** {age}{sex}\n\
         - **Comorbidities:** {comorbidities}\n\
         - **Chief complaint:** {complaint}\n\
         - **Clinical narrative:** {}\n\
         - **Primary diagnosis (extracted):** {diagnosis}\n\
         - **Urgency:** {urgency}{icu}\n\
         - **Key findings:** {findings}\n",
        if hpi.is_empty() { "not provided" } else { hpi },
    )
}

pub fn twin_chat_prompt(query: &str, case_text: &str, current: Option<&CaseProfile>) -> String {
    let twin = format!("\n## Historical Twin Case\n{}\n", clip_chars(case_text, 800));
    let current = current.map(current_patient_block).unwrap_or_default();
    format!(
        "You are an expert clinical reasoning assistant. \
         Consult the two medical cases below and answer the clinician's question. \
         Keep your answer EXTREMELY short (maximum 3 sentences or 3 bullet points total). \
         Use Markdown formatting (bullet points, **bold** text). \
         CRITICAL INSTRUCTIONS: Do NOT generate long repetitive lists. Never use more than 3 bullet points. \
         Do NOT add introductory filler. Jump straight into the clinical facts.\n\
         {NO_FINAL_ANSWER}\n\n\
         {twin}{current}\n---\nQuestion: {query}\n\n{EXPERT_ANSWER_MARKER}"
    )
}

/// Compact profile context shared by the synthesis and imaging prompts.
pub fn profile_context(profile: &CaseProfile) -> String {
    format!(
        "Patient: {}y {}\nCC: {}\nHPI: {}\nPMH: {}\nComorbidities: {}\nPrimary Dx: {}",
        profile.patient.age_years.map(|a| a.to_string()).unwrap_or_default(),
        profile.patient.sex.as_deref().unwrap_or_default(),
        profile.presentation.chief_complaint.as_deref().unwrap_or_default(),
        profile.presentation.hpi.as_deref().unwrap_or_default(),
        profile.presentation.pmh.as_deref().unwrap_or_default(),
        profile.patient.comorbidities.join(", "),
        profile.assessment.diagnosis_primary.as_deref().unwrap_or_default(),
    )
}

pub fn synthesis_prompt(context: &str) -> String {
    format!(
        "You are an expert clinical reasoning assistant. \
         Review the patient profile below (and the image if provided). \
         Write an 'AI Clinical Synthesis' providing deep medical insights, potential \
         hidden risk factors, or prognostic observations that are NOT just repeating the provided text. \
         Keep your synthesis to EXACTLY 3-4 short sentences or bullet points. \
         Use Markdown format (bold key terms). Do NOT generate repetitive lists. \
         Do NOT append 'Final Answer:'. Do not include intro filler.\n\n\
         ## Case Profile\n{}\n\n{SYNTHESIS_MARKER}",
        clip_chars(context, 800)
    )
}

pub fn imaging_prompt(context: &str) -> String {
    format!(
        "You are an expert radiologist. \
         Review the provided medical image and the patient's brief clinical context below. \
         Write an 'Imaging Context' summary focusing strictly on the key radiological findings, \
         their severity, and their direct clinical relevance to the patient's presentation. \
         Keep it to EXACTLY 2-3 short sentences. \
         Use Markdown format (bold key terms). Do NOT generate repetitive lists. \
         Do NOT append 'Final Answer:'.\n\n\
         ## Case Context\n{}\n\n{IMAGING_MARKER}",
        clip_chars(context, 500)
    )
}

pub const EXPLAIN_TAIL: &str = "Start directly with the explanation.";

pub fn explain_prompt(selected: &str, context_snippet: &str) -> String {
    format!(
        "You are a concise medical education assistant. \
         Explain the following medical term or phrase in exactly 1-2 sentences, \
         suitable for a clinical audience. \
         Phrase: \"{selected}\". \
         Context: \"{context_snippet}\". \
         Do NOT repeat the phrase back as a complete sentence. {EXPLAIN_TAIL}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_current_patient_block() {
        let profile: CaseProfile = serde_json::from_value(json!({
            "patient": {"age_years": 67, "sex": "male", "comorbidities": ["COPD"]},
            "presentation": {"chief_complaint": "dyspnea"},
            "assessment": {"diagnosis_primary": "pneumothorax", "urgency": "emergent",
                           "icu_candidate": "yes"},
            "findings": {"pleura": {"pneumothorax_present": "yes"}}
        }))
        .unwrap();
        let block = current_patient_block(&profile);
        assert!(block.contains("- **Demographics:** 67y male"));
        assert!(block.contains("- **Clinical narrative:** not provided"));
        assert!(block.contains("- **Urgency:** emergent | ICU candidate: yes"));
        assert!(block.contains("- **Key findings:** pneumothorax"));
    }

    #[test]
    fn test_twin_chat_prompt_clips_case_text() {
        let case_text = "x".repeat(2000);
        let prompt = twin_chat_prompt("What next?", &case_text, None);
        assert!(prompt.contains(&"x".repeat(800)));
        assert!(!prompt.contains(&"x".repeat(801)));
        assert!(prompt.ends_with("Question: What next?\n\nExpert Answer:"));
        assert!(!prompt.contains("Current Patient Profile"));
    }

    #[test]
    fn test_profile_context_layout() {
        let profile = CaseProfile::default();
        assert_eq!(
            profile_context(&profile),
            "Patient: y \nCC: \nHPI: \nPMH: \nComorbidities: \nPrimary Dx: "
        );
    }
}
