//! Fixed-layout text report for a completed diagnosis.

use super::graph::BIAS_EXCERPT_CHARS;
use super::state::{fmt_confidence, DiagnosisState};
use crate::text::clip_chars;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

fn section(out: &mut String, title: &str) {
    out.push_str(&format!("\n{RULE}\n{title}\n{RULE}\n"));
}

fn first_joined(items: &[String], n: usize) -> String {
    items.iter().take(n).cloned().collect::<Vec<_>>().join("; ")
}

pub fn final_report(state: &DiagnosisState) -> String {
    let case = &state.case;
    let provenance = &case.provenance;
    let initial = state.initial_diagnosis.clone().unwrap_or_default();
    let na = |value: Option<&str>| value.unwrap_or("N/A").to_string();

    let mut out = String::from(
        "╔══════════════════════════════════════════════════════════════════════╗\n\
         ║           MEDGEMMA DIFFERENTIAL DIAGNOSIS REPORT                     ║\n\
         ╚══════════════════════════════════════════════════════════════════════╝\n",
    );
    out.push_str(&format!(
        "\nCASE ID: {}\nSOURCE:  {} ({}, {})\nPMC ID:  {}\n",
        state.case_id,
        na(provenance.article_title.as_deref()),
        na(provenance.journal.as_deref()),
        na(provenance.year.as_deref()),
        na(provenance.pmc_id.as_deref()),
    ));

    section(&mut out, "PATIENT SUMMARY");
    out.push_str(&na(case.summary.one_liner.as_deref()));
    out.push('\n');

    // Primary falls back to the etiology; with neither, the raw output is the answer.
    let primary = initial
        .acute_complication
        .as_ref()
        .or(initial.underlying_etiology.as_ref());
    section(&mut out, "PRIMARY DIAGNOSIS");
    out.push_str(&format!(
        "Condition:   {}\nConfidence:  {}%\nReasoning:   {}\n",
        primary
            .and_then(|p| p.condition.as_deref())
            .unwrap_or("See raw output"),
        fmt_confidence(primary.and_then(|p| p.confidence)),
        na(primary.and_then(|p| p.reasoning.as_deref())),
    ));

    let etiology = initial.underlying_etiology.as_ref();
    section(&mut out, "UNDERLYING ETIOLOGY (if different from primary)");
    out.push_str(&format!(
        "Condition:   {}\nConfidence:  {}%\n",
        etiology
            .and_then(|e| e.condition.as_deref())
            .unwrap_or("Same as primary or N/A"),
        etiology
            .and_then(|e| e.confidence)
            .map_or("N/A".to_string(), |c| fmt_confidence(Some(c))),
    ));

    section(&mut out, "DIFFERENTIAL DIAGNOSES");
    for (i, diff) in state.differentials().iter().enumerate() {
        out.push_str(&format!(
            "  [{}] {} (Confidence: {}%)\n      Supporting: {}\n      Against:    {}\n",
            i + 1,
            diff.condition.as_deref().unwrap_or("Unknown"),
            fmt_confidence(diff.confidence),
            first_joined(&diff.supporting_evidence, 2),
            first_joined(&diff.against_evidence, 2),
        ));
    }

    section(&mut out, "COGNITIVE BIAS ANALYSIS");
    match state.bias_notes.as_deref() {
        Some(notes) => out.push_str(&format!("{}...\n", clip_chars(notes, BIAS_EXCERPT_CHARS))),
        None => out.push_str("Not performed\n"),
    }

    section(&mut out, "MISSED DIAGNOSES / ALTERNATIVE HYPOTHESES");
    for (i, alt) in state.alternatives.iter().enumerate() {
        let Some(condition) = alt.condition.as_deref() else {
            continue;
        };
        out.push_str(&format!(
            "  [{}] {condition} (Risk if missed: {})\n      Why missed:  {}\n      Evidence:    {}\n      Confirm via: {}\n",
            i + 1,
            alt.risk_if_missed.as_deref().unwrap_or("?").to_uppercase(),
            na(alt.why_missed.as_deref()),
            first_joined(&alt.supporting_evidence, 2),
            first_joined(&alt.confirmatory_tests, 3),
        ));
    }

    let assessment = &case.assessment;
    section(&mut out, "GROUND TRUTH (from case record)");
    out.push_str(&format!(
        "Actual Primary Diagnosis: {}\nSuspected:                {}\nDocumented Differentials: {}\nUrgency:                  {}\nOutcome:                  {}\n",
        na(assessment.diagnosis_primary.as_deref()),
        assessment.suspected_primary.join(", "),
        assessment.differential.join(", "),
        na(assessment.urgency.as_deref()),
        na(case.outcome.detail.as_deref()),
    ));

    out.push_str(&format!(
        "\n{RULE}\n⚠  DISCLAIMER: For research/educational use only. Not for clinical decisions.\n{RULE}\n"
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnosis::state::{Alternative, ConditionCall, Differential, InitialDiagnosis};

    fn state() -> DiagnosisState {
        let mut state = DiagnosisState::new("case-9");
        state.case.provenance.article_title = Some("A rare effusion".into());
        state.case.provenance.year = Some("2021".into());
        state.case.assessment.diagnosis_primary = Some("Chylothorax".into());
        state.initial_diagnosis = Some(InitialDiagnosis {
            acute_complication: Some(ConditionCall {
                condition: Some("Pleural effusion".into()),
                confidence: Some(75.0),
                requires_intervention: Some(true),
                reasoning: Some("Blunted costophrenic angle.".into()),
            }),
            differentials: vec![Differential {
                condition: Some("Empyema".into()),
                confidence: Some(20.0),
                supporting_evidence: vec!["fever".into(), "loculation".into(), "pain".into()],
                against_evidence: Vec::new(),
            }],
            ..Default::default()
        });
        state.bias_notes = Some("x".repeat(900));
        state.alternatives = vec![
            Alternative {
                condition: Some("Lymphoma".into()),
                risk_if_missed: Some("high".into()),
                confirmatory_tests: vec!["CT".into(), "biopsy".into(), "PET".into(), "LDH".into()],
                ..Default::default()
            },
            Alternative::default(),
        ];
        state
    }

    #[test]
    fn test_report_sections() {
        let report = final_report(&state());
        assert!(report.contains("CASE ID: case-9"));
        assert!(report.contains("SOURCE:  A rare effusion (N/A, 2021)"));
        assert!(report.contains("Condition:   Pleural effusion\nConfidence:  75%"));
        assert!(report.contains("Condition:   Same as primary or N/A\nConfidence:  N/A%"));
        assert!(report.contains("[1] Empyema (Confidence: 20%)\n      Supporting: fever; loculation\n"));
        assert!(report.contains("[1] Lymphoma (Risk if missed: HIGH)"));
        assert!(report.contains("Confirm via: CT; biopsy; PET\n"));
        assert!(report.contains("Actual Primary Diagnosis: Chylothorax"));
        assert!(report.contains("DISCLAIMER"));
    }

    #[test]
    fn test_bias_notes_clipped() {
        let report = final_report(&state());
        assert!(report.contains(&format!("{}...\n", "x".repeat(800))));
        assert!(!report.contains(&"x".repeat(801)));
    }

    #[test]
    fn test_raw_diagnosis_report() {
        let mut state = DiagnosisState::new("c");
        state.initial_diagnosis = Some(InitialDiagnosis::raw("prose"));
        let report = final_report(&state);
        assert!(report.contains("Condition:   See raw output\nConfidence:  ?%"));
        assert!(report.contains("Not performed"));
    }
}
