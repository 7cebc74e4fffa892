//! Profile-aware re-ranking of vector hits.
//!
//! The vector score measures visual similarity only. When the caller supplies
//! the current patient's profile, each candidate earns a small clinical-overlap
//! bonus, so a slightly less similar image from a clinically matching case can
//! overtake a visually closer but unrelated one.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;

use super::qdrant::ScoredPoint;
use crate::models::CaseProfile;

pub const MAX_BONUS: f32 = 0.15;

const DIAGNOSIS_MATCH: f32 = 0.06;
const SUSPECTED_OVERLAP: f32 = 0.02;
const SUSPECTED_CAP: f32 = 0.04;
const FINDING_OVERLAP: f32 = 0.01;
const FINDING_CAP: f32 = 0.03;
const SAME_SEX: f32 = 0.01;
const SIMILAR_AGE: f32 = 0.01;
const AGE_WINDOW_YEARS: u32 = 10;
const COMORBIDITY_OVERLAP: f32 = 0.005;
const COMORBIDITY_CAP: f32 = 0.01;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RankedMatch {
    pub id: Value,
    pub score: f32,
    pub vector_score: f32,
    pub payload: Value,
}

fn normalized(items: impl IntoIterator<Item = impl AsRef<str>>) -> HashSet<String> {
    items
        .into_iter()
        .map(|s| s.as_ref().trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn same_text(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => !a.trim().is_empty() && a.trim().eq_ignore_ascii_case(b.trim()),
        _ => false,
    }
}

fn capped_overlap(a: &HashSet<String>, b: &HashSet<String>, each: f32, cap: f32) -> f32 {
    (a.intersection(b).count() as f32 * each).min(cap)
}

/// Clinical-overlap bonus of `candidate` against `query`, at most `MAX_BONUS`.
pub fn clinical_bonus(query: &CaseProfile, candidate: &CaseProfile) -> f32 {
    let mut bonus = 0.0;

    if same_text(
        query.assessment.diagnosis_primary.as_deref(),
        candidate.assessment.diagnosis_primary.as_deref(),
    ) {
        bonus += DIAGNOSIS_MATCH;
    }

    let suspected = |p: &CaseProfile| {
        normalized(
            p.assessment
                .suspected_primary
                .iter()
                .chain(&p.assessment.differential)
                .chain(&p.assessment.diagnosis_primary),
        )
    };
    bonus += capped_overlap(
        &suspected(query),
        &suspected(candidate),
        SUSPECTED_OVERLAP,
        SUSPECTED_CAP,
    );

    bonus += capped_overlap(
        &normalized(query.findings.positive_findings()),
        &normalized(candidate.findings.positive_findings()),
        FINDING_OVERLAP,
        FINDING_CAP,
    );

    if same_text(query.patient.sex.as_deref(), candidate.patient.sex.as_deref()) {
        bonus += SAME_SEX;
    }

    if let (Some(a), Some(b)) = (query.patient.age_years, candidate.patient.age_years) {
        if a.abs_diff(b) <= AGE_WINDOW_YEARS {
            bonus += SIMILAR_AGE;
        }
    }

    bonus += capped_overlap(
        &normalized(&query.patient.comorbidities),
        &normalized(&candidate.patient.comorbidities),
        COMORBIDITY_OVERLAP,
        COMORBIDITY_CAP,
    );

    bonus.min(MAX_BONUS)
}

/// Blends vector score with the clinical bonus, sorts descending and keeps
/// the top `limit`. Without a profile the vector order is kept.
pub fn rerank(points: Vec<ScoredPoint>, profile: Option<&CaseProfile>, limit: usize) -> Vec<RankedMatch> {
    let mut ranked: Vec<RankedMatch> = points
        .into_iter()
        .map(|point| {
            let bonus = profile.map_or(0.0, |query| {
                let candidate: CaseProfile =
                    serde_json::from_value(point.payload.clone()).unwrap_or_default();
                clinical_bonus(query, &candidate)
            });
            RankedMatch {
                id: point.id,
                score: point.score + bonus,
                vector_score: point.score,
                payload: point.payload,
            }
        })
        .collect();

    if profile.is_some() {
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    }
    ranked.truncate(limit);
    ranked
}
