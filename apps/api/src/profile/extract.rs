//! Rule-based CaseProfile extraction from free-text clinical notes.
//!
//! Pure: the handler supplies the notes, the uploaded image file names and
//! whatever structured findings MedGemma produced for the first image.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::models::profile::{
    profile_id, Assessment, CaseProfile, Findings, Patient, Presentation, Study, Summary,
};
use crate::text::{clip_chars, clip_with_ellipsis};

fn ci(pattern: &str) -> Regex {
    Regex::new(&format!("(?i){pattern}")).expect("valid regex")
}

/// Ordered `(pattern, label)` table.
fn table(entries: &[(&str, &'static str)]) -> Vec<(Regex, &'static str)> {
    entries.iter().map(|(p, label)| (ci(p), *label)).collect()
}

static AGE: Lazy<Regex> = Lazy::new(|| ci(r"(\d{1,3})\s*[- ]?(?:year|yr)s?[- ]?old"));
static FEMALE: Lazy<Regex> = Lazy::new(|| ci(r"\bfemale\b|\bwoman\b"));
static MALE: Lazy<Regex> = Lazy::new(|| ci(r"\bmale\b|\bman\b"));
static IMMUNOCOMPROMISED: Lazy<Regex> = Lazy::new(|| ci(r"immunocompromised|immunosuppressed"));
static NO_ALLERGIES: Lazy<Regex> = Lazy::new(|| ci(r"no known allerg"));

static COMORBIDITIES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    table(&[
        (r"hypertension|\bHTN\b", "hypertension"),
        (r"type 2 diabet|\bT2DM\b|\bDM2\b", "type 2 diabetes"),
        (r"type 1 diabet|\bT1DM\b|\bDM1\b", "type 1 diabetes"),
        (r"atrial fibrillation|\bAF\b|\bAFib\b", "atrial fibrillation"),
        (r"heart failure|\bCHF\b", "heart failure"),
        (r"\bCOPD\b|chronic obstructive", "COPD"),
        (r"asthma", "asthma"),
        (r"cirrhosis", "liver cirrhosis"),
        (r"hepatocellular carcinoma|\bHCC\b", "hepatocellular carcinoma"),
        (r"chronic kidney|\bCKD\b", "chronic kidney disease"),
        (r"coronary artery disease|\bCAD\b", "coronary artery disease"),
        (r"obesity", "obesity"),
    ])
});

static CHIEF_COMPLAINT: Lazy<Regex> = Lazy::new(|| {
    ci(r"(?:present(?:ing)? with|complaint of|admitted for|scheduled for)\s+([^.!?\n]{5,120})")
});
static DURATION: Lazy<Regex> =
    Lazy::new(|| ci(r"(?:for|over|duration of)\s+((?:\d+\s*)?(?:day|week|month|year)s?)"));

static CT: Lazy<Regex> = Lazy::new(|| ci(r"\bct\b|computed tomography"));
static MRI: Lazy<Regex> = Lazy::new(|| ci(r"\bmri\b"));
static XRAY: Lazy<Regex> = Lazy::new(|| ci(r"x[- ]?ray|cxr|chest x"));
static THORAX: Lazy<Regex> = Lazy::new(|| ci(r"thorax|chest|pulmonary|lung"));
static ABDOMEN: Lazy<Regex> = Lazy::new(|| ci(r"abdomen|abdominal|liver"));
static HEAD: Lazy<Regex> = Lazy::new(|| ci(r"brain|head|neuro"));
static PA_VIEW: Lazy<Regex> = Lazy::new(|| ci(r"\bPA\b|posteroanterior"));
static AP_VIEW: Lazy<Regex> = Lazy::new(|| ci(r"\bAP\b|anteroposterior"));

static DIAGNOSES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    table(&[
        (r"scimitar", "scimitar syndrome"),
        (r"pneumonia", "community-acquired pneumonia"),
        (r"pulmonary embolism|\bPE\b", "pulmonary embolism"),
        (r"lung malignancy|lung cancer|\bNSCLC\b|\bSCLC\b", "lung malignancy"),
        (r"stroke|ischemic", "acute ischemic stroke"),
        (r"heart failure|pulmonary edema", "heart failure"),
        (r"pneumothorax", "pneumothorax"),
        (r"pleural effusion", "pleural effusion"),
        (r"aortic dissection", "aortic dissection"),
    ])
});

static EMERGENT: Lazy<Regex> = Lazy::new(|| ci(r"urgent|emergency|\bstat\b"));
static ROUTINE: Lazy<Regex> = Lazy::new(|| ci(r"routine|elective|scheduled"));
static INFECTIOUS: Lazy<Regex> = Lazy::new(|| ci(r"infection|sepsis|pneumonia|fever"));
static ICU: Lazy<Regex> = Lazy::new(|| ci(r"\bicu\b|intensive care|critical"));

static CONSOLIDATION: Lazy<Regex> = Lazy::new(|| ci(r"consolidat"));
static ATELECTASIS: Lazy<Regex> = Lazy::new(|| ci(r"atelectasis|collapse"));
static EDEMA: Lazy<Regex> = Lazy::new(|| ci(r"edema"));
static EFFUSION: Lazy<Regex> = Lazy::new(|| ci(r"effusion|pleural fluid"));
static PNEUMOTHORAX: Lazy<Regex> = Lazy::new(|| ci(r"pneumothorax"));
static CARDIOMEGALY: Lazy<Regex> = Lazy::new(|| ci(r"cardiomegal|enlarged heart"));

static SMOKING: Lazy<Regex> = Lazy::new(|| {
    ci(r"(?:smok(?:ing|er|es)|tobacco)[^.\n]{0,60}?((?:\d+\s*)?(?:pack[- ]?year|cigarette|cigar|pipe)[^.\n]{0,40})?")
});
static NON_SMOKER: Lazy<Regex> = Lazy::new(|| ci(r"non[- ]?smok|never smoked|no smoking"));
static ALCOHOL: Lazy<Regex> = Lazy::new(|| ci(r"alcohol[^.\n]{0,80}"));
static BMI: Lazy<Regex> = Lazy::new(|| ci(r"BMI\s*(?:of\s*)?(\d{1,2}(?:\.\d)?)"));
static HEIGHT: Lazy<Regex> = Lazy::new(|| ci(r"(\d{1,3})\s*(?:cm|ft|feet|inches?)"));
static BLOOD_TYPE: Lazy<Regex> = Lazy::new(|| {
    ci(r"\b(A|B|AB|O)[+-]?\s*blood\s*type|\bblood\s*type\s*(A|B|AB|O)[+-]?\b")
});
static ETHNICITY: Lazy<Regex> =
    Lazy::new(|| ci(r"(?:ethnicity|race|racial background)\s*[:\-]?\s*([A-Za-z\s\-]+)"));

/// Whole-match snippets: `(field, pattern, max chars)`.
static SNIPPETS: Lazy<Vec<(&'static str, Regex, usize)>> = Lazy::new(|| {
    [
        ("family_history", r"family\s*(?:history|hx)[^.\n]{0,150}", 200),
        (
            "occupation",
            r"(?:occupation|works?\s*as|employed\s*(?:as|at)|profession)[^.\n]{0,80}",
            120,
        ),
        ("vaccination", r"(?:vaccin|immuniz)[^.\n]{0,80}", 120),
        (
            "travel_history",
            r"(?:travel(?:led|ed)?\s*(?:to|from)|recent\s*travel)[^.\n]{0,100}",
            150,
        ),
        (
            "functional_status",
            r"(?:functional status|ADLs?|activities of daily|ambulates?|independent)[^.\n]{0,80}",
            120,
        ),
        (
            "code_status",
            r"(?:code\s*status|full\s*code|DNR|DNI|comfort\s*care)[^.\n]{0,60}",
            80,
        ),
        ("social_history", r"social\s*(?:history|hx)[^.\n]{0,200}", 250),
    ]
    .into_iter()
    .map(|(field, pattern, max)| (field, ci(pattern), max))
    .collect()
});

const HPI_MIN_CHARS: usize = 40;
const HPI_MAX_CHARS: usize = 600;
const INSIGHT_SUMMARY_CHARS: usize = 200;

fn yes_no(flag: bool) -> Option<String> {
    Some(if flag { "yes" } else { "no" }.to_string())
}

fn patient(text: &str, comorbidities: &[String]) -> Patient {
    let sex = if FEMALE.is_match(text) {
        Some("female")
    } else if MALE.is_match(text) {
        Some("male")
    } else {
        None
    };
    let immunocompromised = if IMMUNOCOMPROMISED.is_match(text) {
        yes_no(true)
    } else if !text.trim().is_empty() {
        yes_no(false)
    } else {
        None
    };

    Patient {
        age_years: AGE.captures(text).and_then(|c| c[1].parse().ok()),
        sex: sex.map(str::to_string),
        immunocompromised,
        comorbidities: comorbidities.to_vec(),
        allergies: NO_ALLERGIES
            .is_match(text)
            .then(|| "no known allergies".to_string()),
        ..Patient::default()
    }
}

fn presentation(text: &str, comorbidities: &[String]) -> Presentation {
    Presentation {
        chief_complaint: CHIEF_COMPLAINT
            .captures(text)
            .map(|c| c[1].trim().to_string()),
        symptom_duration: DURATION.captures(text).map(|c| c[1].trim().to_string()),
        hpi: (text.chars().count() > HPI_MIN_CHARS)
            .then(|| clip_chars(text, HPI_MAX_CHARS).to_string()),
        pmh: (!comorbidities.is_empty()).then(|| comorbidities.join(", ")),
    }
}

fn study(text: &str, image_names: &[String]) -> Study {
    let combined = format!("{text} {}", image_names.join(" "));
    let (modality, subtype) = if CT.is_match(&combined) {
        (Some("CT"), Some("ct"))
    } else if MRI.is_match(&combined) {
        (Some("MRI"), Some("mri"))
    } else if XRAY.is_match(&combined) {
        (Some("CXR"), Some("x_ray"))
    } else if !image_names.is_empty() {
        (Some("Imaging"), None)
    } else {
        (None, None)
    };

    let (body_region, radiology_region) = if THORAX.is_match(text) {
        (Some("thorax"), Some("thorax"))
    } else if ABDOMEN.is_match(text) {
        (Some("abdomen"), None)
    } else if HEAD.is_match(text) {
        (Some("head"), None)
    } else {
        (None, None)
    };

    let view_position = if PA_VIEW.is_match(text) {
        Some("PA")
    } else if AP_VIEW.is_match(text) {
        Some("AP")
    } else {
        None
    };

    let owned = |v: Option<&str>| v.map(str::to_string);
    Study {
        modality: owned(modality),
        image_type: modality.map(|_| "radiology".to_string()),
        image_subtype: owned(subtype),
        body_region: owned(body_region),
        radiology_region: owned(radiology_region),
        view_position: owned(view_position),
        ..Study::default()
    }
}

fn assessment(text: &str, comorbidities: &[String]) -> Assessment {
    let diagnosis = DIAGNOSES
        .iter()
        .find(|(pattern, _)| pattern.is_match(text))
        .map(|(_, label)| label.to_string());
    let suspected_primary = diagnosis
        .iter()
        .cloned()
        .chain(comorbidities.iter().take(2).cloned())
        .collect::<Vec<_>>();

    let urgency = if EMERGENT.is_match(text) {
        Some("emergent")
    } else if ROUTINE.is_match(text) {
        Some("routine")
    } else if !text.trim().is_empty() {
        Some("semi-urgent")
    } else {
        None
    };

    Assessment {
        suspected_primary: if diagnosis.is_some() { suspected_primary } else { Vec::new() },
        diagnosis_primary: diagnosis,
        differential: Vec::new(),
        urgency: urgency.map(str::to_string),
        infectious_concern: yes_no(INFECTIOUS.is_match(text)),
        icu_candidate: yes_no(ICU.is_match(text)),
    }
}

/// Flags findings mentioned in the notes or confirmed by the image insight.
fn findings(analysis_text: &str) -> Findings {
    let mut findings = Findings::negative_baseline();
    let flag = |pattern: &Regex| yes_no(pattern.is_match(analysis_text));
    findings.lungs.consolidation_present = flag(&CONSOLIDATION);
    findings.lungs.atelectasis_present = flag(&ATELECTASIS);
    findings.lungs.edema_present = flag(&EDEMA);
    findings.pleura.effusion_present = flag(&EFFUSION);
    findings.pleura.pneumothorax_present = flag(&PNEUMOTHORAX);
    findings.cardiomediastinal.cardiomegaly = flag(&CARDIOMEGALY);
    findings
}

fn summary(profile: &CaseProfile, insight: &str) -> Summary {
    let mut summary = Summary::default();
    if !insight.is_empty() {
        summary.one_liner = Some(clip_with_ellipsis(insight, INSIGHT_SUMMARY_CHARS));
    }

    let diagnosis = profile.assessment.diagnosis_primary.as_deref();
    let complaint = profile.presentation.chief_complaint.as_deref();
    if let (Some(age), Some(sex), Some(presenting)) = (
        profile.patient.age_years.filter(|&a| a > 0),
        profile.patient.sex.as_deref(),
        complaint.or(diagnosis),
    ) {
        let comorbidities = &profile.patient.comorbidities;
        let background = if comorbidities.is_empty() {
            "multiple comorbidities".to_string()
        } else {
            comorbidities.iter().take(3).cloned().collect::<Vec<_>>().join(", ")
        };
        summary.one_liner = Some(format!(
            "{age}-year-old {sex} with {background} presenting with {presenting}."
        ));
    }
    if let Some(diagnosis) = diagnosis {
        summary.key_points = vec![format!("Primary finding: {diagnosis}")];
    }
    summary
}

/// Lifestyle and social details that have no typed slot in the profile.
pub fn extra_fields(text: &str) -> BTreeMap<String, String> {
    let mut extra = BTreeMap::new();
    let mut put = |key: &str, value: String| {
        extra.insert(key.to_string(), value);
    };

    if let Some(caps) = SMOKING.captures(text) {
        let detail = caps.get(1).map(|m| m.as_str().trim()).filter(|d| !d.is_empty());
        put("smoking_status", detail.unwrap_or("smoker").to_string());
    }
    if NON_SMOKER.is_match(text) {
        put("smoking_status", "non-smoker".to_string());
    }
    if let Some(m) = ALCOHOL.find(text) {
        put("alcohol_use", clip_chars(m.as_str().trim(), 120).to_string());
    }

    let bmi = BMI.captures(text).map(|c| c[1].to_string());
    match bmi {
        Some(bmi) => put("bmi", bmi),
        None => {
            if let Some(caps) = HEIGHT.captures(text) {
                let value = &caps[1];
                let unit = caps[0][value.len()..].trim();
                put("height", format!("{value} {unit}"));
            }
        }
    }

    if let Some(caps) = BLOOD_TYPE.captures(text) {
        if let Some(group) = caps.get(1).or_else(|| caps.get(2)) {
            put("blood_type", group.as_str().to_uppercase());
        }
    }
    if let Some(caps) = ETHNICITY.captures(text) {
        put("ethnicity", clip_chars(caps[1].trim(), 60).to_string());
    }
    for (field, pattern, max) in SNIPPETS.iter() {
        if let Some(m) = pattern.find(text) {
            put(field, clip_chars(m.as_str().trim(), *max).to_string());
        }
    }
    extra
}

/// Builds a profile for a new case with fresh ids.
pub fn extract_profile(notes: &str, image_names: &[String], insight: &str) -> CaseProfile {
    let comorbidities: Vec<String> = COMORBIDITIES
        .iter()
        .filter(|(pattern, _)| pattern.is_match(notes))
        .map(|(_, label)| label.to_string())
        .collect();

    let case_id = Uuid::new_v4().to_string();
    let image_id = Uuid::new_v4().to_string();
    let mut profile = CaseProfile {
        profile_id: profile_id(&case_id, &image_id),
        case_id,
        image_id,
        patient: patient(notes, &comorbidities),
        presentation: presentation(notes, &comorbidities),
        study: study(notes, image_names),
        assessment: assessment(notes, &comorbidities),
        findings: findings(&format!("{notes}\n{insight}")),
        extra_fields: extra_fields(notes),
        ..CaseProfile::default()
    };
    profile.summary = summary(&profile, insight);
    profile
}
