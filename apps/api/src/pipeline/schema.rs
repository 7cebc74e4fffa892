//! `extract-schema`: LLM extraction of the flat clinical fields for every
//! article, cached per article so interrupted runs resume.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{progress_bar, read_json, write_json};
use crate::llm_client::json::extract_json_object;
use crate::llm_client::prompts::JSON_ONLY_SYSTEM;
use crate::llm_client::{ChatRequest, LlmError, VisionLanguageModel};
use crate::models::de::split_outside_parens;
use crate::models::dataset::{normalize_view, stable_id};
use crate::models::profile::{
    Assessment, CardiomediastinalFindings, DeviceFindings, Findings, LungFindings, Outcome,
    Patient, PleuraFindings, Presentation, Provenance, Study, Summary, Tags,
};
use crate::models::{CaseRecord, ImageEntry, SchemaExtraction, SourceArticle};

pub const CACHE_DIR: &str = ".cache";
pub const ERRORS_FILE: &str = "errors.json";
pub const DATASET_NAME: &str = "multicare";

const MAX_ATTEMPTS: u32 = 4;
const QUOTA_WAIT: Duration = Duration::from_secs(30);
const PACING: Duration = Duration::from_millis(300);
const EXTRACT_MAX_TOKENS: u32 = 4096;

/// Replace `{abstract}` and `{case_text}`.
pub const EXTRACT_TEMPLATE: &str = r#"You are a medical NLP assistant. Given a clinical case report text and abstract, extract the following fields and return ONLY valid JSON, no markdown, no explanation.

Return exactly this structure (use null for unknown/missing values, use the exact enum strings shown):

{
  "chief_complaint": "<string or null>",
  "symptom_duration": "<string or null>",
  "comorbidities": ["<list of conditions, lowercase, e.g. hypertension, copd, diabetes>"],
  "medications_used": "<string summarising medications or null>",
  "immunocompromised": "unknown | yes | no",
  "clinical_note_hpi": "<1-3 sentence history of present illness or null>",
  "clinical_note_pmh": "<past medical history summary or null>",
  "clinical_note_meds": "<medications string or null>",
  "clinical_note_allergies": "<allergies string or null>",
  "primary_suspected": ["<list of diagnoses, lowercase>"],
  "differential": ["<alternative diagnoses, lowercase>"],
  "infectious_concern": "unknown | yes | no",
  "icu_candidate": "unknown | yes | no",
  "lungs_consolidation_present": "unknown | yes | no",
  "lungs_consolidation_location": ["<e.g. RLL, LUL>"],
  "lungs_consolidation_extent": "mild | moderate | severe | unknown",
  "lungs_atelectasis_present": "unknown | yes | no",
  "lungs_atelectasis_location": [],
  "lungs_edema_present": "unknown | yes | no",
  "lungs_edema_pattern": "interstitial | alveolar | mixed | unknown",
  "pleura_effusion_present": "unknown | yes | no",
  "pleura_effusion_side": "left | right | bilateral | unknown",
  "pleura_effusion_size": "small | moderate | large | unknown",
  "pleura_pneumothorax_present": "unknown | yes | no",
  "pleura_pneumothorax_side": "left | right | bilateral | unknown",
  "cardiomegaly": "unknown | yes | no",
  "mediastinal_widening": "unknown | yes | no",
  "lines_tubes_present": "unknown | yes | no",
  "device_list": ["<e.g. ett, central_line, chest_tube>"],
  "summary_1_2_lines": "<1-2 sentence case summary>",
  "bullets": ["<key finding 1>", "<key finding 2>", "<key finding 3>"],
  "red_flags": ["<string>"],
  "uncertainties": ["<string>"],
  "urgency": "routine | urgent | emergent",
  "outcome_success": "unknown | yes | no",
  "outcome_detail": "<string describing what happened to the patient or null>",
  "ground_truth_diagnosis": "<final confirmed diagnosis or null>",
  "ground_truth_source": "case_text | abstract | unknown"
}

ABSTRACT:
{abstract}

CASE TEXT:
{case_text}"#;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RecordError {
    pub pmc_id: String,
    pub error: String,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ExtractSummary {
    pub records: usize,
    pub cached: usize,
    pub errors: usize,
}

fn or_not_available(text: &str) -> &str {
    if text.trim().is_empty() {
        "Not available"
    } else {
        text
    }
}

pub fn extraction_prompt(abstract_text: &str, case_text: &str) -> String {
    EXTRACT_TEMPLATE
        .replace("{abstract}", or_not_available(abstract_text))
        .replace("{case_text}", or_not_available(case_text))
}

fn backoff(attempt: u32, error: &LlmError) -> Duration {
    if error.is_rate_limit() || error.to_string().to_lowercase().contains("quota") {
        QUOTA_WAIT
    } else {
        Duration::from_secs(1 << attempt)
    }
}

/// Up to four attempts; quota errors wait 30s, everything else backs off
/// exponentially. Exhausted retries yield an empty extraction.
pub async fn extract_fields(
    llm: &dyn VisionLanguageModel,
    abstract_text: &str,
    case_text: &str,
) -> SchemaExtraction {
    let request = ChatRequest::prompt(
        extraction_prompt(abstract_text, case_text),
        Vec::new(),
        EXTRACT_MAX_TOKENS,
    )
    .system(JSON_ONLY_SYSTEM)
    .temperature(0.0);

    for attempt in 0..MAX_ATTEMPTS {
        let wait = match llm.generate(&request).await {
            Ok(text) => match extract_json_object(&text)
                .and_then(|map| serde_json::from_value(Value::Object(map)).ok())
            {
                Some(fields) => return fields,
                None => {
                    debug!("Extraction attempt {} returned no JSON object", attempt + 1);
                    Duration::from_secs(1 << attempt)
                }
            },
            Err(e) => {
                warn!("Extraction attempt {} failed: {e}", attempt + 1);
                backoff(attempt, &e)
            }
        };
        if attempt + 1 < MAX_ATTEMPTS {
            tokio::time::sleep(wait).await;
        }
    }
    SchemaExtraction::default()
}

fn or_unknown(value: &Option<String>) -> Option<String> {
    Some(value.clone().unwrap_or_else(|| "unknown".to_string()))
}

/// Case-level record for one article. Clinical fields come from `fields`,
/// demographics from the first case, images from the export.
pub fn build_record(article: &SourceArticle, fields: &SchemaExtraction) -> CaseRecord {
    let case0 = article.first_case();
    let first_cxr = article.chest_xrays().next().or(article.images.first());
    let first_cxr_entry = first_cxr.map(ImageEntry::from_source);

    let medications = fields
        .medications_used
        .as_deref()
        .or(fields.clinical_note_meds.as_deref())
        .map(split_outside_parens)
        .unwrap_or_default();

    let diagnosis_primary = fields
        .ground_truth_diagnosis
        .clone()
        .or_else(|| fields.primary_suspected.first().cloned());

    let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());

    CaseRecord {
        case_id: stable_id(&article.pmc_id),
        patient: Patient {
            age_years: case0.and_then(|c| c.age),
            sex: Some(
                case0
                    .and_then(|c| c.gender.as_deref())
                    .map(str::to_lowercase)
                    .unwrap_or_else(|| "unknown".to_string()),
            ),
            immunocompromised: or_unknown(&fields.immunocompromised),
            weight_kg: None,
            comorbidities: fields.comorbidities.clone(),
            medications,
            allergies: fields.clinical_note_allergies.clone(),
        },
        presentation: Presentation {
            chief_complaint: fields.chief_complaint.clone(),
            symptom_duration: fields.symptom_duration.clone(),
            hpi: fields.clinical_note_hpi.clone(),
            pmh: fields.clinical_note_pmh.clone(),
        },
        study: Study {
            modality: Some("CXR".to_string()),
            view_position: Some(normalize_view(
                first_cxr.and_then(|img| img.radiology_view.as_deref()),
            )),
            body_region: Some(
                first_cxr
                    .and_then(|img| img.radiology_region.clone())
                    .unwrap_or_else(|| "chest".to_string()),
            ),
            ..Default::default()
        },
        images: article.images.iter().map(ImageEntry::from_source).collect(),
        assessment: Assessment {
            diagnosis_primary,
            suspected_primary: fields.primary_suspected.clone(),
            differential: fields.differential.clone(),
            urgency: Some(fields.urgency.clone().unwrap_or_else(|| "routine".to_string())),
            infectious_concern: or_unknown(&fields.infectious_concern),
            icu_candidate: or_unknown(&fields.icu_candidate),
        },
        findings: Findings {
            lungs: LungFindings {
                consolidation_present: or_unknown(&fields.lungs_consolidation_present),
                consolidation_locations: fields.lungs_consolidation_location.clone(),
                consolidation_extent: or_unknown(&fields.lungs_consolidation_extent),
                atelectasis_present: or_unknown(&fields.lungs_atelectasis_present),
                atelectasis_locations: fields.lungs_atelectasis_location.clone(),
                edema_present: or_unknown(&fields.lungs_edema_present),
                edema_pattern: or_unknown(&fields.lungs_edema_pattern),
            },
            pleura: PleuraFindings {
                effusion_present: or_unknown(&fields.pleura_effusion_present),
                effusion_side: or_unknown(&fields.pleura_effusion_side),
                effusion_size: or_unknown(&fields.pleura_effusion_size),
                pneumothorax_present: or_unknown(&fields.pleura_pneumothorax_present),
                pneumothorax_side: or_unknown(&fields.pleura_pneumothorax_side),
            },
            cardiomediastinal: CardiomediastinalFindings {
                cardiomegaly: or_unknown(&fields.cardiomegaly),
                mediastinal_widening: or_unknown(&fields.mediastinal_widening),
            },
            devices: DeviceFindings {
                lines_tubes_present: or_unknown(&fields.lines_tubes_present),
                device_list: fields.device_list.clone(),
            },
            other: Default::default(),
        },
        summary: Summary {
            one_liner: fields
                .summary_1_2_lines
                .clone()
                .or_else(|| non_empty(&article.abstract_text)),
            key_points: fields.bullets.clone(),
            red_flags: fields.red_flags.clone(),
            uncertainties: fields.uncertainties.clone(),
        },
        outcome: Outcome {
            success: or_unknown(&fields.outcome_success),
            detail: fields.outcome_detail.clone(),
        },
        provenance: Provenance {
            dataset_name: Some(DATASET_NAME.to_string()),
            pmc_id: Some(article.pmc_id.clone()),
            pmid: article.pmid.clone(),
            doi: non_empty(&article.doi),
            article_title: non_empty(&article.title),
            journal: non_empty(&article.journal),
            year: article.year.clone(),
            authors: article.authors.clone(),
            license: non_empty(&article.license),
            source_url: non_empty(&article.link),
        },
        tags: Tags {
            ml_labels: first_cxr_entry.as_ref().map(|e| e.ml_labels.clone()).unwrap_or_default(),
            gt_labels: first_cxr_entry.map(|e| e.gt_labels).unwrap_or_default(),
            keywords: article.keywords.clone(),
            mesh_terms: article.mesh_terms.clone(),
        },
        embeddings: Vec::new(),
    }
}

/// Reads `input` (the build-cxr dataset) and writes the case-level records to
/// `output_dir/dataset.json`; unusable articles go to `errors.json`.
pub async fn extract_schema(
    llm: &dyn VisionLanguageModel,
    input: &Path,
    output_dir: &Path,
) -> Result<ExtractSummary> {
    let articles: Vec<SourceArticle> = read_json(input)?;
    let cache_dir = output_dir.join(CACHE_DIR);
    tokio::fs::create_dir_all(&cache_dir)
        .await
        .with_context(|| format!("Failed to create {}", cache_dir.display()))?;

    info!("Extracting schema fields for {} articles", articles.len());
    let mut summary = ExtractSummary::default();
    let mut records = Vec::with_capacity(articles.len());
    let mut errors = Vec::new();
    let bar = progress_bar(articles.len() as u64, "Extracting");

    for article in &articles {
        bar.inc(1);
        if article.pmc_id.is_empty() {
            errors.push(RecordError {
                pmc_id: String::new(),
                error: "Article has no PMC id".to_string(),
            });
            continue;
        }

        let cache_file = cache_dir.join(format!("{}.json", article.pmc_id));
        let fields = if cache_file.exists() {
            summary.cached += 1;
            match tokio::fs::read(&cache_file)
                .await
                .map_err(anyhow::Error::from)
                .and_then(|raw| Ok(serde_json::from_slice::<SchemaExtraction>(&raw)?))
            {
                Ok(fields) => fields,
                Err(e) => {
                    errors.push(RecordError {
                        pmc_id: article.pmc_id.clone(),
                        error: format!("Unreadable cache entry: {e}"),
                    });
                    continue;
                }
            }
        } else {
            let case_text = article.first_case().map_or("", |c| c.case_text.as_str());
            let fields = extract_fields(llm, &article.abstract_text, case_text).await;
            if fields.is_empty() {
                warn!("No fields extracted for {}", article.pmc_id);
            }
            tokio::fs::write(&cache_file, serde_json::to_vec(&fields)?)
                .await
                .with_context(|| format!("Failed to write {}", cache_file.display()))?;
            tokio::time::sleep(PACING).await;
            fields
        };

        records.push(build_record(article, &fields));
    }
    bar.finish_and_clear();

    let output = output_dir.join(super::cxr_dataset::DATASET_FILE);
    write_json(&output, &records)?;
    summary.records = records.len();
    summary.errors = errors.len();
    if !errors.is_empty() {
        let path = output_dir.join(ERRORS_FILE);
        write_json(&path, &errors)?;
        warn!("{} errors written to {}", errors.len(), path.display());
    }
    info!("Wrote {} records to {}", summary.records, output.display());
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::models::{SourceCase, SourceImage};

    struct Scripted {
        replies: Mutex<Vec<Result<String, LlmError>>>,
        calls: Mutex<usize>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, LlmError>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl VisionLanguageModel for Scripted {
        async fn generate(&self, _request: &ChatRequest) -> Result<String, LlmError> {
            *self.calls.lock().unwrap() += 1;
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(LlmError::EmptyContent);
            }
            replies.remove(0)
        }
    }

    fn article() -> SourceArticle {
        SourceArticle {
            pmc_id: "PMC42".into(),
            title: "Empyema after pneumonia".into(),
            year: Some("2019".into()),
            link: "https://www.ncbi.nlm.nih.gov/pmc/articles/PMC42".into(),
            keywords: vec!["empyema".into()],
            abstract_text: "We report a case of empyema.".into(),
            cases: vec![SourceCase {
                case_id: "PMC42_01".into(),
                age: Some(61),
                gender: Some("Male".into()),
                case_text: "A 61-year-old man with fever.".into(),
            }],
            images: vec![
                SourceImage {
                    file_id: "ct".into(),
                    file: "PMC42_ct.jpg".into(),
                    image_subtype: "ct".into(),
                    ..Default::default()
                },
                SourceImage {
                    file_id: "cxr".into(),
                    file: "PMC42_cxr.webp".into(),
                    image_subtype: "x_ray".into(),
                    is_chest_xray: true,
                    radiology_view: Some("frontal".into()),
                    ml_labels: "['x_ray']".into(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_prompt_defaults_missing_text() {
        let prompt = extraction_prompt("", "case text");
        assert!(prompt.contains("ABSTRACT:\nNot available"));
        assert!(prompt.contains("CASE TEXT:\ncase text"));
    }

    #[test]
    fn test_build_record_maps_fields() {
        let fields: SchemaExtraction = serde_json::from_value(serde_json::json!({
            "chief_complaint": "fever",
            "medications_used": "amoxicillin (500 mg, tid), paracetamol",
            "primary_suspected": ["pneumonia"],
            "ground_truth_diagnosis": "empyema",
            "pleura_effusion_present": "yes",
            "bullets": ["loculated effusion"]
        }))
        .unwrap();

        let record = build_record(&article(), &fields);
        assert_eq!(record.case_id, stable_id("PMC42"));
        assert_eq!(record.patient.sex.as_deref(), Some("male"));
        assert_eq!(record.patient.age_years, Some(61));
        assert_eq!(
            record.patient.medications,
            vec!["amoxicillin (500 mg, tid)", "paracetamol"]
        );
        assert_eq!(record.study.view_position.as_deref(), Some("PA"));
        assert_eq!(record.study.body_region.as_deref(), Some("chest"));
        assert_eq!(record.images.len(), 2);
        assert_eq!(record.assessment.diagnosis_primary.as_deref(), Some("empyema"));
        assert_eq!(record.assessment.urgency.as_deref(), Some("routine"));
        assert_eq!(record.findings.pleura.effusion_present.as_deref(), Some("yes"));
        assert_eq!(record.findings.lungs.edema_present.as_deref(), Some("unknown"));
        assert_eq!(record.tags.ml_labels, vec!["x_ray"]);
        assert_eq!(record.provenance.dataset_name.as_deref(), Some("multicare"));
        assert_eq!(record.provenance.doi, None);
    }

    #[test]
    fn test_empty_extraction_falls_back_to_abstract() {
        let record = build_record(&article(), &SchemaExtraction::default());
        assert_eq!(
            record.summary.one_liner.as_deref(),
            Some("We report a case of empyema.")
        );
        assert_eq!(record.patient.immunocompromised.as_deref(), Some("unknown"));
        assert_eq!(record.assessment.diagnosis_primary, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extract_fields_retries_then_gives_up() {
        let llm = Scripted::new(vec![
            Err(LlmError::RateLimited { retries: 3 }),
            Ok("not json".into()),
            Ok("```json\n{\"chief_complaint\": \"cough\"}\n```".into()),
        ]);
        let fields = extract_fields(&llm, "a", "b").await;
        assert_eq!(fields.chief_complaint.as_deref(), Some("cough"));
        assert_eq!(*llm.calls.lock().unwrap(), 3);

        let failing = Scripted::new(Vec::new());
        assert!(extract_fields(&failing, "a", "b").await.is_empty());
        assert_eq!(*failing.calls.lock().unwrap(), MAX_ATTEMPTS as usize);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extract_schema_uses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("source.json");
        let mut second = article();
        second.pmc_id = "PMC43".into();
        write_json(&input, &vec![article(), second]).unwrap();

        let cache_dir = dir.path().join(CACHE_DIR);
        std::fs::create_dir_all(&cache_dir).unwrap();
        std::fs::write(cache_dir.join("PMC42.json"), r#"{"chief_complaint": "cached"}"#).unwrap();

        let llm = Scripted::new(vec![Ok(r#"{"chief_complaint": "fresh"}"#.into())]);
        let summary = extract_schema(&llm, &input, dir.path()).await.unwrap();
        assert_eq!(summary.records, 2);
        assert_eq!(summary.cached, 1);
        assert_eq!(*llm.calls.lock().unwrap(), 1);

        let records: Vec<CaseRecord> = read_json(&dir.path().join("dataset.json")).unwrap();
        assert_eq!(records[0].presentation.chief_complaint.as_deref(), Some("cached"));
        assert_eq!(records[1].presentation.chief_complaint.as_deref(), Some("fresh"));
        assert!(cache_dir.join("PMC43.json").exists());
        assert!(!dir.path().join(ERRORS_FILE).exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupt_cache_entry_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("source.json");
        write_json(&input, &vec![article()]).unwrap();
        let cache_dir = dir.path().join(CACHE_DIR);
        std::fs::create_dir_all(&cache_dir).unwrap();
        std::fs::write(cache_dir.join("PMC42.json"), "{broken").unwrap();

        let llm = Scripted::new(Vec::new());
        let summary = extract_schema(&llm, &input, dir.path()).await.unwrap();
        assert_eq!(summary.records, 0);
        assert_eq!(summary.errors, 1);
        let errors: Vec<serde_json::Value> = read_json(&dir.path().join(ERRORS_FILE)).unwrap();
        assert_eq!(errors[0]["pmc_id"], "PMC42");
    }
}
