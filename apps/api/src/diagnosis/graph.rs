//! The diagnosis graph: load case → load images → initial diagnosis → bias
//! check → alternative hypotheses → final report, run in that fixed order.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::parse::{parse_alternatives, parse_initial};
use super::prompts::{
    case_task, ALTERNATIVES_TASK_TEMPLATE, BIAS_TASK_TEMPLATE, DIAGNOSIS_SYSTEM, INITIAL_TASK,
    STRICT_INITIAL_TASK,
};
use super::report::final_report;
use super::state::{CaseImage, DiagnosisState, InitialDiagnosis};
use super::DiagnosisError;
use crate::llm_client::{ChatRequest, InlineImage, VisionLanguageModel};
use crate::models::CaseRecord;
use crate::text::clip_chars;

const INITIAL_ATTEMPTS: usize = 2;
const DIAGNOSIS_MAX_TOKENS: u32 = 2048;
const BIAS_MAX_TOKENS: u32 = 1024;
const TEMPERATURE: f32 = 0.3;
pub const BIAS_EXCERPT_CHARS: usize = 800;

pub struct DiagnosisGraph {
    llm: Arc<dyn VisionLanguageModel>,
    dataset_path: PathBuf,
    images_path: PathBuf,
}

impl DiagnosisGraph {
    pub fn new(
        llm: Arc<dyn VisionLanguageModel>,
        dataset_path: impl Into<PathBuf>,
        images_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            llm,
            dataset_path: dataset_path.into(),
            images_path: images_path.into(),
        }
    }

    pub async fn run(&self, case_id: &str) -> Result<DiagnosisState, DiagnosisError> {
        let mut state = DiagnosisState::new(case_id);
        self.load_case(&mut state).await?;
        self.load_images(&mut state).await;
        self.initial_diagnosis(&mut state).await?;
        self.bias_check(&mut state).await?;
        self.alternative_hypotheses(&mut state).await?;
        state.final_report = Some(final_report(&state));
        info!("Final report compiled for case {case_id}");
        Ok(state)
    }

    async fn load_case(&self, state: &mut DiagnosisState) -> Result<(), DiagnosisError> {
        if !self.dataset_path.exists() {
            return Err(DiagnosisError::DatasetMissing(self.dataset_path.clone()));
        }
        let raw = tokio::fs::read(&self.dataset_path).await?;
        let dataset: Value = serde_json::from_slice(&raw)?;
        state.case = find_case(dataset, &state.case_id)?;
        info!(
            "Loaded case: {}",
            state.case.provenance.article_title.as_deref().unwrap_or("untitled")
        );
        Ok(())
    }

    /// Unreadable or missing image files are skipped.
    async fn load_images(&self, state: &mut DiagnosisState) {
        let mut images = Vec::new();
        for entry in &state.case.images {
            let path = self.images_path.join(&entry.local_image_path);
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Image not found or unreadable: {} ({e})", path.display());
                    continue;
                }
            };
            debug!("Loaded image: {} ({})", entry.image_subtype, entry.image_id);
            images.push(CaseImage {
                image_id: entry.image_id.clone(),
                image: InlineImage::new(entry.mime_type(), bytes),
                caption: entry.caption.clone(),
                subtype: if entry.image_subtype.is_empty() {
                    "unknown".to_string()
                } else {
                    entry.image_subtype.clone()
                },
                image_type: entry.image_type.clone(),
            });
        }
        state.images = images;
    }

    async fn call(
        &self,
        prompt: String,
        images: &[CaseImage],
        max_tokens: u32,
    ) -> Result<String, DiagnosisError> {
        let request = ChatRequest::prompt(prompt, images.iter().map(|i| i.image.clone()), max_tokens)
            .system(DIAGNOSIS_SYSTEM)
            .temperature(TEMPERATURE);
        Ok(self.llm.generate(&request).await?)
    }

    async fn initial_diagnosis(&self, state: &mut DiagnosisState) -> Result<(), DiagnosisError> {
        let mut parsed: Option<InitialDiagnosis> = None;
        let mut response = String::new();

        for (attempt, task) in [INITIAL_TASK, STRICT_INITIAL_TASK]
            .into_iter()
            .take(INITIAL_ATTEMPTS)
            .enumerate()
        {
            let prompt = case_task(&state.case, &state.images, task);
            response = self.call(prompt, &state.images, DIAGNOSIS_MAX_TOKENS).await?;
            debug!("Initial diagnosis attempt {} ({} chars)", attempt + 1, response.len());

            parsed = parse_initial(&response);
            if parsed.as_ref().is_some_and(InitialDiagnosis::is_usable) {
                info!("Initial diagnosis parsed on attempt {}", attempt + 1);
                break;
            }
            warn!("Initial diagnosis attempt {} did not parse", attempt + 1);
        }

        let diagnosis = parsed.unwrap_or_else(|| {
            warn!("Storing raw initial diagnosis response");
            InitialDiagnosis::raw(response)
        });
        info!(
            "Initial diagnosis: {}",
            diagnosis
                .primary()
                .and_then(|p| p.condition.as_deref())
                .unwrap_or("unknown")
        );
        state.initial_diagnosis = Some(diagnosis);
        Ok(())
    }

    fn initial_json(state: &DiagnosisState) -> String {
        state
            .initial_diagnosis
            .as_ref()
            .map(InitialDiagnosis::to_prompt_json)
            .unwrap_or_else(|| "{}".to_string())
    }

    /// Text-only: the audit reasons over the case and the first diagnosis.
    async fn bias_check(&self, state: &mut DiagnosisState) -> Result<(), DiagnosisError> {
        let task = BIAS_TASK_TEMPLATE.replace("{initial}", &Self::initial_json(state));
        let prompt = case_task(&state.case, &[], &task);
        let notes = self.call(prompt, &[], BIAS_MAX_TOKENS).await?;
        info!("Bias check completed ({} chars)", notes.len());
        state.bias_notes = Some(notes);
        Ok(())
    }

    async fn alternative_hypotheses(&self, state: &mut DiagnosisState) -> Result<(), DiagnosisError> {
        let bias = state
            .bias_notes
            .as_deref()
            .filter(|notes| !notes.is_empty())
            .map_or("N/A", |notes| clip_chars(notes, BIAS_EXCERPT_CHARS));
        let task = ALTERNATIVES_TASK_TEMPLATE
            .replace("{initial}", &Self::initial_json(state))
            .replace("{bias_notes}", bias);
        let prompt = case_task(&state.case, &state.images, &task);
        let response = self.call(prompt, &state.images, DIAGNOSIS_MAX_TOKENS).await?;

        state.alternatives = parse_alternatives(&response);
        info!("Generated {} alternative hypotheses", state.alternatives.len());
        Ok(())
    }
}

/// Finds a case in a dataset that is either an array of records or an object
/// keyed by case id.
pub fn find_case(dataset: Value, case_id: &str) -> Result<CaseRecord, DiagnosisError> {
    let found = match dataset {
        Value::Array(records) => records
            .into_iter()
            .find(|record| record.get("case_id").and_then(Value::as_str) == Some(case_id)),
        Value::Object(mut by_id) => by_id.remove(case_id),
        _ => None,
    };
    let record = found.ok_or_else(|| DiagnosisError::NotFound(case_id.to_string()))?;
    let mut case: CaseRecord = serde_json::from_value(record)?;
    if case.case_id.is_empty() {
        case.case_id = case_id.to_string();
    }
    Ok(case)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::llm_client::LlmError;

    struct Scripted {
        replies: Mutex<Vec<&'static str>>,
        image_counts: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl VisionLanguageModel for Scripted {
        async fn generate(&self, request: &ChatRequest) -> Result<String, LlmError> {
            self.image_counts
                .lock()
                .unwrap()
                .push(request.messages[0].images.len());
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(LlmError::EmptyContent);
            }
            Ok(replies.remove(0).to_string())
        }
    }

    #[test]
    fn test_find_case_in_array_and_map() {
        let array = json!([{"case_id": "a"}, {"case_id": "b", "patient": {"age_years": 40}}]);
        assert_eq!(find_case(array, "b").unwrap().patient.age_years, Some(40));

        let keyed = json!({"c": {"patient": {"sex": "female"}}});
        let case = find_case(keyed, "c").unwrap();
        assert_eq!(case.case_id, "c");

        let missing = find_case(json!([]), "zzz");
        assert!(matches!(missing, Err(DiagnosisError::NotFound(id)) if id == "zzz"));
    }

    #[tokio::test]
    async fn test_run_full_graph() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("cxr.png"), [1u8, 2, 3]).unwrap();
        let dataset = json!([{
            "case_id": "case-1",
            "patient": {"age_years": 70, "sex": "female"},
            "images": [
                {"image_id": "i1", "local_image_path": "cxr.png", "file_type": "png", "image_subtype": "x_ray"},
                {"image_id": "i2", "local_image_path": "gone.webp", "file_type": "webp"}
            ],
            "assessment": {"diagnosis_primary": "Pleural effusion"}
        }]);
        let dataset_path = dir.path().join("dataset.json");
        std::fs::write(&dataset_path, dataset.to_string()).unwrap();

        let llm = Arc::new(Scripted {
            replies: Mutex::new(vec![
                "I think it is fluid.",
                r#"{"acute_complication": {"condition": "Pleural effusion", "confidence": 80}, "differentials": [{"condition": "Empyema", "confidence": 15}]}"#,
                "Anchoring on the effusion may hide malignancy.",
                r#"[{"condition": "Mesothelioma", "risk_if_missed": "critical"}]"#,
            ]),
            image_counts: Mutex::new(Vec::new()),
        });
        let graph = DiagnosisGraph::new(llm.clone(), &dataset_path, dir.path());
        let state = graph.run("case-1").await.unwrap();

        assert_eq!(state.images.len(), 1);
        assert_eq!(state.images[0].image.mime, "image/png");
        assert_eq!(state.differentials().len(), 1);
        assert_eq!(state.alternatives[0].condition.as_deref(), Some("Mesothelioma"));
        // two initial attempts and the alternatives carry the image; the bias audit does not
        assert_eq!(*llm.image_counts.lock().unwrap(), vec![1, 1, 0, 1]);
        let report = state.final_report.unwrap();
        assert!(report.contains("Condition:   Pleural effusion"));
        assert!(report.contains("Mesothelioma (Risk if missed: CRITICAL)"));
    }

    #[tokio::test]
    async fn test_missing_dataset() {
        let llm = Arc::new(Scripted {
            replies: Mutex::new(Vec::new()),
            image_counts: Mutex::new(Vec::new()),
        });
        let graph = DiagnosisGraph::new(llm, "/nonexistent/dataset.json", ".");
        assert!(matches!(
            graph.run("x").await,
            Err(DiagnosisError::DatasetMissing(_))
        ));
    }
}
