//! Multi-turn chat about a diagnosed case.

use std::sync::Arc;

use serde::Serialize;

use super::prompts::chat_context;
use super::state::{ConditionCall, DiagnosisState, InitialDiagnosis};
use crate::llm_client::{ChatMessage, ChatRequest, LlmError, VisionLanguageModel};

const HISTORY_TURNS: usize = 6;
const MAX_CHAT_IMAGES: usize = 4;
const CHAT_MAX_TOKENS: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RankKind {
    Primary,
    Differential,
    Alternative,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RankedDiagnosis {
    pub rank: usize,
    pub condition: String,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(rename = "type")]
    pub kind: RankKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_if_missed: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosisSummary {
    pub primary: Option<ConditionCall>,
    pub ranked_list: Vec<RankedDiagnosis>,
    pub ground_truth: String,
}

pub struct CaseChat {
    llm: Arc<dyn VisionLanguageModel>,
    state: DiagnosisState,
    history: Vec<ChatMessage>,
}

impl CaseChat {
    pub fn new(llm: Arc<dyn VisionLanguageModel>, state: DiagnosisState) -> Self {
        Self {
            llm,
            state,
            history: Vec::new(),
        }
    }

    fn diagnosis(&self) -> InitialDiagnosis {
        self.state.initial_diagnosis.clone().unwrap_or_default()
    }

    /// Asks about the case with the last six history turns as context.
    /// `include_images` attaches up to four case images to the question.
    pub async fn ask(&mut self, question: &str, include_images: bool) -> Result<String, LlmError> {
        let system = chat_context(&self.state.case, &self.diagnosis().to_prompt_json());

        let mut question_message = ChatMessage::user(question);
        if include_images {
            question_message = question_message.with_images(
                self.state
                    .images
                    .iter()
                    .take(MAX_CHAT_IMAGES)
                    .map(|i| i.image.clone()),
            );
        }

        let recent = self.history.len().saturating_sub(HISTORY_TURNS);
        let mut request = ChatRequest::new(CHAT_MAX_TOKENS).system(system).temperature(0.3);
        for turn in &self.history[recent..] {
            request = request.message(turn.clone());
        }
        request = request.message(question_message);

        let reply = self.llm.generate(&request).await?;
        self.history.push(ChatMessage::user(question));
        self.history.push(ChatMessage::assistant(reply.clone()));
        Ok(reply)
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Primary, differentials and alternatives as one ranked list.
    pub fn diagnosis_summary(&self) -> DiagnosisSummary {
        let diagnosis = self.diagnosis();
        let primary = diagnosis.primary().cloned();

        let mut ranked = Vec::new();
        if let Some(call) = &primary {
            ranked.push(RankedDiagnosis {
                rank: 1,
                condition: call.condition.clone().unwrap_or_default(),
                confidence: call.confidence.unwrap_or(0.0),
                reasoning: call.reasoning.clone().unwrap_or_default(),
                kind: RankKind::Primary,
                risk_if_missed: None,
            });
        }

        // Differentials are numbered from 2 whether or not a primary exists.
        for (i, diff) in diagnosis.differentials.iter().enumerate() {
            ranked.push(RankedDiagnosis {
                rank: i + 2,
                condition: diff.condition.clone().unwrap_or_else(|| "Unknown".to_string()),
                confidence: diff.confidence.unwrap_or(0.0),
                reasoning: diff
                    .supporting_evidence
                    .iter()
                    .take(2)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join("; "),
                kind: RankKind::Differential,
                risk_if_missed: None,
            });
        }

        for alt in &self.state.alternatives {
            let Some(condition) = alt.condition.clone() else {
                continue;
            };
            ranked.push(RankedDiagnosis {
                rank: ranked.len() + 1,
                condition,
                confidence: alt.confidence.unwrap_or(0.0),
                reasoning: alt.why_missed.clone().unwrap_or_default(),
                kind: RankKind::Alternative,
                risk_if_missed: Some(alt.risk_if_missed.clone().unwrap_or_else(|| "unknown".to_string())),
            });
        }

        DiagnosisSummary {
            primary,
            ranked_list: ranked,
            ground_truth: self
                .state
                .case
                .assessment
                .diagnosis_primary
                .clone()
                .unwrap_or_else(|| "N/A".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::diagnosis::state::{Alternative, CaseImage, Differential};
    use crate::llm_client::{InlineImage, Role};

    #[derive(Default)]
    struct Recorder {
        requests: Mutex<Vec<ChatRequest>>,
    }

    #[async_trait]
    impl VisionLanguageModel for Recorder {
        async fn generate(&self, request: &ChatRequest) -> Result<String, LlmError> {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            Ok(format!("answer {}", requests.len()))
        }
    }

    fn diagnosed() -> DiagnosisState {
        let mut state = DiagnosisState::new("c1");
        state.case.assessment.diagnosis_primary = Some("Pneumonia".into());
        state.initial_diagnosis = Some(InitialDiagnosis {
            acute_complication: Some(ConditionCall {
                condition: Some("Lobar pneumonia".into()),
                confidence: Some(70.0),
                ..Default::default()
            }),
            differentials: vec![Differential {
                condition: Some("Aspiration".into()),
                confidence: Some(20.0),
                supporting_evidence: vec!["dysphagia".into()],
                ..Default::default()
            }],
            ..Default::default()
        });
        state.alternatives = vec![Alternative {
            condition: Some("Lung abscess".into()),
            why_missed: Some("early stage".into()),
            ..Default::default()
        }];
        state.images = (0..6)
            .map(|i| CaseImage {
                image_id: format!("i{i}"),
                image: InlineImage::new("image/jpeg", vec![i as u8]),
                caption: String::new(),
                subtype: "x_ray".into(),
                image_type: "radiology".into(),
            })
            .collect();
        state
    }

    #[test]
    fn test_summary_ranks_everything() {
        let chat = CaseChat::new(Arc::new(Recorder::default()), diagnosed());
        let summary = chat.diagnosis_summary();
        assert_eq!(summary.ground_truth, "Pneumonia");
        let ranks: Vec<_> = summary
            .ranked_list
            .iter()
            .map(|r| (r.rank, r.condition.as_str(), r.kind))
            .collect();
        assert_eq!(
            ranks,
            vec![
                (1, "Lobar pneumonia", RankKind::Primary),
                (2, "Aspiration", RankKind::Differential),
                (3, "Lung abscess", RankKind::Alternative),
            ]
        );
        assert_eq!(summary.ranked_list[2].risk_if_missed.as_deref(), Some("unknown"));
    }

    #[tokio::test]
    async fn test_ask_keeps_recent_history() {
        let llm = Arc::new(Recorder::default());
        let mut chat = CaseChat::new(llm.clone(), diagnosed());
        for i in 0..5 {
            chat.ask(&format!("q{i}"), false).await.unwrap();
        }
        assert_eq!(chat.history_len(), 10);

        let reply = chat.ask("show me", true).await.unwrap();
        assert_eq!(reply, "answer 6");
        let requests = llm.requests.lock().unwrap();
        let last = requests.last().unwrap();
        assert_eq!(last.messages.len(), HISTORY_TURNS + 1);
        assert_eq!(last.messages[0].role, Role::User);
        assert_eq!(last.messages[0].text, "q2");
        assert_eq!(last.messages.last().unwrap().images.len(), MAX_CHAT_IMAGES);
        assert!(last.system.as_deref().unwrap().contains("Lobar pneumonia"));
    }

    #[tokio::test]
    async fn test_clear_history() {
        let mut chat = CaseChat::new(Arc::new(Recorder::default()), diagnosed());
        chat.ask("q", false).await.unwrap();
        chat.clear_history();
        assert_eq!(chat.history_len(), 0);
    }
}
