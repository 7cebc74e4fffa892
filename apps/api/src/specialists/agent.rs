//! Two-stage physician finder: a researcher that drives the web tools in a
//! bounded JSON turn loop, then an extractor that structures its report.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::prompts::{EXTRACT_TEMPLATE, INVALID_TURN, RESEARCHER_SYSTEM_TEMPLATE, RESEARCH_TASK_TEMPLATE};
use super::tools::WebTools;
use crate::llm_client::json::{extract_json_array, extract_json_object};
use crate::llm_client::{strip_json_fences, ChatMessage, ChatRequest, VisionLanguageModel};

pub const MAX_ITERATIONS: usize = 8;
pub const MAX_SPECIALISTS: usize = 5;
const AGENT_MAX_TOKENS: u32 = 2048;
const AGENT_TEMPERATURE: f32 = 0.1;

/// What the agents are asked to research.
#[derive(Debug, Clone)]
pub struct ResearchBrief {
    pub url: String,
    pub diagnosis: String,
    pub hospital_name: String,
    pub location: String,
}

impl ResearchBrief {
    /// Host part of the hospital URL, or the hospital name without one.
    pub fn domain(&self) -> &str {
        if self.url.contains("://") {
            if let Some(host) = self.url.split('/').nth(2) {
                return host;
            }
        }
        &self.hospital_name
    }

    fn fill(&self, template: &str) -> String {
        template
            .replace("{hospital_name}", &self.hospital_name)
            .replace("{diagnosis}", &self.diagnosis)
            .replace("{hospital_domain}", self.domain())
            .replace("{location}", &self.location)
            .replace("{url}", &self.url)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Specialist {
    pub name: String,
    pub specialty: String,
    pub credentials: String,
    pub context: String,
    pub url: String,
    pub phone: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Search,
    Read,
    Finish,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentTurn {
    #[serde(default)]
    pub thought: String,
    pub action: Action,
    #[serde(default)]
    pub input: String,
}

/// Parses a researcher reply, tolerating fences and surrounding prose.
pub fn parse_turn(reply: &str) -> Option<AgentTurn> {
    if let Ok(turn) = serde_json::from_str(strip_json_fences(reply)) {
        return Some(turn);
    }
    extract_json_object(reply).and_then(|map| serde_json::from_value(Value::Object(map)).ok())
}

/// Runs the researcher until it finishes or the iteration budget is spent.
/// On exhaustion the collected observations become the report.
pub async fn research(
    llm: &dyn VisionLanguageModel,
    tools: &dyn WebTools,
    brief: &ResearchBrief,
) -> Result<String> {
    let mut request = ChatRequest::new(AGENT_MAX_TOKENS)
        .system(brief.fill(RESEARCHER_SYSTEM_TEMPLATE))
        .temperature(AGENT_TEMPERATURE)
        .message(ChatMessage::user(brief.fill(RESEARCH_TASK_TEMPLATE)));
    let mut observations: Vec<String> = Vec::new();

    for iteration in 1..=MAX_ITERATIONS {
        let reply = llm
            .generate(&request)
            .await
            .with_context(|| format!("researcher turn {iteration}"))?;
        request = request.message(ChatMessage::assistant(reply.clone()));

        let Some(turn) = parse_turn(&reply) else {
            warn!("Researcher turn {iteration} was not a valid action");
            request = request.message(ChatMessage::user(INVALID_TURN));
            continue;
        };
        debug!("Researcher turn {iteration}: {:?} ({})", turn.action, turn.thought);

        let observation = match turn.action {
            Action::Finish => {
                info!("Researcher finished after {iteration} turns");
                return Ok(turn.input);
            }
            Action::Search => tools.search(&turn.input).await,
            Action::Read => tools.read(&turn.input).await,
        };
        observations.push(observation.clone());
        request = request.message(ChatMessage::user(format!("Observation:\n{observation}")));
    }

    warn!("Researcher hit the {MAX_ITERATIONS}-turn limit, using raw observations");
    if observations.is_empty() {
        bail!("researcher produced no observations");
    }
    Ok(observations.join("\n\n"))
}

/// Structures a research report into at most five specialists.
pub async fn extract_specialists(
    llm: &dyn VisionLanguageModel,
    brief: &ResearchBrief,
    report: &str,
) -> Result<Vec<Specialist>> {
    let prompt = brief.fill(EXTRACT_TEMPLATE).replace("{report}", report);
    let request = ChatRequest::prompt(prompt, Vec::new(), AGENT_MAX_TOKENS).temperature(AGENT_TEMPERATURE);
    let reply = llm.generate(&request).await.context("extractor call")?;
    parse_specialists(&reply)
}

pub fn parse_specialists(reply: &str) -> Result<Vec<Specialist>> {
    let mut specialists: Vec<Specialist> = match serde_json::from_str(strip_json_fences(reply)) {
        Ok(list) => list,
        Err(_) => {
            let items = extract_json_array(reply)
                .ok_or_else(|| anyhow!("extractor reply contained no JSON array"))?;
            serde_json::from_value(Value::Array(items)).context("extractor array shape")?
        }
    };
    specialists.truncate(MAX_SPECIALISTS);
    Ok(specialists)
}

pub async fn analyze_hospital_staff(
    llm: &dyn VisionLanguageModel,
    tools: &dyn WebTools,
    brief: &ResearchBrief,
) -> Result<Vec<Specialist>> {
    info!(
        "Specialist agents starting for '{}' | diagnosis: '{}'",
        brief.hospital_name, brief.diagnosis
    );
    let report = research(llm, tools, brief).await?;
    extract_specialists(llm, brief, &report).await
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::llm_client::LlmError;

    struct Scripted {
        replies: Mutex<Vec<String>>,
        seen: Mutex<Vec<usize>>,
    }

    impl Scripted {
        fn new(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().rev().map(|r| r.to_string()).collect()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl VisionLanguageModel for Scripted {
        async fn generate(&self, request: &ChatRequest) -> Result<String, LlmError> {
            self.seen.lock().unwrap().push(request.messages.len());
            self.replies.lock().unwrap().pop().ok_or(LlmError::EmptyContent)
        }
    }

    struct FakeTools;

    #[async_trait]
    impl WebTools for FakeTools {
        async fn search(&self, query: &str) -> String {
            format!("[SCORE:3]\nTITLE: results for {query}\nURL: https://h.org/doctor/lee\nCONTENT: Dr. Lee, MD\n")
        }

        async fn read(&self, url: &str) -> String {
            format!("page {url}")
        }
    }

    fn brief() -> ResearchBrief {
        ResearchBrief {
            url: "https://www.mayoclinic.org/departments".into(),
            diagnosis: "sarcoidosis".into(),
            hospital_name: "Mayo Clinic".into(),
            location: "Rochester, MN".into(),
        }
    }

    #[test]
    fn test_domain_from_url_or_name() {
        assert_eq!(brief().domain(), "www.mayoclinic.org");
        let mut b = brief();
        b.url = "mayoclinic".into();
        assert_eq!(b.domain(), "Mayo Clinic");
    }

    #[test]
    fn test_parse_turn_with_prose() {
        let turn = parse_turn("Sure.\n{\"thought\": \"t\", \"action\": \"read\", \"input\": \"https://x\"}").unwrap();
        assert_eq!(turn.action, Action::Read);
        assert_eq!(turn.input, "https://x");
        assert!(parse_turn("{\"action\": \"dance\"}").is_none());
    }

    #[test]
    fn test_parse_specialists_truncates() {
        let item = r#"{"name": "Dr. A", "specialty": "Pulm"}"#;
        let reply = format!("```json\n[{}]\n```", vec![item; 7].join(","));
        let list = parse_specialists(&reply).unwrap();
        assert_eq!(list.len(), MAX_SPECIALISTS);
        assert_eq!(list[0].phone, "");
    }

    #[tokio::test]
    async fn test_research_loop_feeds_observations() {
        let llm = Scripted::new(&[
            r#"{"thought": "look", "action": "search", "input": "mayo sarcoidosis"}"#,
            "not json at all",
            r#"{"thought": "done", "action": "finish", "input": "Dr. Lee, MD, pulmonology"}"#,
        ]);
        let report = research(&llm, &FakeTools, &brief()).await.unwrap();
        assert_eq!(report, "Dr. Lee, MD, pulmonology");
        // task; +reply +observation; +reply +correction
        assert_eq!(*llm.seen.lock().unwrap(), vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn test_research_exhaustion_uses_observations() {
        let turn = r#"{"thought": "more", "action": "read", "input": "https://h.org"}"#;
        let llm = Scripted::new(&[turn; MAX_ITERATIONS]);
        let report = research(&llm, &FakeTools, &brief()).await.unwrap();
        assert_eq!(report.matches("page https://h.org").count(), MAX_ITERATIONS);
    }

    #[tokio::test]
    async fn test_analyze_end_to_end() {
        let llm = Scripted::new(&[
            r#"{"thought": "done", "action": "finish", "input": "Dr. Lee"}"#,
            r#"[{"name": "Dr. Lee", "specialty": "Pulmonology", "credentials": "MD", "context": "c", "url": "u", "phone": ""}]"#,
        ]);
        let list = analyze_hospital_staff(&llm, &FakeTools, &brief()).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "Dr. Lee");
    }
}
