//! MedGemma over an OpenAI-compatible `/v1/chat/completions` endpoint
//! (Hugging Face Inference Endpoints / TGI).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::{send_with_retry, ChatRequest, LlmError, Role, VisionLanguageModel};

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<CompletionUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Clone)]
pub struct MedGemmaClient {
    client: Client,
    endpoint: String,
    model: String,
    token: String,
}

impl MedGemmaClient {
    pub fn new(base_url: &str, model: String, token: String) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder().timeout(Duration::from_secs(180)).build()?,
            endpoint: format!("{}/v1/chat/completions", base_url.trim_end_matches('/')),
            model,
            token,
        })
    }
}

/// Renders a `ChatRequest` as chat-completions messages. Images become
/// `image_url` parts carrying data URLs; text-only turns stay plain strings.
fn completion_messages(request: &ChatRequest) -> Vec<Value> {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if let Some(system) = &request.system {
        messages.push(json!({ "role": "system", "content": system }));
    }
    for message in &request.messages {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        if message.images.is_empty() {
            messages.push(json!({ "role": role, "content": message.text }));
            continue;
        }
        let mut parts = vec![json!({ "type": "text", "text": message.text })];
        parts.extend(message.images.iter().map(|image| {
            json!({ "type": "image_url", "image_url": { "url": image.data_url() } })
        }));
        messages.push(json!({ "role": role, "content": parts }));
    }
    messages
}

#[async_trait]
impl VisionLanguageModel for MedGemmaClient {
    async fn generate(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let body = CompletionRequest {
            model: &self.model,
            messages: completion_messages(request),
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stop: request.stop.clone(),
        };

        let response = send_with_retry(
            "MedGemma",
            || {
                self.client
                    .post(&self.endpoint)
                    .bearer_auth(&self.token)
                    .json(&body)
            },
            |body| {
                serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|v| v.get("error").map(|e| e.to_string()))
            },
        )
        .await?;

        let completion: CompletionResponse = response.json().await?;
        if let Some(usage) = &completion.usage {
            debug!(
                "MedGemma call succeeded: prompt_tokens={}, completion_tokens={}",
                usage.prompt_tokens, usage.completion_tokens
            );
        }

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(LlmError::EmptyContent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_client::{ChatMessage, InlineImage};

    #[test]
    fn test_text_only_messages_are_plain_strings() {
        let request = ChatRequest::prompt("Explain atelectasis", Vec::new(), 120)
            .system("You are concise.");
        let messages = completion_messages(&request);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "Explain atelectasis");
    }

    #[test]
    fn test_images_become_data_url_parts() {
        let image = InlineImage::new("image/png", vec![0u8; 4]);
        let request = ChatRequest::new(50)
            .message(ChatMessage::user("Find the effusion").with_images([image]))
            .message(ChatMessage::assistant("Right lower zone."));
        let messages = completion_messages(&request);
        let parts = messages[0]["content"].as_array().unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1]["type"], "image_url");
        assert!(parts[1]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
        assert_eq!(messages[1]["role"], "assistant");
    }

    #[test]
    fn test_endpoint_normalizes_trailing_slash() {
        let client = MedGemmaClient::new("https://example.endpoints.hf.cloud/", "m".into(), "t".into())
            .unwrap();
        assert_eq!(
            client.endpoint,
            "https://example.endpoints.hf.cloud/v1/chat/completions"
        );
    }
}
