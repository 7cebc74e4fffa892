/// Model-service clients. Every hosted-model call in CaseTwin goes through this module.
///
/// Two generative backends share the `VisionLanguageModel` seam:
/// - `MedGemmaClient`: MedGemma behind an OpenAI-compatible chat-completions endpoint
/// - `GeminiClient`: Gemini `generateContent`, used for schema extraction and agents
///
/// Embedding backends live in `embeddings`.
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use reqwest::{RequestBuilder, Response};
use thiserror::Error;
use tracing::warn;

pub mod embeddings;
pub mod gemini;
pub mod json;
pub mod medgemma;
pub mod prompts;

pub use embeddings::{ImageEmbedder, MedSiglipEmbedder, MiniLmEmbedder, TextEmbedder};
pub use gemini::GeminiClient;
pub use medgemma::MedGemmaClient;

const MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("Model returned empty content")]
    EmptyContent,

    #[error("Model endpoint is warming up")]
    WarmingUp,
}

impl LlmError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. } | LlmError::Api { status: 429, .. }
        )
    }
}

/// An image passed inline to a multimodal model.
#[derive(Debug, Clone)]
pub struct InlineImage {
    pub mime: String,
    pub data: Bytes,
}

impl InlineImage {
    pub fn new(mime: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            mime: mime.into(),
            data: data.into(),
        }
    }

    pub fn base64(&self) -> String {
        STANDARD.encode(&self.data)
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.base64())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
    pub images: Vec<InlineImage>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            images: Vec::new(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            images: Vec::new(),
        }
    }

    pub fn with_images(mut self, images: impl IntoIterator<Item = InlineImage>) -> Self {
        self.images.extend(images);
        self
    }
}

/// A provider-neutral generation request.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub stop: Vec<String>,
}

impl ChatRequest {
    pub fn new(max_tokens: u32) -> Self {
        Self {
            system: None,
            messages: Vec::new(),
            max_tokens,
            temperature: 0.1,
            stop: Vec::new(),
        }
    }

    /// Single user turn with optional images, the common MedGemma shape.
    pub fn prompt(
        text: impl Into<String>,
        images: impl IntoIterator<Item = InlineImage>,
        max_tokens: u32,
    ) -> Self {
        Self::new(max_tokens).message(ChatMessage::user(text).with_images(images))
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn stop<I, S>(mut self, stop: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stop = stop.into_iter().map(Into::into).collect();
        self
    }
}

/// Text generation over text and images.
///
/// Carried in `AppState` as `Arc<dyn VisionLanguageModel>` so handlers can be
/// exercised against scripted models.
#[async_trait]
pub trait VisionLanguageModel: Send + Sync {
    async fn generate(&self, request: &ChatRequest) -> Result<String, LlmError>;
}

/// Sends a request built by `build`, retrying on 429, 5xx and transport errors
/// with exponential backoff (1s, 2s). Other 4xx statuses return immediately.
///
/// `error_message` extracts a provider-specific message from an error body.
pub(crate) async fn send_with_retry<B, E>(
    label: &str,
    build: B,
    error_message: E,
) -> Result<Response, LlmError>
where
    B: Fn() -> RequestBuilder,
    E: Fn(&str) -> Option<String>,
{
    let mut last_error: Option<LlmError> = None;

    for attempt in 0..MAX_RETRIES {
        if attempt > 0 {
            let delay = Duration::from_millis(1000 * (1 << (attempt - 1)));
            warn!(
                "{label} call attempt {} failed, retrying after {}ms...",
                attempt,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }

        let response = match build().send().await {
            Ok(r) => r,
            Err(e) => {
                last_error = Some(LlmError::Http(e));
                continue;
            }
        };

        let status = response.status();

        if status.as_u16() == 429 || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            warn!("{label} returned {}: {}", status, body);
            last_error = Some(if status.as_u16() == 503 {
                LlmError::WarmingUp
            } else {
                LlmError::Api {
                    status: status.as_u16(),
                    message: body,
                }
            });
            continue;
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = error_message(&body).unwrap_or(body);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        return Ok(response);
    }

    Err(match last_error {
        Some(LlmError::Api { status: 429, .. }) | None => LlmError::RateLimited {
            retries: MAX_RETRIES,
        },
        Some(e) => e,
    })
}

/// Strips ```json ... ``` or ``` ... ``` code fences from model output.
pub fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::{extract::State, http::StatusCode, routing::post, Router};

    use super::*;

    #[test]
    fn test_strip_json_fences_with_json_tag() {
        let input = "```json\n[{\"name\": \"Dr. Ada Park\"}]\n```";
        assert_eq!(strip_json_fences(input), "[{\"name\": \"Dr. Ada Park\"}]");
    }

    #[test]
    fn test_strip_json_fences_without_tag() {
        let input = "```\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_no_fences() {
        let input = "  {\"key\": \"value\"} ";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_inline_image_data_url() {
        let image = InlineImage::new("image/png", vec![1u8, 2, 3]);
        assert_eq!(image.data_url(), "data:image/png;base64,AQID");
    }

    #[test]
    fn test_chat_request_builder() {
        let request = ChatRequest::prompt("describe", Vec::new(), 50)
            .system("be brief")
            .stop(["Final Answer"]);
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, Role::User);
        assert_eq!(request.system.as_deref(), Some("be brief"));
        assert_eq!(request.stop, vec!["Final Answer".to_string()]);
        assert_eq!(request.max_tokens, 50);
    }

    #[test]
    fn test_rate_limit_detection() {
        assert!(LlmError::RateLimited { retries: 3 }.is_rate_limit());
        assert!(LlmError::Api {
            status: 429,
            message: "quota".into()
        }
        .is_rate_limit());
        assert!(!LlmError::WarmingUp.is_rate_limit());
    }

    /// Serves the scripted statuses in order, repeating the last one.
    async fn scripted_server(statuses: Vec<u16>) -> (String, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let state = (Arc::new(statuses), calls.clone());
        let app = Router::new()
            .route(
                "/generate",
                post(
                    |State((statuses, calls)): State<(Arc<Vec<u16>>, Arc<AtomicUsize>)>| async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst);
                        let code = statuses[n.min(statuses.len() - 1)];
                        let body = if code == 200 {
                            r#"{"ok":true}"#.to_string()
                        } else {
                            format!(r#"{{"error":{{"message":"status {code}"}}}}"#)
                        };
                        (StatusCode::from_u16(code).unwrap(), body)
                    },
                ),
            )
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/generate", listener.local_addr().unwrap());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (url, calls)
    }

    async fn call(url: &str) -> Result<Response, LlmError> {
        let client = reqwest::Client::new();
        send_with_retry(
            "stub",
            || client.post(url).body("{}"),
            |body| {
                serde_json::from_str::<serde_json::Value>(body).ok()?["error"]["message"]
                    .as_str()
                    .map(str::to_string)
            },
        )
        .await
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_after_server_errors() {
        let (url, calls) = scripted_server(vec![503, 503, 200]).await;
        let response = call(&url).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_error_returns_immediately() {
        let (url, calls) = scripted_server(vec![400]).await;
        match call(&url).await {
            Err(LlmError::Api { status, message }) => {
                assert_eq!(status, 400);
                assert_eq!(message, "status 400");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_rate_limit() {
        let (url, calls) = scripted_server(vec![429]).await;
        assert!(matches!(
            call(&url).await,
            Err(LlmError::RateLimited { retries: 3 })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_unavailable_is_warming_up() {
        let (url, calls) = scripted_server(vec![503]).await;
        assert!(matches!(call(&url).await, Err(LlmError::WarmingUp)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
