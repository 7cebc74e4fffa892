//! Embedding backends: MedSigLIP for chest X-ray images, MiniLM for clinical text.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{send_with_retry, InlineImage, LlmError};

const TEXT_BATCH_SIZE: usize = 64;

#[async_trait]
pub trait ImageEmbedder: Send + Sync {
    async fn embed_image(&self, image: &InlineImage) -> Result<Vec<f32>, LlmError>;
}

#[async_trait]
pub trait TextEmbedder: Send + Sync {
    /// One vector per input text, in input order.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError>;
}

/// MedSigLIP hosted on a Hugging Face inference endpoint.
#[derive(Clone)]
pub struct MedSiglipEmbedder {
    client: Client,
    endpoint: String,
    token: String,
}

impl MedSiglipEmbedder {
    pub fn new(endpoint: String, token: String) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder().timeout(Duration::from_secs(60)).build()?,
            endpoint,
            token,
        })
    }
}

#[async_trait]
impl ImageEmbedder for MedSiglipEmbedder {
    async fn embed_image(&self, image: &InlineImage) -> Result<Vec<f32>, LlmError> {
        let body = json!({ "inputs": image.base64() });
        let response = send_with_retry(
            "MedSigLIP",
            || {
                self.client
                    .post(&self.endpoint)
                    .bearer_auth(&self.token)
                    .json(&body)
            },
            |body| Some(body.to_string()),
        )
        .await?;

        let value: Value = response.json().await?;
        parse_embedding(&value).ok_or(LlmError::EmptyContent)
    }
}

/// Accepts a flat vector, a nested `[[...]]` batch, or an object keyed by
/// `embedding`, `embeddings` or `image_embeds`.
pub fn parse_embedding(value: &Value) -> Option<Vec<f32>> {
    match value {
        Value::Array(items) if items.first().is_some_and(Value::is_number) => items
            .iter()
            .map(|v| v.as_f64().map(|f| f as f32))
            .collect(),
        Value::Array(items) => items.first().and_then(parse_embedding),
        Value::Object(map) => ["embedding", "embeddings", "image_embeds"]
            .iter()
            .find_map(|key| map.get(*key))
            .and_then(parse_embedding),
        _ => None,
    }
}

/// sentence-transformers/all-MiniLM-L6-v2 via the feature-extraction pipeline.
#[derive(Clone)]
pub struct MiniLmEmbedder {
    client: Client,
    endpoint: String,
    token: String,
}

impl MiniLmEmbedder {
    pub fn new(endpoint: String, token: String) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder().timeout(Duration::from_secs(120)).build()?,
            endpoint,
            token,
        })
    }
}

#[async_trait]
impl TextEmbedder for MiniLmEmbedder {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(TEXT_BATCH_SIZE) {
            let body = json!({ "inputs": batch, "options": { "wait_for_model": true } });
            let response = send_with_retry(
                "MiniLM",
                || {
                    self.client
                        .post(&self.endpoint)
                        .bearer_auth(&self.token)
                        .json(&body)
                },
                |body| Some(body.to_string()),
            )
            .await?;

            let batch_vectors: Vec<Vec<f32>> = response.json().await?;
            if batch_vectors.len() != batch.len() {
                return Err(LlmError::Api {
                    status: 200,
                    message: format!(
                        "expected {} embeddings, got {}",
                        batch.len(),
                        batch_vectors.len()
                    ),
                });
            }
            vectors.extend(batch_vectors);
        }
        Ok(vectors)
    }
}
