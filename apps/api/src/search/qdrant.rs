//! Vector index seam and its Qdrant REST implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Qdrant returned {status}: {message}")]
    Api { status: u16, message: String },
}

/// One nearest-neighbour hit. Qdrant ids are UUID strings or integers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoredPoint {
    pub id: Value,
    pub score: f32,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredPoint {
    pub id: Value,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Value,
}

/// Carried in `AppState` as `Arc<dyn CaseIndex>`.
#[async_trait]
pub trait CaseIndex: Send + Sync {
    async fn search(&self, vector: &[f32], limit: usize)
        -> Result<Vec<ScoredPoint>, VectorStoreError>;

    async fn scroll(&self, limit: usize) -> Result<Vec<StoredPoint>, VectorStoreError>;

    async fn upsert(&self, points: &[IndexPoint]) -> Result<(), VectorStoreError>;
}

#[derive(Clone)]
pub struct QdrantClient {
    client: Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct QdrantResponse<T> {
    result: T,
}

#[derive(Deserialize)]
struct ScrollResult {
    points: Vec<StoredPoint>,
}

impl QdrantClient {
    pub fn new(
        base_url: &str,
        collection: String,
        api_key: Option<String>,
    ) -> Result<Self, VectorStoreError> {
        Ok(Self {
            client: Client::builder().timeout(Duration::from_secs(30)).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            collection,
            api_key,
        })
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.base_url, self.collection, suffix)
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, VectorStoreError> {
        let response = self.authorized(builder).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.pointer("/status/error").and_then(Value::as_str).map(str::to_string))
            .unwrap_or(body);
        Err(VectorStoreError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// Creates the collection with cosine distance when it does not exist yet.
    pub async fn ensure_collection(&self, dimension: usize) -> Result<(), VectorStoreError> {
        let existing = self
            .authorized(self.client.get(self.collection_url("")))
            .send()
            .await?;
        if existing.status().is_success() {
            debug!("Collection {} already exists", self.collection);
            return Ok(());
        }

        self.send(self.client.put(self.collection_url("")).json(&json!({
            "vectors": {"size": dimension, "distance": "Cosine"}
        })))
        .await?;
        info!("Created collection {} ({dimension} dims)", self.collection);
        Ok(())
    }
}

#[async_trait]
impl CaseIndex for QdrantClient {
    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPoint>, VectorStoreError> {
        let body = json!({"vector": vector, "limit": limit, "with_payload": true});
        let response = self
            .send(self.client.post(self.collection_url("/points/search")).json(&body))
            .await?;
        let parsed: QdrantResponse<Vec<ScoredPoint>> = response.json().await?;
        Ok(parsed.result)
    }

    async fn scroll(&self, limit: usize) -> Result<Vec<StoredPoint>, VectorStoreError> {
        let body = json!({"limit": limit, "with_payload": true, "with_vector": false});
        let response = self
            .send(self.client.post(self.collection_url("/points/scroll")).json(&body))
            .await?;
        let parsed: QdrantResponse<ScrollResult> = response.json().await?;
        Ok(parsed.result.points)
    }

    async fn upsert(&self, points: &[IndexPoint]) -> Result<(), VectorStoreError> {
        self.send(
            self.client
                .put(self.collection_url("/points"))
                .query(&[("wait", "true")])
                .json(&json!({ "points": points })),
        )
        .await?;
        Ok(())
    }
}
