//! You.com web search (`ydc-index.io/v1/search`).

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::{cache_key, Cache, SEARCH_TTL_SECS};

const YDC_SEARCH_URL: &str = "https://ydc-index.io/v1/search";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub description: String,
    pub snippets: Vec<String>,
}

impl SearchHit {
    /// Description, else joined snippets.
    pub fn summary(&self) -> String {
        if self.description.trim().is_empty() {
            self.snippets.join(" ")
        } else {
            self.description.clone()
        }
    }
}

#[derive(Clone)]
pub struct YouSearchClient {
    client: Client,
    api_key: String,
    cache: Option<Cache>,
}

impl YouSearchClient {
    pub fn new(api_key: String, cache: Option<Cache>) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .context("building search HTTP client")?,
            api_key,
            cache,
        })
    }

    pub async fn search(&self, query: &str, count: u32) -> Result<Vec<SearchHit>> {
        let key = cache_key("search", &format!("{count}:{query}"));
        if let Some(cache) = &self.cache {
            if let Some(hits) = cache.get_json::<Vec<SearchHit>>(&key).await {
                return Ok(hits);
            }
        }

        let data: Value = self
            .client
            .get(YDC_SEARCH_URL)
            .header("X-API-Key", &self.api_key)
            .query(&[("query", query), ("count", &count.to_string())])
            .send()
            .await
            .context("search request failed")?
            .error_for_status()
            .context("search returned an error status")?
            .json()
            .await
            .context("search response was not JSON")?;

        let hits = parse_hits(&data);
        if let Some(cache) = &self.cache {
            cache.put_json(&key, &hits, SEARCH_TTL_SECS).await;
        }
        Ok(hits)
    }
}

/// Results live under `hits` or `results.web` depending on API version.
pub fn parse_hits(data: &Value) -> Vec<SearchHit> {
    let hits = data
        .get("hits")
        .and_then(Value::as_array)
        .filter(|hits| !hits.is_empty())
        .or_else(|| data.pointer("/results/web").and_then(Value::as_array));

    hits.map(|hits| {
        hits.iter()
            .filter_map(|hit| serde_json::from_value(hit.clone()).ok())
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_results_web() {
        let data = json!({"results": {"web": [
            {"url": "https://a.org", "title": "A", "snippets": ["one", "two"]},
            {"url": "https://b.org", "title": "B", "description": "desc"}
        ]}});
        let hits = parse_hits(&data);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].summary(), "one two");
        assert_eq!(hits[1].summary(), "desc");
    }

    #[test]
    fn test_parse_legacy_hits() {
        let data = json!({"hits": [{"url": "https://c.org", "title": "C"}]});
        assert_eq!(parse_hits(&data)[0].url, "https://c.org");
    }

    #[test]
    fn test_parse_empty() {
        assert!(parse_hits(&json!({"results": {}})).is_empty());
    }
}
