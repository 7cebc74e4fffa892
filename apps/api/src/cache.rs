//! Optional Redis response cache for geocoding and web-search lookups.
//!
//! Cache failures never fail a request: they are logged and read as misses.

use std::sync::Arc;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

pub const GEOCODE_TTL_SECS: u64 = 24 * 60 * 60;
pub const SEARCH_TTL_SECS: u64 = 60 * 60;

const RECONNECT_EXPONENT_BASE: u64 = 2;
const RECONNECT_FACTOR_MS: u64 = 100;
const RECONNECT_RETRIES: usize = 1;

#[derive(Clone)]
pub struct Cache {
    client: redis::Client,
    /// Connected on first use; a failed connect is retried on the next call.
    manager: Arc<OnceCell<ConnectionManager>>,
}

impl Cache {
    pub fn open(url: &str) -> anyhow::Result<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
            manager: Arc::new(OnceCell::new()),
        })
    }

    async fn connection(&self) -> redis::RedisResult<ConnectionManager> {
        let manager = self
            .manager
            .get_or_try_init(|| async {
                let manager = ConnectionManager::new_with_backoff(
                    self.client.clone(),
                    RECONNECT_EXPONENT_BASE,
                    RECONNECT_FACTOR_MS,
                    RECONNECT_RETRIES,
                )
                .await?;
                info!("Redis cache connected");
                Ok::<_, redis::RedisError>(manager)
            })
            .await?;
        Ok(manager.clone())
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let result: redis::RedisResult<Option<String>> = async {
            let mut conn = self.connection().await?;
            conn.get(key).await
        }
        .await;

        match result {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => {
                    debug!("Cache hit: {key}");
                    Some(value)
                }
                Err(e) => {
                    warn!("Discarding undecodable cache entry {key}: {e}");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Cache read failed for {key}: {e}");
                None
            }
        }
    }

    pub async fn put_json<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Cache encode failed for {key}: {e}");
                return;
            }
        };
        let result: redis::RedisResult<()> = async {
            let mut conn = self.connection().await?;
            conn.set_ex(key, raw, ttl_secs).await
        }
        .await;
        if let Err(e) = result {
            warn!("Cache write failed for {key}: {e}");
        }
    }
}

/// Normalized cache key: `<namespace>:<lowercased, whitespace-collapsed input>`.
pub fn cache_key(namespace: &str, input: &str) -> String {
    let normalized = input
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    format!("casetwin:{namespace}:{normalized}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_normalizes_input() {
        assert_eq!(
            cache_key("geo", "  Rochester,   MN "),
            "casetwin:geo:rochester, mn"
        );
    }

    #[test]
    fn test_open_rejects_bad_url() {
        assert!(Cache::open("not a redis url").is_err());
    }

    #[tokio::test]
    async fn test_unreachable_server_reads_as_miss() {
        let cache = Cache::open("redis://127.0.0.1:1/").unwrap();
        assert_eq!(cache.get_json::<String>("casetwin:geo:boston").await, None);
        cache.put_json("casetwin:geo:boston", &"42.36,-71.06", 60).await;
        assert!(cache.manager.get().is_none());

        let shared = cache.clone();
        assert!(Arc::ptr_eq(&shared.manager, &cache.manager));
    }
}
