use anyhow::{Context, Result};

const DEFAULT_CORS_ORIGINS: &str =
    "http://localhost:5173,http://localhost:3000,http://127.0.0.1:5173";

/// Application configuration loaded from environment variables.
/// `from_env` fails at startup if a required variable is missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub hf_token: String,
    pub medgemma_url: String,
    pub medgemma_model: String,
    pub medsiglip_url: String,
    pub text_embedding_url: String,
    pub qdrant_url: String,
    pub qdrant_api_key: Option<String>,
    pub qdrant_collection: String,
    pub ydc_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub nominatim_url: String,
    pub osrm_url: String,
    pub jina_reader_url: String,
    pub clustering_url: Option<String>,
    pub redis_url: Option<String>,
    pub cors_origins: Vec<String>,
    pub port: u16,
    pub rust_log: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            hf_token: String::new(),
            medgemma_url: String::new(),
            medgemma_model: "google/medgemma-1.5-4b-it".to_string(),
            medsiglip_url: String::new(),
            text_embedding_url: "https://api-inference.huggingface.co/pipeline/feature-extraction/sentence-transformers/all-MiniLM-L6-v2".to_string(),
            qdrant_url: "http://localhost:6333".to_string(),
            qdrant_api_key: None,
            qdrant_collection: "chest_xrays".to_string(),
            ydc_api_key: None,
            gemini_api_key: None,
            gemini_model: "gemini-2.0-flash".to_string(),
            nominatim_url: "https://nominatim.openstreetmap.org".to_string(),
            osrm_url: "http://router.project-osrm.org".to_string(),
            jina_reader_url: "https://r.jina.ai".to_string(),
            clustering_url: None,
            redis_url: None,
            cors_origins: split_origins(DEFAULT_CORS_ORIGINS),
            port: 8080,
            rust_log: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let defaults = Config::default();
        Ok(Config {
            hf_token: require_env("HF_TOKEN")?,
            medgemma_url: require_env("MEDGEMMA_URL")?,
            medgemma_model: env_or("MEDGEMMA_MODEL", defaults.medgemma_model),
            medsiglip_url: require_env("MEDSIGLIP_URL")?,
            text_embedding_url: env_or("TEXT_EMBEDDING_URL", defaults.text_embedding_url),
            qdrant_url: require_env("QDRANT_URL")?,
            qdrant_api_key: optional_env("QDRANT_API_KEY"),
            qdrant_collection: env_or("QDRANT_COLLECTION", defaults.qdrant_collection),
            ydc_api_key: optional_env("YDC_API_KEY"),
            gemini_api_key: optional_env("GEMINI_API_KEY"),
            gemini_model: env_or("GEMINI_MODEL", defaults.gemini_model),
            nominatim_url: env_or("NOMINATIM_URL", defaults.nominatim_url),
            osrm_url: env_or("OSRM_URL", defaults.osrm_url),
            jina_reader_url: env_or("JINA_READER_URL", defaults.jina_reader_url),
            clustering_url: optional_env("CLUSTERING_URL"),
            redis_url: optional_env("REDIS_URL"),
            cors_origins: optional_env("CORS_ORIGINS")
                .map(|v| split_origins(&v))
                .unwrap_or(defaults.cors_origins),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: env_or("RUST_LOG", defaults.rust_log),
        })
    }
}

pub fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

/// Unset and blank values both read as `None`.
pub fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_or(key: &str, default: String) -> String {
    optional_env(key).unwrap_or(default)
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
