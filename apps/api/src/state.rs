use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use crate::cache::Cache;
use crate::config::Config;
use crate::llm_client::{
    GeminiClient, ImageEmbedder, MedGemmaClient, MedSiglipEmbedder, VisionLanguageModel,
};
use crate::search::{CaseIndex, QdrantClient};
use crate::web::{Geocoder, PageReader, RouteClient, YouSearchClient};

/// Outbound web clients used by the facility and specialist routes.
#[derive(Clone)]
pub struct WebServices {
    /// Plain client for fetching matched-case images.
    pub http: reqwest::Client,
    /// `None` when `YDC_API_KEY` is unset.
    pub search: Option<YouSearchClient>,
    pub reader: PageReader,
    pub geocoder: Geocoder,
    pub router: RouteClient,
}

impl WebServices {
    pub fn from_config(config: &Config, cache: Option<Cache>) -> Result<Self> {
        let search = match &config.ydc_api_key {
            Some(key) => Some(YouSearchClient::new(key.clone(), cache.clone())?),
            None => {
                warn!("YDC_API_KEY not set; hospital and specialist search disabled");
                None
            }
        };
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()?,
            search,
            reader: PageReader::new(&config.jina_reader_url)?,
            geocoder: Geocoder::new(&config.nominatim_url, cache)?,
            router: RouteClient::new(&config.osrm_url)?,
        })
    }
}

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// MedGemma: every image-grounded generation.
    pub vlm: Arc<dyn VisionLanguageModel>,
    /// MedSigLIP: query-image embeddings for twin search.
    pub embedder: Arc<dyn ImageEmbedder>,
    pub index: Arc<dyn CaseIndex>,
    /// Gemini for the specialist research agent; `None` without `GEMINI_API_KEY`.
    pub agent_llm: Option<Arc<dyn VisionLanguageModel>>,
    pub web: WebServices,
}

impl AppState {
    pub fn from_config(config: Config) -> Result<Self> {
        let cache = match &config.redis_url {
            Some(url) => {
                info!("Redis cache enabled");
                Some(Cache::open(url)?)
            }
            None => None,
        };

        let vlm = MedGemmaClient::new(
            &config.medgemma_url,
            config.medgemma_model.clone(),
            config.hf_token.clone(),
        )?;
        info!("MedGemma client initialized (model: {})", config.medgemma_model);

        let embedder = MedSiglipEmbedder::new(config.medsiglip_url.clone(), config.hf_token.clone())?;

        let index = QdrantClient::new(
            &config.qdrant_url,
            config.qdrant_collection.clone(),
            config.qdrant_api_key.clone(),
        )?;
        info!("Qdrant collection: {}", config.qdrant_collection);

        let agent_llm: Option<Arc<dyn VisionLanguageModel>> = match &config.gemini_api_key {
            Some(key) => Some(Arc::new(GeminiClient::new(key.clone(), config.gemini_model.clone())?)),
            None => {
                warn!("GEMINI_API_KEY not set; specialist analysis disabled");
                None
            }
        };

        let web = WebServices::from_config(&config, cache)?;

        Ok(Self {
            config,
            vlm: Arc::new(vlm),
            embedder: Arc::new(embedder),
            index: Arc::new(index),
            agent_llm,
            web,
        })
    }
}
