//! Axum handler for twin retrieval.

use axum::{
    extract::{Multipart, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::rerank::{rerank, RankedMatch};
use crate::errors::AppError;
use crate::imaging::{decode_upload, is_accepted_content_type};
use crate::models::CaseProfile;
use crate::routes::form::FormData;
use crate::state::AppState;

pub const DEFAULT_LIMIT: i64 = 5;
pub const MAX_LIMIT: i64 = 50;
/// Candidate pool multiplier when re-ranking against a profile.
const RERANK_POOL: usize = 3;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub matches: Vec<RankedMatch>,
    pub count: usize,
}

pub fn clamp_limit(limit: Option<i64>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT) as usize
}

/// POST /search
///
/// Multipart `file` (query X-ray) and optional `profile` (CaseProfile JSON).
/// Returns the nearest cases, re-ranked clinically when a profile is given.
pub async fn handle_search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
    multipart: Multipart,
) -> Result<Json<SearchResponse>, AppError> {
    let form = FormData::read(multipart).await?;
    let file = form.require_file("file")?;
    if !is_accepted_content_type(file.content_type.as_deref()) {
        return Err(AppError::Validation(
            "Only image files are accepted (jpg, png, webp).".to_string(),
        ));
    }
    let image = decode_upload(file.bytes.clone(), "image").await?;

    let profile = form.text("profile").and_then(|raw| {
        serde_json::from_str::<CaseProfile>(raw)
            .map_err(|e| warn!("Ignoring unparseable profile JSON: {e}"))
            .ok()
    });

    let limit = clamp_limit(params.limit);
    let fetch = if profile.is_some() { limit * RERANK_POOL } else { limit };

    let embedding = state.embedder.embed_image(&image).await?;
    let candidates = state.index.search(&embedding, fetch).await?;
    info!(
        "Search returned {} candidates (limit {limit}, profile: {})",
        candidates.len(),
        profile.is_some()
    );

    let matches = rerank(candidates, profile.as_ref(), limit);
    Ok(Json(SearchResponse {
        count: matches.len(),
        matches,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(None), 5);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(-3)), 1);
        assert_eq!(clamp_limit(Some(12)), 12);
        assert_eq!(clamp_limit(Some(500)), 50);
    }
}
