//! `index`: embeds each CXR-primary profile's image and upserts it into the
//! vector collection.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use super::{progress_bar, read_json};
use crate::imaging::normalize_to_png;
use crate::llm_client::ImageEmbedder;
use crate::models::CaseProfile;
use crate::search::qdrant::{CaseIndex, IndexPoint};

pub const UPSERT_BATCH: usize = 64;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct IndexSummary {
    pub indexed: usize,
    pub skipped: usize,
}

/// Point id is UUIDv5 over `profile_id`, so re-indexing overwrites in place.
pub fn point_id(profile_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, profile_id.as_bytes()).to_string()
}

/// The stored payload is the profile without its embeddings.
pub fn index_point(profile: &CaseProfile, vector: Vec<f32>) -> Result<IndexPoint> {
    let mut payload = serde_json::to_value(profile)?;
    if let Value::Object(map) = &mut payload {
        map.remove("embeddings");
    }
    Ok(IndexPoint {
        id: point_id(&profile.profile_id),
        vector,
        payload,
    })
}

async fn embed_profile(
    embedder: &dyn ImageEmbedder,
    profile: &CaseProfile,
    images_root: &Path,
) -> Result<Vec<f32>> {
    let relative = profile
        .study
        .storage_path
        .as_deref()
        .context("Profile has no storage path")?;
    let path = images_root.join(relative);
    let bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let image = tokio::task::spawn_blocking(move || normalize_to_png(&bytes))
        .await?
        .with_context(|| format!("Failed to decode {}", path.display()))?;
    Ok(embedder.embed_image(&image).await?)
}

/// Profiles whose image cannot be read, decoded or embedded are skipped.
pub async fn index_profiles(
    embedder: &dyn ImageEmbedder,
    index: &dyn CaseIndex,
    dataset: &Path,
    images_root: &Path,
) -> Result<IndexSummary> {
    let profiles: Vec<CaseProfile> = read_json(dataset)?;
    info!("Indexing {} profiles from {}", profiles.len(), dataset.display());

    let mut summary = IndexSummary::default();
    let mut batch = Vec::with_capacity(UPSERT_BATCH);
    let bar = progress_bar(profiles.len() as u64, "Indexing");

    for profile in &profiles {
        bar.inc(1);
        match embed_profile(embedder, profile, images_root).await {
            Ok(vector) => batch.push(index_point(profile, vector)?),
            Err(e) => {
                warn!("Skipping {}: {e:#}", profile.profile_id);
                summary.skipped += 1;
                continue;
            }
        }
        if batch.len() == UPSERT_BATCH {
            index.upsert(&batch).await?;
            summary.indexed += batch.len();
            batch.clear();
        }
    }
    if !batch.is_empty() {
        index.upsert(&batch).await?;
        summary.indexed += batch.len();
    }
    bar.finish_and_clear();

    info!("Indexed {} profiles, skipped {}", summary.indexed, summary.skipped);
    Ok(summary)
}
