//! Axum handler for CaseProfile extraction.

use axum::{
    extract::{Multipart, State},
    Json,
};
use serde::Serialize;
use tracing::{info, warn};

use super::extract::extract_profile;
use super::notes::{combine_notes, read_notes_file};
use crate::errors::AppError;
use crate::imaging::decode_upload;
use crate::llm_client::{ChatRequest, VisionLanguageModel};
use crate::models::CaseProfile;
use crate::routes::form::{FormData, UploadedFile};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ExtractResponse {
    pub profile: CaseProfile,
}

fn insight_prompt(notes: &str) -> String {
    format!(
        "Analyze this chest X-ray image in the context of these clinical notes: '{notes}'. \
         Identify key findings like consolidation, effusion, or cardiomegaly. Be structured."
    )
}

/// MedGemma's structured read of the first image; empty on any failure.
async fn image_insight(vlm: &dyn VisionLanguageModel, image: &UploadedFile, notes: &str) -> String {
    let image = match decode_upload(image.bytes.clone(), "image").await {
        Ok(image) => image,
        Err(e) => {
            warn!("Skipping image insight: {e}");
            return String::new();
        }
    };
    match vlm
        .generate(&ChatRequest::prompt(insight_prompt(notes), [image], 300))
        .await
    {
        Ok(insight) => insight,
        Err(e) => {
            warn!("MedGemma extraction failed: {e}");
            String::new()
        }
    }
}

/// POST /extract
///
/// Builds a CaseProfile from uploaded `images`, typed `notes` and an
/// optional `notes_file` (text or PDF).
pub async fn handle_extract(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ExtractResponse>, AppError> {
    let form = FormData::read(multipart).await?;
    let images = form.files("images");
    let image_names: Vec<String> = images
        .iter()
        .filter_map(|f| f.file_name.clone())
        .filter(|name| !name.is_empty())
        .collect();

    let file_text = match form.file("notes_file") {
        Some(file) => read_notes_file(file).await,
        None => None,
    };
    let notes = combine_notes(form.text("notes").unwrap_or_default(), file_text.as_deref());

    let insight = match images.first() {
        Some(first) => image_insight(state.vlm.as_ref(), first, &notes).await,
        None => String::new(),
    };

    let profile = extract_profile(&notes, &image_names, &insight);
    info!(
        "Extracted profile {} (images: {}, notes: {} chars, insight: {})",
        profile.profile_id,
        images.len(),
        notes.len(),
        !insight.is_empty()
    );
    Ok(Json(ExtractResponse { profile }))
}
