//! Axum handlers for the MedGemma commentary endpoints.
//!
//! Model failures here degrade to fixed fallback text with a 200; only
//! malformed input is rejected.

use axum::{extract::{Multipart, State}, Json};
use serde::Serialize;
use tracing::{info, warn};

use super::boxes::{fill_missing, parse_box, region_text, BoundingBox};
use super::cleanup::{clean_commentary, clean_reply};
use super::prompts::{
    box_prompt, commentary_prompt, explain_prompt, imaging_prompt, profile_context,
    synthesis_prompt, twin_chat_prompt, EXPERT_ANSWER_MARKER, EXPLAIN_TAIL, IMAGING_MARKER,
    SYNTHESIS_MARKER,
};
use crate::errors::AppError;
use crate::imaging::{decode_upload, normalize_to_png};
use crate::llm_client::{prompts::FINAL_ANSWER_STOPS, ChatRequest, InlineImage, LlmError, VisionLanguageModel};
use crate::models::CaseProfile;
use crate::routes::form::FormData;
use crate::state::AppState;
use crate::text::{clip_chars, first_sentences};

const COMMENTARY_UNAVAILABLE: &str = "AI analysis unavailable.";
const COMMENTARY_FAILED: &str = "Unable to complete AI analysis at this time.";
const CHAT_EMPTY: &str =
    "I don't have enough information in the provided case context to answer that.";
const CHAT_FAILED: &str =
    "I'm sorry, I couldn't reach the AI reasoning engine to answer this question right now.";
const SYNTHESIS_EMPTY: &str = "Unable to generate clinical synthesis.";
const SYNTHESIS_FAILED: &str = "I'm sorry, I couldn't generate the clinical synthesis right now.";

// ────────────────────────────────────────────────────────────────────────────
// Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct CompareInsightsResponse {
    pub insights_text: String,
    pub original_box: BoundingBox,
    pub match_box: BoundingBox,
}

#[derive(Debug, Serialize)]
pub struct ChatTwinResponse {
    pub reply: String,
}

#[derive(Debug, Serialize)]
pub struct EnhanceProfileResponse {
    pub synthesis: String,
    pub imaging_context: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExplainSelectionResponse {
    pub explanation: String,
}

fn parse_profile(raw: Option<&str>, field: &str) -> Option<CaseProfile> {
    serde_json::from_str(raw?)
        .map_err(|e| warn!("Ignoring unparseable {field} JSON: {e}"))
        .ok()
}

async fn locate_finding(
    vlm: &dyn VisionLanguageModel,
    prompt: &str,
    image: &InlineImage,
    which: &str,
) -> Option<BoundingBox> {
    match vlm
        .generate(&ChatRequest::prompt(prompt, [image.clone()], 50))
        .await
    {
        Ok(reply) => parse_box(&reply),
        Err(e) => {
            warn!("MedGemma {which} box extraction failed: {e}");
            None
        }
    }
}

/// Downloads the twin's image; any failure just means no second box query.
async fn fetch_match_image(state: &AppState, url: &str) -> Option<InlineImage> {
    let response = match state.web.http.get(url).send().await {
        Ok(r) if r.status().is_success() => r,
        Ok(r) => {
            warn!("Matched image {url} returned {}", r.status());
            return None;
        }
        Err(e) => {
            warn!("Could not fetch matched image {url}: {e}");
            return None;
        }
    };
    let bytes = response
        .bytes()
        .await
        .map_err(|e| warn!("Could not download matched image {url}: {e}"))
        .ok()?;
    tokio::task::spawn_blocking(move || normalize_to_png(&bytes))
        .await
        .ok()?
        .map_err(|e| warn!("Could not decode matched image {url}: {e}"))
        .ok()
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /compare_insights
///
/// Localizes the matched diagnosis in the query and twin images and narrates
/// the comparison.
pub async fn handle_compare_insights(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<CompareInsightsResponse>, AppError> {
    let form = FormData::read(multipart).await?;
    let original = decode_upload(form.require_file("original_image")?.bytes.clone(), "original image").await?;
    let diagnosis = form.require_text("match_diagnosis")?;
    let match_url = form.text("match_image_url");
    let payload = parse_profile(form.text("match_payload"), "match_payload").unwrap_or_default();

    let matched = match match_url.filter(|u| u.starts_with("http")) {
        Some(url) => fetch_match_image(&state, url).await,
        None => None,
    };

    let prompt = box_prompt(diagnosis);
    let vlm = state.vlm.as_ref();
    let (original_box, match_box) = tokio::join!(
        locate_finding(vlm, &prompt, &original, "original"),
        async {
            match &matched {
                Some(image) => locate_finding(vlm, &prompt, image, "match").await,
                None => None,
            }
        }
    );
    let (original_box, match_box) = fill_missing(diagnosis, match_url, original_box, match_box);

    let prompt = commentary_prompt(
        diagnosis,
        &region_text(&original_box),
        &region_text(&match_box),
        payload.presentation.hpi.as_deref().unwrap_or_default(),
        payload.outcome.detail.as_deref().unwrap_or_default(),
    );
    let insights_text = match vlm
        .generate(&ChatRequest::prompt(prompt.as_str(), [original], 400))
        .await
    {
        Ok(raw) => {
            let cleaned = clean_commentary(&raw, &prompt);
            if cleaned.is_empty() {
                COMMENTARY_UNAVAILABLE.to_string()
            } else {
                cleaned
            }
        }
        Err(e) => {
            warn!("MedGemma commentary failed: {e}");
            COMMENTARY_FAILED.to_string()
        }
    };

    Ok(Json(CompareInsightsResponse {
        insights_text,
        original_box,
        match_box,
    }))
}

/// POST /chat_twin
///
/// Answers a clinician's question grounded in the twin case text and,
/// when supplied, the current patient's profile.
pub async fn handle_chat_twin(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ChatTwinResponse>, AppError> {
    let form = FormData::read(multipart).await?;
    let query = form.require_text("query")?;
    let case_text = form.require_text("case_text")?;
    let current = parse_profile(form.text("current_profile"), "current_profile");

    let prompt = twin_chat_prompt(query, case_text, current.as_ref());
    let request = ChatRequest::prompt(prompt, Vec::new(), 350).stop(
        FINAL_ANSWER_STOPS
            .iter()
            .copied()
            .chain(["---\nQuestion:", "Question:"]),
    );

    let reply = match state.vlm.generate(&request).await {
        Ok(raw) => {
            let question = format!("Question: {query}");
            let reply = clean_reply(&raw, &[EXPERT_ANSWER_MARKER, question.as_str()]);
            if reply.is_empty() {
                CHAT_EMPTY.to_string()
            } else {
                reply
            }
        }
        Err(e) => {
            warn!("MedGemma chat failed: {e}");
            CHAT_FAILED.to_string()
        }
    };
    Ok(Json(ChatTwinResponse { reply }))
}

async fn sectioned_reply(
    vlm: &dyn VisionLanguageModel,
    prompt: String,
    image: Option<&InlineImage>,
    max_tokens: u32,
    marker: &str,
) -> Result<String, LlmError> {
    let section_stop = format!("---\n{marker}");
    let request = ChatRequest::prompt(prompt, image.cloned(), max_tokens).stop(
        FINAL_ANSWER_STOPS
            .iter()
            .copied()
            .chain([section_stop.as_str(), marker]),
    );
    let raw = vlm.generate(&request).await?;
    Ok(clean_reply(&raw, &[marker]))
}

/// POST /enhance_profile
///
/// "AI Clinical Synthesis" for a profile, plus an "Imaging Context" summary
/// generated concurrently when an image is attached.
pub async fn handle_enhance_profile(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<EnhanceProfileResponse>, AppError> {
    let form = FormData::read(multipart).await?;
    let raw_profile = form.require_text("profile_json")?;

    let failed = || {
        Json(EnhanceProfileResponse {
            synthesis: SYNTHESIS_FAILED.to_string(),
            imaging_context: None,
        })
    };

    let profile: CaseProfile = match serde_json::from_str(raw_profile) {
        Ok(profile) => profile,
        Err(e) => {
            warn!("enhance_profile received unparseable profile: {e}");
            return Ok(failed());
        }
    };
    let image = match form.file("file") {
        Some(file) => match decode_upload(file.bytes.clone(), "image").await {
            Ok(image) => Some(image),
            Err(e) => {
                warn!("enhance_profile image unreadable: {e}");
                return Ok(failed());
            }
        },
        None => None,
    };

    let context = profile_context(&profile);
    let vlm = state.vlm.as_ref();
    let (synthesis, imaging) = tokio::join!(
        sectioned_reply(vlm, synthesis_prompt(&context), image.as_ref(), 250, SYNTHESIS_MARKER),
        async {
            match &image {
                Some(image) => Some(
                    sectioned_reply(vlm, imaging_prompt(&context), Some(image), 200, IMAGING_MARKER)
                        .await,
                ),
                None => None,
            }
        }
    );

    let (synthesis, imaging_context) = match (synthesis, imaging.transpose()) {
        (Ok(synthesis), Ok(imaging)) => (synthesis, imaging),
        (Err(e), _) | (_, Err(e)) => {
            warn!("MedGemma enhance failed: {e}");
            return Ok(failed());
        }
    };
    info!("Clinical synthesis generated (imaging: {})", imaging_context.is_some());

    Ok(Json(EnhanceProfileResponse {
        synthesis: if synthesis.is_empty() {
            SYNTHESIS_EMPTY.to_string()
        } else {
            synthesis
        },
        imaging_context,
    }))
}

/// Drops an echoed prompt: keeps what follows the last occurrence of each
/// marker unless the reply ends with it.
pub fn strip_explanation_echo(raw: &str, markers: &[&str]) -> String {
    let mut text = raw.trim().to_string();
    for marker in markers.iter().filter(|m| !m.is_empty()) {
        if text.contains(marker) && !text.ends_with(marker) {
            text = text.rsplit(marker).next().unwrap_or_default().trim().to_string();
        }
    }
    text
}

/// POST /explain_selection
///
/// One or two sentences explaining a highlighted phrase in context.
pub async fn handle_explain_selection(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ExplainSelectionResponse>, AppError> {
    let form = FormData::read(multipart).await?;
    let selected = form.require_text("selected_text")?;
    let context = clip_chars(form.text("context").unwrap_or_default(), 500).trim();

    let request = ChatRequest::prompt(explain_prompt(selected, context), Vec::new(), 120);
    let explanation = match state.vlm.generate(&request).await {
        Ok(raw) => {
            let text = strip_explanation_echo(&raw, &[EXPLAIN_TAIL, context, selected]);
            let explanation = first_sentences(&text, 2);
            if explanation.is_empty() {
                format!("\"{selected}\" — a medical term relevant to this clinical case.")
            } else {
                explanation
            }
        }
        Err(e) => {
            warn!("MedGemma explain_selection failed: {e}");
            format!("\"{selected}\" — unable to reach the AI explanation engine right now.")
        }
    };
    Ok(Json(ExplainSelectionResponse { explanation }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_explanation_echo() {
        let raw = "Explain ... Start directly with the explanation. A bulla is an air space.";
        assert_eq!(
            strip_explanation_echo(raw, &[EXPLAIN_TAIL, "", "bulla"]),
            "is an air space."
        );
        assert_eq!(
            strip_explanation_echo("Air-filled space.", &[EXPLAIN_TAIL, "ctx", "bulla"]),
            "Air-filled space."
        );
    }
}
