pub mod form;
pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::hospitals::handlers::handle_search_hospitals;
use crate::insights::handlers::{
    handle_chat_twin, handle_compare_insights, handle_enhance_profile, handle_explain_selection,
};
use crate::profile::handlers::handle_extract;
use crate::search::handlers::handle_search;
use crate::specialists::handlers::handle_analyze_hospital_page;
use crate::state::AppState;

/// Query images and notes PDFs arrive as multipart uploads.
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Twin retrieval
        .route("/search", post(handle_search))
        .route("/extract", post(handle_extract))
        // MedGemma commentary
        .route("/compare_insights", post(handle_compare_insights))
        .route("/chat_twin", post(handle_chat_twin))
        .route("/enhance_profile", post(handle_enhance_profile))
        .route("/explain_selection", post(handle_explain_selection))
        // Care network
        .route("/search_hospitals", post(handle_search_hospitals))
        .route("/analyze_hospital_page", post(handle_analyze_hospital_page))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}
