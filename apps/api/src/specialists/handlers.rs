use axum::{
    extract::{Multipart, State},
    Json,
};
use serde::Serialize;
use tracing::{error, info};

use super::agent::{analyze_hospital_staff, ResearchBrief, Specialist};
use super::tools::LiveWebTools;
use crate::errors::AppError;
use crate::routes::form::FormData;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SpecialistsResponse {
    pub specialists: Vec<Specialist>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// POST /analyze_hospital_page
///
/// Agent failures are reported in the body with an empty list, not as an
/// HTTP error.
pub async fn handle_analyze_hospital_page(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<SpecialistsResponse>, AppError> {
    let form = FormData::read(multipart).await?;
    let brief = ResearchBrief {
        url: form.require_text("url")?.to_string(),
        diagnosis: form.require_text("diagnosis")?.to_string(),
        hospital_name: form.text("hospital_name").unwrap_or_default().to_string(),
        location: form.text("location").unwrap_or_default().to_string(),
    };
    info!(
        "Analyzing hospital page for {} (location: {})",
        brief.hospital_name, brief.location
    );

    let Some(llm) = state.agent_llm.as_deref() else {
        return Ok(Json(SpecialistsResponse {
            specialists: Vec::new(),
            error: Some("GEMINI_API_KEY environment variable is missing.".to_string()),
        }));
    };
    let tools = LiveWebTools {
        search: state.web.search.as_ref(),
        reader: &state.web.reader,
    };

    match analyze_hospital_staff(llm, &tools, &brief).await {
        Ok(specialists) => Ok(Json(SpecialistsResponse {
            specialists,
            error: None,
        })),
        Err(e) => {
            error!("Specialist agents failed: {e:#}");
            Ok(Json(SpecialistsResponse {
                specialists: Vec::new(),
                error: Some(e.to_string()),
            }))
        }
    }
}
