//! Axum handler for facility search.

use axum::{
    extract::{Multipart, State},
    Json,
};
use serde::Serialize;
use tracing::warn;

use super::finder::{HospitalFinder, HospitalQuery};
use super::naming::{fallback_centers, Center};
use crate::errors::AppError;
use crate::routes::form::FormData;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HospitalsResponse {
    pub centers: Vec<Center>,
}

/// POST /search_hospitals
///
/// Facilities treating `diagnosis` near `location`, with coordinates and
/// driving times. Search failures return three well-known referral centres.
pub async fn handle_search_hospitals(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<HospitalsResponse>, AppError> {
    let form = FormData::read(multipart).await?;
    let query = HospitalQuery {
        diagnosis: form.require_text("diagnosis")?.to_string(),
        location: form.text("location").map(str::to_string),
        equipment: form.text("equipment").map(str::to_string),
        max_travel_time: form.text("maxTravelTime").map(str::to_string),
        max_distance: form.text("maxDistance").map(str::to_string),
    };

    let search = state.web.search.as_ref().ok_or_else(|| {
        AppError::Configuration("YDC_API_KEY environment variable is missing.".to_string())
    })?;
    let finder = HospitalFinder {
        search,
        geocoder: &state.web.geocoder,
        router: &state.web.router,
    };

    let centers = match finder.find(&query).await {
        Ok(centers) => centers,
        Err(e) => {
            warn!("Hospital search failed, serving fallback centers: {e:#}");
            fallback_centers(&query.diagnosis)
        }
    };
    Ok(Json(HospitalsResponse { centers }))
}
