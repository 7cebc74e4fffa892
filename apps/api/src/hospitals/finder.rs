//! Facility search: resolve the user's location, query the web, then place
//! and route to each hit.

use std::collections::HashSet;

use anyhow::{bail, Result};
use tracing::{debug, info, warn};

use super::naming::{
    capability, center_name, fallback_travel, jitter, reason, search_query, Center, US_CENTER,
};
use crate::web::geo::{format_duration, parse_coordinates};
use crate::web::{Geocoder, LatLng, RouteClient, SearchHit, YouSearchClient};

const SEARCH_RESULTS: u32 = 10;
const MAX_CENTERS: usize = 10;
const DEFAULT_LOCATION_LABEL: &str = "United States";

#[derive(Debug, Clone, Default)]
pub struct HospitalQuery {
    pub diagnosis: String,
    pub location: Option<String>,
    pub equipment: Option<String>,
    pub max_travel_time: Option<String>,
    pub max_distance: Option<String>,
}

pub struct HospitalFinder<'a> {
    pub search: &'a YouSearchClient,
    pub geocoder: &'a Geocoder,
    pub router: &'a RouteClient,
}

impl HospitalFinder<'_> {
    /// Search origin plus the place label used in queries.
    ///
    /// `"lat, lng"` input keeps its coordinates and is reverse-geocoded for the
    /// label; free text is forward-geocoded. Anything unresolved falls back to
    /// the geographic centre of the US.
    pub async fn resolve_location(&self, location: Option<&str>) -> (LatLng, String) {
        let Some(location) = location else {
            return (US_CENTER, DEFAULT_LOCATION_LABEL.to_string());
        };

        if let Some(origin) = parse_coordinates(location) {
            let label = match self.geocoder.reverse(origin).await {
                Ok(Some(label)) => {
                    info!("Reverse geocode: {location} -> {label}");
                    label
                }
                Ok(None) => location.to_string(),
                Err(e) => {
                    warn!("Reverse geocode failed for {location}: {e}");
                    location.to_string()
                }
            };
            return (origin, label);
        }

        let origin = match self.geocoder.geocode(location).await {
            Ok(Some(found)) => found,
            Ok(None) => US_CENTER,
            Err(e) => {
                warn!("Geocoding user location '{location}' failed: {e}");
                US_CENTER
            }
        };
        (origin, location.to_string())
    }

    /// Hospital name in the context of the search area, then the bare name.
    async fn place(&self, name: &str, area: &str, origin: LatLng) -> LatLng {
        let contextual = format!("{}, {area}", name.replace(" Hospital", ""));
        for query in [contextual.as_str(), name] {
            match self.geocoder.geocode(query).await {
                Ok(Some(found)) => return found,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Geocoding hospital '{name}' failed: {e}");
                    break;
                }
            }
        }
        jitter(origin)
    }

    async fn travel_time(&self, origin: LatLng, to: LatLng, rank: usize, name: &str) -> String {
        match self.router.driving_seconds(origin, to).await {
            Ok(Some(seconds)) => {
                let eta = format_duration(seconds);
                debug!("Driving ETA for '{name}': {eta}");
                eta
            }
            Ok(None) => fallback_travel(rank),
            Err(e) => {
                warn!("Routing failed for {name}: {e}");
                fallback_travel(rank)
            }
        }
    }

    async fn to_center(&self, hit: &SearchHit, rank: usize, name: String, area: &str, origin: LatLng) -> Center {
        let at = self.place(&name, area, origin).await;
        let travel = self.travel_time(origin, at, rank, &name).await;
        Center {
            url: hit.url.clone(),
            capability: capability(rank),
            travel,
            reason: reason(hit),
            lat: at.lat,
            lng: at.lng,
            name,
        }
    }

    /// Errors when search fails or yields no usable centre; callers fall back.
    pub async fn find(&self, query: &HospitalQuery) -> Result<Vec<Center>> {
        let (origin, area) = self.resolve_location(query.location.as_deref()).await;
        let text = search_query(
            &query.diagnosis,
            &area,
            query.equipment.as_deref(),
            query.max_distance.as_deref(),
        );
        info!(
            "Hospital search: {text} (max travel: {})",
            query.max_travel_time.as_deref().unwrap_or("any")
        );

        let hits = self.search.search(&text, SEARCH_RESULTS).await?;
        let mut centers = Vec::new();
        let mut seen = HashSet::new();
        for (rank, hit) in hits.iter().enumerate() {
            if centers.len() >= MAX_CENTERS {
                break;
            }
            let mut name = center_name(&hit.title, &hit.url);
            if name.is_empty() {
                name = format!("Medical Center {}", centers.len() + 1);
            }
            if !seen.insert(name.to_lowercase()) {
                continue;
            }
            centers.push(self.to_center(hit, rank, name, &area, origin).await);
        }

        if centers.is_empty() {
            bail!("search returned no usable hospitals");
        }
        Ok(centers)
    }
}
