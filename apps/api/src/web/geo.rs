//! Nominatim geocoding and OSRM driving times.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::{cache_key, Cache, GEOCODE_TTL_SECS};

/// Nominatim's usage policy requires an identifying agent.
const USER_AGENT: &str = "casetwin_medical_routing_bot";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

/// Parses `"lat, lng"`; anything else is free text.
pub fn parse_coordinates(location: &str) -> Option<LatLng> {
    let (lat, lng) = location.split_once(',')?;
    Some(LatLng {
        lat: lat.trim().parse().ok()?,
        lng: lng.split(',').next()?.trim().parse().ok()?,
    })
}

#[derive(Clone)]
pub struct Geocoder {
    client: Client,
    base_url: String,
    cache: Option<Cache>,
}

#[derive(Debug, Deserialize)]
struct Place {
    lat: String,
    lon: String,
}

impl Geocoder {
    pub fn new(base_url: &str, cache: Option<Cache>) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(5))
                .user_agent(USER_AGENT)
                .build()
                .context("building geocoder HTTP client")?,
            base_url: base_url.trim_end_matches('/').to_string(),
            cache,
        })
    }

    /// Forward geocode; `Ok(None)` when Nominatim has no match.
    pub async fn geocode(&self, query: &str) -> Result<Option<LatLng>> {
        let key = cache_key("geocode", query);
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get_json::<Option<LatLng>>(&key).await {
                return Ok(hit);
            }
        }

        let places: Vec<Place> = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[("q", query), ("format", "json"), ("limit", "1")])
            .send()
            .await
            .with_context(|| format!("geocoding '{query}'"))?
            .error_for_status()?
            .json()
            .await
            .context("geocoder response was not JSON")?;

        let found = places.first().and_then(|place| {
            Some(LatLng {
                lat: place.lat.parse().ok()?,
                lng: place.lon.parse().ok()?,
            })
        });
        if let Some(cache) = &self.cache {
            cache.put_json(&key, &found, GEOCODE_TTL_SECS).await;
        }
        Ok(found)
    }

    /// Reverse geocode to `"<city>, <state>"`.
    pub async fn reverse(&self, at: LatLng) -> Result<Option<String>> {
        let key = cache_key("reverse", &format!("{:.4},{:.4}", at.lat, at.lng));
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get_json::<Option<String>>(&key).await {
                return Ok(hit);
            }
        }

        let data: Value = self
            .client
            .get(format!("{}/reverse", self.base_url))
            .query(&[
                ("lat", at.lat.to_string()),
                ("lon", at.lng.to_string()),
                ("format", "json".to_string()),
            ])
            .send()
            .await
            .context("reverse geocoding")?
            .error_for_status()?
            .json()
            .await
            .context("reverse geocoder response was not JSON")?;

        let label = place_label(&data);
        if let Some(cache) = &self.cache {
            cache.put_json(&key, &label, GEOCODE_TTL_SECS).await;
        }
        Ok(label)
    }
}

/// City (else town, county, state) followed by the state.
pub fn place_label(data: &Value) -> Option<String> {
    let address = data.get("address")?;
    let field = |name: &str| address.get(name).and_then(Value::as_str).filter(|s| !s.is_empty());
    let place = field("city")
        .or_else(|| field("town"))
        .or_else(|| field("county"))
        .or_else(|| field("state"))?;
    Some(format!("{place}, {}", field("state").unwrap_or_default()))
}

#[derive(Clone)]
pub struct RouteClient {
    client: Client,
    base_url: String,
}

impl RouteClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .context("building routing HTTP client")?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Driving duration in seconds; OSRM takes `lng,lat` pairs.
    pub async fn driving_seconds(&self, from: LatLng, to: LatLng) -> Result<Option<f64>> {
        let url = format!(
            "{}/route/v1/driving/{},{};{},{}",
            self.base_url, from.lng, from.lat, to.lng, to.lat
        );
        let data: Value = self
            .client
            .get(url)
            .query(&[("overview", "false")])
            .send()
            .await
            .context("routing request failed")?
            .error_for_status()?
            .json()
            .await
            .context("routing response was not JSON")?;
        Ok(data.pointer("/routes/0/duration").and_then(Value::as_f64))
    }
}

/// `"Xh Ym"`, or `"Ym"` under an hour.
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let (hours, minutes) = (total / 3600, (total % 3600) / 60);
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_coordinates() {
        assert_eq!(
            parse_coordinates("28.5383, -81.3792"),
            Some(LatLng { lat: 28.5383, lng: -81.3792 })
        );
        assert_eq!(parse_coordinates("Orlando, FL"), None);
        assert_eq!(parse_coordinates("Orlando"), None);
    }

    #[test]
    fn test_place_label_prefers_city() {
        let data = json!({"address": {"city": "Orlando", "county": "Orange", "state": "Florida"}});
        assert_eq!(place_label(&data).as_deref(), Some("Orlando, Florida"));
    }

    #[test]
    fn test_place_label_falls_back_to_county() {
        let data = json!({"address": {"county": "Orange", "state": "Florida"}});
        assert_eq!(place_label(&data).as_deref(), Some("Orange, Florida"));
        assert_eq!(place_label(&json!({"error": "Unable to geocode"})), None);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(7_500.0), "2h 5m");
        assert_eq!(format_duration(1_260.0), "21m");
    }
}
