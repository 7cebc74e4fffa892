//! Turning search hits into facility cards.

use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use serde::Serialize;

use crate::text::clip_with_ellipsis;
use crate::web::{LatLng, SearchHit};

/// Department-style titles that say nothing about which hospital it is.
static GENERIC_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:interventional|radiology|imaging|mri|ct|paragonimiasis|services|treatment|clinic)\b")
        .expect("valid regex")
});

/// Words that get glued together in hospital domains (`americanhealthimaging`).
static DOMAIN_WORDS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(american|national|regional|state|county|city|health|imaging|medical|care|hospital|clinic|center|florida|new|york|texas|memorial|university|mount|sinai|ny|nyp|nsuh|tmh|general|childrens|cancer|institute|pediatric)",
    )
    .expect("valid regex")
});

pub const US_CENTER: LatLng = LatLng {
    lat: 39.8283,
    lng: -98.5795,
};
const JITTER_DEGREES: f64 = 0.06;
const REASON_MAX_CHARS: usize = 350;
pub const DEFAULT_REASON: &str = "Specialized care facility.";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Center {
    pub name: String,
    pub url: String,
    pub capability: String,
    pub travel: String,
    pub reason: String,
    pub lat: f64,
    pub lng: f64,
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// First label of the URL host, minus `www.`.
pub fn domain_stem(url: &str) -> &str {
    let host = url.split_once("://").map_or(url, |(_, rest)| rest);
    let host = host.split(['/', '?', '#']).next().unwrap_or_default();
    let host = host.strip_prefix("www.").unwrap_or(host);
    host.split(['.', ':']).next().unwrap_or_default()
}

/// `"americanhealthimaging"` → `"American Health Imaging"`.
pub fn prettify_domain(stem: &str) -> String {
    DOMAIN_WORDS
        .replace_all(stem, " ${1} ")
        .split_whitespace()
        .map(title_case)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Display name for a hit: the title up to the first ` | ` or ` - `, swapped
/// for a name derived from the domain when the title is a department label.
pub fn center_name(title: &str, url: &str) -> String {
    let mut name = title
        .split(" | ")
        .next()
        .unwrap_or_default()
        .split(" - ")
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();

    if GENERIC_NAME.is_match(&name) {
        let pretty = prettify_domain(domain_stem(url));
        if !pretty.is_empty() {
            name = format!("{pretty} Hospital");
        }
    }
    name.replace("...", "").trim().to_string()
}

pub fn reason(hit: &SearchHit) -> String {
    let summary = hit.summary();
    let summary = summary.trim();
    if summary.is_empty() {
        DEFAULT_REASON.to_string()
    } else {
        clip_with_ellipsis(summary, REASON_MAX_CHARS)
    }
}

/// Rank-based capability score: first hit 99%.
pub fn capability(rank: usize) -> String {
    format!("{}%", 99usize.saturating_sub(rank))
}

/// Placeholder ETA when routing fails.
pub fn fallback_travel(rank: usize) -> String {
    format!("{}h {}m", 1 + rank, (rank * 15) % 60)
}

/// A point near `around` for facilities Nominatim cannot place.
pub fn jitter(around: LatLng) -> LatLng {
    let mut rng = rand::thread_rng();
    LatLng {
        lat: around.lat + rng.gen_range(-JITTER_DEGREES..=JITTER_DEGREES),
        lng: around.lng + rng.gen_range(-JITTER_DEGREES..=JITTER_DEGREES),
    }
}

pub fn search_query(
    diagnosis: &str,
    location_label: &str,
    equipment: Option<&str>,
    max_distance: Option<&str>,
) -> String {
    let distance = max_distance
        .map(|miles| format!(" within {miles} miles"))
        .unwrap_or_default();
    format!(
        "top hospitals medical centers {location_label}{distance} treating {diagnosis} {}",
        equipment.unwrap_or_default()
    )
}

/// Well-known referral centres returned when search yields nothing usable.
pub fn fallback_centers(diagnosis: &str) -> Vec<Center> {
    let center = |name: &str, url: &str, capability: &str, travel: &str, reason: String, lat, lng| Center {
        name: name.to_string(),
        url: url.to_string(),
        capability: capability.to_string(),
        travel: travel.to_string(),
        reason,
        lat,
        lng,
    };
    vec![
        center(
            "Mayo Clinic — Rochester",
            "https://www.mayoclinic.org/patient-visitor-guide/minnesota",
            "100%",
            "2h 10m",
            format!("Interventional Pulmonology + Leading care for {diagnosis}"),
            44.0227,
            -92.4667,
        ),
        center(
            "Cleveland Clinic",
            "https://my.clevelandclinic.org/locations",
            "95%",
            "1h 55m",
            "Thoracic surgery + Clinical trials".to_string(),
            41.5034,
            -81.6206,
        ),
        center(
            "Mass General",
            "https://www.massgeneral.org/",
            "90%",
            "3h 05m",
            "Radiation oncology + Research program".to_string(),
            42.3621,
            -71.0691,
        ),
    ]
}
