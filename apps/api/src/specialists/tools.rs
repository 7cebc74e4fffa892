//! The two tools the researcher agent can call: ranked web search and a
//! JavaScript-aware page reader.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::web::{PageReader, SearchHit, YouSearchClient};

const SEARCH_COUNT: u32 = 10;
const NO_RESULTS: &str = "No results found.";
const EMPTY_PAGE: &str = "Page returned no readable content.";

/// URL fragments of individual physician profile pages.
const PROFILE_PATTERNS: &[&str] = &[
    "/doctor/",
    "/physician/",
    "/provider/",
    "/faculty/",
    "/staff/",
    "/find-a-doctor/",
    "/our-team/",
    "/profile/",
    "/bio/",
    "/physicians/",
    "/doctors/",
    "/specialists/",
    "/expert/",
];

/// URL fragments of pages that rarely name physicians.
const SKIP_PATTERNS: &[&str] = &[
    "/news/",
    "/blog/",
    "/events/",
    "/careers/",
    "/jobs/",
    "/location/",
    "/condition/",
    "/treatment/",
    "/service/",
];

const ROLE_WORDS: &[&str] = &["physician", "specialist", "surgeon", "faculty", "board certified"];

/// Tool surface for the researcher. Both calls render their outcome as text
/// for the transcript, failures included.
#[async_trait]
pub trait WebTools: Send + Sync {
    async fn search(&self, query: &str) -> String;
    async fn read(&self, url: &str) -> String;
}

pub struct LiveWebTools<'a> {
    pub search: Option<&'a YouSearchClient>,
    pub reader: &'a PageReader,
}

#[async_trait]
impl WebTools for LiveWebTools<'_> {
    async fn search(&self, query: &str) -> String {
        let Some(client) = self.search else {
            return "Error: YDC_API_KEY environment variable is missing.".to_string();
        };
        info!("Specialist search: {query}");
        match client.search(query, SEARCH_COUNT).await {
            Ok(hits) => {
                info!("Specialist search returned {} results", hits.len());
                format_ranked(&hits)
            }
            Err(e) => {
                warn!("Specialist search failed: {e:#}");
                format!("Search failed: {e}")
            }
        }
    }

    async fn read(&self, url: &str) -> String {
        match self.reader.read(url).await {
            Ok(content) if content.trim().is_empty() => EMPTY_PAGE.to_string(),
            Ok(content) => {
                info!("Read {} chars from {url}", content.len());
                content
            }
            Err(e) => format!("Failed to read {url}: {e}"),
        }
    }
}

/// Relevance of a hit for finding named physicians.
pub fn score_hit(hit: &SearchHit) -> i32 {
    let url = hit.url.to_lowercase();
    let text = format!(
        "{} {} {}",
        hit.title,
        hit.description,
        hit.snippets.join(" ")
    )
    .to_lowercase();

    let mut score = 0;
    if PROFILE_PATTERNS.iter().any(|p| url.contains(p)) {
        score += 3;
    }
    if SKIP_PATTERNS.iter().any(|p| url.contains(p)) {
        score -= 2;
    }
    if text.contains("dr.") || text.contains(" m.d.") || text.contains(", md") {
        score += 3;
    }
    if ROLE_WORDS.iter().any(|w| text.contains(w)) {
        score += 1;
    }
    score
}

/// Hits as `[SCORE:n]` blocks, best first. Ties keep search order.
pub fn format_ranked(hits: &[SearchHit]) -> String {
    let mut ranked: Vec<(i32, &SearchHit)> = hits.iter().map(|hit| (score_hit(hit), hit)).collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0));

    if ranked.is_empty() {
        return NO_RESULTS.to_string();
    }
    ranked
        .into_iter()
        .map(|(score, hit)| {
            format!(
                "[SCORE:{score}]\nTITLE: {}\nURL: {}\nCONTENT: {}\n",
                hit.title,
                hit.url,
                hit.summary()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}
