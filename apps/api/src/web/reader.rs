//! Page reader through the Jina proxy, which renders JavaScript-heavy pages
//! (physician directories, profile pages) and returns markdown.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;

const MAX_PAGE_CHARS: usize = 6000;

#[derive(Clone)]
pub struct PageReader {
    client: Client,
    base_url: String,
}

impl PageReader {
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(35))
                .build()
                .context("building reader HTTP client")?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn read(&self, url: &str) -> Result<String> {
        let body = self
            .client
            .get(format!("{}/{}", self.base_url, url))
            .header("Accept", "text/markdown")
            .header("X-Return-Format", "markdown")
            .header("X-Timeout", "30")
            .send()
            .await
            .with_context(|| format!("reading {url}"))?
            .text()
            .await
            .with_context(|| format!("decoding {url}"))?;
        Ok(clip_page(body.trim()))
    }
}

/// Caps page text at 6000 characters with a truncation marker.
pub fn clip_page(content: &str) -> String {
    match content.char_indices().nth(MAX_PAGE_CHARS) {
        Some((cut, _)) => format!("{}\n...[content truncated]", &content[..cut]),
        None => content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_short_page_unchanged() {
        assert_eq!(clip_page("Dr. Jane Roe, MD"), "Dr. Jane Roe, MD");
    }

    #[test]
    fn test_clip_long_page() {
        let page = "é".repeat(MAX_PAGE_CHARS + 10);
        let clipped = clip_page(&page);
        assert!(clipped.ends_with("\n...[content truncated]"));
        assert_eq!(
            clipped.trim_end_matches("\n...[content truncated]").chars().count(),
            MAX_PAGE_CHARS
        );
    }
}
