//! scite.ai literature search client.
//!
//! Fetches inline citation snippets from surgical literature via the scite
//! Search API. Snippets arrive as HTML fragments; tags and inline citation
//! markup are stripped before scoring.

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::evidence::{LiteratureSearch, Snippet};
use crate::error::{AnalysisError, AnalysisResult};

/// Snippets shorter than this carry no usable claim
const MIN_SNIPPET_CHARS: usize = 30;

/// Client for the scite.ai citation search API
pub struct SciteSearch {
    client: Client,
    base_url: String,
    api_key: String,
    limit: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(default)]
    doi: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    citations: Vec<Citation>,
}

#[derive(Debug, Deserialize)]
struct Citation {
    #[serde(default)]
    snippet: String,
}

impl SciteSearch {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .user_agent("sop_compliance/0.1.0")
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            limit: 5,
        }
    }

    /// Max snippets requested per query
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Strip inline `<cite>` markup and remaining tags, then decode entities
fn clean_html(text: &str) -> String {
    let mut cleaned = text.to_string();
    if let Ok(cite) = Regex::new(r"(?s)<cite[^>]*>.*?</cite>") {
        cleaned = cite.replace_all(&cleaned, "").into_owned();
    }
    if let Ok(tags) = Regex::new(r"<[^>]+>") {
        cleaned = tags.replace_all(&cleaned, "").into_owned();
    }
    html_escape::decode_html_entities(cleaned.trim()).to_string()
}

#[async_trait]
impl LiteratureSearch for SciteSearch {
    async fn search(&self, query: &str) -> AnalysisResult<Vec<Snippet>> {
        if self.api_key.is_empty() {
            return Err(AnalysisError::EvidenceUnavailable(
                "scite API key not configured".to_string(),
            ));
        }

        debug!("scite search: {}", query);
        let response = self
            .client
            .get(format!("{}/search/v2", self.base_url))
            .query(&[
                ("term", query),
                ("mode", "citations"),
                ("limit", &self.limit.to_string()),
            ])
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| AnalysisError::EvidenceUnavailable(format!("scite request: {}", e)))?;

        if !response.status().is_success() {
            return Err(AnalysisError::EvidenceUnavailable(format!(
                "scite API error: {}",
                response.status()
            )));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::EvidenceUnavailable(format!("scite response: {}", e)))?;

        let mut snippets = Vec::new();
        for hit in body.hits {
            let title = clean_html(&hit.title);
            for cite in hit.citations {
                if cite.snippet.is_empty() {
                    continue;
                }
                let text = clean_html(&cite.snippet);
                if text.len() < MIN_SNIPPET_CHARS {
                    continue;
                }
                snippets.push(Snippet::new(text, title.clone(), hit.doi.clone()));
            }
        }
        debug!("scite returned {} usable snippets", snippets.len());
        Ok(snippets)
    }
}
