//! Zero-shot entailment scoring over HTTP.
//!
//! Talks to an NLI inference endpoint (DeBERTa-class model served behind a
//! simple premise/hypothesis API) and returns a single entailment
//! confidence per call.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::evidence::EntailmentScorer;
use crate::error::{AnalysisError, AnalysisResult};

/// Client for a premise/hypothesis entailment scoring endpoint
pub struct HttpEntailmentScorer {
    client: Client,
    url: String,
}

#[derive(Debug, Serialize)]
struct ScoreRequest<'a> {
    premise: &'a str,
    hypothesis: &'a str,
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    score: f64,
}

impl HttpEntailmentScorer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .user_agent("sop_compliance/0.1.0")
                .build()
                .unwrap_or_default(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl EntailmentScorer for HttpEntailmentScorer {
    async fn score(&self, text: &str, hypothesis: &str) -> AnalysisResult<f64> {
        debug!("entailment score request ({} chars)", text.len());
        let response = self
            .client
            .post(&self.url)
            .json(&ScoreRequest {
                premise: text,
                hypothesis,
            })
            .send()
            .await
            .map_err(|e| {
                AnalysisError::EvidenceUnavailable(format!("entailment request: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(AnalysisError::EvidenceUnavailable(format!(
                "entailment service error: {}",
                response.status()
            )));
        }

        let body: ScoreResponse = response.json().await.map_err(|e| {
            AnalysisError::EvidenceUnavailable(format!("entailment response: {}", e))
        })?;

        Ok(body.score.clamp(0.0, 1.0))
    }
}
