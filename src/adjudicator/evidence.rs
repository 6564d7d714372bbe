//! Evidence capability interfaces.
//!
//! Literature search and entailment scoring are external capabilities with
//! a single method each, so the core can be tested with deterministic fakes
//! instead of live network calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AnalysisResult;

/// Hypothesis scored for risk polarity: the deviation matters clinically.
pub const RISK_HYPOTHESIS: &str = "Omitting or misordering this surgical step increases the \
     risk of patient harm, injury, or complications.";

/// Hypothesis scored for safety polarity: the deviation is acceptable.
pub const SAFETY_HYPOTHESIS: &str = "This surgical step can be safely omitted, reordered, or \
     varied without increasing patient risk.";

/// A citation snippet returned by the literature service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    /// Quoted text from the source
    pub text: String,
    /// Human-readable source (article title)
    pub source: String,
    /// Stable identifier (DOI or equivalent)
    pub identifier: String,
}

impl Snippet {
    pub fn new(
        text: impl Into<String>,
        source: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            source: source.into(),
            identifier: identifier.into(),
        }
    }
}

/// Which hypothesis a snippet supports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Risk,
    Safety,
}

/// A snippet with its entailment verdict attached
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredSnippet {
    pub snippet: Snippet,
    pub polarity: Polarity,
    /// Entailment confidence in [0, 1] for the winning hypothesis
    pub confidence: f64,
}

/// Citation snippet retrieval from surgical literature
#[async_trait]
pub trait LiteratureSearch: Send + Sync {
    async fn search(&self, query: &str) -> AnalysisResult<Vec<Snippet>>;
}

/// Textual entailment scoring of a snippet against one hypothesis
#[async_trait]
pub trait EntailmentScorer: Send + Sync {
    /// Confidence in [0, 1] that `text` entails `hypothesis`
    async fn score(&self, text: &str, hypothesis: &str) -> AnalysisResult<f64>;
}
