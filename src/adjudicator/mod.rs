//! Evidence adjudicator.
//!
//! Turns each raw deviation into a severity verdict backed by literature
//! snippets and entailment scores. One task per deviation, fanned out onto
//! a bounded worker pool with a per-task deadline; a failed or timed-out
//! task degrades to `context_dependent` instead of failing the run.

mod entailment;
mod evidence;
mod scite;

pub use entailment::HttpEntailmentScorer;
pub use evidence::{
    EntailmentScorer, LiteratureSearch, Polarity, ScoredSnippet, Snippet, RISK_HYPOTHESIS,
    SAFETY_HYPOTHESIS,
};
pub use scite::SciteSearch;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::comparator::{DeviationKind, RawDeviation};
use crate::error::{AnalysisError, AnalysisResult};
use crate::util::truncate;

/// Adjudicated severity of a deviation. Closed enumeration; the export
/// layer depends on these exact serialized values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Confirmed,
    Mitigated,
    ContextDependent,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Confirmed => "confirmed",
            Verdict::Mitigated => "mitigated",
            Verdict::ContextDependent => "context_dependent",
        };
        write!(f, "{}", s)
    }
}

/// A raw deviation with its verdict and audit trail attached.
/// Immutable once produced; the report compiler only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjudicatedDeviation {
    #[serde(flatten)]
    pub deviation: RawDeviation,
    pub verdict: Verdict,
    /// Human-auditable summary of the snippets behind the verdict
    pub evidence_summary: String,
    /// Deduplicated source references
    pub citations: Vec<String>,
}

/// Verdict thresholds over the aggregated risk ratio.
///
/// Safety-critical deviations confirm at a lower ratio, reflecting lower
/// tolerance for ambiguity on gated steps.
#[derive(Debug, Clone, Copy)]
pub struct VerdictPolicy {
    pub confirm_threshold: f64,
    pub confirm_threshold_safety: f64,
    pub mitigate_threshold: f64,
}

impl Default for VerdictPolicy {
    fn default() -> Self {
        Self {
            confirm_threshold: 0.7,
            confirm_threshold_safety: 0.6,
            mitigate_threshold: 0.3,
        }
    }
}

impl VerdictPolicy {
    /// Pure verdict function over the aggregated risk ratio
    pub fn classify(&self, risk_ratio: f64, safety_critical: bool) -> Verdict {
        let confirm = if safety_critical {
            self.confirm_threshold_safety
        } else {
            self.confirm_threshold
        };
        if risk_ratio >= confirm {
            Verdict::Confirmed
        } else if risk_ratio <= self.mitigate_threshold {
            Verdict::Mitigated
        } else {
            Verdict::ContextDependent
        }
    }
}

/// Adjudicates raw deviations against external literature evidence
pub struct Adjudicator {
    search: Arc<dyn LiteratureSearch>,
    scorer: Arc<dyn EntailmentScorer>,
    policy: VerdictPolicy,
    workers: Arc<Semaphore>,
    task_timeout: Duration,
    max_snippets: usize,
}

impl Adjudicator {
    pub fn new(search: Arc<dyn LiteratureSearch>, scorer: Arc<dyn EntailmentScorer>) -> Self {
        Self {
            search,
            scorer,
            policy: VerdictPolicy::default(),
            workers: Arc::new(Semaphore::new(4)),
            task_timeout: Duration::from_secs(20),
            max_snippets: 10,
        }
    }

    pub fn with_policy(mut self, policy: VerdictPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Arc::new(Semaphore::new(workers.max(1)));
        self
    }

    pub fn with_timeout(mut self, task_timeout: Duration) -> Self {
        self.task_timeout = task_timeout;
        self
    }

    /// Bound on snippets analyzed per deviation across all queries
    pub fn with_max_snippets(mut self, max_snippets: usize) -> Self {
        self.max_snippets = max_snippets;
        self
    }

    /// Adjudicate every deviation of one run. Tasks run concurrently under
    /// the worker limit; output order matches input order regardless of
    /// completion order.
    pub async fn adjudicate_all(
        &self,
        deviations: Vec<RawDeviation>,
        procedure_name: &str,
    ) -> Vec<AdjudicatedDeviation> {
        let tasks = deviations
            .into_iter()
            .map(|dev| self.adjudicate(dev, procedure_name));
        join_all(tasks).await
    }

    /// Adjudicate a single deviation. Never fails: external errors and
    /// deadline misses degrade the verdict to `context_dependent`.
    pub async fn adjudicate(
        &self,
        deviation: RawDeviation,
        procedure_name: &str,
    ) -> AdjudicatedDeviation {
        let _permit = match self.workers.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                return self.degrade(deviation, &AnalysisError::EvidenceUnavailable(e.to_string()))
            }
        };

        match timeout(
            self.task_timeout,
            self.adjudicate_inner(&deviation, procedure_name),
        )
        .await
        {
            Ok(Ok(adjudicated)) => adjudicated,
            Ok(Err(e)) => self.degrade(deviation, &e),
            Err(_) => self.degrade(
                deviation,
                &AnalysisError::EvidenceTimeout(self.task_timeout.as_secs()),
            ),
        }
    }

    async fn adjudicate_inner(
        &self,
        deviation: &RawDeviation,
        procedure_name: &str,
    ) -> AnalysisResult<AdjudicatedDeviation> {
        let queries = build_queries(deviation, procedure_name);

        let mut snippets: Vec<Snippet> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for query in &queries {
            for snippet in self.search.search(query).await? {
                let key = format!("{}:{}", snippet.identifier, truncate(&snippet.text, 50));
                if seen.insert(key) {
                    snippets.push(snippet);
                }
            }
        }
        snippets.truncate(self.max_snippets);
        debug!(
            "adjudicating '{}' ({}): {} snippets",
            deviation.step_id,
            deviation.kind,
            snippets.len()
        );

        let mut scored = Vec::with_capacity(snippets.len());
        for snippet in snippets {
            let risk = self.scorer.score(&snippet.text, RISK_HYPOTHESIS).await?;
            let safety = self.scorer.score(&snippet.text, SAFETY_HYPOTHESIS).await?;
            let (polarity, confidence) = if risk >= safety {
                (Polarity::Risk, risk)
            } else {
                (Polarity::Safety, safety)
            };
            scored.push(ScoredSnippet {
                snippet,
                polarity,
                confidence,
            });
        }

        let ratio = risk_ratio(&scored);
        let verdict = self.policy.classify(ratio, deviation.safety_critical);

        Ok(AdjudicatedDeviation {
            deviation: deviation.clone(),
            verdict,
            evidence_summary: build_evidence_summary(deviation, &scored),
            citations: extract_citations(&scored),
        })
    }

    fn degrade(&self, deviation: RawDeviation, cause: &AnalysisError) -> AdjudicatedDeviation {
        warn!(
            "adjudication degraded for '{}' ({}): {}",
            deviation.step_id, deviation.kind, cause
        );
        AdjudicatedDeviation {
            deviation,
            verdict: Verdict::ContextDependent,
            evidence_summary: format!(
                "Evidence could not be gathered: {}. Manual review required.",
                cause
            ),
            citations: Vec::new(),
        }
    }
}

/// riskWeight / (riskWeight + safetyWeight), 0.5 when no evidence
fn risk_ratio(scored: &[ScoredSnippet]) -> f64 {
    let risk: f64 = scored
        .iter()
        .filter(|s| s.polarity == Polarity::Risk)
        .map(|s| s.confidence)
        .sum();
    let safety: f64 = scored
        .iter()
        .filter(|s| s.polarity == Polarity::Safety)
        .map(|s| s.confidence)
        .sum();
    let total = risk + safety;
    if total == 0.0 {
        0.5
    } else {
        risk / total
    }
}

/// Kind-specific literature queries for one deviation
fn build_queries(deviation: &RawDeviation, procedure_name: &str) -> Vec<String> {
    let step = &deviation.step_name;
    match deviation.kind {
        DeviationKind::SkippedSafety => vec![
            format!("\"{}\" injury complication risk", step),
            format!("\"{}\" omission patient harm prevention", step),
        ],
        DeviationKind::Missing => vec![
            format!("\"{}\" omission complication {}", step, procedure_name),
            format!("without \"{}\" outcome risk", step),
        ],
        DeviationKind::OutOfOrder => vec![
            format!("\"{}\" order sequence technique {}", step, procedure_name),
            format!("\"{}\" timing outcome", step),
        ],
        DeviationKind::UnhandledComplication => {
            vec![format!("\"{}\" uncontrolled complication outcome", step)]
        }
    }
}

/// Audit summary of the scored snippets, sufficient for a reviewer to judge
/// the verdict without re-querying external services.
fn build_evidence_summary(deviation: &RawDeviation, scored: &[ScoredSnippet]) -> String {
    let supporting = scored
        .iter()
        .filter(|s| s.polarity == Polarity::Risk)
        .count();
    let contrasting = scored.len() - supporting;

    let mut lines = vec![
        format!(
            "Evidence analysis for: '{}' ({})",
            deviation.step_name, deviation.kind
        ),
        format!(
            "  Snippets analyzed: {} ({} supporting risk, {} suggesting acceptability)",
            scored.len(),
            supporting,
            contrasting
        ),
        String::new(),
    ];

    let mut risk_items: Vec<&ScoredSnippet> = scored
        .iter()
        .filter(|s| s.polarity == Polarity::Risk)
        .collect();
    let mut safety_items: Vec<&ScoredSnippet> = scored
        .iter()
        .filter(|s| s.polarity == Polarity::Safety)
        .collect();
    risk_items.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    safety_items.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    if !risk_items.is_empty() {
        lines.push("Evidence this deviation is clinically significant:".to_string());
        for item in &risk_items {
            lines.push(format!(
                "  - [confidence: {:.0}%] \"{}\"",
                item.confidence * 100.0,
                truncate(&item.snippet.text, 280)
            ));
            lines.push(format!(
                "    Source: {} ({})",
                truncate(&item.snippet.source, 80),
                item.snippet.identifier
            ));
        }
    }

    if !safety_items.is_empty() {
        lines.push(String::new());
        lines.push("Evidence this deviation may be acceptable:".to_string());
        for item in &safety_items {
            lines.push(format!(
                "  - [confidence: {:.0}%] \"{}\"",
                item.confidence * 100.0,
                truncate(&item.snippet.text, 280)
            ));
            lines.push(format!(
                "    Source: {} ({})",
                truncate(&item.snippet.source, 80),
                item.snippet.identifier
            ));
        }
    }

    if scored.is_empty() {
        lines.push("No relevant citation snippets found for this deviation.".to_string());
    }

    lines.join("\n")
}

/// Deduplicated source references, strongest-first as returned
fn extract_citations(scored: &[ScoredSnippet]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut citations = Vec::new();
    for item in scored {
        let id = &item.snippet.identifier;
        if id.is_empty() || !seen.insert(id.clone()) {
            continue;
        }
        citations.push(format!(
            "{} ({})",
            truncate(&item.snippet.source, 80),
            id
        ));
        if citations.len() >= 6 {
            break;
        }
    }
    citations
}
