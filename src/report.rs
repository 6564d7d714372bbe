//! Report compiler.
//!
//! Aggregates adjudicated deviations into a compliance score and a
//! deterministic structured/narrative report. The narrative text is a pure
//! function of the report data: the creation timestamp is a report field
//! but never appears in the text, so identical inputs produce identical
//! text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::adjudicator::{AdjudicatedDeviation, Verdict};
use crate::comparator::DeviationKind;
use crate::util::truncate;

/// Severity weighting of the compliance score.
///
/// The score starts from mandatory-step coverage and is reduced further per
/// adjudicated deviation. Constants are an explicit policy, not an inferred
/// behavior: a confirmed deviation costs 0.10, a confirmed safety skip an
/// additional 0.05 on top, an unresolved (context-dependent) finding 0.025,
/// and a mitigated one nothing.
#[derive(Debug, Clone, Copy)]
pub struct ScorePolicy {
    pub confirmed_penalty: f64,
    /// Extra penalty when a confirmed deviation is a safety skip
    pub safety_penalty: f64,
    pub context_penalty: f64,
    pub mitigated_penalty: f64,
}

impl Default for ScorePolicy {
    fn default() -> Self {
        Self {
            confirmed_penalty: 0.10,
            safety_penalty: 0.05,
            context_penalty: 0.025,
            mitigated_penalty: 0.0,
        }
    }
}

/// The final artifact of one analysis run. At most one exists per run id;
/// re-analysis replaces it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub run_id: String,
    pub procedure_id: String,
    pub procedure_name: String,
    /// Weighted compliance score in [0, 1]
    pub compliance_score: f64,
    /// Mandatory steps in the protocol
    pub total_expected: usize,
    /// Distinct mandatory steps observed
    pub total_observed: usize,
    pub confirmed_count: usize,
    pub mitigated_count: usize,
    pub review_count: usize,
    pub confirmed_deviations: Vec<AdjudicatedDeviation>,
    pub mitigated_deviations: Vec<AdjudicatedDeviation>,
    pub review_deviations: Vec<AdjudicatedDeviation>,
    /// Warnings for events dropped during validation
    pub warnings: Vec<String>,
    /// Deterministic human-readable rendering of the data above
    pub report_text: String,
    pub created_at: DateTime<Utc>,
}

/// Compiles adjudicated deviations into the final report
pub struct ReportCompiler {
    policy: ScorePolicy,
}

impl ReportCompiler {
    pub fn new() -> Self {
        Self {
            policy: ScorePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ScorePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Build the full compliance report. Deviations are sorted
    /// deterministically first, so adjudication completion order never
    /// affects the output.
    #[allow(clippy::too_many_arguments)]
    pub fn compile(
        &self,
        run_id: &str,
        procedure_id: &str,
        procedure_name: &str,
        mut adjudicated: Vec<AdjudicatedDeviation>,
        total_expected: usize,
        total_observed: usize,
        warnings: Vec<String>,
    ) -> ComplianceReport {
        adjudicated.sort_by(|a, b| {
            (a.deviation.step_id.as_str(), a.deviation.kind)
                .cmp(&(b.deviation.step_id.as_str(), b.deviation.kind))
        });

        let score = self.compute_score(total_expected, total_observed, &adjudicated);

        let confirmed: Vec<AdjudicatedDeviation> = adjudicated
            .iter()
            .filter(|d| d.verdict == Verdict::Confirmed)
            .cloned()
            .collect();
        let mitigated: Vec<AdjudicatedDeviation> = adjudicated
            .iter()
            .filter(|d| d.verdict == Verdict::Mitigated)
            .cloned()
            .collect();
        let review: Vec<AdjudicatedDeviation> = adjudicated
            .iter()
            .filter(|d| d.verdict == Verdict::ContextDependent)
            .cloned()
            .collect();

        let report_text = render_text(
            procedure_name,
            run_id,
            score,
            total_expected,
            total_observed,
            &confirmed,
            &mitigated,
            &review,
            &warnings,
        );

        ComplianceReport {
            run_id: run_id.to_string(),
            procedure_id: procedure_id.to_string(),
            procedure_name: procedure_name.to_string(),
            compliance_score: score,
            total_expected,
            total_observed,
            confirmed_count: confirmed.len(),
            mitigated_count: mitigated.len(),
            review_count: review.len(),
            confirmed_deviations: confirmed,
            mitigated_deviations: mitigated,
            review_deviations: review,
            warnings,
            report_text,
            created_at: Utc::now(),
        }
    }

    /// Coverage of mandatory steps, reduced by per-verdict penalties,
    /// clamped to [0, 1] and rounded to 4 decimal places.
    fn compute_score(
        &self,
        total_expected: usize,
        total_observed: usize,
        adjudicated: &[AdjudicatedDeviation],
    ) -> f64 {
        if total_expected == 0 {
            return 1.0;
        }
        let coverage = (total_observed as f64 / total_expected as f64).clamp(0.0, 1.0);

        let penalty: f64 = adjudicated
            .iter()
            .map(|d| match d.verdict {
                Verdict::Confirmed => {
                    let extra = if d.deviation.kind == DeviationKind::SkippedSafety {
                        self.policy.safety_penalty
                    } else {
                        0.0
                    };
                    self.policy.confirmed_penalty + extra
                }
                Verdict::ContextDependent => self.policy.context_penalty,
                Verdict::Mitigated => self.policy.mitigated_penalty,
            })
            .sum();

        round4((coverage - penalty).clamp(0.0, 1.0))
    }
}

impl Default for ReportCompiler {
    fn default() -> Self {
        Self::new()
    }
}

fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

fn severity_label(verdict: Verdict) -> &'static str {
    match verdict {
        Verdict::Confirmed => "CONFIRMED",
        Verdict::Mitigated => "MITIGATED",
        Verdict::ContextDependent => "REVIEW NEEDED",
    }
}

fn format_deviation_block(dev: &AdjudicatedDeviation) -> String {
    let mut lines = vec![
        format!("  [{}] {}", severity_label(dev.verdict), dev.deviation.step_name),
        format!("    Type: {}", dev.deviation.kind),
        format!("    Phase: {}", dev.deviation.phase),
        format!("    Safety-critical: {}", dev.deviation.safety_critical),
    ];
    if !dev.evidence_summary.is_empty() {
        lines.push(format!(
            "    Evidence: {}",
            truncate(&dev.evidence_summary, 300)
        ));
    }
    if !dev.citations.is_empty() {
        let cited: Vec<&str> = dev.citations.iter().take(5).map(String::as_str).collect();
        lines.push(format!("    Citations: {}", cited.join(", ")));
    }
    lines.join("\n")
}

#[allow(clippy::too_many_arguments)]
fn render_text(
    procedure_name: &str,
    run_id: &str,
    score: f64,
    total_expected: usize,
    total_observed: usize,
    confirmed: &[AdjudicatedDeviation],
    mitigated: &[AdjudicatedDeviation],
    review: &[AdjudicatedDeviation],
    warnings: &[String],
) -> String {
    let divider = "=".repeat(60);
    let thin = "-".repeat(60);
    let total = confirmed.len() + mitigated.len() + review.len();

    let mut lines = vec![
        divider.clone(),
        "POST-OPERATIVE COMPLIANCE REPORT".to_string(),
        format!("Procedure: {}", procedure_name),
        format!("Run ID: {}", run_id),
        format!("Compliance Score: {:.1}%", score * 100.0),
        divider.clone(),
        String::new(),
        format!("Steps expected: {}", total_expected),
        format!("Steps observed: {}", total_observed),
        format!("Deviations found: {}", total),
        format!("  Confirmed: {}", confirmed.len()),
        format!("  Mitigated: {}", mitigated.len()),
        format!("  Needs review: {}", review.len()),
        String::new(),
    ];

    for (title, group) in [
        ("CONFIRMED DEVIATIONS", confirmed),
        ("DEVIATIONS PENDING REVIEW", review),
        ("MITIGATED DEVIATIONS (no score penalty)", mitigated),
    ] {
        if group.is_empty() {
            continue;
        }
        lines.push(thin.clone());
        lines.push(title.to_string());
        lines.push(thin.clone());
        for dev in group {
            lines.push(format_deviation_block(dev));
            lines.push(String::new());
        }
    }

    if total == 0 {
        lines.push("No deviations detected. Full compliance.".to_string());
    }

    if !warnings.is_empty() {
        lines.push(thin.clone());
        lines.push("WARNINGS".to_string());
        lines.push(thin);
        for w in warnings {
            lines.push(format!("  - {}", w));
        }
    }

    lines.push(divider);
    lines.join("\n")
}
