//! End-to-end pipeline scenarios over the abscess SOP.
//!
//! Full flow: load gold-standard graph from sop/, seed a run with observed
//! events, compare, adjudicate against deterministic fake evidence
//! services, compile and store the report.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use sop_compliance::adjudicator::{
    Adjudicator, EntailmentScorer, LiteratureSearch, Snippet, RISK_HYPOTHESIS,
};
use sop_compliance::error::{AnalysisError, AnalysisResult};
use sop_compliance::events::ObservedEvent;
use sop_compliance::graph::JsonGraphStore;
use sop_compliance::pipeline::AnalysisEngine;
use sop_compliance::storage::{MemoryRunStore, ProcedureRun, RunStatus, RunStore};
use sop_compliance::{DeviationKind, Verdict};

const PROCEDURE_ID: &str = "incision_drainage_abscess";

/// All 13 mandatory steps in expected order, minute offsets from start.
/// wound_culture (optional) and uncontrolled_bleeding (complication) are
/// deliberately absent.
const ORDERED_TIMELINE: &[(&str, i64)] = &[
    ("patient_consent", 0),
    ("timeout_verification", 2),
    ("site_identification", 4),
    ("skin_antisepsis", 6),
    ("local_anesthesia", 8),
    ("incision", 12),
    ("drainage_expression", 14),
    ("loculation_breakdown", 16),
    ("wound_irrigation", 18),
    ("hemostasis_check", 20),
    ("wound_packing", 22),
    ("dressing_application", 24),
    ("post_procedure_instructions", 26),
];

// ── Deterministic fakes ────────────────────────────────────

struct FixedSearch {
    snippets: Vec<Snippet>,
}

#[async_trait]
impl LiteratureSearch for FixedSearch {
    async fn search(&self, _query: &str) -> AnalysisResult<Vec<Snippet>> {
        Ok(self.snippets.clone())
    }
}

struct FailingSearch;

#[async_trait]
impl LiteratureSearch for FailingSearch {
    async fn search(&self, _query: &str) -> AnalysisResult<Vec<Snippet>> {
        Err(AnalysisError::EvidenceUnavailable(
            "literature service offline".into(),
        ))
    }
}

struct FixedScorer {
    risk: f64,
    safety: f64,
}

#[async_trait]
impl EntailmentScorer for FixedScorer {
    async fn score(&self, _text: &str, hypothesis: &str) -> AnalysisResult<f64> {
        if hypothesis == RISK_HYPOTHESIS {
            Ok(self.risk)
        } else {
            Ok(self.safety)
        }
    }
}

fn evidence_snippets() -> Vec<Snippet> {
    vec![
        Snippet::new(
            "Inadequate drainage technique was associated with abscess recurrence and readmission.",
            "Outcomes of incision and drainage procedures",
            "10.1000/j.demo.1",
        ),
        Snippet::new(
            "Structured wound management protocols reduced complication rates across cohorts.",
            "Wound management protocol adherence study",
            "10.1000/j.demo.2",
        ),
    ]
}

// ── Harness ────────────────────────────────────────────────

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap()
}

fn engine_with(
    search: Arc<dyn LiteratureSearch>,
    scorer: Arc<dyn EntailmentScorer>,
) -> (Arc<AnalysisEngine>, Arc<MemoryRunStore>) {
    let store = Arc::new(MemoryRunStore::new());
    let adjudicator = Adjudicator::new(search, scorer).with_workers(4);
    let engine = Arc::new(AnalysisEngine::new(
        Arc::new(JsonGraphStore::new("sop")),
        store.clone(),
        adjudicator,
    ));
    (engine, store)
}

fn risk_engine() -> (Arc<AnalysisEngine>, Arc<MemoryRunStore>) {
    engine_with(
        Arc::new(FixedSearch {
            snippets: evidence_snippets(),
        }),
        Arc::new(FixedScorer {
            risk: 0.9,
            safety: 0.1,
        }),
    )
}

async fn seed_run(store: &MemoryRunStore, run_id: &str, timeline: &[(&str, i64)]) {
    let base = base_time();
    store
        .insert_run(ProcedureRun {
            id: run_id.to_string(),
            procedure_id: PROCEDURE_ID.to_string(),
            surgeon_name: "Dr. Demo".to_string(),
            started_at: base,
            ended_at: None,
            status: RunStatus::Completed,
        })
        .await
        .unwrap();
    let events: Vec<ObservedEvent> = timeline
        .iter()
        .map(|(step_id, offset)| {
            ObservedEvent::new(*step_id, base + Duration::minutes(*offset)).with_source("mock")
        })
        .collect();
    store.append_events(run_id, events).await.unwrap();
}

fn swapped_timeline() -> Vec<(&'static str, i64)> {
    // loculation_breakdown before drainage_expression
    ORDERED_TIMELINE
        .iter()
        .map(|&(id, offset)| match id {
            "drainage_expression" => (id, 16),
            "loculation_breakdown" => (id, 14),
            _ => (id, offset),
        })
        .collect()
}

fn timeline_without(excluded: &str) -> Vec<(&'static str, i64)> {
    ORDERED_TIMELINE
        .iter()
        .copied()
        .filter(|(id, _)| *id != excluded)
        .collect()
}

// ── Scenarios ──────────────────────────────────────────────

#[tokio::test]
async fn full_coverage_in_order_is_fully_compliant() {
    let (engine, store) = risk_engine();
    seed_run(&store, "run-clean", ORDERED_TIMELINE).await;

    let report = engine.analyze("run-clean").await.unwrap();

    assert_eq!(report.total_expected, 13);
    assert_eq!(report.total_observed, 13);
    assert_eq!(report.compliance_score, 1.0);
    assert_eq!(report.confirmed_count, 0);
    assert_eq!(report.mitigated_count, 0);
    assert_eq!(report.review_count, 0);
    assert!(report.report_text.contains("Full compliance"));
}

#[tokio::test]
async fn reanalysis_overwrites_single_report() {
    let (engine, store) = risk_engine();
    seed_run(&store, "run-idem", ORDERED_TIMELINE).await;

    let first = engine.analyze("run-idem").await.unwrap();
    let second = engine.analyze("run-idem").await.unwrap();

    assert_eq!(first.compliance_score, second.compliance_score);
    assert_eq!(first.report_text, second.report_text);

    let stored = engine.get_report("run-idem").await.unwrap().unwrap();
    assert_eq!(stored.report_text, second.report_text);
}

#[tokio::test]
async fn order_swap_yields_exactly_one_out_of_order() {
    let (engine, store) = risk_engine();
    seed_run(&store, "run-swap", &swapped_timeline()).await;

    let report = engine.analyze("run-swap").await.unwrap();

    // coverage is complete, yet severity weighting pulls the score down
    assert_eq!(report.total_observed, report.total_expected);
    assert!(report.compliance_score < 1.0);

    let all: Vec<_> = report
        .confirmed_deviations
        .iter()
        .chain(&report.mitigated_deviations)
        .chain(&report.review_deviations)
        .collect();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].deviation.step_id, "loculation_breakdown");
    assert_eq!(all[0].deviation.kind, DeviationKind::OutOfOrder);
    assert_eq!(all[0].verdict, Verdict::Confirmed);
}

#[tokio::test]
async fn omitted_mandatory_step_verdict_follows_evidence() {
    // risk-heavy evidence confirms the omission
    let (engine, store) = risk_engine();
    seed_run(&store, "run-miss", &timeline_without("wound_irrigation")).await;
    let report = engine.analyze("run-miss").await.unwrap();

    assert_eq!(report.total_observed, 12);
    assert_eq!(report.confirmed_count, 1);
    let dev = &report.confirmed_deviations[0];
    assert_eq!(dev.deviation.step_id, "wound_irrigation");
    assert_eq!(dev.deviation.kind, DeviationKind::Missing);
    assert!(report.compliance_score < 1.0);

    // identical run, safety-heavy evidence mitigates instead
    let (engine, store) = engine_with(
        Arc::new(FixedSearch {
            snippets: evidence_snippets(),
        }),
        Arc::new(FixedScorer {
            risk: 0.0,
            safety: 1.0,
        }),
    );
    seed_run(&store, "run-miss", &timeline_without("wound_irrigation")).await;
    let report = engine.analyze("run-miss").await.unwrap();

    assert_eq!(report.mitigated_count, 1);
    assert_eq!(
        report.mitigated_deviations[0].deviation.step_id,
        "wound_irrigation"
    );
}

#[tokio::test]
async fn omitted_safety_critical_surfaces_as_skipped_safety() {
    let (engine, store) = risk_engine();
    seed_run(&store, "run-safety", &timeline_without("hemostasis_check")).await;

    let report = engine.analyze("run-safety").await.unwrap();

    let skipped: Vec<_> = report
        .confirmed_deviations
        .iter()
        .filter(|d| d.deviation.step_id == "hemostasis_check")
        .collect();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].deviation.kind, DeviationKind::SkippedSafety);
    assert!(skipped[0].deviation.safety_critical);

    // note: wound_packing declares hemostasis_check as a precondition, so
    // the run also carries an out_of_order finding on wound_packing
    let on_packing: Vec<_> = report
        .confirmed_deviations
        .iter()
        .filter(|d| d.deviation.step_id == "wound_packing")
        .collect();
    assert_eq!(on_packing.len(), 1);
}

#[tokio::test]
async fn untriggered_complication_branch_is_not_missing() {
    let (engine, store) = risk_engine();
    seed_run(&store, "run-branch", ORDERED_TIMELINE).await;

    let report = engine.analyze("run-branch").await.unwrap();
    // neither uncontrolled_bleeding nor its mitigation is flagged
    assert_eq!(report.confirmed_count + report.mitigated_count + report.review_count, 0);
}

#[tokio::test]
async fn observed_complication_without_mitigation_is_flagged() {
    let (engine, store) = risk_engine();
    let mut timeline = ORDERED_TIMELINE.to_vec();
    timeline.push(("uncontrolled_bleeding", 17));
    seed_run(&store, "run-bleed", &timeline).await;

    let report = engine.analyze("run-bleed").await.unwrap();

    let all: Vec<_> = report
        .confirmed_deviations
        .iter()
        .chain(&report.mitigated_deviations)
        .chain(&report.review_deviations)
        .collect();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].deviation.step_id, "uncontrolled_bleeding");
    assert_eq!(
        all[0].deviation.kind,
        DeviationKind::UnhandledComplication
    );

    // with the mitigation observed, the complication is handled
    let (engine, store) = risk_engine();
    let mut handled = timeline.clone();
    handled.push(("direct_pressure_hemostasis", 19));
    seed_run(&store, "run-bleed-handled", &handled).await;
    let report = engine.analyze("run-bleed-handled").await.unwrap();
    assert_eq!(
        report.confirmed_count + report.mitigated_count + report.review_count,
        0
    );
}

#[tokio::test]
async fn evidence_outage_degrades_verdicts_not_the_run() {
    let (engine, store) = engine_with(
        Arc::new(FailingSearch),
        Arc::new(FixedScorer {
            risk: 0.9,
            safety: 0.1,
        }),
    );
    seed_run(&store, "run-outage", &timeline_without("wound_irrigation")).await;

    let report = engine.analyze("run-outage").await.unwrap();

    assert_eq!(report.review_count, 1);
    let dev = &report.review_deviations[0];
    assert_eq!(dev.verdict, Verdict::ContextDependent);
    assert!(dev.evidence_summary.contains("literature service offline"));
    assert!(dev.citations.is_empty());
}

#[tokio::test]
async fn malformed_events_warn_but_do_not_abort() {
    let (engine, store) = risk_engine();
    seed_run(&store, "run-warn", ORDERED_TIMELINE).await;
    store
        .append_events(
            "run-warn",
            vec![ObservedEvent::new("", base_time() + Duration::minutes(30))
                .with_source("gemini")],
        )
        .await
        .unwrap();

    let report = engine.analyze("run-warn").await.unwrap();

    assert_eq!(report.warnings.len(), 1);
    assert!(report.report_text.contains("WARNINGS"));
    assert_eq!(report.compliance_score, 1.0);
}

#[tokio::test]
async fn unknown_run_and_procedure_are_fatal() {
    let (engine, store) = risk_engine();

    let err = engine.analyze("no-such-run").await.unwrap_err();
    assert!(matches!(err, AnalysisError::RunNotFound(_)));

    store
        .insert_run(ProcedureRun {
            id: "run-ghost-proc".to_string(),
            procedure_id: "unknown_procedure".to_string(),
            surgeon_name: "Dr. Demo".to_string(),
            started_at: base_time(),
            ended_at: None,
            status: RunStatus::Completed,
        })
        .await
        .unwrap();
    let err = engine.analyze("run-ghost-proc").await.unwrap_err();
    assert!(matches!(err, AnalysisError::GraphNotFound(_)));
}

#[tokio::test]
async fn report_is_deterministic_across_runs() {
    let (engine, store) = risk_engine();
    seed_run(&store, "run-det-a", &swapped_timeline()).await;
    seed_run(&store, "run-det-b", &swapped_timeline()).await;

    let a = engine.analyze("run-det-a").await.unwrap();
    let b = engine.analyze("run-det-b").await.unwrap();

    assert_eq!(a.compliance_score, b.compliance_score);
    assert_eq!(
        serde_json::to_string(&a.confirmed_deviations).unwrap(),
        serde_json::to_string(&b.confirmed_deviations).unwrap()
    );
}

#[tokio::test]
async fn cancel_without_active_analysis_is_a_noop() {
    let (engine, _store) = risk_engine();
    assert!(!engine.cancel("nothing-running").await);
}
