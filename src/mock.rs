//! Mock run generator for demo purposes.
//!
//! Creates a realistic incision-and-drainage event timeline with deliberate
//! deviations:
//!   1. wound_irrigation — MISSING
//!   2. loculation_breakdown before drainage_expression — OUT OF ORDER
//! A real video-interpretation producer writes to the same event log.

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::error::AnalysisResult;
use crate::events::ObservedEvent;
use crate::storage::{ProcedureRun, RunStatus, RunStore};

pub const MOCK_PROCEDURE_ID: &str = "incision_drainage_abscess";

/// (step id, minutes offset from start). Deviations are commented inline.
const MOCK_TIMELINE: &[(&str, i64)] = &[
    ("patient_consent", 0),
    ("timeout_verification", 2),
    ("site_identification", 4),
    ("skin_antisepsis", 6),
    ("local_anesthesia", 8),
    ("incision", 12),
    // DEVIATION: loculation_breakdown BEFORE drainage_expression (order swap)
    ("loculation_breakdown", 14),
    ("drainage_expression", 16),
    // DEVIATION: wound_irrigation is missing entirely
    ("hemostasis_check", 20),
    ("wound_packing", 22),
    ("dressing_application", 24),
    ("post_procedure_instructions", 26),
];

/// Outcome of mock generation
#[derive(Debug, Clone)]
pub struct MockRun {
    pub run_id: String,
    pub event_count: usize,
}

/// Create a procedure run with baked-in deviations and append its events
/// to the store.
pub async fn generate_mock_run(store: &dyn RunStore) -> AnalysisResult<MockRun> {
    let base = Utc::now();
    let run_id = Uuid::new_v4().to_string();
    let last_offset = MOCK_TIMELINE.last().map(|(_, m)| *m).unwrap_or(0);

    store
        .insert_run(ProcedureRun {
            id: run_id.clone(),
            procedure_id: MOCK_PROCEDURE_ID.to_string(),
            surgeon_name: "Dr. Demo".to_string(),
            started_at: base,
            ended_at: Some(base + Duration::minutes(last_offset)),
            status: RunStatus::Completed,
        })
        .await?;

    let events: Vec<ObservedEvent> = MOCK_TIMELINE
        .iter()
        .map(|(step_id, offset)| {
            ObservedEvent::new(*step_id, base + Duration::minutes(*offset)).with_source("mock")
        })
        .collect();
    let event_count = events.len();
    store.append_events(&run_id, events).await?;

    Ok(MockRun {
        run_id,
        event_count,
    })
}
