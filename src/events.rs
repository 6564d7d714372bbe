//! Observed event types and structural validation.
//!
//! Events are produced externally (video interpretation, manual annotation,
//! mock generation) and treated as an append-only, timestamp-ordered log.
//! The core validates only structural well-formedness; malformed events are
//! dropped with a warning, never failing the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::AnalysisError;

/// A single observation of a protocol step during one procedure run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservedEvent {
    /// Id of the protocol step this observation maps to
    pub step_id: String,
    /// When the step was observed
    pub timestamp: DateTime<Utc>,
    /// Detection confidence in [0, 1]
    pub confidence: f64,
    /// Provenance of the observation (e.g. "mock", "gemini", "manual")
    pub source: String,
    /// Free-form producer metadata, passed through untouched
    #[serde(default)]
    pub metadata: Value,
}

impl ObservedEvent {
    pub fn new(step_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            step_id: step_id.into(),
            timestamp,
            confidence: 1.0,
            source: "manual".to_string(),
            metadata: Value::Null,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

/// Split an event log into structurally valid events and warnings for the
/// dropped ones. Checks: non-empty step id, confidence within [0, 1].
pub fn validate_events(events: &[ObservedEvent]) -> (Vec<ObservedEvent>, Vec<String>) {
    let mut valid = Vec::with_capacity(events.len());
    let mut warnings = Vec::new();

    for ev in events {
        let problem = if ev.step_id.trim().is_empty() {
            Some(format!(
                "empty step id at {} from '{}'",
                ev.timestamp, ev.source
            ))
        } else if !(0.0..=1.0).contains(&ev.confidence) {
            Some(format!(
                "'{}' at {} has confidence {} outside [0, 1]",
                ev.step_id, ev.timestamp, ev.confidence
            ))
        } else {
            None
        };

        match problem {
            Some(detail) => {
                let err = AnalysisError::EventMalformed(detail);
                warn!("dropping event: {}", err);
                warnings.push(err.to_string());
            }
            None => valid.push(ev.clone()),
        }
    }

    (valid, warnings)
}
