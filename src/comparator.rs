//! Sequence comparison engine.
//!
//! Diffs an observed event log against the gold-standard procedure graph
//! and produces raw deviations. Pure function of (graph, events): no shared
//! mutable state, so runs can be analyzed in parallel.

use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::{validate_events, ObservedEvent};
use crate::graph::ProcedureGraph;

/// Phase tag that marks a step as an intraoperative complication
pub const COMPLICATION_PHASE: &str = "complication";

/// Kind of protocol deviation. Closed enumeration; the export layer
/// depends on these exact serialized values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviationKind {
    Missing,
    OutOfOrder,
    SkippedSafety,
    UnhandledComplication,
}

impl fmt::Display for DeviationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviationKind::Missing => "missing",
            DeviationKind::OutOfOrder => "out_of_order",
            DeviationKind::SkippedSafety => "skipped_safety",
            DeviationKind::UnhandledComplication => "unhandled_complication",
        };
        write!(f, "{}", s)
    }
}

/// A deviation detected by the comparator, before adjudication.
/// Carries the context a literature query needs later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDeviation {
    pub step_id: String,
    pub step_name: String,
    pub phase: String,
    pub kind: DeviationKind,
    pub mandatory: bool,
    pub safety_critical: bool,
    /// Why this deviation is claimed to matter
    pub context: String,
}

/// Result of one comparison pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonOutcome {
    pub deviations: Vec<RawDeviation>,
    /// Mandatory steps in the graph
    pub total_expected: usize,
    /// Distinct mandatory steps with at least one observation
    pub total_observed: usize,
    /// Warnings for events dropped during validation
    pub warnings: Vec<String>,
}

/// Compare an observed event log against the procedure graph.
///
/// Malformed events are dropped (reported via `warnings`); repeat
/// observations of a step only count through their earliest timestamp.
pub fn compare(graph: &ProcedureGraph, events: &[ObservedEvent]) -> ComparisonOutcome {
    let (events, warnings) = validate_events(events);

    let mut first_seen: HashMap<&str, DateTime<Utc>> = HashMap::new();
    for ev in &events {
        first_seen
            .entry(ev.step_id.as_str())
            .and_modify(|ts| {
                if ev.timestamp < *ts {
                    *ts = ev.timestamp;
                }
            })
            .or_insert(ev.timestamp);
    }

    let mut deviations: Vec<RawDeviation> = Vec::new();

    check_missing(graph, &first_seen, &mut deviations);
    check_out_of_order(graph, &first_seen, &mut deviations);
    check_preconditions(graph, &first_seen, &mut deviations);
    check_unhandled_complications(graph, &first_seen, &mut deviations);

    // at most one deviation per (step, kind)
    let mut seen: HashSet<(String, DeviationKind)> = HashSet::new();
    deviations.retain(|d| seen.insert((d.step_id.clone(), d.kind)));

    let total_expected = graph.mandatory_steps().len();
    let total_observed = graph
        .mandatory_steps()
        .iter()
        .filter(|s| first_seen.contains_key(s.id.as_str()))
        .count();

    ComparisonOutcome {
        deviations,
        total_expected,
        total_observed,
        warnings,
    }
}

/// Missing mandatory steps, in topological order. A mandatory step whose
/// every incoming edge is conditional is gated: it is only expected once
/// one of its gating predecessors occurred.
fn check_missing(
    graph: &ProcedureGraph,
    first_seen: &HashMap<&str, DateTime<Utc>>,
    deviations: &mut Vec<RawDeviation>,
) {
    for step in graph.mandatory_steps() {
        if first_seen.contains_key(step.id.as_str()) {
            continue;
        }
        if graph.is_conditionally_gated(&step.id) {
            let gate_occurred = graph
                .conditional_predecessors(&step.id)
                .iter()
                .any(|p| first_seen.contains_key(p.as_str()));
            if !gate_occurred {
                continue;
            }
        }
        let kind = if step.safety_critical {
            DeviationKind::SkippedSafety
        } else {
            DeviationKind::Missing
        };
        deviations.push(RawDeviation {
            step_id: step.id.clone(),
            step_name: step.name.clone(),
            phase: step.phase.clone(),
            kind,
            mandatory: step.mandatory,
            safety_critical: step.safety_critical,
            context: format!(
                "Mandatory step '{}' was not observed during the procedure.",
                step.name
            ),
        });
    }
}

/// Ordering violations over the sequential subgraph, direct or transitive.
/// Equal first-observation timestamps are not violations.
fn check_out_of_order(
    graph: &ProcedureGraph,
    first_seen: &HashMap<&str, DateTime<Utc>>,
    deviations: &mut Vec<RawDeviation>,
) {
    let mut observed: Vec<&str> = graph
        .mandatory_steps()
        .iter()
        .filter(|s| first_seen.contains_key(s.id.as_str()))
        .map(|s| s.id.as_str())
        .collect();
    observed.sort_by_key(|sid| graph.topo_position(sid));

    for i in 0..observed.len() {
        for j in (i + 1)..observed.len() {
            let (before, after) = (observed[i], observed[j]);
            if !graph.requires_before(before, after) {
                continue;
            }
            if first_seen[after] >= first_seen[before] {
                continue;
            }
            let (Some(step), Some(before_step)) = (graph.step(after), graph.step(before)) else {
                continue;
            };
            let kind = if step.safety_critical {
                DeviationKind::SkippedSafety
            } else {
                DeviationKind::OutOfOrder
            };
            deviations.push(RawDeviation {
                step_id: step.id.clone(),
                step_name: step.name.clone(),
                phase: step.phase.clone(),
                kind,
                mandatory: step.mandatory,
                safety_critical: step.safety_critical,
                context: format!(
                    "'{}' was observed before '{}', violating expected sequential order.",
                    step.name, before_step.name
                ),
            });
        }
    }
}

/// Declared precondition violations: an observed step whose mandatory
/// precondition was never observed. Deduplicated against edge-derived
/// findings by the caller.
fn check_preconditions(
    graph: &ProcedureGraph,
    first_seen: &HashMap<&str, DateTime<Utc>>,
    deviations: &mut Vec<RawDeviation>,
) {
    let mut observed: Vec<&str> = first_seen.keys().copied().collect();
    observed.sort_by_key(|sid| graph.topo_position(sid));

    for sid in observed {
        let step = match graph.step(sid) {
            Some(s) => s,
            None => continue,
        };
        for pre_id in &step.preconditions {
            let pre = match graph.step(pre_id) {
                Some(p) => p,
                None => continue,
            };
            if !pre.mandatory || first_seen.contains_key(pre_id.as_str()) {
                continue;
            }
            let kind = if step.safety_critical {
                DeviationKind::SkippedSafety
            } else {
                DeviationKind::OutOfOrder
            };
            deviations.push(RawDeviation {
                step_id: step.id.clone(),
                step_name: step.name.clone(),
                phase: step.phase.clone(),
                kind,
                mandatory: step.mandatory,
                safety_critical: step.safety_critical,
                context: format!(
                    "'{}' was performed but its required precondition '{}' was not observed.",
                    step.name, pre.name
                ),
            });
        }
    }
}

/// A complication-phase step was observed but none of its known mitigations
/// (conditional successors) were.
fn check_unhandled_complications(
    graph: &ProcedureGraph,
    first_seen: &HashMap<&str, DateTime<Utc>>,
    deviations: &mut Vec<RawDeviation>,
) {
    let mut observed: Vec<&str> = first_seen.keys().copied().collect();
    observed.sort_by_key(|sid| graph.topo_position(sid));

    for sid in observed {
        let step = match graph.step(sid) {
            Some(s) if s.phase == COMPLICATION_PHASE => s,
            _ => continue,
        };
        let mitigations = graph.conditional_successors(sid);
        if mitigations.is_empty() {
            continue;
        }
        let handled = mitigations
            .iter()
            .any(|m| first_seen.contains_key(m.as_str()));
        if handled {
            continue;
        }
        deviations.push(RawDeviation {
            step_id: step.id.clone(),
            step_name: step.name.clone(),
            phase: step.phase.clone(),
            kind: DeviationKind::UnhandledComplication,
            mandatory: step.mandatory,
            safety_critical: step.safety_critical,
            context: format!(
                "Complication '{}' was observed but none of its mitigation steps were.",
                step.name
            ),
        });
    }
}
