//! Storage boundary.
//!
//! Logical persisted shape: one run record, an append-only observed-event
//! log scoped to that run, and at most one report record per run, uniquely
//! keyed. The trait is the contract; `MemoryRunStore` is the in-process
//! implementation used by the service and by tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{AnalysisError, AnalysisResult};
use crate::events::ObservedEvent;
use crate::report::ComplianceReport;

/// Status of a procedure run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
}

/// One recorded procedure run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcedureRun {
    pub id: String,
    pub procedure_id: String,
    pub surgeon_name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
}

/// Persistence boundary for runs, their event logs and their reports
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn insert_run(&self, run: ProcedureRun) -> AnalysisResult<()>;

    async fn get_run(&self, run_id: &str) -> AnalysisResult<Option<ProcedureRun>>;

    /// Append to the run's event log. Fails with `RunNotFound` for an
    /// unknown run.
    async fn append_events(&self, run_id: &str, events: Vec<ObservedEvent>)
        -> AnalysisResult<()>;

    /// The run's event log, ordered by timestamp
    async fn events_for_run(&self, run_id: &str) -> AnalysisResult<Vec<ObservedEvent>>;

    /// Store the run's report. Keyed by run id: re-analysis overwrites,
    /// never appends (last-writer-wins).
    async fn put_report(&self, report: ComplianceReport) -> AnalysisResult<()>;

    async fn get_report(&self, run_id: &str) -> AnalysisResult<Option<ComplianceReport>>;
}

/// In-memory store backed by `RwLock` maps
#[derive(Default)]
pub struct MemoryRunStore {
    runs: RwLock<HashMap<String, ProcedureRun>>,
    events: RwLock<HashMap<String, Vec<ObservedEvent>>>,
    reports: RwLock<HashMap<String, ComplianceReport>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn insert_run(&self, run: ProcedureRun) -> AnalysisResult<()> {
        self.runs.write().await.insert(run.id.clone(), run);
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> AnalysisResult<Option<ProcedureRun>> {
        Ok(self.runs.read().await.get(run_id).cloned())
    }

    async fn append_events(
        &self,
        run_id: &str,
        events: Vec<ObservedEvent>,
    ) -> AnalysisResult<()> {
        if !self.runs.read().await.contains_key(run_id) {
            return Err(AnalysisError::RunNotFound(run_id.to_string()));
        }
        self.events
            .write()
            .await
            .entry(run_id.to_string())
            .or_default()
            .extend(events);
        Ok(())
    }

    async fn events_for_run(&self, run_id: &str) -> AnalysisResult<Vec<ObservedEvent>> {
        let mut events = self
            .events
            .read()
            .await
            .get(run_id)
            .cloned()
            .unwrap_or_default();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    async fn put_report(&self, report: ComplianceReport) -> AnalysisResult<()> {
        self.reports
            .write()
            .await
            .insert(report.run_id.clone(), report);
        Ok(())
    }

    async fn get_report(&self, run_id: &str) -> AnalysisResult<Option<ComplianceReport>> {
        Ok(self.reports.read().await.get(run_id).cloned())
    }
}
