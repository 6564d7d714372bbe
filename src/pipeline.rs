//! Analysis engine.
//!
//! The single entry point tying the core together: load graph (cached),
//! read the run's event log, compare, fan out adjudication, compile and
//! store the report. Analysis of one run is stateless and independent of
//! any other run; re-analysis is an idempotent overwrite keyed by run id.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::{AbortHandle, Abortable};
use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::adjudicator::Adjudicator;
use crate::comparator::compare;
use crate::error::{AnalysisError, AnalysisResult};
use crate::graph::{GraphCache, GraphStore};
use crate::report::{ComplianceReport, ReportCompiler, ScorePolicy};
use crate::storage::RunStore;

pub struct AnalysisEngine {
    graphs: GraphCache,
    store: Arc<dyn RunStore>,
    adjudicator: Adjudicator,
    compiler: ReportCompiler,
    /// Latest in-flight analysis per run id, for cancellation and for
    /// last-writer-wins on concurrent re-analysis
    active: Mutex<HashMap<String, AbortHandle>>,
}

impl AnalysisEngine {
    pub fn new(
        graph_store: Arc<dyn GraphStore>,
        store: Arc<dyn RunStore>,
        adjudicator: Adjudicator,
    ) -> Self {
        Self {
            graphs: GraphCache::new(graph_store),
            store,
            adjudicator,
            compiler: ReportCompiler::new(),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_score_policy(mut self, policy: ScorePolicy) -> Self {
        self.compiler = ReportCompiler::new().with_policy(policy);
        self
    }

    /// Run the full analysis pipeline for one procedure run and store the
    /// resulting report. Idempotent per run id. A concurrent re-analysis
    /// request for the same run aborts the older task (last-writer-wins);
    /// an aborted task persists nothing, since the report write is the
    /// final step.
    pub async fn analyze(&self, run_id: &str) -> AnalysisResult<ComplianceReport> {
        let (abort_handle, abort_registration) = AbortHandle::new_pair();
        {
            let mut active = self.active.lock().await;
            if let Some(previous) = active.insert(run_id.to_string(), abort_handle) {
                previous.abort();
            }
        }

        match Abortable::new(self.run_analysis(run_id), abort_registration).await {
            Ok(result) => result,
            Err(_aborted) => Err(AnalysisError::Cancelled(run_id.to_string())),
        }
    }

    #[instrument(skip(self))]
    async fn run_analysis(&self, run_id: &str) -> AnalysisResult<ComplianceReport> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or_else(|| AnalysisError::RunNotFound(run_id.to_string()))?;

        let graph = self.graphs.get(&run.procedure_id).await?;
        let events = self.store.events_for_run(run_id).await?;
        info!(
            "Analyzing run '{}' against '{}' ({} events)",
            run_id,
            graph.name(),
            events.len()
        );

        let outcome = compare(&graph, &events);
        info!(
            "Comparison found {} deviations ({}/{} mandatory steps observed)",
            outcome.deviations.len(),
            outcome.total_observed,
            outcome.total_expected
        );

        let adjudicated = self
            .adjudicator
            .adjudicate_all(outcome.deviations, graph.name())
            .await;

        let report = self.compiler.compile(
            run_id,
            graph.id(),
            graph.name(),
            adjudicated,
            outcome.total_expected,
            outcome.total_observed,
            outcome.warnings,
        );

        self.store.put_report(report.clone()).await?;
        info!(
            "Report stored for run '{}' (score {:.2})",
            run_id, report.compliance_score
        );
        Ok(report)
    }

    /// Retrieve a previously stored report
    pub async fn get_report(&self, run_id: &str) -> AnalysisResult<Option<ComplianceReport>> {
        self.store.get_report(run_id).await
    }

    /// Abort the in-flight analysis for a run, discarding partial state.
    /// Returns whether a task was tracked for that run.
    pub async fn cancel(&self, run_id: &str) -> bool {
        let mut active = self.active.lock().await;
        match active.remove(run_id) {
            Some(handle) => {
                handle.abort();
                info!("Cancelled analysis for run '{}'", run_id);
                true
            }
            None => false,
        }
    }

    pub fn store(&self) -> Arc<dyn RunStore> {
        Arc::clone(&self.store)
    }
}
