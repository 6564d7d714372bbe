//! Surgical SOP Compliance Service
//!
//! Post-op analysis pipeline: graph comparison + literature-backed
//! adjudication, exposed over a small HTTP surface for the dashboard and
//! export layers.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use sop_compliance::adjudicator::{Adjudicator, HttpEntailmentScorer, SciteSearch};
use sop_compliance::config::Settings;
use sop_compliance::graph::JsonGraphStore;
use sop_compliance::pipeline::AnalysisEngine;
use sop_compliance::server::{run_server, AppState};
use sop_compliance::storage::MemoryRunStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    let settings = Settings::from_env();

    println!("\n{}", "═".repeat(60));
    println!("🏥 Surgical SOP Compliance Service v0.1.0");
    println!("{}", "═".repeat(60));
    println!("Pipeline: Graph Diff | Evidence Adjudication | Compliance Report");
    println!("{}\n", "═".repeat(60));

    if settings.scite_api_key.is_empty() {
        warn!("SCITE_API_KEY not set; adjudication will degrade to context_dependent verdicts");
    }

    let graph_store = Arc::new(JsonGraphStore::new(&settings.sop_dir));
    let run_store = Arc::new(MemoryRunStore::new());

    let search = Arc::new(
        SciteSearch::new(settings.scite_base_url.clone(), settings.scite_api_key.clone())
            .with_limit(5),
    );
    let scorer = Arc::new(HttpEntailmentScorer::new(settings.entailment_url.clone()));
    let adjudicator = Adjudicator::new(search, scorer)
        .with_workers(settings.adjudication_workers)
        .with_timeout(Duration::from_secs(settings.adjudication_timeout_secs));

    let engine = Arc::new(AnalysisEngine::new(graph_store, run_store, adjudicator));
    info!(
        "Engine ready (SOP dir: '{}', {} adjudication workers)",
        settings.sop_dir, settings.adjudication_workers
    );

    run_server(AppState { engine }, &settings.bind_addr).await
}
