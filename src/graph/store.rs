//! SOP definition loading and the per-procedure graph cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{GraphDefinition, ProcedureGraph};
use crate::error::{AnalysisError, AnalysisResult};

/// Source of gold-standard procedure graphs
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Load the SOP definition for a procedure. Fails with `GraphNotFound`
    /// when no definition exists and `GraphInvalid` when the definition
    /// violates a structural invariant.
    async fn load(&self, procedure_id: &str) -> AnalysisResult<ProcedureGraph>;
}

/// Loads SOP definitions from `{dir}/{procedure_id}.json`
pub struct JsonGraphStore {
    dir: PathBuf,
}

impl JsonGraphStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl GraphStore for JsonGraphStore {
    async fn load(&self, procedure_id: &str) -> AnalysisResult<ProcedureGraph> {
        let path = self.dir.join(format!("{}.json", procedure_id));
        if !path.exists() {
            return Err(AnalysisError::GraphNotFound(procedure_id.to_string()));
        }

        debug!("Loading SOP definition from {:?}", path);
        let content = std::fs::read_to_string(&path)
            .map_err(|e| AnalysisError::Storage(format!("reading {:?}: {}", path, e)))?;
        let def: GraphDefinition =
            serde_json::from_str(&content).map_err(|e| AnalysisError::GraphInvalid {
                id: procedure_id.to_string(),
                reason: format!("malformed definition: {}", e),
            })?;
        ProcedureGraph::from_definition(def)
    }
}

/// Immutable per-procedure graph cache. Populated at most once per
/// procedure id: the first successful load wins and later loads hit the
/// cached graph, so concurrent runs of the same procedure share one copy.
pub struct GraphCache {
    store: Arc<dyn GraphStore>,
    cache: RwLock<HashMap<String, Arc<ProcedureGraph>>>,
}

impl GraphCache {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, procedure_id: &str) -> AnalysisResult<Arc<ProcedureGraph>> {
        {
            let cache = self.cache.read().await;
            if let Some(graph) = cache.get(procedure_id) {
                return Ok(graph.clone());
            }
        }

        let graph = Arc::new(self.store.load(procedure_id).await?);

        let mut cache = self.cache.write().await;
        // first-load-wins: a concurrent loader may have beaten us here
        let entry = cache
            .entry(procedure_id.to_string())
            .or_insert_with(|| {
                info!("Cached procedure graph '{}'", procedure_id);
                graph
            })
            .clone();
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DEMO_SOP: &str = r#"{
        "procedure": { "id": "demo_proc", "name": "Demo Procedure" },
        "nodes": [
            { "id": "a", "name": "Step A", "phase": "prep", "mandatory": true, "safety_critical": false },
            { "id": "b", "name": "Step B", "phase": "main", "mandatory": true, "safety_critical": true }
        ],
        "edges": [
            { "from": "a", "to": "b", "type": "sequential" }
        ]
    }"#;

    fn write_sop(dir: &Path, id: &str, content: &str) {
        let mut f = std::fs::File::create(dir.join(format!("{}.json", id))).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[tokio::test]
    async fn test_load_from_json() {
        let dir = tempfile::tempdir().unwrap();
        write_sop(dir.path(), "demo_proc", DEMO_SOP);

        let store = JsonGraphStore::new(dir.path());
        let graph = store.load("demo_proc").await.unwrap();
        assert_eq!(graph.id(), "demo_proc");
        assert_eq!(graph.name(), "Demo Procedure");
        assert_eq!(graph.steps().len(), 2);
        assert!(graph.is_safety_critical("b"));
    }

    #[tokio::test]
    async fn test_missing_definition_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonGraphStore::new(dir.path());
        let err = store.load("ghost").await.unwrap_err();
        assert!(matches!(err, AnalysisError::GraphNotFound(_)));
    }

    #[tokio::test]
    async fn test_malformed_definition_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        write_sop(dir.path(), "bad", "{ not json");
        let store = JsonGraphStore::new(dir.path());
        let err = store.load("bad").await.unwrap_err();
        assert!(matches!(err, AnalysisError::GraphInvalid { .. }));
    }

    #[tokio::test]
    async fn test_cache_returns_same_instance() {
        let dir = tempfile::tempdir().unwrap();
        write_sop(dir.path(), "demo_proc", DEMO_SOP);

        let cache = GraphCache::new(Arc::new(JsonGraphStore::new(dir.path())));
        let first = cache.get("demo_proc").await.unwrap();

        // removing the file proves the second read comes from the cache
        std::fs::remove_file(dir.path().join("demo_proc.json")).unwrap();
        let second = cache.get("demo_proc").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
