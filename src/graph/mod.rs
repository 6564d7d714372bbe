//! Procedure graph model.
//!
//! Immutable representation of one gold-standard protocol as a directed
//! graph of steps. Sequential edges form a DAG of must-precede constraints;
//! conditional edges model branches and complication paths and impose no
//! ordering constraint of their own.

mod store;

pub use store::{GraphCache, GraphStore, JsonGraphStore};

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, AnalysisResult};

/// Kind of a protocol edge. Closed enumeration, not a subtype hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// Must-precede constraint; the sequential subgraph is a DAG
    Sequential,
    /// Optional branch; never a source of "missing" on its own
    Conditional,
}

/// One expected protocol step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub name: String,
    pub phase: String,
    pub mandatory: bool,
    pub safety_critical: bool,
    /// Ids of steps that should logically precede this one
    #[serde(default)]
    pub preconditions: Vec<String>,
    #[serde(default)]
    pub actors: Vec<String>,
    #[serde(default)]
    pub required_tools: Vec<String>,
}

/// A directed edge between two steps
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub kind: LinkKind,
}

/// On-disk SOP definition, as produced by the protocol authoring pipeline
#[derive(Debug, Clone, Deserialize)]
pub struct GraphDefinition {
    pub procedure: ProcedureHeader,
    pub nodes: Vec<Step>,
    pub edges: Vec<Link>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcedureHeader {
    pub id: String,
    pub name: String,
}

/// Validated, immutable protocol graph for one procedure type.
///
/// Invariants (checked at construction): step ids unique, every edge
/// references existing steps, the sequential subgraph is acyclic, and at
/// least one step has no incoming sequential edge.
#[derive(Debug, Clone)]
pub struct ProcedureGraph {
    id: String,
    name: String,
    steps: Vec<Step>,
    links: Vec<Link>,
    index: HashMap<String, usize>,
    seq_successors: HashMap<String, Vec<String>>,
    cond_successors: HashMap<String, Vec<String>>,
    cond_predecessors: HashMap<String, Vec<String>>,
    incoming_kinds: HashMap<String, Vec<LinkKind>>,
    topo_index: HashMap<String, usize>,
}

impl ProcedureGraph {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        steps: Vec<Step>,
        links: Vec<Link>,
    ) -> AnalysisResult<Self> {
        let id = id.into();
        let name = name.into();

        if steps.is_empty() {
            return Err(AnalysisError::GraphInvalid {
                id,
                reason: "graph has no steps".to_string(),
            });
        }

        let mut index = HashMap::new();
        for (i, step) in steps.iter().enumerate() {
            if index.insert(step.id.clone(), i).is_some() {
                return Err(AnalysisError::GraphInvalid {
                    id,
                    reason: format!("duplicate step id '{}'", step.id),
                });
            }
        }

        let mut seq_successors: HashMap<String, Vec<String>> = HashMap::new();
        let mut cond_successors: HashMap<String, Vec<String>> = HashMap::new();
        let mut cond_predecessors: HashMap<String, Vec<String>> = HashMap::new();
        let mut incoming_kinds: HashMap<String, Vec<LinkKind>> = HashMap::new();

        for link in &links {
            for endpoint in [&link.from, &link.to] {
                if !index.contains_key(endpoint) {
                    return Err(AnalysisError::GraphInvalid {
                        id,
                        reason: format!("edge references unknown step '{}'", endpoint),
                    });
                }
            }
            incoming_kinds
                .entry(link.to.clone())
                .or_default()
                .push(link.kind);
            match link.kind {
                LinkKind::Sequential => {
                    seq_successors
                        .entry(link.from.clone())
                        .or_default()
                        .push(link.to.clone());
                }
                LinkKind::Conditional => {
                    cond_successors
                        .entry(link.from.clone())
                        .or_default()
                        .push(link.to.clone());
                    cond_predecessors
                        .entry(link.to.clone())
                        .or_default()
                        .push(link.from.clone());
                }
            }
        }

        let topo = Self::topological_order(&steps, &seq_successors, &id)?;
        let topo_index = topo
            .iter()
            .enumerate()
            .map(|(i, sid)| (sid.clone(), i))
            .collect();

        Ok(Self {
            id,
            name,
            steps,
            links,
            index,
            seq_successors,
            cond_successors,
            cond_predecessors,
            incoming_kinds,
            topo_index,
        })
    }

    pub fn from_definition(def: GraphDefinition) -> AnalysisResult<Self> {
        Self::new(def.procedure.id, def.procedure.name, def.nodes, def.edges)
    }

    /// Kahn's algorithm over the sequential subgraph, with sorted
    /// tie-breaking for a deterministic order. Also enforces acyclicity and
    /// the entry-point invariant.
    fn topological_order(
        steps: &[Step],
        seq_successors: &HashMap<String, Vec<String>>,
        graph_id: &str,
    ) -> AnalysisResult<Vec<String>> {
        let mut in_degree: HashMap<&str, usize> =
            steps.iter().map(|s| (s.id.as_str(), 0)).collect();
        for targets in seq_successors.values() {
            for t in targets {
                if let Some(d) = in_degree.get_mut(t.as_str()) {
                    *d += 1;
                }
            }
        }

        let mut queue: Vec<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(sid, _)| *sid)
            .collect();
        if queue.is_empty() {
            return Err(AnalysisError::GraphInvalid {
                id: graph_id.to_string(),
                reason: "no entry point: every step has an incoming sequential edge".to_string(),
            });
        }

        let mut order = Vec::with_capacity(steps.len());
        while !queue.is_empty() {
            queue.sort_unstable();
            let sid = queue.remove(0);
            order.push(sid.to_string());
            if let Some(targets) = seq_successors.get(sid) {
                for t in targets {
                    if let Some(d) = in_degree.get_mut(t.as_str()) {
                        *d -= 1;
                        if *d == 0 {
                            queue.push(t.as_str());
                        }
                    }
                }
            }
        }

        if order.len() != steps.len() {
            return Err(AnalysisError::GraphInvalid {
                id: graph_id.to_string(),
                reason: "sequential subgraph contains a cycle".to_string(),
            });
        }
        Ok(order)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn step(&self, step_id: &str) -> Option<&Step> {
        self.index.get(step_id).map(|&i| &self.steps[i])
    }

    pub fn is_mandatory(&self, step_id: &str) -> bool {
        self.step(step_id).map(|s| s.mandatory).unwrap_or(false)
    }

    pub fn is_safety_critical(&self, step_id: &str) -> bool {
        self.step(step_id)
            .map(|s| s.safety_critical)
            .unwrap_or(false)
    }

    /// Mandatory steps, in deterministic topological order
    pub fn mandatory_steps(&self) -> Vec<&Step> {
        let mut steps: Vec<&Step> = self.steps.iter().filter(|s| s.mandatory).collect();
        steps.sort_by_key(|s| self.topo_position(&s.id));
        steps
    }

    /// Position of a step in the deterministic topological order
    pub fn topo_position(&self, step_id: &str) -> usize {
        self.topo_index.get(step_id).copied().unwrap_or(usize::MAX)
    }

    /// Whether the sequential subgraph requires `before` to precede `after`,
    /// directly or transitively.
    pub fn requires_before(&self, before: &str, after: &str) -> bool {
        if before == after {
            return false;
        }
        let mut stack = vec![before];
        let mut seen: HashSet<&str> = HashSet::new();
        while let Some(current) = stack.pop() {
            if let Some(targets) = self.seq_successors.get(current) {
                for t in targets {
                    if t == after {
                        return true;
                    }
                    if seen.insert(t.as_str()) {
                        stack.push(t.as_str());
                    }
                }
            }
        }
        false
    }

    /// Steps reachable via outgoing conditional edges (branch alternatives,
    /// complication mitigations)
    pub fn conditional_successors(&self, step_id: &str) -> &[String] {
        self.cond_successors
            .get(step_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Steps whose conditional edge gates this one
    pub fn conditional_predecessors(&self, step_id: &str) -> &[String] {
        self.cond_predecessors
            .get(step_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// A step is conditionally gated when it has incoming edges and every
    /// one of them is conditional: it is only expected once a gating
    /// predecessor occurred.
    pub fn is_conditionally_gated(&self, step_id: &str) -> bool {
        match self.incoming_kinds.get(step_id) {
            Some(kinds) => kinds.iter().all(|k| *k == LinkKind::Conditional),
            None => false,
        }
    }
}
