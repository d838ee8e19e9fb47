//! Workflow dependency graph.
//!
//! Edges point from a dependency to its dependent. Waves are longest-path
//! layers: wave 0 holds the tasks with no dependencies, wave k the tasks whose
//! deepest dependency sits in wave k-1.

use gateway_core::{GatewayError, GatewayResult, TaskRequest};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;

/// Validated workflow DAG
#[derive(Debug)]
pub struct WorkflowDag {
    /// Node weight is the task's position in the request
    graph: DiGraph<usize, ()>,
    ids: Vec<String>,
    waves: Vec<Vec<usize>>,
    wave_of: Vec<usize>,
}

impl WorkflowDag {
    /// Build and validate the DAG for `tasks`.
    ///
    /// # Errors
    /// Returns [`GatewayError::InvalidWorkflow`] for an empty workflow, a task
    /// without an id, duplicate ids, dependencies on ids outside the
    /// workflow, malformed tasks, or a cycle
    pub fn build(tasks: &[TaskRequest]) -> GatewayResult<Self> {
        if tasks.is_empty() {
            return Err(GatewayError::invalid_workflow("workflow has no tasks"));
        }

        let mut graph = DiGraph::with_capacity(tasks.len(), tasks.len());
        let mut index: HashMap<&str, NodeIndex> = HashMap::with_capacity(tasks.len());
        let mut ids = Vec::with_capacity(tasks.len());

        for (position, task) in tasks.iter().enumerate() {
            let id = task
                .id
                .as_ref()
                .map(|id| id.as_str())
                .filter(|id| !id.trim().is_empty())
                .ok_or_else(|| {
                    GatewayError::invalid_workflow(format!("task at position {position} has no id"))
                })?;
            task.validate().map_err(|error| {
                GatewayError::invalid_workflow(format!("task {id}: {error}"))
            })?;
            if index.insert(id, graph.add_node(position)).is_some() {
                return Err(GatewayError::invalid_workflow(format!(
                    "duplicate task id {id}"
                )));
            }
            ids.push(id.to_string());
        }

        for task in tasks {
            let Some(id) = task.id.as_ref() else { continue };
            let node = index[id.as_str()];
            for dependency in &task.dependencies {
                let Some(&from) = index.get(dependency.as_str()) else {
                    return Err(GatewayError::invalid_workflow(format!(
                        "task {id} depends on {dependency}, which is not part of the workflow"
                    )));
                };
                graph.update_edge(from, node, ());
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            let position = graph[cycle.node_id()];
            GatewayError::invalid_workflow(format!(
                "dependency cycle through task {}",
                ids[position]
            ))
        })?;

        let mut wave_of = vec![0usize; tasks.len()];
        for node in order {
            let level = graph
                .neighbors_directed(node, Direction::Incoming)
                .map(|dep| wave_of[graph[dep]] + 1)
                .max()
                .unwrap_or(0);
            wave_of[graph[node]] = level;
        }

        let depth = wave_of.iter().max().map_or(0, |max| max + 1);
        let mut waves = vec![Vec::new(); depth];
        for (position, &wave) in wave_of.iter().enumerate() {
            waves[wave].push(position);
        }

        Ok(Self {
            graph,
            ids,
            waves,
            wave_of,
        })
    }

    /// Task positions per wave, each wave in request order
    #[must_use]
    pub fn waves(&self) -> &[Vec<usize>] {
        &self.waves
    }

    /// Wave of the task at `position`
    #[must_use]
    pub fn wave_of(&self, position: usize) -> usize {
        self.wave_of[position]
    }

    /// Local id of the task at `position`
    #[must_use]
    pub fn id(&self, position: usize) -> &str {
        &self.ids[position]
    }

    /// Local ids per wave
    #[must_use]
    pub fn wave_ids(&self) -> Vec<Vec<String>> {
        self.waves
            .iter()
            .map(|wave| wave.iter().map(|&p| self.ids[p].clone()).collect())
            .collect()
    }

    /// Number of tasks
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the DAG has no tasks (never true for a built DAG)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Number of dependency edges
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}
