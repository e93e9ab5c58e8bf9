//! Combined precedence DAG over jobs and preparation tasks.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::{Directed, Direction};

use crate::domain::job::Job;
use crate::domain::preparation::PreparationTask;
use crate::error::PlanningError;
use crate::Id;

/// A task node carries the duration used for longest-path math.
#[derive(Debug, Clone, PartialEq)]
struct TaskNode {
    id: Id,
    duration_hours: f64,
}

/// String-keyed precedence DAG over a plan's jobs and preparation tasks.
///
/// # Invariants
///
/// - Node ids are unique across jobs and preparation tasks
/// - Edges point from predecessor to successor
/// - The graph must be acyclic before any ordering query; callers run
///   [`ensure_acyclic`](Self::ensure_acyclic) after bulk construction
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    graph: StableGraph<TaskNode, (), Directed>,
    node_by_id: HashMap<Id, NodeIndex>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the combined DAG from a plan's jobs and preparation tasks.
    ///
    /// # Errors
    ///
    /// - `Validation` for duplicate or unknown task ids
    /// - `ConstraintViolation { no_circular_dependencies }` for cycles
    pub fn from_entities(
        jobs: &[Job],
        preparation_tasks: &[PreparationTask],
    ) -> Result<Self, PlanningError> {
        let mut graph = Self::new();

        for job in jobs {
            graph.add_task(&job.job_id, job.base_duration_hours)?;
        }
        for task in preparation_tasks {
            graph.add_task(&task.prep_id, task.duration_hours)?;
        }

        for job in jobs {
            for pred in &job.predecessor_jobs {
                graph.add_edge(pred, &job.job_id)?;
            }
        }
        for task in preparation_tasks {
            for dep in &task.dependencies {
                graph.add_edge(dep, &task.prep_id)?;
            }
        }

        graph.ensure_acyclic()?;
        Ok(graph)
    }

    pub fn add_task(&mut self, id: &str, duration_hours: f64) -> Result<(), PlanningError> {
        if self.node_by_id.contains_key(id) {
            return Err(PlanningError::validation(format!("duplicate task id {id:?}")));
        }
        let node = self.graph.add_node(TaskNode {
            id: id.to_owned(),
            duration_hours,
        });
        self.node_by_id.insert(id.to_owned(), node);
        Ok(())
    }

    /// Adds a precedence edge `pred → succ`.
    ///
    /// # Errors
    ///
    /// `Validation` if either endpoint is unknown. Cycles are only detected
    /// by [`ensure_acyclic`](Self::ensure_acyclic), so bulk loads stay
    /// linear.
    pub fn add_edge(&mut self, pred: &str, succ: &str) -> Result<(), PlanningError> {
        let from = *self.node_by_id.get(pred).ok_or_else(|| {
            PlanningError::validation(format!("unknown predecessor id {pred:?} for task {succ:?}"))
        })?;
        let to = *self.node_by_id.get(succ).ok_or_else(|| {
            PlanningError::validation(format!("unknown task id {succ:?}"))
        })?;
        self.graph.add_edge(from, to, ());
        Ok(())
    }

    /// Verifies the graph is a DAG.
    pub fn ensure_acyclic(&self) -> Result<(), PlanningError> {
        toposort(&self.graph, None)
            .map(|_| ())
            .map_err(|_| PlanningError::ConstraintViolation {
                message: "circular dependency detected in task precedence".into(),
                violated_constraints: vec!["no_circular_dependencies".into()],
            })
    }

    /// Task ids in topological order.
    pub fn topo_order(&self) -> Result<Vec<Id>, PlanningError> {
        let order = toposort(&self.graph, None).map_err(|_| PlanningError::ConstraintViolation {
            message: "circular dependency detected in task precedence".into(),
            violated_constraints: vec!["no_circular_dependencies".into()],
        })?;
        Ok(order.into_iter().map(|n| self.graph[n].id.clone()).collect())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node_by_id.contains_key(id)
    }

    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn predecessors(&self, id: &str) -> Vec<Id> {
        self.neighbors(id, Direction::Incoming)
    }

    pub fn successors(&self, id: &str) -> Vec<Id> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<Id> {
        match self.node_by_id.get(id) {
            Some(&node) => self
                .graph
                .neighbors_directed(node, direction)
                .map(|n| self.graph[n].id.clone())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Every `(pred, succ)` edge as id pairs.
    pub fn edges(&self) -> Vec<(Id, Id)> {
        self.graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(a, b)| (self.graph[a].id.clone(), self.graph[b].id.clone()))
            .collect()
    }

    /// Overrides a node's duration, e.g. with the realized duration from a
    /// solved schedule before critical-path extraction.
    pub fn set_duration(&mut self, id: &str, duration_hours: f64) {
        if let Some(&node) = self.node_by_id.get(id) {
            self.graph[node].duration_hours = duration_hours;
        }
    }

    /// Longest chain through the DAG weighted by node durations.
    ///
    /// Returns the chain duration in hours and the task ids along it, in
    /// execution order. Empty graph yields `(0.0, [])`.
    pub fn critical_path(&self) -> Result<(f64, Vec<Id>), PlanningError> {
        if self.graph.node_count() == 0 {
            return Ok((0.0, Vec::new()));
        }

        let topo = toposort(&self.graph, None).map_err(|_| PlanningError::ConstraintViolation {
            message: "circular dependency detected in task precedence".into(),
            violated_constraints: vec!["no_circular_dependencies".into()],
        })?;

        let mut earliest_start: HashMap<NodeIndex, f64> =
            topo.iter().map(|&n| (n, 0.0)).collect();
        let mut predecessor: HashMap<NodeIndex, Option<NodeIndex>> =
            topo.iter().map(|&n| (n, None)).collect();

        for &node in &topo {
            let finish = earliest_start[&node] + self.graph[node].duration_hours;
            for succ in self.graph.neighbors_directed(node, Direction::Outgoing) {
                let entry = earliest_start.entry(succ).or_insert(0.0);
                if finish > *entry {
                    *entry = finish;
                    predecessor.insert(succ, Some(node));
                }
            }
        }

        let mut max_finish = 0.0_f64;
        let mut end_node = None;
        for node in self.graph.node_indices() {
            let finish = earliest_start[&node] + self.graph[node].duration_hours;
            if finish > max_finish || end_node.is_none() {
                max_finish = finish;
                end_node = Some(node);
            }
        }

        let mut path = Vec::new();
        let mut current = end_node;
        while let Some(node) = current {
            path.push(self.graph[node].id.clone());
            current = predecessor[&node];
        }
        path.reverse();

        Ok((max_finish, path))
    }
}
