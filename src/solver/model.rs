//! The CP variable and constraint graph.
//!
//! Times are integer minutes relative to the plan start. The model owns
//! every variable handle created during a build, keyed by task id, and is
//! released as a whole when the driver clears.

use std::collections::HashMap;

use crate::error::PlanningError;
use crate::Id;

/// One task's start/duration/end variable triple.
///
/// Bounds are tightened in place by window constraints; an empty domain is
/// reported as a constraint violation at tightening time rather than at
/// search time.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalVar {
    pub task_id: Id,
    pub start_min: i64,
    pub start_max: i64,
    pub end_max: i64,
    pub duration_min: i64,
    pub duration_max: i64,
    pub fixed_start: Option<i64>,
}

impl IntervalVar {
    /// A task with a duration domain `[duration_min, duration_max]` inside
    /// `[0, horizon]`.
    pub fn new(task_id: impl Into<Id>, duration_min: i64, duration_max: i64, horizon: i64) -> Self {
        Self {
            task_id: task_id.into(),
            start_min: 0,
            start_max: horizon - duration_min,
            end_max: horizon,
            duration_min,
            duration_max,
            fixed_start: None,
        }
    }

    pub fn fixed_duration(task_id: impl Into<Id>, duration: i64, horizon: i64) -> Self {
        Self::new(task_id, duration, duration, horizon)
    }

    pub fn is_fixed_duration(&self) -> bool {
        self.duration_min == self.duration_max
    }
}

/// A boolean assignment literal for one `(resource, task)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct AssignVar {
    pub resource_id: Id,
    pub task_id: Id,
    /// Pinned literals are fixed true: the task explicitly requires the
    /// resource.
    pub pinned: bool,
}

/// An interval participating in a group constraint only while its literal
/// is true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatedInterval {
    pub interval: usize,
    pub literal: usize,
}

/// A gated interval with the quantity it draws from a cumulative resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatedDemand {
    pub interval: usize,
    pub literal: usize,
    pub quantity: i64,
}

/// Structured constraint vocabulary interpreted by the search.
#[derive(Debug, Clone, PartialEq)]
pub enum CpConstraint {
    /// `end(before) <= start(after)`.
    Precedence { before: usize, after: usize },
    /// Pairwise disjoint intervals among active members.
    NoOverlap {
        resource_id: Id,
        members: Vec<GatedInterval>,
    },
    /// At every time point active demands sum to at most `capacity`.
    Cumulative {
        resource_id: Id,
        capacity: i64,
        demands: Vec<GatedDemand>,
    },
    /// At least one of the literals must be true.
    AtLeastOne {
        label: String,
        literals: Vec<usize>,
    },
}

/// Raw variable values extracted by the search.
#[derive(Debug, Clone, PartialEq)]
pub struct CpSolution {
    pub starts: Vec<i64>,
    pub durations: Vec<i64>,
    pub literal_values: Vec<bool>,
    pub objective_value: i64,
}

impl CpSolution {
    pub fn end(&self, interval: usize) -> i64 {
        self.starts[interval] + self.durations[interval]
    }
}

/// Variable store plus constraint list for one solve.
#[derive(Debug, Clone, Default)]
pub struct CpModel {
    pub horizon: i64,
    intervals: Vec<IntervalVar>,
    literals: Vec<AssignVar>,
    constraints: Vec<CpConstraint>,
    index_by_task: HashMap<Id, usize>,
    literal_by_pair: HashMap<(Id, Id), usize>,
    /// Names of every constraint added, for diagnostics.
    constraint_names: Vec<String>,
}

impl CpModel {
    pub fn new(horizon: i64) -> Self {
        Self {
            horizon,
            ..Default::default()
        }
    }

    // ── Variables ─────────────────────────────────────────────────────

    pub fn add_interval(&mut self, var: IntervalVar) -> Result<usize, PlanningError> {
        if self.index_by_task.contains_key(&var.task_id) {
            return Err(PlanningError::validation(format!(
                "duplicate task id {:?} in model",
                var.task_id
            )));
        }
        let index = self.intervals.len();
        self.index_by_task.insert(var.task_id.clone(), index);
        self.intervals.push(var);
        Ok(index)
    }

    pub fn interval_index(&self, task_id: &str) -> Option<usize> {
        self.index_by_task.get(task_id).copied()
    }

    pub fn interval(&self, index: usize) -> &IntervalVar {
        &self.intervals[index]
    }

    pub fn intervals(&self) -> &[IntervalVar] {
        &self.intervals
    }

    /// Creates (or returns the existing) literal for a `(resource, task)`
    /// pair.
    pub fn assign_literal(&mut self, resource_id: &str, task_id: &str) -> usize {
        let key = (resource_id.to_owned(), task_id.to_owned());
        if let Some(&index) = self.literal_by_pair.get(&key) {
            return index;
        }
        let index = self.literals.len();
        self.literals.push(AssignVar {
            resource_id: resource_id.to_owned(),
            task_id: task_id.to_owned(),
            pinned: false,
        });
        self.literal_by_pair.insert(key, index);
        index
    }

    pub fn literal_index(&self, resource_id: &str, task_id: &str) -> Option<usize> {
        self.literal_by_pair
            .get(&(resource_id.to_owned(), task_id.to_owned()))
            .copied()
    }

    pub fn literal(&self, index: usize) -> &AssignVar {
        &self.literals[index]
    }

    pub fn literals(&self) -> &[AssignVar] {
        &self.literals
    }

    /// Fixes a literal true.
    pub fn pin_literal(&mut self, index: usize) {
        self.literals[index].pinned = true;
    }

    // ── Bound tightening ──────────────────────────────────────────────

    pub fn tighten_start_min(
        &mut self,
        index: usize,
        min: i64,
        name: &str,
    ) -> Result<(), PlanningError> {
        let var = &mut self.intervals[index];
        var.start_min = var.start_min.max(min);
        self.constraint_names.push(name.to_owned());
        self.check_domain(index)
    }

    pub fn tighten_end_max(
        &mut self,
        index: usize,
        max: i64,
        name: &str,
    ) -> Result<(), PlanningError> {
        let var = &mut self.intervals[index];
        var.end_max = var.end_max.min(max);
        var.start_max = var.start_max.min(var.end_max - var.duration_min);
        self.constraint_names.push(name.to_owned());
        self.check_domain(index)
    }

    pub fn fix_start(&mut self, index: usize, at: i64, name: &str) -> Result<(), PlanningError> {
        {
            let var = &mut self.intervals[index];
            var.fixed_start = Some(at);
            var.start_min = var.start_min.max(at);
            var.start_max = var.start_max.min(at);
        }
        self.constraint_names.push(name.to_owned());
        self.check_domain(index)
    }

    fn check_domain(&self, index: usize) -> Result<(), PlanningError> {
        let var = &self.intervals[index];
        if var.start_min > var.start_max || var.start_min + var.duration_min > var.end_max {
            return Err(PlanningError::ConstraintViolation {
                message: format!(
                    "task {}: time window cannot fit duration of {} minutes",
                    var.task_id, var.duration_min
                ),
                violated_constraints: vec!["time_window".into()],
            });
        }
        Ok(())
    }

    // ── Constraints ───────────────────────────────────────────────────

    pub fn add_precedence(&mut self, before: usize, after: usize) {
        let name = format!(
            "precedence_{}_{}",
            self.intervals[before].task_id, self.intervals[after].task_id
        );
        self.constraint_names.push(name);
        self.constraints.push(CpConstraint::Precedence { before, after });
    }

    pub fn add_no_overlap(&mut self, resource_id: &str, members: Vec<GatedInterval>) {
        self.constraint_names
            .push(format!("no_overlap_{resource_id}"));
        self.constraints.push(CpConstraint::NoOverlap {
            resource_id: resource_id.to_owned(),
            members,
        });
    }

    pub fn add_cumulative(&mut self, resource_id: &str, capacity: i64, demands: Vec<GatedDemand>) {
        self.constraint_names
            .push(format!("cumulative_{resource_id}"));
        self.constraints.push(CpConstraint::Cumulative {
            resource_id: resource_id.to_owned(),
            capacity,
            demands,
        });
    }

    pub fn add_at_least_one(&mut self, label: impl Into<String>, literals: Vec<usize>) {
        let label = label.into();
        self.constraint_names.push(label.clone());
        self.constraints
            .push(CpConstraint::AtLeastOne { label, literals });
    }

    pub fn constraints(&self) -> &[CpConstraint] {
        &self.constraints
    }

    pub fn constraint_names(&self) -> &[String] {
        &self.constraint_names
    }

    pub fn interval_count(&self) -> usize {
        self.intervals.len()
    }

    pub fn literal_count(&self) -> usize {
        self.literals.len()
    }

    pub fn constraint_count(&self) -> usize {
        self.constraints.len()
    }

    /// Every precedence pair `(before, after)` by interval index.
    pub fn precedence_edges(&self) -> Vec<(usize, usize)> {
        self.constraints
            .iter()
            .filter_map(|c| match c {
                CpConstraint::Precedence { before, after } => Some((*before, *after)),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_with_task(duration: i64) -> (CpModel, usize) {
        let mut model = CpModel::new(1440);
        let idx = model
            .add_interval(IntervalVar::fixed_duration("T1", duration, 1440))
            .unwrap();
        (model, idx)
    }

    // ── Variables ─────────────────────────────────────────────────────

    #[test]
    fn duplicate_interval_is_rejected() {
        let (mut model, _) = model_with_task(60);
        let err = model
            .add_interval(IntervalVar::fixed_duration("T1", 60, 1440))
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn literal_is_deduplicated() {
        let (mut model, _) = model_with_task(60);
        let a = model.assign_literal("R1", "T1");
        let b = model.assign_literal("R1", "T1");
        assert_eq!(a, b);
        assert_eq!(model.literal_count(), 1);
    }

    #[test]
    fn pinned_literal_is_recorded() {
        let (mut model, _) = model_with_task(60);
        let lit = model.assign_literal("R1", "T1");
        model.pin_literal(lit);
        assert!(model.literal(lit).pinned);
    }

    // ── Bound tightening ──────────────────────────────────────────────

    #[test]
    fn tightening_narrows_bounds() {
        let (mut model, idx) = model_with_task(60);
        model.tighten_start_min(idx, 120, "earliest_start_T1").unwrap();
        model.tighten_end_max(idx, 600, "latest_finish_T1").unwrap();
        let var = model.interval(idx);
        assert_eq!(var.start_min, 120);
        assert_eq!(var.end_max, 600);
        assert_eq!(var.start_max, 540);
    }

    #[test]
    fn empty_domain_is_a_window_violation() {
        let (mut model, idx) = model_with_task(120);
        model.tighten_start_min(idx, 600, "earliest_start_T1").unwrap();
        let err = model
            .tighten_end_max(idx, 650, "latest_finish_T1")
            .unwrap_err();
        assert_eq!(err.code(), "CONSTRAINT_VIOLATION");
    }

    #[test]
    fn fix_start_collapses_domain() {
        let (mut model, idx) = model_with_task(60);
        model.fix_start(idx, 240, "fixed_start_T1").unwrap();
        let var = model.interval(idx);
        assert_eq!(var.fixed_start, Some(240));
        assert_eq!(var.start_min, 240);
        assert_eq!(var.start_max, 240);
    }

    // ── Constraints ───────────────────────────────────────────────────

    #[test]
    fn precedence_edges_are_reported() {
        let mut model = CpModel::new(1440);
        let a = model
            .add_interval(IntervalVar::fixed_duration("A", 60, 1440))
            .unwrap();
        let b = model
            .add_interval(IntervalVar::fixed_duration("B", 60, 1440))
            .unwrap();
        model.add_precedence(a, b);
        assert_eq!(model.precedence_edges(), vec![(a, b)]);
        assert!(model
            .constraint_names()
            .iter()
            .any(|n| n == "precedence_A_B"));
    }
}
