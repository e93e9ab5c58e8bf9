//! Solver output: immutable schedule snapshots, metrics, and diffs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::preparation::TaskStatus;
use crate::error::PlanningError;
use crate::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalType {
    Job,
    Preparation,
    Maintenance,
    Buffer,
}

/// One scheduled task's placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInterval {
    pub task_id: Id,
    pub task_type: IntervalType,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_hours: f64,
    pub task_name: Option<String>,
    pub work_package_id: Option<Id>,
    pub engine_id: Option<Id>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub assigned_resources: Vec<Id>,
    #[serde(default)]
    pub assigned_personnel: Vec<Id>,
    #[serde(default)]
    pub is_critical_path: bool,
    #[serde(default)]
    pub is_fixed: bool,
    #[serde(default)]
    pub buffer_before_hours: f64,
    #[serde(default)]
    pub buffer_after_hours: f64,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl TaskInterval {
    /// Duration consistency: `end − start` must match `duration_hours`
    /// within one minute.
    pub fn validate(&self) -> Result<(), PlanningError> {
        let span_seconds = (self.end_time - self.start_time).num_seconds() as f64;
        let declared_seconds = self.duration_hours * 3600.0;
        if (span_seconds - declared_seconds).abs() > 60.0 {
            return Err(PlanningError::validation(format!(
                "interval {}: duration {}h disagrees with span {}s",
                self.task_id, self.duration_hours, span_seconds
            )));
        }
        Ok(())
    }

    pub fn overlaps(&self, other: &TaskInterval) -> bool {
        periods_overlap(
            self.start_time,
            self.end_time,
            other.start_time,
            other.end_time,
        )
    }
}

/// Half-open period overlap: touching boundaries do not overlap.
pub fn periods_overlap(
    start1: DateTime<Utc>,
    end1: DateTime<Utc>,
    start2: DateTime<Utc>,
    end2: DateTime<Utc>,
) -> bool {
    !(end1 <= start2 || end2 <= start1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    #[default]
    Planned,
    Active,
    Released,
    Cancelled,
}

/// One resource's booking against one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAllocation {
    pub allocation_id: Id,
    pub resource_id: Id,
    pub resource_name: Option<String>,
    pub allocated_to: Id,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub quantity: u32,
    pub cost: Option<f64>,
    #[serde(default)]
    pub status: AllocationStatus,
}

impl ResourceAllocation {
    pub fn overlaps(&self, other: &ResourceAllocation) -> bool {
        periods_overlap(
            self.start_time,
            self.end_time,
            other.start_time,
            other.end_time,
        )
    }

    pub fn duration_hours(&self) -> f64 {
        (self.end_time - self.start_time).num_seconds() as f64 / 3600.0
    }
}

/// Aggregate quality measures of a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScheduleMetrics {
    pub makespan_hours: f64,
    pub total_duration_hours: f64,
    pub resource_utilization: BTreeMap<Id, f64>,
    pub average_utilization: f64,
    pub total_cost: f64,
    pub scheduled_task_count: usize,
}

/// One gate's state as seen by the plan response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateSnapshot {
    pub gate_type: String,
    pub passed: bool,
    pub expected_time: Option<DateTime<Utc>>,
}

/// An immutable scheduling outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub plan_id: Id,
    pub name: Option<String>,
    pub plan_start_time: DateTime<Utc>,
    pub plan_end_time: DateTime<Utc>,
    pub task_intervals: Vec<TaskInterval>,
    pub resource_allocations: Vec<ResourceAllocation>,
    #[serde(default)]
    pub gates: Vec<GateSnapshot>,
    pub metrics: ScheduleMetrics,
    #[serde(default)]
    pub critical_path: Vec<Id>,
    pub is_feasible: bool,
    pub is_optimal: bool,
    #[serde(default)]
    pub solver_config: Value,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Schedule {
    pub fn interval(&self, task_id: &str) -> Option<&TaskInterval> {
        self.task_intervals.iter().find(|i| i.task_id == task_id)
    }

    pub fn allocations_for(&self, resource_id: &str) -> Vec<&ResourceAllocation> {
        self.resource_allocations
            .iter()
            .filter(|a| a.resource_id == resource_id)
            .collect()
    }

    pub fn makespan_hours(&self) -> f64 {
        self.metrics.makespan_hours
    }

    /// Validates duration consistency across all intervals.
    pub fn validate(&self) -> Result<(), PlanningError> {
        for interval in &self.task_intervals {
            interval.validate()?;
        }
        Ok(())
    }
}

/// One task's slip inside a diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDelay {
    pub task_id: Id,
    pub delay_hours: f64,
    pub reason: String,
}

/// A resource availability or assignment change inside a diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReallocationEntry {
    pub resource_id: Id,
    pub task_id: Option<Id>,
    pub action: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Structured delta between two schedules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ScheduleDiff {
    pub affected_tasks: Vec<Id>,
    pub delays: Vec<TaskDelay>,
    pub resource_reallocation: Vec<ReallocationEntry>,
    pub added_tasks: Vec<Id>,
    pub cancelled_tasks: Vec<Id>,
    pub makespan_change_hours: f64,
    pub cost_change: f64,
    pub utilization_change: f64,
}
