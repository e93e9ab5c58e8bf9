//! Atomic units of scheduled work, decomposed from AMM work cards.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::preparation::TaskStatus;
use crate::error::PlanningError;
use crate::Id;

/// Quantity of a specific resource a job consumes while running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirement {
    pub resource_id: Id,
    pub quantity: u32,
    pub is_critical: bool,
}

impl ResourceRequirement {
    pub fn new(resource_id: impl Into<Id>) -> Self {
        Self {
            resource_id: resource_id.into(),
            quantity: 1,
            is_critical: false,
        }
    }

    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn critical(mut self) -> Self {
        self.is_critical = true;
        self
    }
}

/// An atomic operation from a work card.
///
/// # Invariants
///
/// - `base_duration_hours > 0` (and `fixed_duration`, when set)
/// - the `predecessor_jobs` relation over a plan's jobs is a DAG with no
///   self-loops
/// - `performance_factors` values lie in `[0.1, 2.0]`
/// - when both window ends are set, `earliest_start < latest_finish` and the
///   window admits the effective duration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Id,
    pub work_card_id: Id,
    pub engine_id: Id,
    pub name: String,
    pub base_duration_hours: f64,
    pub fixed_duration: Option<f64>,
    /// Per-worker duration multipliers; < 1.0 means the worker is faster,
    /// > 1.0 slower.
    #[serde(default)]
    pub performance_factors: BTreeMap<Id, f64>,
    #[serde(default)]
    pub required_resources: Vec<ResourceRequirement>,
    #[serde(default)]
    pub required_qualifications: BTreeSet<String>,
    #[serde(default)]
    pub predecessor_jobs: Vec<Id>,
    pub earliest_start: Option<DateTime<Utc>>,
    pub latest_finish: Option<DateTime<Utc>>,
    pub fixed_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: TaskStatus,
    pub actual_start: Option<DateTime<Utc>>,
    pub actual_end: Option<DateTime<Utc>>,
    /// Free-form annotations; `area` feeds the switch objective and
    /// `required_materials` feeds ETA impact analysis.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Job {
    pub fn new(
        job_id: impl Into<Id>,
        work_card_id: impl Into<Id>,
        engine_id: impl Into<Id>,
        base_duration_hours: f64,
    ) -> Self {
        let job_id = job_id.into();
        Self {
            name: format!("Job {job_id}"),
            job_id,
            work_card_id: work_card_id.into(),
            engine_id: engine_id.into(),
            base_duration_hours,
            fixed_duration: None,
            performance_factors: BTreeMap::new(),
            required_resources: Vec::new(),
            required_qualifications: BTreeSet::new(),
            predecessor_jobs: Vec::new(),
            earliest_start: None,
            latest_finish: None,
            fixed_start: None,
            status: TaskStatus::default(),
            actual_start: None,
            actual_end: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_predecessors(mut self, predecessors: Vec<Id>) -> Self {
        self.predecessor_jobs = predecessors;
        self
    }

    pub fn with_qualifications<I, S>(mut self, qualifications: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_qualifications = qualifications.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_requirement(mut self, requirement: ResourceRequirement) -> Self {
        self.required_resources.push(requirement);
        self
    }

    pub fn with_window(
        mut self,
        earliest_start: Option<DateTime<Utc>>,
        latest_finish: Option<DateTime<Utc>>,
    ) -> Self {
        self.earliest_start = earliest_start;
        self.latest_finish = latest_finish;
        self
    }

    pub fn has_resource_requirement(&self, resource_id: &str) -> bool {
        self.required_resources
            .iter()
            .any(|req| req.resource_id == resource_id)
    }

    pub fn requirement_for(&self, resource_id: &str) -> Option<&ResourceRequirement> {
        self.required_resources
            .iter()
            .find(|req| req.resource_id == resource_id)
    }

    /// The material ids this job consumes, from `metadata.required_materials`.
    pub fn required_materials(&self) -> Vec<Id> {
        self.metadata
            .get("required_materials")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Area label used by the switch objective; defaults to `"default"`.
    pub fn area(&self) -> String {
        self.metadata
            .get("area")
            .and_then(Value::as_str)
            .unwrap_or("default")
            .to_owned()
    }

    /// Duration in hours scaled by the assigned workers' mean performance
    /// factor. Workers without a recorded factor count as 1.0.
    pub fn effective_duration_hours(&self, worker_ids: &[Id]) -> f64 {
        if let Some(fixed) = self.fixed_duration {
            return fixed;
        }
        if worker_ids.is_empty() {
            return self.base_duration_hours;
        }
        let mean_factor: f64 = worker_ids
            .iter()
            .map(|id| *self.performance_factors.get(id).unwrap_or(&1.0))
            .sum::<f64>()
            / worker_ids.len() as f64;
        self.base_duration_hours * mean_factor.clamp(0.1, 2.0)
    }

    /// Checks the per-job invariants.
    pub fn validate(&self) -> Result<(), PlanningError> {
        if self.base_duration_hours <= 0.0 {
            return Err(PlanningError::validation(format!(
                "job {}: base_duration_hours must be positive, got {}",
                self.job_id, self.base_duration_hours
            )));
        }
        if let Some(fixed) = self.fixed_duration {
            if fixed <= 0.0 {
                return Err(PlanningError::validation(format!(
                    "job {}: fixed_duration must be positive, got {fixed}",
                    self.job_id
                )));
            }
        }
        if self.predecessor_jobs.iter().any(|p| *p == self.job_id) {
            return Err(PlanningError::ConstraintViolation {
                message: format!("job {} depends on itself", self.job_id),
                violated_constraints: vec!["no_circular_dependencies".into()],
            });
        }
        for (worker_id, factor) in &self.performance_factors {
            if !(0.1..=2.0).contains(factor) {
                return Err(PlanningError::validation(format!(
                    "job {}: performance factor for {worker_id} must be in [0.1, 2.0], got {factor}",
                    self.job_id
                )));
            }
        }
        if let (Some(earliest), Some(latest)) = (self.earliest_start, self.latest_finish) {
            if earliest >= latest {
                return Err(PlanningError::validation(format!(
                    "job {}: earliest_start must precede latest_finish",
                    self.job_id
                )));
            }
            let window_hours = (latest - earliest).num_seconds() as f64 / 3600.0;
            let needed = self.fixed_duration.unwrap_or(self.base_duration_hours);
            if window_hours < needed {
                return Err(PlanningError::ConstraintViolation {
                    message: format!(
                        "job {}: window of {window_hours:.2}h cannot fit duration {needed:.2}h",
                        self.job_id
                    ),
                    violated_constraints: vec!["time_window".into()],
                });
            }
        }
        Ok(())
    }
}
