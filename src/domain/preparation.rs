//! Preparation tasks that gate main work, with evidence tracking.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PlanningError;
use crate::Id;

/// Observed execution state shared by jobs and preparation tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Cancelled,
    Blocked,
    Paused,
}

impl TaskStatus {
    /// Tasks in these states keep their interval across a replan when
    /// in-progress freezing is active.
    pub fn is_frozen_under_replan(&self) -> bool {
        matches!(self, Self::InProgress | Self::Completed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrepTaskType {
    ToolAllocation,
    MaterialKitting,
    DocReady,
    Assessment,
    ShelfHandover,
    InventoryCheck,
    HoistPrep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceType {
    HandoverForm,
    Photo,
    Signature,
    Document,
    Checklist,
}

/// A single piece of submitted evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub evidence_id: Id,
    pub evidence_type: EvidenceType,
    pub submitted_by: Id,
    pub submitted_at: DateTime<Utc>,
    pub verified: bool,
    pub uri: Option<String>,
}

impl Evidence {
    pub fn new(
        evidence_type: EvidenceType,
        submitted_by: impl Into<Id>,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            evidence_id: crate::generate_id(),
            evidence_type,
            submitted_by: submitted_by.into(),
            submitted_at,
            verified: false,
            uri: None,
        }
    }

    pub fn verified(mut self) -> Self {
        self.verified = true;
        self
    }
}

/// Pass/fail record attached to a gating preparation task.
///
/// Conditions are named predicates; the gate passes once every required
/// condition is satisfied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Gate {
    pub required_conditions: Vec<String>,
    conditions: BTreeMap<String, bool>,
    pub passed_at: Option<DateTime<Utc>>,
}

impl Gate {
    pub fn new<I, S>(required_conditions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let required_conditions: Vec<String> =
            required_conditions.into_iter().map(Into::into).collect();
        let conditions = required_conditions
            .iter()
            .map(|name| (name.clone(), false))
            .collect();
        Self {
            required_conditions,
            conditions,
            passed_at: None,
        }
    }

    pub fn set_condition(&mut self, name: &str, satisfied: bool, now: DateTime<Utc>) {
        self.conditions.insert(name.to_owned(), satisfied);
        if self.is_passed() {
            self.passed_at.get_or_insert(now);
        } else {
            self.passed_at = None;
        }
    }

    pub fn condition(&self, name: &str) -> bool {
        self.conditions.get(name).copied().unwrap_or(false)
    }

    pub fn failed_conditions(&self) -> Vec<String> {
        self.required_conditions
            .iter()
            .filter(|name| !self.condition(name))
            .cloned()
            .collect()
    }

    pub fn is_passed(&self) -> bool {
        self.required_conditions
            .iter()
            .all(|name| self.condition(name))
    }
}

/// Quantity of a tool asset a preparation task needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRequirement {
    pub asset_id: Id,
    pub quantity: u32,
}

/// Pre-work that must complete before main jobs can begin.
///
/// # Invariants
///
/// - `duration_hours > 0`
/// - `dependencies` over a plan's preparation tasks form a DAG with no
///   self-loops
/// - a gate record is present exactly when `is_gate` is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparationTask {
    pub prep_id: Id,
    pub name: String,
    pub engine_id: Id,
    pub work_package_id: Id,
    pub task_type: PrepTaskType,
    pub duration_hours: f64,
    pub earliest_start: Option<DateTime<Utc>>,
    pub latest_finish: Option<DateTime<Utc>>,
    #[serde(default)]
    pub dependencies: Vec<Id>,
    pub is_gate: bool,
    pub gate: Option<Gate>,
    #[serde(default)]
    pub evidence_required: BTreeSet<EvidenceType>,
    #[serde(default)]
    pub submitted_evidence: Vec<Evidence>,
    #[serde(default)]
    pub required_assets: Vec<AssetRequirement>,
    pub area: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
}

impl PreparationTask {
    pub fn new(
        prep_id: impl Into<Id>,
        engine_id: impl Into<Id>,
        work_package_id: impl Into<Id>,
        task_type: PrepTaskType,
        duration_hours: f64,
    ) -> Self {
        let prep_id = prep_id.into();
        Self {
            name: format!("Preparation {prep_id}"),
            prep_id,
            engine_id: engine_id.into(),
            work_package_id: work_package_id.into(),
            task_type,
            duration_hours,
            earliest_start: None,
            latest_finish: None,
            dependencies: Vec::new(),
            is_gate: false,
            gate: None,
            evidence_required: BTreeSet::new(),
            submitted_evidence: Vec::new(),
            required_assets: Vec::new(),
            area: None,
            status: TaskStatus::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Turns this task into a gate with the given required conditions.
    pub fn gated<I, S>(mut self, required_conditions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.is_gate = true;
        self.gate = Some(Gate::new(required_conditions));
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<Id>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// True iff every required evidence type has at least one verified
    /// submission.
    pub fn evidence_complete(&self) -> bool {
        self.evidence_required.iter().all(|required| {
            self.submitted_evidence
                .iter()
                .any(|e| e.evidence_type == *required && e.verified)
        })
    }

    pub fn submit_evidence(&mut self, evidence: Evidence) {
        self.submitted_evidence.push(evidence);
    }

    pub fn validate(&self) -> Result<(), PlanningError> {
        if self.duration_hours <= 0.0 {
            return Err(PlanningError::validation(format!(
                "preparation task {}: duration_hours must be positive, got {}",
                self.prep_id, self.duration_hours
            )));
        }
        if self.dependencies.iter().any(|d| *d == self.prep_id) {
            return Err(PlanningError::ConstraintViolation {
                message: format!("preparation task {} depends on itself", self.prep_id),
                violated_constraints: vec!["no_circular_dependencies".into()],
            });
        }
        if self.is_gate != self.gate.is_some() {
            return Err(PlanningError::validation(format!(
                "preparation task {}: gate record must be present exactly when is_gate is set",
                self.prep_id
            )));
        }
        Ok(())
    }
}
