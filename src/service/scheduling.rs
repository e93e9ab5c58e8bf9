//! Synchronous plan orchestration: request → entities → solve → response.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::config::{PriorityTemplate, SolverSettings};
use crate::domain::event::ProcessingPolicy;
use crate::domain::graph::TaskGraph;
use crate::domain::job::Job;
use crate::domain::material::{AssetCategory, MaterialItem, ToolAsset};
use crate::domain::preparation::{PrepTaskType, PreparationTask, TaskStatus};
use crate::domain::resource::{HumanProfile, PhysicalProfile, Resource, ResourceCalendar};
use crate::domain::schedule::{GateSnapshot, Schedule, ScheduleDiff, TaskDelay, TaskInterval};
use crate::error::PlanningError;
use crate::service::event::EventApplication;
use crate::service::gate::{GateContext, GateService, GateSummary};
use crate::solver::builder::BuildConfig;
use crate::solver::driver::CpSolver;
use crate::solver::objective::ObjectiveWeights;
use crate::solver::solution::SolutionContext;
use crate::time_util::{format_iso_duration, parse_rfc3339};
use crate::Id;

/// Tasks inside this window stay frozen under the rolling-window policy.
const ROLLING_WINDOW_HOURS: i64 = 24;

// ── Request DTOs ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkPackageSpec {
    pub work_package_id: Id,
    pub engine_id: Id,
    #[serde(default)]
    pub jobs: Vec<Id>,
    #[serde(default)]
    pub job_details: Vec<Job>,
    #[serde(default)]
    pub materials: Vec<MaterialItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSpec {
    pub asset_id: Id,
    pub name: Option<String>,
    #[serde(default)]
    pub category: AssetCategory,
    #[serde(default)]
    pub is_critical: bool,
    pub exclusive_group: Option<String>,
    pub calendar: Option<ResourceCalendar>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanSpec {
    pub employee_id: Id,
    pub name: Option<String>,
    #[serde(default)]
    pub qualifications: Vec<String>,
    pub availability_schedule: Option<ResourceCalendar>,
}

fn default_prep_window_days() -> u32 {
    2
}

fn default_template() -> String {
    "balanced".to_owned()
}

fn default_freeze() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanConfigSpec {
    #[serde(default = "default_prep_window_days")]
    pub prep_window_days: u32,
    #[serde(default = "default_template")]
    pub objective_template: String,
    #[serde(default = "default_freeze")]
    pub freeze_inprogress: bool,
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub solver: SolverSettings,
}

impl Default for PlanConfigSpec {
    fn default() -> Self {
        Self {
            prep_window_days: default_prep_window_days(),
            objective_template: default_template(),
            freeze_inprogress: default_freeze(),
            weights: BTreeMap::new(),
            solver: SolverSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRequest {
    pub request_id: Id,
    /// RFC-3339; a missing value means "now".
    pub plan_start_time: Option<String>,
    pub work_packages: Vec<WorkPackageSpec>,
    #[serde(default)]
    pub assets: Vec<AssetSpec>,
    #[serde(default)]
    pub humans: Vec<HumanSpec>,
    #[serde(default)]
    pub config: PlanConfigSpec,
}

// ── Response DTOs ─────────────────────────────────────────────────────

/// A preparation task's status with its scheduled interval embedded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparationStatus {
    pub prep_id: Id,
    pub name: String,
    pub task_type: PrepTaskType,
    pub is_gate: bool,
    pub status: TaskStatus,
    pub interval: Option<TaskInterval>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanResponse {
    pub plan_id: Id,
    pub request_id: Id,
    pub created_at: DateTime<Utc>,
    pub makespan: String,
    pub gates: Vec<GateSnapshot>,
    pub gate_summary: GateSummary,
    pub preparation_tasks: Vec<PreparationStatus>,
    pub schedule: Schedule,
}

/// Renders the failure body for a request that could not be planned.
pub fn failure_body(request_id: &str, error: &PlanningError) -> Value {
    serde_json::json!({
        "plan_id": Value::Null,
        "request_id": request_id,
        "error": error.to_error_object(),
    })
}

/// Result of a policy-directed replan.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplanOutcome {
    pub response: PlanResponse,
    pub diff: ScheduleDiff,
}

/// Parsed entity sets for one request.
struct ParsedEntities {
    jobs: Vec<Job>,
    resources: Vec<Resource>,
    preparation_tasks: Vec<PreparationTask>,
    materials: Vec<MaterialItem>,
    tools: Vec<ToolAsset>,
}

/// One-request plan orchestration over the solver stack.
#[derive(Debug, Default)]
pub struct SchedulingService {
    gate_service: GateService,
}

impl SchedulingService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a schedule for the request.
    ///
    /// Validation failures surface before any solver work; the solver is
    /// cleared on every path out.
    pub fn create_schedule(
        &self,
        request: &PlanRequest,
        now: DateTime<Utc>,
    ) -> Result<PlanResponse, PlanningError> {
        self.validate_request(request)?;

        let plan_start = match &request.plan_start_time {
            Some(raw) => parse_rfc3339(raw)?,
            None => now,
        };

        let entities = self.parse_request(request)?;
        self.validate_business_rules(&entities)?;

        let template: PriorityTemplate = request.config.objective_template.parse()?;
        let mut weights = ObjectiveWeights::from_template(template);
        weights.apply_overrides(&request.config.weights)?;

        let plan_id = format!(
            "PLAN-{}-{}",
            now.format("%Y%m%d-%H%M%S"),
            &request.request_id[..8.min(request.request_id.len())]
        );
        info!(plan_id = %plan_id, request_id = %request.request_id, "creating schedule");

        let mut solver = CpSolver::new(request.config.solver.clone());
        let outcome = self.run_solver(
            &mut solver,
            &entities,
            weights,
            plan_start,
            request.config.prep_window_days,
            &plan_id,
        );
        // The driver's model handles are released whether or not the solve
        // succeeded.
        solver.clear();
        let schedule = outcome?;

        Ok(self.build_response(request, entities, schedule, plan_id, now))
    }

    /// Re-solves the plan after events, freezing tasks per policy.
    ///
    /// Frozen tasks keep their prior interval via fixed-start constraints.
    /// In-progress freezing always wins: even `full_replan` keeps started
    /// and completed work in place when `freeze_inprogress` is set.
    pub fn replan(
        &self,
        request: &PlanRequest,
        prior: &Schedule,
        application: &EventApplication,
        now: DateTime<Utc>,
    ) -> Result<ReplanOutcome, PlanningError> {
        if application.policy == ProcessingPolicy::ManualReview {
            return Ok(ReplanOutcome {
                response: self.wrap_existing(request, prior.clone(), now),
                diff: application.diff.clone(),
            });
        }

        let frozen = self.frozen_task_ids(request, prior, application.policy, now);

        let mut adjusted = request.clone();
        for package in &mut adjusted.work_packages {
            for job in &mut package.job_details {
                if frozen.contains(&job.job_id) {
                    if let Some(interval) = prior.interval(&job.job_id) {
                        job.fixed_start = Some(interval.start_time);
                    }
                }
            }
        }
        let response = self.create_schedule(&adjusted, now)?;
        let diff = self.diff_schedules(prior, &response.schedule, application);
        Ok(ReplanOutcome { response, diff })
    }

    // ── Validation ────────────────────────────────────────────────────

    fn validate_request(&self, request: &PlanRequest) -> Result<(), PlanningError> {
        if request.work_packages.is_empty() {
            return Err(PlanningError::validation("work_packages must not be empty"));
        }
        if request.assets.is_empty() && request.humans.is_empty() {
            return Err(PlanningError::validation(
                "at least one asset or human resource is required",
            ));
        }
        if request.config.prep_window_days == 0 {
            return Err(PlanningError::validation(
                "prep_window_days must be positive",
            ));
        }
        request
            .config
            .objective_template
            .parse::<PriorityTemplate>()?;
        request.config.solver.validate()?;
        Ok(())
    }

    fn validate_business_rules(&self, entities: &ParsedEntities) -> Result<(), PlanningError> {
        // One resource per exclusive group.
        let mut group_owner: BTreeMap<&str, &str> = BTreeMap::new();
        for resource in &entities.resources {
            if !resource.is_exclusive() {
                continue;
            }
            let group = resource
                .exclusive_group()
                .unwrap_or(resource.resource_id.as_str());
            if let Some(existing) = group_owner.get(group) {
                return Err(PlanningError::ResourceConflict {
                    message: format!("multiple exclusive resources in group {group:?}"),
                    conflicting_resources: vec![
                        (*existing).to_owned(),
                        resource.resource_id.clone(),
                    ],
                });
            }
            group_owner.insert(group, resource.resource_id.as_str());
        }

        for job in &entities.jobs {
            job.validate()?;
        }
        for task in &entities.preparation_tasks {
            task.validate()?;
        }
        for material in &entities.materials {
            material.validate()?;
        }
        for resource in &entities.resources {
            resource.validate()?;
        }

        // Cycle detection must not consume the solver time budget.
        TaskGraph::from_entities(&entities.jobs, &entities.preparation_tasks)?;
        Ok(())
    }

    // ── Parsing ───────────────────────────────────────────────────────

    fn parse_request(&self, request: &PlanRequest) -> Result<ParsedEntities, PlanningError> {
        let mut jobs = Vec::new();
        let mut preparation_tasks = Vec::new();
        let mut materials = Vec::new();

        for package in &request.work_packages {
            if !package.job_details.is_empty() {
                for detail in &package.job_details {
                    let mut job = detail.clone();
                    job.work_card_id = package.work_package_id.clone();
                    job.engine_id = package.engine_id.clone();
                    jobs.push(job);
                }
            } else {
                for job_id in &package.jobs {
                    jobs.push(Job::new(
                        job_id.clone(),
                        package.work_package_id.clone(),
                        package.engine_id.clone(),
                        4.0,
                    ));
                }
            }

            for material in &package.materials {
                let task = PreparationTask::new(
                    format!("PREP-{}", material.material_id),
                    package.engine_id.clone(),
                    package.work_package_id.clone(),
                    PrepTaskType::MaterialKitting,
                    1.0,
                )
                .with_name(format!("Prepare material {}", material.material_id));
                let task = if material.must_kit {
                    task.gated(["task_complete", "evidence_complete"])
                } else {
                    task
                };
                preparation_tasks.push(task);
                materials.push(material.clone());
            }
        }

        let mut resources = Vec::new();
        let mut tools = Vec::new();
        for asset in &request.assets {
            let mut resource = Resource::physical(
                asset.asset_id.clone(),
                PhysicalProfile {
                    // Critical tooling is treated as exclusive equipment.
                    is_exclusive: asset.is_critical,
                    exclusive_group: asset.exclusive_group.clone(),
                    ..Default::default()
                },
            );
            resource.name = asset
                .name
                .clone()
                .unwrap_or_else(|| asset.asset_id.clone());
            resource.calendar = asset.calendar.clone();
            resources.push(resource);

            let mut tool = ToolAsset::new(asset.asset_id.clone());
            tool.name = asset.name.clone().unwrap_or_else(|| asset.asset_id.clone());
            tool.category = asset.category;
            tool.is_critical = asset.is_critical;
            tool.exclusive_group = asset.exclusive_group.clone();
            tools.push(tool);
        }

        for human in &request.humans {
            let mut profile = HumanProfile::new(human.employee_id.clone());
            profile.qualifications = human.qualifications.iter().cloned().collect();
            let mut resource = Resource::human(human.employee_id.clone(), profile);
            resource.name = human
                .name
                .clone()
                .unwrap_or_else(|| human.employee_id.clone());
            resource.calendar = human.availability_schedule.clone();
            resources.push(resource);
        }

        Ok(ParsedEntities {
            jobs,
            resources,
            preparation_tasks,
            materials,
            tools,
        })
    }

    // ── Solve ─────────────────────────────────────────────────────────

    fn run_solver(
        &self,
        solver: &mut CpSolver,
        entities: &ParsedEntities,
        weights: ObjectiveWeights,
        plan_start: DateTime<Utc>,
        prep_window_days: u32,
        plan_id: &str,
    ) -> Result<Schedule, PlanningError> {
        solver.initialize(BuildConfig::new(plan_start, prep_window_days))?;
        solver.add_jobs(entities.jobs.clone())?;
        solver.add_resources(entities.resources.clone())?;
        solver.add_preparation_tasks(entities.preparation_tasks.clone())?;
        solver.add_constraints()?;
        solver.set_objective(weights)?;

        let result = solver.solve()?;
        if !result.status.is_success() {
            return Err(PlanningError::solver(format!(
                "solver returned {:?}: {}",
                result.status,
                result
                    .error_message
                    .as_deref()
                    .unwrap_or("no feasible schedule")
            )));
        }

        let ctx = SolutionContext {
            plan_id: plan_id.to_owned(),
            plan_name: None,
            plan_start_time: plan_start,
            solver_config: serde_json::to_value(solver.settings()).unwrap_or(Value::Null),
            is_optimal: false,
        };
        solver.get_schedule(&ctx)
    }

    // ── Response assembly ─────────────────────────────────────────────

    fn build_response(
        &self,
        request: &PlanRequest,
        entities: ParsedEntities,
        mut schedule: Schedule,
        plan_id: Id,
        now: DateTime<Utc>,
    ) -> PlanResponse {
        let gate_ctx = GateContext {
            tools: &entities.tools,
            materials: &entities.materials,
            preparation_tasks: &entities.preparation_tasks,
        };
        let gate_results = self.gate_service.check_all_gates(&gate_ctx);
        let gate_summary = self.gate_service.summarize(&gate_results);

        let gates: Vec<GateSnapshot> = gate_results
            .iter()
            .map(|result| GateSnapshot {
                gate_type: result.gate_type.as_str().to_owned(),
                passed: result.passed(),
                expected_time: None,
            })
            .collect();
        schedule.gates = gates.clone();

        let preparation_tasks = entities
            .preparation_tasks
            .iter()
            .map(|task| PreparationStatus {
                prep_id: task.prep_id.clone(),
                name: task.name.clone(),
                task_type: task.task_type,
                is_gate: task.is_gate,
                status: task.status,
                interval: schedule.interval(&task.prep_id).cloned(),
            })
            .collect();

        let makespan = format_iso_duration(schedule.metrics.makespan_hours);

        PlanResponse {
            plan_id,
            request_id: request.request_id.clone(),
            created_at: now,
            makespan,
            gates,
            gate_summary,
            preparation_tasks,
            schedule,
        }
    }

    fn wrap_existing(
        &self,
        request: &PlanRequest,
        schedule: Schedule,
        now: DateTime<Utc>,
    ) -> PlanResponse {
        let makespan = format_iso_duration(schedule.metrics.makespan_hours);
        PlanResponse {
            plan_id: schedule.plan_id.clone(),
            request_id: request.request_id.clone(),
            created_at: now,
            makespan,
            gates: schedule.gates.clone(),
            gate_summary: self.gate_service.summarize(&[]),
            preparation_tasks: Vec::new(),
            schedule,
        }
    }

    // ── Replan helpers ────────────────────────────────────────────────

    fn frozen_task_ids(
        &self,
        request: &PlanRequest,
        prior: &Schedule,
        policy: ProcessingPolicy,
        now: DateTime<Utc>,
    ) -> Vec<Id> {
        let mut frozen = Vec::new();

        // In-progress freezing applies under every policy when enabled, and
        // is the defining behavior of `replan_unstarted` regardless.
        if request.config.freeze_inprogress || policy == ProcessingPolicy::ReplanUnstarted {
            for package in &request.work_packages {
                for job in &package.job_details {
                    if job.status.is_frozen_under_replan() {
                        frozen.push(job.job_id.clone());
                    }
                }
            }
        }

        match policy {
            ProcessingPolicy::ReplanUnstarted | ProcessingPolicy::FullReplan => {}
            ProcessingPolicy::RollingWindow => {
                let window_end = now + chrono::Duration::hours(ROLLING_WINDOW_HOURS);
                for interval in &prior.task_intervals {
                    if interval.start_time < window_end
                        && !frozen.contains(&interval.task_id)
                    {
                        frozen.push(interval.task_id.clone());
                    }
                }
            }
            ProcessingPolicy::ManualReview => {}
        }

        frozen
    }

    fn diff_schedules(
        &self,
        prior: &Schedule,
        new: &Schedule,
        application: &EventApplication,
    ) -> ScheduleDiff {
        let mut diff = ScheduleDiff {
            makespan_change_hours: new.metrics.makespan_hours - prior.metrics.makespan_hours,
            cost_change: new.metrics.total_cost - prior.metrics.total_cost,
            utilization_change: new.metrics.average_utilization
                - prior.metrics.average_utilization,
            resource_reallocation: application.diff.resource_reallocation.clone(),
            ..Default::default()
        };

        for interval in &new.task_intervals {
            match prior.interval(&interval.task_id) {
                None => diff.added_tasks.push(interval.task_id.clone()),
                Some(old) => {
                    if old.start_time != interval.start_time || old.end_time != interval.end_time
                    {
                        diff.affected_tasks.push(interval.task_id.clone());
                        let delay_hours = (interval.start_time - old.start_time)
                            .num_seconds() as f64
                            / 3600.0;
                        if delay_hours > 0.0 {
                            diff.delays.push(TaskDelay {
                                task_id: interval.task_id.clone(),
                                delay_hours,
                                reason: "replan".into(),
                            });
                        }
                    }
                }
            }
        }
        for interval in &prior.task_intervals {
            if new.interval(&interval.task_id).is_none() {
                diff.cancelled_tasks.push(interval.task_id.clone());
            }
        }

        diff
    }
}
