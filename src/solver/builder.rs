//! Lowers domain entities into the CP variable and constraint graph.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::graph::TaskGraph;
use crate::domain::job::Job;
use crate::domain::preparation::PreparationTask;
use crate::domain::resource::Resource;
use crate::error::PlanningError;
use crate::solver::model::{CpModel, GatedDemand, GatedInterval, IntervalVar};
use crate::time_util::minutes_from;

/// Duration envelope for jobs without a fixed duration.
const DURATION_FLOOR: f64 = 0.8;
const DURATION_CEIL: f64 = 1.5;

/// Time-domain parameters of one build.
#[derive(Debug, Clone, Copy)]
pub struct BuildConfig {
    pub plan_start_time: DateTime<Utc>,
    /// Planning horizon in minutes; at least one day.
    pub horizon_minutes: i64,
}

impl BuildConfig {
    pub fn new(plan_start_time: DateTime<Utc>, prep_window_days: u32) -> Self {
        Self {
            plan_start_time,
            horizon_minutes: (prep_window_days as i64 * 24 * 60).max(1440),
        }
    }
}

/// Builds a [`CpModel`] from jobs, resources, and preparation tasks.
///
/// Emits, in order: task variables, precedence constraints over the
/// combined DAG, resource assignment literals, exclusive and cumulative
/// capacity constraints, time-window bounds, qualification coverage, and
/// the task-execution constraint that forbids unassigned jobs.
pub struct ConstraintBuilder {
    config: BuildConfig,
}

impl ConstraintBuilder {
    pub fn new(config: BuildConfig) -> Self {
        Self { config }
    }

    /// # Errors
    ///
    /// - `Solver` when there is nothing to schedule
    /// - `Validation` for unknown predecessor ids
    /// - `ConstraintViolation` for cycles, unsatisfiable qualifications,
    ///   and windows that cannot fit their task
    pub fn build(
        &self,
        jobs: &[Job],
        resources: &[Resource],
        preparation_tasks: &[PreparationTask],
    ) -> Result<CpModel, PlanningError> {
        if jobs.is_empty() && preparation_tasks.is_empty() {
            return Err(PlanningError::solver("no tasks to schedule"));
        }

        // Validates ids, detects cycles, and yields the combined edge list.
        let graph = TaskGraph::from_entities(jobs, preparation_tasks)?;

        let mut model = CpModel::new(self.config.horizon_minutes);

        self.create_task_variables(&mut model, jobs, preparation_tasks)?;
        self.add_precedence_constraints(&mut model, &graph);
        self.add_gate_constraints(&mut model, jobs, preparation_tasks);
        self.add_resource_constraints(&mut model, jobs, resources, preparation_tasks);
        self.add_time_window_constraints(&mut model, jobs, preparation_tasks)?;
        self.add_qualification_constraints(&mut model, jobs, resources)?;
        self.add_task_execution_constraints(&mut model, jobs, resources)?;

        debug!(
            intervals = model.interval_count(),
            literals = model.literal_count(),
            constraints = model.constraint_count(),
            "constraint build complete"
        );

        Ok(model)
    }

    fn create_task_variables(
        &self,
        model: &mut CpModel,
        jobs: &[Job],
        preparation_tasks: &[PreparationTask],
    ) -> Result<(), PlanningError> {
        let horizon = self.config.horizon_minutes;
        for job in jobs {
            let var = match job.fixed_duration {
                Some(fixed) => {
                    IntervalVar::fixed_duration(&job.job_id, (fixed * 60.0).round() as i64, horizon)
                }
                None => {
                    let base = job.base_duration_hours * 60.0;
                    IntervalVar::new(
                        &job.job_id,
                        (base * DURATION_FLOOR).round() as i64,
                        (base * DURATION_CEIL).round() as i64,
                        horizon,
                    )
                }
            };
            model.add_interval(var)?;
        }
        for task in preparation_tasks {
            let minutes = (task.duration_hours * 60.0).round() as i64;
            model.add_interval(IntervalVar::fixed_duration(&task.prep_id, minutes, horizon))?;
        }
        Ok(())
    }

    fn add_precedence_constraints(&self, model: &mut CpModel, graph: &TaskGraph) {
        for (pred, succ) in graph.edges() {
            if let (Some(before), Some(after)) =
                (model.interval_index(&pred), model.interval_index(&succ))
            {
                model.add_precedence(before, after);
            }
        }
    }

    /// Gate preparation tasks precede the entry jobs of their work package.
    fn add_gate_constraints(
        &self,
        model: &mut CpModel,
        jobs: &[Job],
        preparation_tasks: &[PreparationTask],
    ) {
        for task in preparation_tasks.iter().filter(|t| t.is_gate) {
            let Some(prep_index) = model.interval_index(&task.prep_id) else {
                continue;
            };
            for job in jobs {
                if job.work_card_id != task.work_package_id {
                    continue;
                }
                // Only entry jobs of the package; their successors inherit
                // the ordering transitively.
                let has_pred_in_package = job.predecessor_jobs.iter().any(|pred| {
                    jobs.iter()
                        .any(|j| j.job_id == *pred && j.work_card_id == job.work_card_id)
                });
                if has_pred_in_package {
                    continue;
                }
                if let Some(job_index) = model.interval_index(&job.job_id) {
                    model.add_precedence(prep_index, job_index);
                }
            }
        }
    }

    fn add_resource_constraints(
        &self,
        model: &mut CpModel,
        jobs: &[Job],
        resources: &[Resource],
        preparation_tasks: &[PreparationTask],
    ) {
        for resource in resources {
            let resource_id = resource.resource_id.as_str();
            let mut members: Vec<GatedInterval> = Vec::new();

            if resource.is_human() {
                // Humans are candidates for every job; qualification and
                // execution constraints select among them.
                for job in jobs {
                    let literal = model.assign_literal(resource_id, &job.job_id);
                    if let Some(interval) = model.interval_index(&job.job_id) {
                        members.push(GatedInterval { interval, literal });
                    }
                }
            } else {
                // Physical resources only meet tasks that require them, and
                // a declared requirement pins the assignment.
                for job in jobs {
                    if job.has_resource_requirement(resource_id) {
                        let literal = model.assign_literal(resource_id, &job.job_id);
                        model.pin_literal(literal);
                        if let Some(interval) = model.interval_index(&job.job_id) {
                            members.push(GatedInterval { interval, literal });
                        }
                    }
                }
            }

            for task in preparation_tasks {
                if task
                    .required_assets
                    .iter()
                    .any(|req| req.asset_id == resource_id)
                {
                    let literal = model.assign_literal(resource_id, &task.prep_id);
                    model.pin_literal(literal);
                    if let Some(interval) = model.interval_index(&task.prep_id) {
                        members.push(GatedInterval { interval, literal });
                    }
                }
            }

            if members.len() <= 1 {
                continue;
            }

            if resource.is_exclusive() || resource.total_quantity <= 1 {
                // Quantity-one pools reduce to exclusivity.
                model.add_no_overlap(resource_id, members);
            } else {
                let demands = members
                    .iter()
                    .map(|member| {
                        let task_id = &model.interval(member.interval).task_id;
                        let quantity = jobs
                            .iter()
                            .find(|j| j.job_id == *task_id)
                            .and_then(|j| j.requirement_for(resource_id))
                            .map(|req| req.quantity as i64)
                            .or_else(|| {
                                preparation_tasks
                                    .iter()
                                    .find(|t| t.prep_id == *task_id)
                                    .and_then(|t| {
                                        t.required_assets
                                            .iter()
                                            .find(|req| req.asset_id == resource_id)
                                            .map(|req| req.quantity as i64)
                                    })
                            })
                            .unwrap_or(1);
                        GatedDemand {
                            interval: member.interval,
                            literal: member.literal,
                            quantity,
                        }
                    })
                    .collect();
                model.add_cumulative(resource_id, resource.total_quantity as i64, demands);
            }
        }
    }

    fn add_time_window_constraints(
        &self,
        model: &mut CpModel,
        jobs: &[Job],
        preparation_tasks: &[PreparationTask],
    ) -> Result<(), PlanningError> {
        let windows = jobs
            .iter()
            .map(|j| {
                (
                    j.job_id.as_str(),
                    j.earliest_start,
                    j.latest_finish,
                    j.fixed_start,
                )
            })
            .chain(preparation_tasks.iter().map(|t| {
                (
                    t.prep_id.as_str(),
                    t.earliest_start,
                    t.latest_finish,
                    None,
                )
            }))
            .collect::<Vec<_>>();

        for (task_id, earliest, latest, fixed) in windows {
            let Some(index) = model.interval_index(task_id) else {
                continue;
            };
            if let Some(earliest) = earliest {
                // An earliest start before the plan start clamps to zero.
                let minutes = minutes_from(self.config.plan_start_time, earliest).max(0);
                model.tighten_start_min(index, minutes, &format!("earliest_start_{task_id}"))?;
            }
            if let Some(latest) = latest {
                let minutes = minutes_from(self.config.plan_start_time, latest);
                model.tighten_end_max(index, minutes, &format!("latest_finish_{task_id}"))?;
            }
            if let Some(fixed) = fixed {
                let minutes = minutes_from(self.config.plan_start_time, fixed).max(0);
                model.fix_start(index, minutes, &format!("fixed_start_{task_id}"))?;
            }
        }
        Ok(())
    }

    /// Collaborative qualification coverage: for every required
    /// qualification, at least one qualified human joins the job.
    fn add_qualification_constraints(
        &self,
        model: &mut CpModel,
        jobs: &[Job],
        resources: &[Resource],
    ) -> Result<(), PlanningError> {
        let humans: Vec<&Resource> = resources.iter().filter(|r| r.is_human()).collect();

        for job in jobs {
            for qualification in &job.required_qualifications {
                let literals: Vec<usize> = humans
                    .iter()
                    .filter(|h| h.has_qualification(qualification))
                    .filter_map(|h| model.literal_index(&h.resource_id, &job.job_id))
                    .collect();

                if literals.is_empty() {
                    return Err(PlanningError::ConstraintViolation {
                        message: format!(
                            "no personnel with qualification {qualification:?} for job {}",
                            job.job_id
                        ),
                        violated_constraints: vec!["qualification".into()],
                    });
                }
                model.add_at_least_one(
                    format!("qualification_{}_{qualification}", job.job_id),
                    literals,
                );
            }
        }
        Ok(())
    }

    /// Every job needs at least one human, qualified or not.
    fn add_task_execution_constraints(
        &self,
        model: &mut CpModel,
        jobs: &[Job],
        resources: &[Resource],
    ) -> Result<(), PlanningError> {
        let humans: Vec<&Resource> = resources.iter().filter(|r| r.is_human()).collect();

        for job in jobs {
            let literals: Vec<usize> = humans
                .iter()
                .filter_map(|h| model.literal_index(&h.resource_id, &job.job_id))
                .collect();
            if literals.is_empty() {
                return Err(PlanningError::ConstraintViolation {
                    message: format!("no personnel available to execute job {}", job.job_id),
                    violated_constraints: vec!["task_execution".into()],
                });
            }
            model.add_at_least_one(format!("task_execution_{}", job.job_id), literals);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::ResourceRequirement;
    use crate::domain::preparation::PrepTaskType;
    use crate::domain::resource::{HumanProfile, PhysicalProfile};
    use chrono::TimeZone;

    fn plan_start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap()
    }

    fn builder() -> ConstraintBuilder {
        ConstraintBuilder::new(BuildConfig::new(plan_start(), 2))
    }

    fn mechanic(id: &str, qualifications: &[&str]) -> Resource {
        let mut profile = HumanProfile::new(id);
        profile.qualifications = qualifications.iter().map(|s| s.to_string()).collect();
        Resource::human(id, profile)
    }

    fn crane(id: &str) -> Resource {
        Resource::physical(
            id,
            PhysicalProfile {
                is_exclusive: true,
                ..Default::default()
            },
        )
    }

    // ── Horizon ───────────────────────────────────────────────────────

    #[test]
    fn horizon_is_prep_window_with_floor() {
        assert_eq!(BuildConfig::new(plan_start(), 2).horizon_minutes, 2880);
        // Even a degenerate window keeps one day of horizon.
        assert_eq!(BuildConfig::new(plan_start(), 0).horizon_minutes, 1440);
    }

    // ── Task variables ────────────────────────────────────────────────

    #[test]
    fn job_duration_envelope_is_80_to_150_percent() {
        let jobs = vec![Job::new("J1", "WP-1", "ENG-1", 2.0)];
        let model = builder()
            .build(&jobs, &[mechanic("EMP-1", &[])], &[])
            .unwrap();
        let var = model.interval(model.interval_index("J1").unwrap());
        assert_eq!(var.duration_min, 96);
        assert_eq!(var.duration_max, 180);
    }

    #[test]
    fn fixed_duration_collapses_envelope() {
        let mut job = Job::new("J1", "WP-1", "ENG-1", 2.0);
        job.fixed_duration = Some(3.0);
        let model = builder()
            .build(&[job], &[mechanic("EMP-1", &[])], &[])
            .unwrap();
        let var = model.interval(model.interval_index("J1").unwrap());
        assert!(var.is_fixed_duration());
        assert_eq!(var.duration_min, 180);
    }

    #[test]
    fn prep_duration_is_constant() {
        let preps = vec![PreparationTask::new(
            "PREP-1",
            "ENG-1",
            "WP-1",
            PrepTaskType::MaterialKitting,
            1.5,
        )];
        let model = builder().build(&[], &[], &preps).unwrap();
        let var = model.interval(model.interval_index("PREP-1").unwrap());
        assert!(var.is_fixed_duration());
        assert_eq!(var.duration_min, 90);
    }

    #[test]
    fn empty_input_is_a_solver_error() {
        let err = builder().build(&[], &[mechanic("EMP-1", &[])], &[]).unwrap_err();
        assert_eq!(err.code(), "SOLVER_ERROR");
    }

    // ── Precedence ────────────────────────────────────────────────────

    #[test]
    fn precedence_edges_are_emitted() {
        let jobs = vec![
            Job::new("J1", "WP-1", "ENG-1", 2.0),
            Job::new("J2", "WP-1", "ENG-1", 3.0).with_predecessors(vec!["J1".into()]),
        ];
        let model = builder()
            .build(&jobs, &[mechanic("EMP-1", &[])], &[])
            .unwrap();
        assert_eq!(model.precedence_edges().len(), 1);
    }

    #[test]
    fn unknown_predecessor_is_a_validation_error() {
        let jobs = vec![Job::new("J1", "WP-1", "ENG-1", 2.0).with_predecessors(vec!["GHOST".into()])];
        let err = builder()
            .build(&jobs, &[mechanic("EMP-1", &[])], &[])
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn cycle_is_a_constraint_violation() {
        let jobs = vec![
            Job::new("J1", "WP-1", "ENG-1", 2.0).with_predecessors(vec!["J2".into()]),
            Job::new("J2", "WP-1", "ENG-1", 3.0).with_predecessors(vec!["J1".into()]),
        ];
        let err = builder()
            .build(&jobs, &[mechanic("EMP-1", &[])], &[])
            .unwrap_err();
        let obj = err.to_error_object();
        assert_eq!(
            obj["details"]["violated_constraints"][0],
            "no_circular_dependencies"
        );
    }

    // ── Resource assignment ───────────────────────────────────────────

    #[test]
    fn humans_get_literals_for_every_job() {
        let jobs = vec![
            Job::new("J1", "WP-1", "ENG-1", 2.0),
            Job::new("J2", "WP-1", "ENG-1", 2.0),
        ];
        let model = builder()
            .build(&jobs, &[mechanic("EMP-1", &[]), mechanic("EMP-2", &[])], &[])
            .unwrap();
        assert_eq!(model.literal_count(), 4);
    }

    #[test]
    fn physical_literal_only_when_required_and_pinned() {
        let jobs = vec![
            Job::new("J1", "WP-1", "ENG-1", 2.0)
                .with_requirement(ResourceRequirement::new("CRANE-1")),
            Job::new("J2", "WP-1", "ENG-1", 2.0),
        ];
        let model = builder()
            .build(&jobs, &[mechanic("EMP-1", &[]), crane("CRANE-1")], &[])
            .unwrap();

        let lit = model.literal_index("CRANE-1", "J1").unwrap();
        assert!(model.literal(lit).pinned);
        assert!(model.literal_index("CRANE-1", "J2").is_none());
    }

    #[test]
    fn exclusive_resource_emits_no_overlap() {
        let jobs = vec![
            Job::new("J1", "WP-1", "ENG-1", 2.0)
                .with_requirement(ResourceRequirement::new("CRANE-1")),
            Job::new("J2", "WP-1", "ENG-1", 2.0)
                .with_requirement(ResourceRequirement::new("CRANE-1")),
        ];
        let model = builder()
            .build(&jobs, &[mechanic("EMP-1", &[]), crane("CRANE-1")], &[])
            .unwrap();
        assert!(model
            .constraint_names()
            .iter()
            .any(|n| n == "no_overlap_CRANE-1"));
    }

    #[test]
    fn quantity_pool_emits_cumulative() {
        let jobs = vec![
            Job::new("J1", "WP-1", "ENG-1", 2.0)
                .with_requirement(ResourceRequirement::new("JACK").with_quantity(2)),
            Job::new("J2", "WP-1", "ENG-1", 2.0)
                .with_requirement(ResourceRequirement::new("JACK")),
        ];
        let pool = Resource::physical("JACK", PhysicalProfile::default()).with_quantity(4);
        let model = builder()
            .build(&jobs, &[mechanic("EMP-1", &[]), pool], &[])
            .unwrap();
        assert!(model
            .constraint_names()
            .iter()
            .any(|n| n == "cumulative_JACK"));
    }

    // ── Windows ───────────────────────────────────────────────────────

    #[test]
    fn earliest_start_before_plan_start_clamps_to_zero() {
        let before_plan = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let jobs = vec![Job::new("J1", "WP-1", "ENG-1", 2.0).with_window(Some(before_plan), None)];
        let model = builder()
            .build(&jobs, &[mechanic("EMP-1", &[])], &[])
            .unwrap();
        assert_eq!(model.interval(model.interval_index("J1").unwrap()).start_min, 0);
    }

    #[test]
    fn latest_finish_tightens_end() {
        let latest = Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap();
        let jobs = vec![Job::new("J1", "WP-1", "ENG-1", 2.0).with_window(None, Some(latest))];
        let model = builder()
            .build(&jobs, &[mechanic("EMP-1", &[])], &[])
            .unwrap();
        assert_eq!(model.interval(model.interval_index("J1").unwrap()).end_max, 360);
    }

    // ── Qualifications ────────────────────────────────────────────────

    #[test]
    fn missing_qualification_fails_before_search() {
        let jobs = vec![Job::new("J1", "WP-1", "ENG-1", 2.0).with_qualifications(["welder"])];
        let err = builder()
            .build(&jobs, &[mechanic("EMP-1", &["rigger"])], &[])
            .unwrap_err();
        assert_eq!(err.code(), "CONSTRAINT_VIOLATION");
        assert!(err.to_string().contains("welder"));
        assert!(err.to_string().contains("J1"));
        let obj = err.to_error_object();
        assert_eq!(obj["details"]["violated_constraints"][0], "qualification");
    }

    #[test]
    fn qualification_constraint_selects_qualified_humans() {
        let jobs = vec![Job::new("J1", "WP-1", "ENG-1", 2.0).with_qualifications(["welder"])];
        let model = builder()
            .build(
                &jobs,
                &[mechanic("EMP-1", &["welder"]), mechanic("EMP-2", &[])],
                &[],
            )
            .unwrap();
        assert!(model
            .constraint_names()
            .iter()
            .any(|n| n == "qualification_J1_welder"));
    }

    // ── Task execution ────────────────────────────────────────────────

    #[test]
    fn bare_job_still_gets_execution_constraint() {
        // Zero requirements and zero qualifications: the job must still be
        // staffed rather than silently dropped.
        let jobs = vec![Job::new("J1", "WP-1", "ENG-1", 2.0)];
        let model = builder()
            .build(&jobs, &[mechanic("EMP-1", &[])], &[])
            .unwrap();
        assert!(model
            .constraint_names()
            .iter()
            .any(|n| n == "task_execution_J1"));
    }

    #[test]
    fn no_humans_at_all_fails() {
        let jobs = vec![Job::new("J1", "WP-1", "ENG-1", 2.0)];
        let err = builder().build(&jobs, &[crane("CRANE-1")], &[]).unwrap_err();
        assert_eq!(err.code(), "CONSTRAINT_VIOLATION");
    }

    // ── Gates ─────────────────────────────────────────────────────────

    #[test]
    fn gate_prep_precedes_package_entry_jobs() {
        let jobs = vec![
            Job::new("J1", "WP-1", "ENG-1", 2.0),
            Job::new("J2", "WP-1", "ENG-1", 2.0).with_predecessors(vec!["J1".into()]),
        ];
        let preps = vec![PreparationTask::new(
            "PREP-1",
            "ENG-1",
            "WP-1",
            PrepTaskType::MaterialKitting,
            1.0,
        )
        .gated(["materials_ready"])];

        let model = builder()
            .build(&jobs, &[mechanic("EMP-1", &[])], &preps)
            .unwrap();

        let prep = model.interval_index("PREP-1").unwrap();
        let j1 = model.interval_index("J1").unwrap();
        let j2 = model.interval_index("J2").unwrap();
        let edges = model.precedence_edges();
        assert!(edges.contains(&(prep, j1)));
        // J2 is not an entry job; it inherits the gate through J1.
        assert!(!edges.contains(&(prep, j2)));
    }
}
