//! Solver lifecycle: owns the CP model and runs the search under limits.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::SolverSettings;
use crate::domain::job::Job;
use crate::domain::preparation::PreparationTask;
use crate::domain::resource::Resource;
use crate::error::PlanningError;
use crate::solver::builder::{BuildConfig, ConstraintBuilder};
use crate::solver::model::{CpModel, CpSolution};
use crate::solver::objective::{ObjectiveBuilder, ObjectiveSpec, ObjectiveWeights};
use crate::solver::search;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverStatus {
    Optimal,
    Feasible,
    Infeasible,
    Unbounded,
    Abnormal,
    ModelInvalid,
    Unknown,
}

impl SolverStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Optimal | Self::Feasible)
    }
}

/// Search effort counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SolverStatistics {
    pub restarts: u64,
    pub candidates_examined: u64,
    pub wall_time_ms: u64,
}

/// Outcome of one [`CpSolver::solve`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverResult {
    pub status: SolverStatus,
    pub objective_value: Option<i64>,
    pub solve_time_seconds: f64,
    pub solution: Option<CpSolution>,
    pub statistics: SolverStatistics,
    pub error_message: Option<String>,
}

/// Owns the CP model, entities, and configuration for one request.
///
/// Lifecycle: `initialize → add_jobs/add_resources/add_preparation_tasks →
/// add_constraints → set_objective → solve → clear`. After `clear` the
/// driver may be reused; every variable handle is dropped with the model.
#[derive(Debug, Default)]
pub struct CpSolver {
    settings: SolverSettings,
    build_config: Option<BuildConfig>,
    initialized: bool,
    jobs: Vec<Job>,
    resources: Vec<Resource>,
    preparation_tasks: Vec<PreparationTask>,
    model: Option<CpModel>,
    objective: Option<ObjectiveSpec>,
    last_result: Option<SolverResult>,
}

impl CpSolver {
    pub fn new(settings: SolverSettings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    /// Prepares the driver for a fresh model.
    pub fn initialize(&mut self, build_config: BuildConfig) -> Result<(), PlanningError> {
        self.settings.validate()?;
        self.build_config = Some(build_config);
        self.initialized = true;
        Ok(())
    }

    pub fn add_jobs(&mut self, jobs: Vec<Job>) -> Result<(), PlanningError> {
        self.ensure_initialized()?;
        self.jobs.extend(jobs);
        Ok(())
    }

    pub fn add_resources(&mut self, resources: Vec<Resource>) -> Result<(), PlanningError> {
        self.ensure_initialized()?;
        self.resources.extend(resources);
        Ok(())
    }

    pub fn add_preparation_tasks(
        &mut self,
        tasks: Vec<PreparationTask>,
    ) -> Result<(), PlanningError> {
        self.ensure_initialized()?;
        self.preparation_tasks.extend(tasks);
        Ok(())
    }

    /// Runs the constraint builder over the staged entities.
    pub fn add_constraints(&mut self) -> Result<(), PlanningError> {
        self.ensure_initialized()?;
        self.validate_input()?;
        let build_config = self
            .build_config
            .ok_or_else(|| PlanningError::solver("solver not initialized"))?;
        let model = ConstraintBuilder::new(build_config).build(
            &self.jobs,
            &self.resources,
            &self.preparation_tasks,
        )?;
        self.model = Some(model);
        Ok(())
    }

    /// Synthesizes the weighted objective over the built model.
    pub fn set_objective(&mut self, weights: ObjectiveWeights) -> Result<(), PlanningError> {
        self.ensure_initialized()?;
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| PlanningError::solver("constraints must be added before objective"))?;
        let build_config = self
            .build_config
            .ok_or_else(|| PlanningError::solver("solver not initialized"))?;
        let spec = ObjectiveBuilder::new(weights).build(
            &self.jobs,
            &self.resources,
            &self.preparation_tasks,
            model,
            build_config.plan_start_time,
        )?;
        self.objective = Some(spec);
        Ok(())
    }

    /// Runs the search under the configured time limit.
    pub fn solve(&mut self) -> Result<SolverResult, PlanningError> {
        self.ensure_initialized()?;
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| PlanningError::solver("constraints must be added before solving"))?;
        let objective = self
            .objective
            .as_ref()
            .ok_or_else(|| PlanningError::solver("objective must be set before solving"))?;

        let started = Instant::now();
        let outcome = search::run(model, objective, &self.settings);
        let solve_time_seconds = started.elapsed().as_secs_f64();

        let result = match outcome {
            Ok((Some(solution), stats)) => {
                info!(
                    objective = solution.objective_value,
                    restarts = stats.restarts,
                    "search found a feasible schedule"
                );
                SolverResult {
                    status: SolverStatus::Feasible,
                    objective_value: Some(solution.objective_value),
                    solve_time_seconds,
                    solution: Some(solution),
                    statistics: SolverStatistics {
                        restarts: stats.restarts,
                        candidates_examined: stats.candidates_examined,
                        wall_time_ms: (solve_time_seconds * 1000.0) as u64,
                    },
                    error_message: None,
                }
            }
            Ok((None, stats)) => {
                warn!("search exhausted restarts without a feasible placement");
                SolverResult {
                    status: SolverStatus::Infeasible,
                    objective_value: None,
                    solve_time_seconds,
                    solution: None,
                    statistics: SolverStatistics {
                        restarts: stats.restarts,
                        candidates_examined: stats.candidates_examined,
                        wall_time_ms: (solve_time_seconds * 1000.0) as u64,
                    },
                    error_message: Some("no feasible placement found".into()),
                }
            }
            Err(e) => SolverResult {
                status: SolverStatus::Abnormal,
                objective_value: None,
                solve_time_seconds,
                solution: None,
                statistics: SolverStatistics::default(),
                error_message: Some(e.to_string()),
            },
        };

        self.last_result = Some(result.clone());
        Ok(result)
    }

    /// Parses the last successful solve into a typed schedule.
    ///
    /// # Errors
    ///
    /// `Solver` when called before a successful `solve`.
    pub fn get_schedule(
        &self,
        ctx: &crate::solver::solution::SolutionContext,
    ) -> Result<crate::domain::schedule::Schedule, PlanningError> {
        let result = self
            .last_result
            .as_ref()
            .ok_or_else(|| PlanningError::solver("no solve result available"))?;
        let solution = result
            .solution
            .as_ref()
            .ok_or_else(|| PlanningError::solver("last solve produced no solution"))?;
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| PlanningError::solver("model released before parsing"))?;
        crate::solver::solution::SolutionParser::parse(
            solution,
            model,
            &self.jobs,
            &self.resources,
            &self.preparation_tasks,
            ctx,
        )
    }

    pub fn model(&self) -> Option<&CpModel> {
        self.model.as_ref()
    }

    pub fn last_result(&self) -> Option<&SolverResult> {
        self.last_result.as_ref()
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn resources(&self) -> &[Resource] {
        &self.resources
    }

    pub fn preparation_tasks(&self) -> &[PreparationTask] {
        &self.preparation_tasks
    }

    pub fn settings(&self) -> &SolverSettings {
        &self.settings
    }

    pub fn plan_start_time(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.build_config.map(|c| c.plan_start_time)
    }

    /// Releases the model and every staged entity. The driver may be
    /// re-initialized afterwards.
    pub fn clear(&mut self) {
        self.model = None;
        self.objective = None;
        self.jobs.clear();
        self.resources.clear();
        self.preparation_tasks.clear();
        self.build_config = None;
        self.initialized = false;
        self.last_result = None;
    }

    fn ensure_initialized(&self) -> Result<(), PlanningError> {
        if !self.initialized {
            return Err(PlanningError::solver("solver not initialized"));
        }
        Ok(())
    }

    fn validate_input(&self) -> Result<(), PlanningError> {
        if self.jobs.is_empty() && self.preparation_tasks.is_empty() {
            return Err(PlanningError::solver("no tasks to schedule"));
        }
        if self.resources.is_empty() {
            return Err(PlanningError::solver("no resources available"));
        }
        Ok(())
    }
}
