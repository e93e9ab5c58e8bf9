//! Weighted multi-objective synthesis.
//!
//! The builder turns a weight vector into an [`ObjectiveSpec`]: a list of
//! active terms with integer-scaled weights plus the lookup tables the
//! evaluator needs. Weights are scaled by `round(w × 1000)` so the whole
//! objective stays integer-valued.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::config::PriorityTemplate;
use crate::domain::job::Job;
use crate::domain::preparation::PreparationTask;
use crate::domain::resource::Resource;
use crate::error::PlanningError;
use crate::solver::model::{CpModel, CpSolution};
use crate::Id;

/// Weight vector over the recognized objective terms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveWeights {
    pub makespan: f64,
    pub cost: f64,
    pub utilization: f64,
    pub waiting: f64,
    pub switches: f64,
    pub delays: f64,
    pub preference: f64,
}

impl Default for ObjectiveWeights {
    fn default() -> Self {
        Self::from_template(PriorityTemplate::Balanced)
    }
}

impl ObjectiveWeights {
    pub fn from_template(template: PriorityTemplate) -> Self {
        match template {
            PriorityTemplate::Balanced => Self {
                makespan: 1.0,
                cost: 0.3,
                utilization: 0.2,
                waiting: 0.4,
                switches: 0.2,
                delays: 0.6,
                preference: 0.1,
            },
            PriorityTemplate::ProtectSla => Self {
                makespan: 2.0,
                cost: 0.1,
                utilization: 0.1,
                waiting: 0.2,
                switches: 0.1,
                delays: 1.0,
                preference: 0.05,
            },
            PriorityTemplate::CostMin => Self {
                makespan: 0.5,
                cost: 1.0,
                utilization: 0.3,
                waiting: 0.1,
                switches: 0.5,
                delays: 0.3,
                preference: 0.1,
            },
        }
    }

    /// Applies selective overrides; unknown term names are rejected.
    pub fn apply_overrides(
        &mut self,
        overrides: &BTreeMap<String, f64>,
    ) -> Result<(), PlanningError> {
        for (term, value) in overrides {
            let slot = match term.as_str() {
                "makespan" => &mut self.makespan,
                "cost" => &mut self.cost,
                "utilization" => &mut self.utilization,
                "waiting" => &mut self.waiting,
                "switches" => &mut self.switches,
                "delays" => &mut self.delays,
                "preference" => &mut self.preference,
                other => {
                    return Err(PlanningError::configuration(format!(
                        "unknown objective term {other:?}"
                    )))
                }
            };
            *slot = *value;
        }
        Ok(())
    }

    fn scaled(weight: f64) -> i64 {
        (weight * 1000.0).round() as i64
    }
}

/// A term activated by a positive weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermKind {
    Makespan,
    Cost,
    Waiting,
    Switches,
    Delays,
}

#[derive(Debug, Clone, PartialEq)]
struct WeightedTerm {
    kind: TermKind,
    weight_scaled: i64,
}

/// The evaluable objective: active terms plus their lookup tables.
///
/// `utilization` and `preference` are declared contracts with no evaluator
/// yet; they contribute nothing even when weighted.
#[derive(Debug, Clone, Default)]
pub struct ObjectiveSpec {
    terms: Vec<WeightedTerm>,
    /// Cents per hour for each literal's resource, by literal index.
    cost_cents: HashMap<usize, i64>,
    /// Latest-finish bound in minutes for intervals that declared one.
    latest_finish_min: HashMap<usize, i64>,
    /// Area label per interval index, for the switches term.
    area_by_interval: Vec<String>,
}

impl ObjectiveSpec {
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn active_terms(&self) -> Vec<TermKind> {
        self.terms.iter().map(|t| t.kind).collect()
    }

    /// Evaluates the weighted objective for a candidate solution.
    pub fn evaluate(&self, model: &CpModel, solution: &CpSolution) -> i64 {
        self.terms
            .iter()
            .map(|term| {
                let value = match term.kind {
                    TermKind::Makespan => self.eval_makespan(solution),
                    TermKind::Cost => self.eval_cost(solution),
                    TermKind::Waiting => self.eval_waiting(model, solution),
                    TermKind::Switches => self.eval_switches(model, solution),
                    TermKind::Delays => self.eval_delays(solution),
                };
                term.weight_scaled * value
            })
            .sum()
    }

    fn eval_makespan(&self, solution: &CpSolution) -> i64 {
        (0..solution.starts.len())
            .map(|i| solution.end(i))
            .max()
            .unwrap_or(0)
    }

    fn eval_cost(&self, solution: &CpSolution) -> i64 {
        self.cost_cents
            .iter()
            .filter(|(lit, _)| solution.literal_values[**lit])
            .map(|(_, cents)| cents)
            .sum()
    }

    fn eval_waiting(&self, model: &CpModel, solution: &CpSolution) -> i64 {
        model
            .precedence_edges()
            .into_iter()
            .map(|(before, after)| (solution.starts[after] - solution.end(before)).max(0))
            .sum()
    }

    fn eval_switches(&self, model: &CpModel, solution: &CpSolution) -> i64 {
        let mut penalty = 0;
        let mut areas_by_resource: HashMap<&str, Vec<&str>> = HashMap::new();
        for (index, literal) in model.literals().iter().enumerate() {
            if !solution.literal_values[index] {
                continue;
            }
            if let Some(interval) = model.interval_index(&literal.task_id) {
                let area = self.area_by_interval[interval].as_str();
                let areas = areas_by_resource
                    .entry(literal.resource_id.as_str())
                    .or_default();
                if !areas.contains(&area) {
                    areas.push(area);
                }
            }
        }
        for areas in areas_by_resource.values() {
            // 100 per area beyond the first.
            penalty += 100 * (areas.len() as i64 - 1).max(0);
        }
        penalty
    }

    fn eval_delays(&self, solution: &CpSolution) -> i64 {
        self.latest_finish_min
            .iter()
            .map(|(interval, latest)| 1000 * (solution.end(*interval) - latest).max(0))
            .sum()
    }
}

/// Builds an [`ObjectiveSpec`] from entities and the weight vector.
pub struct ObjectiveBuilder {
    weights: ObjectiveWeights,
}

impl ObjectiveBuilder {
    pub fn new(weights: ObjectiveWeights) -> Self {
        Self { weights }
    }

    /// # Errors
    ///
    /// `Configuration` when no term ends up active.
    pub fn build(
        &self,
        jobs: &[Job],
        resources: &[Resource],
        preparation_tasks: &[PreparationTask],
        model: &CpModel,
        plan_start: chrono::DateTime<chrono::Utc>,
    ) -> Result<ObjectiveSpec, PlanningError> {
        let mut spec = ObjectiveSpec {
            area_by_interval: vec!["default".to_owned(); model.interval_count()],
            ..Default::default()
        };

        let mut area_by_task: HashMap<Id, String> = HashMap::new();
        for job in jobs {
            area_by_task.insert(job.job_id.clone(), job.area());
        }
        for task in preparation_tasks {
            area_by_task.insert(
                task.prep_id.clone(),
                task.area.clone().unwrap_or_else(|| "default".to_owned()),
            );
        }
        for (task_id, area) in &area_by_task {
            if let Some(index) = model.interval_index(task_id) {
                spec.area_by_interval[index] = area.clone();
            }
        }

        if self.weights.makespan > 0.0 && model.interval_count() > 0 {
            spec.terms.push(WeightedTerm {
                kind: TermKind::Makespan,
                weight_scaled: ObjectiveWeights::scaled(self.weights.makespan),
            });
        }

        if self.weights.cost > 0.0 {
            let cost_by_resource: HashMap<&str, i64> = resources
                .iter()
                .filter_map(|r| {
                    r.hourly_cost
                        .map(|cost| (r.resource_id.as_str(), (cost * 100.0).round() as i64))
                })
                .collect();
            for (index, literal) in model.literals().iter().enumerate() {
                let Some(&cents) = cost_by_resource.get(literal.resource_id.as_str()) else {
                    continue;
                };
                let Some(interval) = model.interval_index(&literal.task_id) else {
                    continue;
                };
                let duration = model.interval(interval).duration_min;
                spec.cost_cents
                    .insert(index, duration * cents / 60);
            }
            if !spec.cost_cents.is_empty() {
                spec.terms.push(WeightedTerm {
                    kind: TermKind::Cost,
                    weight_scaled: ObjectiveWeights::scaled(self.weights.cost),
                });
            }
        }

        if self.weights.waiting > 0.0 && !model.precedence_edges().is_empty() {
            spec.terms.push(WeightedTerm {
                kind: TermKind::Waiting,
                weight_scaled: ObjectiveWeights::scaled(self.weights.waiting),
            });
        }

        if self.weights.switches > 0.0 && model.literal_count() > 0 {
            spec.terms.push(WeightedTerm {
                kind: TermKind::Switches,
                weight_scaled: ObjectiveWeights::scaled(self.weights.switches),
            });
        }

        if self.weights.delays > 0.0 {
            for job in jobs {
                if let (Some(latest), Some(index)) =
                    (job.latest_finish, model.interval_index(&job.job_id))
                {
                    spec.latest_finish_min
                        .insert(index, crate::time_util::minutes_from(plan_start, latest));
                }
            }
            for task in preparation_tasks {
                if let (Some(latest), Some(index)) =
                    (task.latest_finish, model.interval_index(&task.prep_id))
                {
                    spec.latest_finish_min
                        .insert(index, crate::time_util::minutes_from(plan_start, latest));
                }
            }
            if !spec.latest_finish_min.is_empty() {
                spec.terms.push(WeightedTerm {
                    kind: TermKind::Delays,
                    weight_scaled: ObjectiveWeights::scaled(self.weights.delays),
                });
            }
        }

        if spec.is_empty() {
            return Err(PlanningError::configuration("No valid objective terms"));
        }

        Ok(spec)
    }
}
