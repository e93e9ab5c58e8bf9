//! Lifts raw variable values into a typed [`Schedule`].

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain::graph::TaskGraph;
use crate::domain::job::Job;
use crate::domain::preparation::PreparationTask;
use crate::domain::resource::Resource;
use crate::domain::schedule::{
    AllocationStatus, IntervalType, ResourceAllocation, Schedule, ScheduleMetrics, TaskInterval,
};
use crate::error::PlanningError;
use crate::solver::model::{CpModel, CpSolution};
use crate::time_util::minutes_to_datetime;
use crate::Id;

/// Identity and configuration echoed into the parsed schedule.
#[derive(Debug, Clone)]
pub struct SolutionContext {
    pub plan_id: Id,
    pub plan_name: Option<String>,
    pub plan_start_time: DateTime<Utc>,
    pub solver_config: Value,
    pub is_optimal: bool,
}

/// Converts solver output into the domain schedule.
pub struct SolutionParser;

impl SolutionParser {
    /// Parses intervals, allocations, metrics, and the critical path.
    pub fn parse(
        solution: &CpSolution,
        model: &CpModel,
        jobs: &[Job],
        resources: &[Resource],
        preparation_tasks: &[PreparationTask],
        ctx: &SolutionContext,
    ) -> Result<Schedule, PlanningError> {
        let plan_start = ctx.plan_start_time;

        let mut task_intervals =
            Self::parse_task_intervals(solution, model, jobs, resources, preparation_tasks, plan_start);
        let resource_allocations = Self::parse_resource_allocations(
            solution,
            model,
            jobs,
            resources,
            preparation_tasks,
            plan_start,
        );

        let plan_end_time = task_intervals
            .iter()
            .map(|i| i.end_time)
            .max()
            // Sentinel end for an empty result.
            .unwrap_or(plan_start + chrono::Duration::hours(1));

        let metrics = Self::calculate_metrics(
            &task_intervals,
            &resource_allocations,
            resources,
            plan_start,
            plan_end_time,
        );

        let critical_path =
            Self::extract_critical_path(&task_intervals, jobs, preparation_tasks);
        for interval in &mut task_intervals {
            interval.is_critical_path = critical_path.contains(&interval.task_id);
        }

        let schedule = Schedule {
            plan_id: ctx.plan_id.clone(),
            name: ctx.plan_name.clone(),
            plan_start_time: plan_start,
            plan_end_time,
            task_intervals,
            resource_allocations,
            gates: Vec::new(),
            metrics,
            critical_path,
            is_feasible: true,
            is_optimal: ctx.is_optimal,
            solver_config: ctx.solver_config.clone(),
            metadata: BTreeMap::new(),
        };
        schedule.validate()?;
        Ok(schedule)
    }

    fn parse_task_intervals(
        solution: &CpSolution,
        model: &CpModel,
        jobs: &[Job],
        resources: &[Resource],
        preparation_tasks: &[PreparationTask],
        plan_start: DateTime<Utc>,
    ) -> Vec<TaskInterval> {
        let human_ids: std::collections::HashSet<&str> = resources
            .iter()
            .filter(|r| r.is_human())
            .map(|r| r.resource_id.as_str())
            .collect();

        // Per task: (all assigned resources, human assignees).
        let mut assigned: HashMap<&str, (Vec<Id>, Vec<Id>)> = HashMap::new();
        for (index, literal) in model.literals().iter().enumerate() {
            if !solution.literal_values[index] {
                continue;
            }
            let entry = assigned.entry(literal.task_id.as_str()).or_default();
            entry.0.push(literal.resource_id.clone());
            if human_ids.contains(literal.resource_id.as_str()) {
                entry.1.push(literal.resource_id.clone());
            }
        }
        let mut intervals = Vec::new();

        for job in jobs {
            let Some(index) = model.interval_index(&job.job_id) else {
                continue;
            };
            let start_minutes = solution.starts[index];
            let duration_minutes = solution.durations[index];
            let (resources_for_task, personnel) = assigned
                .get(job.job_id.as_str())
                .cloned()
                .unwrap_or_default();
            intervals.push(TaskInterval {
                task_id: job.job_id.clone(),
                task_type: IntervalType::Job,
                start_time: minutes_to_datetime(plan_start, start_minutes),
                end_time: minutes_to_datetime(plan_start, start_minutes + duration_minutes),
                duration_hours: duration_minutes as f64 / 60.0,
                task_name: Some(job.name.clone()),
                work_package_id: Some(job.work_card_id.clone()),
                engine_id: Some(job.engine_id.clone()),
                status: job.status,
                assigned_resources: resources_for_task,
                assigned_personnel: personnel,
                is_critical_path: false,
                is_fixed: job.fixed_start.is_some(),
                buffer_before_hours: 0.0,
                buffer_after_hours: 0.0,
                metadata: job.metadata.clone(),
            });
        }

        for task in preparation_tasks {
            let Some(index) = model.interval_index(&task.prep_id) else {
                continue;
            };
            let start_minutes = solution.starts[index];
            let duration_minutes = solution.durations[index];
            let (resources_for_task, personnel) = assigned
                .get(task.prep_id.as_str())
                .cloned()
                .unwrap_or_default();
            intervals.push(TaskInterval {
                task_id: task.prep_id.clone(),
                task_type: IntervalType::Preparation,
                start_time: minutes_to_datetime(plan_start, start_minutes),
                end_time: minutes_to_datetime(plan_start, start_minutes + duration_minutes),
                duration_hours: duration_minutes as f64 / 60.0,
                task_name: Some(task.name.clone()),
                work_package_id: Some(task.work_package_id.clone()),
                engine_id: Some(task.engine_id.clone()),
                status: task.status,
                assigned_resources: resources_for_task,
                assigned_personnel: personnel,
                is_critical_path: false,
                is_fixed: false,
                buffer_before_hours: 0.0,
                buffer_after_hours: 0.0,
                metadata: BTreeMap::new(),
            });
        }

        intervals
    }

    fn parse_resource_allocations(
        solution: &CpSolution,
        model: &CpModel,
        jobs: &[Job],
        resources: &[Resource],
        preparation_tasks: &[PreparationTask],
        plan_start: DateTime<Utc>,
    ) -> Vec<ResourceAllocation> {
        let resource_by_id: HashMap<&str, &Resource> = resources
            .iter()
            .map(|r| (r.resource_id.as_str(), r))
            .collect();

        let mut allocations = Vec::new();
        for (index, literal) in model.literals().iter().enumerate() {
            if !solution.literal_values[index] {
                continue;
            }
            let Some(interval) = model.interval_index(&literal.task_id) else {
                continue;
            };
            let resource = resource_by_id.get(literal.resource_id.as_str());

            let start_minutes = solution.starts[interval];
            let end_minutes = solution.end(interval);
            let duration_hours = (end_minutes - start_minutes) as f64 / 60.0;

            let quantity = jobs
                .iter()
                .find(|j| j.job_id == literal.task_id)
                .and_then(|j| j.requirement_for(&literal.resource_id))
                .map(|req| req.quantity)
                .or_else(|| {
                    preparation_tasks
                        .iter()
                        .find(|t| t.prep_id == literal.task_id)
                        .and_then(|t| {
                            t.required_assets
                                .iter()
                                .find(|req| req.asset_id == literal.resource_id)
                                .map(|req| req.quantity)
                        })
                })
                .unwrap_or(1);

            let cost = resource
                .and_then(|r| r.hourly_cost)
                .map(|hourly| hourly * duration_hours * quantity as f64);

            allocations.push(ResourceAllocation {
                allocation_id: crate::generate_id(),
                resource_id: literal.resource_id.clone(),
                resource_name: resource.map(|r| r.name.clone()),
                allocated_to: literal.task_id.clone(),
                start_time: minutes_to_datetime(plan_start, start_minutes),
                end_time: minutes_to_datetime(plan_start, end_minutes),
                quantity,
                cost,
                status: AllocationStatus::Planned,
            });
        }
        allocations
    }

    fn calculate_metrics(
        task_intervals: &[TaskInterval],
        allocations: &[ResourceAllocation],
        resources: &[Resource],
        plan_start: DateTime<Utc>,
        plan_end: DateTime<Utc>,
    ) -> ScheduleMetrics {
        if task_intervals.is_empty() {
            return ScheduleMetrics::default();
        }

        let earliest = task_intervals
            .iter()
            .map(|i| i.start_time)
            .min()
            .unwrap_or(plan_start);
        let latest = task_intervals
            .iter()
            .map(|i| i.end_time)
            .max()
            .unwrap_or(plan_end);
        let makespan_hours = (latest - earliest).num_seconds() as f64 / 3600.0;
        let total_duration_hours = task_intervals.iter().map(|i| i.duration_hours).sum();

        let mut allocated_hours: HashMap<&str, f64> = HashMap::new();
        for allocation in allocations {
            *allocated_hours
                .entry(allocation.resource_id.as_str())
                .or_default() += allocation.duration_hours();
        }

        let mut resource_utilization = BTreeMap::new();
        for resource in resources {
            let allocated = allocated_hours
                .get(resource.resource_id.as_str())
                .copied()
                .unwrap_or(0.0);
            let available = Self::available_hours(resource, plan_start, plan_end);
            let utilization = if available > 0.0 {
                (allocated / available).min(1.0)
            } else {
                0.0
            };
            resource_utilization.insert(resource.resource_id.clone(), utilization);
        }

        let average_utilization = if resource_utilization.is_empty() {
            0.0
        } else {
            resource_utilization.values().sum::<f64>() / resource_utilization.len() as f64
        };

        let total_cost = allocations.iter().filter_map(|a| a.cost).sum();

        ScheduleMetrics {
            makespan_hours,
            total_duration_hours,
            resource_utilization,
            average_utilization,
            total_cost,
            scheduled_task_count: task_intervals.len(),
        }
    }

    /// Calendar resources approximate availability as eight hours per
    /// business day; others use the wall-clock span.
    fn available_hours(resource: &Resource, start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
        match &resource.calendar {
            Some(_) => {
                let days = ((end - start).num_days().max(0) + 1) as f64;
                let business_days = days * 5.0 / 7.0;
                business_days.max(1.0) * 8.0
            }
            None => (end - start).num_seconds().max(0) as f64 / 3600.0,
        }
    }

    /// Longest path through the combined precedence DAG weighted by the
    /// realized interval durations. Falls back to the five latest-ending
    /// tasks when the graph cannot be rebuilt.
    fn extract_critical_path(
        task_intervals: &[TaskInterval],
        jobs: &[Job],
        preparation_tasks: &[PreparationTask],
    ) -> Vec<Id> {
        if task_intervals.is_empty() {
            return Vec::new();
        }

        match TaskGraph::from_entities(jobs, preparation_tasks) {
            Ok(mut graph) => {
                for interval in task_intervals {
                    graph.set_duration(&interval.task_id, interval.duration_hours);
                }
                match graph.critical_path() {
                    Ok((_, path)) if !path.is_empty() => path,
                    _ => Self::latest_ending_tasks(task_intervals),
                }
            }
            Err(_) => Self::latest_ending_tasks(task_intervals),
        }
    }

    fn latest_ending_tasks(task_intervals: &[TaskInterval]) -> Vec<Id> {
        let mut by_end: Vec<&TaskInterval> = task_intervals.iter().collect();
        by_end.sort_by_key(|i| std::cmp::Reverse(i.end_time));
        by_end.iter().take(5).map(|i| i.task_id.clone()).collect()
    }
}
