//! Seeded multi-restart constructive search over a [`CpModel`].
//!
//! The search interprets the model's structured constraint vocabulary and
//! never reads domain entities. Each restart makes assignment decisions,
//! places intervals in precedence order at their earliest feasible start,
//! and scores the candidate against the objective. The best candidate
//! across restarts wins; an ordering that admits no placement is reported
//! as infeasible only when every restart fails.

use std::collections::HashMap;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::config::SolverSettings;
use crate::error::PlanningError;
use crate::solver::model::{CpConstraint, CpModel, CpSolution};
use crate::solver::objective::ObjectiveSpec;

const DEFAULT_MAX_RESTARTS: u64 = 8;
const DEFAULT_SEED: u64 = 0x5EED;

/// Outcome counters reported through solver statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchStats {
    pub restarts: u64,
    pub candidates_examined: u64,
}

/// Runs the search. Returns the best solution found, or `None` when no
/// restart produced a feasible placement.
pub fn run(
    model: &CpModel,
    objective: &ObjectiveSpec,
    settings: &SolverSettings,
) -> Result<(Option<CpSolution>, SearchStats), PlanningError> {
    let started = Instant::now();
    // Extra workers widen the restart budget; the search itself runs on
    // one thread.
    let max_restarts = settings
        .optimization_parameters
        .get("max_restarts")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(DEFAULT_MAX_RESTARTS * settings.num_search_workers as u64)
        .max(1);
    let mut rng = StdRng::seed_from_u64(settings.random_seed.unwrap_or(DEFAULT_SEED));

    let ctx = SearchContext::prepare(model)?;

    let mut best: Option<CpSolution> = None;
    let mut stats = SearchStats::default();

    for restart in 0..max_restarts {
        if started.elapsed().as_secs_f64() >= settings.time_limit_seconds && restart > 0 {
            break;
        }
        stats.restarts = restart + 1;

        let shuffle = restart > 0;
        let literal_values = decide_literals(model, &ctx, shuffle, &mut rng);
        let order = ctx.placement_order(model, shuffle, &mut rng);

        if let Some(candidate) = place(model, &ctx, &order, literal_values) {
            stats.candidates_examined += 1;
            let objective_value = objective.evaluate(model, &candidate);
            let candidate = CpSolution {
                objective_value,
                ..candidate
            };
            if settings.log_search_progress {
                debug!(restart, objective_value, "search candidate");
            }
            let improved = best
                .as_ref()
                .map(|b| objective_value < b.objective_value)
                .unwrap_or(true);
            if improved {
                best = Some(candidate);
            }
        }
    }

    Ok((best, stats))
}

/// Precomputed structural views of the model.
struct SearchContext {
    /// Predecessors per interval, from precedence constraints.
    preds: Vec<Vec<usize>>,
    /// Successors per interval.
    succs: Vec<Vec<usize>>,
    /// No-overlap group ids each interval participates in.
    overlap_groups: Vec<(usize, Vec<(usize, usize)>)>,
    /// Cumulative group capacity and (interval, literal, quantity) members.
    cumulative_groups: Vec<(i64, Vec<(usize, usize, i64)>)>,
}

impl SearchContext {
    fn prepare(model: &CpModel) -> Result<Self, PlanningError> {
        let n = model.interval_count();
        let mut preds = vec![Vec::new(); n];
        let mut succs = vec![Vec::new(); n];
        let mut overlap_groups = Vec::new();
        let mut cumulative_groups = Vec::new();

        for constraint in model.constraints() {
            match constraint {
                CpConstraint::Precedence { before, after } => {
                    preds[*after].push(*before);
                    succs[*before].push(*after);
                }
                CpConstraint::NoOverlap { members, .. } => {
                    let id = overlap_groups.len();
                    overlap_groups.push((
                        id,
                        members.iter().map(|m| (m.interval, m.literal)).collect(),
                    ));
                }
                CpConstraint::Cumulative {
                    capacity, demands, ..
                } => {
                    cumulative_groups.push((
                        *capacity,
                        demands
                            .iter()
                            .map(|d| (d.interval, d.literal, d.quantity))
                            .collect(),
                    ));
                }
                CpConstraint::AtLeastOne { .. } => {}
            }
        }

        Ok(Self {
            preds,
            succs,
            overlap_groups,
            cumulative_groups,
        })
    }

    /// Kahn ordering over the precedence graph. Ready tasks are taken in
    /// `(start_min, task_id)` order; restarts shuffle ties.
    fn placement_order(&self, model: &CpModel, shuffle: bool, rng: &mut StdRng) -> Vec<usize> {
        let n = model.interval_count();
        let mut indegree: Vec<usize> = (0..n).map(|i| self.preds[i].len()).collect();
        let mut ready: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while !ready.is_empty() {
            ready.sort_by(|&a, &b| {
                let va = model.interval(a);
                let vb = model.interval(b);
                (va.start_min, &va.task_id).cmp(&(vb.start_min, &vb.task_id))
            });
            // Restarts perturb the ordering by picking among the front of
            // the ready list instead of always taking the head.
            let pick = if shuffle && ready.len() > 1 {
                rng.gen_range(0..ready.len().min(3))
            } else {
                0
            };
            let next = ready.remove(pick);
            order.push(next);
            for &succ in &self.succs[next] {
                indegree[succ] -= 1;
                if indegree[succ] == 0 {
                    ready.push(succ);
                }
            }
        }

        order
    }
}

/// Decides every assignment literal: pinned literals hold, then each
/// at-least-one group gets its least-loaded member.
fn decide_literals(
    model: &CpModel,
    _ctx: &SearchContext,
    shuffle: bool,
    rng: &mut StdRng,
) -> Vec<bool> {
    let mut values = vec![false; model.literal_count()];
    for (index, literal) in model.literals().iter().enumerate() {
        if literal.pinned {
            values[index] = true;
        }
    }

    // Minutes of work already handed to each resource this restart.
    let mut load: HashMap<&str, i64> = HashMap::new();
    for (index, literal) in model.literals().iter().enumerate() {
        if values[index] {
            if let Some(interval) = model.interval_index(&literal.task_id) {
                *load.entry(literal.resource_id.as_str()).or_default() +=
                    model.interval(interval).duration_min;
            }
        }
    }

    for constraint in model.constraints() {
        let CpConstraint::AtLeastOne { literals, .. } = constraint else {
            continue;
        };
        if literals.iter().any(|&l| values[l]) {
            continue;
        }
        let mut candidates: Vec<usize> = literals.clone();
        if shuffle {
            candidates.shuffle(rng);
        }
        let chosen = candidates.into_iter().min_by_key(|&l| {
            let literal = model.literal(l);
            (
                load.get(literal.resource_id.as_str()).copied().unwrap_or(0),
                literal.resource_id.clone(),
            )
        });
        if let Some(chosen) = chosen {
            values[chosen] = true;
            let literal = model.literal(chosen);
            if let Some(interval) = model.interval_index(&literal.task_id) {
                *load.entry(literal.resource_id.as_str()).or_default() +=
                    model.interval(interval).duration_min;
            }
        }
    }

    values
}

/// Places every interval at its earliest feasible start in `order`.
///
/// Returns `None` when a task cannot be placed inside its window or the
/// horizon.
fn place(
    model: &CpModel,
    ctx: &SearchContext,
    order: &[usize],
    literal_values: Vec<bool>,
) -> Option<CpSolution> {
    let n = model.interval_count();
    // A cycle would have been rejected at build time; a short order means
    // the precedence graph is inconsistent.
    if order.len() != n {
        return None;
    }

    let mut starts = vec![0_i64; n];
    let mut durations = vec![0_i64; n];
    let mut placed = vec![false; n];

    for &index in order {
        let var = model.interval(index);
        let duration = var.duration_min;

        let mut est = var.start_min;
        for &pred in &ctx.preds[index] {
            est = est.max(starts[pred] + durations[pred]);
        }

        if let Some(fixed) = var.fixed_start {
            if est > fixed {
                return None;
            }
            est = fixed;
            // A pinned start cannot shift around resource contention; any
            // group conflict at the fixed time is a dead end.
            for (_, members) in &ctx.overlap_groups {
                if !members
                    .iter()
                    .any(|&(i, l)| i == index && literal_values[l])
                {
                    continue;
                }
                let blocked = members
                    .iter()
                    .filter(|&&(i, l)| i != index && placed[i] && literal_values[l])
                    .any(|&(i, _)| est < starts[i] + durations[i] && starts[i] < est + duration);
                if blocked {
                    return None;
                }
            }
            for (capacity, demands) in &ctx.cumulative_groups {
                let Some(&(_, _, quantity)) = demands
                    .iter()
                    .find(|&&(i, l, _)| i == index && literal_values[l])
                else {
                    continue;
                };
                match earliest_capacity_fit(
                    est,
                    duration,
                    quantity,
                    *capacity,
                    demands,
                    &starts,
                    &durations,
                    &placed,
                    &literal_values,
                    index,
                ) {
                    Some(fit) if fit == est => {}
                    _ => return None,
                }
            }
        } else {
            // Fixpoint over resource groups: a shift to satisfy one group
            // can break another, so sweep until no group moves the start.
            loop {
                let mut moved = false;
                for (_, members) in &ctx.overlap_groups {
                    if !members
                        .iter()
                        .any(|&(i, l)| i == index && literal_values[l])
                    {
                        continue;
                    }
                    let mut busy: Vec<(i64, i64)> = members
                        .iter()
                        .filter(|&&(i, l)| i != index && placed[i] && literal_values[l])
                        .map(|&(i, _)| (starts[i], starts[i] + durations[i]))
                        .collect();
                    busy.sort_unstable();
                    for (busy_start, busy_end) in busy {
                        if est < busy_end && busy_start < est + duration {
                            est = busy_end;
                            moved = true;
                        }
                    }
                }
                for (capacity, demands) in &ctx.cumulative_groups {
                    let Some(&(_, _, quantity)) = demands
                        .iter()
                        .find(|&&(i, l, _)| i == index && literal_values[l])
                    else {
                        continue;
                    };
                    if let Some(shifted) = earliest_capacity_fit(
                        est,
                        duration,
                        quantity,
                        *capacity,
                        demands,
                        &starts,
                        &durations,
                        &placed,
                        &literal_values,
                        index,
                    ) {
                        if shifted > est {
                            est = shifted;
                            moved = true;
                        }
                    } else {
                        return None;
                    }
                }
                if !moved {
                    break;
                }
            }
        }

        if est > var.start_max || est + duration > var.end_max || est + duration > model.horizon {
            return None;
        }

        starts[index] = est;
        durations[index] = duration;
        placed[index] = true;
    }

    Some(CpSolution {
        starts,
        durations,
        literal_values,
        objective_value: 0,
    })
}

/// Earliest `t >= est` where adding `quantity` over `[t, t+duration)` keeps
/// the group's load within `capacity`. `None` when the demand alone exceeds
/// capacity.
#[allow(clippy::too_many_arguments)]
fn earliest_capacity_fit(
    est: i64,
    duration: i64,
    quantity: i64,
    capacity: i64,
    demands: &[(usize, usize, i64)],
    starts: &[i64],
    durations: &[i64],
    placed: &[bool],
    literal_values: &[bool],
    index: usize,
) -> Option<i64> {
    if quantity > capacity {
        return None;
    }

    let active: Vec<(i64, i64, i64)> = demands
        .iter()
        .filter(|&&(i, l, _)| i != index && placed[i] && literal_values[l])
        .map(|&(i, _, q)| (starts[i], starts[i] + durations[i], q))
        .collect();

    let mut t = est;
    'outer: loop {
        // Load check at every active-demand boundary inside [t, t+duration).
        let mut points: Vec<i64> = vec![t];
        for &(s, e, _) in &active {
            if s > t && s < t + duration {
                points.push(s);
            }
            if e > t && e < t + duration {
                points.push(e);
            }
        }
        for &point in &points {
            let load: i64 = active
                .iter()
                .filter(|&&(s, e, _)| s <= point && point < e)
                .map(|&(_, _, q)| q)
                .sum();
            if load + quantity > capacity {
                // Jump to the earliest end of a demand active at the
                // violation point.
                let next = active
                    .iter()
                    .filter(|&&(s, e, _)| s <= point && point < e)
                    .map(|&(_, e, _)| e)
                    .min();
                match next {
                    Some(next) if next > t => {
                        t = next;
                        continue 'outer;
                    }
                    _ => return None,
                }
            }
        }
        return Some(t);
    }
}
