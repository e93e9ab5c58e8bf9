//! Availability checks, allocation, conflict detection, and utilization.
//!
//! The service operates over request-local caches of resources and
//! allocations; cross-request sharing is the caller's concern.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::resource::Resource;
use crate::domain::schedule::{
    periods_overlap, AllocationStatus, ResourceAllocation, Schedule,
};
use crate::error::PlanningError;
use crate::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    TimeOverlap,
    ExclusiveResourceConflict,
    CapacityExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSeverity {
    Medium,
    High,
}

/// One detected conflict over a schedule's allocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConflict {
    pub conflict_type: ConflictType,
    pub severity: ConflictSeverity,
    pub resource_id: Id,
    pub task_ids: Vec<Id>,
    pub description: String,
}

/// Hours allocated against hours available for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUtilization {
    pub resource_id: Id,
    pub allocated_hours: f64,
    pub available_hours: f64,
    pub utilization: f64,
}

/// Per-resource roll-up for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub resource_id: Id,
    pub allocation_count: usize,
    pub allocated_hours: f64,
    pub utilization: f64,
    pub conflicts: usize,
}

/// In-memory resource and allocation cache with pure query functions.
#[derive(Debug, Default)]
pub struct ResourceService {
    resources: HashMap<Id, Resource>,
    allocations: Vec<ResourceAllocation>,
}

impl ResourceService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resources(resources: Vec<Resource>) -> Self {
        let mut service = Self::new();
        service.update_resource_cache(resources);
        service
    }

    pub fn update_resource_cache(&mut self, resources: Vec<Resource>) {
        for resource in resources {
            self.resources.insert(resource.resource_id.clone(), resource);
        }
    }

    pub fn clear_allocation_cache(&mut self) {
        self.allocations.clear();
    }

    pub fn resource(&self, resource_id: &str) -> Option<&Resource> {
        self.resources.get(resource_id)
    }

    pub fn allocations(&self) -> &[ResourceAllocation] {
        &self.allocations
    }

    /// Whether `quantity` units of the resource can be booked over
    /// `[start, end)`.
    pub fn check_resource_availability(
        &self,
        resource_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        quantity: u32,
    ) -> bool {
        let Some(resource) = self.resources.get(resource_id) else {
            return false;
        };
        if !resource.is_active || !resource.is_available_at(start) {
            return false;
        }

        let booked: u32 = self
            .allocations
            .iter()
            .filter(|a| {
                a.resource_id == resource_id
                    && a.status != AllocationStatus::Released
                    && a.status != AllocationStatus::Cancelled
                    && periods_overlap(a.start_time, a.end_time, start, end)
            })
            .map(|a| a.quantity)
            .sum();

        booked + quantity <= resource.available_quantity
    }

    /// Books the resource, or reports the conflicting booking.
    ///
    /// # Errors
    ///
    /// - `Validation` for an unknown resource id
    /// - `ResourceConflict` when the window is overbooked or unavailable
    pub fn allocate(
        &mut self,
        resource_id: &str,
        task_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        quantity: u32,
    ) -> Result<ResourceAllocation, PlanningError> {
        let resource = self.resources.get(resource_id).ok_or_else(|| {
            PlanningError::validation(format!("unknown resource {resource_id:?}"))
        })?;

        if !self.check_resource_availability(resource_id, start, end, quantity) {
            return Err(PlanningError::ResourceConflict {
                message: format!(
                    "resource {resource_id} cannot supply {quantity} unit(s) over the requested window"
                ),
                conflicting_resources: vec![resource_id.to_owned()],
            });
        }

        let duration_hours = (end - start).num_seconds() as f64 / 3600.0;
        let cost = resource
            .hourly_cost
            .map(|hourly| hourly * duration_hours * quantity as f64);

        let allocation = ResourceAllocation {
            allocation_id: crate::generate_id(),
            resource_id: resource_id.to_owned(),
            resource_name: Some(resource.name.clone()),
            allocated_to: task_id.to_owned(),
            start_time: start,
            end_time: end,
            quantity,
            cost,
            status: AllocationStatus::Planned,
        };
        debug!(resource_id, task_id, "allocated resource");
        self.allocations.push(allocation.clone());
        Ok(allocation)
    }

    /// Marks an allocation released, freeing its window.
    pub fn release(&mut self, allocation_id: &str) -> Result<(), PlanningError> {
        let allocation = self
            .allocations
            .iter_mut()
            .find(|a| a.allocation_id == allocation_id)
            .ok_or_else(|| {
                PlanningError::validation(format!("unknown allocation {allocation_id:?}"))
            })?;
        allocation.status = AllocationStatus::Released;
        Ok(())
    }

    /// Scans a schedule's allocations for overlaps and capacity breaches.
    pub fn detect_conflicts(&self, schedule: &Schedule) -> Vec<ResourceConflict> {
        let mut conflicts = Vec::new();

        let mut by_resource: HashMap<&str, Vec<&ResourceAllocation>> = HashMap::new();
        for allocation in &schedule.resource_allocations {
            by_resource
                .entry(allocation.resource_id.as_str())
                .or_default()
                .push(allocation);
        }

        for (resource_id, allocations) in &by_resource {
            let resource = self.resources.get(*resource_id);
            let exclusive = resource.map(|r| r.is_exclusive()).unwrap_or(false);
            let capacity = resource.map(|r| r.total_quantity).unwrap_or(1);

            // Pairwise overlaps.
            for i in 0..allocations.len() {
                for j in (i + 1)..allocations.len() {
                    let (a, b) = (allocations[i], allocations[j]);
                    if !a.overlaps(b) {
                        continue;
                    }
                    if exclusive {
                        conflicts.push(ResourceConflict {
                            conflict_type: ConflictType::ExclusiveResourceConflict,
                            severity: ConflictSeverity::High,
                            resource_id: (*resource_id).to_owned(),
                            task_ids: vec![a.allocated_to.clone(), b.allocated_to.clone()],
                            description: format!(
                                "exclusive resource {resource_id} double-booked by {} and {}",
                                a.allocated_to, b.allocated_to
                            ),
                        });
                    } else if capacity <= 1 {
                        conflicts.push(ResourceConflict {
                            conflict_type: ConflictType::TimeOverlap,
                            severity: ConflictSeverity::Medium,
                            resource_id: (*resource_id).to_owned(),
                            task_ids: vec![a.allocated_to.clone(), b.allocated_to.clone()],
                            description: format!(
                                "resource {resource_id} overlaps between {} and {}",
                                a.allocated_to, b.allocated_to
                            ),
                        });
                    }
                }
            }

            // Capacity profile at every allocation boundary.
            if capacity > 1 {
                let mut points: Vec<DateTime<Utc>> =
                    allocations.iter().map(|a| a.start_time).collect();
                points.sort_unstable();
                points.dedup();
                for point in points {
                    let concurrent: Vec<&&ResourceAllocation> = allocations
                        .iter()
                        .filter(|a| a.start_time <= point && point < a.end_time)
                        .collect();
                    let load: u32 = concurrent.iter().map(|a| a.quantity).sum();
                    if load > capacity {
                        conflicts.push(ResourceConflict {
                            conflict_type: ConflictType::CapacityExceeded,
                            severity: ConflictSeverity::High,
                            resource_id: (*resource_id).to_owned(),
                            task_ids: concurrent
                                .iter()
                                .map(|a| a.allocated_to.clone())
                                .collect(),
                            description: format!(
                                "resource {resource_id} loaded {load}/{capacity} at {point}"
                            ),
                        });
                        break;
                    }
                }
            }
        }

        conflicts
    }

    /// Allocated-over-available hours within `[start, end)`, capped at 1.0.
    pub fn calculate_utilization(
        &self,
        resource_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ResourceUtilization {
        let allocated_hours: f64 = self
            .allocations
            .iter()
            .filter(|a| {
                a.resource_id == resource_id
                    && a.status != AllocationStatus::Released
                    && a.status != AllocationStatus::Cancelled
                    && periods_overlap(a.start_time, a.end_time, start, end)
            })
            .map(|a| {
                let clipped_start = a.start_time.max(start);
                let clipped_end = a.end_time.min(end);
                (clipped_end - clipped_start).num_seconds().max(0) as f64 / 3600.0
            })
            .sum();

        let available_hours = (end - start).num_seconds().max(0) as f64 / 3600.0;
        let utilization = if available_hours > 0.0 {
            (allocated_hours / available_hours).min(1.0)
        } else {
            0.0
        };

        ResourceUtilization {
            resource_id: resource_id.to_owned(),
            allocated_hours,
            available_hours,
            utilization,
        }
    }

    /// Roll-up of one resource's bookings within a window.
    pub fn resource_summary(
        &self,
        resource_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> ResourceSummary {
        let in_window: Vec<&ResourceAllocation> = self
            .allocations
            .iter()
            .filter(|a| {
                a.resource_id == resource_id
                    && periods_overlap(a.start_time, a.end_time, start, end)
            })
            .collect();

        let mut conflict_count = 0;
        for i in 0..in_window.len() {
            for j in (i + 1)..in_window.len() {
                if in_window[i].overlaps(in_window[j]) {
                    conflict_count += 1;
                }
            }
        }

        let utilization = self.calculate_utilization(resource_id, start, end);
        ResourceSummary {
            resource_id: resource_id.to_owned(),
            allocation_count: in_window.len(),
            allocated_hours: utilization.allocated_hours,
            utilization: utilization.utilization,
            conflicts: conflict_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::resource::{HumanProfile, PhysicalProfile};
    use crate::domain::schedule::{Schedule, ScheduleMetrics};
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, hour, 0, 0).unwrap()
    }

    fn crane() -> Resource {
        Resource::physical(
            "CRANE-1",
            PhysicalProfile {
                is_exclusive: true,
                ..Default::default()
            },
        )
        .with_hourly_cost(100.0)
    }

    fn pool() -> Resource {
        Resource::physical("JACK", PhysicalProfile::default()).with_quantity(2)
    }

    fn service() -> ResourceService {
        ResourceService::with_resources(vec![
            crane(),
            pool(),
            Resource::human("EMP-1", HumanProfile::new("EMP-1")),
        ])
    }

    fn schedule_with(allocations: Vec<ResourceAllocation>) -> Schedule {
        Schedule {
            plan_id: "PLAN-1".into(),
            name: None,
            plan_start_time: t(8),
            plan_end_time: t(18),
            task_intervals: Vec::new(),
            resource_allocations: allocations,
            gates: Vec::new(),
            metrics: ScheduleMetrics::default(),
            critical_path: Vec::new(),
            is_feasible: true,
            is_optimal: false,
            solver_config: serde_json::Value::Null,
            metadata: BTreeMap::new(),
        }
    }

    fn allocation(
        resource_id: &str,
        task_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        quantity: u32,
    ) -> ResourceAllocation {
        ResourceAllocation {
            allocation_id: crate::generate_id(),
            resource_id: resource_id.into(),
            resource_name: None,
            allocated_to: task_id.into(),
            start_time: start,
            end_time: end,
            quantity,
            cost: None,
            status: AllocationStatus::Planned,
        }
    }

    // ── Availability ──────────────────────────────────────────────────

    #[test]
    fn unknown_resource_is_unavailable() {
        assert!(!service().check_resource_availability("GHOST", t(8), t(10), 1));
    }

    #[test]
    fn inactive_resource_is_unavailable() {
        let mut r = crane();
        r.is_active = false;
        let service = ResourceService::with_resources(vec![r]);
        assert!(!service.check_resource_availability("CRANE-1", t(8), t(10), 1));
    }

    #[test]
    fn free_resource_is_available() {
        assert!(service().check_resource_availability("CRANE-1", t(8), t(10), 1));
    }

    #[test]
    fn booked_window_blocks_second_request() {
        let mut service = service();
        service.allocate("CRANE-1", "J1", t(8), t(10), 1).unwrap();
        assert!(!service.check_resource_availability("CRANE-1", t(9), t(11), 1));
        // Touching windows are fine.
        assert!(service.check_resource_availability("CRANE-1", t(10), t(12), 1));
    }

    #[test]
    fn pool_serves_until_capacity() {
        let mut service = service();
        service.allocate("JACK", "J1", t(8), t(12), 1).unwrap();
        assert!(service.check_resource_availability("JACK", t(8), t(12), 1));
        service.allocate("JACK", "J2", t(8), t(12), 1).unwrap();
        assert!(!service.check_resource_availability("JACK", t(8), t(12), 1));
    }

    // ── Allocation ────────────────────────────────────────────────────

    #[test]
    fn allocation_computes_cost() {
        let mut service = service();
        let allocation = service.allocate("CRANE-1", "J1", t(8), t(10), 1).unwrap();
        assert!((allocation.cost.unwrap() - 200.0).abs() < 1e-9);
    }

    #[test]
    fn conflicting_allocation_names_the_resource() {
        let mut service = service();
        service.allocate("CRANE-1", "J1", t(8), t(10), 1).unwrap();
        let err = service.allocate("CRANE-1", "J2", t(9), t(11), 1).unwrap_err();
        assert_eq!(err.code(), "RESOURCE_CONFLICT");
        let obj = err.to_error_object();
        assert_eq!(obj["details"]["conflicting_resources"][0], "CRANE-1");
    }

    #[test]
    fn release_frees_the_window() {
        let mut service = service();
        let allocation = service.allocate("CRANE-1", "J1", t(8), t(10), 1).unwrap();
        service.release(&allocation.allocation_id).unwrap();
        assert!(service.check_resource_availability("CRANE-1", t(9), t(11), 1));
    }

    #[test]
    fn release_unknown_allocation_fails() {
        assert!(service().release("ghost").is_err());
    }

    // ── Conflict detection ────────────────────────────────────────────

    #[test]
    fn exclusive_overlap_is_high_severity() {
        let service = service();
        let schedule = schedule_with(vec![
            allocation("CRANE-1", "J1", t(8), t(10), 1),
            allocation("CRANE-1", "J2", t(9), t(11), 1),
        ]);
        let conflicts = service.detect_conflicts(&schedule);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(
            conflicts[0].conflict_type,
            ConflictType::ExclusiveResourceConflict
        );
        assert_eq!(conflicts[0].severity, ConflictSeverity::High);
        assert!(conflicts[0].task_ids.contains(&"J1".to_string()));
    }

    #[test]
    fn touching_allocations_do_not_conflict() {
        let service = service();
        let schedule = schedule_with(vec![
            allocation("CRANE-1", "J1", t(8), t(10), 1),
            allocation("CRANE-1", "J2", t(10), t(12), 1),
        ]);
        assert!(service.detect_conflicts(&schedule).is_empty());
    }

    #[test]
    fn nonexclusive_overlap_is_medium() {
        let service = service();
        let schedule = schedule_with(vec![
            allocation("EMP-1", "J1", t(8), t(10), 1),
            allocation("EMP-1", "J2", t(9), t(11), 1),
        ]);
        let conflicts = service.detect_conflicts(&schedule);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_type, ConflictType::TimeOverlap);
        assert_eq!(conflicts[0].severity, ConflictSeverity::Medium);
    }

    #[test]
    fn capacity_breach_is_detected() {
        let service = service();
        let schedule = schedule_with(vec![
            allocation("JACK", "J1", t(8), t(12), 2),
            allocation("JACK", "J2", t(9), t(11), 1),
        ]);
        let conflicts = service.detect_conflicts(&schedule);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].conflict_type, ConflictType::CapacityExceeded);
    }

    #[test]
    fn pool_within_capacity_is_clean() {
        let service = service();
        let schedule = schedule_with(vec![
            allocation("JACK", "J1", t(8), t(12), 1),
            allocation("JACK", "J2", t(9), t(11), 1),
        ]);
        assert!(service.detect_conflicts(&schedule).is_empty());
    }

    // ── Utilization ───────────────────────────────────────────────────

    #[test]
    fn utilization_is_allocated_over_available() {
        let mut service = service();
        service.allocate("CRANE-1", "J1", t(8), t(12), 1).unwrap();
        let utilization = service.calculate_utilization("CRANE-1", t(8), t(16));
        assert!((utilization.allocated_hours - 4.0).abs() < 1e-9);
        assert!((utilization.available_hours - 8.0).abs() < 1e-9);
        assert!((utilization.utilization - 0.5).abs() < 1e-9);
    }

    #[test]
    fn utilization_is_capped_at_one() {
        let mut service = service();
        service.allocate("JACK", "J1", t(8), t(12), 1).unwrap();
        service.allocate("JACK", "J2", t(8), t(12), 1).unwrap();
        let utilization = service.calculate_utilization("JACK", t(8), t(10));
        assert!(utilization.utilization <= 1.0);
    }

    #[test]
    fn utilization_clips_to_window() {
        let mut service = service();
        service.allocate("CRANE-1", "J1", t(8), t(12), 1).unwrap();
        let utilization = service.calculate_utilization("CRANE-1", t(10), t(14));
        // Only the 10:00–12:00 half counts.
        assert!((utilization.allocated_hours - 2.0).abs() < 1e-9);
    }

    // ── Summary ───────────────────────────────────────────────────────

    #[test]
    fn summary_counts_allocations() {
        let mut service = service();
        service.allocate("CRANE-1", "J1", t(8), t(10), 1).unwrap();
        service.allocate("CRANE-1", "J2", t(10), t(12), 1).unwrap();
        let summary = service.resource_summary("CRANE-1", t(8), t(16));
        assert_eq!(summary.allocation_count, 2);
        assert_eq!(summary.conflicts, 0);
        assert!((summary.allocated_hours - 4.0).abs() < 1e-9);
    }

    #[test]
    fn cache_clear_empties_allocations() {
        let mut service = service();
        service.allocate("CRANE-1", "J1", t(8), t(10), 1).unwrap();
        service.clear_allocation_cache();
        assert!(service.allocations().is_empty());
    }
}
