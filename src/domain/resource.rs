//! Heterogeneous resource pool: qualified humans and physical equipment.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::PlanningError;
use crate::Id;

/// State of an explicit availability period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityStatus {
    Available,
    Busy,
    Maintenance,
    Unavailable,
}

/// An explicitly declared availability window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub status: AvailabilityStatus,
    pub reason: Option<String>,
}

impl AvailabilityPeriod {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }

    pub fn blocks(&self) -> bool {
        !matches!(self.status, AvailabilityStatus::Available)
    }
}

/// Coarse working calendar: one daily working window plus exception days.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceCalendar {
    pub working_weekdays: BTreeSet<u8>,
    pub work_start: NaiveTime,
    pub work_end: NaiveTime,
    #[serde(default)]
    pub holidays: BTreeSet<NaiveDate>,
    #[serde(default)]
    pub special_working_days: BTreeSet<NaiveDate>,
}

impl Default for ResourceCalendar {
    fn default() -> Self {
        Self {
            // Monday through Friday, ISO weekday numbers.
            working_weekdays: (1..=5).collect(),
            work_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            work_end: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            holidays: BTreeSet::new(),
            special_working_days: BTreeSet::new(),
        }
    }
}

impl ResourceCalendar {
    /// Whether `t` falls on a working day inside the working window.
    pub fn is_working_time(&self, t: DateTime<Utc>) -> bool {
        let date = t.date_naive();
        if self.holidays.contains(&date) {
            return false;
        }
        let working_day = self.special_working_days.contains(&date)
            || self
                .working_weekdays
                .contains(&(weekday_number(t.weekday())));
        if !working_day {
            return false;
        }
        let time = t.time();
        self.work_start <= time && time < self.work_end
    }
}

fn weekday_number(weekday: Weekday) -> u8 {
    weekday.number_from_monday() as u8
}

/// Human-specific attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanProfile {
    pub employee_id: Id,
    #[serde(default)]
    pub qualifications: BTreeSet<String>,
    /// Skill levels keyed by qualification, 1 (novice) to 5 (expert).
    #[serde(default)]
    pub skill_levels: BTreeMap<String, u8>,
    /// Speed multipliers keyed by task type.
    #[serde(default)]
    pub efficiency_factors: BTreeMap<String, f64>,
    #[serde(default)]
    pub shift_preferences: Vec<String>,
    #[serde(default)]
    pub max_overtime_hours: f64,
}

impl HumanProfile {
    pub fn new(employee_id: impl Into<Id>) -> Self {
        Self {
            employee_id: employee_id.into(),
            qualifications: BTreeSet::new(),
            skill_levels: BTreeMap::new(),
            efficiency_factors: BTreeMap::new(),
            shift_preferences: Vec::new(),
            max_overtime_hours: 0.0,
        }
    }
}

/// Equipment-specific attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PhysicalProfile {
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub is_exclusive: bool,
    pub exclusive_group: Option<String>,
    /// Planned maintenance windows during which the resource is blocked.
    #[serde(default)]
    pub maintenance_windows: Vec<AvailabilityPeriod>,
}

/// The human/physical split, queried through [`Resource::as_human`] and
/// [`Resource::as_physical`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceKind {
    Human(HumanProfile),
    Physical(PhysicalProfile),
}

/// A schedulable resource.
///
/// # Invariants
///
/// - `total_quantity >= 1`, `available_quantity <= total_quantity`
/// - costs, when present, are non-negative
/// - within an exclusive group, at most one member holds overlapping
///   allocations (enforced at plan validation and by the solver)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub resource_id: Id,
    pub name: String,
    pub total_quantity: u32,
    pub available_quantity: u32,
    pub hourly_cost: Option<f64>,
    pub setup_cost: Option<f64>,
    pub calendar: Option<ResourceCalendar>,
    #[serde(default)]
    pub availability_periods: Vec<AvailabilityPeriod>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(flatten)]
    pub kind: ResourceKind,
}

fn default_true() -> bool {
    true
}

impl Resource {
    pub fn human(resource_id: impl Into<Id>, profile: HumanProfile) -> Self {
        let resource_id = resource_id.into();
        Self {
            name: resource_id.clone(),
            resource_id,
            total_quantity: 1,
            available_quantity: 1,
            hourly_cost: None,
            setup_cost: None,
            calendar: None,
            availability_periods: Vec::new(),
            is_active: true,
            kind: ResourceKind::Human(profile),
        }
    }

    pub fn physical(resource_id: impl Into<Id>, profile: PhysicalProfile) -> Self {
        let resource_id = resource_id.into();
        Self {
            name: resource_id.clone(),
            resource_id,
            total_quantity: 1,
            available_quantity: 1,
            hourly_cost: None,
            setup_cost: None,
            calendar: None,
            availability_periods: Vec::new(),
            is_active: true,
            kind: ResourceKind::Physical(profile),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_quantity(mut self, total: u32) -> Self {
        self.total_quantity = total;
        self.available_quantity = total;
        self
    }

    pub fn with_hourly_cost(mut self, cost: f64) -> Self {
        self.hourly_cost = Some(cost);
        self
    }

    pub fn as_human(&self) -> Option<&HumanProfile> {
        match &self.kind {
            ResourceKind::Human(profile) => Some(profile),
            ResourceKind::Physical(_) => None,
        }
    }

    pub fn as_physical(&self) -> Option<&PhysicalProfile> {
        match &self.kind {
            ResourceKind::Physical(profile) => Some(profile),
            ResourceKind::Human(_) => None,
        }
    }

    pub fn is_human(&self) -> bool {
        self.as_human().is_some()
    }

    pub fn is_exclusive(&self) -> bool {
        self.as_physical().is_some_and(|p| p.is_exclusive)
    }

    pub fn exclusive_group(&self) -> Option<&str> {
        self.as_physical()
            .and_then(|p| p.exclusive_group.as_deref())
    }

    pub fn has_qualification(&self, qualification: &str) -> bool {
        self.as_human()
            .is_some_and(|h| h.qualifications.contains(qualification))
    }

    /// Whether the resource can begin work at `t`.
    ///
    /// Explicit availability periods take precedence over the calendar: a
    /// blocking period rejects `t`, a covering `Available` period accepts it.
    pub fn is_available_at(&self, t: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        if let Some(physical) = self.as_physical() {
            if physical.maintenance_windows.iter().any(|w| w.contains(t)) {
                return false;
            }
        }
        for period in &self.availability_periods {
            if period.contains(t) {
                return !period.blocks();
            }
        }
        match &self.calendar {
            Some(calendar) => calendar.is_working_time(t),
            None => true,
        }
    }

    pub fn validate(&self) -> Result<(), PlanningError> {
        if self.total_quantity < 1 {
            return Err(PlanningError::validation(format!(
                "resource {}: total_quantity must be at least 1",
                self.resource_id
            )));
        }
        if self.available_quantity > self.total_quantity {
            return Err(PlanningError::validation(format!(
                "resource {}: available_quantity {} exceeds total_quantity {}",
                self.resource_id, self.available_quantity, self.total_quantity
            )));
        }
        for (label, cost) in [("hourly_cost", self.hourly_cost), ("setup_cost", self.setup_cost)] {
            if let Some(cost) = cost {
                if cost < 0.0 {
                    return Err(PlanningError::validation(format!(
                        "resource {}: {label} must be non-negative, got {cost}",
                        self.resource_id
                    )));
                }
            }
        }
        Ok(())
    }
}
