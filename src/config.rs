//! Request-scoped planner configuration.
//!
//! The configuration is a snapshot owned by the request being served; there
//! is no process-wide mutable state. Setters validate ranges and reject
//! out-of-range values with [`PlanningError::Configuration`], and
//! [`PlannerConfig::reset`] restores the compiled defaults wholesale.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PlanningError;

/// Weight-vector templates for the multi-objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTemplate {
    #[default]
    Balanced,
    ProtectSla,
    CostMin,
}

impl FromStr for PriorityTemplate {
    type Err = PlanningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "balanced" => Ok(Self::Balanced),
            "protect_sla" => Ok(Self::ProtectSla),
            "cost_min" => Ok(Self::CostMin),
            other => Err(PlanningError::validation(format!(
                "unknown priority template {other:?}"
            ))),
        }
    }
}

impl PriorityTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Balanced => "balanced",
            Self::ProtectSla => "protect_sla",
            Self::CostMin => "cost_min",
        }
    }
}

/// Minimum event priority that may preempt running work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PriorityThreshold {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// A window during which preemption is forbidden.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlackoutPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub reason: String,
}

/// Preemption policy knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreemptionSettings {
    pub max_preemptions_per_day: u32,
    pub max_preemption_hours: f64,
    pub priority_threshold: PriorityThreshold,
    pub blackout_periods: Vec<BlackoutPeriod>,
}

impl Default for PreemptionSettings {
    fn default() -> Self {
        Self {
            max_preemptions_per_day: 3,
            max_preemption_hours: 4.0,
            priority_threshold: PriorityThreshold::Medium,
            blackout_periods: Vec::new(),
        }
    }
}

impl PreemptionSettings {
    /// Validates the accepted ranges.
    pub fn validate(&self) -> Result<(), PlanningError> {
        if self.max_preemptions_per_day > 10 {
            return Err(PlanningError::configuration(format!(
                "max_preemptions_per_day must be in [0, 10], got {}",
                self.max_preemptions_per_day
            )));
        }
        if !(0.0..=24.0).contains(&self.max_preemption_hours) {
            return Err(PlanningError::configuration(format!(
                "max_preemption_hours must be in [0, 24], got {}",
                self.max_preemption_hours
            )));
        }
        for period in &self.blackout_periods {
            if period.start >= period.end {
                return Err(PlanningError::configuration(format!(
                    "blackout period {:?} must have start < end",
                    period.reason
                )));
            }
        }
        Ok(())
    }
}

/// Solver configuration forwarded to the search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverSettings {
    pub time_limit_seconds: f64,
    pub num_search_workers: u32,
    pub log_search_progress: bool,
    pub random_seed: Option<u64>,
    /// Opaque parameters forwarded verbatim to the underlying search.
    #[serde(default)]
    pub optimization_parameters: BTreeMap<String, Value>,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            time_limit_seconds: 300.0,
            num_search_workers: 1,
            log_search_progress: false,
            random_seed: None,
            optimization_parameters: BTreeMap::new(),
        }
    }
}

impl SolverSettings {
    /// Validates the accepted ranges: time limit in (0, 3600], workers in
    /// [1, 16].
    pub fn validate(&self) -> Result<(), PlanningError> {
        if !(self.time_limit_seconds > 0.0 && self.time_limit_seconds <= 3600.0) {
            return Err(PlanningError::configuration(format!(
                "time_limit_seconds must be in (0, 3600], got {}",
                self.time_limit_seconds
            )));
        }
        if !(1..=16).contains(&self.num_search_workers) {
            return Err(PlanningError::configuration(format!(
                "num_search_workers must be in [1, 16], got {}",
                self.num_search_workers
            )));
        }
        Ok(())
    }
}

/// One request's configuration snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerConfig {
    pub template: PriorityTemplate,
    /// Optional scope restriction for a template switch (engine or package id).
    pub template_scope: Option<String>,
    pub template_effective_time: Option<DateTime<Utc>>,
    /// Selective weight overrides applied on top of the template.
    pub weight_overrides: BTreeMap<String, f64>,
    pub prep_window_days: u32,
    pub freeze_inprogress: bool,
    pub solver: SolverSettings,
    pub preemption: PreemptionSettings,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            template: PriorityTemplate::Balanced,
            template_scope: None,
            template_effective_time: None,
            weight_overrides: BTreeMap::new(),
            prep_window_days: 2,
            freeze_inprogress: true,
            solver: SolverSettings::default(),
            preemption: PreemptionSettings::default(),
        }
    }
}

impl PlannerConfig {
    /// Switches the priority template. Unknown template names are rejected
    /// by [`PriorityTemplate::from_str`] before this is reached.
    pub fn set_template(
        &mut self,
        template: PriorityTemplate,
        scope: Option<String>,
        effective_time: Option<DateTime<Utc>>,
    ) {
        self.template = template;
        self.template_scope = scope;
        self.template_effective_time = effective_time;
    }

    /// Replaces the solver settings after range validation.
    pub fn set_solver_settings(&mut self, settings: SolverSettings) -> Result<(), PlanningError> {
        settings.validate()?;
        self.solver = settings;
        Ok(())
    }

    /// Replaces the preemption settings after range validation.
    pub fn set_preemption_settings(
        &mut self,
        settings: PreemptionSettings,
    ) -> Result<(), PlanningError> {
        settings.validate()?;
        self.preemption = settings;
        Ok(())
    }

    /// Restores the compiled defaults.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Template parsing ──────────────────────────────────────────────

    #[test]
    fn known_templates_parse() {
        assert_eq!(
            "balanced".parse::<PriorityTemplate>().unwrap(),
            PriorityTemplate::Balanced
        );
        assert_eq!(
            "protect_sla".parse::<PriorityTemplate>().unwrap(),
            PriorityTemplate::ProtectSla
        );
        assert_eq!(
            "cost_min".parse::<PriorityTemplate>().unwrap(),
            PriorityTemplate::CostMin
        );
    }

    #[test]
    fn unknown_template_is_rejected() {
        let err = "fastest".parse::<PriorityTemplate>().unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    // ── Solver settings ───────────────────────────────────────────────

    #[test]
    fn default_solver_settings_are_valid() {
        assert!(SolverSettings::default().validate().is_ok());
    }

    #[test]
    fn time_limit_over_cap_is_rejected() {
        let settings = SolverSettings {
            time_limit_seconds: 7200.0,
            ..Default::default()
        };
        assert_eq!(settings.validate().unwrap_err().code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn zero_time_limit_is_rejected() {
        let settings = SolverSettings {
            time_limit_seconds: 0.0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn worker_count_bounds() {
        for workers in [0u32, 17] {
            let settings = SolverSettings {
                num_search_workers: workers,
                ..Default::default()
            };
            assert!(settings.validate().is_err(), "workers={workers}");
        }
        let settings = SolverSettings {
            num_search_workers: 16,
            ..Default::default()
        };
        assert!(settings.validate().is_ok());
    }

    // ── Preemption settings ───────────────────────────────────────────

    #[test]
    fn preemption_ranges_enforced() {
        let mut settings = PreemptionSettings {
            max_preemptions_per_day: 11,
            ..Default::default()
        };
        assert!(settings.validate().is_err());

        settings.max_preemptions_per_day = 10;
        settings.max_preemption_hours = 25.0;
        assert!(settings.validate().is_err());

        settings.max_preemption_hours = 24.0;
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn inverted_blackout_period_is_rejected() {
        use chrono::TimeZone;
        let settings = PreemptionSettings {
            blackout_periods: vec![BlackoutPeriod {
                start: Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap(),
                end: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
                reason: "night shift".into(),
            }],
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    // ── Reset ─────────────────────────────────────────────────────────

    #[test]
    fn reset_restores_defaults() {
        let mut config = PlannerConfig::default();
        config.set_template(PriorityTemplate::CostMin, Some("ENG-1".into()), None);
        config
            .set_solver_settings(SolverSettings {
                time_limit_seconds: 60.0,
                ..Default::default()
            })
            .unwrap();

        config.reset();
        assert_eq!(config, PlannerConfig::default());
    }

    #[test]
    fn invalid_solver_settings_leave_config_unchanged() {
        let mut config = PlannerConfig::default();
        let before = config.clone();
        let result = config.set_solver_settings(SolverSettings {
            num_search_workers: 99,
            ..Default::default()
        });
        assert!(result.is_err());
        assert_eq!(config, before);
    }
}
