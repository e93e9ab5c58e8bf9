//! qecplan - QEC overhaul planning core
//!
//! A constraint-based maintenance scheduling library for aero-engine
//! Quick Engine Change (QEC) overhaul. Work packages are decomposed into
//! atomic jobs and gated preparation tasks, lowered into a CP variable and
//! constraint graph, solved under a weighted multi-objective template, and
//! lifted back into a typed schedule with metrics and a critical path.
//!
//! The crate is organized in three layers:
//!
//! - [`domain`] — entities (jobs, resources, preparation tasks, events,
//!   schedules) with their invariants,
//! - [`solver`] — the CP model, constraint and objective builders, the
//!   search driver, and the solution parser,
//! - [`service`] — plan orchestration, event-driven replanning, resource
//!   allocation, and gate evaluation.

pub mod config;
pub mod domain;
pub mod error;
pub mod service;
pub mod solver;
pub mod time_util;

pub use error::PlanningError;

/// Identifier type used for tasks, resources, and scheduling artifacts.
pub type Id = String;

/// Generates a new unique identifier (UUID v4).
pub fn generate_id() -> Id {
    uuid::Uuid::new_v4().to_string()
}
