//! Error taxonomy shared by every layer of the planning core.

use serde_json::Value;
use thiserror::Error;

use crate::Id;

/// Errors surfaced by the planning core.
///
/// Each variant maps to a stable machine-readable code via [`code`](Self::code)
/// so external surfaces can translate failures without string matching on
/// messages. `details` carries per-field errors, conflicting resource ids, or
/// violated constraint names depending on the variant.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlanningError {
    /// Malformed input, unknown template, missing required fields.
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        details: Option<Value>,
    },

    /// The solver returned a non-success status or was misused.
    #[error("solver error: {message}")]
    Solver { message: String },

    /// Allocation attempt on an overbooked or exclusive resource.
    #[error("resource conflict: {message}")]
    ResourceConflict {
        message: String,
        conflicting_resources: Vec<Id>,
    },

    /// Dependency cycle, infeasible window, unsatisfiable qualification.
    #[error("constraint violation: {message}")]
    ConstraintViolation {
        message: String,
        violated_constraints: Vec<String>,
    },

    /// Typed payload decode failure or a per-type processor failure.
    #[error("event processing failed: {message}")]
    EventProcessing {
        message: String,
        event_id: Option<Id>,
        event_type: Option<String>,
    },

    /// Unknown gate type or evidence validation failure.
    #[error("gate error: {message}")]
    Gate {
        message: String,
        gate_type: Option<String>,
    },

    /// No valid objective terms, out-of-range configuration value.
    #[error("configuration error: {message}")]
    Configuration { message: String },
}

impl PlanningError {
    /// Convenience constructor for validation failures without details.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn solver(message: impl Into<String>) -> Self {
        Self::Solver {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Stable error code for external surfaces.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Solver { .. } => "SOLVER_ERROR",
            Self::ResourceConflict { .. } => "RESOURCE_CONFLICT",
            Self::ConstraintViolation { .. } => "CONSTRAINT_VIOLATION",
            Self::EventProcessing { .. } => "EVENT_PROCESSING_ERROR",
            Self::Gate { .. } => "GATE_ERROR",
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
        }
    }

    /// Renders the error as the `{ code, message, details }` object used in
    /// failure responses.
    pub fn to_error_object(&self) -> Value {
        let details = match self {
            Self::Validation { details, .. } => details.clone().unwrap_or(Value::Null),
            Self::ResourceConflict {
                conflicting_resources,
                ..
            } => serde_json::json!({ "conflicting_resources": conflicting_resources }),
            Self::ConstraintViolation {
                violated_constraints,
                ..
            } => serde_json::json!({ "violated_constraints": violated_constraints }),
            Self::EventProcessing {
                event_id,
                event_type,
                ..
            } => serde_json::json!({ "event_id": event_id, "event_type": event_type }),
            Self::Gate { gate_type, .. } => serde_json::json!({ "gate_type": gate_type }),
            _ => Value::Null,
        };
        serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
            "details": details,
        })
    }
}
