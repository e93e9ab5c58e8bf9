//! External perturbation events and their typed payloads.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PlanningError;
use crate::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    EtaChange,
    SapUpdate,
    Weather,
    ThirdPartyAck,
    ResourceAvailable,
    ResourceUnavailable,
    TaskComplete,
    Emergency,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EtaChange => "eta_change",
            Self::SapUpdate => "sap_update",
            Self::Weather => "weather",
            Self::ThirdPartyAck => "third_party_ack",
            Self::ResourceAvailable => "resource_available",
            Self::ResourceUnavailable => "resource_unavailable",
            Self::TaskComplete => "task_complete",
            Self::Emergency => "emergency",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// How much of the current plan a replan may disturb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingPolicy {
    #[default]
    ReplanUnstarted,
    RollingWindow,
    FullReplan,
    ManualReview,
}

/// The entities an event touches. `merge` is elementwise set union.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EventScope {
    #[serde(default)]
    pub engines: BTreeSet<Id>,
    #[serde(default)]
    pub work_packages: BTreeSet<Id>,
    #[serde(default)]
    pub prep_ids: BTreeSet<Id>,
    #[serde(default)]
    pub job_ids: BTreeSet<Id>,
    #[serde(default)]
    pub resource_ids: BTreeSet<Id>,
}

impl EventScope {
    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
            && self.work_packages.is_empty()
            && self.prep_ids.is_empty()
            && self.job_ids.is_empty()
            && self.resource_ids.is_empty()
    }

    /// Unions `other` into `self`, field by field.
    pub fn merge(&mut self, other: &EventScope) {
        self.engines.extend(other.engines.iter().cloned());
        self.work_packages
            .extend(other.work_packages.iter().cloned());
        self.prep_ids.extend(other.prep_ids.iter().cloned());
        self.job_ids.extend(other.job_ids.iter().cloned());
        self.resource_ids.extend(other.resource_ids.iter().cloned());
    }

    pub fn merged(mut self, other: &EventScope) -> Self {
        self.merge(other);
        self
    }
}

// ── Typed payloads ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EtaChangePayload {
    pub material_id: Option<Id>,
    pub resource_id: Option<Id>,
    pub old_eta: Option<DateTime<Utc>>,
    pub new_eta: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SapUpdatePayload {
    pub instruction_id: Id,
    pub old_status: Option<String>,
    pub new_status: String,
    pub update_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherPayload {
    pub weather_type: String,
    pub severity: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub affected_areas: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThirdPartyAckPayload {
    pub party: String,
    pub reference: Option<String>,
    pub acknowledged: bool,
    pub ack_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceStatusPayload {
    pub resource_id: Id,
    pub available: bool,
    pub from: DateTime<Utc>,
    pub until: Option<DateTime<Utc>>,
}

/// Caller-supplied event data, before an id and status are attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDraft {
    pub event_type: EventType,
    pub title: String,
    pub description: Option<String>,
    pub effective_time: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub priority: EventPriority,
    #[serde(default)]
    pub scope: EventScope,
    #[serde(default)]
    pub policy: ProcessingPolicy,
    pub payload: Value,
    pub source: Option<String>,
    pub correlation_id: Option<Id>,
}

/// An external perturbation with processing bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Id,
    pub event_type: EventType,
    pub title: String,
    pub description: Option<String>,
    pub effective_time: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub priority: EventPriority,
    #[serde(default)]
    pub status: EventStatus,
    #[serde(default)]
    pub scope: EventScope,
    #[serde(default)]
    pub policy: ProcessingPolicy,
    pub payload: Value,
    pub source: Option<String>,
    pub correlation_id: Option<Id>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error_message: Option<String>,
}

impl Event {
    /// Materializes a draft with a fresh `EV-{timestamp}-{uuid8}` id.
    pub fn from_draft(draft: EventDraft, now: DateTime<Utc>) -> Self {
        let uuid = crate::generate_id();
        let short = &uuid[..8.min(uuid.len())];
        Self {
            event_id: format!("EV-{}-{short}", now.format("%Y%m%d%H%M%S")),
            event_type: draft.event_type,
            title: draft.title,
            description: draft.description,
            effective_time: draft.effective_time,
            expires_at: draft.expires_at,
            priority: draft.priority,
            status: EventStatus::Pending,
            scope: draft.scope,
            policy: draft.policy,
            payload: draft.payload,
            source: draft.source,
            correlation_id: draft.correlation_id,
            created_at: now,
            processed_at: None,
            result: None,
            error_message: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires < now)
    }

    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.effective_time <= now
    }

    pub fn mark_processing(&mut self) {
        self.status = EventStatus::Processing;
    }

    pub fn mark_completed(&mut self, result: Value, now: DateTime<Utc>) {
        self.status = EventStatus::Completed;
        self.result = Some(result);
        self.processed_at = Some(now);
    }

    pub fn mark_failed(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.status = EventStatus::Failed;
        self.error_message = Some(message.into());
        self.processed_at = Some(now);
    }

    /// Decodes the payload into its per-type shape.
    pub fn typed_payload<T: DeserializeOwned>(&self) -> Result<T, PlanningError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| PlanningError::EventProcessing {
            message: format!("payload decode failed: {e}"),
            event_id: Some(self.event_id.clone()),
            event_type: Some(self.event_type.as_str().to_owned()),
        })
    }
}
