//! Typed event decoding, impact analysis, and batched application.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::domain::event::{
    EtaChangePayload, Event, EventDraft, EventScope, EventType, ProcessingPolicy,
    ResourceStatusPayload, SapUpdatePayload, ThirdPartyAckPayload, WeatherPayload,
};
use crate::domain::schedule::{ReallocationEntry, Schedule, ScheduleDiff, TaskDelay};
use crate::error::PlanningError;
use crate::time_util::format_iso_duration;
use crate::Id;

/// Fallback makespan when no current schedule is supplied.
const DEFAULT_MAKESPAN_HOURS: f64 = 24.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// One event's processing outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventOutcome {
    pub event_id: Id,
    pub event_type: EventType,
    pub affected_tasks: Vec<Id>,
    pub delay_hours: f64,
    pub requires_replan: bool,
    pub impact_level: ImpactLevel,
    pub resource_reallocations: Vec<ReallocationEntry>,
}

/// Per-event log record kept for the request's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLog {
    pub event_id: Id,
    pub level: String,
    pub message: String,
    pub detail: Option<Value>,
    pub logged_at: DateTime<Utc>,
}

/// Result of one `apply_events` call.
#[derive(Debug, Clone, PartialEq)]
pub struct EventApplication {
    pub plan_id: Id,
    pub request_id: Id,
    pub policy: ProcessingPolicy,
    /// Union of every applied event's scope.
    pub scope: EventScope,
    pub diff: ScheduleDiff,
    pub new_makespan: String,
    pub new_makespan_hours: f64,
    pub requires_replan: bool,
    pub outcomes: Vec<EventOutcome>,
}

/// Receives raw events, analyses impact, and accumulates a schedule diff.
#[derive(Debug, Default)]
pub struct EventService {
    processed_events: Vec<Event>,
    logs: Vec<EventLog>,
}

impl EventService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processed_events(&self) -> &[Event] {
        &self.processed_events
    }

    pub fn logs(&self) -> &[EventLog] {
        &self.logs
    }

    /// Materializes a draft into an event with a fresh id.
    pub fn create_event(&self, draft: EventDraft, now: DateTime<Utc>) -> Event {
        Event::from_draft(draft, now)
    }

    /// Decodes, validates, and processes one event against the current
    /// schedule. The event's status is updated in place.
    pub fn process_event(
        &mut self,
        event: &mut Event,
        current_schedule: Option<&Schedule>,
        now: DateTime<Utc>,
    ) -> Result<EventOutcome, PlanningError> {
        if let Err(e) = self.validate_event(event, now) {
            event.mark_failed(e.to_string(), now);
            self.log(event, "ERROR", &format!("validation failed: {e}"), None, now);
            return Err(e);
        }

        event.mark_processing();
        self.log(event, "INFO", "event processing started", None, now);

        let outcome = match self.dispatch(event, current_schedule) {
            Ok(outcome) => outcome,
            Err(e) => {
                event.mark_failed(e.to_string(), now);
                self.log(event, "ERROR", &format!("processing failed: {e}"), None, now);
                return Err(e);
            }
        };

        let result = serde_json::to_value(&outcome).unwrap_or(Value::Null);
        event.mark_completed(result.clone(), now);
        self.log(event, "INFO", "event processing completed", Some(result), now);
        info!(event_id = %event.event_id, "processed event");
        Ok(outcome)
    }

    /// Applies a batch of events in list order.
    ///
    /// Atomic at event granularity: when event `k` fails, events `0..k`
    /// remain applied (their statuses and logs stand) and the failure
    /// propagates.
    pub fn apply_events(
        &mut self,
        plan_id: &str,
        drafts: Vec<EventDraft>,
        policy: ProcessingPolicy,
        current_schedule: Option<&Schedule>,
        now: DateTime<Utc>,
    ) -> Result<EventApplication, PlanningError> {
        info!(plan_id, count = drafts.len(), "applying events");

        let mut scope = EventScope::default();
        let mut diff = ScheduleDiff::default();
        let mut outcomes = Vec::new();
        let mut total_delay_hours = 0.0;
        let mut requires_replan = false;

        for draft in drafts {
            let mut event = self.create_event(draft, now);
            let outcome = match self.process_event(&mut event, current_schedule, now) {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.processed_events.push(event);
                    return Err(e);
                }
            };
            scope.merge(&event.scope);

            for task_id in &outcome.affected_tasks {
                if !diff.affected_tasks.contains(task_id) {
                    diff.affected_tasks.push(task_id.clone());
                }
                if outcome.delay_hours > 0.0 {
                    diff.delays.push(TaskDelay {
                        task_id: task_id.clone(),
                        delay_hours: outcome.delay_hours,
                        reason: event.event_type.as_str().to_owned(),
                    });
                }
            }
            diff.resource_reallocation
                .extend(outcome.resource_reallocations.iter().cloned());

            if outcome.delay_hours > 0.0 {
                total_delay_hours += outcome.delay_hours;
            }
            requires_replan |= outcome.requires_replan;

            outcomes.push(outcome);
            self.processed_events.push(event);
        }

        let old_makespan_hours = current_schedule
            .map(|s| s.metrics.makespan_hours)
            .unwrap_or(DEFAULT_MAKESPAN_HOURS);
        let new_makespan_hours = old_makespan_hours + total_delay_hours;
        diff.makespan_change_hours = total_delay_hours;

        let uuid = crate::generate_id();
        Ok(EventApplication {
            plan_id: plan_id.to_owned(),
            request_id: format!("req-{}", &uuid[..8.min(uuid.len())]),
            policy,
            scope,
            diff,
            new_makespan: format_iso_duration(new_makespan_hours),
            new_makespan_hours,
            requires_replan,
            outcomes,
        })
    }

    fn validate_event(&self, event: &Event, now: DateTime<Utc>) -> Result<(), PlanningError> {
        if event.is_expired(now) {
            return Err(PlanningError::validation(format!(
                "event {} has expired",
                event.event_id
            )));
        }
        if !event.is_effective(now) {
            return Err(PlanningError::validation(format!(
                "event {} is not yet effective",
                event.event_id
            )));
        }
        Ok(())
    }

    fn dispatch(
        &self,
        event: &Event,
        current_schedule: Option<&Schedule>,
    ) -> Result<EventOutcome, PlanningError> {
        match event.event_type {
            EventType::EtaChange => self.process_eta_change(event, current_schedule),
            EventType::SapUpdate => self.process_sap_update(event),
            EventType::Weather => self.process_weather(event),
            EventType::ThirdPartyAck => self.process_third_party_ack(event),
            EventType::ResourceAvailable | EventType::ResourceUnavailable => {
                self.process_resource_status(event)
            }
            EventType::TaskComplete => Ok(EventOutcome {
                event_id: event.event_id.clone(),
                event_type: event.event_type,
                affected_tasks: event.scope.job_ids.iter().cloned().collect(),
                delay_hours: 0.0,
                requires_replan: false,
                impact_level: ImpactLevel::Low,
                resource_reallocations: Vec::new(),
            }),
            EventType::Emergency => Ok(EventOutcome {
                event_id: event.event_id.clone(),
                event_type: event.event_type,
                affected_tasks: event.scope.job_ids.iter().cloned().collect(),
                delay_hours: 0.0,
                requires_replan: true,
                impact_level: ImpactLevel::Critical,
                resource_reallocations: Vec::new(),
            }),
        }
    }

    // ── Per-type processors ───────────────────────────────────────────

    fn process_eta_change(
        &self,
        event: &Event,
        current_schedule: Option<&Schedule>,
    ) -> Result<EventOutcome, PlanningError> {
        let payload: EtaChangePayload = event.typed_payload()?;

        let mut affected_tasks: Vec<Id> = Vec::new();
        if let Some(schedule) = current_schedule {
            for interval in &schedule.task_intervals {
                let uses_resource = payload
                    .resource_id
                    .as_ref()
                    .is_some_and(|r| interval.assigned_resources.contains(r));
                let uses_material = payload.material_id.as_ref().is_some_and(|m| {
                    interval
                        .metadata
                        .get("required_materials")
                        .and_then(Value::as_array)
                        .map(|items| items.iter().filter_map(Value::as_str).any(|x| x == m))
                        .unwrap_or(false)
                });
                if uses_resource || uses_material {
                    affected_tasks.push(interval.task_id.clone());
                }
            }
        }

        let delay_hours = payload
            .old_eta
            .map(|old| (payload.new_eta - old).num_seconds() as f64 / 3600.0)
            .unwrap_or(0.0);

        let impact_level = if delay_hours > 4.0 {
            ImpactLevel::High
        } else if delay_hours > 1.0 {
            ImpactLevel::Medium
        } else {
            ImpactLevel::Low
        };

        Ok(EventOutcome {
            event_id: event.event_id.clone(),
            event_type: event.event_type,
            affected_tasks,
            delay_hours,
            requires_replan: delay_hours > 0.5,
            impact_level,
            resource_reallocations: Vec::new(),
        })
    }

    fn process_sap_update(&self, event: &Event) -> Result<EventOutcome, PlanningError> {
        let payload: SapUpdatePayload = event.typed_payload()?;

        let (requires_replan, impact_level) = match payload.new_status.as_str() {
            "approved" | "released" => (true, ImpactLevel::Medium),
            "rejected" | "cancelled" => (true, ImpactLevel::High),
            _ => (false, ImpactLevel::Low),
        };

        Ok(EventOutcome {
            event_id: event.event_id.clone(),
            event_type: event.event_type,
            affected_tasks: event.scope.job_ids.iter().cloned().collect(),
            delay_hours: 0.0,
            requires_replan,
            impact_level,
            resource_reallocations: Vec::new(),
        })
    }

    fn process_weather(&self, event: &Event) -> Result<EventOutcome, PlanningError> {
        let payload: WeatherPayload = event.typed_payload()?;

        let requires_replan = matches!(payload.severity.as_str(), "high" | "critical");
        let impact_level = match payload.severity.as_str() {
            "critical" => ImpactLevel::Critical,
            "high" => ImpactLevel::High,
            "medium" => ImpactLevel::Medium,
            _ => ImpactLevel::Low,
        };

        let mut resource_reallocations = Vec::new();
        if matches!(
            payload.weather_type.as_str(),
            "typhoon" | "storm" | "heavy_rain"
        ) {
            let mut cranes: Vec<&str> = Vec::new();
            if payload.affected_areas.iter().any(|a| a == "outdoor_area") {
                cranes.extend(["CRANE-1", "CRANE-2"]);
            }
            if payload.affected_areas.iter().any(|a| a == "crane_zone") {
                cranes.extend(["CRANE-3", "CRANE-4"]);
            }
            for crane in cranes {
                resource_reallocations.push(ReallocationEntry {
                    resource_id: crane.to_owned(),
                    task_id: None,
                    action: "unavailable".into(),
                    start_time: Some(payload.start_time),
                    end_time: payload.end_time,
                });
            }
        }

        if requires_replan {
            warn!(
                weather = %payload.weather_type,
                severity = %payload.severity,
                "severe weather event"
            );
        }

        Ok(EventOutcome {
            event_id: event.event_id.clone(),
            event_type: event.event_type,
            affected_tasks: event.scope.job_ids.iter().cloned().collect(),
            delay_hours: 0.0,
            requires_replan,
            impact_level,
            resource_reallocations,
        })
    }

    fn process_third_party_ack(&self, event: &Event) -> Result<EventOutcome, PlanningError> {
        let payload: ThirdPartyAckPayload = event.typed_payload()?;
        Ok(EventOutcome {
            event_id: event.event_id.clone(),
            event_type: event.event_type,
            affected_tasks: event.scope.job_ids.iter().cloned().collect(),
            delay_hours: 0.0,
            requires_replan: false,
            impact_level: if payload.acknowledged {
                ImpactLevel::Low
            } else {
                ImpactLevel::Medium
            },
            resource_reallocations: Vec::new(),
        })
    }

    fn process_resource_status(&self, event: &Event) -> Result<EventOutcome, PlanningError> {
        let payload: ResourceStatusPayload = event.typed_payload()?;
        let action = if payload.available {
            "available"
        } else {
            "unavailable"
        };
        Ok(EventOutcome {
            event_id: event.event_id.clone(),
            event_type: event.event_type,
            affected_tasks: event.scope.job_ids.iter().cloned().collect(),
            delay_hours: 0.0,
            requires_replan: !payload.available,
            impact_level: if payload.available {
                ImpactLevel::Low
            } else {
                ImpactLevel::Medium
            },
            resource_reallocations: vec![ReallocationEntry {
                resource_id: payload.resource_id,
                task_id: None,
                action: action.into(),
                start_time: Some(payload.from),
                end_time: payload.until,
            }],
        })
    }

    fn log(
        &mut self,
        event: &Event,
        level: &str,
        message: &str,
        detail: Option<Value>,
        now: DateTime<Utc>,
    ) {
        self.logs.push(EventLog {
            event_id: event.event_id.clone(),
            level: level.to_owned(),
            message: message.to_owned(),
            detail,
            logged_at: now,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::{EventPriority, EventStatus};
    use crate::domain::schedule::{IntervalType, ScheduleMetrics, TaskInterval};
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()
    }

    fn draft(event_type: EventType, payload: Value) -> EventDraft {
        EventDraft {
            event_type,
            title: "test event".into(),
            description: None,
            effective_time: now(),
            expires_at: None,
            priority: EventPriority::Medium,
            scope: EventScope::default(),
            policy: ProcessingPolicy::ReplanUnstarted,
            payload,
            source: None,
            correlation_id: None,
        }
    }

    fn schedule_with_j1() -> Schedule {
        let mut metadata = BTreeMap::new();
        metadata.insert("required_materials".to_owned(), serde_json::json!(["M1"]));
        Schedule {
            plan_id: "PLAN-1".into(),
            name: None,
            plan_start_time: now(),
            plan_end_time: now() + chrono::Duration::hours(8),
            task_intervals: vec![TaskInterval {
                task_id: "J1".into(),
                task_type: IntervalType::Job,
                start_time: now() + chrono::Duration::hours(3),
                end_time: now() + chrono::Duration::hours(5),
                duration_hours: 2.0,
                task_name: None,
                work_package_id: None,
                engine_id: None,
                status: Default::default(),
                assigned_resources: vec!["EMP-1".into()],
                assigned_personnel: vec!["EMP-1".into()],
                is_critical_path: false,
                is_fixed: false,
                buffer_before_hours: 0.0,
                buffer_after_hours: 0.0,
                metadata,
            }],
            resource_allocations: Vec::new(),
            gates: Vec::new(),
            metrics: ScheduleMetrics {
                makespan_hours: 8.0,
                ..Default::default()
            },
            critical_path: Vec::new(),
            is_feasible: true,
            is_optimal: false,
            solver_config: Value::Null,
            metadata: BTreeMap::new(),
        }
    }

    fn eta_slip_payload() -> Value {
        serde_json::json!({
            "material_id": "M1",
            "old_eta": "2026-03-02T14:00:00Z",
            "new_eta": "2026-03-02T18:00:00Z",
        })
    }

    // ── ETA change ────────────────────────────────────────────────────

    #[test]
    fn eta_slip_affects_consuming_task() {
        let mut service = EventService::new();
        let schedule = schedule_with_j1();
        let application = service
            .apply_events(
                "PLAN-1",
                vec![draft(EventType::EtaChange, eta_slip_payload())],
                ProcessingPolicy::ReplanUnstarted,
                Some(&schedule),
                now(),
            )
            .unwrap();

        assert!(application
            .diff
            .affected_tasks
            .contains(&"J1".to_string()));
        let delay = &application.diff.delays[0];
        assert_eq!(delay.task_id, "J1");
        assert!((delay.delay_hours - 4.0).abs() < 1e-9);
        assert!(application.requires_replan);
        // 8h plan slips by 4h.
        assert!(application.new_makespan_hours > schedule.metrics.makespan_hours);
        assert_eq!(application.new_makespan, "PT12H");
    }

    #[test]
    fn eta_impact_levels() {
        let mut service = EventService::new();
        let small_slip = serde_json::json!({
            "material_id": "M1",
            "old_eta": "2026-03-02T14:00:00Z",
            "new_eta": "2026-03-02T14:30:00Z",
        });
        let mut event = service.create_event(draft(EventType::EtaChange, small_slip), now());
        let outcome = service.process_event(&mut event, None, now()).unwrap();
        assert_eq!(outcome.impact_level, ImpactLevel::Low);
        assert!(!outcome.requires_replan);

        let big_slip = serde_json::json!({
            "resource_id": "CRANE-1",
            "old_eta": "2026-03-02T14:00:00Z",
            "new_eta": "2026-03-02T20:00:00Z",
        });
        let mut event = service.create_event(draft(EventType::EtaChange, big_slip), now());
        let outcome = service.process_event(&mut event, None, now()).unwrap();
        assert_eq!(outcome.impact_level, ImpactLevel::High);
        assert!(outcome.requires_replan);
    }

    #[test]
    fn eta_by_resource_matches_assigned_resources() {
        let mut service = EventService::new();
        let schedule = schedule_with_j1();
        let payload = serde_json::json!({
            "resource_id": "EMP-1",
            "old_eta": "2026-03-02T14:00:00Z",
            "new_eta": "2026-03-02T16:00:00Z",
        });
        let mut event = service.create_event(draft(EventType::EtaChange, payload), now());
        let outcome = service
            .process_event(&mut event, Some(&schedule), now())
            .unwrap();
        assert_eq!(outcome.affected_tasks, vec!["J1".to_string()]);
    }

    // ── SAP updates ───────────────────────────────────────────────────

    #[test]
    fn sap_status_transitions() {
        let mut service = EventService::new();
        for (status, replan, impact) in [
            ("approved", true, ImpactLevel::Medium),
            ("released", true, ImpactLevel::Medium),
            ("rejected", true, ImpactLevel::High),
            ("cancelled", true, ImpactLevel::High),
            ("draft", false, ImpactLevel::Low),
        ] {
            let payload = serde_json::json!({
                "instruction_id": "SAP-1",
                "new_status": status,
                "update_time": "2026-03-02T11:00:00Z",
            });
            let mut event = service.create_event(draft(EventType::SapUpdate, payload), now());
            let outcome = service.process_event(&mut event, None, now()).unwrap();
            assert_eq!(outcome.requires_replan, replan, "status {status}");
            assert_eq!(outcome.impact_level, impact, "status {status}");
        }
    }

    // ── Weather ───────────────────────────────────────────────────────

    #[test]
    fn typhoon_grounds_outdoor_cranes() {
        let mut service = EventService::new();
        let payload = serde_json::json!({
            "weather_type": "typhoon",
            "severity": "critical",
            "start_time": "2026-03-02T12:00:00Z",
            "end_time": "2026-03-03T00:00:00Z",
            "affected_areas": ["outdoor_area", "crane_zone"],
        });
        let mut event = service.create_event(draft(EventType::Weather, payload), now());
        let outcome = service.process_event(&mut event, None, now()).unwrap();

        assert!(outcome.requires_replan);
        assert_eq!(outcome.impact_level, ImpactLevel::Critical);
        let grounded: Vec<&str> = outcome
            .resource_reallocations
            .iter()
            .map(|r| r.resource_id.as_str())
            .collect();
        assert_eq!(grounded, vec!["CRANE-1", "CRANE-2", "CRANE-3", "CRANE-4"]);
        assert!(outcome
            .resource_reallocations
            .iter()
            .all(|r| r.action == "unavailable"));
    }

    #[test]
    fn light_rain_needs_no_replan() {
        let mut service = EventService::new();
        let payload = serde_json::json!({
            "weather_type": "heavy_rain",
            "severity": "low",
            "start_time": "2026-03-02T12:00:00Z",
            "affected_areas": ["outdoor_area"],
        });
        let mut event = service.create_event(draft(EventType::Weather, payload), now());
        let outcome = service.process_event(&mut event, None, now()).unwrap();
        assert!(!outcome.requires_replan);
    }

    // ── Validation ────────────────────────────────────────────────────

    #[test]
    fn expired_event_is_rejected() {
        let mut service = EventService::new();
        let mut d = draft(EventType::EtaChange, eta_slip_payload());
        d.expires_at = Some(now() - chrono::Duration::hours(1));
        let mut event = service.create_event(d, now());
        let err = service.process_event(&mut event, None, now()).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert_eq!(event.status, EventStatus::Failed);
    }

    #[test]
    fn future_event_is_rejected() {
        let mut service = EventService::new();
        let mut d = draft(EventType::EtaChange, eta_slip_payload());
        d.effective_time = now() + chrono::Duration::hours(1);
        let mut event = service.create_event(d, now());
        assert!(service.process_event(&mut event, None, now()).is_err());
    }

    #[test]
    fn malformed_payload_marks_event_failed() {
        let mut service = EventService::new();
        let mut event = service.create_event(
            draft(EventType::EtaChange, serde_json::json!({"bogus": true})),
            now(),
        );
        let err = service.process_event(&mut event, None, now()).unwrap_err();
        assert_eq!(err.code(), "EVENT_PROCESSING_ERROR");
        assert_eq!(event.status, EventStatus::Failed);
        assert!(event.error_message.is_some());
    }

    // ── Batch application ─────────────────────────────────────────────

    #[test]
    fn batch_failure_keeps_earlier_events_applied() {
        let mut service = EventService::new();
        let schedule = schedule_with_j1();
        let good = draft(EventType::EtaChange, eta_slip_payload());
        let bad = draft(EventType::EtaChange, serde_json::json!({"bogus": true}));

        let result = service.apply_events(
            "PLAN-1",
            vec![good, bad],
            ProcessingPolicy::ReplanUnstarted,
            Some(&schedule),
            now(),
        );
        assert!(result.is_err());

        // First event completed, second failed; both are retained.
        assert_eq!(service.processed_events().len(), 2);
        assert_eq!(
            service.processed_events()[0].status,
            EventStatus::Completed
        );
        assert_eq!(service.processed_events()[1].status, EventStatus::Failed);
    }

    #[test]
    fn batch_accumulates_scope_in_order() {
        let mut service = EventService::new();
        let schedule = schedule_with_j1();
        let mut sap = draft(
            EventType::SapUpdate,
            serde_json::json!({
                "instruction_id": "SAP-1",
                "new_status": "approved",
                "update_time": "2026-03-02T11:00:00Z",
            }),
        );
        sap.scope.job_ids.insert("J9".into());
        let events = vec![draft(EventType::EtaChange, eta_slip_payload()), sap];
        let application = service
            .apply_events(
                "PLAN-1",
                events,
                ProcessingPolicy::ReplanUnstarted,
                Some(&schedule),
                now(),
            )
            .unwrap();

        assert_eq!(application.outcomes.len(), 2);
        assert!(application.requires_replan);
        assert!(application.request_id.starts_with("req-"));
        assert!(application.scope.job_ids.contains("J9"));
        assert_eq!(service.logs().iter().filter(|l| l.level == "INFO").count(), 4);
    }

    #[test]
    fn manual_review_policy_is_echoed() {
        let mut service = EventService::new();
        let application = service
            .apply_events(
                "PLAN-1",
                vec![draft(EventType::EtaChange, eta_slip_payload())],
                ProcessingPolicy::ManualReview,
                None,
                now(),
            )
            .unwrap();
        assert_eq!(application.policy, ProcessingPolicy::ManualReview);
    }
}
