//! Per-type gate evaluation and aggregate readiness.
//!
//! Gate evaluation is pure over its inputs: checking the same context twice
//! yields identical results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::domain::material::{MaterialItem, ToolAsset};
use crate::domain::preparation::{PrepTaskType, PreparationTask, TaskStatus};
use crate::error::PlanningError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateType {
    CriticalToolsReady,
    MaterialsReady,
    DocReady,
    AssessmentComplete,
    QecShelfHandover,
    InventoryCheck,
    SapInstruction,
}

impl GateType {
    pub const ALL: [GateType; 7] = [
        GateType::CriticalToolsReady,
        GateType::MaterialsReady,
        GateType::DocReady,
        GateType::AssessmentComplete,
        GateType::QecShelfHandover,
        GateType::InventoryCheck,
        GateType::SapInstruction,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CriticalToolsReady => "critical_tools_ready",
            Self::MaterialsReady => "materials_ready",
            Self::DocReady => "doc_ready",
            Self::AssessmentComplete => "assessment_complete",
            Self::QecShelfHandover => "qec_shelf_handover",
            Self::InventoryCheck => "inventory_check",
            Self::SapInstruction => "sap_instruction",
        }
    }

    /// Gates whose failure always counts as a high SLA risk.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::CriticalToolsReady | Self::MaterialsReady)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Pending,
    Checking,
    Passed,
    Failed,
    Blocked,
}

/// Outcome of one gate check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateCheckResult {
    pub gate_type: GateType,
    pub status: GateStatus,
    pub passed_conditions: Vec<String>,
    pub failed_conditions: Vec<String>,
    pub required_actions: Vec<String>,
}

impl GateCheckResult {
    pub fn passed(&self) -> bool {
        self.status == GateStatus::Passed
    }
}

/// One high-risk entry in the summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaRisk {
    pub gate: String,
    pub risk: String,
    pub failed_conditions: Vec<String>,
}

/// Aggregate readiness across all gates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateSummary {
    pub total_gates: usize,
    pub passed_gates: usize,
    pub gate_pass_rate: f64,
    pub sla_risks: Vec<SlaRisk>,
    pub required_actions: Vec<String>,
    pub overall_status: GateStatus,
}

/// The state a gate check reads.
#[derive(Debug, Clone, Default)]
pub struct GateContext<'a> {
    pub tools: &'a [ToolAsset],
    pub materials: &'a [MaterialItem],
    pub preparation_tasks: &'a [PreparationTask],
}

/// Handover confirmation payload: all three fields are mandatory.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HandoverConfirmation {
    pub handover_form: Value,
    pub photo: Value,
    pub signature: HandoverSignature,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HandoverSignature {
    pub by: String,
    pub time: DateTime<Utc>,
}

/// Evaluates preparation gates against current state.
#[derive(Debug, Default)]
pub struct GateService;

impl GateService {
    pub fn new() -> Self {
        Self
    }

    /// Checks a single gate.
    pub fn check_gate(&self, gate_type: GateType, ctx: &GateContext<'_>) -> GateCheckResult {
        debug!(gate = gate_type.as_str(), "checking gate");
        match gate_type {
            GateType::CriticalToolsReady => self.check_critical_tools(ctx),
            GateType::MaterialsReady => self.check_materials(ctx),
            GateType::DocReady => self.check_prep_completion(ctx, GateType::DocReady, PrepTaskType::DocReady),
            GateType::AssessmentComplete => {
                self.check_prep_completion(ctx, GateType::AssessmentComplete, PrepTaskType::Assessment)
            }
            GateType::QecShelfHandover => self.check_shelf_handover(ctx),
            // Placeholder gates pass unconditionally until their upstream
            // integrations land.
            GateType::InventoryCheck | GateType::SapInstruction => GateCheckResult {
                gate_type,
                status: GateStatus::Passed,
                passed_conditions: vec!["no blocking condition".into()],
                failed_conditions: Vec::new(),
                required_actions: Vec::new(),
            },
        }
    }

    /// Checks every gate type; a single failing check does not abort the
    /// sweep.
    pub fn check_all_gates(&self, ctx: &GateContext<'_>) -> Vec<GateCheckResult> {
        GateType::ALL
            .iter()
            .map(|gate_type| self.check_gate(*gate_type, ctx))
            .collect()
    }

    /// Aggregates check results into a pass-rate and risk report.
    pub fn summarize(&self, results: &[GateCheckResult]) -> GateSummary {
        let total_gates = results.len();
        let passed_gates = results.iter().filter(|r| r.passed()).count();
        let gate_pass_rate = if total_gates == 0 {
            0.0
        } else {
            passed_gates as f64 / total_gates as f64
        };

        let sla_risks = results
            .iter()
            .filter(|r| r.status == GateStatus::Failed && r.gate_type.is_critical())
            .map(|r| SlaRisk {
                gate: r.gate_type.as_str().to_owned(),
                risk: "high".into(),
                failed_conditions: r.failed_conditions.clone(),
            })
            .collect();

        let mut required_actions: Vec<String> = Vec::new();
        for result in results {
            for action in &result.required_actions {
                if !required_actions.contains(action) {
                    required_actions.push(action.clone());
                }
            }
        }

        let overall_status = if passed_gates == total_gates {
            GateStatus::Passed
        } else if results.iter().any(|r| r.status == GateStatus::Failed) {
            GateStatus::Failed
        } else {
            GateStatus::Pending
        };

        GateSummary {
            total_gates,
            passed_gates,
            gate_pass_rate,
            sla_risks,
            required_actions,
            overall_status,
        }
    }

    /// Validates a handover confirmation and flips the gate conditions of
    /// the matching shelf-handover preparation task.
    ///
    /// # Errors
    ///
    /// `Validation` when any of `handover_form`, `photo`, or a complete
    /// `signature` is missing; `Gate` when the task carries no gate record.
    pub fn confirm_handover(
        &self,
        task: &mut PreparationTask,
        confirmation: &Value,
        now: DateTime<Utc>,
    ) -> Result<(), PlanningError> {
        let confirmation: HandoverConfirmation = serde_json::from_value(confirmation.clone())
            .map_err(|e| PlanningError::Validation {
                message: format!("incomplete handover confirmation: {e}"),
                details: None,
            })?;
        if confirmation.handover_form.is_null() || confirmation.photo.is_null() {
            return Err(PlanningError::validation(
                "handover confirmation requires handover_form and photo",
            ));
        }
        if confirmation.signature.by.is_empty() {
            return Err(PlanningError::validation(
                "handover confirmation requires a signatory",
            ));
        }

        let gate = task.gate.as_mut().ok_or_else(|| PlanningError::Gate {
            message: format!("preparation task {} carries no gate", task.prep_id),
            gate_type: Some(GateType::QecShelfHandover.as_str().to_owned()),
        })?;
        gate.set_condition("task_complete", true, now);
        gate.set_condition("evidence_complete", true, now);
        Ok(())
    }

    // ── Per-type checks ───────────────────────────────────────────────

    fn check_critical_tools(&self, ctx: &GateContext<'_>) -> GateCheckResult {
        let mut passed_conditions = Vec::new();
        let mut failed_conditions = Vec::new();
        let mut required_actions = Vec::new();

        for tool in ctx.tools.iter().filter(|t| t.is_critical) {
            if tool.is_ready && tool.is_allocated {
                passed_conditions.push(format!("critical tool {} ready", tool.asset_id));
            } else {
                failed_conditions.push(format!("critical tool {} not ready", tool.asset_id));
                required_actions.push(format!("allocate and prepare tool {}", tool.asset_id));
            }
        }

        let status = if failed_conditions.is_empty() {
            GateStatus::Passed
        } else {
            GateStatus::Failed
        };
        GateCheckResult {
            gate_type: GateType::CriticalToolsReady,
            status,
            passed_conditions,
            failed_conditions,
            required_actions,
        }
    }

    fn check_materials(&self, ctx: &GateContext<'_>) -> GateCheckResult {
        let mut passed_conditions = Vec::new();
        let mut failed_conditions = Vec::new();
        let mut required_actions = Vec::new();

        for material in ctx.materials.iter().filter(|m| m.must_kit) {
            if material.is_sufficient() {
                passed_conditions.push(format!("material {} kitted", material.material_id));
            } else {
                failed_conditions.push(format!(
                    "material {} short: {}/{}",
                    material.material_id, material.available_quantity, material.required_quantity
                ));
                required_actions.push(format!("expedite material {}", material.material_id));
            }
        }

        // Partial-consumption materials are informational only: any stock on
        // hand is reported, and they never fail the gate.
        for material in ctx
            .materials
            .iter()
            .filter(|m| m.allow_partial && !m.must_kit)
        {
            if material.available_quantity > 0 {
                passed_conditions.push(format!(
                    "partial material {} available",
                    material.material_id
                ));
            }
        }

        let status = if failed_conditions.is_empty() {
            GateStatus::Passed
        } else {
            GateStatus::Failed
        };
        GateCheckResult {
            gate_type: GateType::MaterialsReady,
            status,
            passed_conditions,
            failed_conditions,
            required_actions,
        }
    }

    fn check_prep_completion(
        &self,
        ctx: &GateContext<'_>,
        gate_type: GateType,
        task_type: PrepTaskType,
    ) -> GateCheckResult {
        let mut passed_conditions = Vec::new();
        let mut failed_conditions = Vec::new();
        let mut required_actions = Vec::new();

        for task in ctx
            .preparation_tasks
            .iter()
            .filter(|t| t.task_type == task_type)
        {
            if task.status == TaskStatus::Completed {
                passed_conditions.push(format!("{} complete", task.prep_id));
            } else {
                failed_conditions.push(format!("{} not complete", task.prep_id));
                required_actions.push(format!("complete preparation task {}", task.prep_id));
            }
        }

        let status = if failed_conditions.is_empty() {
            GateStatus::Passed
        } else {
            GateStatus::Failed
        };
        GateCheckResult {
            gate_type,
            status,
            passed_conditions,
            failed_conditions,
            required_actions,
        }
    }

    fn check_shelf_handover(&self, ctx: &GateContext<'_>) -> GateCheckResult {
        let mut passed_conditions = Vec::new();
        let mut failed_conditions = Vec::new();
        let mut required_actions = Vec::new();

        for material in ctx
            .materials
            .iter()
            .filter(|m| m.qec_shelf_slot.is_some())
        {
            if material.shelf_assigned_at.is_some() {
                passed_conditions.push(format!("material {} on shelf", material.material_id));
            } else {
                failed_conditions.push(format!("material {} not handed over", material.material_id));
                required_actions.push(format!(
                    "confirm shelf handover for material {}",
                    material.material_id
                ));
            }
        }

        let status = if failed_conditions.is_empty() {
            GateStatus::Passed
        } else {
            GateStatus::Failed
        };
        GateCheckResult {
            gate_type: GateType::QecShelfHandover,
            status,
            passed_conditions,
            failed_conditions,
            required_actions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn ready_tool(id: &str) -> ToolAsset {
        let mut tool = ToolAsset::new(id).critical().ready();
        tool.is_allocated = true;
        tool
    }

    // ── Critical tools gate ───────────────────────────────────────────

    #[test]
    fn no_critical_tools_passes() {
        let service = GateService::new();
        let tools = [ToolAsset::new("HOIST-1")]; // not critical
        let ctx = GateContext {
            tools: &tools,
            ..Default::default()
        };
        let result = service.check_gate(GateType::CriticalToolsReady, &ctx);
        assert_eq!(result.status, GateStatus::Passed);
    }

    #[test]
    fn unready_critical_tool_fails_with_action() {
        let service = GateService::new();
        let tools = [ToolAsset::new("HOIST-1").critical()];
        let ctx = GateContext {
            tools: &tools,
            ..Default::default()
        };
        let result = service.check_gate(GateType::CriticalToolsReady, &ctx);
        assert_eq!(result.status, GateStatus::Failed);
        assert_eq!(result.required_actions.len(), 1);
        assert!(result.required_actions[0].contains("HOIST-1"));
    }

    #[test]
    fn ready_allocated_critical_tool_passes() {
        let service = GateService::new();
        let tools = [ready_tool("HOIST-1")];
        let ctx = GateContext {
            tools: &tools,
            ..Default::default()
        };
        let result = service.check_gate(GateType::CriticalToolsReady, &ctx);
        assert_eq!(result.status, GateStatus::Passed);
    }

    // ── Materials gate ────────────────────────────────────────────────

    #[test]
    fn short_kitted_material_fails() {
        let service = GateService::new();
        let materials = [MaterialItem::new("M1", 4).kitted().with_available(2)];
        let ctx = GateContext {
            materials: &materials,
            ..Default::default()
        };
        let result = service.check_gate(GateType::MaterialsReady, &ctx);
        assert_eq!(result.status, GateStatus::Failed);
        assert!(result.failed_conditions[0].contains("2/4"));
    }

    #[test]
    fn loose_materials_are_ignored_by_materials_gate() {
        let service = GateService::new();
        let materials = [MaterialItem::new("M1", 4)]; // not must_kit
        let ctx = GateContext {
            materials: &materials,
            ..Default::default()
        };
        let result = service.check_gate(GateType::MaterialsReady, &ctx);
        assert_eq!(result.status, GateStatus::Passed);
        assert!(result.passed_conditions.is_empty());
    }

    #[test]
    fn partial_material_with_stock_is_reported() {
        let service = GateService::new();
        let mut partial = MaterialItem::new("M2", 4).with_available(1);
        partial.allow_partial = true;
        let empty_partial = {
            let mut m = MaterialItem::new("M3", 4);
            m.allow_partial = true;
            m
        };
        let materials = [partial, empty_partial];
        let ctx = GateContext {
            materials: &materials,
            ..Default::default()
        };
        let result = service.check_gate(GateType::MaterialsReady, &ctx);
        assert_eq!(result.status, GateStatus::Passed);
        assert_eq!(result.passed_conditions.len(), 1);
        assert!(result.passed_conditions[0].contains("M2"));
    }

    #[test]
    fn partial_material_never_rescues_a_failed_gate() {
        let service = GateService::new();
        let mut partial = MaterialItem::new("M2", 4).with_available(1);
        partial.allow_partial = true;
        let materials = [
            MaterialItem::new("M1", 4).kitted().with_available(2),
            partial,
        ];
        let ctx = GateContext {
            materials: &materials,
            ..Default::default()
        };
        let result = service.check_gate(GateType::MaterialsReady, &ctx);
        assert_eq!(result.status, GateStatus::Failed);
        assert!(result
            .passed_conditions
            .iter()
            .any(|c| c.contains("M2")));
    }

    // ── Prep-completion gates ─────────────────────────────────────────

    #[test]
    fn doc_ready_requires_completed_tasks() {
        let service = GateService::new();
        let mut task =
            PreparationTask::new("PREP-DOC", "ENG-1", "WP-1", PrepTaskType::DocReady, 1.0);
        let tasks = [task.clone()];
        let ctx = GateContext {
            preparation_tasks: &tasks,
            ..Default::default()
        };
        assert_eq!(
            service.check_gate(GateType::DocReady, &ctx).status,
            GateStatus::Failed
        );

        task.status = TaskStatus::Completed;
        let tasks = [task];
        let ctx = GateContext {
            preparation_tasks: &tasks,
            ..Default::default()
        };
        assert_eq!(
            service.check_gate(GateType::DocReady, &ctx).status,
            GateStatus::Passed
        );
    }

    // ── Shelf handover gate ───────────────────────────────────────────

    #[test]
    fn shelf_slot_without_assignment_fails() {
        let service = GateService::new();
        let mut material = MaterialItem::new("M1", 1);
        material.qec_shelf_slot = Some("S-01".into());
        let materials = [material.clone()];
        let ctx = GateContext {
            materials: &materials,
            ..Default::default()
        };
        assert_eq!(
            service.check_gate(GateType::QecShelfHandover, &ctx).status,
            GateStatus::Failed
        );

        material.shelf_assigned_at = Some(now());
        let materials = [material];
        let ctx = GateContext {
            materials: &materials,
            ..Default::default()
        };
        assert_eq!(
            service.check_gate(GateType::QecShelfHandover, &ctx).status,
            GateStatus::Passed
        );
    }

    // ── Placeholders ──────────────────────────────────────────────────

    #[test]
    fn placeholder_gates_pass() {
        let service = GateService::new();
        let ctx = GateContext::default();
        assert_eq!(
            service.check_gate(GateType::InventoryCheck, &ctx).status,
            GateStatus::Passed
        );
        assert_eq!(
            service.check_gate(GateType::SapInstruction, &ctx).status,
            GateStatus::Passed
        );
    }

    // ── Idempotence ───────────────────────────────────────────────────

    #[test]
    fn evaluation_is_idempotent() {
        let service = GateService::new();
        let tools = [ToolAsset::new("HOIST-1").critical()];
        let materials = [MaterialItem::new("M1", 4).kitted().with_available(2)];
        let ctx = GateContext {
            tools: &tools,
            materials: &materials,
            ..Default::default()
        };
        let first = service.check_all_gates(&ctx);
        let second = service.check_all_gates(&ctx);
        assert_eq!(first, second);
    }

    // ── Summary ───────────────────────────────────────────────────────

    #[test]
    fn summary_counts_and_risks() {
        let service = GateService::new();
        // Scenario from the acceptance suite: three passes, one critical
        // failure, one pending.
        let results = vec![
            GateCheckResult {
                gate_type: GateType::MaterialsReady,
                status: GateStatus::Passed,
                passed_conditions: vec![],
                failed_conditions: vec![],
                required_actions: vec![],
            },
            GateCheckResult {
                gate_type: GateType::DocReady,
                status: GateStatus::Passed,
                passed_conditions: vec![],
                failed_conditions: vec![],
                required_actions: vec![],
            },
            GateCheckResult {
                gate_type: GateType::SapInstruction,
                status: GateStatus::Passed,
                passed_conditions: vec![],
                failed_conditions: vec![],
                required_actions: vec![],
            },
            GateCheckResult {
                gate_type: GateType::CriticalToolsReady,
                status: GateStatus::Failed,
                passed_conditions: vec![],
                failed_conditions: vec!["critical tool HOIST-1 not ready".into()],
                required_actions: vec!["allocate and prepare tool HOIST-1".into()],
            },
            GateCheckResult {
                gate_type: GateType::InventoryCheck,
                status: GateStatus::Pending,
                passed_conditions: vec![],
                failed_conditions: vec![],
                required_actions: vec![],
            },
        ];

        let summary = service.summarize(&results);
        assert_eq!(summary.total_gates, 5);
        assert_eq!(summary.passed_gates, 3);
        assert!((summary.gate_pass_rate - 0.6).abs() < 1e-9);
        assert_eq!(summary.sla_risks.len(), 1);
        assert_eq!(summary.sla_risks[0].gate, "critical_tools_ready");
        assert_eq!(summary.sla_risks[0].risk, "high");
        assert!(summary
            .required_actions
            .iter()
            .any(|a| a.contains("HOIST-1")));
        assert_eq!(summary.overall_status, GateStatus::Failed);
    }

    #[test]
    fn summary_deduplicates_actions() {
        let service = GateService::new();
        let result = GateCheckResult {
            gate_type: GateType::MaterialsReady,
            status: GateStatus::Failed,
            passed_conditions: vec![],
            failed_conditions: vec![],
            required_actions: vec!["expedite material M1".into()],
        };
        let summary = service.summarize(&[result.clone(), result]);
        assert_eq!(summary.required_actions.len(), 1);
    }

    // ── Handover confirmation ─────────────────────────────────────────

    fn handover_task() -> PreparationTask {
        PreparationTask::new("PREP-SH", "ENG-1", "WP-1", PrepTaskType::ShelfHandover, 0.5)
            .gated(["task_complete", "evidence_complete"])
    }

    #[test]
    fn complete_confirmation_flips_gate() {
        let service = GateService::new();
        let mut task = handover_task();
        let confirmation = serde_json::json!({
            "handover_form": {"id": "HF-1"},
            "photo": "photo://shelf.jpg",
            "signature": {"by": "EMP-1", "time": "2026-03-02T09:00:00Z"},
        });
        service
            .confirm_handover(&mut task, &confirmation, now())
            .unwrap();
        let gate = task.gate.as_ref().unwrap();
        assert!(gate.is_passed());
        assert!(gate.passed_at.is_some());
    }

    #[test]
    fn missing_signature_is_rejected() {
        let service = GateService::new();
        let mut task = handover_task();
        let confirmation = serde_json::json!({
            "handover_form": {"id": "HF-1"},
            "photo": "photo://shelf.jpg",
        });
        let err = service
            .confirm_handover(&mut task, &confirmation, now())
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn null_photo_is_rejected() {
        let service = GateService::new();
        let mut task = handover_task();
        let confirmation = serde_json::json!({
            "handover_form": {"id": "HF-1"},
            "photo": null,
            "signature": {"by": "EMP-1", "time": "2026-03-02T09:00:00Z"},
        });
        assert!(service
            .confirm_handover(&mut task, &confirmation, now())
            .is_err());
    }

    #[test]
    fn gateless_task_is_a_gate_error() {
        let service = GateService::new();
        let mut task =
            PreparationTask::new("PREP-X", "ENG-1", "WP-1", PrepTaskType::ShelfHandover, 0.5);
        let confirmation = serde_json::json!({
            "handover_form": {},
            "photo": "p",
            "signature": {"by": "EMP-1", "time": "2026-03-02T09:00:00Z"},
        });
        let err = service
            .confirm_handover(&mut task, &confirmation, now())
            .unwrap_err();
        assert_eq!(err.code(), "GATE_ERROR");
    }
}
