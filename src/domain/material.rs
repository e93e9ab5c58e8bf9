//! Kitted materials and exclusively-allocated tool assets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PlanningError;
use crate::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// A material line item attached to a work package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialItem {
    pub material_id: Id,
    pub name: String,
    pub required_quantity: u32,
    pub available_quantity: u32,
    /// Must be fully kitted before work starts.
    pub must_kit: bool,
    /// Partial availability is acceptable for non-kitted consumption.
    pub allow_partial: bool,
    pub eta: Option<DateTime<Utc>>,
    pub actual_arrival: Option<DateTime<Utc>>,
    pub qec_shelf_slot: Option<String>,
    pub shelf_assigned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub criticality: Criticality,
}

impl MaterialItem {
    pub fn new(material_id: impl Into<Id>, required_quantity: u32) -> Self {
        let material_id = material_id.into();
        Self {
            name: material_id.clone(),
            material_id,
            required_quantity,
            available_quantity: 0,
            must_kit: false,
            allow_partial: false,
            eta: None,
            actual_arrival: None,
            qec_shelf_slot: None,
            shelf_assigned_at: None,
            criticality: Criticality::default(),
        }
    }

    pub fn with_available(mut self, available: u32) -> Self {
        self.available_quantity = available;
        self
    }

    pub fn kitted(mut self) -> Self {
        self.must_kit = true;
        self
    }

    /// Kitted materials need the full quantity on hand; others need any
    /// stock at all.
    pub fn is_sufficient(&self) -> bool {
        if self.must_kit {
            self.available_quantity >= self.required_quantity
        } else {
            self.available_quantity > 0
        }
    }

    pub fn validate(&self) -> Result<(), PlanningError> {
        if self.required_quantity < 1 {
            return Err(PlanningError::validation(format!(
                "material {}: required_quantity must be at least 1",
                self.material_id
            )));
        }
        if self.available_quantity > self.required_quantity {
            return Err(PlanningError::validation(format!(
                "material {}: available_quantity {} exceeds required_quantity {}",
                self.material_id, self.available_quantity, self.required_quantity
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssetCategory {
    Hoist,
    Sling,
    Stand,
    #[default]
    Other,
}

/// An exclusively-allocated tool (hoist, sling, stand).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolAsset {
    pub asset_id: Id,
    pub name: String,
    #[serde(default)]
    pub category: AssetCategory,
    pub is_critical: bool,
    pub is_ready: bool,
    pub is_allocated: bool,
    pub allocation_eta: Option<DateTime<Utc>>,
    pub allocated_at: Option<DateTime<Utc>>,
    pub operator: Option<Id>,
    pub exclusive_group: Option<String>,
}

impl ToolAsset {
    pub fn new(asset_id: impl Into<Id>) -> Self {
        let asset_id = asset_id.into();
        Self {
            name: asset_id.clone(),
            asset_id,
            category: AssetCategory::default(),
            is_critical: false,
            is_ready: false,
            is_allocated: false,
            allocation_eta: None,
            allocated_at: None,
            operator: None,
            exclusive_group: None,
        }
    }

    pub fn critical(mut self) -> Self {
        self.is_critical = true;
        self
    }

    pub fn ready(mut self) -> Self {
        self.is_ready = true;
        self
    }

    /// Records an exclusive allocation to `operator`.
    pub fn allocate(
        &mut self,
        operator: impl Into<Id>,
        at: DateTime<Utc>,
    ) -> Result<(), PlanningError> {
        if self.is_allocated {
            return Err(PlanningError::ResourceConflict {
                message: format!("tool {} is already allocated", self.asset_id),
                conflicting_resources: vec![self.asset_id.clone()],
            });
        }
        self.is_allocated = true;
        self.allocated_at = Some(at);
        self.operator = Some(operator.into());
        Ok(())
    }

    pub fn release(&mut self) {
        self.is_allocated = false;
        self.allocated_at = None;
        self.operator = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // ── Material sufficiency ──────────────────────────────────────────

    #[test]
    fn kitted_material_needs_full_quantity() {
        let m = MaterialItem::new("M1", 4).kitted().with_available(3);
        assert!(!m.is_sufficient());
        let m = MaterialItem::new("M1", 4).kitted().with_available(4);
        assert!(m.is_sufficient());
    }

    #[test]
    fn loose_material_needs_any_stock() {
        let m = MaterialItem::new("M2", 4).with_available(1);
        assert!(m.is_sufficient());
        let m = MaterialItem::new("M2", 4);
        assert!(!m.is_sufficient());
    }

    #[test]
    fn zero_required_quantity_is_rejected() {
        let m = MaterialItem::new("M1", 0);
        assert!(m.validate().is_err());
    }

    #[test]
    fn available_above_required_is_rejected() {
        let mut m = MaterialItem::new("M1", 2);
        m.available_quantity = 3;
        assert!(m.validate().is_err());
    }

    // ── Tool allocation lifecycle ─────────────────────────────────────

    #[test]
    fn allocate_then_release() {
        let mut tool = ToolAsset::new("HOIST-1").ready();
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap();

        tool.allocate("EMP-1", at).unwrap();
        assert!(tool.is_allocated);
        assert_eq!(tool.operator.as_deref(), Some("EMP-1"));
        assert_eq!(tool.allocated_at, Some(at));

        tool.release();
        assert!(!tool.is_allocated);
        assert!(tool.operator.is_none());
    }

    #[test]
    fn double_allocation_conflicts() {
        let mut tool = ToolAsset::new("HOIST-1");
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap();
        tool.allocate("EMP-1", at).unwrap();
        let err = tool.allocate("EMP-2", at).unwrap_err();
        assert_eq!(err.code(), "RESOURCE_CONFLICT");
    }
}
