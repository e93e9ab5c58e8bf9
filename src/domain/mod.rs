//! Domain entities and their invariants.

pub mod event;
pub mod graph;
pub mod job;
pub mod material;
pub mod preparation;
pub mod resource;
pub mod schedule;

pub use event::{
    Event, EventDraft, EventPriority, EventScope, EventStatus, EventType, ProcessingPolicy,
};
pub use graph::TaskGraph;
pub use job::{Job, ResourceRequirement};
pub use material::{AssetCategory, Criticality, MaterialItem, ToolAsset};
pub use preparation::{
    AssetRequirement, Evidence, EvidenceType, Gate, PrepTaskType, PreparationTask, TaskStatus,
};
pub use resource::{
    AvailabilityPeriod, AvailabilityStatus, HumanProfile, PhysicalProfile, Resource,
    ResourceCalendar, ResourceKind,
};
pub use schedule::{
    AllocationStatus, GateSnapshot, IntervalType, ReallocationEntry, ResourceAllocation, Schedule,
    ScheduleDiff, ScheduleMetrics, TaskDelay, TaskInterval,
};
