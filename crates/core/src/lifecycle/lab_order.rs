//! Laboratory orders.

use crate::access::{OwnedResource, ResourceKind, Subject};
use crate::constants::{
    LAB_TURNAROUND_ROUTINE_HOURS, LAB_TURNAROUND_STAT_HOURS, LAB_TURNAROUND_URGENT_HOURS,
};
use crate::lifecycle::{Cancellation, Governed, LifecycleStatus};
use crate::reference::{PatientSummary, Ref, UserSummary};
use crate::store::{ConflictGuard, Record};
use careflow_registry::{Permission, Role};
use careflow_types::{NonEmptyText, RecordId, UserId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabOrderStatus {
    Ordered,
    Collected,
    Received,
    InProgress,
    Completed,
    Validated,
    Reported,
    Cancelled,
    /// Set by laboratory systems outside the core; no transition leads here.
    Rejected,
}

impl LifecycleStatus for LabOrderStatus {
    const KIND: ResourceKind = ResourceKind::LabOrder;

    fn as_str(&self) -> &'static str {
        match self {
            Self::Ordered => "ordered",
            Self::Collected => "collected",
            Self::Received => "received",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Validated => "validated",
            Self::Reported => "reported",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
        }
    }

    fn allowed_next(&self) -> &'static [Self] {
        match self {
            Self::Ordered => &[Self::Collected, Self::Cancelled],
            Self::Collected => &[Self::Received, Self::Cancelled],
            Self::Received => &[Self::InProgress, Self::Cancelled],
            Self::InProgress => &[Self::Completed, Self::Cancelled],
            Self::Completed => &[Self::Validated],
            Self::Validated => &[Self::Reported],
            Self::Reported | Self::Cancelled | Self::Rejected => &[],
        }
    }
}

impl LabOrderStatus {
    /// Tests, priority and notes are frozen once analysis has started.
    pub fn locks_content(&self) -> bool {
        matches!(
            self,
            Self::InProgress | Self::Completed | Self::Validated | Self::Reported
        ) || self.is_terminal()
    }

    /// Whether the order is finished from the requester's point of view.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Validated | Self::Reported | Self::Cancelled | Self::Rejected
        )
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabPriority {
    #[default]
    Routine,
    Urgent,
    Stat,
}

impl LabPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Routine => "routine",
            Self::Urgent => "urgent",
            Self::Stat => "stat",
        }
    }

    /// Expected time from order to completion.
    pub fn turnaround(&self) -> Duration {
        let hours = match self {
            Self::Stat => LAB_TURNAROUND_STAT_HOURS,
            Self::Urgent => LAB_TURNAROUND_URGENT_HOURS,
            Self::Routine => LAB_TURNAROUND_ROUTINE_HOURS,
        };
        Duration::hours(hours)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabTest {
    pub code: NonEmptyText,
    pub name: NonEmptyText,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecimenCollection {
    pub collected_by: UserId,
    pub collected_at: DateTime<Utc>,
    pub specimen_type: NonEmptyText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<NonEmptyText>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecimenReception {
    pub received_by: UserId,
    pub received_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<NonEmptyText>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabOrder {
    pub id: RecordId,
    pub revision: u64,
    pub order_number: String,
    pub patient: Ref<PatientSummary>,
    pub doctor: Ref<UserSummary>,
    pub tests: Vec<LabTest>,
    pub priority: LabPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clinical_notes: Option<NonEmptyText>,
    pub status: LabOrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specimen: Option<SpecimenCollection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reception: Option<SpecimenReception>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation: Option<Cancellation>,
    pub expected_completion: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LabOrder {
    /// Past its expected completion and still open.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_closed() && now > self.expected_completion
    }
}

impl Record for LabOrder {
    fn id(&self) -> RecordId {
        self.id
    }

    fn revision(&self) -> u64 {
        self.revision
    }

    fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }
}

impl OwnedResource for LabOrder {
    const KIND: ResourceKind = ResourceKind::LabOrder;
    const VIEW_ALL: Permission = Permission::ViewAllLabOrders;

    fn is_owned_by(&self, subject: &Subject<'_>) -> bool {
        subject.role() == Role::LabTechnician
            || subject.is_user(self.doctor.id())
            || subject.is_patient(self.patient.id())
    }
}

impl Governed for LabOrder {
    type Status = LabOrderStatus;
    const CANCELLED: Option<LabOrderStatus> = Some(LabOrderStatus::Cancelled);

    fn status_at(&self, _now: DateTime<Utc>) -> LabOrderStatus {
        self.status
    }

    fn locks_content(status: LabOrderStatus) -> bool {
        status.locks_content()
    }
}

/// Vetoes a create if another order already carries `number`.
pub fn order_number_guard(number: String) -> ConflictGuard<LabOrder> {
    ConflictGuard::new(
        format!("lab order number {number} is already in use"),
        move |existing: &LabOrder| existing.order_number == number,
    )
}
