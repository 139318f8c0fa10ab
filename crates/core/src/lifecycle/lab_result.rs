//! Laboratory results.
//!
//! A result is edited in place only while preliminary. Once validated, corrections are
//! appended as amendments that keep the values they replaced.

use crate::access::{is_lab_staff, OwnedResource, ResourceKind, Subject};
use crate::lifecycle::{Governed, LifecycleStatus};
use crate::reference::{PatientSummary, Ref, UserSummary};
use crate::store::{ConflictGuard, Record};
use careflow_registry::Permission;
use careflow_types::{NonEmptyText, RecordId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabResultStatus {
    Preliminary,
    Final,
    Amended,
}

impl LifecycleStatus for LabResultStatus {
    const KIND: ResourceKind = ResourceKind::LabResult;

    fn as_str(&self) -> &'static str {
        match self {
            Self::Preliminary => "preliminary",
            Self::Final => "final",
            Self::Amended => "amended",
        }
    }

    fn allowed_next(&self) -> &'static [Self] {
        match self {
            Self::Preliminary => &[Self::Final],
            Self::Final | Self::Amended => &[Self::Amended],
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultFlag {
    #[default]
    Normal,
    Low,
    High,
    CriticalLow,
    CriticalHigh,
    Abnormal,
    Positive,
    Negative,
}

impl ResultFlag {
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::CriticalLow | Self::CriticalHigh)
    }

    pub fn is_abnormal(&self) -> bool {
        !matches!(self, Self::Normal | Self::Negative)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestValue {
    pub code: NonEmptyText,
    pub value: NonEmptyText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<NonEmptyText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_range: Option<NonEmptyText>,
    #[serde(default)]
    pub flag: ResultFlag,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amendment {
    pub amended_by: UserId,
    pub amended_at: DateTime<Utc>,
    pub reason: NonEmptyText,
    pub previous_values: Vec<TestValue>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabReport {
    pub file_name: NonEmptyText,
    pub uploaded_by: UserId,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabResult {
    pub id: RecordId,
    pub revision: u64,
    /// The lab order this result answers.
    pub order: RecordId,
    pub patient: Ref<PatientSummary>,
    pub doctor: Ref<UserSummary>,
    pub performed_by: UserId,
    pub values: Vec<TestValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<NonEmptyText>,
    pub status: LabResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated_by: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<LabReport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub amendments: Vec<Amendment>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LabResult {
    pub fn has_critical_values(&self) -> bool {
        self.values.iter().any(|v| v.flag.is_critical())
    }

    pub fn abnormal_count(&self) -> usize {
        self.values.iter().filter(|v| v.flag.is_abnormal()).count()
    }
}

impl Record for LabResult {
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

impl OwnedResource for LabResult {
    const KIND: ResourceKind = ResourceKind::LabResult;
    const VIEW_ALL: Permission = Permission::ViewAllLabOrders;

    fn is_owned_by(&self, subject: &Subject<'_>) -> bool {
        is_lab_staff(subject.role())
            || subject.is_user(self.doctor.id())
            || subject.is_patient(self.patient.id())
    }
}

impl Governed for LabResult {
    type Status = LabResultStatus;
    const CANCELLED: Option<LabResultStatus> = None;
    // Corrections after validation go through amendments, for admins too.
    const ADMIN_OVERRIDE: bool = false;

    fn status_at(&self, _now: DateTime<Utc>) -> LabResultStatus {
        self.status
    }

    fn locks_content(status: LabResultStatus) -> bool {
        status != LabResultStatus::Preliminary
    }
}

/// Vetoes a create if the order already has a result.
pub fn one_result_per_order_guard(order: RecordId) -> ConflictGuard<LabResult> {
    ConflictGuard::new(
        "a result already exists for this lab order",
        move |existing: &LabResult| existing.order == order,
    )
}
