//! Prescriptions and per-line dispensing.

use crate::access::{OwnedResource, ResourceKind, Subject};
use crate::lifecycle::{Cancellation, Governed, LifecycleStatus};
use crate::reference::{PatientSummary, PharmacySummary, Ref, UserSummary};
use crate::store::{ConflictGuard, Record};
use careflow_registry::Permission;
use careflow_types::{NonEmptyText, RecordId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrescriptionStatus {
    Draft,
    Signed,
    Sent,
    PartiallyDispensed,
    Dispensed,
    Cancelled,
    /// Never stored by a transition; see [`Prescription::effective_status`].
    Expired,
}

impl LifecycleStatus for PrescriptionStatus {
    const KIND: ResourceKind = ResourceKind::Prescription;

    fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Signed => "signed",
            Self::Sent => "sent",
            Self::PartiallyDispensed => "partially_dispensed",
            Self::Dispensed => "dispensed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    fn allowed_next(&self) -> &'static [Self] {
        match self {
            Self::Draft => &[Self::Signed, Self::Cancelled],
            Self::Signed => &[Self::Sent, Self::Cancelled],
            Self::Sent => &[Self::PartiallyDispensed, Self::Dispensed, Self::Cancelled],
            Self::PartiallyDispensed => {
                &[Self::PartiallyDispensed, Self::Dispensed, Self::Cancelled]
            }
            Self::Dispensed | Self::Cancelled | Self::Expired => &[],
        }
    }
}

/// One medication on a prescription, with its fulfilment so far.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicationLine {
    pub line_id: u32,
    pub name: NonEmptyText,
    pub dosage: NonEmptyText,
    pub frequency: NonEmptyText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<NonEmptyText>,
    pub quantity: u32,
    #[serde(default)]
    pub dispensed_quantity: u32,
}

impl MedicationLine {
    pub fn remaining(&self) -> u32 {
        self.quantity.saturating_sub(self.dispensed_quantity)
    }

    pub fn is_fully_dispensed(&self) -> bool {
        self.remaining() == 0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prescription {
    pub id: RecordId,
    pub revision: u64,
    pub prescription_number: String,
    pub patient: Ref<PatientSummary>,
    pub doctor: Ref<UserSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pharmacy: Option<Ref<PharmacySummary>>,
    pub medications: Vec<MedicationLine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<NonEmptyText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<NonEmptyText>,
    pub status: PrescriptionStatus,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_by: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispensed_by: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispensed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation: Option<Cancellation>,
    #[serde(default)]
    pub renewal_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_prescription: Option<RecordId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Prescription {
    /// The stored status, or `expired` once past expiry unless cancelled or fully dispensed.
    pub fn effective_status(&self, now: DateTime<Utc>) -> PrescriptionStatus {
        match self.status {
            PrescriptionStatus::Cancelled | PrescriptionStatus::Dispensed => self.status,
            _ if now > self.expires_at => PrescriptionStatus::Expired,
            status => status,
        }
    }

    pub fn line(&self, line_id: u32) -> Option<&MedicationLine> {
        self.medications.iter().find(|l| l.line_id == line_id)
    }

    pub fn is_fully_dispensed(&self) -> bool {
        self.medications.iter().all(MedicationLine::is_fully_dispensed)
    }
}

impl Record for Prescription {
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

impl OwnedResource for Prescription {
    const KIND: ResourceKind = ResourceKind::Prescription;
    const VIEW_ALL: Permission = Permission::ViewAllPrescriptions;

    fn is_owned_by(&self, subject: &Subject<'_>) -> bool {
        if subject.is_user(self.doctor.id()) || subject.is_patient(self.patient.id()) {
            return true;
        }
        match (&self.pharmacy, subject.pharmacy()) {
            (Some(assigned), Some(own)) => assigned.is(own),
            _ => false,
        }
    }
}

impl Governed for Prescription {
    type Status = PrescriptionStatus;
    const CANCELLED: Option<PrescriptionStatus> = Some(PrescriptionStatus::Cancelled);

    /// Expiry is applied, so a lapsed prescription is terminal.
    fn status_at(&self, now: DateTime<Utc>) -> PrescriptionStatus {
        self.effective_status(now)
    }

    fn locks_content(status: PrescriptionStatus) -> bool {
        status != PrescriptionStatus::Draft
    }
}

pub fn prescription_number_guard(number: String) -> ConflictGuard<Prescription> {
    ConflictGuard::new(
        format!("prescription number {number} is already in use"),
        move |existing: &Prescription| existing.prescription_number == number,
    )
}
