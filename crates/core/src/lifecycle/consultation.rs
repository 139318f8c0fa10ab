//! Consultations recorded by a doctor for a patient.
//!
//! A consultation is written as a draft, completed by its doctor, optionally reviewed, and
//! finally archived. Clinical content is frozen once it has been reviewed.

use crate::access::{OwnedResource, ResourceKind, Subject};
use crate::lifecycle::{Governed, LifecycleStatus};
use crate::reference::{PatientSummary, Ref, UserSummary};
use crate::store::{ConflictGuard, Record};
use careflow_registry::Permission;
use careflow_types::{NonEmptyText, RecordId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationStatus {
    #[default]
    Draft,
    Completed,
    Reviewed,
    Archived,
}

impl LifecycleStatus for ConsultationStatus {
    const KIND: ResourceKind = ResourceKind::Consultation;

    fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Completed => "completed",
            Self::Reviewed => "reviewed",
            Self::Archived => "archived",
        }
    }

    fn allowed_next(&self) -> &'static [Self] {
        match self {
            Self::Draft => &[Self::Completed],
            Self::Completed => &[Self::Reviewed, Self::Archived],
            Self::Reviewed => &[Self::Archived],
            Self::Archived => &[],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consultation {
    pub id: RecordId,
    pub revision: u64,
    pub patient: Ref<PatientSummary>,
    pub doctor: Ref<UserSummary>,
    /// Appointment the consultation took place in, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appointment: Option<RecordId>,
    pub reason: NonEmptyText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub findings: Option<NonEmptyText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<NonEmptyText>,
    #[serde(default)]
    pub status: ConsultationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record for Consultation {
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

impl OwnedResource for Consultation {
    const KIND: ResourceKind = ResourceKind::Consultation;
    const VIEW_ALL: Permission = Permission::ViewAllConsultations;

    fn is_owned_by(&self, subject: &Subject<'_>) -> bool {
        subject.is_user(self.doctor.id()) || subject.is_patient(self.patient.id())
    }
}

impl Governed for Consultation {
    type Status = ConsultationStatus;
    const CANCELLED: Option<ConsultationStatus> = None;

    fn status_at(&self, _now: DateTime<Utc>) -> ConsultationStatus {
        self.status
    }

    fn locks_content(status: ConsultationStatus) -> bool {
        matches!(
            status,
            ConsultationStatus::Reviewed | ConsultationStatus::Archived
        )
    }
}

/// Vetoes a create if `appointment` already has a consultation.
pub fn one_consultation_per_appointment_guard(appointment: RecordId) -> ConflictGuard<Consultation> {
    ConflictGuard::new(
        format!("appointment {appointment} already has a consultation"),
        move |existing: &Consultation| existing.appointment == Some(appointment),
    )
}
