//! Resource access rules.
//!
//! Role-level permissions answer "may this kind of user do this at all". The rules here answer
//! the second question, "is this particular record theirs", which every owned resource answers
//! through [`OwnedResource::is_owned_by`]. The shape of the decision is the same for every
//! resource type and lives in [`crate::authz::AuthorizationEngine::can_access`].

use crate::directory::IdentityDirectory;
use crate::principal::Principal;
use careflow_registry::{Permission, Role};
use careflow_types::{PatientId, PharmacyId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cell::OnceCell;
use std::fmt;

/// The kinds of record the core governs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Appointment,
    Consultation,
    LabOrder,
    LabResult,
    Prescription,
    Document,
    PatientRecord,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Appointment => "appointment",
            Self::Consultation => "consultation",
            Self::LabOrder => "lab_order",
            Self::LabResult => "lab_result",
            Self::Prescription => "prescription",
            Self::Document => "document",
            Self::PatientRecord => "patient_record",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The principal of a request together with the facts about them that ownership checks need.
///
/// Directory lookups are made lazily and at most once per subject.
pub struct Subject<'a> {
    principal: &'a Principal,
    directory: &'a dyn IdentityDirectory,
    now: DateTime<Utc>,
    patient_profile: OnceCell<Option<PatientId>>,
    pharmacy: OnceCell<Option<PharmacyId>>,
}

impl<'a> Subject<'a> {
    pub fn new(
        principal: &'a Principal,
        directory: &'a dyn IdentityDirectory,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            principal,
            directory,
            now,
            patient_profile: OnceCell::new(),
            pharmacy: OnceCell::new(),
        }
    }

    pub fn principal(&self) -> &'a Principal {
        self.principal
    }

    pub fn user_id(&self) -> UserId {
        self.principal.user_id
    }

    pub fn role(&self) -> Role {
        self.principal.role
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// The patient profile owned by this user, if they are a patient.
    pub fn patient_profile(&self) -> Option<PatientId> {
        *self.patient_profile.get_or_init(|| {
            if self.principal.role == Role::Patient {
                self.directory.patient_profile_of(self.principal.user_id)
            } else {
                None
            }
        })
    }

    /// The pharmacy this user works for, if they are a pharmacist.
    pub fn pharmacy(&self) -> Option<PharmacyId> {
        *self.pharmacy.get_or_init(|| {
            if self.principal.role == Role::Pharmacist {
                self.directory.pharmacy_of(self.principal.user_id)
            } else {
                None
            }
        })
    }

    /// True if this user is the patient identified by `patient`.
    pub fn is_patient(&self, patient: PatientId) -> bool {
        self.patient_profile() == Some(patient)
    }

    pub fn is_user(&self, user: UserId) -> bool {
        self.principal.user_id == user
    }
}

/// A record with ownership references.
pub trait OwnedResource {
    const KIND: ResourceKind;

    /// Permission that grants access to every record of this kind.
    const VIEW_ALL: Permission;

    /// Whether an ownership reference of this record resolves to `subject`.
    fn is_owned_by(&self, subject: &Subject<'_>) -> bool;
}

/// Roles allowed to read any laboratory result. Orders are narrower, see
/// [`crate::lifecycle::lab_order::LabOrder`].
pub(crate) fn is_lab_staff(role: Role) -> bool {
    matches!(role, Role::Nurse | Role::LabTechnician)
}
