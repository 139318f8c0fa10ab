//! Clinical documents, their version chain and shares.
//!
//! Versions form a singly linked chain through `replaces` / `replaced_by`. Exactly one version
//! of a chain is `current`; every earlier one is `superseded` and can no longer change.

use crate::access::{OwnedResource, ResourceKind, Subject};
use crate::lifecycle::{Governed, LifecycleStatus};
use crate::reference::{PatientSummary, Ref, UserSummary};
use crate::store::Record;
use careflow_registry::Permission;
use careflow_types::{NonEmptyText, RecordId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Current,
    Superseded,
}

impl LifecycleStatus for DocumentStatus {
    const KIND: ResourceKind = ResourceKind::Document;

    fn as_str(&self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Superseded => "superseded",
        }
    }

    fn allowed_next(&self) -> &'static [Self] {
        match self {
            Self::Current => &[Self::Superseded],
            Self::Superseded => &[],
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentCategory {
    Imaging,
    LabReport,
    Prescription,
    ConsultationNote,
    DischargeSummary,
    OperativeReport,
    PathologyReport,
    ConsentForm,
    Insurance,
    Referral,
    VaccinationRecord,
    MedicalCertificate,
    #[default]
    Other,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    #[default]
    View,
    Download,
    Edit,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    pub user: UserId,
    pub access_level: AccessLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub shared_by: UserId,
    pub shared_at: DateTime<Utc>,
}

impl Share {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: RecordId,
    pub revision: u64,
    pub title: NonEmptyText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<NonEmptyText>,
    pub category: DocumentCategory,
    pub file_name: NonEmptyText,
    pub patient: Ref<PatientSummary>,
    pub uploaded_by: Ref<UserSummary>,
    pub version: u32,
    pub status: DocumentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_notes: Option<NonEmptyText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaces: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaced_by: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shared_with: Vec<Share>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn is_current(&self) -> bool {
        self.status == DocumentStatus::Current
    }

    /// The share granted to `user`, ignoring expired ones.
    pub fn active_share(&self, user: UserId, now: DateTime<Utc>) -> Option<&Share> {
        self.shared_with
            .iter()
            .find(|s| s.user == user && s.is_active(now))
    }

    /// Adds a share for `share.user`, or updates the existing one in place.
    pub fn upsert_share(&mut self, share: Share) {
        match self.shared_with.iter_mut().find(|s| s.user == share.user) {
            Some(existing) => {
                existing.access_level = share.access_level;
                if share.expires_at.is_some() {
                    existing.expires_at = share.expires_at;
                }
            }
            None => self.shared_with.push(share),
        }
    }

    /// Removes the share of `user`, returning whether there was one.
    pub fn revoke_share(&mut self, user: UserId) -> bool {
        let before = self.shared_with.len();
        self.shared_with.retain(|s| s.user != user);
        self.shared_with.len() != before
    }
}

impl Record for Document {
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

impl OwnedResource for Document {
    const KIND: ResourceKind = ResourceKind::Document;
    const VIEW_ALL: Permission = Permission::ViewAllDocuments;

    fn is_owned_by(&self, subject: &Subject<'_>) -> bool {
        subject.is_user(self.uploaded_by.id())
            || subject.is_patient(self.patient.id())
            || self.active_share(subject.user_id(), subject.now()).is_some()
    }
}

impl Governed for Document {
    type Status = DocumentStatus;
    const CANCELLED: Option<DocumentStatus> = None;

    fn status_at(&self, _now: DateTime<Utc>) -> DocumentStatus {
        self.status
    }

    fn locks_content(status: DocumentStatus) -> bool {
        status != DocumentStatus::Current
    }
}
