//! Patient records: care teams and medical history.
//!
//! A patient record has no lifecycle. Staff reach it through the care team, the patient
//! through their own profile, and everyone else only with `view_all_patients`.

use crate::access::{OwnedResource, ResourceKind, Subject};
use crate::audit::AuditAction;
use crate::decision::Decision;
use crate::principal::{require_principal, Principal};
use crate::services::{load, precheck, CareContext, Plan};
use crate::store::{ConflictGuard, Record, RecordStore, Write};
use crate::{CareError, CareResult};
use careflow_registry::{Permission, Role};
use careflow_types::{NonEmptyText, PatientId, RecordId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const VIEW: &[Permission] = &[
    Permission::ViewAllPatients,
    Permission::ViewAssignedPatients,
    Permission::ViewOwnRecord,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    Condition,
    Allergy,
    Surgery,
    Medication,
    FamilyHistory,
    Note,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub kind: HistoryKind,
    pub description: NonEmptyText,
    pub recorded_by: UserId,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CareTeamMember {
    pub user: UserId,
    pub role: Role,
    pub added_by: UserId,
    pub added_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub id: RecordId,
    pub revision: u64,
    pub patient: PatientId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub care_team: Vec<CareTeamMember>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub medical_history: Vec<HistoryEntry>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PatientRecord {
    pub fn has_care_team_member(&self, user: UserId) -> bool {
        self.care_team.iter().any(|m| m.user == user)
    }
}

impl Record for PatientRecord {
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

impl OwnedResource for PatientRecord {
    const KIND: ResourceKind = ResourceKind::PatientRecord;
    const VIEW_ALL: Permission = Permission::ViewAllPatients;

    fn is_owned_by(&self, subject: &Subject<'_>) -> bool {
        subject.is_patient(self.patient) || self.has_care_team_member(subject.user_id())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PatientRecordAction {
    Create {
        patient: PatientId,
    },
    AddHistory {
        id: RecordId,
        kind: HistoryKind,
        description: NonEmptyText,
    },
    AddCareTeamMember {
        id: RecordId,
        user: UserId,
    },
}

impl PatientRecordAction {
    pub fn target(&self) -> Option<RecordId> {
        match self {
            Self::Create { .. } => None,
            Self::AddHistory { id, .. } | Self::AddCareTeamMember { id, .. } => Some(*id),
        }
    }
}

#[derive(Clone)]
pub struct PatientRecordService {
    ctx: CareContext,
    store: Arc<dyn RecordStore<PatientRecord>>,
}

impl PatientRecordService {
    pub fn new(ctx: CareContext, store: Arc<dyn RecordStore<PatientRecord>>) -> Self {
        Self { ctx, store }
    }

    pub fn decide(&self, principal: Option<&Principal>, action: &PatientRecordAction) -> Decision {
        Decision::from_plan(&self.plan(principal, action), Plan::next_state)
    }

    pub fn apply(
        &self,
        principal: Option<&Principal>,
        action: PatientRecordAction,
    ) -> CareResult<PatientRecord> {
        let audit_action = match action {
            PatientRecordAction::Create { .. } => AuditAction::Create,
            _ => AuditAction::Update,
        };
        self.ctx.audited(
            principal,
            audit_action,
            ResourceKind::PatientRecord,
            action.target(),
            || {
                let stored = self.plan(principal, &action)?.execute(self.store.as_ref())?;
                tracing::info!(
                    patient_record = %stored.id,
                    patient = %stored.patient,
                    revision = stored.revision,
                    "patient record written"
                );
                Ok(stored)
            },
        )
    }

    pub fn plan(
        &self,
        principal: Option<&Principal>,
        action: &PatientRecordAction,
    ) -> CareResult<Plan<PatientRecord>> {
        let principal = require_principal(principal)?;
        let engine = self.ctx.engine();
        let now = self.ctx.now();
        match action {
            PatientRecordAction::Create { patient } => {
                engine.require_permission(principal, Permission::CreatePatientRecords)?;
                if !self.ctx.directory().patient_exists(*patient) {
                    return Err(CareError::InvalidInput(format!(
                        "patient {patient} does not exist"
                    )));
                }
                let care_team = if principal.role.is_staff() {
                    vec![CareTeamMember {
                        user: principal.user_id,
                        role: principal.role,
                        added_by: principal.user_id,
                        added_at: now,
                    }]
                } else {
                    Vec::new()
                };
                let record = PatientRecord {
                    id: RecordId::new(),
                    revision: 0,
                    patient: *patient,
                    care_team,
                    medical_history: Vec::new(),
                    created_by: principal.user_id,
                    created_at: now,
                    updated_at: now,
                };
                let patient = *patient;
                let write = Write::create(record).unless(ConflictGuard::new(
                    "a record already exists for this patient",
                    move |existing: &PatientRecord| existing.patient == patient,
                ));
                precheck(self.store.as_ref(), &write)?;
                Ok(Plan::new(write, None))
            }
            PatientRecordAction::AddHistory {
                id,
                kind,
                description,
            } => {
                engine.require_permission(principal, Permission::EditMedicalHistory)?;
                let mut next = self.load_accessible(principal, *id)?;
                next.medical_history.push(HistoryEntry {
                    kind: *kind,
                    description: description.clone(),
                    recorded_by: principal.user_id,
                    recorded_at: now,
                });
                next.updated_at = now;
                Ok(Plan::new(Write::update(next), None))
            }
            PatientRecordAction::AddCareTeamMember { id, user } => {
                engine.require_permission(principal, Permission::CreatePatientRecords)?;
                let mut next = self.load_accessible(principal, *id)?;
                let role = match self.ctx.directory().role_of(*user) {
                    Some(role) if role.is_staff() => role,
                    Some(_) => {
                        return Err(CareError::InvalidInput(
                            "only staff can join a care team".into(),
                        ))
                    }
                    None => return Err(CareError::NotFound("user".into())),
                };
                if next.has_care_team_member(*user) {
                    return Err(CareError::Conflict(
                        "user is already on the care team".into(),
                    ));
                }
                next.care_team.push(CareTeamMember {
                    user: *user,
                    role,
                    added_by: principal.user_id,
                    added_at: now,
                });
                next.updated_at = now;
                Ok(Plan::new(Write::update(next), None))
            }
        }
    }

    pub fn get(&self, principal: Option<&Principal>, id: RecordId) -> CareResult<PatientRecord> {
        let principal = require_principal(principal)?;
        self.ctx.engine().require_any(principal, VIEW)?;
        self.load_accessible(principal, id)
    }

    /// The record kept for a patient profile.
    pub fn for_patient(
        &self,
        principal: Option<&Principal>,
        patient: PatientId,
    ) -> CareResult<PatientRecord> {
        let principal = require_principal(principal)?;
        self.ctx.engine().require_any(principal, VIEW)?;
        let record = self
            .store
            .find(&|r: &PatientRecord| r.patient == patient)?
            .into_iter()
            .next()
            .ok_or_else(|| CareError::NotFound(ResourceKind::PatientRecord.to_string()))?;
        self.ctx
            .engine()
            .require_access(&record, &self.ctx.subject(principal))?;
        Ok(record)
    }

    fn load_accessible(&self, principal: &Principal, id: RecordId) -> CareResult<PatientRecord> {
        let record = load(self.store.as_ref(), ResourceKind::PatientRecord, id)?;
        self.ctx
            .engine()
            .require_access(&record, &self.ctx.subject(principal))?;
        Ok(record)
    }
}
