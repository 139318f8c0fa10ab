//! Consultation service.

use crate::access::ResourceKind;
use crate::audit::AuditAction;
use crate::decision::Decision;
use crate::lifecycle::consultation::{
    one_consultation_per_appointment_guard, Consultation, ConsultationStatus,
};
use crate::lifecycle::{check_transition, LifecycleStatus};
use crate::principal::{require_principal, Principal};
use crate::reference::Ref;
use crate::services::{load, precheck, CareContext, Plan};
use crate::store::{RecordStore, Write};
use crate::{CareError, CareResult};
use careflow_registry::Permission;
use careflow_types::{NonEmptyText, PatientId, RecordId};
use std::sync::Arc;

const VIEW: &[Permission] = &[
    Permission::ViewAllConsultations,
    Permission::CreateConsultations,
    Permission::ViewOwnRecord,
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewConsultation {
    pub patient: PatientId,
    pub appointment: Option<RecordId>,
    pub reason: NonEmptyText,
    pub findings: Option<NonEmptyText>,
    pub diagnosis: Option<NonEmptyText>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsultationAction {
    Create(NewConsultation),
    Update {
        id: RecordId,
        reason: Option<NonEmptyText>,
        findings: Option<NonEmptyText>,
        diagnosis: Option<NonEmptyText>,
    },
    UpdateStatus {
        id: RecordId,
        status: ConsultationStatus,
    },
}

impl ConsultationAction {
    pub fn target(&self) -> Option<RecordId> {
        match self {
            Self::Create(_) => None,
            Self::Update { id, .. } | Self::UpdateStatus { id, .. } => Some(*id),
        }
    }

    fn audit_action(&self) -> AuditAction {
        match self {
            Self::Create(_) => AuditAction::Create,
            Self::Update { .. } => AuditAction::Update,
            Self::UpdateStatus { .. } => AuditAction::StatusChange,
        }
    }
}

#[derive(Clone)]
pub struct ConsultationService {
    ctx: CareContext,
    store: Arc<dyn RecordStore<Consultation>>,
}

impl ConsultationService {
    pub fn new(ctx: CareContext, store: Arc<dyn RecordStore<Consultation>>) -> Self {
        Self { ctx, store }
    }

    pub fn decide(&self, principal: Option<&Principal>, action: &ConsultationAction) -> Decision {
        Decision::from_plan(&self.plan(principal, action), Plan::next_state)
    }

    pub fn apply(
        &self,
        principal: Option<&Principal>,
        action: ConsultationAction,
    ) -> CareResult<Consultation> {
        self.ctx.audited(
            principal,
            action.audit_action(),
            ResourceKind::Consultation,
            action.target(),
            || {
                let stored = self.plan(principal, &action)?.execute(self.store.as_ref())?;
                tracing::info!(
                    consultation = %stored.id,
                    status = stored.status.as_str(),
                    "consultation written"
                );
                Ok(stored)
            },
        )
    }

    pub fn plan(
        &self,
        principal: Option<&Principal>,
        action: &ConsultationAction,
    ) -> CareResult<Plan<Consultation>> {
        let principal = require_principal(principal)?;
        let engine = self.ctx.engine();
        match action {
            ConsultationAction::Create(new) => {
                engine.require_permission(principal, Permission::CreateConsultations)?;
                self.plan_create(principal, new)
            }
            ConsultationAction::Update {
                id,
                reason,
                findings,
                diagnosis,
            } => {
                let current = self.load_editable(principal, *id)?;
                engine.require_modify(&current, &self.ctx.subject(principal))?;

                let mut next = current;
                if let Some(reason) = reason {
                    next.reason = reason.clone();
                }
                if let Some(findings) = findings {
                    next.findings = Some(findings.clone());
                }
                if let Some(diagnosis) = diagnosis {
                    next.diagnosis = Some(diagnosis.clone());
                }
                next.updated_at = self.ctx.now();
                let status = next.status.as_str();
                Ok(Plan::new(Write::update(next), Some(status)))
            }
            ConsultationAction::UpdateStatus { id, status } => {
                let current = self.load_editable(principal, *id)?;
                let status = check_transition(current.status, *status)?;
                let now = self.ctx.now();

                let mut next = current;
                next.status = status;
                match status {
                    ConsultationStatus::Completed => next.completed_at = Some(now),
                    ConsultationStatus::Reviewed => {
                        next.reviewed_by = Some(principal.user_id);
                        next.reviewed_at = Some(now);
                    }
                    ConsultationStatus::Draft | ConsultationStatus::Archived => {}
                }
                next.updated_at = now;
                Ok(Plan::new(Write::update(next), Some(status.as_str())))
            }
        }
    }

    pub fn get(&self, principal: Option<&Principal>, id: RecordId) -> CareResult<Consultation> {
        let principal = require_principal(principal)?;
        self.ctx.engine().require_any(principal, VIEW)?;
        let consultation = load(self.store.as_ref(), ResourceKind::Consultation, id)?;
        self.ctx
            .engine()
            .require_access(&consultation, &self.ctx.subject(principal))?;
        Ok(consultation)
    }

    pub fn list_for_patient(
        &self,
        principal: Option<&Principal>,
        patient: PatientId,
    ) -> CareResult<Vec<Consultation>> {
        let principal = require_principal(principal)?;
        self.ctx.engine().require_any(principal, VIEW)?;
        let subject = self.ctx.subject(principal);
        let engine = self.ctx.engine();
        let mut found = self.store.find(&|c: &Consultation| {
            c.patient.is(patient) && engine.can_access(c, &subject)
        })?;
        found.sort_by_key(|c| c.created_at);
        Ok(found)
    }

    fn plan_create(
        &self,
        principal: &Principal,
        new: &NewConsultation,
    ) -> CareResult<Plan<Consultation>> {
        if !self.ctx.directory().patient_exists(new.patient) {
            return Err(CareError::InvalidInput(format!(
                "patient {} does not exist",
                new.patient
            )));
        }
        let now = self.ctx.now();
        let consultation = Consultation {
            id: RecordId::new(),
            revision: 0,
            patient: Ref::Id(new.patient),
            doctor: Ref::Id(principal.user_id),
            appointment: new.appointment,
            reason: new.reason.clone(),
            findings: new.findings.clone(),
            diagnosis: new.diagnosis.clone(),
            status: ConsultationStatus::Draft,
            completed_at: None,
            reviewed_by: None,
            reviewed_at: None,
            created_at: now,
            updated_at: now,
        };
        let mut write = Write::create(consultation);
        if let Some(appointment) = new.appointment {
            write = write.unless(one_consultation_per_appointment_guard(appointment));
            precheck(self.store.as_ref(), &write)?;
        }
        Ok(Plan::new(write, Some(ConsultationStatus::Draft.as_str())))
    }

    /// Loads a consultation the principal may change: their own, or any for an admin.
    fn load_editable(&self, principal: &Principal, id: RecordId) -> CareResult<Consultation> {
        self.ctx
            .engine()
            .require_permission(principal, Permission::EditConsultations)?;
        let consultation = load(self.store.as_ref(), ResourceKind::Consultation, id)?;
        if !principal.is_admin() && !consultation.doctor.is(principal.user_id) {
            return Err(CareError::ResourceAccessDenied {
                kind: ResourceKind::Consultation,
            });
        }
        Ok(consultation)
    }
}
