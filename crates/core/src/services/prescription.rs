//! Prescription service: drafting, signing, sending to a pharmacy, dispensing and renewal.

use crate::access::ResourceKind;
use crate::audit::AuditAction;
use crate::constants::PRESCRIPTION_NUMBER_PREFIX;
use crate::decision::Decision;
use crate::lifecycle::prescription::{
    prescription_number_guard, MedicationLine, Prescription, PrescriptionStatus,
};
use crate::lifecycle::{check_transition, sequence_number, Cancellation, LifecycleStatus};
use crate::principal::{require_principal, Principal};
use crate::reference::{PatientSummary, PharmacySummary, Ref};
use crate::services::{load, precheck, CareContext, Plan};
use crate::store::{RecordStore, Write};
use crate::{CareError, CareResult};
use careflow_registry::{Permission, Role};
use careflow_types::{NonEmptyText, PatientId, PharmacyId, RecordId, UserId};
use chrono::{DateTime, Datelike, Utc};
use std::sync::Arc;

const VIEW: &[Permission] = &[
    Permission::ViewAllPrescriptions,
    Permission::ViewAssignedPrescriptions,
    Permission::ViewOwnRecord,
];

/// A medication as written by the prescriber.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewMedication {
    pub name: NonEmptyText,
    pub dosage: NonEmptyText,
    pub frequency: NonEmptyText,
    pub duration: Option<NonEmptyText>,
    pub quantity: u32,
}

/// Quantity handed out against one line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LineDispense {
    pub line_id: u32,
    pub quantity: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrescriptionAction {
    Create {
        patient: PatientId,
        medications: Vec<NewMedication>,
        pharmacy: Option<PharmacyId>,
        diagnosis: Option<NonEmptyText>,
        notes: Option<NonEmptyText>,
        expires_at: Option<DateTime<Utc>>,
    },
    Update {
        id: RecordId,
        medications: Option<Vec<NewMedication>>,
        pharmacy: Option<PharmacyId>,
        diagnosis: Option<NonEmptyText>,
        notes: Option<NonEmptyText>,
        expires_at: Option<DateTime<Utc>>,
    },
    Sign {
        id: RecordId,
    },
    Send {
        id: RecordId,
        pharmacy: Option<PharmacyId>,
    },
    Dispense {
        id: RecordId,
        lines: Vec<LineDispense>,
    },
    Cancel {
        id: RecordId,
        reason: Option<NonEmptyText>,
    },
    Renew {
        id: RecordId,
        expires_at: Option<DateTime<Utc>>,
    },
}

impl PrescriptionAction {
    /// The record the action works on. Renewal targets the original.
    pub fn target(&self) -> Option<RecordId> {
        match self {
            Self::Create { .. } => None,
            Self::Update { id, .. }
            | Self::Sign { id }
            | Self::Send { id, .. }
            | Self::Dispense { id, .. }
            | Self::Cancel { id, .. }
            | Self::Renew { id, .. } => Some(*id),
        }
    }

    fn audit_action(&self) -> AuditAction {
        match self {
            Self::Create { .. } | Self::Renew { .. } => AuditAction::Create,
            Self::Update { .. } => AuditAction::Update,
            Self::Dispense { .. } => AuditAction::Dispense,
            Self::Sign { .. } | Self::Send { .. } | Self::Cancel { .. } => {
                AuditAction::StatusChange
            }
        }
    }
}

#[derive(Clone)]
pub struct PrescriptionService {
    ctx: CareContext,
    store: Arc<dyn RecordStore<Prescription>>,
}

impl PrescriptionService {
    pub fn new(ctx: CareContext, store: Arc<dyn RecordStore<Prescription>>) -> Self {
        Self { ctx, store }
    }

    pub fn decide(&self, principal: Option<&Principal>, action: &PrescriptionAction) -> Decision {
        Decision::from_plan(&self.plan(principal, action), Plan::next_state)
    }

    pub fn apply(
        &self,
        principal: Option<&Principal>,
        action: PrescriptionAction,
    ) -> CareResult<Prescription> {
        let audit_target = match &action {
            // A renewal is recorded against the prescription it creates.
            PrescriptionAction::Renew { .. } => None,
            other => other.target(),
        };
        self.ctx.audited(
            principal,
            action.audit_action(),
            ResourceKind::Prescription,
            audit_target,
            || {
                let stored = self.plan(principal, &action)?.execute(self.store.as_ref())?;
                tracing::info!(
                    prescription = %stored.id,
                    number = %stored.prescription_number,
                    status = stored.status.as_str(),
                    revision = stored.revision,
                    "prescription written"
                );
                Ok(stored)
            },
        )
    }

    pub fn plan(
        &self,
        principal: Option<&Principal>,
        action: &PrescriptionAction,
    ) -> CareResult<Plan<Prescription>> {
        let principal = require_principal(principal)?;
        match action {
            PrescriptionAction::Create {
                patient,
                medications,
                pharmacy,
                diagnosis,
                notes,
                expires_at,
            } => {
                self.ctx
                    .engine()
                    .require_permission(principal, Permission::CreatePrescriptions)?;
                if !self.ctx.directory().patient_exists(*patient) {
                    return Err(CareError::InvalidInput(format!(
                        "patient {patient} does not exist"
                    )));
                }
                let draft = Draft {
                    patient: Ref::Id(*patient),
                    doctor: principal.user_id,
                    medications: number_lines(medications)?,
                    pharmacy: self.known_pharmacy(*pharmacy)?,
                    diagnosis: diagnosis.clone(),
                    notes: notes.clone(),
                    expires_at: *expires_at,
                    renewal_count: 0,
                    original_prescription: None,
                };
                self.plan_draft(draft)
            }
            PrescriptionAction::Update {
                id,
                medications,
                pharmacy,
                diagnosis,
                notes,
                expires_at,
            } => {
                let current = self.load_owned(principal, *id)?;
                self.ctx
                    .engine()
                    .require_modify(&current, &self.ctx.subject(principal))?;

                let mut next = current;
                if let Some(medications) = medications {
                    next.medications = number_lines(medications)?;
                }
                if pharmacy.is_some() {
                    next.pharmacy = self.known_pharmacy(*pharmacy)?;
                }
                if let Some(diagnosis) = diagnosis {
                    next.diagnosis = Some(diagnosis.clone());
                }
                if let Some(notes) = notes {
                    next.notes = Some(notes.clone());
                }
                if let Some(expires_at) = expires_at {
                    next.expires_at = self.validate_expiry(*expires_at)?;
                }
                next.updated_at = self.ctx.now();
                let status = next.status.as_str();
                Ok(Plan::new(Write::update(next), Some(status)))
            }
            PrescriptionAction::Sign { id } => {
                self.ctx
                    .engine()
                    .require_permission(principal, Permission::SignPrescriptions)?;
                let current = load(self.store.as_ref(), ResourceKind::Prescription, *id)?;
                if !current.doctor.is(principal.user_id) {
                    return Err(CareError::ResourceAccessDenied {
                        kind: ResourceKind::Prescription,
                    });
                }
                let now = self.ctx.now();
                self.transition(current, PrescriptionStatus::Signed, |p| {
                    p.signed_by = Some(principal.user_id);
                    p.signed_at = Some(now);
                })
            }
            PrescriptionAction::Send { id, pharmacy } => {
                self.ctx
                    .engine()
                    .require_permission(principal, Permission::SendPrescriptions)?;
                let current = self.load_accessible(principal, *id)?;
                let pharmacy = match pharmacy {
                    Some(requested) => {
                        if !self.ctx.directory().pharmacy_exists(*requested) {
                            return Err(CareError::NotFound("pharmacy".into()));
                        }
                        Some(Ref::Id(*requested))
                    }
                    None => current.pharmacy.clone(),
                };
                let Some(pharmacy) = pharmacy else {
                    return Err(CareError::InvalidTransition(
                        "a prescription needs an assigned pharmacy before it can be sent".into(),
                    ));
                };
                let now = self.ctx.now();
                self.transition(current, PrescriptionStatus::Sent, |p| {
                    p.pharmacy = Some(pharmacy);
                    p.sent_at = Some(now);
                })
            }
            PrescriptionAction::Dispense { id, lines } => {
                self.ctx
                    .engine()
                    .require_permission(principal, Permission::DispensePrescriptions)?;
                let current = self.load_accessible(principal, *id)?;
                self.plan_dispense(principal, current, lines)
            }
            PrescriptionAction::Cancel { id, reason } => {
                let current = self.load_owned(principal, *id)?;
                self.ctx
                    .engine()
                    .require_cancel(&current, &self.ctx.subject(principal))?;
                let now = self.ctx.now();
                self.transition(current, PrescriptionStatus::Cancelled, |p| {
                    p.cancellation = Some(Cancellation {
                        cancelled_by: principal.user_id,
                        cancelled_at: now,
                        reason: reason.clone(),
                    });
                })
            }
            PrescriptionAction::Renew { id, expires_at } => {
                let original = self.load_owned(principal, *id)?;
                let doctor = if principal.role == Role::Doctor {
                    principal.user_id
                } else {
                    original.doctor.id()
                };
                let renewal_note = NonEmptyText::new(format!(
                    "Renewal of {}",
                    original.prescription_number
                ))
                .map_err(|e| CareError::InvalidInput(e.to_string()))?;
                let draft = Draft {
                    patient: original.patient.clone(),
                    doctor,
                    medications: original
                        .medications
                        .iter()
                        .map(|line| MedicationLine {
                            dispensed_quantity: 0,
                            ..line.clone()
                        })
                        .collect(),
                    pharmacy: original.pharmacy.clone(),
                    diagnosis: original.diagnosis.clone(),
                    notes: Some(renewal_note),
                    expires_at: *expires_at,
                    renewal_count: original.renewal_count + 1,
                    original_prescription: Some(original.id),
                };
                self.plan_draft(draft)
            }
        }
    }

    pub fn get(&self, principal: Option<&Principal>, id: RecordId) -> CareResult<Prescription> {
        let principal = require_principal(principal)?;
        self.ctx.engine().require_any(principal, VIEW)?;
        self.load_accessible(principal, id)
    }

    /// Prescriptions the principal may see, newest first.
    pub fn list_visible(&self, principal: Option<&Principal>) -> CareResult<Vec<Prescription>> {
        let principal = require_principal(principal)?;
        self.ctx.engine().require_any(principal, VIEW)?;
        let subject = self.ctx.subject(principal);
        let engine = self.ctx.engine();
        let mut visible = self
            .store
            .find(&|p: &Prescription| engine.can_access(p, &subject))?;
        visible.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(visible)
    }

    fn plan_draft(&self, draft: Draft) -> CareResult<Plan<Prescription>> {
        let now = self.ctx.now();
        let expires_at = match draft.expires_at {
            Some(at) => self.validate_expiry(at)?,
            None => now
                .checked_add_signed(self.ctx.cfg().prescription_validity())
                .ok_or_else(|| {
                    CareError::InvalidInput("default expiry is out of range".into())
                })?,
        };

        let prefix = format!("{PRESCRIPTION_NUMBER_PREFIX}-{}-", now.year());
        let issued = self
            .store
            .find(&|p: &Prescription| p.prescription_number.starts_with(&prefix))?
            .len();
        let number = sequence_number(PRESCRIPTION_NUMBER_PREFIX, now.year(), issued + 1);

        let prescription = Prescription {
            id: RecordId::new(),
            revision: 0,
            prescription_number: number.clone(),
            patient: draft.patient,
            doctor: Ref::Id(draft.doctor),
            pharmacy: draft.pharmacy,
            medications: draft.medications,
            diagnosis: draft.diagnosis,
            notes: draft.notes,
            status: PrescriptionStatus::Draft,
            expires_at,
            signed_by: None,
            signed_at: None,
            sent_at: None,
            dispensed_by: None,
            dispensed_at: None,
            cancellation: None,
            renewal_count: draft.renewal_count,
            original_prescription: draft.original_prescription,
            created_at: now,
            updated_at: now,
        };
        let write = Write::create(prescription).unless(prescription_number_guard(number));
        precheck(self.store.as_ref(), &write)?;
        Ok(Plan::new(write, Some(PrescriptionStatus::Draft.as_str())))
    }

    fn plan_dispense(
        &self,
        principal: &Principal,
        current: Prescription,
        lines: &[LineDispense],
    ) -> CareResult<Plan<Prescription>> {
        if current.status == PrescriptionStatus::Dispensed {
            return Err(CareError::Conflict(
                "prescription has already been fully dispensed".into(),
            ));
        }
        if lines.is_empty() {
            return Err(CareError::InvalidInput("nothing to dispense".into()));
        }

        let mut next = current;
        for request in lines {
            let line = next
                .medications
                .iter_mut()
                .find(|l| l.line_id == request.line_id)
                .ok_or_else(|| {
                    CareError::InvalidInput(format!(
                        "prescription has no line {}",
                        request.line_id
                    ))
                })?;
            if line.is_fully_dispensed() {
                return Err(CareError::Conflict(format!(
                    "line {} has already been fully dispensed",
                    line.line_id
                )));
            }
            if request.quantity == 0 || request.quantity > line.remaining() {
                return Err(CareError::InvalidInput(format!(
                    "line {} has {} remaining, cannot dispense {}",
                    line.line_id,
                    line.remaining(),
                    request.quantity
                )));
            }
            line.dispensed_quantity += request.quantity;
        }

        let to = if next.is_fully_dispensed() {
            PrescriptionStatus::Dispensed
        } else {
            PrescriptionStatus::PartiallyDispensed
        };
        let now = self.ctx.now();
        self.transition(next, to, |p| {
            p.dispensed_by = Some(principal.user_id);
            p.dispensed_at = Some(now);
        })
    }

    fn load_accessible(&self, principal: &Principal, id: RecordId) -> CareResult<Prescription> {
        let prescription = load(self.store.as_ref(), ResourceKind::Prescription, id)?;
        self.ctx
            .engine()
            .require_access(&prescription, &self.ctx.subject(principal))?;
        Ok(prescription)
    }

    /// Loads a prescription the principal wrote, or any prescription for an admin.
    fn load_owned(&self, principal: &Principal, id: RecordId) -> CareResult<Prescription> {
        self.ctx
            .engine()
            .require_permission(principal, Permission::CreatePrescriptions)?;
        let prescription = load(self.store.as_ref(), ResourceKind::Prescription, id)?;
        if !principal.is_admin() && !prescription.doctor.is(principal.user_id) {
            return Err(CareError::ResourceAccessDenied {
                kind: ResourceKind::Prescription,
            });
        }
        Ok(prescription)
    }

    /// Checks the step from the prescription's effective status, so an expired prescription
    /// goes nowhere.
    fn transition(
        &self,
        current: Prescription,
        to: PrescriptionStatus,
        annotate: impl FnOnce(&mut Prescription),
    ) -> CareResult<Plan<Prescription>> {
        let now = self.ctx.now();
        let status = check_transition(current.effective_status(now), to)?;
        let mut next = current;
        next.status = status;
        annotate(&mut next);
        next.updated_at = now;
        Ok(Plan::new(Write::update(next), Some(status.as_str())))
    }

    fn known_pharmacy(
        &self,
        pharmacy: Option<PharmacyId>,
    ) -> CareResult<Option<Ref<PharmacySummary>>> {
        match pharmacy {
            Some(id) if !self.ctx.directory().pharmacy_exists(id) => Err(CareError::InvalidInput(
                format!("pharmacy {id} does not exist"),
            )),
            Some(id) => Ok(Some(Ref::Id(id))),
            None => Ok(None),
        }
    }

    fn validate_expiry(&self, expires_at: DateTime<Utc>) -> CareResult<DateTime<Utc>> {
        if expires_at <= self.ctx.now() {
            return Err(CareError::InvalidInput(
                "expiry must be in the future".into(),
            ));
        }
        Ok(expires_at)
    }
}

/// Fields of a prescription about to be drafted, from a new order or a renewal.
struct Draft {
    patient: Ref<PatientSummary>,
    doctor: UserId,
    medications: Vec<MedicationLine>,
    pharmacy: Option<Ref<PharmacySummary>>,
    diagnosis: Option<NonEmptyText>,
    notes: Option<NonEmptyText>,
    expires_at: Option<DateTime<Utc>>,
    renewal_count: u32,
    original_prescription: Option<RecordId>,
}

fn number_lines(medications: &[NewMedication]) -> CareResult<Vec<MedicationLine>> {
    if medications.is_empty() {
        return Err(CareError::InvalidInput(
            "a prescription needs at least one medication".into(),
        ));
    }
    (1u32..)
        .zip(medications)
        .map(|(line_id, m)| {
            if m.quantity == 0 {
                return Err(CareError::InvalidInput(format!(
                    "medication {} needs a positive quantity",
                    m.name
                )));
            }
            Ok(MedicationLine {
                line_id,
                name: m.name.clone(),
                dosage: m.dosage.clone(),
                frequency: m.frequency.clone(),
                duration: m.duration.clone(),
                quantity: m.quantity,
                dispensed_quantity: 0,
            })
        })
        .collect()
}
