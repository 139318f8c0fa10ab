//! Appointment scheduling service.
//!
//! Booking is reachable through `schedule_any_doctor` (front desk) or
//! `schedule_own_appointments` (a doctor booking their own diary, a patient booking for
//! themselves). Double booking is prevented by conflict guards that the store evaluates
//! atomically with the write.

use crate::access::{OwnedResource, ResourceKind, Subject};
use crate::audit::AuditAction;
use crate::decision::Decision;
use crate::lifecycle::appointment::{
    doctor_overlap_guard, free_slots, interval_end, patient_instant_guard, Appointment,
    AppointmentStatus, Slot,
};
use crate::lifecycle::{check_transition, LifecycleStatus};
use crate::principal::{require_principal, Principal};
use crate::reference::Ref;
use crate::services::{load, precheck, CareContext, Plan};
use crate::store::{RecordStore, Write};
use crate::{CareError, CareResult};
use careflow_registry::{Permission, Role};
use careflow_types::{NonEmptyText, PatientId, RecordId, UserId};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use std::sync::Arc;

const SCHEDULE: &[Permission] = &[
    Permission::ScheduleAnyDoctor,
    Permission::ScheduleOwnAppointments,
];
const CANCEL: &[Permission] = &[
    Permission::CancelAnyAppointment,
    Permission::CancelOwnAppointments,
];
const VIEW: &[Permission] = &[
    Permission::ViewAllAppointments,
    Permission::ViewOwnAppointments,
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewAppointment {
    /// Required for staff; patients always book for their own profile.
    pub patient: Option<PatientId>,
    pub doctor: UserId,
    pub start: DateTime<Utc>,
    pub duration_minutes: u32,
    pub reason: Option<NonEmptyText>,
    pub notes: Option<NonEmptyText>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AppointmentAction {
    Create(NewAppointment),
    Reschedule {
        id: RecordId,
        start: DateTime<Utc>,
        duration_minutes: Option<u32>,
    },
    EditNotes {
        id: RecordId,
        notes: NonEmptyText,
    },
    Cancel {
        id: RecordId,
        reason: Option<NonEmptyText>,
    },
    Complete {
        id: RecordId,
        notes: Option<NonEmptyText>,
    },
    MarkNoShow {
        id: RecordId,
    },
}

impl AppointmentAction {
    pub fn target(&self) -> Option<RecordId> {
        match self {
            Self::Create(_) => None,
            Self::Reschedule { id, .. }
            | Self::EditNotes { id, .. }
            | Self::Cancel { id, .. }
            | Self::Complete { id, .. }
            | Self::MarkNoShow { id } => Some(*id),
        }
    }

    fn audit_action(&self) -> AuditAction {
        match self {
            Self::Create(_) => AuditAction::Create,
            Self::Reschedule { .. } | Self::EditNotes { .. } => AuditAction::Update,
            Self::Cancel { .. } | Self::Complete { .. } | Self::MarkNoShow { .. } => {
                AuditAction::StatusChange
            }
        }
    }
}

#[derive(Clone)]
pub struct AppointmentService {
    ctx: CareContext,
    store: Arc<dyn RecordStore<Appointment>>,
}

impl AppointmentService {
    pub fn new(ctx: CareContext, store: Arc<dyn RecordStore<Appointment>>) -> Self {
        Self { ctx, store }
    }

    /// Reports whether `action` would be accepted, without writing or auditing anything.
    pub fn decide(&self, principal: Option<&Principal>, action: &AppointmentAction) -> Decision {
        Decision::from_plan(&self.plan(principal, action), Plan::next_state)
    }

    /// Checks and applies `action`, then records the outcome in the audit log.
    pub fn apply(
        &self,
        principal: Option<&Principal>,
        action: AppointmentAction,
    ) -> CareResult<Appointment> {
        self.ctx.audited(
            principal,
            action.audit_action(),
            ResourceKind::Appointment,
            action.target(),
            || {
                let stored = self.plan(principal, &action)?.execute(self.store.as_ref())?;
                tracing::info!(
                    appointment = %stored.id,
                    status = stored.status.as_str(),
                    revision = stored.revision,
                    "appointment written"
                );
                Ok(stored)
            },
        )
    }

    /// Runs every check for `action` and returns the write it would perform.
    pub fn plan(
        &self,
        principal: Option<&Principal>,
        action: &AppointmentAction,
    ) -> CareResult<Plan<Appointment>> {
        let principal = require_principal(principal)?;
        match action {
            AppointmentAction::Create(new) => self.plan_create(principal, new),
            AppointmentAction::Reschedule {
                id,
                start,
                duration_minutes,
            } => self.plan_reschedule(principal, *id, *start, *duration_minutes),
            AppointmentAction::EditNotes { id, notes } => {
                self.plan_edit_notes(principal, *id, notes)
            }
            AppointmentAction::Cancel { id, reason } => {
                self.plan_cancel(principal, *id, reason.as_ref())
            }
            AppointmentAction::Complete { id, notes } => {
                self.plan_complete(principal, *id, notes.as_ref())
            }
            AppointmentAction::MarkNoShow { id } => self.plan_no_show(principal, *id),
        }
    }

    pub fn get(&self, principal: Option<&Principal>, id: RecordId) -> CareResult<Appointment> {
        let principal = require_principal(principal)?;
        self.ctx.engine().require_any(principal, VIEW)?;
        let appointment = load(self.store.as_ref(), ResourceKind::Appointment, id)?;
        self.ctx
            .engine()
            .require_access(&appointment, &self.ctx.subject(principal))?;
        Ok(appointment)
    }

    /// Appointments the principal may see, ordered by start time.
    pub fn list_visible(&self, principal: Option<&Principal>) -> CareResult<Vec<Appointment>> {
        let principal = require_principal(principal)?;
        self.ctx.engine().require_any(principal, VIEW)?;
        let subject = self.ctx.subject(principal);
        let engine = self.ctx.engine();
        let mut visible = self
            .store
            .find(&|a: &Appointment| engine.can_access(a, &subject))?;
        visible.sort_by_key(|a| a.start);
        Ok(visible)
    }

    /// Free slots in a doctor's working day.
    pub fn availability(
        &self,
        principal: Option<&Principal>,
        doctor: UserId,
        date: NaiveDate,
    ) -> CareResult<Vec<Slot>> {
        let principal = require_principal(principal)?;
        self.ctx.engine().require_any(
            principal,
            &[
                Permission::ViewAllAppointments,
                Permission::ScheduleAnyDoctor,
                Permission::ScheduleOwnAppointments,
            ],
        )?;
        self.require_doctor(doctor)?;

        let day_start = Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN));
        let day_end = day_start
            .checked_add_signed(Duration::days(1))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let booked = self.store.find(&|a: &Appointment| {
            a.is_scheduled() && a.doctor.is(doctor) && a.overlaps(day_start, day_end)
        })?;
        let cfg = self.ctx.cfg();
        Ok(free_slots(date, cfg.working_hours(), cfg.slot_minutes(), &booked))
    }

    // ========================================================================
    // Planning (internal)
    // ========================================================================

    fn plan_create(
        &self,
        principal: &Principal,
        new: &NewAppointment,
    ) -> CareResult<Plan<Appointment>> {
        let via = self.ctx.engine().require_any(principal, SCHEDULE)?;
        let subject = self.ctx.subject(principal);
        let patient = resolve_patient(&subject, new.patient)?;
        self.require_doctor(new.doctor)?;
        if !self.ctx.directory().patient_exists(patient) {
            return Err(CareError::InvalidInput(format!(
                "patient {patient} does not exist"
            )));
        }
        if via != Permission::ScheduleAnyDoctor
            && !subject.is_user(new.doctor)
            && !subject.is_patient(patient)
        {
            return Err(CareError::ResourceAccessDenied {
                kind: ResourceKind::Appointment,
            });
        }
        validate_window(new.start, new.duration_minutes)?;

        let now = self.ctx.now();
        let appointment = Appointment {
            id: RecordId::new(),
            revision: 0,
            patient: Ref::Id(patient),
            doctor: Ref::Id(new.doctor),
            start: new.start,
            duration_minutes: new.duration_minutes,
            reason: new.reason.clone(),
            notes: new.notes.clone(),
            status: AppointmentStatus::Scheduled,
            created_by: principal.user_id,
            created_at: now,
            updated_at: now,
        };
        let write = booking_guards(Write::create(appointment));
        precheck(self.store.as_ref(), &write)?;
        Ok(Plan::new(write, Some(AppointmentStatus::Scheduled.as_str())))
    }

    fn plan_reschedule(
        &self,
        principal: &Principal,
        id: RecordId,
        start: DateTime<Utc>,
        duration_minutes: Option<u32>,
    ) -> CareResult<Plan<Appointment>> {
        let via = self.ctx.engine().require_any(principal, SCHEDULE)?;
        let current = load(self.store.as_ref(), ResourceKind::Appointment, id)?;
        let subject = self.ctx.subject(principal);
        self.ctx.engine().require_access(&current, &subject)?;
        if principal.role == Role::Patient {
            return Err(CareError::InvalidInput(
                "patients may only edit appointment notes".into(),
            ));
        }
        if via != Permission::ScheduleAnyDoctor && !subject.is_user(current.doctor.id()) {
            return Err(CareError::ResourceAccessDenied {
                kind: ResourceKind::Appointment,
            });
        }
        require_scheduled(&current, "rescheduled")?;

        let mut next = current;
        next.start = start;
        if let Some(minutes) = duration_minutes {
            next.duration_minutes = minutes;
        }
        validate_window(next.start, next.duration_minutes)?;
        next.updated_at = self.ctx.now();

        let write = booking_guards(Write::update(next));
        precheck(self.store.as_ref(), &write)?;
        Ok(Plan::new(write, Some(AppointmentStatus::Scheduled.as_str())))
    }

    fn plan_edit_notes(
        &self,
        principal: &Principal,
        id: RecordId,
        notes: &NonEmptyText,
    ) -> CareResult<Plan<Appointment>> {
        self.ctx.engine().require_any(principal, SCHEDULE)?;
        let current = load(self.store.as_ref(), ResourceKind::Appointment, id)?;
        self.ctx
            .engine()
            .require_access(&current, &self.ctx.subject(principal))?;
        require_scheduled(&current, "edited")?;

        let mut next = current;
        next.notes = Some(notes.clone());
        next.updated_at = self.ctx.now();
        Ok(Plan::new(
            Write::update(next),
            Some(AppointmentStatus::Scheduled.as_str()),
        ))
    }

    fn plan_cancel(
        &self,
        principal: &Principal,
        id: RecordId,
        reason: Option<&NonEmptyText>,
    ) -> CareResult<Plan<Appointment>> {
        let via = self.ctx.engine().require_any(principal, CANCEL)?;
        let current = load(self.store.as_ref(), ResourceKind::Appointment, id)?;
        if via != Permission::CancelAnyAppointment
            && !current.is_owned_by(&self.ctx.subject(principal))
        {
            return Err(CareError::ResourceAccessDenied {
                kind: ResourceKind::Appointment,
            });
        }
        let status = check_transition(current.status, AppointmentStatus::Cancelled)?;

        let mut next = current;
        if let Some(reason) = reason {
            next.notes = Some(NonEmptyText::append_section(
                next.notes.as_ref(),
                "Cancellation reason",
                reason,
            ));
        }
        next.status = status;
        next.updated_at = self.ctx.now();
        Ok(Plan::new(Write::update(next), Some(status.as_str())))
    }

    fn plan_complete(
        &self,
        principal: &Principal,
        id: RecordId,
        notes: Option<&NonEmptyText>,
    ) -> CareResult<Plan<Appointment>> {
        self.ctx
            .engine()
            .require_permission(principal, Permission::MarkAppointmentComplete)?;
        let current = load(self.store.as_ref(), ResourceKind::Appointment, id)?;
        if !current.doctor.is(principal.user_id) {
            return Err(CareError::ResourceAccessDenied {
                kind: ResourceKind::Appointment,
            });
        }
        let status = check_transition(current.status, AppointmentStatus::Completed)?;

        let mut next = current;
        if let Some(notes) = notes {
            next.notes = Some(NonEmptyText::append_section(
                next.notes.as_ref(),
                "Completion notes",
                notes,
            ));
        }
        next.status = status;
        next.updated_at = self.ctx.now();
        Ok(Plan::new(Write::update(next), Some(status.as_str())))
    }

    fn plan_no_show(&self, principal: &Principal, id: RecordId) -> CareResult<Plan<Appointment>> {
        self.ctx
            .engine()
            .require_permission(principal, Permission::MarkAppointmentComplete)?;
        let current = load(self.store.as_ref(), ResourceKind::Appointment, id)?;
        if !principal.is_admin() && !current.doctor.is(principal.user_id) {
            return Err(CareError::ResourceAccessDenied {
                kind: ResourceKind::Appointment,
            });
        }
        let status = check_transition(current.status, AppointmentStatus::NoShow)?;

        let mut next = current;
        next.status = status;
        next.updated_at = self.ctx.now();
        Ok(Plan::new(Write::update(next), Some(status.as_str())))
    }

    fn require_doctor(&self, user: UserId) -> CareResult<()> {
        match self.ctx.directory().role_of(user) {
            Some(Role::Doctor) => Ok(()),
            _ => Err(CareError::InvalidInput(format!("{user} is not a doctor"))),
        }
    }
}

/// Patients always book for their own profile; staff must name the patient.
fn resolve_patient(subject: &Subject<'_>, requested: Option<PatientId>) -> CareResult<PatientId> {
    if subject.role() != Role::Patient {
        return requested.ok_or_else(|| CareError::InvalidInput("patient is required".into()));
    }
    let own = subject.patient_profile().ok_or_else(|| {
        CareError::InvalidInput("no patient profile is linked to this account".into())
    })?;
    match requested {
        Some(other) if other != own => Err(CareError::ResourceAccessDenied {
            kind: ResourceKind::Appointment,
        }),
        _ => Ok(own),
    }
}

fn booking_guards(write: Write<Appointment>) -> Write<Appointment> {
    let candidate = write.record();
    let doctor = candidate.doctor.id();
    let patient = candidate.patient.id();
    let (start, end) = (candidate.start, candidate.end());
    write
        .unless(doctor_overlap_guard(doctor, start, end))
        .unless(patient_instant_guard(patient, start))
}

fn validate_window(start: DateTime<Utc>, minutes: u32) -> CareResult<()> {
    if minutes == 0 {
        return Err(CareError::InvalidInput(
            "appointment duration must be positive".into(),
        ));
    }
    if interval_end(start, minutes).is_none() {
        return Err(CareError::InvalidInput(
            "appointment ends past the supported calendar range".into(),
        ));
    }
    Ok(())
}

fn require_scheduled(appointment: &Appointment, verb: &str) -> CareResult<()> {
    if appointment.is_scheduled() {
        return Ok(());
    }
    Err(CareError::InvalidTransition(format!(
        "a {} appointment cannot be {verb}",
        appointment.status.as_str()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditOutcome;
    use crate::services::test_support::{at, text, Fixture};
    use crate::store::InMemoryStore;
    use std::sync::Barrier;

    fn service(f: &Fixture) -> AppointmentService {
        AppointmentService::new(f.ctx.clone(), Arc::new(InMemoryStore::<Appointment>::new()))
    }

    fn booking(f: &Fixture, start: DateTime<Utc>, minutes: u32) -> AppointmentAction {
        AppointmentAction::Create(NewAppointment {
            patient: Some(f.patient_id),
            doctor: f.doctor.user_id,
            start,
            duration_minutes: minutes,
            reason: Some(text("Follow-up")),
            notes: None,
        })
    }

    fn booked(f: &Fixture, svc: &AppointmentService) -> Appointment {
        svc.apply(Some(&f.secretary), booking(f, at(9, 0), 30))
            .expect("booking")
    }

    #[test]
    fn test_overlapping_booking_for_same_doctor_conflicts() {
        let f = Fixture::new();
        let svc = service(&f);
        booked(&f, &svc);

        let clash = AppointmentAction::Create(NewAppointment {
            patient: Some(f.other_patient_id),
            doctor: f.doctor.user_id,
            start: at(9, 15),
            duration_minutes: 30,
            reason: None,
            notes: None,
        });
        let err = svc
            .apply(Some(&f.secretary), clash)
            .expect_err("overlap");
        assert!(matches!(err, CareError::Conflict(_)));
        assert_eq!(err.status_code(), 409);
    }

    #[test]
    fn test_back_to_back_bookings_are_legal() {
        let f = Fixture::new();
        let svc = service(&f);
        booked(&f, &svc);

        let next = AppointmentAction::Create(NewAppointment {
            patient: Some(f.other_patient_id),
            doctor: f.doctor.user_id,
            start: at(9, 30),
            duration_minutes: 30,
            reason: None,
            notes: None,
        });
        assert!(svc.apply(Some(&f.secretary), next).is_ok());
    }

    #[test]
    fn test_patient_exact_instant_conflicts_but_overlap_does_not() {
        let f = Fixture::new();
        let svc = service(&f);
        booked(&f, &svc);

        let same_start = AppointmentAction::Create(NewAppointment {
            patient: Some(f.patient_id),
            doctor: f.other_doctor.user_id,
            start: at(9, 0),
            duration_minutes: 15,
            reason: None,
            notes: None,
        });
        assert!(matches!(
            svc.apply(Some(&f.secretary), same_start),
            Err(CareError::Conflict(msg)) if msg.contains("patient")
        ));

        let overlapping = AppointmentAction::Create(NewAppointment {
            patient: Some(f.patient_id),
            doctor: f.other_doctor.user_id,
            start: at(9, 10),
            duration_minutes: 15,
            reason: None,
            notes: None,
        });
        assert!(svc.apply(Some(&f.secretary), overlapping).is_ok());
    }

    #[test]
    fn test_patient_books_only_for_self() {
        let f = Fixture::new();
        let svc = service(&f);

        let own = AppointmentAction::Create(NewAppointment {
            patient: None,
            doctor: f.doctor.user_id,
            start: at(11, 0),
            duration_minutes: 30,
            reason: None,
            notes: None,
        });
        let created = svc.apply(Some(&f.patient), own).expect("own booking");
        assert!(created.patient.is(f.patient_id));

        let for_someone_else = AppointmentAction::Create(NewAppointment {
            patient: Some(f.other_patient_id),
            doctor: f.doctor.user_id,
            start: at(12, 0),
            duration_minutes: 30,
            reason: None,
            notes: None,
        });
        assert!(matches!(
            svc.apply(Some(&f.patient), for_someone_else),
            Err(CareError::ResourceAccessDenied { .. })
        ));
    }

    #[test]
    fn test_doctor_cannot_book_for_another_doctor() {
        let f = Fixture::new();
        let svc = service(&f);
        let action = AppointmentAction::Create(NewAppointment {
            patient: Some(f.patient_id),
            doctor: f.other_doctor.user_id,
            start: at(10, 0),
            duration_minutes: 30,
            reason: None,
            notes: None,
        });
        assert!(matches!(
            svc.apply(Some(&f.doctor), action),
            Err(CareError::ResourceAccessDenied { .. })
        ));
    }

    #[test]
    fn test_booking_with_non_doctor_is_invalid_input() {
        let f = Fixture::new();
        let svc = service(&f);
        let action = AppointmentAction::Create(NewAppointment {
            patient: Some(f.patient_id),
            doctor: f.nurse.user_id,
            start: at(10, 0),
            duration_minutes: 30,
            reason: None,
            notes: None,
        });
        assert!(matches!(
            svc.apply(Some(&f.secretary), action),
            Err(CareError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_unauthenticated_and_unpermitted_callers() {
        let f = Fixture::new();
        let svc = service(&f);
        assert!(matches!(
            svc.apply(None, booking(&f, at(9, 0), 30)),
            Err(CareError::AuthenticationRequired)
        ));
        assert!(matches!(
            svc.apply(Some(&f.pharmacist), booking(&f, at(9, 0), 30)),
            Err(CareError::PermissionDenied {
                permission: "schedule_any_doctor"
            })
        ));
    }

    #[test]
    fn test_cancel_rules() {
        let f = Fixture::new();
        let svc = service(&f);
        let appointment = booked(&f, &svc);
        let cancel = |reason: &str| AppointmentAction::Cancel {
            id: appointment.id,
            reason: Some(text(reason)),
        };

        assert!(matches!(
            svc.apply(Some(&f.nurse), cancel("no")),
            Err(CareError::ResourceAccessDenied { .. })
        ));
        assert!(matches!(
            svc.apply(Some(&f.other_patient), cancel("no")),
            Err(CareError::ResourceAccessDenied { .. })
        ));

        let cancelled = svc
            .apply(Some(&f.patient), cancel("Travelling"))
            .expect("owner cancels");
        assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
        assert_eq!(
            cancelled.notes.as_ref().map(NonEmptyText::as_str),
            Some("Cancellation reason: Travelling")
        );

        assert!(matches!(
            svc.apply(Some(&f.admin), cancel("again")),
            Err(CareError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_only_owning_doctor_completes_and_only_once() {
        let f = Fixture::new();
        let svc = service(&f);
        let appointment = booked(&f, &svc);
        let complete = AppointmentAction::Complete {
            id: appointment.id,
            notes: Some(text("Stable")),
        };

        assert!(matches!(
            svc.apply(Some(&f.other_doctor), complete.clone()),
            Err(CareError::ResourceAccessDenied { .. })
        ));
        assert!(matches!(
            svc.apply(Some(&f.admin), complete.clone()),
            Err(CareError::ResourceAccessDenied { .. })
        ));

        let done = svc
            .apply(Some(&f.doctor), complete.clone())
            .expect("owning doctor");
        assert_eq!(done.status, AppointmentStatus::Completed);
        assert_eq!(done.revision, 2);

        assert!(matches!(
            svc.apply(Some(&f.doctor), complete),
            Err(CareError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_no_show_by_admin() {
        let f = Fixture::new();
        let svc = service(&f);
        let appointment = booked(&f, &svc);
        let action = AppointmentAction::MarkNoShow { id: appointment.id };

        assert!(svc.apply(Some(&f.other_doctor), action.clone()).is_err());
        let marked = svc.apply(Some(&f.admin), action).expect("admin");
        assert_eq!(marked.status, AppointmentStatus::NoShow);
    }

    #[test]
    fn test_patient_may_only_edit_notes() {
        let f = Fixture::new();
        let svc = service(&f);
        let appointment = booked(&f, &svc);

        let edited = svc
            .apply(
                Some(&f.patient),
                AppointmentAction::EditNotes {
                    id: appointment.id,
                    notes: text("Please call on arrival"),
                },
            )
            .expect("notes");
        assert_eq!(
            edited.notes.as_ref().map(NonEmptyText::as_str),
            Some("Please call on arrival")
        );

        let moved = AppointmentAction::Reschedule {
            id: appointment.id,
            start: at(14, 0),
            duration_minutes: None,
        };
        assert!(matches!(
            svc.apply(Some(&f.patient), moved),
            Err(CareError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_reschedule_checks_conflicts_but_not_against_itself() {
        let f = Fixture::new();
        let svc = service(&f);
        let first = booked(&f, &svc);
        svc.apply(
            Some(&f.secretary),
            AppointmentAction::Create(NewAppointment {
                patient: Some(f.other_patient_id),
                doctor: f.doctor.user_id,
                start: at(10, 0),
                duration_minutes: 30,
                reason: None,
                notes: None,
            }),
        )
        .expect("second booking");

        let extend = AppointmentAction::Reschedule {
            id: first.id,
            start: at(9, 0),
            duration_minutes: Some(45),
        };
        assert!(svc.apply(Some(&f.doctor), extend).is_ok());

        let onto_second = AppointmentAction::Reschedule {
            id: first.id,
            start: at(10, 15),
            duration_minutes: Some(30),
        };
        assert!(matches!(
            svc.apply(Some(&f.doctor), onto_second),
            Err(CareError::Conflict(_))
        ));
    }

    #[test]
    fn test_booking_past_calendar_range_is_invalid_input() {
        let f = Fixture::new();
        let svc = service(&f);
        let late = DateTime::<Utc>::MAX_UTC - Duration::minutes(10);
        assert!(matches!(
            svc.apply(Some(&f.secretary), booking(&f, late, 30)),
            Err(CareError::InvalidInput(msg)) if msg.contains("calendar range")
        ));

        let first = booked(&f, &svc);
        let reschedule = AppointmentAction::Reschedule {
            id: first.id,
            start: late,
            duration_minutes: None,
        };
        assert!(matches!(
            svc.apply(Some(&f.secretary), reschedule),
            Err(CareError::InvalidInput(_))
        ));
        assert_eq!(svc.get(Some(&f.secretary), first.id).expect("get").start, at(9, 0));
    }

    #[test]
    fn test_decide_has_no_side_effects() {
        let f = Fixture::new();
        let svc = service(&f);
        booked(&f, &svc);
        let events_before = f.audit.events().len();

        let decision = svc.decide(Some(&f.secretary), &booking(&f, at(9, 15), 30));
        assert!(!decision.allowed);
        assert_eq!(decision.status_code, Some(409));

        let ok = svc.decide(Some(&f.secretary), &booking(&f, at(13, 0), 30));
        assert!(ok.allowed);
        assert_eq!(ok.next_state.as_deref(), Some("scheduled"));

        assert_eq!(svc.store.count().expect("count"), 1);
        assert_eq!(f.audit.events().len(), events_before);
    }

    #[test]
    fn test_apply_records_audit_events() {
        let f = Fixture::new();
        let svc = service(&f);
        let appointment = booked(&f, &svc);
        let _ = svc.apply(
            Some(&f.nurse),
            AppointmentAction::Cancel {
                id: appointment.id,
                reason: None,
            },
        );

        let events = f.audit.for_resource(appointment.id);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, AuditAction::Create);
        assert_eq!(events[0].outcome, AuditOutcome::Success);
        assert_eq!(events[1].outcome, AuditOutcome::Denied);
        assert_eq!(events[1].actor, Some(f.nurse.user_id));
    }

    #[test]
    fn test_visibility() {
        let f = Fixture::new();
        let svc = service(&f);
        let appointment = booked(&f, &svc);

        assert!(svc.get(Some(&f.patient), appointment.id).is_ok());
        assert!(svc.get(Some(&f.secretary), appointment.id).is_ok());
        assert!(matches!(
            svc.get(Some(&f.other_patient), appointment.id),
            Err(CareError::ResourceAccessDenied { .. })
        ));
        assert_eq!(svc.list_visible(Some(&f.doctor)).expect("list").len(), 1);
        assert!(svc
            .list_visible(Some(&f.other_doctor))
            .expect("list")
            .is_empty());
    }

    #[test]
    fn test_availability_excludes_booked_slots() {
        let f = Fixture::new();
        let svc = service(&f);
        booked(&f, &svc);

        let slots = svc
            .availability(Some(&f.patient), f.doctor.user_id, at(0, 0).date_naive())
            .expect("slots");
        assert_eq!(slots.len(), 15);
        assert_eq!(slots[0].start, at(9, 30));

        assert!(matches!(
            svc.availability(Some(&f.patient), f.nurse.user_id, at(0, 0).date_naive()),
            Err(CareError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_concurrent_bookings_admit_exactly_one() {
        let f = Fixture::new();
        let svc = service(&f);
        let barrier = Arc::new(Barrier::new(2));
        let requests = [
            (f.secretary.clone(), f.patient_id),
            (f.admin.clone(), f.other_patient_id),
        ];

        let results: Vec<CareResult<Appointment>> = std::thread::scope(|scope| {
            let handles: Vec<_> = requests
                .iter()
                .map(|(principal, patient)| {
                    let svc = svc.clone();
                    let barrier = barrier.clone();
                    let action = AppointmentAction::Create(NewAppointment {
                        patient: Some(*patient),
                        doctor: f.doctor.user_id,
                        start: at(15, 0),
                        duration_minutes: 30,
                        reason: None,
                        notes: None,
                    });
                    scope.spawn(move || {
                        barrier.wait();
                        svc.apply(Some(principal), action)
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("thread"))
                .collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(CareError::Conflict(_)))));
    }
}
