//! Shared fixtures for service tests.

use crate::audit::{AuditRecorder, InMemoryAuditSink};
use crate::clock::ManualClock;
use crate::config::CoreConfig;
use crate::directory::InMemoryDirectory;
use crate::principal::Principal;
use crate::services::CareContext;
use careflow_registry::{PermissionRegistry, Role};
use careflow_types::{NonEmptyText, PatientId, PharmacyId};
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

/// A populated directory with one account per role and a context wired to in-memory sinks.
pub(crate) struct Fixture {
    pub dir: Arc<InMemoryDirectory>,
    pub audit: Arc<InMemoryAuditSink>,
    pub clock: Arc<ManualClock>,
    pub ctx: CareContext,
    pub admin: Principal,
    pub doctor: Principal,
    pub other_doctor: Principal,
    pub nurse: Principal,
    pub secretary: Principal,
    pub lab_tech: Principal,
    pub pharmacist: Principal,
    pub pharmacy: PharmacyId,
    pub other_pharmacy: PharmacyId,
    pub patient: Principal,
    pub patient_id: PatientId,
    pub other_patient: Principal,
    pub other_patient_id: PatientId,
}

impl Fixture {
    pub fn new() -> Self {
        let registry = Arc::new(PermissionRegistry::builtin().expect("builtin registry"));
        let cfg = Arc::new(CoreConfig::with_defaults(registry));
        let dir = Arc::new(InMemoryDirectory::new());
        let audit = Arc::new(InMemoryAuditSink::new());
        let clock = Arc::new(ManualClock::new(at(8, 0)));

        let principal = |role: Role| Principal::new(dir.add_user(role), role);
        let admin = principal(Role::Admin);
        let doctor = principal(Role::Doctor);
        let other_doctor = principal(Role::Doctor);
        let nurse = principal(Role::Nurse);
        let secretary = principal(Role::Secretary);
        let lab_tech = principal(Role::LabTechnician);
        let pharmacist = principal(Role::Pharmacist);
        let patient = principal(Role::Patient);
        let other_patient = principal(Role::Patient);

        let pharmacy = dir.add_pharmacy();
        let other_pharmacy = dir.add_pharmacy();
        dir.assign_pharmacist(pharmacist.user_id, pharmacy);
        let patient_id = dir.add_patient(Some(patient.user_id));
        let other_patient_id = dir.add_patient(Some(other_patient.user_id));

        let ctx = CareContext::new(cfg, dir.clone(), AuditRecorder::new(audit.clone()))
            .with_clock(clock.clone());

        Self {
            dir,
            audit,
            clock,
            ctx,
            admin,
            doctor,
            other_doctor,
            nurse,
            secretary,
            lab_tech,
            pharmacist,
            pharmacy,
            other_pharmacy,
            patient,
            patient_id,
            other_patient,
            other_patient_id,
        }
    }
}

/// A time on the fixture's reference day, 2 March 2026 (UTC).
pub(crate) fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, hour, minute, 0)
        .single()
        .expect("valid fixture time")
}

pub(crate) fn text(s: &str) -> NonEmptyText {
    NonEmptyText::new(s).expect("non-empty fixture text")
}
