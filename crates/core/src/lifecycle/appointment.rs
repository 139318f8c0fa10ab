//! Appointment records and their scheduling rules.

use crate::access::{OwnedResource, ResourceKind, Subject};
use crate::lifecycle::LifecycleStatus;
use crate::reference::{PatientSummary, Ref, UserSummary};
use crate::store::{ConflictGuard, Record};
use careflow_registry::Permission;
use careflow_types::{NonEmptyText, PatientId, RecordId, UserId};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
    NoShow,
}

impl LifecycleStatus for AppointmentStatus {
    const KIND: ResourceKind = ResourceKind::Appointment;

    fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::NoShow => "no_show",
        }
    }

    fn allowed_next(&self) -> &'static [Self] {
        match self {
            Self::Scheduled => &[Self::Completed, Self::Cancelled, Self::NoShow],
            Self::Completed | Self::Cancelled | Self::NoShow => &[],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: RecordId,
    pub revision: u64,
    pub patient: Ref<PatientSummary>,
    pub doctor: Ref<UserSummary>,
    pub start: DateTime<Utc>,
    pub duration_minutes: u32,
    pub reason: Option<NonEmptyText>,
    pub notes: Option<NonEmptyText>,
    pub status: AppointmentStatus,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// End of a `minutes` long interval from `start`, if it is representable.
pub fn interval_end(start: DateTime<Utc>, minutes: u32) -> Option<DateTime<Utc>> {
    start.checked_add_signed(Duration::minutes(i64::from(minutes)))
}

impl Appointment {
    /// Saturates at the last representable instant.
    pub fn end(&self) -> DateTime<Utc> {
        interval_end(self.start, self.duration_minutes).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Half-open interval intersection: an appointment ending at 09:30 does not overlap one
    /// starting at 09:30.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start < end && start < self.end()
    }

    pub fn is_scheduled(&self) -> bool {
        self.status == AppointmentStatus::Scheduled
    }
}

impl Record for Appointment {
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

impl OwnedResource for Appointment {
    const KIND: ResourceKind = ResourceKind::Appointment;
    const VIEW_ALL: Permission = Permission::ViewAllAppointments;

    fn is_owned_by(&self, subject: &Subject<'_>) -> bool {
        subject.is_user(self.doctor.id()) || subject.is_patient(self.patient.id())
    }
}

/// Vetoes a write if the doctor already has a scheduled appointment intersecting the interval.
pub fn doctor_overlap_guard(
    doctor: UserId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> ConflictGuard<Appointment> {
    ConflictGuard::new(
        "doctor is not available at this time",
        move |existing: &Appointment| {
            existing.is_scheduled() && existing.doctor.is(doctor) && existing.overlaps(start, end)
        },
    )
}

/// Vetoes a write if the patient already has a scheduled appointment starting at `start`.
///
/// Only the exact instant is compared; overlapping intervals on the patient side are allowed.
pub fn patient_instant_guard(
    patient: PatientId,
    start: DateTime<Utc>,
) -> ConflictGuard<Appointment> {
    ConflictGuard::new(
        "patient already has an appointment at this time",
        move |existing: &Appointment| {
            existing.is_scheduled() && existing.patient.is(patient) && existing.start == start
        },
    )
}

/// A bookable interval in a doctor's day.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_minutes: u32,
}

/// Free slots on `date` between `hours.0` and `hours.1` (UTC), skipping any slot that intersects
/// a scheduled appointment in `booked`.
pub fn free_slots(
    date: NaiveDate,
    hours: (u32, u32),
    slot_minutes: u32,
    booked: &[Appointment],
) -> Vec<Slot> {
    let midnight = Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN));
    let offset = |h: u32| midnight.checked_add_signed(Duration::hours(i64::from(h)));
    let (Some(mut cursor), Some(close)) = (offset(hours.0), offset(hours.1)) else {
        return Vec::new();
    };

    let mut slots = Vec::new();
    while cursor < close {
        let Some(end) = interval_end(cursor, slot_minutes) else {
            break;
        };
        let taken = booked
            .iter()
            .any(|a| a.is_scheduled() && a.overlaps(cursor, end));
        if !taken {
            slots.push(Slot {
                start: cursor,
                end,
                duration_minutes: slot_minutes,
            });
        }
        cursor = end;
    }
    slots
}
