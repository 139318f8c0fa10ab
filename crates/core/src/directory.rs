//! Identity directory seam.
//!
//! The core needs a handful of facts about users that live outside the records it governs:
//! their role, which patient profile belongs to a patient user, and which pharmacy a pharmacist
//! works for. Lookups are infallible; an unknown user simply has no role.

use careflow_registry::Role;
use careflow_types::{PatientId, PharmacyId, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// Read-only view of users, patient profiles and pharmacies.
pub trait IdentityDirectory: Send + Sync {
    fn role_of(&self, user: UserId) -> Option<Role>;

    /// Patient profile owned by a patient user.
    fn patient_profile_of(&self, user: UserId) -> Option<PatientId>;

    /// Pharmacy a pharmacist is assigned to.
    fn pharmacy_of(&self, user: UserId) -> Option<PharmacyId>;

    fn patient_exists(&self, patient: PatientId) -> bool;

    fn pharmacy_exists(&self, pharmacy: PharmacyId) -> bool;

    fn user_exists(&self, user: UserId) -> bool {
        self.role_of(user).is_some()
    }
}

#[derive(Default)]
struct DirectoryState {
    roles: HashMap<UserId, Role>,
    patients: HashSet<PatientId>,
    patient_users: HashMap<UserId, PatientId>,
    pharmacies: HashSet<PharmacyId>,
    pharmacists: HashMap<UserId, PharmacyId>,
}

/// Directory kept in memory, used by tests and embedders without an external user store.
#[derive(Default)]
pub struct InMemoryDirectory {
    state: RwLock<DirectoryState>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a user with `role` and returns its id.
    pub fn add_user(&self, role: Role) -> UserId {
        let id = UserId::new();
        self.write().roles.insert(id, role);
        id
    }

    /// Registers a patient profile, optionally linked to the patient's own user account.
    pub fn add_patient(&self, user: Option<UserId>) -> PatientId {
        let id = PatientId::new();
        let mut state = self.write();
        state.patients.insert(id);
        if let Some(user) = user {
            state.patient_users.insert(user, id);
        }
        id
    }

    pub fn add_pharmacy(&self) -> PharmacyId {
        let id = PharmacyId::new();
        self.write().pharmacies.insert(id);
        id
    }

    pub fn assign_pharmacist(&self, user: UserId, pharmacy: PharmacyId) {
        self.write().pharmacists.insert(user, pharmacy);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, DirectoryState> {
        // A poisoned lock only means a writer panicked mid-insert; the maps stay usable.
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, DirectoryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl IdentityDirectory for InMemoryDirectory {
    fn role_of(&self, user: UserId) -> Option<Role> {
        self.read().roles.get(&user).copied()
    }

    fn patient_profile_of(&self, user: UserId) -> Option<PatientId> {
        self.read().patient_users.get(&user).copied()
    }

    fn pharmacy_of(&self, user: UserId) -> Option<PharmacyId> {
        self.read().pharmacists.get(&user).copied()
    }

    fn patient_exists(&self, patient: PatientId) -> bool {
        self.read().patients.contains(&patient)
    }

    fn pharmacy_exists(&self, pharmacy: PharmacyId) -> bool {
        self.read().pharmacies.contains(&pharmacy)
    }
}
