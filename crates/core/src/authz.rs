//! Authorization engine.
//!
//! Two independent layers, both of which must pass before a mutation is planned:
//! - role permissions with per-user overrides ([`AuthorizationEngine::require_permission`])
//! - ownership of the specific record ([`AuthorizationEngine::require_access`])

use crate::access::{OwnedResource, Subject};
use crate::lifecycle::{Governed, LifecycleStatus};
use crate::principal::Principal;
use crate::{CareError, CareResult};
use careflow_registry::{Permission, PermissionRegistry};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct AuthorizationEngine {
    registry: Arc<PermissionRegistry>,
}

impl AuthorizationEngine {
    pub fn new(registry: Arc<PermissionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &PermissionRegistry {
        &self.registry
    }

    /// Name-based check. Unknown names are never granted.
    pub fn is_granted(&self, principal: &Principal, permission_name: &str) -> bool {
        self.registry.is_granted(principal, permission_name)
    }

    pub fn has(&self, principal: &Principal, permission: Permission) -> bool {
        self.registry.grants(principal, permission)
    }

    /// Fails with [`CareError::PermissionDenied`] unless `permission` is effectively granted.
    pub fn require_permission(
        &self,
        principal: &Principal,
        permission: Permission,
    ) -> CareResult<()> {
        if self.has(principal, permission) {
            return Ok(());
        }
        tracing::debug!(
            user = %principal.user_id,
            role = %principal.role,
            permission = %permission,
            "permission denied"
        );
        Err(CareError::PermissionDenied {
            permission: permission.as_str(),
        })
    }

    /// Succeeds with the first permission of `permissions` the principal holds.
    ///
    /// Used where an operation is reachable through either an "any" or an "own" permission.
    /// The error names the first permission in the list.
    pub fn require_any(
        &self,
        principal: &Principal,
        permissions: &[Permission],
    ) -> CareResult<Permission> {
        if let Some(granted) = permissions.iter().find(|p| self.has(principal, **p)) {
            return Ok(*granted);
        }
        let first = permissions.first().map_or("", |p| p.as_str());
        tracing::debug!(
            user = %principal.user_id,
            role = %principal.role,
            permission = first,
            "none of the alternative permissions granted"
        );
        Err(CareError::PermissionDenied { permission: first })
    }

    /// Whether `subject` may reach `resource`.
    ///
    /// Admins always may. Otherwise a grant of the kind's view-all permission suffices (per-user
    /// overrides apply to it like to any other permission), and failing that one of the
    /// record's ownership references must resolve to the subject.
    pub fn can_access<R: OwnedResource>(&self, resource: &R, subject: &Subject<'_>) -> bool {
        let principal = subject.principal();
        if principal.is_admin() {
            return true;
        }
        if self.has(principal, R::VIEW_ALL) {
            return true;
        }
        resource.is_owned_by(subject)
    }

    /// Fails with [`CareError::ResourceAccessDenied`] when [`Self::can_access`] is false.
    pub fn require_access<R: OwnedResource>(
        &self,
        resource: &R,
        subject: &Subject<'_>,
    ) -> CareResult<()> {
        if self.can_access(resource, subject) {
            return Ok(());
        }
        tracing::debug!(
            user = %subject.user_id(),
            kind = %R::KIND,
            "resource access denied"
        );
        Err(CareError::ResourceAccessDenied { kind: R::KIND })
    }

    /// Whether `subject` may edit the content of `resource` in its current status.
    ///
    /// Nobody edits a record in a terminal status. In a locked status that is not terminal only
    /// admins may, and only for entities that allow the override.
    pub fn can_modify<R: Governed>(&self, resource: &R, subject: &Subject<'_>) -> bool {
        let status = resource.status_at(subject.now());
        if status.is_terminal() || !self.can_access(resource, subject) {
            return false;
        }
        !R::locks_content(status) || (R::ADMIN_OVERRIDE && subject.principal().is_admin())
    }

    /// Whether `subject` may cancel `resource` in its current status.
    pub fn can_cancel<R: Governed>(&self, resource: &R, subject: &Subject<'_>) -> bool {
        let status = resource.status_at(subject.now());
        R::CANCELLED.is_some_and(|cancelled| status.can_transition_to(cancelled))
            && self.can_access(resource, subject)
    }

    /// Fails unless [`Self::can_modify`] holds.
    ///
    /// # Errors
    ///
    /// [`CareError::ResourceAccessDenied`] if the record is not the subject's, otherwise
    /// [`CareError::InvalidTransition`] if its status forbids the edit.
    pub fn require_modify<R: Governed>(
        &self,
        resource: &R,
        subject: &Subject<'_>,
    ) -> CareResult<()> {
        self.require_access(resource, subject)?;
        if self.can_modify(resource, subject) {
            return Ok(());
        }
        let status = resource.status_at(subject.now());
        tracing::debug!(
            user = %subject.user_id(),
            kind = %R::KIND,
            status = status.as_str(),
            "content locked"
        );
        Err(CareError::InvalidTransition(format!(
            "{} in status {} can no longer be modified",
            R::KIND,
            status.as_str()
        )))
    }

    /// Fails unless [`Self::can_cancel`] holds.
    ///
    /// # Errors
    ///
    /// [`CareError::ResourceAccessDenied`] if the record is not the subject's, otherwise
    /// [`CareError::InvalidTransition`] if its status cannot be cancelled.
    pub fn require_cancel<R: Governed>(
        &self,
        resource: &R,
        subject: &Subject<'_>,
    ) -> CareResult<()> {
        self.require_access(resource, subject)?;
        if self.can_cancel(resource, subject) {
            return Ok(());
        }
        Err(CareError::InvalidTransition(format!(
            "{} in status {} cannot be cancelled",
            R::KIND,
            resource.status_at(subject.now()).as_str()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::ResourceKind;
    use crate::directory::InMemoryDirectory;
    use careflow_registry::Role;
    use careflow_types::UserId;
    use chrono::Utc;

    struct Note {
        author: UserId,
    }

    impl OwnedResource for Note {
        const KIND: ResourceKind = ResourceKind::Document;
        const VIEW_ALL: Permission = Permission::ViewAllDocuments;

        fn is_owned_by(&self, subject: &Subject<'_>) -> bool {
            subject.is_user(self.author)
        }
    }

    fn engine() -> AuthorizationEngine {
        AuthorizationEngine::new(Arc::new(
            PermissionRegistry::builtin().expect("builtin registry"),
        ))
    }

    #[test]
    fn test_require_permission_respects_overrides() {
        let engine = engine();
        let doctor = Principal::new(UserId::new(), Role::Doctor);
        assert!(engine
            .require_permission(&doctor, Permission::EditMedicalHistory)
            .is_ok());

        let restricted = doctor.with_disabled([Permission::EditMedicalHistory]);
        let err = engine
            .require_permission(&restricted, Permission::EditMedicalHistory)
            .expect_err("disabled");
        assert_eq!(err.to_string(), "missing permission: edit_medical_history");
    }

    #[test]
    fn test_is_granted_fails_closed_on_unknown_names() {
        let engine = engine();
        let admin = Principal::new(UserId::new(), Role::Admin);
        assert!(engine.is_granted(&admin, "view_all_users"));
        assert!(!engine.is_granted(&admin, "view_all_users "));
        assert!(!engine.is_granted(&admin, "root"));
    }

    #[test]
    fn test_require_any_returns_first_granted() {
        let engine = engine();
        let secretary = Principal::new(UserId::new(), Role::Secretary);
        let patient = Principal::new(UserId::new(), Role::Patient);
        let alternatives = [
            Permission::ScheduleAnyDoctor,
            Permission::ScheduleOwnAppointments,
        ];

        assert_eq!(
            engine.require_any(&secretary, &alternatives).expect("any"),
            Permission::ScheduleAnyDoctor
        );
        assert_eq!(
            engine.require_any(&patient, &alternatives).expect("own"),
            Permission::ScheduleOwnAppointments
        );

        let pharmacist = Principal::new(UserId::new(), Role::Pharmacist);
        assert!(matches!(
            engine.require_any(&pharmacist, &alternatives),
            Err(CareError::PermissionDenied { permission: "schedule_any_doctor" })
        ));
    }

    #[test]
    fn test_can_access_layers() {
        let engine = engine();
        let dir = InMemoryDirectory::new();
        let now = Utc::now();
        let author = UserId::new();
        let note = Note { author };

        let admin = Principal::new(UserId::new(), Role::Admin);
        assert!(engine.can_access(&note, &Subject::new(&admin, &dir, now)));

        let owner = Principal::new(author, Role::Nurse);
        assert!(engine.can_access(&note, &Subject::new(&owner, &dir, now)));

        let stranger = Principal::new(UserId::new(), Role::Nurse);
        let subject = Subject::new(&stranger, &dir, now);
        assert!(!engine.can_access(&note, &subject));
        assert!(matches!(
            engine.require_access(&note, &subject),
            Err(CareError::ResourceAccessDenied {
                kind: ResourceKind::Document
            })
        ));
    }

    #[test]
    fn test_disabled_view_all_falls_back_to_ownership() {
        // Admins bypass by role, so use a registry where every role views all documents.
        let mut yaml = String::from(
            "version: 1\npermissions:\n- name: view_all_documents\n  description: All documents\n  category: documents\nroles:\n",
        );
        for role in Role::ALL {
            yaml.push_str(&format!(
                "- name: {role}\n  description: {role}\n  permissions: [view_all_documents]\n"
            ));
        }
        let registry = PermissionRegistry::parse(&yaml).expect("custom registry");
        assert!(registry.grants(&Role::Secretary, Permission::ViewAllDocuments));
        let engine = AuthorizationEngine::new(Arc::new(registry));

        let dir = InMemoryDirectory::new();
        let note = Note {
            author: UserId::new(),
        };
        let secretary = Principal::new(UserId::new(), Role::Secretary);
        assert!(engine.can_access(&note, &Subject::new(&secretary, &dir, Utc::now())));

        let restricted = secretary.with_disabled([Permission::ViewAllDocuments]);
        assert!(!engine.can_access(&note, &Subject::new(&restricted, &dir, Utc::now())));
    }
}
