//! The authenticated caller of a core operation.

use crate::{CareError, CareResult};
use careflow_registry::{Grantee, Permission, Role};
use careflow_types::UserId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Identity handed to the core by the authentication layer for one request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub role: Role,
    /// Per-user revocations. Entries the role never granted have no effect.
    #[serde(default)]
    pub disabled_permissions: BTreeSet<Permission>,
}

impl Principal {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self {
            user_id,
            role,
            disabled_permissions: BTreeSet::new(),
        }
    }

    /// Returns a copy of this principal with `permissions` switched off.
    pub fn with_disabled(mut self, permissions: impl IntoIterator<Item = Permission>) -> Self {
        self.disabled_permissions.extend(permissions);
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl Grantee for Principal {
    fn role(&self) -> Role {
        self.role
    }

    fn is_disabled(&self, permission: Permission) -> bool {
        self.disabled_permissions.contains(&permission)
    }
}

/// Turns an optional principal into a present one or [`CareError::AuthenticationRequired`].
pub fn require_principal(principal: Option<&Principal>) -> CareResult<&Principal> {
    principal.ok_or(CareError::AuthenticationRequired)
}
