//! Permission catalogue wire model and the immutable registry built from it.
//!
//! Responsibilities:
//! - Define the public [`PermissionRegistry`] used for every grant decision
//! - Define a strict wire model for the versioned YAML catalogue
//! - Translate between the wire model and the registry, validating references on the way in
//!
//! Notes:
//! - The registry is built once and never mutated
//! - A role entry of `"*"` grants every declared permission

use crate::{Permission, PermissionCategory, RegistryError, RegistryResult, Role};
use careflow_types::NonEmptyText;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// The only catalogue format version this build understands.
pub const SUPPORTED_REGISTRY_VERSION: u32 = 1;

/// The default catalogue shipped inside the binary.
pub const BUILTIN_REGISTRY_YAML: &str = include_str!("../config/registry.yaml");

const WILDCARD: &str = "*";

// ============================================================================
// Public domain-level types
// ============================================================================

/// Anything that holds a role and may have individual permissions switched off.
///
/// Implemented by request principals in the core crate; [`Role`] itself implements it with no
/// overrides so role-level questions can be asked directly.
pub trait Grantee {
    /// The single role held by this grantee.
    fn role(&self) -> Role;

    /// Whether `permission` has been revoked for this grantee specifically.
    fn is_disabled(&self, _permission: Permission) -> bool {
        false
    }
}

impl Grantee for Role {
    fn role(&self) -> Role {
        *self
    }
}

/// Catalogue entry describing one permission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermissionInfo {
    pub permission: Permission,
    pub description: NonEmptyText,
    pub category: PermissionCategory,
}

/// Catalogue entry describing one role and the permissions it grants.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoleDefinition {
    pub role: Role,
    pub description: NonEmptyText,
    /// Fully expanded permission set (a wildcard role holds every declared permission).
    pub permissions: BTreeSet<Permission>,
    /// True when the catalogue declared this role with `"*"`.
    pub grants_all: bool,
}

/// Immutable role to permission mapping.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PermissionRegistry {
    version: u32,
    permissions: BTreeMap<Permission, PermissionInfo>,
    roles: BTreeMap<Role, RoleDefinition>,
}

impl PermissionRegistry {
    /// Parse a registry from YAML text.
    ///
    /// This uses `serde_path_to_error` to surface the path (e.g. `roles[2].permissions[0]`) to
    /// the failing field when the YAML does not match the wire schema.
    ///
    /// # Arguments
    ///
    /// * `yaml_text` - YAML text expected to represent a permission catalogue.
    ///
    /// # Returns
    ///
    /// Returns a validated [`PermissionRegistry`].
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] if:
    /// - the YAML does not match the wire schema or carries unknown keys,
    /// - the version is not [`SUPPORTED_REGISTRY_VERSION`],
    /// - a permission or role name is unknown or declared twice,
    /// - a role references a permission that is not declared,
    /// - any role of the fixed enumeration is missing.
    pub fn parse(yaml_text: &str) -> RegistryResult<Self> {
        let deserializer = serde_yaml::Deserializer::from_str(yaml_text);

        let wire = match serde_path_to_error::deserialize::<_, RegistryWire>(deserializer) {
            Ok(parsed) => parsed,
            Err(err) => {
                let path = err.path().to_string();
                let source = err.into_inner();
                let path = if path.is_empty() {
                    "<root>"
                } else {
                    path.as_str()
                };
                return Err(RegistryError::Translation(format!(
                    "Permission registry schema mismatch at {path}: {source}"
                )));
            }
        };

        wire_to_domain(wire)
    }

    /// Load and parse a registry file from disk.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Io`] if the file cannot be read, otherwise any error from
    /// [`PermissionRegistry::parse`].
    pub fn from_path(path: &Path) -> RegistryResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let registry = Self::parse(&text)?;
        tracing::debug!(path = %path.display(), roles = registry.roles.len(), "loaded permission registry");
        Ok(registry)
    }

    /// The catalogue embedded in the binary.
    ///
    /// # Errors
    ///
    /// Only fails if the embedded file is itself invalid, which the test suite guards against.
    pub fn builtin() -> RegistryResult<Self> {
        Self::parse(BUILTIN_REGISTRY_YAML)
    }

    /// Render the registry as YAML text in the same format [`PermissionRegistry::parse`] reads.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Translation`] if serialisation fails.
    pub fn render(&self) -> RegistryResult<String> {
        let wire = domain_to_wire(self);
        serde_yaml::to_string(&wire).map_err(|e| {
            RegistryError::Translation(format!("Failed to serialize permission registry: {e}"))
        })
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Declared permissions in vocabulary order.
    pub fn permissions(&self) -> impl Iterator<Item = &PermissionInfo> {
        self.permissions.values()
    }

    /// Role definitions in enumeration order.
    pub fn roles(&self) -> impl Iterator<Item = &RoleDefinition> {
        self.roles.values()
    }

    pub fn permission_info(&self, permission: Permission) -> Option<&PermissionInfo> {
        self.permissions.get(&permission)
    }

    pub fn role_definition(&self, role: Role) -> Option<&RoleDefinition> {
        self.roles.get(&role)
    }

    /// Permissions granted to `role` before any per-user overrides.
    pub fn permissions_of(&self, role: Role) -> BTreeSet<Permission> {
        self.roles
            .get(&role)
            .map(|def| def.permissions.clone())
            .unwrap_or_default()
    }

    /// Wire names of the permissions granted to `role`.
    pub fn permission_names_of(&self, role: Role) -> BTreeSet<&'static str> {
        self.roles
            .get(&role)
            .map(|def| def.permissions.iter().map(Permission::as_str).collect())
            .unwrap_or_default()
    }

    /// Whether `grantee` effectively holds `permission`: the role grants it and the grantee has
    /// not had it disabled.
    pub fn grants(&self, grantee: &impl Grantee, permission: Permission) -> bool {
        let in_role = self
            .roles
            .get(&grantee.role())
            .is_some_and(|def| def.permissions.contains(&permission));
        in_role && !grantee.is_disabled(permission)
    }

    /// Name-based grant check. Unknown names are not granted.
    pub fn is_granted(&self, grantee: &impl Grantee, permission_name: &str) -> bool {
        match Permission::from_name(permission_name) {
            Some(permission) => self.grants(grantee, permission),
            None => false,
        }
    }
}

// ============================================================================
// Wire types (internal)
// ============================================================================

/// Wire representation of the catalogue file.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
struct RegistryWire {
    pub version: u32,
    pub permissions: Vec<PermissionWire>,
    pub roles: Vec<RoleWire>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
struct PermissionWire {
    pub name: String,
    pub description: String,
    pub category: PermissionCategory,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
struct RoleWire {
    pub name: String,
    pub description: String,
    pub permissions: Vec<String>,
}

// ============================================================================
// Helper functions (internal)
// ============================================================================

fn description_at(text: &str, path: &str) -> RegistryResult<NonEmptyText> {
    NonEmptyText::new(text)
        .map_err(|_| RegistryError::InvalidInput(format!("{path}.description must not be empty")))
}

/// Convert the wire catalogue into a validated registry.
fn wire_to_domain(wire: RegistryWire) -> RegistryResult<PermissionRegistry> {
    if wire.version != SUPPORTED_REGISTRY_VERSION {
        return Err(RegistryError::UnsupportedVersion(wire.version));
    }

    let mut permissions = BTreeMap::new();
    for (i, entry) in wire.permissions.iter().enumerate() {
        let path = format!("permissions[{i}]");
        let permission = Permission::from_name(&entry.name).ok_or_else(|| {
            RegistryError::UnknownPermission(format!("{} at {path}.name", entry.name))
        })?;
        let info = PermissionInfo {
            permission,
            description: description_at(&entry.description, &path)?,
            category: entry.category,
        };
        if permissions.insert(permission, info).is_some() {
            return Err(RegistryError::Duplicate(format!(
                "permission {} at {path}.name",
                entry.name
            )));
        }
    }

    let mut roles = BTreeMap::new();
    for (i, entry) in wire.roles.iter().enumerate() {
        let path = format!("roles[{i}]");
        let role = Role::parse(&entry.name).map_err(|_| {
            RegistryError::UnknownRole(format!("{} at {path}.name", entry.name))
        })?;

        let grants_all = entry.permissions.iter().any(|p| p == WILDCARD);
        if grants_all && entry.permissions.len() > 1 {
            return Err(RegistryError::InvalidInput(format!(
                "{path}.permissions: \"{WILDCARD}\" must be the only entry"
            )));
        }

        let mut granted = BTreeSet::new();
        if grants_all {
            granted.extend(permissions.keys().copied());
        } else {
            for (j, name) in entry.permissions.iter().enumerate() {
                let at = format!("{path}.permissions[{j}]");
                let permission = Permission::from_name(name)
                    .ok_or_else(|| RegistryError::UnknownPermission(format!("{name} at {at}")))?;
                if !permissions.contains_key(&permission) {
                    return Err(RegistryError::Translation(format!(
                        "{at} references undeclared permission {name}"
                    )));
                }
                if !granted.insert(permission) {
                    return Err(RegistryError::Duplicate(format!("permission {name} at {at}")));
                }
            }
        }

        let definition = RoleDefinition {
            role,
            description: description_at(&entry.description, &path)?,
            permissions: granted,
            grants_all,
        };
        if roles.insert(role, definition).is_some() {
            return Err(RegistryError::Duplicate(format!(
                "role {} at {path}.name",
                entry.name
            )));
        }
    }

    if let Some(missing) = Role::ALL.iter().find(|r| !roles.contains_key(r)) {
        return Err(RegistryError::MissingRole(*missing));
    }

    Ok(PermissionRegistry {
        version: wire.version,
        permissions,
        roles,
    })
}

/// Convert the registry back into its wire form.
fn domain_to_wire(registry: &PermissionRegistry) -> RegistryWire {
    RegistryWire {
        version: registry.version,
        permissions: registry
            .permissions
            .values()
            .map(|info| PermissionWire {
                name: info.permission.as_str().to_owned(),
                description: info.description.as_str().to_owned(),
                category: info.category,
            })
            .collect(),
        roles: registry
            .roles
            .values()
            .map(|def| RoleWire {
                name: def.role.as_str().to_owned(),
                description: def.description.as_str().to_owned(),
                permissions: if def.grants_all {
                    vec![WILDCARD.to_owned()]
                } else {
                    def.permissions
                        .iter()
                        .map(|p| p.as_str().to_owned())
                        .collect()
                },
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    struct Overrides {
        role: Role,
        disabled: BTreeSet<Permission>,
    }

    impl Grantee for Overrides {
        fn role(&self) -> Role {
            self.role
        }

        fn is_disabled(&self, permission: Permission) -> bool {
            self.disabled.contains(&permission)
        }
    }

    fn minimal_yaml(extra_role_line: &str) -> String {
        let mut yaml = String::from(
            "version: 1\npermissions:\n  - name: view_own_record\n    description: View own record\n    category: patient_records\nroles:\n",
        );
        for role in Role::ALL {
            yaml.push_str(&format!(
                "  - name: {}\n    description: {} role\n    permissions: [view_own_record]\n",
                role.as_str(),
                role.as_str()
            ));
        }
        yaml.push_str(extra_role_line);
        yaml
    }

    #[test]
    fn builtin_catalogue_is_valid_and_complete() {
        let registry = PermissionRegistry::builtin().expect("builtin registry should parse");
        assert_eq!(registry.version(), SUPPORTED_REGISTRY_VERSION);
        for role in Role::ALL {
            assert!(registry.role_definition(*role).is_some(), "missing {role}");
        }
        for permission in Permission::ALL {
            assert!(
                registry.permission_info(*permission).is_some(),
                "undeclared {permission}"
            );
        }
    }

    #[test]
    fn admin_holds_every_permission() {
        let registry = PermissionRegistry::builtin().expect("builtin");
        let admin = registry.permissions_of(Role::Admin);
        assert_eq!(admin.len(), Permission::ALL.len());
        assert!(registry.role_definition(Role::Admin).expect("admin").grants_all);
    }

    #[test]
    fn builtin_role_samples() {
        let registry = PermissionRegistry::builtin().expect("builtin");
        assert!(registry.is_granted(&Role::Doctor, "sign_prescriptions"));
        assert!(registry.is_granted(&Role::Doctor, "mark_appointment_complete"));
        assert!(!registry.is_granted(&Role::Doctor, "dispense_prescriptions"));
        assert!(registry.is_granted(&Role::Pharmacist, "dispense_prescriptions"));
        assert!(registry.is_granted(&Role::Secretary, "schedule_any_doctor"));
        assert!(!registry.is_granted(&Role::Patient, "view_all_patients"));
        assert!(registry.is_granted(&Role::LabTechnician, "receive_specimens"));
        assert!(registry.is_granted(&Role::Doctor, "edit_consultations"));
        assert!(!registry.is_granted(&Role::Nurse, "edit_consultations"));
        assert!(registry
            .permission_names_of(Role::Patient)
            .contains("view_own_record"));
    }

    #[test]
    fn unknown_permission_name_is_not_granted() {
        let registry = PermissionRegistry::builtin().expect("builtin");
        assert!(!registry.is_granted(&Role::Admin, "launch_rockets"));
        assert!(!registry.is_granted(&Role::Admin, ""));
    }

    #[test]
    fn disabled_permission_overrides_role_grant() {
        let registry = PermissionRegistry::builtin().expect("builtin");
        let doctor = Overrides {
            role: Role::Doctor,
            disabled: BTreeSet::from([Permission::EditMedicalHistory]),
        };
        assert!(!registry.is_granted(&doctor, "edit_medical_history"));
        assert!(registry.is_granted(&doctor, "create_prescriptions"));
    }

    #[test]
    fn disabling_a_permission_the_role_never_had_is_a_no_op() {
        let registry = PermissionRegistry::builtin().expect("builtin");
        let patient = Overrides {
            role: Role::Patient,
            disabled: BTreeSet::from([Permission::CreateUsers]),
        };
        assert!(registry.is_granted(&patient, "view_own_record"));
        assert!(!registry.is_granted(&patient, "create_users"));
    }

    #[test]
    fn render_then_parse_preserves_registry() {
        let registry = PermissionRegistry::builtin().expect("builtin");
        let text = registry.render().expect("render");
        assert!(text.contains("- '*'") || text.contains("- \"*\""));
        let reparsed = PermissionRegistry::parse(&text).expect("reparse");
        assert_eq!(reparsed, registry);
    }

    #[test]
    fn rejects_unknown_keys_with_path() {
        let yaml = minimal_yaml("").replacen(
            "category: patient_records",
            "category: patient_records\n    colour: blue",
            1,
        );
        let err = PermissionRegistry::parse(&yaml).expect_err("unknown key");
        let msg = err.to_string();
        assert!(msg.contains("permissions[0]"), "{msg}");
        assert!(msg.contains("colour"), "{msg}");
    }

    #[test]
    fn rejects_unsupported_version() {
        let yaml = minimal_yaml("").replacen("version: 1", "version: 2", 1);
        assert!(matches!(
            PermissionRegistry::parse(&yaml),
            Err(RegistryError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn rejects_duplicate_role() {
        let yaml = minimal_yaml(
            "  - name: nurse\n    description: again\n    permissions: [view_own_record]\n",
        );
        assert!(matches!(
            PermissionRegistry::parse(&yaml),
            Err(RegistryError::Duplicate(msg)) if msg.contains("roles[7]")
        ));
    }

    #[test]
    fn rejects_unknown_role_name() {
        let yaml = minimal_yaml(
            "  - name: janitor\n    description: mops\n    permissions: [view_own_record]\n",
        );
        assert!(matches!(
            PermissionRegistry::parse(&yaml),
            Err(RegistryError::UnknownRole(msg)) if msg.contains("janitor")
        ));
    }

    #[test]
    fn rejects_reference_to_undeclared_permission() {
        let yaml = minimal_yaml("").replacen(
            "permissions: [view_own_record]",
            "permissions: [view_own_record, create_users]",
            1,
        );
        let err = PermissionRegistry::parse(&yaml).expect_err("undeclared");
        assert!(err.to_string().contains("roles[0].permissions[1]"));
    }

    #[test]
    fn rejects_missing_role() {
        let yaml = minimal_yaml("").replacen(
            "  - name: pharmacist\n    description: pharmacist role\n    permissions: [view_own_record]\n",
            "",
            1,
        );
        assert!(matches!(
            PermissionRegistry::parse(&yaml),
            Err(RegistryError::MissingRole(Role::Pharmacist))
        ));
    }

    #[test]
    fn loads_override_file_from_disk() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(minimal_yaml("").as_bytes()).expect("write");

        let registry = PermissionRegistry::from_path(file.path()).expect("load");
        assert!(registry.is_granted(&Role::Admin, "view_own_record"));
        assert!(!registry.is_granted(&Role::Admin, "create_users"));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = PermissionRegistry::from_path(&dir.path().join("absent.yaml"));
        assert!(matches!(result, Err(RegistryError::Io(_))));
    }
}
