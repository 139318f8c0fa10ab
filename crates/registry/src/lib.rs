//! Permission registry for Careflow.
//!
//! This crate owns the closed vocabulary of roles and permissions and the declarative
//! catalogue that maps each role to its permission set:
//! - [`Role`] and [`Permission`] enumerations (the names are part of the external contract)
//! - a strict YAML wire model for the versioned catalogue file
//! - translation between the wire model and the immutable [`PermissionRegistry`]
//!
//! The registry is loaded once at process start and never mutated afterwards. Grant checks are
//! pure lookups; an unknown permission name is treated as not granted.

pub mod catalogue;
pub mod permission;
pub mod role;

pub use catalogue::{
    Grantee, PermissionInfo, PermissionRegistry, RoleDefinition, BUILTIN_REGISTRY_YAML,
    SUPPORTED_REGISTRY_VERSION,
};
pub use permission::{Permission, PermissionCategory};
pub use role::Role;

/// Errors returned while loading or rendering a permission registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid YAML: {0}")]
    InvalidYaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("translation error: {0}")]
    Translation(String),

    #[error("unknown permission: {0}")]
    UnknownPermission(String),

    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("duplicate entry: {0}")]
    Duplicate(String),

    #[error("role is not defined in the registry: {0}")]
    MissingRole(Role),

    #[error("unsupported registry version: {0}")]
    UnsupportedVersion(u32),
}

/// Type alias for Results that can fail with a [`RegistryError`].
pub type RegistryResult<T> = Result<T, RegistryError>;
