use crate::access::ResourceKind;
use careflow_registry::RegistryError;

/// Every outcome the core reports to its callers.
///
/// All variants are business outcomes and none of them is worth retrying unchanged.
#[derive(Debug, thiserror::Error)]
pub enum CareError {
    #[error("authentication required")]
    AuthenticationRequired,
    #[error("missing permission: {permission}")]
    PermissionDenied { permission: &'static str },
    #[error("access to this {kind} is not allowed")]
    ResourceAccessDenied { kind: ResourceKind },
    #[error("{0} not found")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("store error: {0}")]
    Store(String),
}

impl CareError {
    /// HTTP status an API layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::AuthenticationRequired => 401,
            Self::PermissionDenied { .. } | Self::ResourceAccessDenied { .. } => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::InvalidTransition(_) | Self::InvalidInput(_) => 400,
            Self::Registry(_) | Self::Store(_) => 500,
        }
    }

    /// True for refusals caused by who the caller is rather than what they asked for.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationRequired
                | Self::PermissionDenied { .. }
                | Self::ResourceAccessDenied { .. }
        )
    }
}

pub type CareResult<T> = std::result::Result<T, CareError>;
