use crate::domain::types::{Category, PackageStatus};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CreditsError>;

#[derive(Debug, Error)]
pub enum CreditsError {
    #[error("Insufficient credit for user {user_id} in the {category} pool")]
    InsufficientCredit { user_id: String, category: Category },

    #[error("Invalid category: {value}")]
    InvalidCategory { value: String },

    #[error("Package record not found: {id}")]
    RecordNotFound { id: String },

    #[error("Invalid package: {reason}")]
    InvalidPackage { reason: String },

    #[error("Package {id} cannot move from {from} to {to}")]
    InvalidStatusTransition {
        id: String,
        from: PackageStatus,
        to: PackageStatus,
    },

    #[error("Credit account {user_id}/{category} was modified concurrently")]
    ConcurrentModification { user_id: String, category: Category },

    #[error("Persistence failure during {operation}: {source}")]
    PersistenceFailure {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CreditsError {
    pub fn persistence(
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        CreditsError::PersistenceFailure {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Errors the immediate caller is expected to turn into a user-facing message.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CreditsError::InsufficientCredit { .. }
                | CreditsError::InvalidCategory { .. }
                | CreditsError::InvalidPackage { .. }
        )
    }
}
