//! Platform Error Types

use hp_events::DispatchError;
use thiserror::Error;

use crate::domain::DeploymentStatus;

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Duplicate entity: {entity_type} with {field}={value}")]
    Duplicate { entity_type: String, field: String, value: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Concurrency conflict on {entity_type} {id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        entity_type: String,
        id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Constraint violated: {message}")]
    Constraint { message: String },

    #[error("Service {service} not declared on project {project_id}")]
    ServiceNotFound { project_id: String, service: String },

    #[error("Invalid deployment transition {from:?} -> {to:?}")]
    InvalidTransition { from: DeploymentStatus, to: DeploymentStatus },

    #[error("Hosting error: {0}")]
    Hosting(#[from] hp_hosting::HostingError),

    #[error("Key store error: {0}")]
    Secrets(#[from] hp_secrets::SecretsError),

    #[error("Upstream error: {message}")]
    Upstream { message: String },

    #[error("Post-commit handler {handler} failed after commit: {message}")]
    PostCommit {
        handler: String,
        message: String,
        /// Id of the entity the committed unit of work created
        entity_id: Option<String>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl PlatformError {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn duplicate(entity_type: impl Into<String>, field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Duplicate {
            entity_type: entity_type.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden { message: message.into() }
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint { message: message.into() }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Attach the id of the committed entity to a post-commit failure
    pub fn committed_entity(self, id: &str) -> Self {
        match self {
            Self::PostCommit { handler, message, .. } => Self::PostCommit {
                handler,
                message,
                entity_id: Some(id.to_string()),
            },
            other => other,
        }
    }
}

impl From<DispatchError<PlatformError>> for PlatformError {
    fn from(err: DispatchError<PlatformError>) -> Self {
        match err {
            DispatchError::PreCommit { source, .. } | DispatchError::Commit(source) => source,
            DispatchError::PostCommit { handler, source } => PlatformError::PostCommit {
                handler: handler.to_string(),
                message: source.to_string(),
                entity_id: None,
            },
            DispatchError::Cancelled { .. } => PlatformError::Cancelled,
            DispatchError::FixedPointOverflow { max_passes, pending } => PlatformError::Configuration {
                message: format!(
                    "event handlers still raising pre-commit events after {} passes ({} pending)",
                    max_passes, pending
                ),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, PlatformError>;
