//! Error types for the image registry engine.

use thiserror::Error;

use crate::scan::Severity;

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("invalid {kind} name '{name}': {reason}")]
    InvalidName {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("invalid reference '{0}': expected project/repository[:tag|@digest]")]
    InvalidReference(String),

    #[error("project '{0}' already exists")]
    ProjectExists(String),

    #[error("project '{0}' not found")]
    ProjectNotFound(String),

    #[error("project '{project}' still contains {repositories} repositories")]
    ProjectNotEmpty { project: String, repositories: usize },

    #[error("repository '{0}' already exists")]
    RepositoryExists(String),

    #[error("repository '{0}' not found")]
    RepositoryNotFound(String),

    #[error("artifact '{0}' not found")]
    ArtifactNotFound(String),

    #[error("scan already in progress")]
    ScanInProgress { reference: String },

    #[error("artifact '{0}' has never been scanned")]
    NotScanned(String),

    #[error("quota exceeded for project '{project}': {used} + {requested} bytes exceeds {limit}")]
    QuotaExceeded {
        project: String,
        used: u64,
        requested: u64,
        limit: u64,
    },

    #[error("current image with severity {severity} cannot be pulled due to configured policy in project '{project}'")]
    PullBlocked { project: String, severity: Severity },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("wrong number of arguments for '{0}'")]
    WrongArity(String),
}
