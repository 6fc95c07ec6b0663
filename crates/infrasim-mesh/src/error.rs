//! Error types for the service-mesh engine.

use thiserror::Error;

use crate::validate::ValidationIssue;

/// Result type alias for mesh operations.
pub type MeshResult<T> = Result<T, MeshError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MeshError {
    #[error("mesh configuration rejected: {}", format_issues(.0))]
    Invalid(Vec<ValidationIssue>),

    #[error("unknown service '{0}'")]
    UnknownService(String),

    #[error("no route to host '{0}'")]
    NoRoute(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("wrong number of arguments for '{0}'")]
    WrongArity(String),
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
