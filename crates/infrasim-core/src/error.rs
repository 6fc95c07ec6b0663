//! Error types shared by the core crate.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while loading topologies or decoding node configuration.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to read topology file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse topology: {0}")]
    Parse(String),

    #[error("unsupported topology format: {0}")]
    UnsupportedFormat(String),

    #[error("invalid configuration for {component}: {reason}")]
    InvalidConfig { component: String, reason: String },

    #[error("invalid topology: {0}")]
    InvalidTopology(String),
}

impl CoreError {
    /// Build an [`CoreError::InvalidConfig`] from any displayable reason.
    pub fn invalid_config(component: &str, reason: impl std::fmt::Display) -> Self {
        Self::InvalidConfig {
            component: component.to_string(),
            reason: reason.to_string(),
        }
    }
}
