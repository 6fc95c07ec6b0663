//! Emulator error types.

use infrasim_core::{ComponentKind, CoreError};
use thiserror::Error;

/// Errors raised by the emulation engine itself. Engine command failures
/// are not errors here; they come back as failed `CommandResult`s.
#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error("unknown component: {0}")]
    UnknownComponent(String),

    #[error("component {id} is a {actual} engine, not {expected}")]
    KindMismatch {
        id: String,
        expected: ComponentKind,
        actual: ComponentKind,
    },

    #[error(transparent)]
    Core(#[from] CoreError),
}

pub type EmulatorResult<T> = Result<T, EmulatorError>;
