//! Error types for the key-value engine.
//!
//! Display strings follow the replies a real Redis server sends, since the
//! dashboard shows them verbatim.

use thiserror::Error;

/// Result type alias for key-value operations.
pub type KvResult<T> = Result<T, KvError>;

/// Errors a command can fail with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KvError {
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    #[error("ERR value is not a valid float")]
    NotFloat,

    #[error("ERR increment or decrement would overflow")]
    Overflow,

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpire(String),

    #[error("ERR Invalid stream ID specified as stream command argument")]
    InvalidStreamId,

    #[error("ERR The ID specified in XADD is equal or smaller than the target stream top item")]
    StreamIdTooSmall,

    #[error("ERR unknown subcommand '{0}'")]
    UnknownSubcommand(String),

    #[error("OOM command not allowed when used memory > 'maxmemory'.")]
    OutOfMemory,

    #[error("ERR invalid seed key '{key}': {reason}")]
    InvalidSeed { key: String, reason: String },
}
