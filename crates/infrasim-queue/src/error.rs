//! Error types for the message queue engine.
//!
//! Display strings carry the SQS error code first, the way the console
//! shows them.

use thiserror::Error;

/// Result type alias for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("InvalidParameterValue: invalid queue name '{name}': {reason}")]
    InvalidQueueName { name: String, reason: String },

    #[error("InvalidAttributeValue: {attribute}: {reason}")]
    InvalidAttribute { attribute: String, reason: String },

    #[error("QueueAlreadyExists: queue '{0}' already exists")]
    QueueAlreadyExists(String),

    #[error("AWS.SimpleQueueService.NonExistentQueue: queue '{0}' does not exist")]
    QueueDoesNotExist(String),

    #[error("ResourceInUse: queue '{queue}' is the dead-letter queue of '{source_queue}'")]
    QueueInUse { queue: String, source_queue: String },

    #[error("InvalidParameterValue: message of {size} bytes exceeds the {max} byte limit")]
    MessageTooLarge { size: u64, max: u64 },

    #[error("MissingParameter: MessageGroupId is required for FIFO queue '{0}'")]
    MissingGroupId(String),

    #[error(
        "InvalidParameterValue: queue '{0}' needs ContentBasedDeduplication or an explicit MessageDeduplicationId"
    )]
    MissingDedupId(String),

    #[error("ReceiptHandleIsInvalid: receipt handle '{0}' is not valid")]
    ReceiptHandleInvalid(String),

    #[error("MessageNotInflight: message for receipt '{0}' is not in flight")]
    MessageNotInflight(String),

    #[error("InvalidAction: unknown command '{0}'")]
    UnknownCommand(String),

    #[error("MissingParameter: wrong number of arguments for '{0}'")]
    WrongArity(String),
}
