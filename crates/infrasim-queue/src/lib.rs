//! infrasim-queue — an SQS-like message queue engine.
//!
//! One engine holds any number of queues, standard or FIFO. Supported
//! behavior:
//!
//! - per-queue visibility timeout, delivery delay and retention
//! - FIFO message groups with ordered, one-at-a-time delivery per group
//! - five-minute deduplication window (explicit id or content hash)
//! - dead-letter redrive once a message has been received
//!   `max_receive_count` times without being deleted
//!
//! All deadlines are evaluated against the shared simulated clock; nothing
//! runs in the background.

pub mod config;
pub mod engine;
pub mod error;
mod ids;
pub mod queue;
pub mod validation;

pub use config::{QueueConfig, QueueKind, QueuePatch, QueueSpec};
pub use engine::{QueueEngine, SendOutcome, SendRequest, MAX_RECEIVE_BATCH};
pub use error::{QueueError, QueueResult};
pub use queue::{MessageInfo, MessageState, QueueCounters, QueueMetrics, ReceivedMessage};
pub use validation::{validate_queue_name, validate_spec};
