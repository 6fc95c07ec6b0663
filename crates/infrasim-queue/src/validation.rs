//! Edge validation for queue names and attributes.
//!
//! Everything here runs before any engine state is touched, so a rejected
//! create or update leaves the queue catalog exactly as it was.

use crate::config::{QueueKind, QueueSpec};
use crate::error::{QueueError, QueueResult};

const MAX_NAME_LEN: usize = 80;
const MAX_VISIBILITY_TIMEOUT_SEC: u64 = 12 * 60 * 60;
const MAX_DELAY_SEC: u64 = 15 * 60;
const MAX_RETENTION_DAYS: u64 = 14;
const MAX_RECEIVE_COUNT: u32 = 1000;

/// Validate a queue name: 1–80 characters of `[A-Za-z0-9_-]`, where a
/// FIFO queue's name must end in `.fifo` (not counted against the charset).
pub fn validate_queue_name(name: &str, kind: QueueKind) -> QueueResult<()> {
    let invalid = |reason: &str| QueueError::InvalidQueueName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.is_empty() {
        return Err(invalid("name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("name must be at most 80 characters"));
    }
    let stem = match kind {
        QueueKind::Fifo => name
            .strip_suffix(".fifo")
            .ok_or_else(|| invalid("FIFO queue names must end in .fifo"))?,
        QueueKind::Standard => {
            if name.ends_with(".fifo") {
                return Err(invalid("only FIFO queue names may end in .fifo"));
            }
            name
        }
    };
    if stem.is_empty() {
        return Err(invalid("name must not be empty"));
    }
    if !stem
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(invalid(
            "only alphanumeric characters, hyphens and underscores are allowed",
        ));
    }
    Ok(())
}

fn attribute(attribute: &str, reason: String) -> QueueError {
    QueueError::InvalidAttribute {
        attribute: attribute.to_string(),
        reason,
    }
}

/// Validate a full attribute set, name included.
pub fn validate_spec(spec: &QueueSpec) -> QueueResult<()> {
    validate_queue_name(&spec.name, spec.kind())?;
    if spec.visibility_timeout_sec > MAX_VISIBILITY_TIMEOUT_SEC {
        return Err(attribute(
            "visibility_timeout_sec",
            format!("must be between 0 and {MAX_VISIBILITY_TIMEOUT_SEC}"),
        ));
    }
    if spec.delay_sec > MAX_DELAY_SEC {
        return Err(attribute(
            "delay_sec",
            format!("must be between 0 and {MAX_DELAY_SEC}"),
        ));
    }
    if !(1..=MAX_RETENTION_DAYS).contains(&spec.retention_days) {
        return Err(attribute(
            "retention_days",
            format!("must be between 1 and {MAX_RETENTION_DAYS}"),
        ));
    }
    if !(1..=MAX_RECEIVE_COUNT).contains(&spec.max_receive_count) {
        return Err(attribute(
            "max_receive_count",
            format!("must be between 1 and {MAX_RECEIVE_COUNT}"),
        ));
    }
    if spec.max_message_size == 0 || spec.max_message_size > crate::config::DEFAULT_MAX_MESSAGE_SIZE
    {
        return Err(attribute(
            "max_message_size",
            "must be between 1 and 262144 bytes".to_string(),
        ));
    }
    if spec.dead_letter_queue.as_deref() == Some(spec.name.as_str()) {
        return Err(attribute(
            "dead_letter_queue",
            "a queue cannot be its own dead-letter queue".to_string(),
        ));
    }
    if spec.dedup_enabled && spec.kind() == QueueKind::Standard {
        return Err(attribute(
            "dedup_enabled",
            "content-based deduplication requires a FIFO queue".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Names ────────────────────────────────────────────────────────

    #[test]
    fn valid_names() {
        assert!(validate_queue_name("orders", QueueKind::Standard).is_ok());
        assert!(validate_queue_name("orders_v2-east", QueueKind::Standard).is_ok());
        assert!(validate_queue_name("orders.fifo", QueueKind::Fifo).is_ok());
        assert!(validate_queue_name(&"a".repeat(80), QueueKind::Standard).is_ok());
    }

    #[test]
    fn invalid_names() {
        assert!(validate_queue_name("", QueueKind::Standard).is_err());
        assert!(validate_queue_name("has space", QueueKind::Standard).is_err());
        assert!(validate_queue_name("dots.here", QueueKind::Standard).is_err());
        assert!(validate_queue_name(&"a".repeat(81), QueueKind::Standard).is_err());
        assert!(validate_queue_name("orders", QueueKind::Fifo).is_err());
        assert!(validate_queue_name("orders.fifo", QueueKind::Standard).is_err());
        assert!(validate_queue_name(".fifo", QueueKind::Fifo).is_err());
    }

    #[test]
    fn error_mentions_name() {
        let err = validate_queue_name("bad name", QueueKind::Standard).unwrap_err();
        assert!(err.to_string().contains("bad name"));
    }

    // ── Attributes ───────────────────────────────────────────────────

    #[test]
    fn attribute_ranges() {
        assert!(validate_spec(&QueueSpec::new("q")).is_ok());
        assert!(validate_spec(&QueueSpec::new("q").with_delay(901)).is_err());
        assert!(validate_spec(&QueueSpec::new("q").with_visibility_timeout(43_201)).is_err());
        assert!(validate_spec(&QueueSpec::new("q").with_dead_letter_queue("q", 3)).is_err());
        assert!(validate_spec(&QueueSpec::new("q").with_dead_letter_queue("d", 0)).is_err());
        assert!(validate_spec(&QueueSpec::new("q").with_dedup(true)).is_err());
        assert!(validate_spec(&QueueSpec::new("q.fifo").with_dedup(true)).is_ok());
    }
}
