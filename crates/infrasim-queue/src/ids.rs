//! Deterministic message ids and receipt handles.
//!
//! Ids are derived from a SHA-256 over the component id, the queue name and
//! a monotonic sequence, so two runs of the same simulation produce the same
//! ids.

use sha2::{Digest, Sha256};

#[derive(Debug)]
pub(crate) struct IdGen {
    namespace: String,
    seq: u64,
}

impl IdGen {
    pub(crate) fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            seq: 0,
        }
    }

    fn digest(&mut self, kind: &str, scope: &str) -> [u8; 32] {
        self.seq += 1;
        let mut hasher = Sha256::new();
        hasher.update(self.namespace.as_bytes());
        hasher.update([0]);
        hasher.update(kind.as_bytes());
        hasher.update([0]);
        hasher.update(scope.as_bytes());
        hasher.update(self.seq.to_be_bytes());
        hasher.finalize().into()
    }

    /// A UUID-shaped message id.
    pub(crate) fn message_id(&mut self, queue: &str) -> String {
        let hex = hex::encode(&self.digest("message", queue)[..16]);
        format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        )
    }

    /// A fresh receipt handle for one delivery of `message_id`.
    pub(crate) fn receipt_handle(&mut self, message_id: &str) -> String {
        hex::encode(self.digest("receipt", message_id))
    }
}

/// Content-based deduplication id: hex SHA-256 of the body.
pub(crate) fn content_dedup_id(body: &str) -> String {
    hex::encode(Sha256::digest(body.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_are_uuid_shaped_and_unique() {
        let mut ids = IdGen::new("sqs-1");
        let a = ids.message_id("orders");
        let b = ids.message_id("orders");
        assert_eq!(a.len(), 36);
        assert_eq!(a.matches('-').count(), 4);
        assert_ne!(a, b);
    }

    #[test]
    fn ids_are_deterministic() {
        let mut x = IdGen::new("sqs-1");
        let mut y = IdGen::new("sqs-1");
        assert_eq!(x.message_id("q"), y.message_id("q"));
        assert_eq!(x.receipt_handle("m"), y.receipt_handle("m"));
    }

    #[test]
    fn content_dedup_is_stable() {
        assert_eq!(content_dedup_id("hello"), content_dedup_id("hello"));
        assert_ne!(content_dedup_id("hello"), content_dedup_id("world"));
        assert_eq!(content_dedup_id("hello").len(), 64);
    }
}
