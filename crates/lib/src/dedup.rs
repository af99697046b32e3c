//! Deduplication gate: idempotency check for inbound message ids.
//!
//! Chat platforms deliver webhooks at-least-once; the gate makes sure only the
//! first delivery of a message id within the marker TTL gets processed. The
//! check is one atomic insert-if-absent in the KV store, so concurrent
//! deliveries of the same id cannot both pass. Errors are surfaced, not
//! swallowed; the orchestrator treats a failed check as "not a duplicate"
//! so a store outage never drops user messages.

use crate::kv::{KvClient, KvError};

/// How long a processed message id is remembered (seconds). Long enough to
/// absorb platform retry storms, short enough to self-clean.
const DEDUP_TTL_SECS: u64 = 300;

/// Gate that remembers recently processed message ids in the KV store.
#[derive(Clone)]
pub struct DedupGate {
    kv: KvClient,
}

impl DedupGate {
    pub fn new(kv: KvClient) -> Self {
        Self { kv }
    }

    /// Returns true when this message id was already seen within the TTL
    /// window. A successful insert marks the id as seen for subsequent calls.
    pub async fn check_and_mark(&self, message_id: &str) -> Result<bool, KvError> {
        let key = format!("msg:{}", message_id);
        let inserted = self.kv.set_if_absent(&key, "1", DEDUP_TTL_SECS).await?;
        Ok(!inserted)
    }
}
