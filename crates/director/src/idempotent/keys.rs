//! UUID v5 idempotency key generation from conversation key + seed.
//!
//! # Algorithm
//!
//! ```text
//! namespace = UUID v5(DNS_NAMESPACE, conversation_key)
//! seed_hash = SHA-256(seed)
//! key       = UUID v5(namespace, seed_hash)
//! ```
//!
//! The conversation key is already canonical, so participant order never
//! affects the key.

use uuid::Uuid;

use crate::idempotent::hash::hash_seed;
use crate::types::{ConversationKey, RunIntent};

/// Namespace UUID scoping all keys of one conversation.
#[must_use]
pub fn namespace_for(key: &ConversationKey) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_DNS, key.as_str().as_bytes())
}

/// Idempotency key for a conversation key and seed.
#[must_use]
pub fn key_for(key: &ConversationKey, seed: &str) -> Uuid {
    Uuid::new_v5(&namespace_for(key), &hash_seed(seed))
}

/// Idempotency key of a run intent.
#[must_use]
pub fn idempotency_key(intent: &RunIntent) -> Uuid {
    key_for(&intent.conversation_key(), &intent.seed)
}
