//! Idempotency keys for collapsing duplicate run intents.
//!
//! Two triggers racing to propose the same scene produce the same key when
//! they agree on the participant set and the seed:
//!
//! 1. **Input hashing** ([`hash`]) - SHA-256 of the intent seed
//! 2. **Key generation** ([`keys`]) - UUID v5 in a namespace derived from the
//!    conversation key
//!
//! # Example
//!
//! ```
//! use stage_director::idempotent::idempotency_key;
//! use stage_director::RunIntent;
//!
//! let a = RunIntent::new("GroupChat", ["pawn:1", "pawn:2"]).with_seed("tick:40");
//! let b = RunIntent::new("GroupChat", ["pawn:2", "pawn:1"]).with_seed("tick:40");
//! assert_eq!(idempotency_key(&a), idempotency_key(&b));
//! ```

pub mod hash;
pub mod keys;

pub use hash::hash_seed;
pub use keys::{idempotency_key, key_for, namespace_for};
