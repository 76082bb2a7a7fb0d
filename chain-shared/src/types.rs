//! Scalar type aliases shared across the chain engine.

use serde::{Deserialize, Serialize};

/// Transaction id — a SHA-256 digest.
pub type TxId = crate::Hash256;

/// Block id — a SHA-256 digest.
pub type BlockId = crate::Hash256;

/// Monetary amount. Serialized as IEEE-754 32-bit little-endian inside a
/// UTXO's hash for wire compatibility; callers performing arithmetic should
/// treat it as an opaque display value rather than accumulate it repeatedly.
pub type Amount = f32;

/// Unix timestamp, seconds.
pub type Timestamp = i64;

/// Height of a block within the confirmed chain, 1-indexed (genesis = 1).
pub type BlockHeight = u64;

/// Index of an output within its producing transaction, 0..=255.
pub type OutputIndex = u8;

/// Reference to a specific output of a specific transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: TxId,
    pub index: OutputIndex,
}

impl OutPoint {
    #[must_use]
    pub const fn new(txid: TxId, index: OutputIndex) -> Self {
        Self { txid, index }
    }
}
