//! Blocks: a proof-of-work header bound to an ordered vector of transactions.

use serde::{Deserialize, Serialize};

use chain_shared::{Hash256, Timestamp};

use crate::difficulty::CompactTarget;
use crate::error::{EngineError, EngineResult};
use crate::transaction::{Transaction, TransactionWire};

/// Maximum encoded length of the nonce field, in bytes.
pub const MAX_NONCE_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    version: u8,
    previous_hash: Hash256,
    timestamp: Timestamp,
    difficulty_bits: u32,
    nonce: Vec<u8>,
    transactions: Vec<Transaction>,
}

/// Wire form of a block: hex-encoded prev/hash/nonce, the declared `hash`
/// carried alongside the header so a lazy peer's claim can be checked
/// against the recomputed value rather than trusted outright.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockWire {
    pub version: u8,
    pub prev: String,
    pub hash: String,
    pub timestamp: Timestamp,
    pub difficulty: u32,
    pub nonce: String,
    pub txs: Vec<TransactionWire>,
}

impl Block {
    #[must_use]
    pub fn new(
        previous_hash: Hash256,
        timestamp: Timestamp,
        difficulty_bits: u32,
        nonce: Vec<u8>,
        transactions: Vec<Transaction>,
    ) -> Self {
        Self {
            version: 1,
            previous_hash,
            timestamp,
            difficulty_bits,
            nonce,
            transactions,
        }
    }

    /// Builds the zero-transaction genesis block for a given difficulty.
    #[must_use]
    pub fn genesis(difficulty_bits: u32, timestamp: Timestamp) -> Self {
        Self::new(Hash256::zero(), timestamp, difficulty_bits, vec![], vec![])
    }

    #[must_use]
    pub const fn version(&self) -> u8 {
        self.version
    }

    #[must_use]
    pub const fn previous_hash(&self) -> &Hash256 {
        &self.previous_hash
    }

    #[must_use]
    pub const fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    #[must_use]
    pub const fn difficulty_bits(&self) -> u32 {
        self.difficulty_bits
    }

    #[must_use]
    pub fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    #[must_use]
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// `SHA-256(prev || timestamp(8 BE) || difficulty(4 BE) || nonce || version || concat(txids))`.
    ///
    /// Binding the concatenation of transaction ids (in order) into the hash
    /// ties transaction ordering into the proof-of-work itself.
    #[must_use]
    pub fn hash(&self) -> Hash256 {
        let mut buf = Vec::with_capacity(
            32 + 8 + 4 + self.nonce.len() + 1 + self.transactions.len() * 32,
        );
        buf.extend_from_slice(self.previous_hash.as_bytes());
        buf.extend_from_slice(&(self.timestamp as u64).to_be_bytes());
        buf.extend_from_slice(&self.difficulty_bits.to_be_bytes());
        buf.extend_from_slice(&self.nonce);
        buf.push(self.version);
        for tx in &self.transactions {
            buf.extend_from_slice(tx.txid().as_bytes());
        }
        Hash256::sha256(&buf)
    }

    /// Whether this block's hash satisfies its own declared difficulty.
    #[must_use]
    pub fn has_valid_pow(&self) -> bool {
        CompactTarget::from_bits(self.difficulty_bits).is_satisfied_by(&self.hash())
    }

    /// Structural validity of the header fields independent of the fork tree
    /// or UTXO set: nonzero version, bounded nonce, timestamp within 64 bits,
    /// difficulty within 30 effective bits.
    #[must_use]
    pub fn is_structurally_valid(&self) -> bool {
        if self.version == 0 {
            return false;
        }
        if self.nonce.len() > MAX_NONCE_LEN {
            return false;
        }
        if self.timestamp <= 0 {
            return false;
        }
        if self.difficulty_bits > 0x3FFF_FFFF {
            return false;
        }
        true
    }

    #[must_use]
    pub fn coinbase_count(&self) -> usize {
        self.transactions.iter().filter(|tx| tx.is_coinbase()).count()
    }

    /// Encodes this block as a wire object.
    ///
    /// # Errors
    ///
    /// Returns an error if any contained transaction cannot be encoded.
    pub fn to_wire(&self) -> EngineResult<BlockWire> {
        let txs = self
            .transactions
            .iter()
            .map(Transaction::to_wire)
            .collect::<EngineResult<Vec<_>>>()?;
        Ok(BlockWire {
            version: self.version,
            prev: format!("0x{}", self.previous_hash),
            hash: format!("0x{}", self.hash()),
            timestamp: self.timestamp,
            difficulty: self.difficulty_bits,
            nonce: hex::encode(&self.nonce),
            txs,
        })
    }

    /// Decodes a wire object, rejecting it if the declared `hash` does not
    /// match the hash recomputed from its header and transactions —
    /// defense against a lazy peer that never actually hashed the block.
    ///
    /// # Errors
    ///
    /// Returns an error if any field is malformed or the declared hash
    /// doesn't match the recomputed one.
    pub fn from_wire(wire: &BlockWire) -> EngineResult<Self> {
        let previous_hash = Hash256::from_hex(&wire.prev)?;
        let nonce = hex::decode(wire.nonce.trim_start_matches("0x"))
            .map_err(|_| EngineError::InvalidWireFormat("block nonce is not valid hex".to_string()))?;

        let mut transactions = Vec::with_capacity(wire.txs.len());
        for tx in &wire.txs {
            transactions.push(Transaction::from_wire(tx)?);
        }

        let block = Self {
            version: wire.version,
            previous_hash,
            timestamp: wire.timestamp,
            difficulty_bits: wire.difficulty,
            nonce,
            transactions,
        };

        let claimed_hash = Hash256::from_hex(&wire.hash)?;
        if claimed_hash != block.hash() {
            return Err(EngineError::HashMismatch);
        }

        Ok(block)
    }
}
