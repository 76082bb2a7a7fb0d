//! Transactions: ordered input/output vectors bound together by a nonce.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use chain_shared::{Amount, Hash256, TxId};

use crate::error::{EngineError, EngineResult};
use crate::utxo::{Utxo, UtxoInputWire, UtxoOutputWire, MAX_OUTPUTS_PER_TX};

/// Length in bytes of a transaction's random nonce.
pub const NONCE_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    inputs: Vec<Utxo>,
    outputs: Vec<Utxo>,
    nonce: [u8; NONCE_LEN],
    #[serde(skip)]
    txid_cache: Option<TxId>,
}

/// Wire form of a transaction: hex-encoded nonce and txid, inputs and
/// outputs in their own wire forms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionWire {
    pub inputs: Vec<UtxoInputWire>,
    pub outputs: Vec<UtxoOutputWire>,
    pub nonce: String,
    pub txid: String,
}

impl Transaction {
    /// Builds an unfinalized transaction. Call [`Self::make`] before use —
    /// it assigns output indices, a nonce, and primes the txid cache.
    #[must_use]
    pub const fn new(inputs: Vec<Utxo>, outputs: Vec<Utxo>) -> Self {
        Self {
            inputs,
            outputs,
            nonce: [0u8; NONCE_LEN],
            txid_cache: None,
        }
    }

    #[must_use]
    pub fn inputs(&self) -> &[Utxo] {
        &self.inputs
    }

    #[must_use]
    pub fn outputs(&self) -> &[Utxo] {
        &self.outputs
    }

    #[must_use]
    pub const fn is_coinbase(&self) -> bool {
        self.inputs.is_empty()
    }

    /// `sha256(sha256(concat(input.hash()) || concat(output.hash())) || nonce)`.
    fn compute_txid(&self) -> TxId {
        let mut combined = Vec::with_capacity((self.inputs.len() + self.outputs.len()) * 32);
        for utxo in self.inputs.iter().chain(self.outputs.iter()) {
            combined.extend_from_slice(utxo.hash().as_bytes());
        }
        let utxo_list_hash = Hash256::sha256(&combined);

        let mut buf = Vec::with_capacity(32 + NONCE_LEN);
        buf.extend_from_slice(utxo_list_hash.as_bytes());
        buf.extend_from_slice(&self.nonce);
        Hash256::sha256(&buf)
    }

    /// Returns the cached txid, recomputing it if the cache was invalidated.
    #[must_use]
    pub fn txid(&self) -> TxId {
        self.txid_cache.unwrap_or_else(|| self.compute_txid())
    }

    /// Assigns ascending output indices starting at 0, generates a random
    /// nonce, stamps every output with this transaction's id, and primes the
    /// txid cache. Mirrors the reference's `make()` / `set_utxo_indexes()`.
    pub fn make(&mut self) {
        self.outputs.sort_by_key(Utxo::index);
        for (i, output) in self.outputs.iter_mut().enumerate() {
            *output = Utxo::new_output(output.owner_pk().clone(), output.amount(), i as u8);
        }

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        self.nonce = nonce;
        self.txid_cache = None;

        let txid = self.compute_txid();
        for output in &mut self.outputs {
            output.stamp_txid(txid);
        }
        self.txid_cache = Some(txid);
    }

    #[must_use]
    pub fn ingoing_funds(&self) -> Amount {
        self.inputs.iter().map(Utxo::amount).sum()
    }

    #[must_use]
    pub fn outgoing_funds(&self) -> Amount {
        self.outputs.iter().map(Utxo::amount).sum()
    }

    /// `ingoing - outgoing`, defined as `0` for a coinbase (it has no inputs).
    #[must_use]
    pub fn fee(&self) -> Amount {
        if self.is_coinbase() {
            0.0
        } else {
            self.ingoing_funds() - self.outgoing_funds()
        }
    }

    /// Structural validity of the output vector: ascending contiguous
    /// indices starting at 0, at most [`MAX_OUTPUTS_PER_TX`], each
    /// individually valid.
    #[must_use]
    pub fn check_outputs(&self) -> bool {
        if self.outputs.len() > MAX_OUTPUTS_PER_TX {
            return false;
        }
        for (i, output) in self.outputs.iter().enumerate() {
            if !output.is_structurally_valid() {
                return false;
            }
            if output.index() as usize != i {
                return false;
            }
        }
        true
    }

    /// Checks every input is structurally valid and its signature unlocks
    /// this transaction's output vector.
    ///
    /// # Errors
    ///
    /// Returns an error only if signature verification itself fails to run
    /// (e.g. a malformed key) — a signature that simply does not match
    /// returns `Ok(false)`.
    pub fn check_inputs(&self) -> Result<bool, EngineError> {
        for input in &self.inputs {
            if !input.is_structurally_valid() {
                return Ok(false);
            }
            if !input.verify_against(&self.outputs)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// A transfer must not spend more than it receives. Coinbases are exempt
    /// here; their reward cap is enforced by the engine.
    #[must_use]
    pub fn amounts_balance(&self) -> bool {
        self.is_coinbase() || self.outgoing_funds() <= self.ingoing_funds()
    }

    /// Encodes this transaction as a wire object.
    ///
    /// # Errors
    ///
    /// Returns an error if any input has not been stamped with a producing
    /// txid or signed.
    pub fn to_wire(&self) -> EngineResult<TransactionWire> {
        let inputs = self
            .inputs
            .iter()
            .map(Utxo::to_input_wire)
            .collect::<EngineResult<Vec<_>>>()?;
        let outputs = self.outputs.iter().map(Utxo::to_output_wire).collect();
        Ok(TransactionWire {
            inputs,
            outputs,
            nonce: hex::encode(self.nonce),
            txid: format!("0x{}", self.txid()),
        })
    }

    /// Decodes a wire object, rejecting it if the declared `txid` does not
    /// match the txid recomputed from its inputs, outputs and nonce —
    /// defense against a peer that lies about its own transaction's id.
    ///
    /// # Errors
    ///
    /// Returns an error if any field is malformed or the declared txid
    /// doesn't match the recomputed one.
    pub fn from_wire(wire: &TransactionWire) -> EngineResult<Self> {
        let mut inputs = Vec::with_capacity(wire.inputs.len());
        for input in &wire.inputs {
            inputs.push(Utxo::from_input_wire(input)?);
        }
        let mut outputs = Vec::with_capacity(wire.outputs.len());
        for output in &wire.outputs {
            outputs.push(Utxo::from_output_wire(output)?);
        }

        let nonce_bytes = hex::decode(wire.nonce.trim_start_matches("0x"))
            .map_err(|_| EngineError::InvalidWireFormat("transaction nonce is not valid hex".to_string()))?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(EngineError::InvalidWireFormat(format!(
                "transaction nonce must be {NONCE_LEN} bytes, got {}",
                nonce_bytes.len()
            )));
        }
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&nonce_bytes);

        // Outputs arriving over the wire haven't been stamped with this
        // transaction's txid yet; recompute it the same way `make()` does
        // and stamp them before comparing against the caller's claimed txid.
        let mut tx = Self {
            inputs,
            outputs,
            nonce,
            txid_cache: None,
        };
        let txid = tx.compute_txid();
        for output in &mut tx.outputs {
            output.stamp_txid(txid);
        }
        tx.txid_cache = Some(txid);

        let claimed = Hash256::from_hex(&wire.txid)?;
        if claimed != txid {
            return Err(EngineError::HashMismatch);
        }

        Ok(tx)
    }
}
