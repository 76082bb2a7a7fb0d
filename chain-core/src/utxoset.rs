//! The confirmed UTXO set: every output currently spendable at the last
//! applied height.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use chain_shared::{BlockHeight, OutPoint};

use crate::error::{EngineError, EngineResult};
use crate::utxo::Utxo;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedUtxoSet {
    height: BlockHeight,
    outputs: Vec<Utxo>,
}

#[derive(Debug, Clone, Default)]
pub struct UtxoSet {
    outputs: HashMap<OutPoint, Utxo>,
    last_applied_height: BlockHeight,
}

impl UtxoSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn last_applied_height(&self) -> BlockHeight {
        self.last_applied_height
    }

    pub fn set_last_applied_height(&mut self, height: BlockHeight) {
        self.last_applied_height = height;
    }

    #[must_use]
    pub fn get(&self, outpoint: &OutPoint) -> Option<&Utxo> {
        self.outputs.get(outpoint)
    }

    #[must_use]
    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.outputs.contains_key(outpoint)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Inserts a produced output. Rejects structurally invalid UTXOs and
    /// outputs that have not been stamped with a producing txid.
    pub fn add(&mut self, utxo: Utxo) -> bool {
        if !utxo.is_structurally_valid() {
            return false;
        }
        let Some(outpoint) = utxo.outpoint() else {
            return false;
        };
        self.outputs.insert(outpoint, utxo);
        true
    }

    /// Removes a spent output. Returns whether it was present.
    pub fn remove(&mut self, outpoint: &OutPoint) -> bool {
        self.outputs.remove(outpoint).is_some()
    }

    #[must_use]
    pub fn balance_of(&self, owner_hash: &chain_shared::Hash256) -> f32 {
        self.outputs
            .values()
            .filter(|u| &u.owner_pk().owner_hash() == owner_hash)
            .map(Utxo::amount)
            .sum()
    }

    /// Serializes this set as a single length-prefixed binary document.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn snapshot_to_bytes(&self) -> EngineResult<Vec<u8>> {
        let doc = PersistedUtxoSet {
            height: self.last_applied_height,
            outputs: self.outputs.values().cloned().collect(),
        };
        Ok(bincode::serialize(&doc).map_err(chain_shared::ChainError::from)?)
    }

    /// Restores a set previously produced by [`Self::snapshot_to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes do not decode to a valid document.
    pub fn restore_from_bytes(bytes: &[u8]) -> EngineResult<Self> {
        let doc: PersistedUtxoSet =
            bincode::deserialize(bytes).map_err(chain_shared::ChainError::from)?;
        let mut set = Self {
            outputs: HashMap::with_capacity(doc.outputs.len()),
            last_applied_height: doc.height,
        };
        for utxo in doc.outputs {
            let Some(outpoint) = utxo.outpoint() else {
                return Err(EngineError::CorruptUtxoSet(
                    "persisted output missing a producing txid".to_string(),
                ));
            };
            set.outputs.insert(outpoint, utxo);
        }
        Ok(set)
    }

    /// Loads a set from disk, if the file exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or decoded.
    pub fn load(path: &Path) -> EngineResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        info!(path = %path.display(), "loading UTXO set snapshot");
        let bytes = fs::read(path)?;
        if bytes.is_empty() {
            return Ok(Some(Self::new()));
        }
        Self::restore_from_bytes(&bytes).map(Some)
    }

    /// Persists this set to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> EngineResult<()> {
        debug!(path = %path.display(), entries = self.outputs.len(), "saving UTXO set snapshot");
        let bytes = self.snapshot_to_bytes()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_shared::{Hash256, KeyPair};

    fn stamped_output(keypair: &KeyPair, amount: f32, index: u8, txid: Hash256) -> Utxo {
        let mut utxo = Utxo::new_output(keypair.public_key.clone(), amount, index);
        utxo.stamp_txid(txid);
        utxo
    }

    #[test]
    fn add_and_remove_round_trip() {
        let keypair = KeyPair::generate();
        let txid = Hash256::sha256(b"tx");
        let utxo = stamped_output(&keypair, 10.0, 0, txid);
        let outpoint = utxo.outpoint().unwrap();

        let mut set = UtxoSet::new();
        assert!(set.add(utxo));
        assert!(set.contains(&outpoint));
        assert!(set.remove(&outpoint));
        assert!(!set.contains(&outpoint));
    }

    #[test]
    fn rejects_unstamped_output() {
        let keypair = KeyPair::generate();
        let utxo = Utxo::new_output(keypair.public_key, 10.0, 0);
        let mut set = UtxoSet::new();
        assert!(!set.add(utxo));
    }

    #[test]
    fn snapshot_round_trips_through_bytes() {
        let keypair = KeyPair::generate();
        let txid = Hash256::sha256(b"tx");
        let utxo = stamped_output(&keypair, 10.0, 0, txid);

        let mut set = UtxoSet::new();
        set.add(utxo);
        set.set_last_applied_height(5);

        let bytes = set.snapshot_to_bytes().unwrap();
        let restored = UtxoSet::restore_from_bytes(&bytes).unwrap();

        assert_eq!(restored.len(), 1);
        assert_eq!(restored.last_applied_height(), 5);
    }

    #[test]
    fn balance_of_sums_matching_owner() {
        let keypair = KeyPair::generate();
        let txid = Hash256::sha256(b"tx");
        let mut set = UtxoSet::new();
        set.add(stamped_output(&keypair, 3.0, 0, txid));
        set.add(stamped_output(&keypair, 4.0, 1, txid));

        assert_eq!(set.balance_of(&keypair.public_key.owner_hash()), 7.0);
    }
}
