//! The mempool: transactions observed but not yet confirmed in a block,
//! keyed by txid with the timestamp they were first seen.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::{debug, info};

use chain_shared::{Timestamp, TxId};

use crate::error::{EngineError, EngineResult};
use crate::transaction::{Transaction, TransactionWire};

#[derive(Debug, Clone, Default)]
pub struct Mempool {
    entries: HashMap<TxId, (Timestamp, Transaction)>,
}

impl Mempool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, txid: &TxId) -> bool {
        self.entries.contains_key(txid)
    }

    #[must_use]
    pub fn get(&self, txid: &TxId) -> Option<&Transaction> {
        self.entries.get(txid).map(|(_, tx)| tx)
    }

    #[must_use]
    pub fn transactions(&self) -> Vec<&Transaction> {
        self.entries.values().map(|(_, tx)| tx).collect()
    }

    /// Admits a transaction, keyed by its own txid. Overwrites any existing
    /// entry under the same txid. Returns `true` (the reference's signature
    /// reports success/failure, but insertion here cannot fail).
    pub fn add_transaction(&mut self, timestamp: Timestamp, transaction: Transaction) -> bool {
        let txid = transaction.txid();
        self.entries.insert(txid, (timestamp, transaction));
        true
    }

    /// Removes a transaction by txid. Returns whether it was present.
    pub fn remove_transaction(&mut self, txid: &TxId) -> bool {
        self.entries.remove(txid).is_some()
    }

    /// Drops every mempool entry whose txid appears among `confirmed` —
    /// called after a block (or a merged run of blocks) lands, since those
    /// transactions are now settled and no longer pending.
    pub fn remove_confirmed<'a>(&mut self, confirmed: impl IntoIterator<Item = &'a TxId>) {
        for txid in confirmed {
            self.entries.remove(txid);
        }
    }

    /// Loads the mempool from a JSON file. A missing file yields an empty
    /// mempool rather than an error, matching the reference's tolerant
    /// startup behavior.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> EngineResult<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        info!(path = %path.display(), "loading mempool");
        let bytes = fs::read(path)?;
        if bytes.is_empty() {
            return Ok(Self::new());
        }
        let doc: HashMap<String, TransactionWire> =
            serde_json::from_slice(&bytes).map_err(chain_shared::ChainError::from)?;
        let mut mempool = Self::new();
        for (timestamp_str, wire) in doc {
            let timestamp: Timestamp = timestamp_str.parse().map_err(|_| {
                EngineError::InvalidWireFormat(format!(
                    "mempool timestamp {timestamp_str:?} is not an integer"
                ))
            })?;
            let tx = Transaction::from_wire(&wire)?;
            mempool.add_transaction(timestamp, tx);
        }
        debug!(entries = mempool.len(), "loaded mempool");
        Ok(mempool)
    }

    /// Persists the mempool as a JSON object keyed by the stringified
    /// timestamp each transaction was first seen at.
    ///
    /// # Errors
    ///
    /// Returns an error if a transaction cannot be encoded or the file
    /// cannot be written.
    pub fn save(&self, path: &Path) -> EngineResult<()> {
        info!(path = %path.display(), entries = self.entries.len(), "saving mempool");
        let mut doc: HashMap<String, TransactionWire> = HashMap::with_capacity(self.entries.len());
        for (timestamp, transaction) in self.entries.values() {
            doc.insert(timestamp.to_string(), transaction.to_wire()?);
        }
        let bytes = serde_json::to_vec_pretty(&doc).map_err(chain_shared::ChainError::from)?;
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
    use chain_shared::KeyPair;
    use crate::utxo::Utxo;

    fn coinbase_tx(amount: f32) -> Transaction {
        let keypair = KeyPair::generate();
        let mut tx = Transaction::new(vec![], vec![Utxo::new_output(keypair.public_key, amount, 0)]);
        tx.make();
        tx
    }

    #[test]
    fn add_and_remove_round_trip() {
        let mut mempool = Mempool::new();
        let tx = coinbase_tx(10.0);
        let txid = tx.txid();

        assert!(mempool.add_transaction(1, tx));
        assert!(mempool.contains(&txid));
        assert!(mempool.remove_transaction(&txid));
        assert!(!mempool.contains(&txid));
    }

    #[test]
    fn remove_confirmed_clears_matching_entries() {
        let mut mempool = Mempool::new();
        let tx_a = coinbase_tx(5.0);
        let tx_b = coinbase_tx(6.0);
        let txid_a = tx_a.txid();
        let txid_b = tx_b.txid();
        mempool.add_transaction(1, tx_a);
        mempool.add_transaction(2, tx_b);

        mempool.remove_confirmed(std::iter::once(&txid_a));

        assert!(!mempool.contains(&txid_a));
        assert!(mempool.contains(&txid_b));
    }

    #[test]
    fn save_then_load_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mempool.json");

        let mut mempool = Mempool::new();
        mempool.add_transaction(42, coinbase_tx(3.0));
        mempool.save(&path).unwrap();

        let loaded = Mempool::load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
    }

    #[test]
    fn loading_missing_file_yields_empty_mempool() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let loaded = Mempool::load(&path).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn on_disk_format_is_an_object_keyed_by_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mempool.json");

        let mut mempool = Mempool::new();
        mempool.add_transaction(1_700_000_000, coinbase_tx(3.0));
        mempool.save(&path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let object = doc.as_object().expect("mempool must persist as a JSON object");
        assert!(object.contains_key("1700000000"));
    }
}
