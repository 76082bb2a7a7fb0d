//! The chain engine: orchestrates the fork tree, the confirmed UTXO set, the
//! tiered block store and the mempool behind a single consensus surface.
//!
//! Single-writer, multi-reader by construction: every method takes `&mut
//! self` or `&self` and the caller is responsible for serializing writers
//! (e.g. behind a `Mutex` at the RPC layer). Nothing here suspends on I/O in
//! a way that would make interleaving two writers safe.

use std::path::Path;

use tracing::{debug, info, warn};

use chain_shared::{BlockHeight, Hash256, OutPoint, Timestamp};

use crate::block::Block;
use crate::blockstore::BlockStore;
use crate::config::ChainConfig;
use crate::difficulty::CompactTarget;
use crate::error::EngineResult;
use crate::forktree::ForkTree;
use crate::mempool::Mempool;
use crate::status::{BlockStatus, TxStatus};
use crate::transaction::Transaction;
use crate::utxo::Utxo;
use crate::utxoset::UtxoSet;

pub struct ChainEngine {
    config: ChainConfig,
    difficulty: u32,
    block_reward: f32,
    store: BlockStore,
    utxo_set: UtxoSet,
    mempool: Mempool,
    fork: Option<ForkTree>,
    /// Confirmed blocks not yet flushed to the block store. Kept separate so
    /// [`Self::set_temporary_mode`] can discard them without touching disk.
    pending_confirmed: Vec<Block>,
    /// Cached hash of the most recently confirmed block, avoiding a chunk
    /// read on every [`Self::tophash`] call when there is no active fork.
    confirmed_top_hash: Hash256,
    temporary_mode: bool,
}

impl ChainEngine {
    /// Opens (or initializes) a chain engine from its on-disk state.
    ///
    /// # Errors
    ///
    /// Returns an error if the block store, UTXO set or mempool cannot be
    /// opened or are corrupt.
    pub fn open(config: ChainConfig) -> EngineResult<Self> {
        let store = BlockStore::open(Path::new(&config.block_data_dir), config.blocks_per_store_file)?;
        let utxo_set = UtxoSet::load(Path::new(&config.utxo_set_path))?.unwrap_or_default();
        let mempool = Mempool::load(Path::new(&config.mempool_path))?;
        let confirmed_top_hash = store.top_hash()?;
        let difficulty = config.initial_difficulty;
        let block_reward = config.initial_block_reward;

        info!(height = store.height(), "chain engine opened");

        Ok(Self {
            difficulty,
            block_reward,
            store,
            utxo_set,
            mempool,
            fork: None,
            pending_confirmed: Vec::new(),
            confirmed_top_hash,
            temporary_mode: false,
            config,
        })
    }

    /// Total height including unconfirmed blocks on the tallest fork branch.
    #[must_use]
    pub fn height(&self) -> BlockHeight {
        let established = self.established_height();
        match &self.fork {
            Some(fork) => {
                let leaf = fork.tallest_leaf(fork.root());
                established + fork.route_to_root(leaf).len() as BlockHeight
            }
            None => established,
        }
    }

    /// Height of the confirmed chain only (store + unflushed buffer).
    #[must_use]
    pub fn established_height(&self) -> BlockHeight {
        self.store.height() + self.pending_confirmed.len() as BlockHeight
    }

    #[must_use]
    pub fn tophash(&self) -> Hash256 {
        match &self.fork {
            Some(fork) => {
                let leaf = fork.tallest_leaf(fork.root());
                fork.node(leaf).block().hash()
            }
            None => self.confirmed_top_hash,
        }
    }

    #[must_use]
    pub const fn top_difficulty(&self) -> u32 {
        self.difficulty
    }

    #[must_use]
    pub fn check_tophash_exists(&self, hash: &Hash256) -> bool {
        *hash == self.tophash()
    }

    /// Fetches a block by its 1-indexed height, from the store, the
    /// unflushed buffer, or the tallest fork branch, whichever holds it.
    ///
    /// # Errors
    ///
    /// Returns an error if the owning chunk cannot be read.
    pub fn get_block_by_height(&self, height: BlockHeight) -> EngineResult<Option<Block>> {
        if height == 0 || height > self.height() {
            return Ok(None);
        }

        let established = self.established_height();
        if height <= established {
            let store_height = self.store.height();
            if height <= store_height {
                return self.store.get(height);
            }
            let idx = (height - store_height - 1) as usize;
            return Ok(self.pending_confirmed.get(idx).cloned());
        }

        let fork = self.fork.as_ref().expect("height beyond established implies a fork tree");
        let leaf = fork.tallest_leaf(fork.root());
        let route = fork.route_to_root(leaf);
        let idx = (height - established - 1) as usize;
        Ok(route.get(idx).cloned())
    }

    /// Attempts to admit `block` onto the chain or the fork tree.
    ///
    /// # Errors
    ///
    /// Returns an error only for I/O failures during the merge that follows
    /// acceptance; a rejected block is reported via the returned status, not
    /// an error.
    pub fn submit_block(&mut self, block: Block) -> EngineResult<BlockStatus> {
        if !block.is_structurally_valid() {
            return Ok(BlockStatus::InvalidError);
        }

        let hash = block.hash();
        let already_known = self.fork.as_ref().is_some_and(|f| f.block_hash_exists(&hash))
            || hash == self.confirmed_top_hash;
        if already_known {
            return Ok(BlockStatus::InvalidDuplicate);
        }

        let parent_fork_id = self.fork.as_ref().and_then(|f| f.get_by_hash(block.previous_hash()));

        if parent_fork_id.is_none() && *block.previous_hash() != self.confirmed_top_hash {
            return Ok(BlockStatus::InvalidPrevHash);
        }

        if block.difficulty_bits() != self.difficulty {
            warn!(%hash, "block rejected: wrong difficulty");
            return Ok(BlockStatus::InvalidDifficulty);
        }

        if !block.has_valid_pow() {
            warn!(%hash, "block rejected: proof of work does not satisfy target");
            return Ok(BlockStatus::InvalidPow);
        }

        let status = self.validate_transactions(&block, parent_fork_id);
        if !status.is_valid() {
            debug!(%hash, ?status, "block rejected: transaction validation failed");
            return Ok(status);
        }

        match parent_fork_id {
            Some(parent_id) => {
                let fork = self.fork.as_mut().expect("parent_fork_id implies a fork tree");
                fork.append_block(parent_id, block);
            }
            None => {
                self.fork = Some(ForkTree::new(block));
            }
        }

        info!(%hash, "block accepted");

        let merged = self.attempt_merge()?;
        if merged > 0 {
            debug!(merged, "merged blocks from the fork tree into the confirmed chain");
        }

        Ok(BlockStatus::Valid)
    }

    /// Validates every transaction in `block` against the confirmed UTXO set
    /// and the UTXO delta of the branch it would attach to.
    fn validate_transactions(&self, block: &Block, parent_fork_id: Option<usize>) -> BlockStatus {
        let (fork_consumed, fork_produced) = match (parent_fork_id, &self.fork) {
            (Some(id), Some(fork)) => fork.fork_utxo_delta(id),
            _ => (Vec::new(), Vec::new()),
        };

        let mut reward_found = false;
        let mut block_consumed: Vec<OutPoint> = Vec::new();

        for tx in block.transactions() {
            if tx.is_coinbase() {
                if reward_found {
                    return BlockStatus::InvalidTxMultipleRewards;
                }
                reward_found = true;
                if tx.outgoing_funds() > self.block_reward {
                    return BlockStatus::InvalidTxWrongRewardAmount;
                }
            }

            match tx.check_inputs() {
                Ok(true) => {}
                Ok(false) => return BlockStatus::InvalidTxInputs,
                Err(_) => return BlockStatus::InvalidError,
            }
            if !tx.check_outputs() {
                return BlockStatus::InvalidTxOutputs;
            }
            if !tx.amounts_balance() {
                return BlockStatus::InvalidTxAmounts;
            }

            for input in tx.inputs() {
                let Some(outpoint) = input.outpoint() else {
                    return BlockStatus::InvalidTxInputs;
                };

                if block_consumed.contains(&outpoint) || fork_consumed.contains(&outpoint) {
                    return BlockStatus::InvalidTxUtxoIsSpent;
                }

                if let Some(confirmed) = self.utxo_set.get(&outpoint) {
                    if !confirmed.compare_as_input(input) {
                        return BlockStatus::InvalidTxModUtxo;
                    }
                } else if !fork_produced.iter().any(|u| u.outpoint().as_ref() == Some(&outpoint)) {
                    return BlockStatus::InvalidTxUtxoIsSpent;
                }

                block_consumed.push(outpoint);
            }
        }

        BlockStatus::Valid
    }

    /// Admits a standalone transaction to the mempool, validated against the
    /// confirmed UTXO set only (not any particular fork branch).
    pub fn submit_transaction(&mut self, timestamp: Timestamp, tx: Transaction) -> TxStatus {
        if !tx.check_outputs() {
            return TxStatus::InvalidOutputs;
        }
        match tx.check_inputs() {
            Ok(true) => {}
            Ok(false) => return TxStatus::InvalidInputs,
            Err(_) => return TxStatus::InvalidError,
        }
        if !tx.amounts_balance() {
            return TxStatus::InvalidAmounts;
        }

        for input in tx.inputs() {
            let Some(outpoint) = input.outpoint() else {
                return TxStatus::InvalidInputs;
            };
            match self.utxo_set.get(&outpoint) {
                Some(confirmed) if confirmed.compare_as_input(input) => {}
                Some(_) => return TxStatus::InvalidModUtxo,
                None => return TxStatus::InvalidUtxoIsSpent,
            }
        }

        self.mempool.add_transaction(timestamp, tx);
        TxStatus::Valid
    }

    /// Walks from the root along the tallest, least-balanced branch, folding
    /// blocks into the confirmed chain while always leaving at least
    /// [`ChainConfig::merge_floor_height`] of reorg room.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing to the block store fails.
    fn attempt_merge(&mut self) -> EngineResult<usize> {
        let new_root = {
            let Some(fork) = self.fork.as_ref() else {
                return Ok(0);
            };
            let mut height = fork.tree_height(fork.root());
            if height <= self.config.merge_buffer_height {
                return Ok(0);
            }

            let mut current = fork.root();
            while height > self.config.merge_floor_height && !fork.is_balanced(current) {
                let Some(next) = fork.tallest_child(current) else {
                    break;
                };
                current = next;
                height -= 1;
            }

            if current == fork.root() {
                return Ok(0);
            }
            current
        };

        self.commit_to(new_root)
    }

    /// Re-roots the fork tree at `new_root`, folding everything above it
    /// into the confirmed UTXO set and the pending-confirmed buffer.
    fn commit_to(&mut self, new_root: usize) -> EngineResult<usize> {
        let fork = self.fork.as_mut().expect("commit_to called without a fork tree");
        let Some(parent_id) = fork.node(new_root).parent() else {
            return Ok(0);
        };
        let (consumed, produced) = fork.fork_utxo_delta(parent_id);
        self.apply_utxo_delta(&consumed, produced);

        let fork = self.fork.as_mut().expect("fork tree still present");
        let confirmed_blocks = fork.sever_to(new_root);
        let count = confirmed_blocks.len();
        for block in confirmed_blocks {
            self.confirmed_top_hash = block.hash();
            self.pending_confirmed.push(block);
        }

        self.utxo_set.set_last_applied_height(self.established_height());

        if !self.temporary_mode && self.pending_confirmed.len() >= self.config.blocks_per_store_file {
            self.flush_pending()?;
        }

        self.maybe_retarget_difficulty()?;

        Ok(count)
    }

    /// Forcefully folds the entire tallest branch into the confirmed chain
    /// and drops the fork tree, discarding every other branch. Used on
    /// sync/shutdown, not in normal operation.
    ///
    /// # Errors
    ///
    /// Returns an error if flushing to the block store fails.
    pub fn merge_all(&mut self) -> EngineResult<usize> {
        let Some(fork) = self.fork.as_ref() else {
            return Ok(0);
        };
        let leaf = fork.tallest_leaf(fork.root());
        let route = fork.route_to_root(leaf);
        let (consumed, produced) = fork.fork_utxo_delta(leaf);
        self.apply_utxo_delta(&consumed, produced);

        let count = route.len();
        for block in route {
            self.confirmed_top_hash = block.hash();
            self.pending_confirmed.push(block);
        }

        self.utxo_set.set_last_applied_height(self.established_height());
        self.fork = None;

        if !self.temporary_mode {
            self.flush_pending()?;
        }
        self.maybe_retarget_difficulty()?;

        Ok(count)
    }

    fn apply_utxo_delta(&mut self, consumed: &[OutPoint], produced: Vec<Utxo>) {
        for outpoint in consumed {
            self.utxo_set.remove(outpoint);
        }
        for utxo in produced {
            self.utxo_set.add(utxo);
        }
    }

    fn flush_pending(&mut self) -> EngineResult<()> {
        if self.pending_confirmed.is_empty() {
            return Ok(());
        }
        let blocks = std::mem::take(&mut self.pending_confirmed);
        self.store.append(blocks)?;
        Ok(())
    }

    /// Recomputes and memoizes the active difficulty exactly once, when a
    /// confirmed height crosses a chunk boundary — not re-derived on every
    /// query, unlike the window-query-time adjustment the reference performs.
    fn maybe_retarget_difficulty(&mut self) -> EngineResult<()> {
        let height = self.established_height();
        let period = self.config.difficulty_adjustment_period;
        if period == 0 || height == 0 || height % period != 0 {
            return Ok(());
        }

        let window_index = height / period;
        if window_index == 0 {
            return Ok(());
        }
        let start_height = (window_index - 1) * period + 1;
        let end_height = window_index * period;

        let start_block = self.get_block_by_height(start_height)?;
        let end_block = self.get_block_by_height(end_height)?;

        if let (Some(start), Some(end)) = (start_block, end_block) {
            let observed =
                ((end.timestamp() - start.timestamp()) as f64 / period as f64).max(0.01);
            let deviation = f64::from(self.config.target_blocktime) / observed;
            let retargeted = CompactTarget::from_bits(self.difficulty).retarget(deviation);
            info!(
                height,
                old_difficulty = self.difficulty,
                new_difficulty = retargeted.bits(),
                "retargeted difficulty at chunk boundary"
            );
            self.difficulty = retargeted.bits();
        }

        Ok(())
    }

    /// Persists the UTXO set and mempool to disk. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if either file cannot be written.
    pub fn save(&self) -> EngineResult<()> {
        self.utxo_set.save(Path::new(&self.config.utxo_set_path))?;
        self.mempool.save(Path::new(&self.config.mempool_path))?;
        Ok(())
    }

    /// Enables or disables temporary (no-disk-write) mode, used during
    /// catch-up sync. Disabling discards any unflushed confirmed buffer and
    /// reloads the UTXO set and mempool from their last saved state.
    ///
    /// # Errors
    ///
    /// Returns an error if a flush-and-save (on enabling) or a reload (on
    /// disabling) fails.
    pub fn set_temporary_mode(&mut self, enabled: bool) -> EngineResult<()> {
        if enabled == self.temporary_mode {
            return Ok(());
        }
        if enabled {
            self.flush_pending()?;
            self.save()?;
            self.temporary_mode = true;
        } else {
            self.temporary_mode = false;
            self.wipe_temporary()?;
        }
        Ok(())
    }

    /// Discards the in-memory confirmed buffer and reloads the UTXO set and
    /// mempool from disk, undoing any work done while in temporary mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the UTXO set or mempool cannot be reloaded.
    pub fn wipe_temporary(&mut self) -> EngineResult<()> {
        self.pending_confirmed.clear();
        self.utxo_set = UtxoSet::load(Path::new(&self.config.utxo_set_path))?.unwrap_or_default();
        self.mempool = Mempool::load(Path::new(&self.config.mempool_path))?;
        self.confirmed_top_hash = self.store.top_hash()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_shared::KeyPair;

    fn test_config(dir: &std::path::Path) -> ChainConfig {
        ChainConfig {
            block_data_dir: dir.join("blocks").to_string_lossy().to_string(),
            utxo_set_path: dir.join("utxos.dat").to_string_lossy().to_string(),
            mempool_path: dir.join("mempool.json").to_string_lossy().to_string(),
            blocks_per_store_file: 4,
            difficulty_adjustment_period: 4,
            merge_buffer_height: 5,
            merge_floor_height: 3,
            initial_difficulty: 0x2000_FFFF,
            ..ChainConfig::default()
        }
    }

    fn coinbase_block(prev: Hash256, timestamp: Timestamp, reward: f32, keypair: &KeyPair) -> Block {
        let mut tx = Transaction::new(vec![], vec![Utxo::new_output(keypair.public_key.clone(), reward, 0)]);
        tx.make();
        Block::new(prev, timestamp, 0x2000_FFFF, vec![], vec![tx])
    }

    #[test]
    fn genesis_block_is_accepted_and_becomes_tip() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = ChainEngine::open(test_config(dir.path())).unwrap();
        let keypair = KeyPair::generate();

        let genesis = coinbase_block(Hash256::zero(), 1, 10.0, &keypair);
        let expected_hash = genesis.hash();

        let status = engine.submit_block(genesis).unwrap();
        assert_eq!(status, BlockStatus::Valid);
        assert_eq!(engine.height(), 1);
        assert_eq!(engine.tophash(), expected_hash);
        assert_eq!(engine.established_height(), 0);
    }

    #[test]
    fn wrong_difficulty_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = ChainEngine::open(test_config(dir.path())).unwrap();
        let keypair = KeyPair::generate();

        let mut tx = Transaction::new(vec![], vec![Utxo::new_output(keypair.public_key, 10.0, 0)]);
        tx.make();
        let bad_block = Block::new(Hash256::zero(), 1, 0x20FF_FFFF, vec![], vec![tx]);

        let status = engine.submit_block(bad_block).unwrap();
        assert_eq!(status, BlockStatus::InvalidDifficulty);
        assert_eq!(engine.height(), 0);
    }

    #[test]
    fn second_coinbase_in_one_block_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = ChainEngine::open(test_config(dir.path())).unwrap();
        let keypair = KeyPair::generate();

        let mut tx_a = Transaction::new(vec![], vec![Utxo::new_output(keypair.public_key.clone(), 10.0, 0)]);
        tx_a.make();
        let mut tx_b = Transaction::new(vec![], vec![Utxo::new_output(keypair.public_key, 10.0, 0)]);
        tx_b.make();

        let block = Block::new(Hash256::zero(), 1, 0x2000_FFFF, vec![], vec![tx_a, tx_b]);
        let status = engine.submit_block(block).unwrap();
        assert_eq!(status, BlockStatus::InvalidTxMultipleRewards);
    }

    #[test]
    fn coinbase_exceeding_reward_cap_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = ChainEngine::open(test_config(dir.path())).unwrap();
        let keypair = KeyPair::generate();

        let over_cap = coinbase_block(Hash256::zero(), 1, 11.0, &keypair);
        assert_eq!(
            engine.submit_block(over_cap).unwrap(),
            BlockStatus::InvalidTxWrongRewardAmount
        );

        let at_cap = coinbase_block(Hash256::zero(), 1, 10.0, &keypair);
        assert_eq!(engine.submit_block(at_cap).unwrap(), BlockStatus::Valid);
    }

    #[test]
    fn sibling_forks_are_both_admitted_then_merged_down_to_one() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = ChainEngine::open(test_config(dir.path())).unwrap();
        let keypair = KeyPair::generate();

        let genesis = coinbase_block(Hash256::zero(), 1, 10.0, &keypair);
        let genesis_hash = genesis.hash();
        assert_eq!(engine.submit_block(genesis).unwrap(), BlockStatus::Valid);

        let branch_a = coinbase_block(genesis_hash, 2, 10.0, &keypair);
        let branch_a_hash = branch_a.hash();
        assert_eq!(engine.submit_block(branch_a).unwrap(), BlockStatus::Valid);

        let branch_b = coinbase_block(genesis_hash, 2, 10.0, &keypair);
        if branch_b.hash() != branch_a_hash {
            assert_eq!(engine.submit_block(branch_b).unwrap(), BlockStatus::Valid);
        }

        let mut tip = branch_a_hash;
        for t in 3..=8 {
            let next = coinbase_block(tip, t, 10.0, &keypair);
            tip = next.hash();
            assert_eq!(engine.submit_block(next).unwrap(), BlockStatus::Valid);
        }

        assert_eq!(engine.tophash(), tip);
        assert!(engine.established_height() >= 1);
    }

    #[test]
    fn spending_the_same_output_twice_on_sibling_branches_is_fine_but_thrice_is_not() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = ChainEngine::open(test_config(dir.path())).unwrap();
        let keypair = KeyPair::generate();

        let genesis = coinbase_block(Hash256::zero(), 1, 10.0, &keypair);
        let genesis_hash = genesis.hash();
        let funded_output = genesis.transactions()[0].outputs()[0].clone();
        assert_eq!(engine.submit_block(genesis).unwrap(), BlockStatus::Valid);

        let spend = |nonce_seed: f32| {
            let mut input = funded_output.clone();
            let change = Utxo::new_output(keypair.public_key.clone(), nonce_seed, 0);
            input.sign(&keypair.private_key, std::slice::from_ref(&change)).unwrap();
            let mut tx = Transaction::new(vec![input], vec![change]);
            tx.make();
            tx
        };

        let block_a = Block::new(genesis_hash, 2, 0x2000_FFFF, vec![], vec![spend(9.0)]);
        assert_eq!(engine.submit_block(block_a.clone()).unwrap(), BlockStatus::Valid);

        let block_b = Block::new(genesis_hash, 2, 0x2000_FFFF, vec![], vec![spend(8.0)]);
        if block_b.hash() != block_a.hash() {
            assert_eq!(engine.submit_block(block_b).unwrap(), BlockStatus::Valid);
        }

        let block_c = Block::new(block_a.hash(), 3, 0x2000_FFFF, vec![], vec![spend(7.0)]);
        assert_eq!(
            engine.submit_block(block_c).unwrap(),
            BlockStatus::InvalidTxUtxoIsSpent
        );
    }
}
