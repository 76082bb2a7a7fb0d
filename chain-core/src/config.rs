//! Ambient chain configuration: reward schedule, difficulty window, and
//! on-disk layout. Grounded on the reference node's settings module but
//! defaulted to small, fast devnet-scale values, matching how the donor
//! codebase's `NetworkParams` favors quick local iteration.

use serde::{Deserialize, Serialize};

/// Chain-wide parameters governing reward, difficulty and storage tiering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Directory holding confirmed block-store chunk files.
    pub block_data_dir: String,
    /// Path to the persisted UTXO-set snapshot.
    pub utxo_set_path: String,
    /// Path to the persisted mempool snapshot.
    pub mempool_path: String,

    /// Maximum serialized size of a block, in bytes.
    pub block_size_limit: usize,
    /// Number of confirmed blocks stored per chunk file.
    pub blocks_per_store_file: usize,

    /// Target time between blocks, in seconds.
    pub target_blocktime: u32,
    /// Number of blocks per difficulty-adjustment window.
    pub difficulty_adjustment_period: u64,

    /// Coinbase reward granted to the first window of blocks.
    pub initial_block_reward: f32,
    /// Compact difficulty bits used before the first retarget.
    pub initial_difficulty: u32,

    /// Depth of the fork-tree reorg buffer below which `attempt_merge` is a no-op.
    pub merge_buffer_height: u32,
    /// Minimum tree height `attempt_merge` leaves standing after a merge.
    pub merge_floor_height: u32,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            block_data_dir: "./data/blocks/".to_string(),
            utxo_set_path: "./data/utxos.dat".to_string(),
            mempool_path: "./data/mempool.dat".to_string(),
            block_size_limit: 1024 * 1024,
            blocks_per_store_file: 32,
            target_blocktime: 300,
            difficulty_adjustment_period: 32,
            initial_block_reward: 10.0,
            initial_difficulty: 0x2000_FFFF,
            merge_buffer_height: 5,
            merge_floor_height: 3,
        }
    }
}

impl ChainConfig {
    /// Production-scale parameters (larger difficulty window and chunk size).
    #[must_use]
    pub fn production() -> Self {
        Self {
            blocks_per_store_file: 512,
            difficulty_adjustment_period: 512,
            ..Self::default()
        }
    }
}
