//! Confirmed block storage: an append-only, chunked, tiered log.
//!
//! Confirmed blocks are partitioned into fixed-capacity chunk files named by
//! their zero-based chunk index in lowercase hex (`0.dat`, `1.dat`, ...).
//! Chunk `k` holds heights `k*N+1 ..= (k+1)*N`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use chain_shared::{BlockHeight, Hash256};

use crate::block::Block;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Serialize, Deserialize)]
struct StoreChunk {
    blocks: Vec<Block>,
}

pub struct BlockStore {
    directory: PathBuf,
    blocks_per_file: usize,
    height: BlockHeight,
}

impl BlockStore {
    /// Opens (creating if necessary) a block store rooted at `directory`,
    /// deriving its current height by scanning chunk filenames.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or a chunk file
    /// exists but cannot be parsed.
    pub fn open(directory: &Path, blocks_per_file: usize) -> EngineResult<Self> {
        fs::create_dir_all(directory)?;
        let mut store = Self {
            directory: directory.to_path_buf(),
            blocks_per_file,
            height: 0,
        };
        store.height = store.derive_height()?;
        info!(height = store.height, dir = %directory.display(), "opened block store");
        Ok(store)
    }

    fn chunk_path(&self, chunk: usize) -> PathBuf {
        self.directory.join(format!("{chunk:x}.dat"))
    }

    fn chunk_count(&self) -> EngineResult<usize> {
        let mut count = 0usize;
        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".dat") {
                if !stem.is_empty() && stem.chars().all(|c| c.is_ascii_hexdigit()) {
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    fn derive_height(&self) -> EngineResult<BlockHeight> {
        let chunks = self.chunk_count()?;
        if chunks == 0 {
            return Ok(0);
        }
        let last_chunk = self.read_chunk(chunks - 1)?;
        if last_chunk.is_empty() {
            error!(chunk = chunks - 1, "block store chunk is empty or corrupt");
            return Err(EngineError::CorruptChunk(format!("{:x}", chunks - 1)));
        }
        Ok((chunks as u64 - 1) * self.blocks_per_file as u64 + last_chunk.len() as u64)
    }

    fn read_chunk(&self, chunk: usize) -> EngineResult<Vec<Block>> {
        let path = self.chunk_path(chunk);
        if !path.exists() {
            return Ok(vec![]);
        }
        let bytes = fs::read(&path)?;
        if bytes.is_empty() {
            return Ok(vec![]);
        }
        let decoded: StoreChunk = bincode::deserialize(&bytes)
            .map_err(|e| EngineError::CorruptChunk(format!("{:x}: {e}", chunk)))?;
        Ok(decoded.blocks)
    }

    fn write_chunk(&self, chunk: usize, blocks: &[Block]) -> EngineResult<()> {
        let doc = StoreChunk {
            blocks: blocks.to_vec(),
        };
        let bytes = bincode::serialize(&doc).map_err(chain_shared::ChainError::from)?;
        fs::write(self.chunk_path(chunk), bytes)?;
        Ok(())
    }

    #[must_use]
    pub const fn height(&self) -> BlockHeight {
        self.height
    }

    /// Appends blocks to the store, filling chunks to capacity before
    /// starting a new one.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or writing any touched chunk fails.
    pub fn append(&mut self, mut blocks: Vec<Block>) -> EngineResult<()> {
        while !blocks.is_empty() {
            let in_current_chunk = (self.height as usize) % self.blocks_per_file;
            let room = self.blocks_per_file - in_current_chunk;
            let take = room.min(blocks.len());
            let chunk_blocks: Vec<Block> = blocks.drain(..take).collect();

            let chunk_index = self.height as usize / self.blocks_per_file;
            let mut existing = self.read_chunk(chunk_index)?;
            existing.extend(chunk_blocks);

            if existing.len() > self.blocks_per_file {
                return Err(EngineError::CorruptChunk(format!(
                    "{chunk_index:x}: would exceed capacity"
                )));
            }

            self.write_chunk(chunk_index, &existing)?;
            self.height += take as u64;
        }
        Ok(())
    }

    /// Fetches a block by its 1-indexed height.
    ///
    /// # Errors
    ///
    /// Returns an error if the owning chunk cannot be read.
    pub fn get(&self, height: BlockHeight) -> EngineResult<Option<Block>> {
        if height == 0 || height > self.height {
            return Ok(None);
        }
        let zero_indexed = height - 1;
        let chunk_index = (zero_indexed / self.blocks_per_file as u64) as usize;
        let offset = (zero_indexed % self.blocks_per_file as u64) as usize;
        let chunk = self.read_chunk(chunk_index)?;
        Ok(chunk.into_iter().nth(offset))
    }

    /// Returns the hash of the last confirmed block, or the zero hash if
    /// the store is empty (genesis's previous-hash).
    ///
    /// # Errors
    ///
    /// Returns an error if the top chunk cannot be read.
    pub fn top_hash(&self) -> EngineResult<Hash256> {
        Ok(self.get(self.height)?.map_or_else(Hash256::zero, |b| b.hash()))
    }

    /// Returns the difficulty bits of the last confirmed block, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the top chunk cannot be read.
    pub fn top_difficulty(&self) -> EngineResult<Option<u32>> {
        Ok(self.get(self.height)?.map(|b| b.difficulty_bits()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_shared::Timestamp;

    fn block(prev: Hash256, timestamp: Timestamp) -> Block {
        Block::new(prev, timestamp, 0x2000_FFFF, vec![], vec![])
    }

    #[test]
    fn append_then_read_back_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = BlockStore::open(dir.path(), 2).unwrap();

        let b1 = block(Hash256::zero(), 1);
        let b2 = block(b1.hash(), 2);
        let b3 = block(b2.hash(), 3);

        store.append(vec![b1.clone(), b2.clone(), b3.clone()]).unwrap();
        assert_eq!(store.height(), 3);
        assert_eq!(store.get(1).unwrap().unwrap().timestamp(), 1);
        assert_eq!(store.get(3).unwrap().unwrap().timestamp(), 3);
        assert_eq!(store.top_hash().unwrap(), b3.hash());
    }

    #[test]
    fn reopening_rederives_height_from_chunk_files() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = BlockStore::open(dir.path(), 2).unwrap();
            let b1 = block(Hash256::zero(), 1);
            let b2 = block(b1.hash(), 2);
            let b3 = block(b2.hash(), 3);
            store.append(vec![b1, b2, b3]).unwrap();
        }
        let reopened = BlockStore::open(dir.path(), 2).unwrap();
        assert_eq!(reopened.height(), 3);
    }
}
