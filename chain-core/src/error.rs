use thiserror::Error;

use chain_shared::ChainError;

/// Engine-level failures: I/O, persistence and corrupt on-disk state. Wraps
/// the lower-level primitive error type and adds the chain-specific
/// variants. Consensus rejections (`BlockStatus`/`TxStatus`) are not errors
/// and never appear here — they are returned by value from the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Primitive(#[from] ChainError),

    #[error("block store chunk {0} is corrupt")]
    CorruptChunk(String),

    #[error("persisted UTXO set at {0} is corrupt or unreadable")]
    CorruptUtxoSet(String),

    #[error("persisted mempool at {0} is corrupt or unreadable")]
    CorruptMempool(String),

    #[error("fork-tree node {0} not found")]
    UnknownForkNode(usize),

    #[error("block references unknown parent")]
    UnknownParent,

    #[error("malformed wire object: {0}")]
    InvalidWireFormat(String),

    #[error("wire object's declared hash does not match its recomputed hash")]
    HashMismatch,
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Primitive(ChainError::from(err))
    }
}
