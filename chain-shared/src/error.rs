use thiserror::Error;

/// Errors raised by the hashing, cryptography and wire-encoding primitives.
///
/// This is the low-level error type; `chain-core`'s `EngineError` wraps it via
/// `#[from]` and adds chain-specific variants. It never crosses the public
/// consensus-result surface (`BlockStatus`/`TxStatus`) — those are reported
/// outcomes, not errors.
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("invalid hash")]
    InvalidHash,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid key size: expected {expected}, received {actual}")]
    InvalidKeySize { expected: usize, actual: usize },

    #[error("cryptographic error: {0}")]
    CryptographicError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

impl From<bincode::Error> for ChainError {
    fn from(err: bincode::Error) -> Self {
        Self::SerializationError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChainError>;
