pub mod crypto;
pub mod error;
pub mod hash;
pub mod types;

pub use crypto::{KeyPair, PrivateKey, PublicKey, Signature, PUBLIC_KEY_DER_LEN, SIGNATURE_LEN};
pub use error::ChainError;
pub use hash::Hash256;
pub use types::{Amount, BlockHeight, BlockId, OutPoint, OutputIndex, Timestamp, TxId};

pub type Result<T> = std::result::Result<T, ChainError>;
