//! ECDSA P-256 signing and verification, bound to SHA-256 digests.
//!
//! Keys are carried as DER-encoded `SubjectPublicKeyInfo` (91 bytes for this
//! curve) on the wire; signatures are the raw 64-byte `r || s` encoding.

use ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature as EcdsaSignature, SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePublicKey, EncodePublicKey};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::ChainError;
use crate::hash::Hash256;

/// Encoded length of a P-256 `SubjectPublicKeyInfo` in DER.
pub const PUBLIC_KEY_DER_LEN: usize = 91;
/// Encoded length of a raw ECDSA `r || s` signature over P-256.
pub const SIGNATURE_LEN: usize = 64;

/// A DER-encoded ECDSA P-256 public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    der: Vec<u8>,
}

impl PublicKey {
    /// Wraps a DER `SubjectPublicKeyInfo`.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::InvalidKeySize`] if the encoding is not 91 bytes,
    /// or [`ChainError::InvalidPublicKey`] if it does not parse as a P-256 key.
    pub fn from_der(der: &[u8]) -> Result<Self, ChainError> {
        if der.len() != PUBLIC_KEY_DER_LEN {
            return Err(ChainError::InvalidKeySize {
                expected: PUBLIC_KEY_DER_LEN,
                actual: der.len(),
            });
        }
        VerifyingKey::from_public_key_der(der)
            .map_err(|e| ChainError::InvalidPublicKey(e.to_string()))?;
        Ok(Self { der: der.to_vec() })
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.der
    }

    /// SHA-256 of the DER encoding; used as the on-chain `owner` identifier.
    #[must_use]
    pub fn owner_hash(&self) -> Hash256 {
        Hash256::sha256(&self.der)
    }

    fn to_verifying_key(&self) -> Result<VerifyingKey, ChainError> {
        VerifyingKey::from_public_key_der(&self.der)
            .map_err(|e| ChainError::InvalidPublicKey(e.to_string()))
    }
}

/// An ECDSA P-256 private key. Zeroized on drop.
pub struct PrivateKey {
    signing_key: SigningKey,
}

impl PrivateKey {
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        let verifying_key = VerifyingKey::from(&self.signing_key);
        let der = verifying_key
            .to_public_key_der()
            .expect("P-256 verifying key always encodes to DER")
            .as_bytes()
            .to_vec();
        PublicKey { der }
    }

    /// Signs a pre-computed SHA-256 digest without re-hashing it.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::CryptographicError`] if signing fails.
    pub fn sign_prehashed(&self, digest: &Hash256) -> Result<Signature, ChainError> {
        let sig: EcdsaSignature = self
            .signing_key
            .sign_prehash(digest.as_bytes())
            .map_err(|e| ChainError::CryptographicError(e.to_string()))?;
        Ok(Signature {
            raw: sig.to_bytes().to_vec(),
        })
    }
}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        // SigningKey's inner scalar already zeroizes on drop; this guards the
        // wrapper against future fields that might not.
        let mut seed = self.signing_key.to_bytes();
        seed.zeroize();
    }
}

/// An ECDSA P-256 keypair.
pub struct KeyPair {
    pub public_key: PublicKey,
    pub private_key: PrivateKey,
}

impl KeyPair {
    /// Generates a new random keypair.
    #[must_use]
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        let private_key = PrivateKey { signing_key };
        let public_key = private_key.public_key();
        Self {
            public_key,
            private_key,
        }
    }

    /// Signs a pre-computed SHA-256 digest with the keypair's private key.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::CryptographicError`] if signing fails.
    pub fn sign(&self, digest: &Hash256) -> Result<Signature, ChainError> {
        self.private_key.sign_prehashed(digest)
    }
}

/// A raw 64-byte `r || s` ECDSA signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    raw: Vec<u8>,
}

impl Signature {
    /// Wraps a raw 64-byte `r || s` signature.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::InvalidKeySize`] if `raw` is not 64 bytes.
    pub fn from_raw(raw: &[u8]) -> Result<Self, ChainError> {
        if raw.len() != SIGNATURE_LEN {
            return Err(ChainError::InvalidKeySize {
                expected: SIGNATURE_LEN,
                actual: raw.len(),
            });
        }
        Ok(Self { raw: raw.to_vec() })
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Verifies this signature against a pre-computed SHA-256 digest.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::InvalidPublicKey`] if the key does not parse, or
    /// `Ok(false)` (not an error) if the signature does not verify.
    pub fn verify(&self, digest: &Hash256, public_key: &PublicKey) -> Result<bool, ChainError> {
        let verifying_key = public_key.to_verifying_key()?;
        let Ok(sig) = EcdsaSignature::from_slice(&self.raw) else {
            return Ok(false);
        };
        Ok(verifying_key.verify_prehash(digest.as_bytes(), &sig).is_ok())
    }
}
