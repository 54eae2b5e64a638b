//! Operator signing key handling.
//!
//! Keypair files are JSON arrays of the 64-byte Ed25519 secret key (the
//! 32-byte seed followed by the 32-byte public key), the conventional
//! wallet format on the target chain.

use std::path::Path;

use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use thiserror::Error;

/// Errors that can occur while loading or using a keypair.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KeypairError {
    /// The keypair file could not be read.
    #[error("cannot read keypair file: {0}")]
    Io(#[from] std::io::Error),

    /// The keypair file was not a JSON byte array.
    #[error("keypair file is not a JSON byte array: {0}")]
    Format(#[from] serde_json::Error),

    /// The array did not contain exactly 64 bytes.
    #[error("keypair must be 64 bytes, got {len}")]
    InvalidLength {
        /// The observed byte count.
        len: usize,
    },

    /// The secret and public halves were inconsistent.
    #[error("keypair bytes are not a valid Ed25519 keypair")]
    InvalidKey,
}

/// The operator's Ed25519 keypair.
///
/// Used both as the fee-paying transaction signer and as the attestation
/// signing key.
#[derive(Debug)]
pub struct OperatorKeypair {
    signing_key: SigningKey,
}

impl OperatorKeypair {
    /// Loads a keypair from a JSON byte-array file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unreadable, malformed, or does not
    /// hold a consistent 64-byte Ed25519 keypair.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KeypairError> {
        let contents = std::fs::read_to_string(path)?;
        let bytes: Vec<u8> = serde_json::from_str(&contents)?;
        Self::from_bytes(&bytes)
    }

    /// Builds a keypair from the 64-byte secret representation.
    ///
    /// # Errors
    ///
    /// Returns an error on a wrong length or an inconsistent public half.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeypairError> {
        let array: &[u8; 64] = bytes
            .try_into()
            .map_err(|_| KeypairError::InvalidLength { len: bytes.len() })?;
        let signing_key =
            SigningKey::from_keypair_bytes(array).map_err(|_| KeypairError::InvalidKey)?;
        Ok(Self { signing_key })
    }

    /// Wraps an existing signing key (tests and key generation).
    #[must_use]
    pub const fn from_signing_key(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    /// The public half, rendered base58.
    #[must_use]
    pub fn pubkey(&self) -> String {
        bs58::encode(self.signing_key.verifying_key().to_bytes()).into_string()
    }

    /// The raw verifying key.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Produces a detached Ed25519 signature over `message`.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing_key.sign(message).to_bytes()
    }
}

/// Decodes a base58 chain address into its 32 raw bytes.
///
/// Returns `None` for malformed base58 or a non-32-byte payload.
#[must_use]
pub fn decode_pubkey(address: &str) -> Option<[u8; 32]> {
    let bytes = bs58::decode(address).into_vec().ok()?;
    bytes.try_into().ok()
}
