//! Protected-address whitelist.
//!
//! One base58 address per line, UTF-8, blank lines ignored. A malformed
//! address aborts loading before any ledger write.

use std::collections::BTreeSet;
use std::path::Path;

use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::canonical::canonicalize_value;
use crate::state_hash::hex_encode;

/// Errors that can occur while loading a whitelist.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WhitelistError {
    /// The whitelist file could not be read.
    #[error("cannot read whitelist file: {0}")]
    Io(#[from] std::io::Error),

    /// A line was not a valid base58 32-byte address.
    #[error("invalid address on line {line}: `{value}`")]
    InvalidAddress {
        /// 1-based line number.
        line: usize,
        /// The offending text.
        value: String,
    },
}

/// A set of addresses that are never reclaimed.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    addresses: BTreeSet<String>,
}

impl Whitelist {
    /// Loads a whitelist file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is unreadable or any non-blank line is
    /// not a valid base58 32-byte address.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, WhitelistError> {
        let contents = std::fs::read_to_string(path)?;
        let mut addresses = BTreeSet::new();
        for (index, line) in contents.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if crate::keypair::decode_pubkey(trimmed).is_none() {
                return Err(WhitelistError::InvalidAddress {
                    line: index + 1,
                    value: trimmed.to_string(),
                });
            }
            addresses.insert(trimmed.to_string());
        }
        Ok(Self { addresses })
    }

    /// Builds a whitelist from addresses already in memory (tests).
    #[must_use]
    pub fn from_addresses<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            addresses: addresses.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether an address is protected.
    #[must_use]
    pub fn contains(&self, address: &str) -> bool {
        self.addresses.contains(address)
    }

    /// Number of whitelisted addresses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// Whether the whitelist is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// SHA-256 over the canonical JSON array of the sorted addresses,
    /// lowercase hex. Stable across file formatting differences.
    #[must_use]
    pub fn content_hash(&self) -> String {
        let value = Value::Array(
            self.addresses
                .iter()
                .map(|addr| Value::String(addr.clone()))
                .collect(),
        );
        // An array of strings cannot fail to canonicalize.
        let canonical = canonicalize_value(&value).unwrap_or_default();
        hex_encode(&Sha256::digest(canonical.as_bytes()))
    }
}
