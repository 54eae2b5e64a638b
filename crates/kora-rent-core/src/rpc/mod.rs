//! Chain RPC abstraction.
//!
//! The pipeline treats the chain as an abstract read/submit interface with
//! four operations: list signatures for an address, fetch a parsed
//! transaction, fetch multiple accounts' info, and submit-and-confirm a
//! signed transaction (Reclaimer only). [`HttpChainRpc`] is the production
//! JSON-RPC implementation; tests substitute deterministic in-memory
//! chains.
//!
//! All trait methods return `BoxFuture` to support async execution while
//! keeping the trait object-safe.

mod http;
pub mod wire;

use std::future::Future;
use std::pin::Pin;

use serde::Deserialize;
use thiserror::Error;

pub use http::HttpChainRpc;

/// A boxed future for object-safe async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The base58 address of the system program (all zero bytes).
pub const SYSTEM_PROGRAM_ID: &str = "11111111111111111111111111111111";

/// Errors surfaced by chain RPC operations.
///
/// RPC errors are always transient from the pipeline's point of view: the
/// current loop stops, nothing in the ledger is mutated, and the operator
/// re-runs.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RpcError {
    /// The HTTP transport failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The endpoint answered with a JSON-RPC level error.
    #[error("rpc error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },

    /// The endpoint's response did not have the expected shape.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A submitted transaction never reached confirmed commitment.
    #[error("transaction unconfirmed: {signature}")]
    Unconfirmed {
        /// Signature of the unconfirmed transaction.
        signature: String,
    },
}

/// One entry of an address's signature history.
#[derive(Debug, Clone, Deserialize)]
pub struct SignatureInfo {
    /// The transaction signature, base58.
    pub signature: String,
    /// Slot the transaction landed in.
    pub slot: u64,
    /// Chain-reported execution error, if the transaction failed.
    #[serde(default)]
    pub err: Option<serde_json::Value>,
}

/// One parsed instruction of a fetched transaction.
#[derive(Debug, Clone)]
pub struct ParsedInstruction {
    /// Friendly program name reported by the endpoint (e.g. `"system"`).
    pub program: String,
    /// The parsed instruction type (e.g. `"createAccount"`).
    pub instruction_type: String,
    /// The parsed instruction fields.
    pub info: serde_json::Value,
}

/// A fetched transaction, reduced to what the Indexer needs.
#[derive(Debug, Clone)]
pub struct ParsedTransaction {
    /// The transaction signature.
    pub signature: String,
    /// Slot the transaction landed in.
    pub slot: u64,
    /// The fee payer, by convention the first signer account key.
    pub fee_payer: Option<String>,
    /// Parsed top-level instructions.
    pub instructions: Vec<ParsedInstruction>,
}

/// An account's on-chain state at observation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSnapshot {
    /// Balance in lamports.
    pub lamports: u64,
    /// Length of the account's data, bytes.
    pub data_len: u64,
    /// Owning program, base58.
    pub owner: String,
    /// Whether the account is executable.
    pub executable: bool,
}

/// Abstract chain read/submit interface.
///
/// Every method is a cooperative suspension point; no retries are
/// performed at this layer.
pub trait ChainRpc: Send + Sync {
    /// Lists up to `limit` signatures for `address`, newest first,
    /// paginating backwards from `before` (exclusive) and stopping at
    /// `until` (exclusive).
    fn signatures_for_address<'a>(
        &'a self,
        address: &'a str,
        limit: usize,
        before: Option<&'a str>,
        until: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Vec<SignatureInfo>, RpcError>>;

    /// Fetches one transaction in parsed form.
    ///
    /// Returns `Ok(None)` if the chain does not know the signature.
    fn transaction<'a>(
        &'a self,
        signature: &'a str,
    ) -> BoxFuture<'a, Result<Option<ParsedTransaction>, RpcError>>;

    /// Fetches multiple accounts in one batched call.
    ///
    /// The result vector is positionally aligned with `addresses`;
    /// `None` means the account is absent on chain.
    fn multiple_accounts<'a>(
        &'a self,
        addresses: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<Option<AccountSnapshot>>, RpcError>>;

    /// Fetches a recent blockhash to bind a transaction to.
    fn latest_blockhash(&self) -> BoxFuture<'_, Result<String, RpcError>>;

    /// Submits a signed, base64-encoded transaction and waits for
    /// confirmed commitment. Returns the transaction signature.
    fn submit_and_confirm<'a>(
        &'a self,
        transaction_base64: &'a str,
    ) -> BoxFuture<'a, Result<String, RpcError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_object_safety(_: &dyn ChainRpc) {}
}
