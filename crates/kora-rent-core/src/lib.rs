//! # kora-rent-core
//!
//! Core library for `kora-rent`, an operator-side tool that discovers,
//! classifies, and reclaims rent-locked balances held in sponsor-created
//! accounts on an account-model chain, and produces a deterministic,
//! independently verifiable attestation of what it did and why.
//!
//! ## Pipeline
//!
//! - **Indexer**: scans operator transaction history and records sponsored
//!   accounts with a resumable cursor
//! - **Lifecycle Engine**: batched on-chain probe that reconciles the ledger
//!   with observed chain state
//! - **Policy Engine**: pure rule table that marks accounts reclaimable,
//!   protected, dust, or skipped
//! - **Reclaimer**: fetch-and-lock → just-in-time re-verification → batched
//!   transfer submission, at-most-once per account
//! - **Attestation**: canonical-JSON manifest + result digest + database
//!   state hash, bound by a composite SHA-256 and an optional detached
//!   Ed25519 signature
//!
//! Every stage reads and writes a single SQLite-backed ledger; stages are
//! idempotent given unchanged inputs and may be invoked independently.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod attestation;
pub mod canonical;
pub mod config;
pub mod indexer;
pub mod keypair;
pub mod ledger;
pub mod lifecycle;
pub mod policy;
pub mod reclaimer;
pub mod report;
pub mod rpc;
pub mod state_hash;
pub mod whitelist;

pub use config::RentConfig;
pub use keypair::OperatorKeypair;
pub use ledger::{LedgerStore, LifecycleState, SponsoredAccount};
pub use whitelist::Whitelist;
