//! Operator configuration.
//!
//! There is no global configuration state: one [`RentConfig`] is built at
//! the CLI boundary and passed explicitly into each component, which keeps
//! coupling visible and lets every test open its own ledger with its own
//! settings.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};

/// Default dust floor in lamports.
pub const DEFAULT_MIN_LAMPORTS: u64 = 1_000;

/// Default Reclaimer fetch-and-lock batch size.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Effective configuration for one pipeline invocation.
#[derive(Debug, Clone)]
pub struct RentConfig {
    /// Network label (`devnet` or `mainnet`).
    pub network: String,
    /// Chain RPC endpoint URL.
    pub rpc_url: String,
    /// Balances strictly below this are dust.
    pub min_lamports: u64,
    /// Minimum days since the last lifecycle check before an account may
    /// become reclaimable; 0 disables the age rule.
    pub min_age_days: u32,
    /// Reclaimer fetch-and-lock batch size.
    pub batch_size: usize,
    /// When set, no transaction is signed or submitted and no ledger rows
    /// are mutated beyond lock bookkeeping.
    pub dry_run: bool,
}

impl RentConfig {
    /// Builds a configuration for a network with its default endpoint.
    #[must_use]
    pub fn for_network(network: &str) -> Self {
        Self {
            network: network.to_string(),
            rpc_url: default_rpc_url(network).to_string(),
            min_lamports: DEFAULT_MIN_LAMPORTS,
            min_age_days: 0,
            batch_size: DEFAULT_BATCH_SIZE,
            dry_run: false,
        }
    }

    /// The per-network ledger database path under `data_dir`.
    #[must_use]
    pub fn db_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(format!("kora-rent-{}.db", self.network))
    }

    /// The configuration object recorded as transition evidence and in the
    /// attestation manifest.
    ///
    /// `whitelist_hash` is `null` when no whitelist is in effect.
    #[must_use]
    pub fn evidence_value(&self, whitelist_hash: Option<&str>) -> Value {
        json!({
            "min_lamports": self.min_lamports,
            "min_age_days": self.min_age_days,
            "batch_size": self.batch_size,
            "whitelist_hash": whitelist_hash,
        })
    }
}

/// The default public RPC endpoint for a network label.
#[must_use]
pub fn default_rpc_url(network: &str) -> &'static str {
    match network {
        "mainnet" => "https://api.mainnet-beta.solana.com",
        _ => "https://api.devnet.solana.com",
    }
}
