//! Command implementations.

pub mod attest;
pub mod lifecycle;
pub mod policy;
pub mod reclaim;
pub mod report;
pub mod scan;

use std::path::Path;

use anyhow::{Context as _, Result};
use kora_rent_core::rpc::HttpChainRpc;
use kora_rent_core::{LedgerStore, RentConfig};

/// Builds the effective configuration for a command invocation.
pub(crate) fn build_config(network: &str, rpc: Option<&str>, dry_run: bool) -> RentConfig {
    let mut config = RentConfig::for_network(network);
    if let Some(rpc) = rpc {
        config.rpc_url = rpc.to_string();
    }
    config.dry_run = dry_run;
    config
}

/// Opens (creating on first use) the per-network ledger.
pub(crate) fn open_store(data_dir: &Path, config: &RentConfig) -> Result<LedgerStore> {
    let path = config.db_path(data_dir);
    LedgerStore::open(&path).with_context(|| format!("cannot open ledger at {}", path.display()))
}

/// Builds the RPC client for a command invocation.
pub(crate) fn build_rpc(config: &RentConfig) -> Result<HttpChainRpc> {
    HttpChainRpc::new(config.rpc_url.clone()).context("cannot build RPC client")
}
