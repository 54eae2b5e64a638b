//! `kora-rent lifecycle scan`: Lifecycle Engine run.

use std::path::Path;

use anyhow::Result;
use tracing::info;

use kora_rent_core::lifecycle;

use super::{build_config, build_rpc, open_store};

pub async fn run(data_dir: &Path, network: &str, rpc: Option<&str>, dry_run: bool) -> Result<()> {
    let config = build_config(network, rpc, dry_run);
    let store = open_store(data_dir, &config)?;
    let rpc = build_rpc(&config)?;

    let outcome = lifecycle::run(&rpc, &store, dry_run).await?;
    info!(
        scanned = outcome.scanned,
        chunks = outcome.chunks,
        failed_chunks = outcome.failed_chunks,
        transitions = outcome.transitions,
        "lifecycle scan complete"
    );
    Ok(())
}
