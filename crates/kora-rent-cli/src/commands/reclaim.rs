//! `kora-rent reclaim`: Reclaimer pipeline and lock maintenance.

use std::path::Path;

use anyhow::{Context as _, Result};
use tracing::info;

use kora_rent_core::{reclaimer, OperatorKeypair};

use super::{build_config, build_rpc, open_store};

pub async fn execute(
    data_dir: &Path,
    network: &str,
    rpc: Option<&str>,
    keypair: Option<&Path>,
    dry_run: bool,
) -> Result<()> {
    // An unreadable keypair aborts before the ledger is touched.
    let keypair = match keypair {
        Some(path) => Some(
            OperatorKeypair::load(path)
                .with_context(|| format!("cannot load keypair {}", path.display()))?,
        ),
        None => None,
    };
    if keypair.is_none() && !dry_run {
        anyhow::bail!("--keypair is required unless --dry-run is set");
    }

    let config = build_config(network, rpc, dry_run);
    let store = open_store(data_dir, &config)?;
    let rpc = build_rpc(&config)?;

    let outcome = reclaimer::run(&rpc, &store, keypair.as_ref(), &config).await?;
    info!(
        locked = outcome.locked,
        verified = outcome.verified,
        reclaimed = outcome.reclaimed,
        failed = outcome.failed,
        skipped = outcome.skipped,
        closed_zero = outcome.closed_zero,
        batches = outcome.batches,
        lamports = %outcome.total_lamports,
        "reclaim run complete"
    );
    Ok(())
}

pub fn unlock(data_dir: &Path, network: &str, worker: Option<&str>) -> Result<()> {
    let config = build_config(network, None, false);
    let store = open_store(data_dir, &config)?;
    let cleared = store.unlock_sweep(worker)?;
    info!(cleared, "unlock sweep complete");
    Ok(())
}
