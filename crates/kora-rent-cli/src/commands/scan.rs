//! `kora-rent scan`: Indexer run.

use std::path::Path;

use anyhow::Result;
use tracing::info;

use kora_rent_core::indexer;

use super::{build_config, build_rpc, open_store};

pub async fn run(
    data_dir: &Path,
    operator: &str,
    network: &str,
    rpc: Option<&str>,
    dry_run: bool,
) -> Result<()> {
    let config = build_config(network, rpc, dry_run);
    let store = open_store(data_dir, &config)?;
    let rpc = build_rpc(&config)?;

    let outcome = indexer::run(&rpc, &store, operator, dry_run).await?;
    info!(
        pages = outcome.pages,
        signatures = outcome.signatures_seen,
        discovered = outcome.discovered,
        would_discover = outcome.would_discover,
        cursor = outcome.cursor_advanced.as_deref().unwrap_or("unchanged"),
        "scan complete"
    );
    Ok(())
}
