//! `kora-rent policy evaluate`: Policy Engine run.

use std::path::Path;

use anyhow::{Context as _, Result};
use tracing::info;

use kora_rent_core::{policy, Whitelist};

use super::{build_config, open_store};

pub fn run(
    data_dir: &Path,
    network: &str,
    min_lamports: Option<u64>,
    min_age_days: Option<u32>,
    whitelist: Option<&Path>,
    dry_run: bool,
) -> Result<()> {
    let mut config = build_config(network, None, dry_run);
    if let Some(min_lamports) = min_lamports {
        config.min_lamports = min_lamports;
    }
    if let Some(min_age_days) = min_age_days {
        config.min_age_days = min_age_days;
    }

    // A bad whitelist aborts before the ledger is touched.
    let whitelist = match whitelist {
        Some(path) => Whitelist::load(path)
            .with_context(|| format!("cannot load whitelist {}", path.display()))?,
        None => Whitelist::default(),
    };

    let store = open_store(data_dir, &config)?;
    let outcome = policy::run(&store, &config, &whitelist)?;
    info!(
        evaluated = outcome.evaluated,
        transitions = outcome.transitions,
        reclaimable = outcome.reclaimable,
        protected = outcome.protected,
        dust = outcome.dust,
        skipped = outcome.skipped,
        "policy evaluation complete"
    );
    Ok(())
}
