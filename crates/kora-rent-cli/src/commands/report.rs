//! `kora-rent report`: read-only aggregation.

use std::path::Path;

use anyhow::Result;

use kora_rent_core::report;

use super::{build_config, open_store};

pub fn run(
    data_dir: &Path,
    network: &str,
    format: &str,
    output: Option<&Path>,
    account: Option<&str>,
) -> Result<()> {
    let config = build_config(network, None, false);
    let store = open_store(data_dir, &config)?;

    let rendered = match account {
        Some(pubkey) => {
            let timeline = report::account_timeline(&store, pubkey)?;
            if format == "json" {
                serde_json::to_string_pretty(&timeline)?
            } else {
                let mut out = format!("timeline for {pubkey}\n");
                for entry in &timeline {
                    out.push_str(&format!(
                        "  #{} {} -> {} ({}) at {}\n",
                        entry.id,
                        entry.old_state,
                        entry.new_state,
                        entry.trigger_reason,
                        entry.timestamp
                    ));
                }
                out
            }
        },
        None => {
            let summary = report::build(&store, network)?;
            if format == "json" {
                serde_json::to_string_pretty(&summary)?
            } else {
                report::render_text(&summary)
            }
        },
    };

    match output {
        Some(path) => report::write_atomic(path, &rendered)?,
        None => print!("{rendered}"),
    }
    Ok(())
}
