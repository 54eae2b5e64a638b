//! kora-rent: operator CLI for the attestation-and-reclamation pipeline.
//!
//! Discovers sponsor-created accounts, reconciles them with on-chain
//! state, applies the reclamation policy, reclaims rent-locked balances,
//! and emits signed attestations of the whole run.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod commands;

/// kora-rent: sponsored-account rent reclamation
#[derive(Parser, Debug)]
#[command(name = "kora-rent")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Directory holding the per-network ledger database
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan operator history for sponsored accounts
    Scan {
        /// Operator address (base58)
        #[arg(long)]
        operator: String,

        /// Network label
        #[arg(long, default_value = "devnet")]
        network: String,

        /// RPC endpoint override
        #[arg(long)]
        rpc: Option<String>,

        /// Log what would be recorded without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Lifecycle reconciliation
    #[command(subcommand)]
    Lifecycle(LifecycleCommands),

    /// Policy evaluation
    #[command(subcommand)]
    Policy(PolicyCommands),

    /// Reclamation
    #[command(subcommand)]
    Reclaim(ReclaimCommands),

    /// Aggregate ledger report
    Report {
        /// Network label
        #[arg(long, default_value = "devnet")]
        network: String,

        /// Output format
        #[arg(long, default_value = "text", value_parser = ["json", "text"])]
        format: String,

        /// Write to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,

        /// Restrict to one account's timeline
        #[arg(long)]
        account: Option<String>,
    },

    /// Attestation documents
    #[command(subcommand)]
    Attest(AttestCommands),
}

#[derive(Subcommand, Debug)]
enum LifecycleCommands {
    /// Probe every stored account on chain
    Scan {
        /// Network label
        #[arg(long, default_value = "devnet")]
        network: String,

        /// RPC endpoint override
        #[arg(long)]
        rpc: Option<String>,

        /// Log what would change without writing
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand, Debug)]
enum PolicyCommands {
    /// Apply the reclamation policy to the ledger
    Evaluate {
        /// Network label
        #[arg(long, default_value = "devnet")]
        network: String,

        /// Dust floor in lamports
        #[arg(long)]
        min_lamports: Option<u64>,

        /// Minimum days since the last lifecycle check
        #[arg(long)]
        min_age_days: Option<u32>,

        /// Whitelist file (one base58 address per line)
        #[arg(long)]
        whitelist: Option<PathBuf>,

        /// Log what would change without writing
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ReclaimCommands {
    /// Run the reclamation pipeline
    Execute {
        /// Network label
        #[arg(long, default_value = "devnet")]
        network: String,

        /// RPC endpoint override
        #[arg(long)]
        rpc: Option<String>,

        /// Operator keypair file (JSON 64-byte array)
        #[arg(long)]
        keypair: Option<PathBuf>,

        /// Verify and plan without signing or submitting
        #[arg(long)]
        dry_run: bool,
    },

    /// Clear stale processing locks left by crashed workers
    Unlock {
        /// Network label
        #[arg(long, default_value = "devnet")]
        network: String,

        /// Only clear locks held by this worker id
        #[arg(long)]
        worker: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum AttestCommands {
    /// Assemble (and optionally sign) an attestation document
    Generate {
        /// Network label
        #[arg(long, default_value = "devnet")]
        network: String,

        /// RPC endpoint override (recorded, sanitized, in the manifest)
        #[arg(long)]
        rpc: Option<String>,

        /// Write to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,

        /// Operator keypair file for signing
        #[arg(long)]
        keypair: Option<PathBuf>,
    },

    /// Verify an attestation document
    Verify {
        /// The document to verify
        #[arg(long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Scan {
            operator,
            network,
            rpc,
            dry_run,
        } => commands::scan::run(&cli.data_dir, &operator, &network, rpc.as_deref(), dry_run).await,
        Commands::Lifecycle(LifecycleCommands::Scan {
            network,
            rpc,
            dry_run,
        }) => commands::lifecycle::run(&cli.data_dir, &network, rpc.as_deref(), dry_run).await,
        Commands::Policy(PolicyCommands::Evaluate {
            network,
            min_lamports,
            min_age_days,
            whitelist,
            dry_run,
        }) => commands::policy::run(
            &cli.data_dir,
            &network,
            min_lamports,
            min_age_days,
            whitelist.as_deref(),
            dry_run,
        ),
        Commands::Reclaim(ReclaimCommands::Execute {
            network,
            rpc,
            keypair,
            dry_run,
        }) => {
            commands::reclaim::execute(
                &cli.data_dir,
                &network,
                rpc.as_deref(),
                keypair.as_deref(),
                dry_run,
            )
            .await
        },
        Commands::Reclaim(ReclaimCommands::Unlock { network, worker }) => {
            commands::reclaim::unlock(&cli.data_dir, &network, worker.as_deref())
        },
        Commands::Report {
            network,
            format,
            output,
            account,
        } => commands::report::run(
            &cli.data_dir,
            &network,
            &format,
            output.as_deref(),
            account.as_deref(),
        ),
        Commands::Attest(AttestCommands::Generate {
            network,
            rpc,
            output,
            keypair,
        }) => commands::attest::generate(
            &cli.data_dir,
            &network,
            rpc.as_deref(),
            output.as_deref(),
            keypair.as_deref(),
        ),
        Commands::Attest(AttestCommands::Verify { file }) => commands::attest::verify(&file),
    }
}
