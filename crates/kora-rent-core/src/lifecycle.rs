//! Lifecycle stage: reconcile on-chain reality with the ledger.
//!
//! Every stored account is probed, not just non-terminal ones, so
//! re-initializations are detected. Accounts are processed in chunks of
//! 100 through one batched multiple-accounts query per chunk: an absent
//! account is labeled `closed`, a present one `active` (existence alone
//! implies active, no heuristics). Observed balance, data length, and
//! owner are always persisted; a label that differs from the stored state
//! produces one lifecycle event carrying the full observation.
//!
//! A per-chunk RPC failure is logged and the chunk skipped; other chunks
//! proceed.

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ledger::{LedgerError, LedgerStore, LifecycleState, SponsoredAccount};
use crate::rpc::{AccountSnapshot, ChainRpc};

/// Addresses probed per batched query.
const CHUNK_SIZE: usize = 100;

/// Lamports per byte-year charged by the chain's rent schedule.
const LAMPORTS_PER_BYTE_YEAR: u64 = 3_480;

/// Account-storage overhead included in the rent calculation, bytes.
const ACCOUNT_STORAGE_OVERHEAD: u64 = 128;

/// Years of rent an account must hold to be exempt.
const RENT_EXEMPTION_YEARS: u64 = 2;

/// Errors that can abort a Lifecycle run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LifecycleError {
    /// A ledger operation failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Summary of one Lifecycle run.
#[derive(Debug, Default, Clone)]
pub struct LifecycleOutcome {
    /// Accounts scanned.
    pub scanned: usize,
    /// Chunked queries issued.
    pub chunks: usize,
    /// Chunks skipped due to RPC failures.
    pub failed_chunks: usize,
    /// State transitions recorded.
    pub transitions: usize,
}

/// The rent-exempt minimum for an account with `data_len` bytes of data.
#[must_use]
pub const fn rent_exempt_minimum(data_len: u64) -> u64 {
    (data_len + ACCOUNT_STORAGE_OVERHEAD) * LAMPORTS_PER_BYTE_YEAR * RENT_EXEMPTION_YEARS
}

/// Runs a lifecycle scan over every stored account.
///
/// # Errors
///
/// Surfaces ledger errors; chunk-level RPC failures are tolerated and
/// counted in the outcome instead.
pub async fn run(
    rpc: &dyn ChainRpc,
    store: &LedgerStore,
    dry_run: bool,
) -> Result<LifecycleOutcome, LifecycleError> {
    let accounts = store.all_accounts()?;
    store.audit(
        "lifecycle",
        "info",
        &format!("scan started over {} accounts", accounts.len()),
    )?;

    let mut outcome = LifecycleOutcome {
        scanned: accounts.len(),
        ..LifecycleOutcome::default()
    };

    for chunk in accounts.chunks(CHUNK_SIZE) {
        outcome.chunks += 1;
        let addresses: Vec<String> = chunk
            .iter()
            .map(|account| account.account_pubkey.clone())
            .collect();

        let snapshots = match rpc.multiple_accounts(&addresses).await {
            Ok(snapshots) => snapshots,
            Err(err) => {
                warn!(%err, chunk = outcome.chunks, "chunk probe failed, skipping");
                outcome.failed_chunks += 1;
                continue;
            },
        };

        for (account, snapshot) in chunk.iter().zip(snapshots) {
            if reconcile(store, account, snapshot.as_ref(), dry_run)? {
                outcome.transitions += 1;
            }
        }
    }

    store.audit(
        "lifecycle",
        "info",
        &format!("scan finished: {} transitions", outcome.transitions),
    )?;
    Ok(outcome)
}

/// Applies one observation to the ledger. Returns whether a transition
/// was recorded.
fn reconcile(
    store: &LedgerStore,
    account: &SponsoredAccount,
    snapshot: Option<&AccountSnapshot>,
    dry_run: bool,
) -> Result<bool, LifecycleError> {
    let observed_state = if snapshot.is_some() {
        LifecycleState::Active
    } else {
        LifecycleState::Closed
    };
    let evidence = observation_evidence(snapshot);

    if dry_run {
        if observed_state != account.lifecycle_state {
            info!(
                account = %account.account_pubkey,
                from = %account.lifecycle_state,
                to = %observed_state,
                "dry-run: would transition"
            );
            return Ok(true);
        }
        return Ok(false);
    }

    let checked_at = chrono::Utc::now().timestamp();
    match snapshot {
        Some(snap) => store.record_observation(
            &account.account_pubkey,
            snap.lamports,
            snap.data_len,
            Some(&snap.owner),
            checked_at,
        )?,
        None => {
            store.record_observation(&account.account_pubkey, 0, 0, None, checked_at)?;
        },
    }

    if observed_state == account.lifecycle_state {
        debug!(account = %account.account_pubkey, state = %observed_state, "no change");
        return Ok(false);
    }

    store.transition(
        &account.account_pubkey,
        observed_state,
        "Lifecycle observation",
        &evidence,
    )?;
    Ok(true)
}

/// The full observation recorded as transition evidence.
fn observation_evidence(snapshot: Option<&AccountSnapshot>) -> Value {
    match snapshot {
        Some(snap) => json!({
            "lamports": snap.lamports,
            "data_len": snap.data_len,
            "owner": snap.owner,
            "executable": snap.executable,
            "isRentExempt": snap.lamports >= rent_exempt_minimum(snap.data_len),
        }),
        None => json!({
            "lamports": 0,
            "data_len": 0,
            "owner": null,
            "executable": false,
            "isRentExempt": false,
        }),
    }
}
