//! Reclamation stage: fetch-and-lock → JIT verify → plan → execute →
//! report.
//!
//! The only component that submits transactions. Correctness under
//! concurrent workers derives from the ledger transaction around
//! [`LedgerStore::fetch_and_lock`]: at most one worker owns a row at any
//! time. Every account is re-verified on chain immediately before an
//! instruction is built for it; the ledger's cached balance is never
//! trusted for instruction building.
//!
//! Crash safety: a crash leaves locked rows holding a stale worker id,
//! cleared by [`LedgerStore::unlock_sweep`] or lazily on the next
//! success/failure path. A lost confirmation cannot double-spend: the
//! transaction is bound to a recent blockhash, and the next run's JIT
//! check observes the drained balance and records `closed_zero`.

use std::sync::OnceLock;

use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::RentConfig;
use crate::keypair::OperatorKeypair;
use crate::ledger::{LedgerError, LedgerStore, LifecycleState, SponsoredAccount};
use crate::rpc::wire::{build_transfer_transaction, PlannedTransfer, WireError};
use crate::rpc::{AccountSnapshot, ChainRpc, RpcError, SYSTEM_PROGRAM_ID};

/// Accounts per submitted transaction, a hard cap safely below the
/// chain's transaction-size limit.
const TRANSFERS_PER_TRANSACTION: usize = 10;

/// The process-wide worker id: a random 128-bit identifier generated once
/// per process.
fn process_worker_id() -> &'static str {
    static WORKER_ID: OnceLock<String> = OnceLock::new();
    WORKER_ID.get_or_init(|| Uuid::new_v4().to_string())
}

/// Errors that can abort a Reclaimer run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReclaimError {
    /// A keypair is required unless running dry.
    #[error("a signing keypair is required outside dry-run")]
    MissingKeypair,

    /// A batch-level RPC call failed; locks were released.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// A ledger operation failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Transaction encoding failed.
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Summary of one Reclaimer run.
#[derive(Debug, Default, Clone)]
pub struct ReclaimOutcome {
    /// Rows locked across all fetch-and-lock rounds.
    pub locked: usize,
    /// Rows that survived JIT verification.
    pub verified: usize,
    /// Rows found already empty or absent.
    pub closed_zero: usize,
    /// Rows skipped (owner changed or data appeared).
    pub skipped: usize,
    /// Rows reclaimed with confirmed transactions.
    pub reclaimed: usize,
    /// Rows in failed batches.
    pub failed: usize,
    /// Transactions submitted (or planned, in dry-run).
    pub batches: usize,
    /// Lamports reclaimed (or intended, in dry-run).
    pub total_lamports: u128,
}

/// Runs the reclamation loop with the process worker id.
///
/// # Errors
///
/// Returns [`ReclaimError::MissingKeypair`] outside dry-run without a
/// keypair, and surfaces batch-level RPC and ledger errors.
pub async fn run(
    rpc: &dyn ChainRpc,
    store: &LedgerStore,
    keypair: Option<&OperatorKeypair>,
    config: &RentConfig,
) -> Result<ReclaimOutcome, ReclaimError> {
    run_with_worker(rpc, store, keypair, config, process_worker_id()).await
}

/// [`run`] with an explicit worker id (cooperating workers and tests).
///
/// # Errors
///
/// See [`run`].
pub async fn run_with_worker(
    rpc: &dyn ChainRpc,
    store: &LedgerStore,
    keypair: Option<&OperatorKeypair>,
    config: &RentConfig,
    worker_id: &str,
) -> Result<ReclaimOutcome, ReclaimError> {
    if keypair.is_none() && !config.dry_run {
        return Err(ReclaimError::MissingKeypair);
    }

    store.audit(
        "reclaimer",
        "info",
        &format!("run started (worker {worker_id}, dry_run={})", config.dry_run),
    )?;

    let mut outcome = ReclaimOutcome::default();
    let mut batch_seq: u64 = 0;
    // Dry-run holds its locks until the end of the run so the loop
    // terminates, then releases them without any state change.
    let mut dry_run_locked: Vec<String> = Vec::new();

    loop {
        let batch = store.fetch_and_lock(worker_id, config.batch_size)?;
        if batch.is_empty() {
            break;
        }
        outcome.locked += batch.len();

        let verified = match jit_verify(rpc, store, &batch, &mut outcome).await {
            Ok(verified) => verified,
            Err(err) => {
                // Transient RPC failure: release our locks, surface the
                // error, mutate no lifecycle state.
                let held: Vec<String> = batch
                    .iter()
                    .map(|account| account.account_pubkey.clone())
                    .collect();
                store.release_locks(&held)?;
                store.release_locks(&dry_run_locked)?;
                return Err(err.into());
            },
        };

        for plan in plan_batches(&verified, &mut batch_seq) {
            outcome.batches += 1;
            let batch_total: u128 = plan
                .transfers
                .iter()
                .map(|transfer| u128::from(transfer.lamports))
                .sum();

            if config.dry_run {
                info!(
                    batch = %plan.batch_id,
                    accounts = plan.transfers.len(),
                    lamports = %batch_total,
                    "dry-run: would submit batch"
                );
                outcome.total_lamports += batch_total;
                dry_run_locked
                    .extend(plan.transfers.iter().map(|transfer| transfer.source.clone()));
                continue;
            }
            let Some(keypair) = keypair else {
                return Err(ReclaimError::MissingKeypair);
            };

            match execute_batch(rpc, keypair, &plan).await {
                Ok(signature) => {
                    let entries: Vec<(String, u64)> = plan
                        .transfers
                        .iter()
                        .map(|transfer| (transfer.source.clone(), transfer.lamports))
                        .collect();
                    store.mark_reclaimed_batch(&entries, &signature)?;
                    outcome.reclaimed += entries.len();
                    outcome.total_lamports += batch_total;
                    info!(
                        batch = %plan.batch_id,
                        %signature,
                        lamports = %batch_total,
                        "batch confirmed"
                    );
                },
                Err(err) => {
                    let message = err.to_string();
                    warn!(batch = %plan.batch_id, error = %message, "batch failed");
                    let pubkeys: Vec<String> = plan
                        .transfers
                        .iter()
                        .map(|transfer| transfer.source.clone())
                        .collect();
                    store.mark_failed_batch(&pubkeys, &message)?;
                    outcome.failed += pubkeys.len();
                },
            }
        }
    }

    store.release_locks(&dry_run_locked)?;

    store.audit(
        "reclaimer",
        "info",
        &format!(
            "run finished: {} reclaimed, {} failed, {} lamports",
            outcome.reclaimed, outcome.failed, outcome.total_lamports
        ),
    )?;
    Ok(outcome)
}

/// One planned transaction of at most ten transfers.
#[derive(Debug, Clone)]
struct PlannedBatch {
    batch_id: String,
    transfers: Vec<PlannedTransfer>,
}

/// Re-verifies a locked batch on chain and transitions disqualified rows
/// immediately. Returns the survivors with their verified balances.
async fn jit_verify(
    rpc: &dyn ChainRpc,
    store: &LedgerStore,
    batch: &[SponsoredAccount],
    outcome: &mut ReclaimOutcome,
) -> Result<Vec<PlannedTransfer>, ReclaimError> {
    let addresses: Vec<String> = batch
        .iter()
        .map(|account| account.account_pubkey.clone())
        .collect();
    let snapshots = rpc.multiple_accounts(&addresses).await?;

    let mut verified = Vec::new();
    for (account, snapshot) in batch.iter().zip(snapshots) {
        match classify(snapshot.as_ref()) {
            Verdict::Verified { lamports } => {
                outcome.verified += 1;
                verified.push(PlannedTransfer {
                    source: account.account_pubkey.clone(),
                    lamports,
                });
            },
            Verdict::Disqualified { state, reason } => {
                match state {
                    LifecycleState::ClosedZero => outcome.closed_zero += 1,
                    _ => outcome.skipped += 1,
                }
                let evidence = match snapshot {
                    Some(snap) => json!({
                        "lamports": snap.lamports,
                        "data_len": snap.data_len,
                        "owner": snap.owner,
                    }),
                    None => json!({ "observed": null }),
                };
                store.transition(&account.account_pubkey, state, reason, &evidence)?;
                info!(
                    account = %account.account_pubkey,
                    %state,
                    reason,
                    "verification disagreed with ledger"
                );
            },
        }
    }
    Ok(verified)
}

enum Verdict {
    Verified { lamports: u64 },
    Disqualified {
        state: LifecycleState,
        reason: &'static str,
    },
}

/// The four ordered disqualification rules, then acceptance.
fn classify(snapshot: Option<&AccountSnapshot>) -> Verdict {
    let Some(snap) = snapshot else {
        return Verdict::Disqualified {
            state: LifecycleState::ClosedZero,
            reason: "does not exist",
        };
    };
    if snap.lamports == 0 {
        return Verdict::Disqualified {
            state: LifecycleState::ClosedZero,
            reason: "0 lamports",
        };
    }
    if snap.owner != SYSTEM_PROGRAM_ID {
        return Verdict::Disqualified {
            state: LifecycleState::Skipped,
            reason: "owner changed",
        };
    }
    if snap.data_len > 0 {
        return Verdict::Disqualified {
            state: LifecycleState::Skipped,
            reason: "has data",
        };
    }
    Verdict::Verified {
        lamports: snap.lamports,
    }
}

/// Partitions verified transfers into submission batches.
fn plan_batches(verified: &[PlannedTransfer], batch_seq: &mut u64) -> Vec<PlannedBatch> {
    let now_millis = chrono::Utc::now().timestamp_millis();
    verified
        .chunks(TRANSFERS_PER_TRANSACTION)
        .map(|chunk| {
            let batch_id = format!("batch-{now_millis}-{batch_seq}");
            *batch_seq += 1;
            PlannedBatch {
                batch_id,
                transfers: chunk.to_vec(),
            }
        })
        .collect()
}

/// Builds, signs, and submits one batch at confirmed commitment.
async fn execute_batch(
    rpc: &dyn ChainRpc,
    keypair: &OperatorKeypair,
    plan: &PlannedBatch,
) -> Result<String, ReclaimError> {
    let blockhash = rpc.latest_blockhash().await?;
    let transaction = build_transfer_transaction(keypair, &plan.transfers, &blockhash)?;
    let signature = rpc.submit_and_confirm(&transaction).await?;
    Ok(signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(lamports: u64, data_len: u64, owner: &str) -> AccountSnapshot {
        AccountSnapshot {
            lamports,
            data_len,
            owner: owner.to_string(),
            executable: false,
        }
    }

    #[test]
    fn absent_account_is_closed_zero() {
        let Verdict::Disqualified { state, reason } = classify(None) else {
            panic!("expected disqualification");
        };
        assert_eq!(state, LifecycleState::ClosedZero);
        assert_eq!(reason, "does not exist");
    }

    #[test]
    fn drained_account_is_closed_zero() {
        let snap = snapshot(0, 0, SYSTEM_PROGRAM_ID);
        let Verdict::Disqualified { state, reason } = classify(Some(&snap)) else {
            panic!("expected disqualification");
        };
        assert_eq!(state, LifecycleState::ClosedZero);
        assert_eq!(reason, "0 lamports");
    }

    #[test]
    fn reassigned_owner_is_skipped() {
        let snap = snapshot(1_000, 0, "TokenProgram1111111111111111111111111111111");
        let Verdict::Disqualified { state, reason } = classify(Some(&snap)) else {
            panic!("expected disqualification");
        };
        assert_eq!(state, LifecycleState::Skipped);
        assert_eq!(reason, "owner changed");
    }

    #[test]
    fn data_bearing_account_is_skipped() {
        let snap = snapshot(1_000, 8, SYSTEM_PROGRAM_ID);
        let Verdict::Disqualified { reason, .. } = classify(Some(&snap)) else {
            panic!("expected disqualification");
        };
        assert_eq!(reason, "has data");
    }

    #[test]
    fn live_system_account_is_verified_with_chain_balance() {
        let snap = snapshot(2_000_000, 0, SYSTEM_PROGRAM_ID);
        let Verdict::Verified { lamports } = classify(Some(&snap)) else {
            panic!("expected verification");
        };
        assert_eq!(lamports, 2_000_000);
    }

    #[test]
    fn plans_at_most_ten_transfers_per_batch() {
        let verified: Vec<PlannedTransfer> = (0..23)
            .map(|i| PlannedTransfer {
                source: format!("account-{i:02}"),
                lamports: 100,
            })
            .collect();
        let mut seq = 0;
        let plans = plan_batches(&verified, &mut seq);
        assert_eq!(plans.len(), 3);
        assert_eq!(plans[0].transfers.len(), 10);
        assert_eq!(plans[1].transfers.len(), 10);
        assert_eq!(plans[2].transfers.len(), 3);
        assert_eq!(seq, 3);
        // Batch ids are unique.
        assert_ne!(plans[0].batch_id, plans[1].batch_id);
    }

    #[test]
    fn worker_id_is_stable_within_the_process() {
        assert_eq!(process_worker_id(), process_worker_id());
        assert_eq!(process_worker_id().len(), 36);
    }
}
