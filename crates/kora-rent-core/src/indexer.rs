//! Discovery stage: operator transaction history → sponsored accounts.
//!
//! The Indexer pages backwards through the operator's signature history
//! (`before` cursor), stopping at the resume cursor from the last
//! completed run (`until` semantics). Each transaction is fetched in
//! parsed form; a system-program `create_account` instruction whose
//! `source` is the operator, inside a transaction the operator paid for,
//! discovers exactly one sponsored account. Insertion is idempotent.
//!
//! The resume cursor advances **at most once per run**, to the newest
//! signature of the first fetched page, and only if no prior cursor
//! existed, so the next run re-reads the partially processed leading
//! page and never leaves a gap. Any batch-level RPC error stops the loop
//! with the cursor untouched.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ledger::{DiscoveredAccount, LedgerError, LedgerStore};
use crate::rpc::{ChainRpc, ParsedTransaction, RpcError};

/// Signature-history page size.
const PAGE_LIMIT: usize = 100;

/// Politeness delay between per-signature transaction fetches.
const FETCH_DELAY: Duration = Duration::from_millis(200);

/// Errors that can abort an Indexer run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IndexerError {
    /// The operator address was not valid base58 of 32 bytes.
    #[error("invalid operator address: {address}")]
    InvalidOperator {
        /// The offending address.
        address: String,
    },

    /// A batch-level RPC call failed; the cursor is unchanged.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// A ledger write failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Summary of one Indexer run.
#[derive(Debug, Default, Clone)]
pub struct IndexerOutcome {
    /// History pages fetched.
    pub pages: usize,
    /// Signatures seen across all pages.
    pub signatures_seen: usize,
    /// Accounts newly inserted (0 in dry-run).
    pub discovered: usize,
    /// Accounts that would have been inserted (dry-run only).
    pub would_discover: usize,
    /// The new resume cursor, if this run advanced it.
    pub cursor_advanced: Option<String>,
}

/// Runs discovery for one operator address.
///
/// # Errors
///
/// Returns [`IndexerError::InvalidOperator`] before any ledger write if
/// the address is malformed, and surfaces batch-level RPC and ledger
/// errors; per-signature fetch failures are logged and skipped.
pub async fn run(
    rpc: &dyn ChainRpc,
    store: &LedgerStore,
    operator: &str,
    dry_run: bool,
) -> Result<IndexerOutcome, IndexerError> {
    if crate::keypair::decode_pubkey(operator).is_none() {
        return Err(IndexerError::InvalidOperator {
            address: operator.to_string(),
        });
    }

    store.audit("indexer", "info", &format!("scan started for {operator}"))?;

    let resume_cursor = store.discovery_cursor()?;
    let mut outcome = IndexerOutcome::default();
    let mut before: Option<String> = None;
    let mut newest_seen: Option<String> = None;
    let mut first_fetch = true;

    loop {
        let page = rpc
            .signatures_for_address(operator, PAGE_LIMIT, before.as_deref(), resume_cursor.as_deref())
            .await?;
        if page.is_empty() {
            break;
        }
        outcome.pages += 1;
        outcome.signatures_seen += page.len();
        if newest_seen.is_none() {
            newest_seen = Some(page[0].signature.clone());
        }

        for entry in &page {
            if entry.err.is_some() {
                debug!(signature = %entry.signature, "skipping failed transaction");
                continue;
            }
            if !first_fetch {
                tokio::time::sleep(FETCH_DELAY).await;
            }
            first_fetch = false;

            let transaction = match rpc.transaction(&entry.signature).await {
                Ok(Some(tx)) => tx,
                Ok(None) => {
                    warn!(signature = %entry.signature, "transaction not found, skipping");
                    continue;
                },
                Err(err) => {
                    warn!(signature = %entry.signature, %err, "transaction fetch failed, skipping");
                    continue;
                },
            };

            for account in parse_transaction(&transaction, operator) {
                if dry_run {
                    info!(
                        account = %account.account_pubkey,
                        signature = %account.creation_signature,
                        "dry-run: would record sponsored account"
                    );
                    outcome.would_discover += 1;
                } else if store.insert_discovered(&account)? {
                    info!(
                        account = %account.account_pubkey,
                        slot = account.slot,
                        "recorded sponsored account"
                    );
                    outcome.discovered += 1;
                }
            }
        }

        let page_len = page.len();
        before = page.last().map(|entry| entry.signature.clone());
        if page_len < PAGE_LIMIT {
            break;
        }
    }

    // The cursor moves only when this is the first completed run; later
    // runs re-read the leading page instead of risking a gap.
    if resume_cursor.is_none() {
        if let Some(newest) = newest_seen {
            if dry_run {
                info!(cursor = %newest, "dry-run: would advance resume cursor");
            } else {
                store.set_discovery_cursor(&newest)?;
                outcome.cursor_advanced = Some(newest);
            }
        }
    }

    store.audit(
        "indexer",
        "info",
        &format!(
            "scan finished: {} signatures, {} discovered",
            outcome.signatures_seen, outcome.discovered
        ),
    )?;
    Ok(outcome)
}

/// Extracts sponsored-account creations from one parsed transaction.
///
/// The operator must be the fee payer (first signer); each system-program
/// `createAccount` instruction whose `source` equals the operator
/// discovers exactly one account. A transaction that both creates and
/// closes an account still discovers the creation; a later lifecycle
/// scan observes the closure.
#[must_use]
pub fn parse_transaction(
    transaction: &ParsedTransaction,
    operator: &str,
) -> Vec<DiscoveredAccount> {
    if transaction.fee_payer.as_deref() != Some(operator) {
        return Vec::new();
    }

    transaction
        .instructions
        .iter()
        .filter(|instr| instr.program == "system" && instr.instruction_type == "createAccount")
        .filter(|instr| {
            instr.info.get("source").and_then(serde_json::Value::as_str) == Some(operator)
        })
        .filter_map(|instr| {
            let new_account = instr
                .info
                .get("newAccount")
                .and_then(serde_json::Value::as_str)?;
            Some(DiscoveredAccount {
                account_pubkey: new_account.to_string(),
                creation_signature: transaction.signature.clone(),
                slot: transaction.slot,
                operator_pubkey: operator.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::rpc::ParsedInstruction;

    fn operator() -> String {
        bs58::encode([1u8; 32]).into_string()
    }

    fn create_account_tx(signature: &str, payer: &str, source: &str, new: &str) -> ParsedTransaction {
        ParsedTransaction {
            signature: signature.to_string(),
            slot: 55,
            fee_payer: Some(payer.to_string()),
            instructions: vec![ParsedInstruction {
                program: "system".to_string(),
                instruction_type: "createAccount".to_string(),
                info: json!({
                    "source": source,
                    "newAccount": new,
                    "lamports": 2_000_000u64,
                }),
            }],
        }
    }

    #[test]
    fn discovers_operator_funded_creations() {
        let op = operator();
        let tx = create_account_tx("sig-1", &op, &op, "NewAccount111");
        let found = parse_transaction(&tx, &op);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].account_pubkey, "NewAccount111");
        assert_eq!(found[0].creation_signature, "sig-1");
        assert_eq!(found[0].slot, 55);
    }

    #[test]
    fn ignores_transactions_paid_by_someone_else() {
        let op = operator();
        let tx = create_account_tx("sig-1", "OtherPayer", &op, "NewAccount111");
        assert!(parse_transaction(&tx, &op).is_empty());
    }

    #[test]
    fn ignores_creations_funded_from_another_source() {
        let op = operator();
        let tx = create_account_tx("sig-1", &op, "OtherSource", "NewAccount111");
        assert!(parse_transaction(&tx, &op).is_empty());
    }

    #[test]
    fn ignores_non_system_instructions() {
        let op = operator();
        let tx = ParsedTransaction {
            signature: "sig-1".to_string(),
            slot: 1,
            fee_payer: Some(op.clone()),
            instructions: vec![ParsedInstruction {
                program: "spl-token".to_string(),
                instruction_type: "createAccount".to_string(),
                info: json!({ "source": op, "newAccount": "X" }),
            }],
        };
        assert!(parse_transaction(&tx, &op).is_empty());
    }

    #[test]
    fn one_transaction_can_discover_several_accounts() {
        let op = operator();
        let mut tx = create_account_tx("sig-1", &op, &op, "First111");
        tx.instructions.push(ParsedInstruction {
            program: "system".to_string(),
            instruction_type: "createAccount".to_string(),
            info: json!({ "source": op, "newAccount": "Second111" }),
        });
        let found = parse_transaction(&tx, &op);
        assert_eq!(found.len(), 2);
    }
}
