//! Policy stage: pure decision function over ledger rows.
//!
//! No chain access. Rules are evaluated in a fixed order and the first
//! matching rule assigns the new state:
//!
//! | # | Condition | New state |
//! |---|---|---|
//! | 1 | account whitelisted | `protected` |
//! | 2 | lamports or owner unknown | `skipped` |
//! | 3 | owner is not the system program | `skipped` |
//! | 4 | account holds data | `skipped` |
//! | 5 | balance below the dust floor | `dust` |
//! | 6 | zero balance | `skipped` |
//! | 7 | observed too recently | *no transition* |
//! | 8 | otherwise | `reclaimable` |
//!
//! Rows are scanned in `account_pubkey` order, so a fixed ledger snapshot
//! and configuration produce the same transitions on every run. Each
//! transition records the full effective configuration as evidence.

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::RentConfig;
use crate::ledger::{LedgerError, LedgerStore, LifecycleState, SponsoredAccount};
use crate::rpc::SYSTEM_PROGRAM_ID;
use crate::whitelist::Whitelist;

/// States the Policy Engine re-evaluates.
///
/// Terminal states and `closed` (owned by the Lifecycle Engine) are left
/// alone; `skipped` is deliberately re-evaluable.
const EVALUATED_STATES: [LifecycleState; 4] = [
    LifecycleState::Discovered,
    LifecycleState::Active,
    LifecycleState::Skipped,
    LifecycleState::Reclaimable,
];

/// Errors that can abort a Policy run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PolicyError {
    /// A ledger operation failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// One policy decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// The state the rule assigns.
    pub new_state: LifecycleState,
    /// The matched rule's reason string.
    pub reason: &'static str,
}

/// Summary of one Policy run.
#[derive(Debug, Default, Clone)]
pub struct PolicyOutcome {
    /// Rows evaluated.
    pub evaluated: usize,
    /// Transitions recorded (or counted, in dry-run).
    pub transitions: usize,
    /// Rows marked reclaimable.
    pub reclaimable: usize,
    /// Rows marked protected.
    pub protected: usize,
    /// Rows marked dust.
    pub dust: usize,
    /// Rows marked skipped.
    pub skipped: usize,
}

/// Evaluates one row against the rule table.
///
/// Pure: same row, configuration, and clock always yield the same
/// decision. Returns `None` when no transition should occur (the age
/// rule, rule 7).
#[must_use]
pub fn evaluate(
    account: &SponsoredAccount,
    config: &RentConfig,
    whitelist: &Whitelist,
    now: i64,
) -> Option<Decision> {
    // Rule 1: whitelist.
    if whitelist.contains(&account.account_pubkey) {
        return Some(Decision {
            new_state: LifecycleState::Protected,
            reason: "Whitelisted",
        });
    }

    // Rule 2: the Lifecycle Engine has not observed this account yet.
    let (Some(lamports), Some(owner)) = (account.lamports, account.owner_program.as_deref())
    else {
        return Some(Decision {
            new_state: LifecycleState::Skipped,
            reason: "Missing lifecycle data",
        });
    };

    // Rule 3: owner must be the system program.
    if owner != SYSTEM_PROGRAM_ID {
        return Some(Decision {
            new_state: LifecycleState::Skipped,
            reason: "Owner mismatch",
        });
    }

    // Rule 4: data-bearing accounts are never reclaimed.
    if account.data_len.unwrap_or(0) > 0 {
        return Some(Decision {
            new_state: LifecycleState::Skipped,
            reason: "Has data",
        });
    }

    // Rule 5: dust floor.
    if lamports < config.min_lamports {
        return Some(Decision {
            new_state: LifecycleState::Dust,
            reason: "Below dust floor",
        });
    }

    // Rule 6: nothing to reclaim.
    if lamports == 0 {
        return Some(Decision {
            new_state: LifecycleState::Skipped,
            reason: "Zero balance",
        });
    }

    // Rule 7: age gate. Too young means no transition at all.
    if config.min_age_days > 0 {
        let min_age_secs = i64::from(config.min_age_days) * 86_400;
        let old_enough = account
            .last_lifecycle_check
            .is_some_and(|checked| now - checked >= min_age_secs);
        if !old_enough {
            return None;
        }
    }

    // Rule 8: passes everything.
    Some(Decision {
        new_state: LifecycleState::Reclaimable,
        reason: "Passes all rules",
    })
}

/// Runs policy evaluation over the ledger.
///
/// # Errors
///
/// Surfaces ledger errors.
pub fn run(
    store: &LedgerStore,
    config: &RentConfig,
    whitelist: &Whitelist,
) -> Result<PolicyOutcome, PolicyError> {
    let whitelist_hash = if whitelist.is_empty() {
        None
    } else {
        Some(whitelist.content_hash())
    };
    let evidence: Value = config.evidence_value(whitelist_hash.as_deref());
    let now = chrono::Utc::now().timestamp();

    let rows = store.accounts_in_states(&EVALUATED_STATES)?;
    store.audit(
        "policy",
        "info",
        &format!("evaluation started over {} rows", rows.len()),
    )?;

    let mut outcome = PolicyOutcome {
        evaluated: rows.len(),
        ..PolicyOutcome::default()
    };

    for account in &rows {
        let Some(decision) = evaluate(account, config, whitelist, now) else {
            debug!(account = %account.account_pubkey, "too young, left unchanged");
            continue;
        };
        match decision.new_state {
            LifecycleState::Reclaimable => outcome.reclaimable += 1,
            LifecycleState::Protected => outcome.protected += 1,
            LifecycleState::Dust => outcome.dust += 1,
            _ => outcome.skipped += 1,
        }
        if decision.new_state == account.lifecycle_state {
            continue;
        }

        if config.dry_run {
            info!(
                account = %account.account_pubkey,
                from = %account.lifecycle_state,
                to = %decision.new_state,
                reason = decision.reason,
                "dry-run: would transition"
            );
        } else {
            store.transition(
                &account.account_pubkey,
                decision.new_state,
                decision.reason,
                &evidence,
            )?;
        }
        outcome.transitions += 1;
    }

    store.audit(
        "policy",
        "info",
        &format!(
            "evaluation finished: {} transitions, {} reclaimable",
            outcome.transitions, outcome.reclaimable
        ),
    )?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(pubkey: &str) -> SponsoredAccount {
        SponsoredAccount {
            account_pubkey: pubkey.to_string(),
            creation_signature: "sig".to_string(),
            slot: 1,
            operator_pubkey: "op".to_string(),
            discovered_at: 0,
            lifecycle_state: LifecycleState::Active,
            lamports: Some(5_000_000),
            data_len: Some(0),
            owner_program: Some(SYSTEM_PROGRAM_ID.to_string()),
            last_lifecycle_check: Some(0),
            processing_lock: None,
        }
    }

    fn config() -> RentConfig {
        RentConfig::for_network("devnet")
    }

    #[test]
    fn whitelist_beats_everything() {
        let mut row = account("AAA");
        // Even a row that would be skipped for missing data is protected.
        row.lamports = None;
        let whitelist = Whitelist::from_addresses(["AAA"]);
        let decision = evaluate(&row, &config(), &whitelist, 10).unwrap();
        assert_eq!(decision.new_state, LifecycleState::Protected);
        assert_eq!(decision.reason, "Whitelisted");
    }

    #[test]
    fn missing_lifecycle_data_is_skipped() {
        let mut row = account("AAA");
        row.lamports = None;
        let decision = evaluate(&row, &config(), &Whitelist::default(), 10).unwrap();
        assert_eq!(decision.new_state, LifecycleState::Skipped);
        assert_eq!(decision.reason, "Missing lifecycle data");

        let mut row = account("AAA");
        row.owner_program = None;
        let decision = evaluate(&row, &config(), &Whitelist::default(), 10).unwrap();
        assert_eq!(decision.reason, "Missing lifecycle data");
    }

    #[test]
    fn owner_mismatch_is_skipped() {
        let mut row = account("AAA");
        row.owner_program = Some("TokenProgram1111111111111111111111111111111".to_string());
        let decision = evaluate(&row, &config(), &Whitelist::default(), 10).unwrap();
        assert_eq!(decision.new_state, LifecycleState::Skipped);
        assert_eq!(decision.reason, "Owner mismatch");
    }

    #[test]
    fn data_bearing_accounts_are_skipped() {
        let mut row = account("AAA");
        row.data_len = Some(165);
        let decision = evaluate(&row, &config(), &Whitelist::default(), 10).unwrap();
        assert_eq!(decision.reason, "Has data");
    }

    #[test]
    fn below_dust_floor_is_dust() {
        let mut row = account("AAA");
        row.lamports = Some(999);
        let decision = evaluate(&row, &config(), &Whitelist::default(), 10).unwrap();
        assert_eq!(decision.new_state, LifecycleState::Dust);
        assert_eq!(decision.reason, "Below dust floor");
    }

    #[test]
    fn zero_balance_with_zero_floor_is_skipped() {
        let mut row = account("AAA");
        row.lamports = Some(0);
        let mut cfg = config();
        cfg.min_lamports = 0;
        let decision = evaluate(&row, &cfg, &Whitelist::default(), 10).unwrap();
        assert_eq!(decision.new_state, LifecycleState::Skipped);
        assert_eq!(decision.reason, "Zero balance");
    }

    #[test]
    fn dust_rule_runs_before_zero_balance_rule() {
        let mut row = account("AAA");
        row.lamports = Some(0);
        // min_lamports > 0: rule 5 fires first, so zero balance is dust.
        let decision = evaluate(&row, &config(), &Whitelist::default(), 10).unwrap();
        assert_eq!(decision.new_state, LifecycleState::Dust);
    }

    #[test]
    fn too_young_yields_no_transition() {
        let mut cfg = config();
        cfg.min_age_days = 7;
        let mut row = account("AAA");
        row.last_lifecycle_check = Some(1_000_000);
        // One day later: not old enough.
        assert!(evaluate(&row, &cfg, &Whitelist::default(), 1_000_000 + 86_400).is_none());
        // Seven days later: reclaimable.
        let decision = evaluate(
            &row,
            &cfg,
            &Whitelist::default(),
            1_000_000 + 7 * 86_400,
        )
        .unwrap();
        assert_eq!(decision.new_state, LifecycleState::Reclaimable);
    }

    #[test]
    fn passing_account_becomes_reclaimable() {
        let decision = evaluate(&account("AAA"), &config(), &Whitelist::default(), 10).unwrap();
        assert_eq!(decision.new_state, LifecycleState::Reclaimable);
        assert_eq!(decision.reason, "Passes all rules");
    }

    #[test]
    fn run_is_deterministic_and_records_config_evidence() {
        let store = LedgerStore::in_memory().unwrap();
        for pubkey in ["BBB", "AAA", "CCC"] {
            store
                .insert_discovered(&crate::ledger::DiscoveredAccount {
                    account_pubkey: pubkey.to_string(),
                    creation_signature: "sig".to_string(),
                    slot: 1,
                    operator_pubkey: "op".to_string(),
                })
                .unwrap();
            store
                .record_observation(pubkey, 5_000_000, 0, Some(SYSTEM_PROGRAM_ID), 1)
                .unwrap();
            store
                .transition(pubkey, LifecycleState::Active, "observed", &serde_json::json!({}))
                .unwrap();
        }

        let outcome = run(&store, &config(), &Whitelist::default()).unwrap();
        assert_eq!(outcome.evaluated, 3);
        assert_eq!(outcome.transitions, 3);
        assert_eq!(outcome.reclaimable, 3);

        // Second run: same decisions, nothing new to transition.
        let again = run(&store, &config(), &Whitelist::default()).unwrap();
        assert_eq!(again.reclaimable, 3);
        assert_eq!(again.transitions, 0);

        let event = store
            .latest_event_into("AAA", LifecycleState::Reclaimable)
            .unwrap()
            .unwrap();
        let evidence: Value = serde_json::from_str(&event.evidence_payload).unwrap();
        assert_eq!(evidence["min_lamports"], 1_000);
        assert!(evidence["whitelist_hash"].is_null());
    }
}
