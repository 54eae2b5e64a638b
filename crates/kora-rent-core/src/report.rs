//! Reporting stage: read-only timeline and metric aggregation.
//!
//! Builds a human-auditable summary from the ledger alone: per-state
//! counts, the reclaimed lamport total (summed from per-account `amount`
//! evidence), confirmation signatures, and failure reasons, plus
//! per-account event timelines. Output renders as text or JSON; file
//! output is written whole-file atomically.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::ledger::{LedgerError, LedgerStore, LifecycleState};

/// Errors that can occur while building or writing a report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReportError {
    /// Reading the ledger failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Writing the report file failed.
    #[error("cannot write report: {0}")]
    Io(#[from] std::io::Error),

    /// Serializing the report failed.
    #[error("cannot serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One failure entry.
#[derive(Debug, Clone, Serialize)]
pub struct FailureEntry {
    /// The failed account.
    pub pubkey: String,
    /// The recorded failure reason.
    pub reason: String,
}

/// One event of an account's timeline.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineEntry {
    /// Event id.
    pub id: i64,
    /// State before.
    pub old_state: String,
    /// State after.
    pub new_state: String,
    /// Why the transition happened.
    pub trigger_reason: String,
    /// When it was recorded (Unix seconds).
    pub timestamp: i64,
}

/// The aggregated ledger report.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerReport {
    /// Network label.
    pub network: String,
    /// Total accounts in the ledger.
    pub total_accounts: u64,
    /// Account counts per lifecycle state.
    pub state_counts: BTreeMap<String, u64>,
    /// Lamports reclaimed, decimal string.
    pub total_lamports_reclaimed: String,
    /// Distinct confirmation signatures, ascending.
    pub transaction_signatures: Vec<String>,
    /// Failed accounts with reasons, pubkey ascending.
    pub failures: Vec<FailureEntry>,
}

/// Builds the aggregated report.
///
/// # Errors
///
/// Surfaces ledger errors.
pub fn build(store: &LedgerStore, network: &str) -> Result<LedgerReport, ReportError> {
    let mut state_counts = BTreeMap::new();
    let mut total_accounts = 0;
    for (state, count) in store.counts_by_state()? {
        total_accounts += count;
        state_counts.insert(state.as_str().to_string(), count);
    }

    let mut total_reclaimed: u128 = 0;
    let mut signatures = std::collections::BTreeSet::new();
    let mut failures = Vec::new();

    for account in store.all_accounts()? {
        match account.lifecycle_state {
            LifecycleState::Reclaimed => {
                if let Some(event) = store
                    .latest_event_into(&account.account_pubkey, LifecycleState::Reclaimed)?
                {
                    let evidence: Value =
                        serde_json::from_str(&event.evidence_payload).unwrap_or(Value::Null);
                    if let Some(amount) = lamports_field(&evidence, "amount") {
                        total_reclaimed += amount;
                    }
                    if let Some(signature) = evidence.get("signature").and_then(Value::as_str) {
                        signatures.insert(signature.to_string());
                    }
                }
            },
            LifecycleState::Failed => {
                let reason = store
                    .latest_event_into(&account.account_pubkey, LifecycleState::Failed)?
                    .map_or_else(|| "unknown".to_string(), |event| event.trigger_reason);
                failures.push(FailureEntry {
                    pubkey: account.account_pubkey.clone(),
                    reason,
                });
            },
            _ => {},
        }
    }

    Ok(LedgerReport {
        network: network.to_string(),
        total_accounts,
        state_counts,
        total_lamports_reclaimed: total_reclaimed.to_string(),
        transaction_signatures: signatures.into_iter().collect(),
        failures,
    })
}

fn lamports_field(evidence: &Value, key: &str) -> Option<u128> {
    match evidence.get(key)? {
        Value::Number(n) => n.as_u64().map(u128::from),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Builds one account's event timeline.
///
/// # Errors
///
/// Surfaces ledger errors.
pub fn account_timeline(
    store: &LedgerStore,
    pubkey: &str,
) -> Result<Vec<TimelineEntry>, ReportError> {
    let events = store.events_for_account(pubkey)?;
    Ok(events
        .into_iter()
        .map(|event| TimelineEntry {
            id: event.id,
            old_state: event.old_state.as_str().to_string(),
            new_state: event.new_state.as_str().to_string(),
            trigger_reason: event.trigger_reason,
            timestamp: event.timestamp,
        })
        .collect())
}

/// Renders the report as plain text.
#[must_use]
pub fn render_text(report: &LedgerReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "kora-rent report for network {}", report.network);
    let _ = writeln!(out, "accounts: {}", report.total_accounts);
    for (state, count) in &report.state_counts {
        let _ = writeln!(out, "  {state}: {count}");
    }
    let _ = writeln!(
        out,
        "lamports reclaimed: {}",
        report.total_lamports_reclaimed
    );
    if !report.transaction_signatures.is_empty() {
        let _ = writeln!(out, "signatures:");
        for signature in &report.transaction_signatures {
            let _ = writeln!(out, "  {signature}");
        }
    }
    if !report.failures.is_empty() {
        let _ = writeln!(out, "failures:");
        for failure in &report.failures {
            let _ = writeln!(out, "  {}: {}", failure.pubkey, failure.reason);
        }
    }
    out
}

/// Writes `contents` to `path` atomically (sibling temp file + rename).
///
/// # Errors
///
/// Returns an error if the write or rename fails.
pub fn write_atomic(path: &Path, contents: &str) -> Result<(), ReportError> {
    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");
    let temp_path = std::path::PathBuf::from(temp_path);

    let mut file = std::fs::File::create(&temp_path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;
    drop(file);

    if let Err(err) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(err.into());
    }
    Ok(())
}
