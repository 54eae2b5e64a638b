//! Merkle-style digest over the hashed ledger tables.
//!
//! The digest covers `sponsored_accounts` (ordered by `account_pubkey`)
//! and `lifecycle_events` (ordered by `id`) and is stable across runs
//! whenever the two tables are byte-equivalent row-sets, regardless of the
//! store engine's physical layout. The `audit_log` and `system_kv` tables
//! are deliberately excluded.
//!
//! Per table: each row is rendered as a canonical-JSON object carrying
//! every column under its schema name (`null` for nullable columns), the
//! row object is hashed with SHA-256, and the row hashes feed one
//! incremental SHA-256 per table. An empty table contributes
//! `SHA256("<table_name>:empty")`. The root is
//! `SHA256(H_sponsored_accounts || H_lifecycle_events)`, lowercase hex.

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::canonical::{canonical_bytes, CanonicalError};
use crate::ledger::{LedgerError, LedgerStore, LifecycleEvent, SponsoredAccount};

/// Errors that can occur while hashing ledger state.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StateHashError {
    /// Reading the ledger failed.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// A row could not be canonicalized.
    #[error(transparent)]
    Canonical(#[from] CanonicalError),

    /// A stored evidence payload was not valid JSON.
    #[error("malformed evidence payload in event {event_id}: {source}")]
    MalformedEvidence {
        /// Id of the offending lifecycle event.
        event_id: i64,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },
}

/// Renders one byte slice as lowercase hex.
#[must_use]
pub fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// Decodes a lowercase or uppercase hex string.
#[must_use]
pub fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

/// Computes the root digest over the current ledger state.
///
/// # Errors
///
/// Returns an error if the ledger cannot be read or a row fails to
/// canonicalize.
pub fn hash_ledger_state(store: &LedgerStore) -> Result<String, StateHashError> {
    let accounts = store.all_accounts()?;
    let events = store.all_events()?;

    let accounts_digest = table_digest(
        "sponsored_accounts",
        accounts.iter().map(account_row_value),
    )?;
    let events_digest = table_digest("lifecycle_events", events.iter().map(event_row_value))?;

    let mut root = Sha256::new();
    root.update(accounts_digest);
    root.update(events_digest);
    Ok(hex_encode(&root.finalize()))
}

/// Hashes one table's rows, or its `<name>:empty` marker.
fn table_digest<I>(table_name: &str, rows: I) -> Result<[u8; 32], StateHashError>
where
    I: IntoIterator<Item = Result<Value, StateHashError>>,
{
    let mut hasher = Sha256::new();
    let mut any = false;
    for row in rows {
        any = true;
        let row_hash = Sha256::digest(canonical_bytes(&row?)?);
        hasher.update(row_hash);
    }
    if !any {
        return Ok(Sha256::digest(format!("{table_name}:empty")).into());
    }
    Ok(hasher.finalize().into())
}

/// The hashed JSON shape of a `sponsored_accounts` row.
fn account_row_value(account: &SponsoredAccount) -> Result<Value, StateHashError> {
    Ok(json!({
        "account_pubkey": account.account_pubkey,
        "creation_signature": account.creation_signature,
        "slot": account.slot,
        "operator_pubkey": account.operator_pubkey,
        "discovered_at": account.discovered_at,
        "lifecycle_state": account.lifecycle_state.as_str(),
        "lamports": account.lamports,
        "data_len": account.data_len,
        "owner_program": account.owner_program,
        "last_lifecycle_check": account.last_lifecycle_check,
        "processing_lock": account.processing_lock,
    }))
}

/// The hashed JSON shape of a `lifecycle_events` row.
///
/// The stored evidence payload is parsed back to a structured value so
/// unknown forward-compatible keys are hashed verbatim rather than as an
/// opaque string.
fn event_row_value(event: &LifecycleEvent) -> Result<Value, StateHashError> {
    let evidence: Value = serde_json::from_str(&event.evidence_payload).map_err(|source| {
        StateHashError::MalformedEvidence {
            event_id: event.id,
            source,
        }
    })?;
    Ok(json!({
        "id": event.id,
        "account_pubkey": event.account_pubkey,
        "old_state": event.old_state.as_str(),
        "new_state": event.new_state.as_str(),
        "trigger_reason": event.trigger_reason,
        "evidence_payload": evidence,
        "timestamp": event.timestamp,
    }))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::ledger::{DiscoveredAccount, LifecycleState};

    fn discovered(pubkey: &str) -> DiscoveredAccount {
        DiscoveredAccount {
            account_pubkey: pubkey.to_string(),
            creation_signature: format!("sig-{pubkey}"),
            slot: 7,
            operator_pubkey: "Operator111111111111111111111111111111".to_string(),
        }
    }

    #[test]
    fn empty_ledger_matches_the_fixed_vector() {
        let store = LedgerStore::in_memory().unwrap();
        let digest = hash_ledger_state(&store).unwrap();

        let mut root = Sha256::new();
        root.update(Sha256::digest(b"sponsored_accounts:empty"));
        root.update(Sha256::digest(b"lifecycle_events:empty"));
        assert_eq!(digest, hex_encode(&root.finalize()));
    }

    #[test]
    fn identical_row_sets_hash_identically_across_stores() {
        let build = || {
            let store = LedgerStore::in_memory().unwrap();
            store.insert_discovered_at(&discovered("BBB"), 100).unwrap();
            store.insert_discovered_at(&discovered("AAA"), 100).unwrap();
            store
                .transition_at(
                    "AAA",
                    LifecycleState::Active,
                    "observed",
                    &json!({"lamports": 5}),
                    101,
                )
                .unwrap();
            store
        };
        let first = hash_ledger_state(&build()).unwrap();
        let second = hash_ledger_state(&build()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn appending_an_event_changes_the_hash() {
        let store = LedgerStore::in_memory().unwrap();
        store.insert_discovered_at(&discovered("AAA"), 100).unwrap();
        let before = hash_ledger_state(&store).unwrap();

        store
            .transition_at("AAA", LifecycleState::Active, "observed", &json!({}), 101)
            .unwrap();
        let after = hash_ledger_state(&store).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn row_order_comes_from_keys_not_insertion() {
        let forward = LedgerStore::in_memory().unwrap();
        forward.insert_discovered_at(&discovered("AAA"), 1).unwrap();
        forward.insert_discovered_at(&discovered("BBB"), 1).unwrap();

        let reverse = LedgerStore::in_memory().unwrap();
        reverse.insert_discovered_at(&discovered("BBB"), 1).unwrap();
        reverse.insert_discovered_at(&discovered("AAA"), 1).unwrap();

        assert_eq!(
            hash_ledger_state(&forward).unwrap(),
            hash_ledger_state(&reverse).unwrap()
        );
    }

    #[test]
    fn hex_round_trip() {
        let bytes = [0u8, 1, 0xab, 0xff];
        let encoded = hex_encode(&bytes);
        assert_eq!(encoded, "0001abff");
        assert_eq!(hex_decode(&encoded).unwrap(), bytes);
        assert_eq!(hex_decode("abc"), None);
        assert_eq!(hex_decode("zz"), None);
    }
}
