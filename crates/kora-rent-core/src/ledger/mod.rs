//! Persistent account ledger.
//!
//! The ledger is the single source of truth for the pipeline: every stage
//! reads rows written by prior stages and appends new facts. Four tables
//! are persisted (see `schema.sql`): `sponsored_accounts` (one row per
//! discovered account), `lifecycle_events` (append-only transition log),
//! `system_kv` (resume cursor), and `audit_log` (informational process
//! log, excluded from the state hash).

mod store;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use store::{LedgerError, LedgerStore};

/// The canonical lifecycle states of a sponsored account.
///
/// Exactly one lowercase `snake_case` string form exists per state and is
/// enforced at the schema boundary; every comparison in the pipeline is an
/// exact match on these forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Inserted by the Indexer; not yet observed on chain.
    Discovered,
    /// Observed present on chain by the Lifecycle Engine.
    Active,
    /// Observed absent on chain by the Lifecycle Engine.
    Closed,
    /// Whitelisted by policy; never reclaimed.
    Protected,
    /// Excluded by a policy or verification rule; re-evaluable.
    Skipped,
    /// Balance below the dust floor; not worth reclaiming.
    Dust,
    /// Passed every policy rule; eligible for the Reclaimer.
    Reclaimable,
    /// Balance transferred back to the operator.
    Reclaimed,
    /// A reclamation transaction for this account failed.
    Failed,
    /// Re-verification found the account already empty or gone.
    ClosedZero,
}

impl LifecycleState {
    /// The canonical string form stored in the ledger.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Active => "active",
            Self::Closed => "closed",
            Self::Protected => "protected",
            Self::Skipped => "skipped",
            Self::Dust => "dust",
            Self::Reclaimable => "reclaimable",
            Self::Reclaimed => "reclaimed",
            Self::Failed => "failed",
            Self::ClosedZero => "closed_zero",
        }
    }

    /// Parses the canonical string form.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownStateError`] for any string that is not one of the
    /// ten canonical forms; mixed-case or aliased spellings are rejected.
    pub fn parse(s: &str) -> Result<Self, UnknownStateError> {
        match s {
            "discovered" => Ok(Self::Discovered),
            "active" => Ok(Self::Active),
            "closed" => Ok(Self::Closed),
            "protected" => Ok(Self::Protected),
            "skipped" => Ok(Self::Skipped),
            "dust" => Ok(Self::Dust),
            "reclaimable" => Ok(Self::Reclaimable),
            "reclaimed" => Ok(Self::Reclaimed),
            "failed" => Ok(Self::Failed),
            "closed_zero" => Ok(Self::ClosedZero),
            other => Err(UnknownStateError {
                value: other.to_string(),
            }),
        }
    }

    /// Whether this state is terminal for a run.
    ///
    /// `skipped` is deliberately non-terminal (re-evaluable); `active` and
    /// `closed` are revisited by the Lifecycle Engine.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Protected | Self::Dust | Self::Reclaimed | Self::Failed | Self::ClosedZero
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored state string did not match any canonical form.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown lifecycle state: `{value}`")]
pub struct UnknownStateError {
    /// The offending string.
    pub value: String,
}

/// One row of `sponsored_accounts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SponsoredAccount {
    /// Chain address, rendered base58 (primary key).
    pub account_pubkey: String,
    /// Transaction hash that introduced the account.
    pub creation_signature: String,
    /// Chain position at creation.
    pub slot: u64,
    /// Sponsor address.
    pub operator_pubkey: String,
    /// Ledger-assigned insertion timestamp (Unix seconds).
    pub discovered_at: i64,
    /// Current lifecycle state.
    pub lifecycle_state: LifecycleState,
    /// Last-observed balance; `None` until the Lifecycle Engine runs.
    pub lamports: Option<u64>,
    /// Last-observed data length; `None` until the Lifecycle Engine runs.
    pub data_len: Option<u64>,
    /// Last-observed owner program; `None` until observed (or absent).
    pub owner_program: Option<String>,
    /// When the Lifecycle Engine last probed this account (Unix seconds).
    pub last_lifecycle_check: Option<i64>,
    /// Worker id of the Reclaimer that currently owns this row, if any.
    pub processing_lock: Option<String>,
}

/// One row of the append-only `lifecycle_events` log.
///
/// `id` ordering is the authoritative serial order of observed facts; the
/// state hasher depends on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleEvent {
    /// Auto-increment id (total order within the store).
    pub id: i64,
    /// The account this transition belongs to.
    pub account_pubkey: String,
    /// State before the transition.
    pub old_state: LifecycleState,
    /// State after the transition.
    pub new_state: LifecycleState,
    /// Short reason string.
    pub trigger_reason: String,
    /// Canonical-JSON evidence object.
    pub evidence_payload: String,
    /// When the transition was recorded (Unix seconds).
    pub timestamp: i64,
}

/// A newly discovered account, before insertion.
#[derive(Debug, Clone)]
pub struct DiscoveredAccount {
    /// Chain address, base58.
    pub account_pubkey: String,
    /// Transaction that created it.
    pub creation_signature: String,
    /// Slot of the creation transaction.
    pub slot: u64,
    /// The sponsoring operator.
    pub operator_pubkey: String,
}
