use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::KoraRentError;
use crate::state::LifecycleState;
use crate::types::{Lamports, Slot, Timestamp};

// ── SponsoredAccount ─────────────────────────────────────────────────────────

/// One row per account discovered in the operator's creation history.
///
/// Rows are append-only: an account lives in the ledger forever once
/// discovered, and only its lifecycle annotations change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SponsoredAccount {
    /// Base58 chain address; primary key.
    pub account_pubkey: String,
    /// Transaction hash that introduced the account.
    pub creation_signature: String,
    /// Chain position at creation.
    pub slot: Slot,
    /// The sponsor that paid for the creation.
    pub operator_pubkey: String,
    /// Ledger-assigned timestamp at insertion.
    pub discovered_at: Timestamp,
    pub lifecycle_state: LifecycleState,
    /// Last-observed on-chain snapshot; None until the lifecycle engine runs.
    pub lamports: Option<Lamports>,
    pub data_len: Option<u64>,
    pub owner_program: Option<String>,
    pub last_lifecycle_check: Option<Timestamp>,
    /// Worker id of the reclaimer that currently owns this row, if any.
    pub processing_lock: Option<String>,
}

impl SponsoredAccount {
    /// A freshly discovered row: no on-chain snapshot, no lock.
    pub fn discovered(
        account_pubkey: String,
        creation_signature: String,
        slot: Slot,
        operator_pubkey: String,
        discovered_at: Timestamp,
    ) -> Self {
        Self {
            account_pubkey,
            creation_signature,
            slot,
            operator_pubkey,
            discovered_at,
            lifecycle_state: LifecycleState::Discovered,
            lamports: None,
            data_len: None,
            owner_program: None,
            last_lifecycle_check: None,
            processing_lock: None,
        }
    }

    /// The row as the structured value the state hasher consumes. Field set
    /// and naming are part of the hash format; extend, never rename.
    pub fn canonical_value(&self) -> Value {
        json!({
            "account_pubkey": self.account_pubkey,
            "creation_signature": self.creation_signature,
            "slot": self.slot,
            "operator_pubkey": self.operator_pubkey,
            "discovered_at": self.discovered_at,
            "lifecycle_state": self.lifecycle_state.as_str(),
            "lamports": self.lamports,
            "data_len": self.data_len,
            "owner_program": self.owner_program,
            "last_lifecycle_check": self.last_lifecycle_check,
            "processing_lock": self.processing_lock,
        })
    }
}

// ── LifecycleEvent ───────────────────────────────────────────────────────────

/// Append-only transition log. `id` ordering is the authoritative serial
/// order of observed facts; events are immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub id: u64,
    pub account_pubkey: String,
    pub old_state: LifecycleState,
    pub new_state: LifecycleState,
    pub trigger_reason: String,
    /// Canonical-JSON encoding of the evidence object. Schema is tagged by
    /// `new_state`; consumers tolerate unknown keys.
    pub evidence_json: String,
    pub timestamp: Timestamp,
}

impl LifecycleEvent {
    /// Parsed evidence object.
    pub fn evidence(&self) -> Result<Value, KoraRentError> {
        serde_json::from_str(&self.evidence_json)
            .map_err(|e| KoraRentError::Serialization(format!("event {} evidence: {e}", self.id)))
    }

    /// The row as the structured value the state hasher consumes. Evidence is
    /// embedded as its parsed object so unknown keys hash verbatim.
    pub fn canonical_value(&self) -> Result<Value, KoraRentError> {
        Ok(json!({
            "id": self.id,
            "account_pubkey": self.account_pubkey,
            "old_state": self.old_state.as_str(),
            "new_state": self.new_state.as_str(),
            "trigger_reason": self.trigger_reason,
            "evidence": self.evidence()?,
            "timestamp": self.timestamp,
        }))
    }
}

// ── AuditEntry ───────────────────────────────────────────────────────────────

/// Structured process log line. Informational only: the audit log is not
/// covered by the DB state hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: u64,
    pub stage: String,
    pub level: String,
    pub message: String,
    pub timestamp: Timestamp,
}
