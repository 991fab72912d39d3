use chrono::Utc;
use serde_json::Value;
use sled::transaction::{abort, TransactionError, TransactionalTree};
use sled::Transactional;
use std::path::Path;
use tracing::{error, warn};

use kora_core::account::{AuditEntry, LifecycleEvent, SponsoredAccount};
use kora_core::constants::DISCOVERY_CURSOR_KEY;
use kora_core::error::KoraRentError;
use kora_core::state::LifecycleState;
use kora_core::types::{EventId, Timestamp};

/// Persistent ledger backed by sled (pure-Rust, no C dependencies).
///
/// Named trees:
///   sponsored_accounts — utf8 base58 pubkey → bincode(SponsoredAccount)
///   lifecycle_events   — u64 be bytes      → bincode(LifecycleEvent)
///   system_kv          — utf8 key bytes    → raw bytes (discovery cursor)
///   audit_log          — u64 be bytes      → bincode(AuditEntry)
///
/// Account keys are the UTF-8 bytes of the base58 address, so sled's byte
/// ordering is exactly `ORDER BY account_pubkey ASC`; event keys are
/// big-endian ids, so byte ordering is id ordering. The state hasher and the
/// policy scan both rely on this.
///
/// Every multi-row mutation happens inside one sled serializable transaction.
/// Worker concurrency in the reclaimer derives its correctness from these
/// transactions, not from in-process locks. Event ids come from the store's
/// monotonic id generator: strictly increasing, unique, and in real-time
/// order within any one account's history, since a locked row is owned by
/// a single worker.
pub struct Ledger {
    db: sled::Db,
    accounts: sled::Tree,
    events: sled::Tree,
    system_kv: sled::Tree,
    audit: sled::Tree,
}

/// A state transition to record: the fully updated row plus the transition
/// metadata that becomes its LifecycleEvent.
pub struct Transition<'a> {
    pub updated: SponsoredAccount,
    pub expected_state: LifecycleState,
    pub trigger_reason: &'a str,
    pub evidence: &'a Value,
    pub timestamp: Timestamp,
}

fn storage_err(e: impl std::fmt::Display) -> KoraRentError {
    KoraRentError::Storage(e.to_string())
}

fn ser_err(e: impl std::fmt::Display) -> KoraRentError {
    KoraRentError::Serialization(e.to_string())
}

fn txn_err(e: TransactionError<KoraRentError>) -> KoraRentError {
    let mapped = match e {
        TransactionError::Abort(inner) => inner,
        TransactionError::Storage(e) => KoraRentError::Storage(e.to_string()),
    };
    if let KoraRentError::LedgerIntegrity(msg) = &mapped {
        error!("CRITICAL: ledger integrity violation: {msg}");
    }
    mapped
}

fn decode_account(bytes: &[u8]) -> Result<SponsoredAccount, KoraRentError> {
    bincode::deserialize(bytes).map_err(ser_err)
}

fn decode_event(bytes: &[u8]) -> Result<LifecycleEvent, KoraRentError> {
    bincode::deserialize(bytes).map_err(ser_err)
}

impl Ledger {
    /// Open or create the ledger database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, KoraRentError> {
        let db = sled::open(path).map_err(storage_err)?;
        let accounts = db.open_tree("sponsored_accounts").map_err(storage_err)?;
        let events = db.open_tree("lifecycle_events").map_err(storage_err)?;
        let system_kv = db.open_tree("system_kv").map_err(storage_err)?;
        let audit = db.open_tree("audit_log").map_err(storage_err)?;
        Ok(Self {
            db,
            accounts,
            events,
            system_kv,
            audit,
        })
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> Result<(), KoraRentError> {
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }

    // ── Sponsored accounts ───────────────────────────────────────────────────

    pub fn get_account(&self, pubkey: &str) -> Result<Option<SponsoredAccount>, KoraRentError> {
        match self.accounts.get(pubkey.as_bytes()).map_err(storage_err)? {
            Some(bytes) => Ok(Some(decode_account(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Low-level upsert. Stages go through `insert_discovered`,
    /// `record_observation`, and `apply_transition`; this exists for seeding
    /// and repairs.
    pub fn put_account(&self, account: &SponsoredAccount) -> Result<(), KoraRentError> {
        let bytes = bincode::serialize(account).map_err(ser_err)?;
        self.accounts
            .insert(account.account_pubkey.as_bytes(), bytes)
            .map_err(storage_err)?;
        Ok(())
    }

    /// Idempotent discovery insert. Returns false when the row already
    /// existed (re-discovery is a no-op). The implicit nothing → discovered
    /// transition writes no event.
    pub fn insert_discovered(
        &self,
        account_pubkey: &str,
        creation_signature: &str,
        slot: u64,
        operator_pubkey: &str,
    ) -> Result<bool, KoraRentError> {
        let row = SponsoredAccount::discovered(
            account_pubkey.to_string(),
            creation_signature.to_string(),
            slot,
            operator_pubkey.to_string(),
            Utc::now().timestamp(),
        );
        let bytes = bincode::serialize(&row).map_err(ser_err)?;
        let swap = self
            .accounts
            .compare_and_swap(account_pubkey.as_bytes(), None::<&[u8]>, Some(bytes))
            .map_err(storage_err)?;
        Ok(swap.is_ok())
    }

    /// Every row, in `account_pubkey` ascending order.
    pub fn scan_accounts(&self) -> Result<Vec<SponsoredAccount>, KoraRentError> {
        let mut out = Vec::new();
        for item in self.accounts.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode_account(&bytes)?);
        }
        Ok(out)
    }

    pub fn count_accounts(&self) -> u64 {
        self.accounts.len() as u64
    }

    /// Refresh the on-chain snapshot columns without a state transition.
    pub fn record_observation(
        &self,
        pubkey: &str,
        lamports: Option<u64>,
        data_len: Option<u64>,
        owner_program: Option<String>,
        checked_at: Timestamp,
    ) -> Result<(), KoraRentError> {
        let mut row = self
            .get_account(pubkey)?
            .ok_or_else(|| KoraRentError::UnknownAccount(pubkey.to_string()))?;
        row.lamports = lamports;
        row.data_len = data_len;
        row.owner_program = owner_program;
        row.last_lifecycle_check = Some(checked_at);
        self.put_account(&row)
    }

    // ── Transitions ──────────────────────────────────────────────────────────

    /// Record a lifecycle transition: write the updated row and exactly one
    /// LifecycleEvent, atomically. Aborts if the stored state no longer
    /// matches `expected_state` (a concurrent writer got there first).
    ///
    /// Invariants enforced here:
    ///   - the transition must change the state
    ///   - `processing_lock` is cleared whenever the row leaves RECLAIMABLE
    ///   - `lamports` is forced to 0 on entering RECLAIMED
    pub fn apply_transition(&self, t: Transition<'_>) -> Result<EventId, KoraRentError> {
        let mut updated = t.updated;
        let new_state = updated.lifecycle_state;
        if new_state == t.expected_state {
            return Err(KoraRentError::LedgerIntegrity(format!(
                "no-op transition {} -> {} for {}",
                t.expected_state, new_state, updated.account_pubkey
            )));
        }
        if new_state != LifecycleState::Reclaimable {
            updated.processing_lock = None;
        }
        if new_state == LifecycleState::Reclaimed {
            updated.lamports = Some(0);
        }
        let evidence_json =
            kora_canonical::to_canonical_string(t.evidence).map_err(KoraRentError::from)?;
        let row_bytes = bincode::serialize(&updated).map_err(ser_err)?;

        let key = updated.account_pubkey.clone();
        let expected = t.expected_state;

        let id = self.db.generate_id().map_err(storage_err)?;
        let event = LifecycleEvent {
            id,
            account_pubkey: key.clone(),
            old_state: expected,
            new_state,
            trigger_reason: t.trigger_reason.to_string(),
            evidence_json,
            timestamp: t.timestamp,
        };
        let event_bytes = bincode::serialize(&event).map_err(ser_err)?;

        (&self.accounts, &self.events)
            .transaction(|(accounts, events)| {
                let current = match accounts.get(key.as_bytes())? {
                    Some(bytes) => match decode_account(&bytes) {
                        Ok(row) => row,
                        Err(e) => return abort(e),
                    },
                    None => return abort(KoraRentError::UnknownAccount(key.clone())),
                };
                if current.lifecycle_state != expected {
                    return abort(KoraRentError::LedgerIntegrity(format!(
                        "stale transition for {key}: expected {}, found {}",
                        expected, current.lifecycle_state
                    )));
                }
                accounts.insert(key.as_bytes(), row_bytes.clone())?;
                events.insert(&id.to_be_bytes()[..], event_bytes.clone())?;
                Ok(())
            })
            .map_err(txn_err)?;
        Ok(id)
    }

    // ── Reclaimer locking ────────────────────────────────────────────────────

    /// Claim up to `limit` RECLAIMABLE, unlocked rows for `worker_id`.
    ///
    /// Candidates are scanned outside the transaction, then re-checked and
    /// locked inside it; rows another worker claimed in between are skipped.
    /// At most one worker owns any row at any time.
    pub fn fetch_and_lock(
        &self,
        worker_id: &str,
        limit: usize,
    ) -> Result<Vec<SponsoredAccount>, KoraRentError> {
        let mut candidates = Vec::new();
        for item in self.accounts.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let row = decode_account(&bytes)?;
            if row.lifecycle_state == LifecycleState::Reclaimable && row.processing_lock.is_none() {
                candidates.push(row.account_pubkey);
                if candidates.len() >= limit {
                    break;
                }
            }
        }
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let locked = self
            .accounts
            .transaction(|accounts: &TransactionalTree| {
                let mut locked = Vec::new();
                for key in &candidates {
                    let Some(bytes) = accounts.get(key.as_bytes())? else {
                        continue;
                    };
                    let mut row = match decode_account(&bytes) {
                        Ok(row) => row,
                        Err(e) => return abort(e),
                    };
                    if row.lifecycle_state != LifecycleState::Reclaimable
                        || row.processing_lock.is_some()
                    {
                        continue;
                    }
                    row.processing_lock = Some(worker_id.to_string());
                    let updated = match bincode::serialize(&row) {
                        Ok(b) => b,
                        Err(e) => return abort(ser_err(e)),
                    };
                    accounts.insert(key.as_bytes(), updated)?;
                    locked.push(row);
                }
                Ok(locked)
            })
            .map_err(txn_err)?;
        Ok(locked)
    }

    /// Clear processing locks, optionally only those held by one worker.
    /// Returns the number of rows unlocked.
    pub fn unlock(&self, worker_id: Option<&str>) -> Result<usize, KoraRentError> {
        let mut cleared = 0;
        for item in self.accounts.iter() {
            let (key, bytes) = item.map_err(storage_err)?;
            let mut row = decode_account(&bytes)?;
            let held = match (&row.processing_lock, worker_id) {
                (Some(_), None) => true,
                (Some(lock), Some(w)) => lock == w,
                (None, _) => false,
            };
            if held {
                row.processing_lock = None;
                let updated = bincode::serialize(&row).map_err(ser_err)?;
                self.accounts.insert(key, updated).map_err(storage_err)?;
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    /// Commit a confirmed reclaim batch: every account becomes RECLAIMED with
    /// zero lamports, its lock cleared, and one event recording the per
    /// account amount, the transaction signature, and the batch total — all
    /// in a single ledger transaction.
    pub fn commit_reclaimed_batch(
        &self,
        reclaimed: &[(String, u64)],
        signature: &str,
        batch_total: u128,
        timestamp: Timestamp,
    ) -> Result<(), KoraRentError> {
        let mut prepared = Vec::with_capacity(reclaimed.len());
        for (pubkey, amount) in reclaimed {
            let evidence = serde_json::json!({
                "signature": signature,
                "amount": amount,
                "batch_total": batch_total.to_string(),
            });
            let evidence_json =
                kora_canonical::to_canonical_string(&evidence).map_err(KoraRentError::from)?;
            prepared.push((pubkey.clone(), evidence_json));
        }
        self.commit_batch_outcome(
            &prepared,
            LifecycleState::Reclaimed,
            "reclaim_confirmed",
            timestamp,
        )
    }

    /// Commit a failed reclaim batch: every account becomes FAILED, its lock
    /// cleared, evidence carrying the submit error. The error message is the
    /// trigger reason, which is what the attestation digest reports.
    pub fn commit_failed_batch(
        &self,
        pubkeys: &[String],
        error_message: &str,
        timestamp: Timestamp,
    ) -> Result<(), KoraRentError> {
        let evidence = serde_json::json!({ "error": error_message });
        let evidence_json =
            kora_canonical::to_canonical_string(&evidence).map_err(KoraRentError::from)?;
        let prepared: Vec<(String, String)> = pubkeys
            .iter()
            .map(|p| (p.clone(), evidence_json.clone()))
            .collect();
        self.commit_batch_outcome(&prepared, LifecycleState::Failed, error_message, timestamp)
    }

    fn commit_batch_outcome(
        &self,
        rows: &[(String, String)],
        new_state: LifecycleState,
        trigger_reason: &str,
        timestamp: Timestamp,
    ) -> Result<(), KoraRentError> {
        let mut events_by_key = Vec::with_capacity(rows.len());
        for (pubkey, evidence_json) in rows {
            let id = self.db.generate_id().map_err(storage_err)?;
            let event = LifecycleEvent {
                id,
                account_pubkey: pubkey.clone(),
                old_state: LifecycleState::Reclaimable,
                new_state,
                trigger_reason: trigger_reason.to_string(),
                evidence_json: evidence_json.clone(),
                timestamp,
            };
            events_by_key.push((pubkey, id, bincode::serialize(&event).map_err(ser_err)?));
        }

        (&self.accounts, &self.events)
            .transaction(|(accounts, events)| {
                for (pubkey, id, event_bytes) in &events_by_key {
                    let Some(bytes) = accounts.get(pubkey.as_bytes())? else {
                        return abort(KoraRentError::UnknownAccount((*pubkey).clone()));
                    };
                    let mut row = match decode_account(&bytes) {
                        Ok(row) => row,
                        Err(e) => return abort(e),
                    };
                    if row.lifecycle_state != LifecycleState::Reclaimable {
                        return abort(KoraRentError::LedgerIntegrity(format!(
                            "batch commit for {pubkey}: expected reclaimable, found {}",
                            row.lifecycle_state
                        )));
                    }
                    row.lifecycle_state = new_state;
                    row.processing_lock = None;
                    if new_state == LifecycleState::Reclaimed {
                        row.lamports = Some(0);
                    }
                    let row_bytes = match bincode::serialize(&row) {
                        Ok(b) => b,
                        Err(e) => return abort(ser_err(e)),
                    };
                    accounts.insert(pubkey.as_bytes(), row_bytes)?;
                    events.insert(&id.to_be_bytes()[..], event_bytes.clone())?;
                }
                Ok(())
            })
            .map_err(txn_err)
    }

    // ── Lifecycle events ─────────────────────────────────────────────────────

    /// Every event, in id ascending order.
    pub fn scan_events(&self) -> Result<Vec<LifecycleEvent>, KoraRentError> {
        let mut out = Vec::new();
        for item in self.events.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode_event(&bytes)?);
        }
        Ok(out)
    }

    /// Events for one account, in id ascending order.
    pub fn events_for_account(&self, pubkey: &str) -> Result<Vec<LifecycleEvent>, KoraRentError> {
        let mut out = Vec::new();
        for item in self.events.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let ev = decode_event(&bytes)?;
            if ev.account_pubkey == pubkey {
                out.push(ev);
            }
        }
        Ok(out)
    }

    /// The most recent event that moved `pubkey` into `new_state`.
    pub fn latest_event_into(
        &self,
        pubkey: &str,
        new_state: LifecycleState,
    ) -> Result<Option<LifecycleEvent>, KoraRentError> {
        for item in self.events.iter().rev() {
            let (_, bytes) = item.map_err(storage_err)?;
            let ev = decode_event(&bytes)?;
            if ev.account_pubkey == pubkey && ev.new_state == new_state {
                return Ok(Some(ev));
            }
        }
        Ok(None)
    }

    pub fn count_events(&self) -> u64 {
        self.events.len() as u64
    }

    // ── Discovery cursor ─────────────────────────────────────────────────────

    pub fn discovery_cursor(&self) -> Result<Option<String>, KoraRentError> {
        match self
            .system_kv
            .get(DISCOVERY_CURSOR_KEY.as_bytes())
            .map_err(storage_err)?
        {
            Some(bytes) => Ok(Some(
                String::from_utf8(bytes.to_vec())
                    .map_err(|e| KoraRentError::Serialization(format!("cursor: {e}")))?,
            )),
            None => Ok(None),
        }
    }

    pub fn set_discovery_cursor(&self, signature: &str) -> Result<(), KoraRentError> {
        self.system_kv
            .insert(DISCOVERY_CURSOR_KEY.as_bytes(), signature.as_bytes())
            .map_err(storage_err)?;
        Ok(())
    }

    // ── Audit log ────────────────────────────────────────────────────────────

    /// Append a structured process-log line. Failures are logged, not
    /// propagated: the audit trail never blocks pipeline progress.
    pub fn audit(&self, stage: &str, level: &str, message: &str) {
        if let Err(e) = self.audit_inner(stage, level, message) {
            warn!("audit append failed: {e}");
        }
    }

    fn audit_inner(&self, stage: &str, level: &str, message: &str) -> Result<(), KoraRentError> {
        let id = self.db.generate_id().map_err(storage_err)?;
        let entry = AuditEntry {
            id,
            stage: stage.to_string(),
            level: level.to_string(),
            message: message.to_string(),
            timestamp: Utc::now().timestamp(),
        };
        let bytes = bincode::serialize(&entry).map_err(ser_err)?;
        self.audit
            .insert(&id.to_be_bytes()[..], bytes)
            .map_err(storage_err)?;
        Ok(())
    }

    /// The `limit` most recent audit entries, oldest first.
    pub fn recent_audit(&self, limit: usize) -> Result<Vec<AuditEntry>, KoraRentError> {
        let mut out = Vec::new();
        for item in self.audit.iter().rev().take(limit) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(bincode::deserialize(&bytes).map_err(ser_err)?);
        }
        out.reverse();
        Ok(out)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
