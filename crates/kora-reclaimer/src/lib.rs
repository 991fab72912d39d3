//! kora-reclaimer
//!
//! The reclamation pipeline: fetch-and-lock → just-in-time verification →
//! plan → execute → report. The only component that submits transactions.
//!
//! Safety comes from two places. The ledger transaction around
//! fetch-and-lock guarantees at most one worker owns a row at any time, so
//! several workers can share a ledger without coordination. And nothing is
//! ever swept on the strength of the ledger alone: every locked account is
//! re-read on chain immediately before instruction building, and the
//! observed balance, not the cached one, is what the transfer moves.
//! A lost confirmation cannot double-spend: the recent blockhash expires,
//! and the next run's JIT check sees the emptied account and records
//! `closed_zero`.

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use kora_chain::types::AccountSnapshot;
use kora_chain::{build_sweep_transaction, ChainSubmitter, TransferOut};
use kora_core::account::SponsoredAccount;
use kora_core::constants::{MAX_TRANSFERS_PER_TX, SYSTEM_PROGRAM_ID};
use kora_core::error::KoraRentError;
use kora_core::state::LifecycleState;
use kora_core::types::Pubkey;
use kora_crypto::OperatorKeypair;
use kora_ledger::{Ledger, Transition};

/// A process-unique 128-bit lock owner id.
pub fn fresh_worker_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

pub struct Reclaimer<'a, C: ChainSubmitter> {
    chain: &'a C,
    ledger: &'a Ledger,
    keypair: Option<&'a OperatorKeypair>,
    batch_size: usize,
    dry_run: bool,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReclaimOutcome {
    pub locked: usize,
    pub closed_zero: usize,
    pub skipped: usize,
    pub reclaimed: usize,
    pub failed: usize,
    pub batches: usize,
    pub total_lamports: u128,
    pub signatures: Vec<String>,
    pub dry_run: bool,
}

/// A locked row that survived JIT verification, with the balance the chain
/// reported for it. The ledger's cached value plays no part from here on.
struct VerifiedAccount {
    row: SponsoredAccount,
    verified_lamports: u64,
}

impl<'a, C: ChainSubmitter> Reclaimer<'a, C> {
    pub fn new(
        chain: &'a C,
        ledger: &'a Ledger,
        keypair: Option<&'a OperatorKeypair>,
        batch_size: usize,
        dry_run: bool,
    ) -> Self {
        Self {
            chain,
            ledger,
            keypair,
            batch_size,
            dry_run,
        }
    }

    /// Run the pipeline until fetch-and-lock comes back empty.
    pub async fn run(&self, worker_id: &str) -> Result<ReclaimOutcome, KoraRentError> {
        if !self.dry_run && self.keypair.is_none() {
            return Err(KoraRentError::MissingKeypair);
        }
        let mut outcome = ReclaimOutcome {
            dry_run: self.dry_run,
            ..Default::default()
        };
        info!(worker_id, dry_run = self.dry_run, "reclaimer starting");

        let mut seq = 0usize;
        loop {
            let locked = self.ledger.fetch_and_lock(worker_id, self.batch_size)?;
            if locked.is_empty() {
                break;
            }
            outcome.locked += locked.len();

            let verified = self.verify_batch(locked, &mut outcome).await?;
            self.execute_batches(verified, worker_id, &mut seq, &mut outcome)
                .await?;
        }

        if self.dry_run {
            // Dry-run rows were never transitioned; release them.
            self.ledger.unlock(Some(worker_id))?;
        }
        info!(
            reclaimed = outcome.reclaimed,
            failed = outcome.failed,
            closed_zero = outcome.closed_zero,
            skipped = outcome.skipped,
            total_lamports = outcome.total_lamports,
            "reclaimer finished"
        );
        Ok(outcome)
    }

    /// JIT verification: one batched chain read for the locked set, then the
    /// rule ladder per account. Invalid rows transition immediately; the
    /// survivors carry their on-chain balance forward.
    async fn verify_batch(
        &self,
        locked: Vec<SponsoredAccount>,
        outcome: &mut ReclaimOutcome,
    ) -> Result<Vec<VerifiedAccount>, KoraRentError> {
        let addresses: Vec<String> = locked.iter().map(|r| r.account_pubkey.clone()).collect();
        let observed = self.chain.multiple_accounts(&addresses).await?;

        let now = Utc::now().timestamp();
        let mut verified = Vec::new();
        for (row, snapshot) in locked.into_iter().zip(observed) {
            let rejection = match &snapshot {
                None => Some((LifecycleState::ClosedZero, "does not exist")),
                Some(s) if s.lamports == 0 => Some((LifecycleState::ClosedZero, "0 lamports")),
                Some(s) if s.owner != SYSTEM_PROGRAM_ID => {
                    Some((LifecycleState::Skipped, "owner changed"))
                }
                Some(s) if s.data_len > 0 => Some((LifecycleState::Skipped, "has data")),
                Some(_) => None,
            };

            match rejection {
                None => {
                    let verified_lamports = snapshot.as_ref().map(|s| s.lamports).unwrap_or(0);
                    verified.push(VerifiedAccount {
                        row,
                        verified_lamports,
                    });
                }
                Some((new_state, reason)) => {
                    match new_state {
                        LifecycleState::ClosedZero => outcome.closed_zero += 1,
                        _ => outcome.skipped += 1,
                    }
                    if self.dry_run {
                        info!(pubkey = %row.account_pubkey, reason, "dry-run: JIT would reject");
                        continue;
                    }
                    self.reject(row, snapshot.as_ref(), new_state, reason, now)?;
                }
            }
        }
        Ok(verified)
    }

    /// Transition a JIT-rejected row, recording the fresh observation.
    fn reject(
        &self,
        row: SponsoredAccount,
        snapshot: Option<&AccountSnapshot>,
        new_state: LifecycleState,
        reason: &str,
        now: i64,
    ) -> Result<(), KoraRentError> {
        let evidence = match snapshot {
            Some(s) => json!({
                "exists": true,
                "lamports": s.lamports,
                "data_len": s.data_len,
                "owner": s.owner,
                "reason": reason,
            }),
            None => json!({ "exists": false, "reason": reason }),
        };
        let old_state = row.lifecycle_state;
        let pubkey = row.account_pubkey.clone();
        let mut updated = row;
        updated.lifecycle_state = new_state;
        match snapshot {
            Some(s) => {
                updated.lamports = Some(s.lamports);
                updated.data_len = Some(s.data_len);
                updated.owner_program = Some(s.owner.clone());
            }
            None => {
                updated.lamports = Some(0);
                updated.data_len = Some(0);
                updated.owner_program = None;
            }
        }
        self.ledger.apply_transition(Transition {
            updated,
            expected_state: old_state,
            trigger_reason: reason,
            evidence: &evidence,
            timestamp: now,
        })?;
        self.ledger
            .audit("reclaimer", "info", &format!("{pubkey}: JIT rejected ({reason})"));
        Ok(())
    }

    /// Plan and execute: partition into hard-capped transfer batches, one
    /// transaction each; report every batch atomically.
    async fn execute_batches(
        &self,
        verified: Vec<VerifiedAccount>,
        worker_id: &str,
        seq: &mut usize,
        outcome: &mut ReclaimOutcome,
    ) -> Result<(), KoraRentError> {
        for chunk in verified.chunks(MAX_TRANSFERS_PER_TX) {
            let batch_id = format!("batch-{}-{}", Utc::now().timestamp_millis(), *seq);
            *seq += 1;
            outcome.batches += 1;
            let batch_total: u128 = chunk
                .iter()
                .map(|v| u128::from(v.verified_lamports))
                .sum();

            if self.dry_run {
                info!(
                    batch_id = %batch_id,
                    accounts = chunk.len(),
                    lamports = batch_total,
                    "dry-run: would submit sweep"
                );
                outcome.total_lamports += batch_total;
                continue;
            }
            let keypair = self.keypair.ok_or(KoraRentError::MissingKeypair)?;

            let mut transfers = Vec::with_capacity(chunk.len());
            for v in chunk {
                transfers.push(TransferOut {
                    source: Pubkey::from_b58(&v.row.account_pubkey)?,
                    lamports: v.verified_lamports,
                });
            }

            let blockhash = self.chain.latest_blockhash().await?;
            let built = build_sweep_transaction(keypair, &transfers, &blockhash)?;
            let now = Utc::now().timestamp();

            match self.chain.submit_and_confirm(&built.wire_base64).await {
                Ok(signature) => {
                    let pairs: Vec<(String, u64)> = chunk
                        .iter()
                        .map(|v| (v.row.account_pubkey.clone(), v.verified_lamports))
                        .collect();
                    self.ledger
                        .commit_reclaimed_batch(&pairs, &signature, batch_total, now)?;
                    outcome.reclaimed += chunk.len();
                    outcome.total_lamports += batch_total;
                    outcome.signatures.push(signature.clone());
                    self.ledger.audit(
                        "reclaimer",
                        "info",
                        &format!(
                            "{batch_id}: reclaimed {} accounts, {batch_total} lamports, {signature}",
                            chunk.len()
                        ),
                    );
                }
                Err(e) => {
                    let message = match &e {
                        KoraRentError::Submit(m) => m.clone(),
                        other => other.to_string(),
                    };
                    warn!(batch_id = %batch_id, worker_id, error = %message, "sweep failed");
                    let pubkeys: Vec<String> = chunk
                        .iter()
                        .map(|v| v.row.account_pubkey.clone())
                        .collect();
                    self.ledger.commit_failed_batch(&pubkeys, &message, now)?;
                    outcome.failed += chunk.len();
                    self.ledger.audit(
                        "reclaimer",
                        "error",
                        &format!("{batch_id}: submit failed: {message}"),
                    );
                }
            }
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
