//! kora-lifecycle
//!
//! Reconciles on-chain reality with the ledger. Scans every sponsored
//! account (terminal rows included, so re-initializations are detected)
//! in batched account-info queries, persists the observed snapshot, and
//! records a transition when the observation contradicts the stored state.
//!
//! Labels are heuristic-free: absent means `closed`, existence means
//! `active`. A stored state is contradicted by:
//!   - existence, when it claims the account is gone or was never observed
//!     (`discovered`, `closed`, `closed_zero`, `reclaimed`; the last two
//!     mean the account was re-initialized and is sponsored rent again);
//!   - absence, when it is anything but `closed`, `closed_zero`, or
//!     `reclaimed`.
//! Policy-derived states with a matching existence observation keep their
//! label and only have their snapshot refreshed.

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use kora_chain::types::AccountSnapshot;
use kora_chain::ChainReader;
use kora_core::constants::{rent_exempt_minimum, ACCOUNT_INFO_CHUNK};
use kora_core::error::KoraRentError;
use kora_core::state::LifecycleState;
use kora_ledger::{Ledger, Transition};

pub struct LifecycleEngine<'a, C: ChainReader> {
    chain: &'a C,
    ledger: &'a Ledger,
    dry_run: bool,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct LifecycleOutcome {
    pub scanned: usize,
    pub chunks: usize,
    pub chunk_failures: usize,
    pub transitions: usize,
}

impl<'a, C: ChainReader> LifecycleEngine<'a, C> {
    pub fn new(chain: &'a C, ledger: &'a Ledger, dry_run: bool) -> Self {
        Self {
            chain,
            ledger,
            dry_run,
        }
    }

    /// One full reconciliation pass. A failed chunk query is logged and
    /// skipped; the remaining chunks still run.
    pub async fn run(&self) -> Result<LifecycleOutcome, KoraRentError> {
        let rows = self.ledger.scan_accounts()?;
        let mut outcome = LifecycleOutcome {
            scanned: rows.len(),
            ..Default::default()
        };
        info!(accounts = rows.len(), dry_run = self.dry_run, "lifecycle scan starting");

        for chunk in rows.chunks(ACCOUNT_INFO_CHUNK) {
            outcome.chunks += 1;
            let addresses: Vec<String> =
                chunk.iter().map(|r| r.account_pubkey.clone()).collect();
            let observed = match self.chain.multiple_accounts(&addresses).await {
                Ok(observed) => observed,
                Err(e) => {
                    warn!(error = %e, chunk = outcome.chunks, "account-info chunk failed, skipping");
                    outcome.chunk_failures += 1;
                    continue;
                }
            };

            let now = Utc::now().timestamp();
            for (row, snapshot) in chunk.iter().zip(observed) {
                if self.apply_observation(row.account_pubkey.as_str(), snapshot.as_ref(), now)? {
                    outcome.transitions += 1;
                }
            }
        }

        info!(
            transitions = outcome.transitions,
            chunk_failures = outcome.chunk_failures,
            "lifecycle scan finished"
        );
        Ok(outcome)
    }

    /// Persist one observation. Returns true when it produced a transition.
    fn apply_observation(
        &self,
        pubkey: &str,
        snapshot: Option<&AccountSnapshot>,
        now: i64,
    ) -> Result<bool, KoraRentError> {
        // Re-read the row: a prior chunk ran against the same scan output,
        // but transitions here never touch other rows, so the scanned copy
        // is still current. Fetch anyway for the expected_state check.
        let Some(current) = self.ledger.get_account(pubkey)? else {
            return Err(KoraRentError::UnknownAccount(pubkey.to_string()));
        };
        let stored = current.lifecycle_state;

        let (label, evidence) = match snapshot {
            Some(s) => (LifecycleState::Active, observation_evidence(s)),
            None => (LifecycleState::Closed, absence_evidence()),
        };
        let contradicted = match label {
            LifecycleState::Active => matches!(
                stored,
                LifecycleState::Discovered
                    | LifecycleState::Closed
                    | LifecycleState::ClosedZero
                    | LifecycleState::Reclaimed
            ),
            _ => !matches!(
                stored,
                LifecycleState::Closed | LifecycleState::ClosedZero | LifecycleState::Reclaimed
            ),
        };

        if self.dry_run {
            if contradicted {
                info!(pubkey, from = %stored, to = %label, "dry-run: would transition");
            }
            return Ok(contradicted);
        }

        let (lamports, data_len, owner) = match snapshot {
            Some(s) => (Some(s.lamports), Some(s.data_len), Some(s.owner.clone())),
            None => (Some(0), Some(0), None),
        };

        if !contradicted {
            self.ledger
                .record_observation(pubkey, lamports, data_len, owner, now)?;
            return Ok(false);
        }

        let mut updated = current;
        updated.lifecycle_state = label;
        updated.lamports = lamports;
        updated.data_len = data_len;
        updated.owner_program = owner;
        updated.last_lifecycle_check = Some(now);
        self.ledger.apply_transition(Transition {
            updated,
            expected_state: stored,
            trigger_reason: "lifecycle_observation",
            evidence: &evidence,
            timestamp: now,
        })?;
        self.ledger.audit(
            "lifecycle",
            "info",
            &format!("{pubkey}: {stored} -> {label}"),
        );
        Ok(true)
    }
}

fn observation_evidence(s: &AccountSnapshot) -> Value {
    json!({
        "exists": true,
        "lamports": s.lamports,
        "data_len": s.data_len,
        "owner": s.owner,
        "executable": s.executable,
        "is_rent_exempt": s.lamports >= rent_exempt_minimum(s.data_len),
    })
}

fn absence_evidence() -> Value {
    json!({
        "exists": false,
        "lamports": 0,
        "data_len": 0,
        "owner": null,
        "executable": false,
        "is_rent_exempt": false,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use kora_chain::MockChain;
    use kora_core::account::SponsoredAccount;
    use kora_core::constants::SYSTEM_PROGRAM_ID;

    fn temp_ledger(name: &str) -> Ledger {
        let dir = std::env::temp_dir().join(format!("kora_lifecycle_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        Ledger::open(&dir).expect("open temp ledger")
    }

    fn seed(ledger: &Ledger, pubkey: &str, state: LifecycleState) {
        let mut row = SponsoredAccount::discovered(
            pubkey.to_string(),
            format!("sig-{pubkey}"),
            7,
            "Operator".to_string(),
            1_700_000_000,
        );
        row.lifecycle_state = state;
        if state == LifecycleState::Reclaimed {
            row.lamports = Some(0);
        }
        ledger.put_account(&row).unwrap();
    }

    #[tokio::test]
    async fn discovered_account_becomes_active_with_snapshot() {
        let ledger = temp_ledger("to_active");
        let mock = MockChain::new();
        seed(&ledger, "A", LifecycleState::Discovered);
        mock.set_system_account("A", 5_000_000);

        let outcome = LifecycleEngine::new(&mock, &ledger, false)
            .run()
            .await
            .unwrap();
        assert_eq!(outcome.transitions, 1);

        let row = ledger.get_account("A").unwrap().unwrap();
        assert_eq!(row.lifecycle_state, LifecycleState::Active);
        assert_eq!(row.lamports, Some(5_000_000));
        assert_eq!(row.data_len, Some(0));
        assert_eq!(row.owner_program.as_deref(), Some(SYSTEM_PROGRAM_ID));
        assert!(row.last_lifecycle_check.is_some());

        let ev = ledger
            .latest_event_into("A", LifecycleState::Active)
            .unwrap()
            .unwrap();
        let evidence = ev.evidence().unwrap();
        assert_eq!(evidence["exists"], true);
        assert_eq!(evidence["lamports"], 5_000_000);
        // 5M lamports with no data clears the 890_880 rent floor.
        assert_eq!(evidence["is_rent_exempt"], true);
    }

    #[tokio::test]
    async fn absent_account_becomes_closed() {
        let ledger = temp_ledger("to_closed");
        let mock = MockChain::new();
        seed(&ledger, "A", LifecycleState::Active);

        let outcome = LifecycleEngine::new(&mock, &ledger, false)
            .run()
            .await
            .unwrap();
        assert_eq!(outcome.transitions, 1);
        let row = ledger.get_account("A").unwrap().unwrap();
        assert_eq!(row.lifecycle_state, LifecycleState::Closed);
        assert_eq!(row.lamports, Some(0));
        assert!(row.owner_program.is_none());
        let ev = ledger
            .latest_event_into("A", LifecycleState::Closed)
            .unwrap()
            .unwrap();
        assert_eq!(ev.evidence().unwrap()["exists"], false);
    }

    #[tokio::test]
    async fn reinitialized_closed_account_comes_back_active() {
        let ledger = temp_ledger("reinit");
        let mock = MockChain::new();
        seed(&ledger, "A", LifecycleState::Closed);
        mock.set_system_account("A", 890_880);

        let outcome = LifecycleEngine::new(&mock, &ledger, false)
            .run()
            .await
            .unwrap();
        assert_eq!(outcome.transitions, 1);
        assert_eq!(
            ledger.get_account("A").unwrap().unwrap().lifecycle_state,
            LifecycleState::Active
        );
    }

    #[tokio::test]
    async fn reclaimed_account_stays_reclaimed_while_absent() {
        let ledger = temp_ledger("reclaimed_stays");
        let mock = MockChain::new();
        seed(&ledger, "A", LifecycleState::Reclaimed);

        let outcome = LifecycleEngine::new(&mock, &ledger, false)
            .run()
            .await
            .unwrap();
        assert_eq!(outcome.transitions, 0);
        let row = ledger.get_account("A").unwrap().unwrap();
        assert_eq!(row.lifecycle_state, LifecycleState::Reclaimed);
        assert_eq!(row.lamports, Some(0));
        assert_eq!(ledger.count_events(), 0);
        // But the observation timestamp still advances.
        assert!(row.last_lifecycle_check.is_some());
    }

    #[tokio::test]
    async fn policy_states_only_refresh_their_snapshot() {
        let ledger = temp_ledger("policy_refresh");
        let mock = MockChain::new();
        seed(&ledger, "A", LifecycleState::Skipped);
        mock.set_account("A", 1_234, "SomeProgram11111111111111111111", 64);

        let outcome = LifecycleEngine::new(&mock, &ledger, false)
            .run()
            .await
            .unwrap();
        assert_eq!(outcome.transitions, 0);
        let row = ledger.get_account("A").unwrap().unwrap();
        assert_eq!(row.lifecycle_state, LifecycleState::Skipped);
        assert_eq!(row.lamports, Some(1_234));
        assert_eq!(row.data_len, Some(64));
        assert_eq!(ledger.count_events(), 0);
    }

    #[tokio::test]
    async fn chunk_failure_is_skipped_not_fatal() {
        let ledger = temp_ledger("chunk_fail");
        let mock = MockChain::new();
        seed(&ledger, "A", LifecycleState::Discovered);
        mock.fail_reads(true);

        let outcome = LifecycleEngine::new(&mock, &ledger, false)
            .run()
            .await
            .unwrap();
        assert_eq!(outcome.chunk_failures, 1);
        assert_eq!(outcome.transitions, 0);
        assert_eq!(
            ledger.get_account("A").unwrap().unwrap().lifecycle_state,
            LifecycleState::Discovered
        );
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let ledger = temp_ledger("dry");
        let mock = MockChain::new();
        seed(&ledger, "A", LifecycleState::Discovered);
        mock.set_system_account("A", 5_000);

        let outcome = LifecycleEngine::new(&mock, &ledger, true)
            .run()
            .await
            .unwrap();
        assert_eq!(outcome.transitions, 1);
        let row = ledger.get_account("A").unwrap().unwrap();
        assert_eq!(row.lifecycle_state, LifecycleState::Discovered);
        assert!(row.lamports.is_none());
        assert_eq!(ledger.count_events(), 0);
    }
}
