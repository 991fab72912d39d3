//! kora-policy
//!
//! Pure decision function over ledger rows; never touches the chain. Rules
//! run in a fixed order and the first match assigns the new state, so for a
//! fixed ledger snapshot and configuration the outcome is the same on every
//! run. Rows are evaluated in `account_pubkey` ascending order.
//!
//! Only non-terminal, unlocked rows are evaluated; terminal outcomes
//! (`protected`, `dust`, `reclaimed`, `failed`, `closed_zero`) and rows a
//! reclaimer currently owns are left alone.

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info};

use kora_core::config::{EffectiveConfig, Whitelist};
use kora_core::constants::SYSTEM_PROGRAM_ID;
use kora_core::error::KoraRentError;
use kora_core::state::LifecycleState;
use kora_core::SponsoredAccount;
use kora_ledger::{Ledger, Transition};

const SECONDS_PER_DAY: i64 = 86_400;

pub struct PolicyEngine<'a> {
    ledger: &'a Ledger,
    config: &'a EffectiveConfig,
    whitelist: &'a Whitelist,
    dry_run: bool,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PolicyOutcome {
    pub evaluated: usize,
    pub transitions: usize,
    pub protected: usize,
    pub skipped: usize,
    pub dust: usize,
    pub reclaimable: usize,
    /// Rows deferred by the age gate: no transition, re-evaluated next run.
    pub deferred: usize,
}

/// What one rule pass decided for a row.
#[derive(Debug, PartialEq, Eq)]
pub enum Verdict {
    Assign(LifecycleState, &'static str),
    /// Age gate: leave the row as it is.
    Defer,
}

impl<'a> PolicyEngine<'a> {
    pub fn new(
        ledger: &'a Ledger,
        config: &'a EffectiveConfig,
        whitelist: &'a Whitelist,
        dry_run: bool,
    ) -> Self {
        Self {
            ledger,
            config,
            whitelist,
            dry_run,
        }
    }

    pub fn evaluate(&self) -> Result<PolicyOutcome, KoraRentError> {
        let now = Utc::now().timestamp();
        let mut outcome = PolicyOutcome::default();

        for row in self.ledger.scan_accounts()? {
            if !row.lifecycle_state.is_policy_eligible() || row.processing_lock.is_some() {
                continue;
            }
            outcome.evaluated += 1;

            let verdict = decide(&row, self.config, self.whitelist, now);
            let (new_state, reason) = match verdict {
                Verdict::Defer => {
                    outcome.deferred += 1;
                    debug!(pubkey = %row.account_pubkey, "age gate: deferred");
                    continue;
                }
                Verdict::Assign(state, reason) => (state, reason),
            };

            match new_state {
                LifecycleState::Protected => outcome.protected += 1,
                LifecycleState::Skipped => outcome.skipped += 1,
                LifecycleState::Dust => outcome.dust += 1,
                LifecycleState::Reclaimable => outcome.reclaimable += 1,
                _ => {}
            }

            if new_state == row.lifecycle_state {
                continue;
            }
            outcome.transitions += 1;
            if self.dry_run {
                info!(pubkey = %row.account_pubkey, from = %row.lifecycle_state, to = %new_state, reason, "dry-run: would transition");
                continue;
            }

            let evidence = self.evidence(reason);
            let old_state = row.lifecycle_state;
            let mut updated = row;
            updated.lifecycle_state = new_state;
            let pubkey = updated.account_pubkey.clone();
            self.ledger.apply_transition(Transition {
                updated,
                expected_state: old_state,
                trigger_reason: reason,
                evidence: &evidence,
                timestamp: now,
            })?;
            self.ledger
                .audit("policy", "info", &format!("{pubkey}: {old_state} -> {new_state} ({reason})"));
        }

        info!(
            evaluated = outcome.evaluated,
            transitions = outcome.transitions,
            reclaimable = outcome.reclaimable,
            "policy evaluation finished"
        );
        Ok(outcome)
    }

    /// Transition evidence carries the full configuration in force.
    fn evidence(&self, reason: &str) -> Value {
        json!({
            "min_lamports": self.config.min_lamports,
            "min_age_days": self.config.min_age_days,
            "batch_size": self.config.batch_size,
            "whitelist_hash": self.config.whitelist_hash,
            "rule": reason,
        })
    }
}

/// The rule table. First match wins; order is part of the contract.
pub fn decide(
    row: &SponsoredAccount,
    config: &EffectiveConfig,
    whitelist: &Whitelist,
    now: i64,
) -> Verdict {
    if whitelist.contains(&row.account_pubkey) {
        return Verdict::Assign(LifecycleState::Protected, "Whitelisted");
    }
    let (Some(lamports), Some(owner)) = (row.lamports, row.owner_program.as_deref()) else {
        return Verdict::Assign(LifecycleState::Skipped, "Missing lifecycle data");
    };
    if owner != SYSTEM_PROGRAM_ID {
        return Verdict::Assign(LifecycleState::Skipped, "Owner mismatch");
    }
    if row.data_len.unwrap_or(0) > 0 {
        return Verdict::Assign(LifecycleState::Skipped, "Has data");
    }
    if lamports < config.min_lamports {
        return Verdict::Assign(LifecycleState::Dust, "Below dust floor");
    }
    if lamports == 0 {
        return Verdict::Assign(LifecycleState::Skipped, "Zero balance");
    }
    if config.min_age_days > 0 {
        if let Some(checked) = row.last_lifecycle_check {
            if now - checked < config.min_age_days * SECONDS_PER_DAY {
                return Verdict::Defer;
            }
        }
    }
    Verdict::Assign(LifecycleState::Reclaimable, "Passes all rules")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
