//! kora-report
//!
//! Read-only timeline and metric aggregation over the ledger, for human
//! audit. Never writes; never touches the chain.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use kora_core::error::KoraRentError;
use kora_core::state::LifecycleState;
use kora_ledger::Ledger;

#[derive(Debug, Clone, Serialize)]
pub struct FailureLine {
    pub pubkey: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineEvent {
    pub id: u64,
    pub old_state: String,
    pub new_state: String,
    pub trigger_reason: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountTimeline {
    pub pubkey: String,
    pub current_state: String,
    pub lamports: Option<u64>,
    pub events: Vec<TimelineEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub network: String,
    pub generated_at: i64,
    pub accounts_total: u64,
    pub state_counts: BTreeMap<String, u64>,
    /// Decimal string; sums can exceed the double-precision safe range.
    pub total_lamports_reclaimed: String,
    pub reclaim_signatures: Vec<String>,
    pub failures: Vec<FailureLine>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeline: Option<AccountTimeline>,
}

/// Aggregate the ledger into a report; with `account`, include that
/// account's full event timeline.
pub fn build_report(
    ledger: &Ledger,
    network: &str,
    account: Option<&str>,
) -> Result<RunReport, KoraRentError> {
    let rows = ledger.scan_accounts()?;
    let mut state_counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut total: u128 = 0;
    let mut signatures = BTreeSet::new();
    let mut failures = Vec::new();

    for row in &rows {
        *state_counts
            .entry(row.lifecycle_state.as_str().to_string())
            .or_insert(0) += 1;
        match row.lifecycle_state {
            LifecycleState::Reclaimed => {
                if let Some(event) =
                    ledger.latest_event_into(&row.account_pubkey, LifecycleState::Reclaimed)?
                {
                    let evidence = event.evidence()?;
                    if let Some(amount) = evidence["amount"].as_u64() {
                        total += u128::from(amount);
                    }
                    if let Some(signature) = evidence["signature"].as_str() {
                        signatures.insert(signature.to_string());
                    }
                }
            }
            LifecycleState::Failed => {
                if let Some(event) =
                    ledger.latest_event_into(&row.account_pubkey, LifecycleState::Failed)?
                {
                    failures.push(FailureLine {
                        pubkey: row.account_pubkey.clone(),
                        reason: event.trigger_reason,
                    });
                }
            }
            _ => {}
        }
    }

    let timeline = match account {
        Some(pubkey) => {
            let row = ledger
                .get_account(pubkey)?
                .ok_or_else(|| KoraRentError::UnknownAccount(pubkey.to_string()))?;
            let events = ledger
                .events_for_account(pubkey)?
                .into_iter()
                .map(|e| TimelineEvent {
                    id: e.id,
                    old_state: e.old_state.as_str().to_string(),
                    new_state: e.new_state.as_str().to_string(),
                    trigger_reason: e.trigger_reason,
                    timestamp: e.timestamp,
                })
                .collect();
            Some(AccountTimeline {
                pubkey: pubkey.to_string(),
                current_state: row.lifecycle_state.as_str().to_string(),
                lamports: row.lamports,
                events,
            })
        }
        None => None,
    };

    Ok(RunReport {
        network: network.to_string(),
        generated_at: Utc::now().timestamp(),
        accounts_total: rows.len() as u64,
        state_counts,
        total_lamports_reclaimed: total.to_string(),
        reclaim_signatures: signatures.into_iter().collect(),
        failures,
        timeline,
    })
}

fn format_ts(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Human-readable rendering of a report.
pub fn render_text(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "kora-rent report — network {} — generated {}",
        report.network,
        format_ts(report.generated_at)
    );
    let _ = writeln!(out, "Accounts tracked: {}", report.accounts_total);
    for (state, count) in &report.state_counts {
        let _ = writeln!(out, "  {state:<12} {count}");
    }
    let _ = writeln!(
        out,
        "Reclaimed: {} lamports across {} transaction(s)",
        report.total_lamports_reclaimed,
        report.reclaim_signatures.len()
    );
    for signature in &report.reclaim_signatures {
        let _ = writeln!(out, "  {signature}");
    }
    if !report.failures.is_empty() {
        let _ = writeln!(out, "Failures:");
        for failure in &report.failures {
            let _ = writeln!(out, "  {}: {}", failure.pubkey, failure.reason);
        }
    }
    if let Some(timeline) = &report.timeline {
        let _ = writeln!(
            out,
            "Timeline for {} (current: {}, lamports: {}):",
            timeline.pubkey,
            timeline.current_state,
            timeline
                .lamports
                .map(|l| l.to_string())
                .unwrap_or_else(|| "unobserved".to_string())
        );
        for e in &timeline.events {
            let _ = writeln!(
                out,
                "  #{} {} {} -> {} ({})",
                e.id,
                format_ts(e.timestamp),
                e.old_state,
                e.new_state,
                e.trigger_reason
            );
        }
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use kora_core::account::SponsoredAccount;

    fn temp_ledger(name: &str) -> Ledger {
        let dir = std::env::temp_dir().join(format!("kora_report_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        Ledger::open(&dir).expect("open temp ledger")
    }

    fn seed(ledger: &Ledger, pubkey: &str, state: LifecycleState, lamports: u64) {
        let mut row = SponsoredAccount::discovered(
            pubkey.to_string(),
            format!("sig-{pubkey}"),
            7,
            "Operator".to_string(),
            1_700_000_000,
        );
        row.lifecycle_state = state;
        row.lamports = Some(lamports);
        row.data_len = Some(0);
        row.owner_program = Some(kora_core::constants::SYSTEM_PROGRAM_ID.to_string());
        ledger.put_account(&row).unwrap();
    }

    fn seeded(name: &str) -> Ledger {
        let ledger = temp_ledger(name);
        seed(&ledger, "A", LifecycleState::Active, 5_000_000);
        seed(&ledger, "B", LifecycleState::Reclaimable, 2_000_000);
        seed(&ledger, "C", LifecycleState::Reclaimable, 3_000_000);
        seed(&ledger, "D", LifecycleState::Reclaimable, 1_000);
        ledger
            .commit_reclaimed_batch(
                &[("B".to_string(), 2_000_000), ("C".to_string(), 3_000_000)],
                "tx_BC",
                5_000_000,
                1_700_000_100,
            )
            .unwrap();
        ledger
            .commit_failed_batch(&["D".to_string()], "blockhash expired", 1_700_000_101)
            .unwrap();
        ledger
    }

    #[test]
    fn aggregates_counts_totals_and_failures() {
        let ledger = seeded("aggregate");
        let report = build_report(&ledger, "devnet", None).unwrap();
        assert_eq!(report.accounts_total, 4);
        assert_eq!(report.state_counts["active"], 1);
        assert_eq!(report.state_counts["reclaimed"], 2);
        assert_eq!(report.state_counts["failed"], 1);
        assert_eq!(report.total_lamports_reclaimed, "5000000");
        // One batch signature, deduplicated across both accounts.
        assert_eq!(report.reclaim_signatures, vec!["tx_BC"]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].reason, "blockhash expired");
        assert!(report.timeline.is_none());
    }

    #[test]
    fn timeline_lists_an_accounts_events_in_order() {
        let ledger = seeded("timeline");
        let report = build_report(&ledger, "devnet", Some("B")).unwrap();
        let timeline = report.timeline.unwrap();
        assert_eq!(timeline.current_state, "reclaimed");
        assert_eq!(timeline.events.len(), 1);
        assert_eq!(timeline.events[0].old_state, "reclaimable");
        assert_eq!(timeline.events[0].new_state, "reclaimed");
    }

    #[test]
    fn unknown_account_is_an_error() {
        let ledger = seeded("unknown");
        assert!(matches!(
            build_report(&ledger, "devnet", Some("Nope")),
            Err(KoraRentError::UnknownAccount(_))
        ));
    }

    #[test]
    fn text_rendering_mentions_the_essentials() {
        let ledger = seeded("text");
        let report = build_report(&ledger, "devnet", Some("B")).unwrap();
        let text = render_text(&report);
        assert!(text.contains("network devnet"));
        assert!(text.contains("5000000 lamports"));
        assert!(text.contains("tx_BC"));
        assert!(text.contains("blockhash expired"));
        assert!(text.contains("Timeline for B"));
        assert!(text.contains("reclaimable -> reclaimed"));
    }

    #[test]
    fn json_shape_is_stable() {
        let ledger = seeded("json");
        let report = build_report(&ledger, "devnet", None).unwrap();
        let value = serde_json::to_value(&report).unwrap();
        assert!(value["state_counts"].is_object());
        assert_eq!(value["total_lamports_reclaimed"], "5000000");
        assert!(value.get("timeline").is_none());
    }
}
