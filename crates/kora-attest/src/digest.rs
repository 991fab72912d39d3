use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use kora_core::error::KoraRentError;
use kora_core::state::LifecycleState;
use kora_ledger::Ledger;

/// One failed account in the digest, sorted by pubkey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub pubkey: String,
    pub reason: String,
}

/// The execution outcome the attestation binds: every account's final state,
/// the reclaimed total, and the chain signatures that moved funds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResultDigest {
    pub evaluated_count: u64,
    /// pubkey → final lifecycle state, in its canonical string form.
    pub accounts: BTreeMap<String, String>,
    /// Decimal string: the sum can exceed the double-precision safe range.
    pub total_lamports_reclaimed: String,
    /// Ascending, deduplicated.
    pub transaction_signatures: Vec<String>,
    pub failures: Vec<FailureRecord>,
}

/// Build the digest from the ledger. Reclaimed amounts come from each
/// account's most recent RECLAIMED event (the per-account `amount` recorded
/// at commit time); failure reasons from the most recent FAILED event.
pub fn build_result_digest(ledger: &Ledger) -> Result<ExecutionResultDigest, KoraRentError> {
    let rows = ledger.scan_accounts()?;
    let mut accounts = BTreeMap::new();
    let mut total: u128 = 0;
    let mut signatures = BTreeSet::new();
    let mut failures = Vec::new();

    for row in &rows {
        accounts.insert(
            row.account_pubkey.clone(),
            row.lifecycle_state.as_str().to_string(),
        );
        match row.lifecycle_state {
            LifecycleState::Reclaimed => {
                let event = ledger
                    .latest_event_into(&row.account_pubkey, LifecycleState::Reclaimed)?
                    .ok_or_else(|| {
                        KoraRentError::LedgerIntegrity(format!(
                            "{} is reclaimed but has no reclaimed event",
                            row.account_pubkey
                        ))
                    })?;
                let evidence = event.evidence()?;
                let amount = evidence_amount(&evidence["amount"]).ok_or_else(|| {
                    KoraRentError::LedgerIntegrity(format!(
                        "reclaimed event {} has no usable amount",
                        event.id
                    ))
                })?;
                total += amount;
                if let Some(signature) = evidence["signature"].as_str() {
                    signatures.insert(signature.to_string());
                }
            }
            LifecycleState::Failed => {
                let event = ledger
                    .latest_event_into(&row.account_pubkey, LifecycleState::Failed)?
                    .ok_or_else(|| {
                        KoraRentError::LedgerIntegrity(format!(
                            "{} is failed but has no failed event",
                            row.account_pubkey
                        ))
                    })?;
                failures.push(FailureRecord {
                    pubkey: row.account_pubkey.clone(),
                    reason: event.trigger_reason,
                });
            }
            _ => {}
        }
    }

    Ok(ExecutionResultDigest {
        evaluated_count: rows.len() as u64,
        accounts,
        total_lamports_reclaimed: total.to_string(),
        transaction_signatures: signatures.into_iter().collect(),
        failures,
    })
}

/// Evidence amounts are numbers today; tolerate the decimal-string form the
/// canonicalizer uses beyond 2^53.
fn evidence_amount(v: &Value) -> Option<u128> {
    v.as_u64()
        .map(u128::from)
        .or_else(|| v.as_str()?.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn amount_accepts_number_and_decimal_string() {
        assert_eq!(evidence_amount(&json!(42)), Some(42));
        assert_eq!(
            evidence_amount(&json!("9007199254740993")),
            Some(9_007_199_254_740_993)
        );
        assert_eq!(evidence_amount(&json!(null)), None);
        assert_eq!(evidence_amount(&json!("nope")), None);
    }
}
