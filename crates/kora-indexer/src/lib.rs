//! kora-indexer
//!
//! Discovery stage: walks the operator's transaction history backwards,
//! extracts system-program `createAccount` instructions the operator paid
//! for, and idempotently inserts the created accounts into the ledger.
//!
//! The resume cursor is the newest signature seen on a prior completed run.
//! Pages stop at it (`until` semantics), and it is written at most once per
//! run — to the newest signature of the first fetched page, and only when no
//! cursor existed before. The next run therefore re-reads the partially
//! processed leading page rather than risking a gap; re-inserts are no-ops.

use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use kora_chain::types::ParsedTransaction;
use kora_chain::ChainReader;
use kora_core::constants::{SIGNATURE_FETCH_DELAY_MS, SIGNATURE_PAGE_LIMIT};
use kora_core::error::KoraRentError;
use kora_core::types::Pubkey;
use kora_ledger::Ledger;

pub struct Indexer<'a, C: ChainReader> {
    chain: &'a C,
    ledger: &'a Ledger,
    operator: Pubkey,
    dry_run: bool,
}

/// What a discovery run did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct IndexOutcome {
    pub pages: usize,
    pub signatures_seen: usize,
    pub discovered: usize,
    pub cursor_advanced: bool,
}

/// An account creation extracted from one transaction.
#[derive(Debug, PartialEq, Eq)]
pub struct DiscoveredCreation {
    pub account_pubkey: String,
    pub creation_signature: String,
    pub slot: u64,
}

impl<'a, C: ChainReader> Indexer<'a, C> {
    pub fn new(chain: &'a C, ledger: &'a Ledger, operator: Pubkey, dry_run: bool) -> Self {
        Self {
            chain,
            ledger,
            operator,
            dry_run,
        }
    }

    /// Run discovery to completion. Any page-level RPC failure stops the
    /// run and leaves the cursor untouched; per-signature fetch failures are
    /// logged and skipped.
    pub async fn run(&self) -> Result<IndexOutcome, KoraRentError> {
        let operator = self.operator.to_b58();
        let resume = self.ledger.discovery_cursor()?;
        info!(
            operator = %operator,
            cursor = resume.as_deref().unwrap_or("<none>"),
            dry_run = self.dry_run,
            "discovery starting"
        );

        let mut outcome = IndexOutcome::default();
        let mut before: Option<String> = None;
        let mut newest_seen: Option<String> = None;
        let mut first_fetch = true;

        loop {
            let page = self
                .chain
                .signatures_for_address(
                    &operator,
                    SIGNATURE_PAGE_LIMIT,
                    before.as_deref(),
                    resume.as_deref(),
                )
                .await?;
            if page.is_empty() {
                break;
            }
            outcome.pages += 1;
            if newest_seen.is_none() {
                newest_seen = Some(page[0].signature.clone());
            }

            for entry in &page {
                outcome.signatures_seen += 1;
                if entry.err.is_some() {
                    debug!(signature = %entry.signature, "skipping failed transaction");
                    continue;
                }
                if !first_fetch {
                    sleep(Duration::from_millis(SIGNATURE_FETCH_DELAY_MS)).await;
                }
                first_fetch = false;

                match self.chain.transaction(&entry.signature).await {
                    Ok(Some(tx)) => {
                        for creation in parse_creations(&tx, &operator) {
                            if self.dry_run {
                                info!(
                                    account = %creation.account_pubkey,
                                    signature = %creation.creation_signature,
                                    "dry-run: would insert sponsored account"
                                );
                                outcome.discovered += 1;
                                continue;
                            }
                            let inserted = self.ledger.insert_discovered(
                                &creation.account_pubkey,
                                &creation.creation_signature,
                                creation.slot,
                                &operator,
                            )?;
                            if inserted {
                                outcome.discovered += 1;
                                self.ledger.audit(
                                    "indexer",
                                    "info",
                                    &format!("discovered {}", creation.account_pubkey),
                                );
                            }
                        }
                    }
                    Ok(None) => {
                        warn!(signature = %entry.signature, "transaction not found, skipping")
                    }
                    Err(e) => {
                        warn!(signature = %entry.signature, error = %e, "transaction fetch failed, skipping")
                    }
                }
            }

            if page.len() < SIGNATURE_PAGE_LIMIT {
                break;
            }
            before = page.last().map(|entry| entry.signature.clone());
        }

        // The cursor moves at most once per run, and only on first ever
        // completion; later runs keep re-reading the leading page.
        if resume.is_none() && !self.dry_run {
            if let Some(newest) = &newest_seen {
                self.ledger.set_discovery_cursor(newest)?;
                outcome.cursor_advanced = true;
            }
        }

        info!(
            pages = outcome.pages,
            signatures = outcome.signatures_seen,
            discovered = outcome.discovered,
            "discovery finished"
        );
        Ok(outcome)
    }
}

/// Extract account creations the operator paid for.
///
/// The operator must be the fee payer (first signer), and only system
/// program `createAccount` instructions whose funding `source` is the
/// operator count. A transaction that creates and closes an account in the
/// same slot still discovers the creation; lifecycle observes the closure.
pub fn parse_creations(tx: &ParsedTransaction, operator: &str) -> Vec<DiscoveredCreation> {
    if tx.fee_payer() != Some(operator) {
        return Vec::new();
    }
    let Some(signature) = tx.signatures.first() else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for ix in &tx.instructions {
        if ix.program != "system" {
            continue;
        }
        let Some(parsed) = &ix.parsed else { continue };
        if parsed["type"].as_str() != Some("createAccount") {
            continue;
        }
        let info = &parsed["info"];
        if info["source"].as_str() != Some(operator) {
            continue;
        }
        let Some(new_account) = info["newAccount"].as_str() else {
            continue;
        };
        out.push(DiscoveredCreation {
            account_pubkey: new_account.to_string(),
            creation_signature: signature.clone(),
            slot: tx.slot,
        });
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use kora_chain::types::{AccountKey, InstructionInfo};
    use kora_chain::MockChain;
    use serde_json::json;

    fn temp_ledger(name: &str) -> Ledger {
        let dir = std::env::temp_dir().join(format!("kora_indexer_test_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        Ledger::open(&dir).expect("open temp ledger")
    }

    fn operator() -> Pubkey {
        Pubkey::from_bytes([42u8; 32])
    }

    #[tokio::test]
    async fn discovers_operator_creations() {
        let ledger = temp_ledger("discovers");
        let mock = MockChain::new();
        let op = operator();
        mock.push_creation("sig1", 10, &op.to_b58(), "AcctOne");
        mock.push_creation("sig2", 11, &op.to_b58(), "AcctTwo");

        let outcome = Indexer::new(&mock, &ledger, op, false).run().await.unwrap();
        assert_eq!(outcome.discovered, 2);
        assert!(outcome.cursor_advanced);
        assert_eq!(ledger.count_accounts(), 2);
        let row = ledger.get_account("AcctOne").unwrap().unwrap();
        assert_eq!(row.creation_signature, "sig1");
        assert_eq!(row.slot, 10);
        // Newest signature of the first page.
        assert_eq!(ledger.discovery_cursor().unwrap().unwrap(), "sig2");
    }

    #[tokio::test]
    async fn rerun_inserts_nothing_and_keeps_cursor() {
        let ledger = temp_ledger("rerun");
        let mock = MockChain::new();
        let op = operator();
        mock.push_creation("sig1", 10, &op.to_b58(), "AcctOne");

        let first = Indexer::new(&mock, &ledger, op.clone(), false)
            .run()
            .await
            .unwrap();
        assert_eq!(first.discovered, 1);

        let second = Indexer::new(&mock, &ledger, op, false).run().await.unwrap();
        assert_eq!(second.discovered, 0);
        assert!(!second.cursor_advanced);
        assert_eq!(ledger.discovery_cursor().unwrap().unwrap(), "sig1");
    }

    #[tokio::test]
    async fn existing_cursor_is_never_moved() {
        let ledger = temp_ledger("cursor_fixed");
        let mock = MockChain::new();
        let op = operator();
        mock.push_creation("old", 5, &op.to_b58(), "AcctOld");
        Indexer::new(&mock, &ledger, op.clone(), false)
            .run()
            .await
            .unwrap();
        assert_eq!(ledger.discovery_cursor().unwrap().unwrap(), "old");

        // New activity lands after the first completed run.
        mock.push_creation("new", 6, &op.to_b58(), "AcctNew");
        let outcome = Indexer::new(&mock, &ledger, op, false).run().await.unwrap();
        assert_eq!(outcome.discovered, 1);
        assert!(!outcome.cursor_advanced);
        assert_eq!(ledger.discovery_cursor().unwrap().unwrap(), "old");
        assert!(ledger.get_account("AcctNew").unwrap().is_some());
    }

    #[tokio::test]
    async fn foreign_fee_payer_is_ignored() {
        let ledger = temp_ledger("foreign");
        let mock = MockChain::new();
        let op = operator();
        mock.push_creation("sig1", 10, "SomeoneElse", "AcctOne");
        let outcome = Indexer::new(&mock, &ledger, op, false).run().await.unwrap();
        assert_eq!(outcome.discovered, 0);
        assert_eq!(ledger.count_accounts(), 0);
    }

    #[tokio::test]
    async fn dry_run_touches_nothing() {
        let ledger = temp_ledger("dry");
        let mock = MockChain::new();
        let op = operator();
        mock.push_creation("sig1", 10, &op.to_b58(), "AcctOne");
        let outcome = Indexer::new(&mock, &ledger, op, true).run().await.unwrap();
        assert_eq!(outcome.discovered, 1);
        assert!(!outcome.cursor_advanced);
        assert_eq!(ledger.count_accounts(), 0);
        assert!(ledger.discovery_cursor().unwrap().is_none());
    }

    #[tokio::test]
    async fn page_failure_surfaces_and_preserves_cursor() {
        let ledger = temp_ledger("page_fail");
        let mock = MockChain::new();
        let op = operator();
        mock.push_creation("sig1", 10, &op.to_b58(), "AcctOne");
        mock.fail_reads(true);
        let err = Indexer::new(&mock, &ledger, op, false).run().await.unwrap_err();
        assert!(matches!(err, KoraRentError::Rpc(_)));
        assert!(ledger.discovery_cursor().unwrap().is_none());
        assert_eq!(ledger.count_accounts(), 0);
    }

    #[test]
    fn parse_requires_source_to_be_operator() {
        let op = operator().to_b58();
        let tx = ParsedTransaction {
            slot: 3,
            signatures: vec!["sig".into()],
            account_keys: vec![AccountKey {
                pubkey: op.clone(),
                signer: true,
                writable: true,
            }],
            instructions: vec![InstructionInfo {
                program: "system".into(),
                program_id: kora_core::constants::SYSTEM_PROGRAM_ID.into(),
                parsed: Some(json!({
                    "type": "createAccount",
                    "info": {"source": "NotTheOperator", "newAccount": "X"}
                })),
            }],
        };
        assert!(parse_creations(&tx, &op).is_empty());
    }

    #[test]
    fn parse_extracts_every_matching_instruction() {
        let op = operator().to_b58();
        let creation = |acct: &str| InstructionInfo {
            program: "system".into(),
            program_id: kora_core::constants::SYSTEM_PROGRAM_ID.into(),
            parsed: Some(json!({
                "type": "createAccount",
                "info": {"source": op.clone(), "newAccount": acct}
            })),
        };
        let tx = ParsedTransaction {
            slot: 3,
            signatures: vec!["sig".into()],
            account_keys: vec![AccountKey {
                pubkey: op.clone(),
                signer: true,
                writable: true,
            }],
            instructions: vec![
                creation("X"),
                InstructionInfo {
                    program: "system".into(),
                    program_id: kora_core::constants::SYSTEM_PROGRAM_ID.into(),
                    parsed: Some(json!({"type": "transfer", "info": {}})),
                },
                creation("Y"),
            ],
        };
        let found = parse_creations(&tx, &op);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].account_pubkey, "X");
        assert_eq!(found[1].account_pubkey, "Y");
        assert_eq!(found[0].creation_signature, "sig");
    }
}
