//! In-memory chain double for tests: deterministic, no network, same
//! interfaces as the RPC client. Kept in the library (not behind cfg(test))
//! so downstream crates can drive whole-pipeline tests against it.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;

use kora_core::constants::SYSTEM_PROGRAM_ID;
use kora_core::error::KoraRentError;

use crate::types::{AccountKey, AccountSnapshot, InstructionInfo, ParsedTransaction, SignatureInfo};
use crate::{ChainReader, ChainSubmitter};

#[derive(Default)]
struct MockState {
    /// Live accounts by pubkey. Absent key == absent on chain.
    accounts: HashMap<String, AccountSnapshot>,
    /// Operator history, newest first, mirroring the RPC ordering.
    history: Vec<(SignatureInfo, ParsedTransaction)>,
    /// Wire transactions accepted by submit_and_confirm.
    submitted: Vec<String>,
    fail_submit: Option<String>,
    fail_reads: bool,
    blockhash: String,
}

/// See module docs. All mutators take `&self`; the state sits behind a
/// mutex so tests can share one mock across concurrent workers.
pub struct MockChain {
    state: Mutex<MockState>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    pub fn new() -> Self {
        let mut state = MockState::default();
        state.blockhash = bs58::encode([7u8; 32]).into_string();
        Self {
            state: Mutex::new(state),
        }
    }

    /// Create or replace a live account.
    pub fn set_account(&self, pubkey: &str, lamports: u64, owner: &str, data_len: u64) {
        self.state.lock().unwrap().accounts.insert(
            pubkey.to_string(),
            AccountSnapshot {
                lamports,
                owner: owner.to_string(),
                data_len,
                executable: false,
            },
        );
    }

    /// A plain system-owned, data-less account.
    pub fn set_system_account(&self, pubkey: &str, lamports: u64) {
        self.set_account(pubkey, lamports, SYSTEM_PROGRAM_ID, 0);
    }

    pub fn remove_account(&self, pubkey: &str) {
        self.state.lock().unwrap().accounts.remove(pubkey);
    }

    /// Prepend a createAccount transaction to the operator history
    /// (newest first, so push creations oldest-to-newest).
    pub fn push_creation(&self, signature: &str, slot: u64, operator: &str, new_account: &str) {
        let tx = ParsedTransaction {
            slot,
            signatures: vec![signature.to_string()],
            account_keys: vec![
                AccountKey {
                    pubkey: operator.to_string(),
                    signer: true,
                    writable: true,
                },
                AccountKey {
                    pubkey: new_account.to_string(),
                    signer: true,
                    writable: true,
                },
            ],
            instructions: vec![InstructionInfo {
                program: "system".to_string(),
                program_id: SYSTEM_PROGRAM_ID.to_string(),
                parsed: Some(json!({
                    "type": "createAccount",
                    "info": {
                        "source": operator,
                        "newAccount": new_account,
                        "lamports": 890_880u64,
                        "space": 0,
                        "owner": SYSTEM_PROGRAM_ID,
                    }
                })),
            }],
        };
        let info = SignatureInfo {
            signature: signature.to_string(),
            slot,
            err: None,
        };
        self.state.lock().unwrap().history.insert(0, (info, tx));
    }

    /// Prepend an arbitrary transaction to the history.
    pub fn push_transaction(&self, info: SignatureInfo, tx: ParsedTransaction) {
        self.state.lock().unwrap().history.insert(0, (info, tx));
    }

    /// Make every submit fail with `message`.
    pub fn fail_submissions(&self, message: &str) {
        self.state.lock().unwrap().fail_submit = Some(message.to_string());
    }

    /// Make every read call fail, emulating an unreachable node.
    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_reads = fail;
    }

    /// Wire transactions accepted so far.
    pub fn submitted(&self) -> Vec<String> {
        self.state.lock().unwrap().submitted.clone()
    }
}

#[async_trait]
impl ChainReader for MockChain {
    async fn signatures_for_address(
        &self,
        _address: &str,
        limit: usize,
        before: Option<&str>,
        until: Option<&str>,
    ) -> Result<Vec<SignatureInfo>, KoraRentError> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(KoraRentError::Rpc("mock: reads disabled".into()));
        }
        let mut skipping = before.is_some();
        let mut out = Vec::new();
        for (info, _) in &state.history {
            if skipping {
                if Some(info.signature.as_str()) == before {
                    skipping = false;
                }
                continue;
            }
            if Some(info.signature.as_str()) == until {
                break;
            }
            out.push(info.clone());
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    async fn transaction(
        &self,
        signature: &str,
    ) -> Result<Option<ParsedTransaction>, KoraRentError> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(KoraRentError::Rpc("mock: reads disabled".into()));
        }
        Ok(state
            .history
            .iter()
            .find(|(info, _)| info.signature == signature)
            .map(|(_, tx)| tx.clone()))
    }

    async fn multiple_accounts(
        &self,
        addresses: &[String],
    ) -> Result<Vec<Option<AccountSnapshot>>, KoraRentError> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(KoraRentError::Rpc("mock: reads disabled".into()));
        }
        Ok(addresses
            .iter()
            .map(|a| state.accounts.get(a).cloned())
            .collect())
    }
}

#[async_trait]
impl ChainSubmitter for MockChain {
    async fn latest_blockhash(&self) -> Result<String, KoraRentError> {
        Ok(self.state.lock().unwrap().blockhash.clone())
    }

    async fn submit_and_confirm(&self, wire_base64: &str) -> Result<String, KoraRentError> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.fail_submit {
            return Err(KoraRentError::Submit(message.clone()));
        }
        let wire = BASE64
            .decode(wire_base64)
            .map_err(|e| KoraRentError::Submit(format!("wire base64: {e}")))?;
        if wire.len() < 65 || wire[0] != 1 {
            return Err(KoraRentError::Submit("malformed wire transaction".into()));
        }
        let signature = bs58::encode(&wire[1..65]).into_string();
        state.submitted.push(wire_base64.to_string());
        Ok(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pagination_respects_before_and_until() {
        let mock = MockChain::new();
        // Oldest-to-newest pushes; history ends newest first: s3, s2, s1.
        mock.push_creation("s1", 1, "Op", "A1");
        mock.push_creation("s2", 2, "Op", "A2");
        mock.push_creation("s3", 3, "Op", "A3");

        let page = mock
            .signatures_for_address("Op", 10, None, None)
            .await
            .unwrap();
        let sigs: Vec<&str> = page.iter().map(|s| s.signature.as_str()).collect();
        assert_eq!(sigs, vec!["s3", "s2", "s1"]);

        let page = mock
            .signatures_for_address("Op", 10, Some("s3"), Some("s1"))
            .await
            .unwrap();
        let sigs: Vec<&str> = page.iter().map(|s| s.signature.as_str()).collect();
        assert_eq!(sigs, vec!["s2"]);
    }

    #[tokio::test]
    async fn multiple_accounts_reports_absence() {
        let mock = MockChain::new();
        mock.set_system_account("A", 5);
        let result = mock
            .multiple_accounts(&["A".to_string(), "B".to_string()])
            .await
            .unwrap();
        assert!(result[0].is_some());
        assert!(result[1].is_none());
    }
}
