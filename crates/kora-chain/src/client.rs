use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

use kora_core::error::KoraRentError;

use crate::types::{AccountKey, AccountSnapshot, InstructionInfo, ParsedTransaction, SignatureInfo};
use crate::{ChainReader, ChainSubmitter};

/// How long to wait for a submitted transaction to reach confirmed
/// commitment before giving up.
const CONFIRM_POLL_INTERVAL: Duration = Duration::from_secs(2);
const CONFIRM_POLL_ATTEMPTS: usize = 30;

/// JSON-RPC 2.0 client for the chain node.
///
/// Raw HTTP POST with serde_json rather than a full RPC framework: the
/// pipeline needs four methods and nothing else. Errors are surfaced, never
/// retried — the operator re-runs the stage.
pub struct RpcChainClient {
    url: String,
    client: reqwest::Client,
}

impl RpcChainClient {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Call a JSON-RPC method and return the `result` field.
    async fn call(&self, method: &str, params: Value) -> Result<Value, KoraRentError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });
        debug!(method, "rpc call");

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| KoraRentError::Rpc(format!("{method}: {e}")))?;

        let json: Value = resp
            .json()
            .await
            .map_err(|e| KoraRentError::Rpc(format!("{method}: parsing response: {e}")))?;

        if let Some(err) = json.get("error") {
            if !err.is_null() {
                return Err(KoraRentError::Rpc(format!("{method}: {err}")));
            }
        }
        Ok(json["result"].clone())
    }
}

fn field_str(v: &Value, field: &str, ctx: &str) -> Result<String, KoraRentError> {
    v[field]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| KoraRentError::Rpc(format!("{ctx}: missing {field}")))
}

fn field_u64(v: &Value, field: &str, ctx: &str) -> Result<u64, KoraRentError> {
    v[field]
        .as_u64()
        .ok_or_else(|| KoraRentError::Rpc(format!("{ctx}: missing {field}")))
}

fn parse_signature_info(v: &Value) -> Result<SignatureInfo, KoraRentError> {
    Ok(SignatureInfo {
        signature: field_str(v, "signature", "signature info")?,
        slot: field_u64(v, "slot", "signature info")?,
        err: match &v["err"] {
            Value::Null => None,
            other => Some(other.to_string()),
        },
    })
}

fn parse_transaction(v: &Value) -> Result<ParsedTransaction, KoraRentError> {
    let slot = field_u64(v, "slot", "transaction")?;
    let tx = &v["transaction"];
    let signatures = tx["signatures"]
        .as_array()
        .ok_or_else(|| KoraRentError::Rpc("transaction: missing signatures".into()))?
        .iter()
        .filter_map(|s| s.as_str().map(str::to_string))
        .collect();

    let message = &tx["message"];
    let mut account_keys = Vec::new();
    for key in message["accountKeys"]
        .as_array()
        .ok_or_else(|| KoraRentError::Rpc("transaction: missing accountKeys".into()))?
    {
        account_keys.push(AccountKey {
            pubkey: field_str(key, "pubkey", "account key")?,
            signer: key["signer"].as_bool().unwrap_or(false),
            writable: key["writable"].as_bool().unwrap_or(false),
        });
    }

    let mut instructions = Vec::new();
    for ix in message["instructions"].as_array().unwrap_or(&Vec::new()) {
        instructions.push(InstructionInfo {
            program: ix["program"].as_str().unwrap_or_default().to_string(),
            program_id: ix["programId"].as_str().unwrap_or_default().to_string(),
            parsed: match &ix["parsed"] {
                Value::Null => None,
                other => Some(other.clone()),
            },
        });
    }

    Ok(ParsedTransaction {
        slot,
        signatures,
        account_keys,
        instructions,
    })
}

fn parse_account(v: &Value) -> Result<AccountSnapshot, KoraRentError> {
    let data_len = match v["data"].as_array().and_then(|a| a.first()) {
        Some(Value::String(b64)) => BASE64
            .decode(b64)
            .map_err(|e| KoraRentError::Rpc(format!("account data base64: {e}")))?
            .len() as u64,
        _ => 0,
    };
    Ok(AccountSnapshot {
        lamports: field_u64(v, "lamports", "account")?,
        owner: field_str(v, "owner", "account")?,
        data_len,
        executable: v["executable"].as_bool().unwrap_or(false),
    })
}

#[async_trait]
impl ChainReader for RpcChainClient {
    async fn signatures_for_address(
        &self,
        address: &str,
        limit: usize,
        before: Option<&str>,
        until: Option<&str>,
    ) -> Result<Vec<SignatureInfo>, KoraRentError> {
        let mut opts = Map::new();
        opts.insert("limit".into(), json!(limit));
        if let Some(before) = before {
            opts.insert("before".into(), json!(before));
        }
        if let Some(until) = until {
            opts.insert("until".into(), json!(until));
        }
        let result = self
            .call(
                "getSignaturesForAddress",
                json!([address, Value::Object(opts)]),
            )
            .await?;
        result
            .as_array()
            .ok_or_else(|| KoraRentError::Rpc("getSignaturesForAddress: expected array".into()))?
            .iter()
            .map(parse_signature_info)
            .collect()
    }

    async fn transaction(
        &self,
        signature: &str,
    ) -> Result<Option<ParsedTransaction>, KoraRentError> {
        let result = self
            .call(
                "getTransaction",
                json!([
                    signature,
                    {"encoding": "jsonParsed", "maxSupportedTransactionVersion": 0}
                ]),
            )
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        Ok(Some(parse_transaction(&result)?))
    }

    async fn multiple_accounts(
        &self,
        addresses: &[String],
    ) -> Result<Vec<Option<AccountSnapshot>>, KoraRentError> {
        let result = self
            .call(
                "getMultipleAccounts",
                json!([addresses, {"encoding": "base64"}]),
            )
            .await?;
        result["value"]
            .as_array()
            .ok_or_else(|| KoraRentError::Rpc("getMultipleAccounts: expected value array".into()))?
            .iter()
            .map(|entry| match entry {
                Value::Null => Ok(None),
                other => Ok(Some(parse_account(other)?)),
            })
            .collect()
    }
}

#[async_trait]
impl ChainSubmitter for RpcChainClient {
    async fn latest_blockhash(&self) -> Result<String, KoraRentError> {
        let result = self.call("getLatestBlockhash", json!([])).await?;
        field_str(&result["value"], "blockhash", "getLatestBlockhash")
    }

    async fn submit_and_confirm(&self, wire_base64: &str) -> Result<String, KoraRentError> {
        let result = self
            .call(
                "sendTransaction",
                json!([
                    wire_base64,
                    {"encoding": "base64", "preflightCommitment": "confirmed"}
                ]),
            )
            .await
            .map_err(|e| KoraRentError::Submit(e.to_string()))?;
        let signature = result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| KoraRentError::Submit("sendTransaction: expected signature".into()))?;

        for _ in 0..CONFIRM_POLL_ATTEMPTS {
            tokio::time::sleep(CONFIRM_POLL_INTERVAL).await;
            let statuses = self
                .call("getSignatureStatuses", json!([[signature]]))
                .await
                .map_err(|e| KoraRentError::Submit(e.to_string()))?;
            let status = &statuses["value"][0];
            if status.is_null() {
                continue;
            }
            if !status["err"].is_null() {
                return Err(KoraRentError::Submit(format!(
                    "{signature} failed on chain: {}",
                    status["err"]
                )));
            }
            if matches!(
                status["confirmationStatus"].as_str(),
                Some("confirmed") | Some("finalized")
            ) {
                return Ok(signature);
            }
        }
        Err(KoraRentError::Submit(format!(
            "{signature}: confirmation timed out"
        )))
    }
}
