use serde_json::Value;

/// One entry from a signatures-for-address page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureInfo {
    pub signature: String,
    pub slot: u64,
    /// Present when the transaction failed on chain.
    pub err: Option<String>,
}

/// An account key referenced by a transaction message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountKey {
    pub pubkey: String,
    pub signer: bool,
    pub writable: bool,
}

/// A parsed instruction. `parsed` is the RPC's decoded form for built-in
/// programs (`{"type": "createAccount", "info": {...}}` for the system
/// program); None for programs the RPC cannot decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstructionInfo {
    pub program: String,
    pub program_id: String,
    pub parsed: Option<Value>,
}

/// A transaction in the RPC's jsonParsed encoding, reduced to the fields
/// discovery needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTransaction {
    pub slot: u64,
    pub signatures: Vec<String>,
    pub account_keys: Vec<AccountKey>,
    pub instructions: Vec<InstructionInfo>,
}

impl ParsedTransaction {
    /// The fee payer is by definition the first signer.
    pub fn fee_payer(&self) -> Option<&str> {
        self.account_keys
            .first()
            .filter(|k| k.signer)
            .map(|k| k.pubkey.as_str())
    }
}

/// Point-in-time account observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub lamports: u64,
    pub owner: String,
    pub data_len: u64,
    pub executable: bool,
}
