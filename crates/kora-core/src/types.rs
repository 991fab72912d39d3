use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::KoraRentError;

/// Balance in lamports, the chain's smallest indivisible unit.
pub type Lamports = u64;

/// Monotonic chain position.
pub type Slot = u64;

/// Unix timestamp (seconds, UTC).
pub type Timestamp = i64;

/// Ledger-assigned serial number of a lifecycle event.
pub type EventId = u64;

// ── Pubkey ───────────────────────────────────────────────────────────────────

/// 32-byte chain address, rendered as a base58 string.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pubkey(pub [u8; 32]);

impl Pubkey {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Base58 encoded string representation.
    pub fn to_b58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }

    pub fn from_b58(s: &str) -> Result<Self, KoraRentError> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| KoraRentError::InvalidPubkey(format!("{s}: {e}")))?;
        if bytes.len() != 32 {
            return Err(KoraRentError::InvalidPubkey(format!(
                "{s}: decoded to {} bytes, expected 32",
                bytes.len()
            )));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_b58())
    }
}

impl fmt::Debug for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pubkey({})", &self.to_b58())
    }
}
