use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::KoraRentError;
use crate::types::Pubkey;

// ── Network ──────────────────────────────────────────────────────────────────

/// Target cluster. One ledger database file per network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Devnet,
    Mainnet,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Devnet => "devnet",
            Network::Mainnet => "mainnet",
        }
    }

    /// Ledger database directory name for this network.
    pub fn db_file_name(&self) -> String {
        format!("kora-rent-{}.db", self.as_str())
    }

    pub fn db_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(self.db_file_name())
    }

    pub fn default_rpc_url(&self) -> &'static str {
        match self {
            Network::Devnet => "https://api.devnet.solana.com",
            Network::Mainnet => "https://api.mainnet-beta.solana.com",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = KoraRentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "devnet" => Ok(Network::Devnet),
            "mainnet" => Ok(Network::Mainnet),
            other => Err(KoraRentError::Io(format!(
                "unknown network {other:?} (expected devnet or mainnet)"
            ))),
        }
    }
}

// ── Whitelist ────────────────────────────────────────────────────────────────

/// Operator-protected addresses. Loaded from a UTF-8 file with one base58
/// address per line; blank lines and `#` comments are ignored.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    entries: BTreeSet<String>,
}

impl Whitelist {
    pub fn load(path: &Path) -> Result<Self, KoraRentError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| KoraRentError::Io(format!("reading whitelist {}: {e}", path.display())))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, KoraRentError> {
        let mut entries = BTreeSet::new();
        for (i, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            Pubkey::from_b58(line).map_err(|e| KoraRentError::InvalidWhitelist {
                line: i + 1,
                reason: e.to_string(),
            })?;
            entries.insert(line.to_string());
        }
        Ok(Self { entries })
    }

    pub fn contains(&self, pubkey: &str) -> bool {
        self.entries.contains(pubkey)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// SHA-256 over the sorted entries joined with `\n`, lowercase hex.
    /// None for an empty whitelist.
    pub fn hash_hex(&self) -> Option<String> {
        if self.entries.is_empty() {
            return None;
        }
        let joined = self.entries.iter().cloned().collect::<Vec<_>>().join("\n");
        let digest = Sha256::digest(joined.as_bytes());
        Some(hex::encode(digest))
    }
}

// ── Effective configuration ──────────────────────────────────────────────────

/// The policy knobs in force for a run. Embedded verbatim in the attestation
/// manifest, so the field set here is part of the attested format.
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    /// Balances below this are dust.
    pub min_lamports: u64,
    /// Minimum days since the last lifecycle observation before an account
    /// may be marked reclaimable. Zero disables the age gate.
    pub min_age_days: i64,
    /// Rows claimed per reclaimer fetch-and-lock round.
    pub batch_size: usize,
    /// Hash of the whitelist in force, if any.
    pub whitelist_hash: Option<String>,
}

impl EffectiveConfig {
    pub fn manifest_value(&self) -> Value {
        json!({
            "min_lamports": self.min_lamports,
            "min_age_days": self.min_age_days,
            "batch_size": self.batch_size,
            "whitelist_hash": self.whitelist_hash,
        })
    }
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            min_lamports: 1_000,
            min_age_days: 0,
            batch_size: crate::constants::DEFAULT_LOCK_BATCH,
            whitelist_hash: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitelist_skips_blanks_and_comments() {
        let a = Pubkey::from_bytes([1u8; 32]).to_b58();
        let b = Pubkey::from_bytes([2u8; 32]).to_b58();
        let text = format!("\n# protected ops accounts\n{a}\n\n{b}\n");
        let wl = Whitelist::parse(&text).unwrap();
        assert_eq!(wl.len(), 2);
        assert!(wl.contains(&a));
        assert!(!wl.contains("somethingelse"));
    }

    #[test]
    fn whitelist_rejects_bad_entries_with_line_number() {
        let err = Whitelist::parse("notb58!!!\n").unwrap_err();
        match err {
            KoraRentError::InvalidWhitelist { line, .. } => assert_eq!(line, 1),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn whitelist_hash_is_order_insensitive() {
        let a = Pubkey::from_bytes([1u8; 32]).to_b58();
        let b = Pubkey::from_bytes([2u8; 32]).to_b58();
        let h1 = Whitelist::parse(&format!("{a}\n{b}\n")).unwrap().hash_hex();
        let h2 = Whitelist::parse(&format!("{b}\n{a}\n")).unwrap().hash_hex();
        assert_eq!(h1, h2);
        assert!(h1.is_some());
        assert_eq!(Whitelist::default().hash_hex(), None);
    }

    #[test]
    fn network_naming() {
        assert_eq!(Network::Devnet.db_file_name(), "kora-rent-devnet.db");
        assert_eq!("mainnet".parse::<Network>().unwrap(), Network::Mainnet);
        assert!("testnet".parse::<Network>().is_err());
    }
}
