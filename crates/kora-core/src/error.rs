use thiserror::Error;

#[derive(Debug, Error)]
pub enum KoraRentError {
    // ── Input validation ─────────────────────────────────────────────────────
    #[error("invalid pubkey: {0}")]
    InvalidPubkey(String),

    #[error("unknown lifecycle state: {0}")]
    UnknownState(String),

    #[error("invalid keypair: {0}")]
    InvalidKeypair(String),

    #[error("invalid whitelist entry at line {line}: {reason}")]
    InvalidWhitelist { line: usize, reason: String },

    #[error("a signing keypair is required unless --dry-run is set")]
    MissingKeypair,

    // ── Chain RPC ────────────────────────────────────────────────────────────
    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("transaction submit failed: {0}")]
    Submit(String),

    // ── Ledger ───────────────────────────────────────────────────────────────
    #[error("storage error: {0}")]
    Storage(String),

    #[error("ledger integrity violation: {0}")]
    LedgerIntegrity(String),

    #[error("unknown account: {0}")]
    UnknownAccount(String),

    // ── Attestation ──────────────────────────────────────────────────────────
    #[error("attestation mismatch in {field}: expected {expected}, actual {actual}")]
    AttestationMismatch {
        field: &'static str,
        expected: String,
        actual: String,
    },

    #[error("malformed attestation document: {0}")]
    InvalidDocument(String),

    #[error("signature verification failed")]
    BadSignature,

    // ── Serialization / io ───────────────────────────────────────────────────
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Canonical(#[from] kora_canonical::CanonicalError),

    #[error("io error: {0}")]
    Io(String),
}
