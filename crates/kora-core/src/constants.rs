//! ─── Kora Rent Protocol Constants ───────────────────────────────────────────
//!
//! Fixed parameters of the reclamation pipeline and of the target chain's
//! rent model.

// ── Chain ────────────────────────────────────────────────────────────────────

/// The built-in system program that owns ordinary, data-less accounts.
/// Its address is all zeroes, which base58 renders as a run of `1`s.
pub const SYSTEM_PROGRAM_ID: &str = "11111111111111111111111111111111";

/// Per-byte-year rent rate in lamports.
pub const LAMPORTS_PER_BYTE_YEAR: u64 = 3_480;

/// Fixed per-account storage overhead, charged as if it were data bytes.
pub const ACCOUNT_STORAGE_OVERHEAD: u64 = 128;

/// Years of rent an account must hold to be exempt from collection.
pub const RENT_EXEMPTION_YEARS: u64 = 2;

/// Minimum balance at which an account of `data_len` bytes is rent-exempt.
pub fn rent_exempt_minimum(data_len: u64) -> u64 {
    (ACCOUNT_STORAGE_OVERHEAD + data_len) * LAMPORTS_PER_BYTE_YEAR * RENT_EXEMPTION_YEARS
}

// ── Pipeline ─────────────────────────────────────────────────────────────────

/// Signatures fetched per history page during discovery.
pub const SIGNATURE_PAGE_LIMIT: usize = 100;

/// Politeness delay between per-signature transaction fetches.
pub const SIGNATURE_FETCH_DELAY_MS: u64 = 200;

/// Addresses per batched account-info query (lifecycle and JIT checks).
pub const ACCOUNT_INFO_CHUNK: usize = 100;

/// Default rows claimed per fetch-and-lock round.
pub const DEFAULT_LOCK_BATCH: usize = 100;

/// Hard cap on transfers packed into one submitted transaction. Deliberately
/// below the chain's transaction-size limit.
pub const MAX_TRANSFERS_PER_TX: usize = 10;

// ── Ledger keys ──────────────────────────────────────────────────────────────

/// SystemKV key holding the discovery resume cursor.
pub const DISCOVERY_CURSOR_KEY: &str = "discovery_cursor_last_signature";

// ── Attestation ──────────────────────────────────────────────────────────────

/// Manifest schema version. Bump only with a documented format change.
pub const ATTESTATION_SCHEMA_VERSION: &str = "1.0.0";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rent_floor_for_empty_account() {
        // 128 overhead bytes * 3480 lamports/byte-year * 2 years.
        assert_eq!(rent_exempt_minimum(0), 890_880);
    }
}
