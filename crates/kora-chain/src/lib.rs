//! kora-chain
//!
//! Everything that touches the chain: the JSON-RPC client, the read/submit
//! interfaces the pipeline stages are generic over, the wire transaction
//! builder for reclaim sweeps, and an in-memory mock used by tests.

pub mod client;
pub mod mock;
pub mod tx;
pub mod types;

use async_trait::async_trait;

use kora_core::error::KoraRentError;
use types::{AccountSnapshot, ParsedTransaction, SignatureInfo};

/// Read-only chain access: the three queries the pipeline needs.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Signatures that involve `address`, newest first. `before` pages
    /// backwards; `until` stops the scan (exclusive) at a known signature.
    async fn signatures_for_address(
        &self,
        address: &str,
        limit: usize,
        before: Option<&str>,
        until: Option<&str>,
    ) -> Result<Vec<SignatureInfo>, KoraRentError>;

    /// A parsed transaction, or None if the chain no longer has it.
    async fn transaction(
        &self,
        signature: &str,
    ) -> Result<Option<ParsedTransaction>, KoraRentError>;

    /// Batched account lookup; None per address means absent on chain.
    async fn multiple_accounts(
        &self,
        addresses: &[String],
    ) -> Result<Vec<Option<AccountSnapshot>>, KoraRentError>;
}

/// Write access, needed only by the reclaimer.
#[async_trait]
pub trait ChainSubmitter: ChainReader {
    async fn latest_blockhash(&self) -> Result<String, KoraRentError>;

    /// Submit a base64 wire transaction and wait for confirmed commitment.
    /// Returns the transaction signature.
    async fn submit_and_confirm(&self, wire_base64: &str) -> Result<String, KoraRentError>;
}

pub use client::RpcChainClient;
pub use mock::MockChain;
pub use tx::{build_sweep_transaction, BuiltTransaction, TransferOut};
