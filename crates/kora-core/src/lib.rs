pub mod account;
pub mod config;
pub mod constants;
pub mod error;
pub mod state;
pub mod types;

pub use account::{AuditEntry, LifecycleEvent, SponsoredAccount};
pub use config::{EffectiveConfig, Network, Whitelist};
pub use constants::*;
pub use error::KoraRentError;
pub use state::LifecycleState;
pub use types::{EventId, Lamports, Pubkey, Slot, Timestamp};
