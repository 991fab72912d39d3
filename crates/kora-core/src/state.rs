use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::KoraRentError;

/// Lifecycle position of a sponsored account.
///
/// The canonical serialized form is lower-snake everywhere: the ledger, the
/// event log, the attestation document, and policy comparisons all use the
/// exact strings produced by [`LifecycleState::as_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Inserted by discovery; no on-chain observation yet.
    Discovered,
    /// Observed to exist on chain.
    Active,
    /// Observed absent on chain.
    Closed,
    /// Whitelisted; never reclaimed.
    Protected,
    /// Excluded by a policy or JIT rule; re-evaluable.
    Skipped,
    /// Balance below the dust floor; not worth a transaction.
    Dust,
    /// Passed every policy rule; eligible for the reclaimer.
    Reclaimable,
    /// Balance swept back to the operator.
    Reclaimed,
    /// A submitted reclaim transaction was rejected or unconfirmed.
    Failed,
    /// JIT check found the account already gone or empty.
    ClosedZero,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Discovered => "discovered",
            LifecycleState::Active => "active",
            LifecycleState::Closed => "closed",
            LifecycleState::Protected => "protected",
            LifecycleState::Skipped => "skipped",
            LifecycleState::Dust => "dust",
            LifecycleState::Reclaimable => "reclaimable",
            LifecycleState::Reclaimed => "reclaimed",
            LifecycleState::Failed => "failed",
            LifecycleState::ClosedZero => "closed_zero",
        }
    }

    /// Terminal states are never re-labeled by the policy engine.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleState::Protected
                | LifecycleState::Dust
                | LifecycleState::Reclaimed
                | LifecycleState::Failed
                | LifecycleState::ClosedZero
        )
    }

    /// States the policy engine may evaluate.
    pub fn is_policy_eligible(&self) -> bool {
        matches!(
            self,
            LifecycleState::Discovered
                | LifecycleState::Active
                | LifecycleState::Skipped
                | LifecycleState::Reclaimable
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleState {
    type Err = KoraRentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discovered" => Ok(LifecycleState::Discovered),
            "active" => Ok(LifecycleState::Active),
            "closed" => Ok(LifecycleState::Closed),
            "protected" => Ok(LifecycleState::Protected),
            "skipped" => Ok(LifecycleState::Skipped),
            "dust" => Ok(LifecycleState::Dust),
            "reclaimable" => Ok(LifecycleState::Reclaimable),
            "reclaimed" => Ok(LifecycleState::Reclaimed),
            "failed" => Ok(LifecycleState::Failed),
            "closed_zero" => Ok(LifecycleState::ClosedZero),
            other => Err(KoraRentError::UnknownState(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_uses_snake_case() {
        let s = serde_json::to_string(&LifecycleState::ClosedZero).unwrap();
        assert_eq!(s, "\"closed_zero\"");
        let back: LifecycleState = serde_json::from_str("\"reclaimable\"").unwrap();
        assert_eq!(back, LifecycleState::Reclaimable);
    }

    #[test]
    fn display_matches_from_str() {
        for state in [
            LifecycleState::Discovered,
            LifecycleState::Active,
            LifecycleState::Closed,
            LifecycleState::Protected,
            LifecycleState::Skipped,
            LifecycleState::Dust,
            LifecycleState::Reclaimable,
            LifecycleState::Reclaimed,
            LifecycleState::Failed,
            LifecycleState::ClosedZero,
        ] {
            assert_eq!(state.as_str().parse::<LifecycleState>().unwrap(), state);
        }
    }

    #[test]
    fn terminality() {
        assert!(LifecycleState::Reclaimed.is_terminal());
        assert!(LifecycleState::ClosedZero.is_terminal());
        assert!(!LifecycleState::Skipped.is_terminal());
        assert!(!LifecycleState::Active.is_terminal());
    }
}
