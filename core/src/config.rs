//! # Configuration & Constants
//!
//! Every tunable number in Tollgate lives here. The plan catalogue itself is
//! data (see [`crate::plan`]); what lives here are the rules around it.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Versioning
// ---------------------------------------------------------------------------

/// API contract version reported by the node's status endpoint.
pub const API_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// Trial
// ---------------------------------------------------------------------------

/// Length of the free trial in whole days.
///
/// A trial started exactly `DEFAULT_TRIAL_DAYS` days ago is already over.
pub const DEFAULT_TRIAL_DAYS: u32 = 5;

/// Name of the plan every identity falls back to when it has no current
/// subscription. The catalogue must always contain it.
pub const FREE_PLAN_NAME: &str = "free";

// ---------------------------------------------------------------------------
// Input Validation
// ---------------------------------------------------------------------------

/// Minimum wallet address length. Anything shorter is not an address on any
/// chain we know of.
pub const MIN_WALLET_ADDRESS_LENGTH: usize = 3;

/// Maximum wallet address length. Generous enough for every chain we know
/// of (EVM is 42, Solana is 44, Cosmos bech32 can run past 60).
pub const MAX_WALLET_ADDRESS_LENGTH: usize = 128;

/// Maximum blockchain identifier length (`"1"`, `"solana"`, `"eip155:8453"`).
pub const MAX_CHAIN_ID_LENGTH: usize = 64;

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// Default HTTP API port for the node.
pub const DEFAULT_RPC_PORT: u16 = 9841;

/// Default Prometheus metrics port for the node.
pub const DEFAULT_METRICS_PORT: u16 = 9842;

// ---------------------------------------------------------------------------
// GateConfig
// ---------------------------------------------------------------------------

/// Runtime rules for entitlement evaluation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Trial length in whole days.
    pub trial_days: u32,
    /// Name of the fallback plan in the catalogue.
    pub free_plan: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            trial_days: DEFAULT_TRIAL_DAYS,
            free_plan: FREE_PLAN_NAME.to_string(),
        }
    }
}

impl GateConfig {
    /// Overrides the trial length, keeping everything else.
    pub fn with_trial_days(mut self, trial_days: u32) -> Self {
        self.trial_days = trial_days;
        self
    }
}
