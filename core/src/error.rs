//! Error types and rejection codes.
//!
//! Two very different things live here:
//!
//! - [`ErrorCode`]: the string enum of *expected* rejections (quota hit,
//!   wallet already taken, ...). These travel inside structured results like
//!   [`crate::gate::QuotaDecision`] and are never raised as errors.
//! - [`GateError`]: the exceptional path: malformed input, a broken store,
//!   or data that contradicts the catalogue. Callers retry storage failures
//!   with backoff; everything else is a bug report.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::plan::CatalogueError;
use crate::storage::db::StoreError;

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Discriminated rejection reasons. Serialized as `SCREAMING_SNAKE_CASE`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// No Primary or Linked identity exists for the wallet/chain pair.
    WalletNotRegistered,
    /// The Free-tier trial window has elapsed (or was consumed by an upgrade).
    TrialExpired,
    /// Monthly query quota exhausted.
    QueryLimitExceeded,
    /// Linking another wallet would exceed the plan's wallet allowance.
    WalletLimitExceeded,
    /// Cumulative monthly transaction volume would exceed the plan limit.
    PlanTxnLimitExceeded,
    /// The wallet is the owner's own primary wallet.
    CannotAddPrimaryWallet,
    /// The wallet is somebody else's primary wallet.
    WalletExistsPrimary,
    /// The wallet is already linked under this owner.
    WalletExistsSameUser,
    /// The wallet is linked under a different owner.
    WalletExistsOtherUser,
}

/// Coarse classification of a rejection, used to pick transport status codes
/// and caller messaging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectionKind {
    /// Identity absent; recoverable by registering.
    NotFound,
    /// A quota or limit was hit; recoverable by upgrading or waiting.
    QuotaExceeded,
    /// The wallet belongs to someone (possibly you) already.
    Conflict,
}

impl ErrorCode {
    /// Every code, in declaration order.
    pub const ALL: [ErrorCode; 9] = [
        ErrorCode::WalletNotRegistered,
        ErrorCode::TrialExpired,
        ErrorCode::QueryLimitExceeded,
        ErrorCode::WalletLimitExceeded,
        ErrorCode::PlanTxnLimitExceeded,
        ErrorCode::CannotAddPrimaryWallet,
        ErrorCode::WalletExistsPrimary,
        ErrorCode::WalletExistsSameUser,
        ErrorCode::WalletExistsOtherUser,
    ];

    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::WalletNotRegistered => "WALLET_NOT_REGISTERED",
            ErrorCode::TrialExpired => "TRIAL_EXPIRED",
            ErrorCode::QueryLimitExceeded => "QUERY_LIMIT_EXCEEDED",
            ErrorCode::WalletLimitExceeded => "WALLET_LIMIT_EXCEEDED",
            ErrorCode::PlanTxnLimitExceeded => "PLAN_TXN_LIMIT_EXCEEDED",
            ErrorCode::CannotAddPrimaryWallet => "CANNOT_ADD_PRIMARY_WALLET",
            ErrorCode::WalletExistsPrimary => "WALLET_EXISTS_PRIMARY",
            ErrorCode::WalletExistsSameUser => "WALLET_EXISTS_SAME_USER",
            ErrorCode::WalletExistsOtherUser => "WALLET_EXISTS_OTHER_USER",
        }
    }

    pub fn kind(&self) -> RejectionKind {
        match self {
            ErrorCode::WalletNotRegistered => RejectionKind::NotFound,
            ErrorCode::TrialExpired
            | ErrorCode::QueryLimitExceeded
            | ErrorCode::WalletLimitExceeded
            | ErrorCode::PlanTxnLimitExceeded => RejectionKind::QuotaExceeded,
            ErrorCode::CannotAddPrimaryWallet
            | ErrorCode::WalletExistsPrimary
            | ErrorCode::WalletExistsSameUser
            | ErrorCode::WalletExistsOtherUser => RejectionKind::Conflict,
        }
    }

    /// Short human-readable explanation, suitable for API responses.
    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::WalletNotRegistered => "wallet is not registered on this chain",
            ErrorCode::TrialExpired => "free trial has ended; upgrade to continue",
            ErrorCode::QueryLimitExceeded => "monthly query limit reached",
            ErrorCode::WalletLimitExceeded => "plan does not allow more linked wallets",
            ErrorCode::PlanTxnLimitExceeded => "monthly transaction volume limit reached",
            ErrorCode::CannotAddPrimaryWallet => "wallet is already your primary wallet",
            ErrorCode::WalletExistsPrimary => "wallet is registered as another account's primary",
            ErrorCode::WalletExistsSameUser => "wallet is already linked to your account",
            ErrorCode::WalletExistsOtherUser => "wallet is linked to another account",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ValidationError
// ---------------------------------------------------------------------------

/// Malformed input, rejected before touching the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("wallet address is empty")]
    EmptyWallet,

    #[error("wallet address length {len} outside {min}..={max}")]
    WalletLength { len: usize, min: usize, max: usize },

    #[error("wallet address contains invalid character {0:?}")]
    WalletCharacter(char),

    #[error("blockchain id is empty")]
    EmptyChain,

    #[error("blockchain id longer than {max} characters")]
    ChainLength { max: usize },

    #[error("blockchain id contains invalid character {0:?}")]
    ChainCharacter(char),

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("invalid period {year}-{month:02}")]
    InvalidPeriod { year: i32, month: u32 },
}

// ---------------------------------------------------------------------------
// GateError
// ---------------------------------------------------------------------------

/// Exceptional failures. Quota and conflict outcomes are *not* in here.
#[derive(Debug, Error)]
pub enum GateError {
    /// The caller sent something that is not a wallet, chain, amount or period.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The backing store failed. Retry with backoff.
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),

    /// A subscription or update references a plan the catalogue doesn't have.
    #[error("unknown plan: {0}")]
    UnknownPlan(String),

    /// An operation addressed an identity id that does not exist.
    #[error("identity {0} not found")]
    IdentityNotFound(Uuid),

    /// The plan catalogue itself is unusable.
    #[error("catalogue error: {0}")]
    Catalogue(#[from] CatalogueError),
}

impl GateError {
    /// True for failures a caller should retry later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GateError::Storage(_))
    }
}

pub type GateResult<T> = Result<T, GateError>;
