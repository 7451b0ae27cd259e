//! # Quota Gate
//!
//! The allow/deny checkpoint in front of every metered operation.
//!
//! ## Query Rules (in order)
//!
//! ```text
//! 1. wallet unknown                     → WALLET_NOT_REGISTERED
//! 2. paid plan, used ≥ limit            → QUERY_LIMIT_EXCEEDED
//! 3. free plan, trial started & over    → TRIAL_EXPIRED
//! 4. free plan, used ≥ limit            → QUERY_LIMIT_EXCEEDED
//! 5. otherwise                          → allow
//! ```
//!
//! A fresh trial is still bounded by the free quota, and an expired trial
//! is denied even when the quota has room left.
//!
//! ## Transaction Rule
//!
//! Unlimited plans always pass. Otherwise deny with
//! `PLAN_TXN_LIMIT_EXCEEDED` when `volume + proposed > limit`.
//!
//! The gate itself never counts anything. Usage is recorded by the caller
//! once the guarded operation has actually succeeded, or by
//! [`QuotaGate::run_metered`], which does the whole dance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::entitlement::{Entitlement, EntitlementCalculator};
use crate::error::{ErrorCode, GateResult, ValidationError};
use crate::identity::{Identity, IdentityRegistry, IdentityResolver};
use crate::usage::{Period, UsageLedger};

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// Outcome of a quota check. A denial is an answer, not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "code", rename_all = "snake_case")]
pub enum QuotaDecision {
    Allow,
    Deny(ErrorCode),
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allow)
    }

    pub fn reason(&self) -> Option<ErrorCode> {
        match self {
            QuotaDecision::Allow => None,
            QuotaDecision::Deny(code) => Some(*code),
        }
    }
}

/// A decision together with the identity it was made for, so the caller
/// can record usage against the same identity afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Authorization {
    pub decision: QuotaDecision,
    /// `None` only when the wallet is not registered.
    pub identity: Option<Identity>,
}

impl Authorization {
    fn unregistered() -> Self {
        Self {
            decision: QuotaDecision::Deny(ErrorCode::WalletNotRegistered),
            identity: None,
        }
    }
}

/// Whether a metered operation consumes quota when it succeeds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Metering {
    Counted,
    /// Read-only operations: gated, never counted.
    Exempt,
}

/// Result of [`QuotaGate::run_metered`].
#[derive(Debug, PartialEq, Eq)]
pub enum Metered<T, E> {
    /// The gate said no; the operation never ran.
    Denied(ErrorCode),
    /// The operation ran and succeeded. Usage was recorded if counted and
    /// the store accepted the write.
    Completed(T),
    /// The operation ran and failed. Nothing was recorded.
    Failed(E),
}

// ---------------------------------------------------------------------------
// Pure evaluation
// ---------------------------------------------------------------------------

/// Query decision for an identity with `entitlement` that has used `used`
/// queries this month.
pub fn evaluate_query(entitlement: &Entitlement, used: u64) -> QuotaDecision {
    if !entitlement.paid && entitlement.trial_expired {
        return QuotaDecision::Deny(ErrorCode::TrialExpired);
    }
    if used >= entitlement.query_limit {
        return QuotaDecision::Deny(ErrorCode::QueryLimitExceeded);
    }
    QuotaDecision::Allow
}

/// Transaction decision for a proposed `amount` on top of this month's
/// succeeded `volume`.
pub fn evaluate_transaction(entitlement: &Entitlement, volume: u64, amount: u64) -> QuotaDecision {
    match entitlement.txn_limit {
        None => QuotaDecision::Allow,
        Some(limit) if volume.saturating_add(amount) > limit => {
            QuotaDecision::Deny(ErrorCode::PlanTxnLimitExceeded)
        }
        Some(_) => QuotaDecision::Allow,
    }
}

// ---------------------------------------------------------------------------
// QuotaGate
// ---------------------------------------------------------------------------

pub struct QuotaGate {
    resolver: IdentityResolver,
    entitlements: EntitlementCalculator,
    ledger: UsageLedger,
    registry: Arc<IdentityRegistry>,
    clock: Arc<dyn Clock>,
}

impl QuotaGate {
    pub fn new(
        resolver: IdentityResolver,
        entitlements: EntitlementCalculator,
        ledger: UsageLedger,
        registry: Arc<IdentityRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            resolver,
            entitlements,
            ledger,
            registry,
            clock,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // -- Queries ------------------------------------------------------------

    /// Query decision for an already-resolved identity.
    ///
    /// Side effect: if the trial has run out but was never flagged, the flag
    /// is flipped. That write is best-effort and never changes the answer.
    pub fn check_query_quota(&self, identity: &Identity) -> GateResult<QuotaDecision> {
        let now = self.now();
        let entitlement = self.entitlements.compute(identity, now)?;
        let owner = identity.owner();
        let used = self.ledger.get_usage(owner.id, Period::containing(now))?;

        let decision = evaluate_query(&entitlement, used);
        if decision == QuotaDecision::Deny(ErrorCode::TrialExpired) && !owner.trial.trial_used {
            self.registry.mark_trial_used_best_effort(owner.id);
        }

        debug!(
            identity = %identity.id(),
            billing = %owner.id,
            plan = %entitlement.plan_name,
            used,
            limit = entitlement.query_limit,
            ?decision,
            "query gate"
        );
        Ok(decision)
    }

    /// Resolve, then gate. Unknown wallets are denied, not errors.
    pub fn authorize_query(&self, wallet: &str, chain: &str) -> GateResult<Authorization> {
        let Some(identity) = self.resolver.resolve(wallet, chain)? else {
            debug!(wallet, chain, "query gate: wallet not registered");
            return Ok(Authorization::unregistered());
        };
        let decision = self.check_query_quota(&identity)?;
        Ok(Authorization {
            decision,
            identity: Some(identity),
        })
    }

    /// Counts one query against the identity's billing owner in the current
    /// month. Call only after the guarded operation succeeded.
    pub fn record_query(&self, identity: &Identity) -> GateResult<u64> {
        self.ledger
            .record_query(identity.billing_id(), Period::containing(self.now()))
    }

    /// Gate → run `op` → count on success. The operation never runs when
    /// the gate denies, and a failed operation is never counted.
    ///
    /// Once `op` has succeeded its value is always returned. A failure to
    /// record the query afterwards is logged at `warn`, not surfaced.
    pub fn run_metered<T, E, F>(
        &self,
        wallet: &str,
        chain: &str,
        metering: Metering,
        op: F,
    ) -> GateResult<Metered<T, E>>
    where
        F: FnOnce(&Identity) -> Result<T, E>,
    {
        let auth = self.authorize_query(wallet, chain)?;
        let identity = match (auth.decision, auth.identity) {
            (QuotaDecision::Allow, Some(identity)) => identity,
            (QuotaDecision::Deny(code), _) => return Ok(Metered::Denied(code)),
            (QuotaDecision::Allow, None) => {
                return Ok(Metered::Denied(ErrorCode::WalletNotRegistered))
            }
        };

        match op(&identity) {
            Ok(value) => {
                if metering == Metering::Counted {
                    if let Err(error) = self.record_query(&identity) {
                        warn!(
                            identity = %identity.id(),
                            billing = %identity.billing_id(),
                            %error,
                            "query completed but usage was not recorded"
                        );
                    }
                }
                Ok(Metered::Completed(value))
            }
            Err(e) => Ok(Metered::Failed(e)),
        }
    }

    // -- Transactions -------------------------------------------------------

    /// Transaction decision for `amount` on top of this month's volume.
    ///
    /// # Errors
    ///
    /// [`ValidationError::ZeroAmount`] for a zero amount.
    pub fn check_transaction_quota(
        &self,
        identity: &Identity,
        amount: u64,
    ) -> GateResult<QuotaDecision> {
        if amount == 0 {
            return Err(ValidationError::ZeroAmount.into());
        }
        let now = self.now();
        let entitlement = self.entitlements.compute(identity, now)?;
        if entitlement.txn_limit.is_none() {
            return Ok(QuotaDecision::Allow);
        }

        let billing = identity.billing_id();
        let volume = self.ledger.current_volume(billing, Period::containing(now))?;
        let decision = evaluate_transaction(&entitlement, volume, amount);
        debug!(
            identity = %identity.id(),
            %billing,
            volume,
            amount,
            limit = ?entitlement.txn_limit,
            ?decision,
            "transaction gate"
        );
        Ok(decision)
    }

    pub fn authorize_transaction(
        &self,
        wallet: &str,
        chain: &str,
        amount: u64,
    ) -> GateResult<Authorization> {
        let Some(identity) = self.resolver.resolve(wallet, chain)? else {
            return Ok(Authorization::unregistered());
        };
        let decision = self.check_transaction_quota(&identity, amount)?;
        Ok(Authorization {
            decision,
            identity: Some(identity),
        })
    }
}
