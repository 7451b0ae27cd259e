//! # Entitlement
//!
//! "What is this identity allowed to do right now?" Answered from scratch on
//! every call: nothing here is cached, so a subscription that lapsed a
//! second ago is already lapsed.
//!
//! ## Rules
//!
//! - **Primary:** the subscription's plan when it is active and
//!   `now < period_end`; otherwise the free plan.
//! - **Linked:** whatever its parent gets. One level, always; the type system
//!   doesn't allow a deeper chain.
//! - **Trial fields** are only filled in on the free plan. A paying customer
//!   has no trial to speak of.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::GateConfig;
use crate::error::{GateError, GateResult};
use crate::identity::{Identity, PrimaryIdentity};
use crate::plan::{Plan, PlanCatalogue};

/// The effective plan and limits for an identity at one instant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    pub plan_name: String,
    pub query_limit: u64,
    /// `None` = unlimited.
    pub txn_limit: Option<u64>,
    /// Total wallets including the primary.
    pub max_wallets: u32,
    /// A current subscription to a non-free plan.
    pub paid: bool,
    pub trial_active: bool,
    pub trial_days_remaining: u32,
    pub trial_expired: bool,
    /// End of the current paid period, when paid.
    pub period_end: Option<DateTime<Utc>>,
}

impl Entitlement {
    /// Wallets that may be linked on top of the primary.
    pub fn linkable_wallets(&self) -> u32 {
        self.max_wallets.saturating_sub(1)
    }
}

/// Turns identities into entitlements.
#[derive(Debug, Clone)]
pub struct EntitlementCalculator {
    catalogue: Arc<PlanCatalogue>,
    config: GateConfig,
}

impl EntitlementCalculator {
    pub fn new(catalogue: Arc<PlanCatalogue>, config: GateConfig) -> Self {
        Self { catalogue, config }
    }

    pub fn catalogue(&self) -> &PlanCatalogue {
        &self.catalogue
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Entitlement of `identity`, which for a linked wallet means its parent's.
    pub fn compute(&self, identity: &Identity, now: DateTime<Utc>) -> GateResult<Entitlement> {
        self.for_primary(identity.owner(), now)
    }

    /// # Errors
    ///
    /// [`GateError::UnknownPlan`] if a current subscription names a plan the
    /// catalogue doesn't know.
    pub fn for_primary(
        &self,
        primary: &PrimaryIdentity,
        now: DateTime<Utc>,
    ) -> GateResult<Entitlement> {
        if let Some(sub) = primary.current_subscription(now) {
            let plan = self
                .catalogue
                .get(&sub.plan)
                .ok_or_else(|| GateError::UnknownPlan(sub.plan.clone()))?;
            if !self.catalogue.is_free(&plan.name) {
                return Ok(Self::paid(plan, sub.period_end));
            }
        }
        Ok(self.free(primary, now))
    }

    fn paid(plan: &Plan, period_end: DateTime<Utc>) -> Entitlement {
        Entitlement {
            plan_name: plan.name.clone(),
            query_limit: plan.monthly_query_limit,
            txn_limit: plan.txn_volume_limit,
            max_wallets: plan.max_wallets,
            paid: true,
            trial_active: false,
            trial_days_remaining: 0,
            trial_expired: false,
            period_end: Some(period_end),
        }
    }

    fn free(&self, primary: &PrimaryIdentity, now: DateTime<Utc>) -> Entitlement {
        let plan = self.catalogue.free_plan();
        let days = self.config.trial_days;
        Entitlement {
            plan_name: plan.name.clone(),
            query_limit: plan.monthly_query_limit,
            txn_limit: plan.txn_volume_limit,
            max_wallets: plan.max_wallets,
            paid: false,
            trial_active: primary.trial.is_active(now, days),
            trial_days_remaining: primary.trial.days_remaining(now, days),
            trial_expired: primary.trial.is_expired(now, days),
            period_end: None,
        }
    }
}
