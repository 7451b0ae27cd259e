//! # Billing Sync
//!
//! The payment side tells us when a subscription starts, renews, changes
//! plan or gets cancelled. We don't process payments; we only record what
//! we were told and make sure everything downstream sees it.
//!
//! Applying an update:
//!
//! 1. The plan must exist in the catalogue.
//! 2. The subscription on the primary is replaced (compare-and-swap).
//! 3. An active paid plan consumes the trial for good.
//! 4. Every linked wallet's copy of the plan name is refreshed. That copy is
//!    display-only, so a failure here is logged and the update still stands.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::entitlement::{Entitlement, EntitlementCalculator};
use crate::error::{GateError, GateResult};
use crate::identity::{PrimaryIdentity, Subscription};
use crate::storage::GateDB;

fn default_active() -> bool {
    true
}

/// A notification from the payment collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionUpdate {
    /// Primary identity being billed.
    pub identity_id: Uuid,
    /// Catalogue plan name.
    pub plan_id: String,
    pub period_end: DateTime<Utc>,
    /// `false` for cancellations and failed renewals.
    #[serde(default = "default_active")]
    pub active: bool,
}

/// What an applied update produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubscriptionApplied {
    pub identity: PrimaryIdentity,
    pub entitlement: Entitlement,
    /// Linked wallets whose plan name was rewritten.
    pub propagated: usize,
}

pub struct SubscriptionSync {
    db: GateDB,
    entitlements: EntitlementCalculator,
    clock: Arc<dyn Clock>,
}

impl SubscriptionSync {
    pub fn new(db: GateDB, entitlements: EntitlementCalculator, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            entitlements,
            clock,
        }
    }

    /// # Errors
    ///
    /// [`GateError::UnknownPlan`] for a plan outside the catalogue,
    /// [`GateError::IdentityNotFound`] when `identity_id` isn't a primary.
    pub fn apply_subscription_update(
        &self,
        update: &SubscriptionUpdate,
    ) -> GateResult<SubscriptionApplied> {
        let catalogue = self.entitlements.catalogue();
        let plan = catalogue
            .get(&update.plan_id)
            .ok_or_else(|| GateError::UnknownPlan(update.plan_id.clone()))?;
        let consumes_trial = update.active && !catalogue.is_free(&plan.name);
        let now = self.clock.now();

        let identity = self
            .db
            .update_primary(update.identity_id, |p| {
                p.subscription = Some(Subscription {
                    plan: plan.name.clone(),
                    period_end: update.period_end,
                    active: update.active,
                    updated_at: now,
                });
                if consumes_trial {
                    p.trial.trial_used = true;
                }
                true
            })?
            .ok_or(GateError::IdentityNotFound(update.identity_id))?;

        let entitlement = self.entitlements.for_primary(&identity, now)?;
        info!(
            id = %identity.id,
            plan = %plan.name,
            active = update.active,
            period_end = %update.period_end,
            effective = %entitlement.plan_name,
            "subscription updated"
        );

        let propagated = self.propagate_plan_name(identity.id, &entitlement.plan_name);
        Ok(SubscriptionApplied {
            identity,
            entitlement,
            propagated,
        })
    }

    /// Rewrites the plan-name copy on every linked wallet of `owner_id`.
    /// Best-effort: failures are logged and skipped.
    pub fn propagate_plan_name(&self, owner_id: Uuid, plan_name: &str) -> usize {
        let linked = match self.db.linked_of(owner_id) {
            Ok(linked) => linked,
            Err(e) => {
                warn!(owner = %owner_id, error = %e, "could not list linked wallets for plan propagation");
                return 0;
            }
        };

        let mut updated = 0;
        for l in linked {
            let result = self.db.update_linked(l.id, |rec| {
                if rec.plan_name == plan_name {
                    return false;
                }
                rec.plan_name = plan_name.to_string();
                true
            });
            match result {
                Ok(Some(_)) if l.plan_name != plan_name => updated += 1,
                Ok(_) => {}
                Err(e) => warn!(linked = %l.id, error = %e, "plan name propagation failed"),
            }
        }
        updated
    }
}
