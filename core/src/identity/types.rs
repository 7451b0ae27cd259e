//! # Identity Records
//!
//! Two kinds of identity, and the union that ties them together:
//!
//! ```text
//! PrimaryIdentity ◄──── parent_id ──── LinkedIdentity
//!   (billing owner:                     (extra wallet: no subscription,
//!    subscription, trial,                no trial, inherits everything
//!    credit score)                       from its parent)
//! ```
//!
//! [`Identity::Linked`] carries its parent *by value* and the parent slot
//! only accepts a [`PrimaryIdentity`]. A linked wallet whose parent is
//! itself linked cannot be written down, so inheritance is one level deep
//! by construction rather than by runtime check.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::wallet::WalletKey;

// ---------------------------------------------------------------------------
// TrialState
// ---------------------------------------------------------------------------

/// Where a trial stands at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TrialStatus {
    /// No trial was ever granted. Not the same thing as an expired one.
    NotStarted,
    /// Inside the window.
    Active { days_remaining: u32 },
    /// Window elapsed, or the trial was consumed by an upgrade.
    Expired,
}

/// Trial bookkeeping for a primary identity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialState {
    /// When the trial started. `None` = never granted.
    pub trial_start_date: Option<DateTime<Utc>>,
    /// Set by an upgrade, or when the gate first notices the window elapsed.
    pub trial_used: bool,
}

impl TrialState {
    /// A fresh trial starting at `at`.
    pub fn started_at(at: DateTime<Utc>) -> Self {
        Self {
            trial_start_date: Some(at),
            trial_used: false,
        }
    }

    /// Whole days since the trial started, floored. Clock skew that puts the
    /// start in the future counts as zero days.
    pub fn elapsed_days(&self, now: DateTime<Utc>) -> Option<i64> {
        self.trial_start_date
            .map(|start| (now - start).num_days().max(0))
    }

    pub fn status(&self, now: DateTime<Utc>, trial_days: u32) -> TrialStatus {
        let Some(elapsed) = self.elapsed_days(now) else {
            return TrialStatus::NotStarted;
        };
        let window = i64::from(trial_days);
        if self.trial_used || elapsed >= window {
            TrialStatus::Expired
        } else {
            TrialStatus::Active {
                days_remaining: (window - elapsed) as u32,
            }
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>, trial_days: u32) -> bool {
        matches!(self.status(now, trial_days), TrialStatus::Active { .. })
    }

    pub fn is_expired(&self, now: DateTime<Utc>, trial_days: u32) -> bool {
        self.status(now, trial_days) == TrialStatus::Expired
    }

    /// Days left in the window; zero unless the trial is active.
    pub fn days_remaining(&self, now: DateTime<Utc>, trial_days: u32) -> u32 {
        match self.status(now, trial_days) {
            TrialStatus::Active { days_remaining } => days_remaining,
            _ => 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A paid plan attached to a primary identity by the payment collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Catalogue plan name.
    pub plan: String,
    /// End of the paid period (exclusive).
    pub period_end: DateTime<Utc>,
    /// Cleared by the payment side on cancellation or failed renewal.
    pub active: bool,
    /// When the payment side last told us about this subscription.
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Active and not past its period end. Evaluated fresh on every call;
    /// nothing expires subscriptions in the background.
    pub fn is_current(&self, now: DateTime<Utc>) -> bool {
        self.active && now < self.period_end
    }
}

// ---------------------------------------------------------------------------
// PrimaryIdentity
// ---------------------------------------------------------------------------

/// The billing owner of a wallet portfolio.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryIdentity {
    pub id: Uuid,
    /// Original casing, as registered.
    pub wallet_address: String,
    pub blockchain_id: String,
    /// Supplied by the external credit-scoring service; stored, not computed.
    pub credit_score: u32,
    pub created_at: DateTime<Utc>,
    pub subscription: Option<Subscription>,
    pub trial: TrialState,
}

impl PrimaryIdentity {
    /// A new primary with a trial starting at `now`.
    pub fn new(wallet: &WalletKey, credit_score: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            wallet_address: wallet.address().to_string(),
            blockchain_id: wallet.chain().to_string(),
            credit_score,
            created_at: now,
            subscription: None,
            trial: TrialState::started_at(now),
        }
    }

    /// The subscription, if it is current at `now`.
    pub fn current_subscription(&self, now: DateTime<Utc>) -> Option<&Subscription> {
        self.subscription.as_ref().filter(|s| s.is_current(now))
    }
}

// ---------------------------------------------------------------------------
// LinkedIdentity
// ---------------------------------------------------------------------------

/// An extra wallet attached to a primary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedIdentity {
    pub id: Uuid,
    pub wallet_address: String,
    pub blockchain_id: String,
    pub parent_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Copy of the parent's plan name at link time, refreshed by
    /// [`crate::billing`] on subscription changes. Display only: entitlement
    /// always goes through the parent.
    pub plan_name: String,
}

impl LinkedIdentity {
    pub fn new(wallet: &WalletKey, parent_id: Uuid, plan_name: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            wallet_address: wallet.address().to_string(),
            blockchain_id: wallet.chain().to_string(),
            parent_id,
            created_at: now,
            plan_name: plan_name.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A resolved identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Identity {
    Primary(PrimaryIdentity),
    Linked {
        linked: LinkedIdentity,
        parent: PrimaryIdentity,
    },
}

impl Identity {
    /// The id of the record the wallet resolved to.
    pub fn id(&self) -> Uuid {
        match self {
            Identity::Primary(p) => p.id,
            Identity::Linked { linked, .. } => linked.id,
        }
    }

    /// The primary that owns billing for this identity (itself, or the parent).
    pub fn owner(&self) -> &PrimaryIdentity {
        match self {
            Identity::Primary(p) => p,
            Identity::Linked { parent, .. } => parent,
        }
    }

    /// Id that usage and transaction volume are charged against.
    pub fn billing_id(&self) -> Uuid {
        self.owner().id
    }

    pub fn wallet_address(&self) -> &str {
        match self {
            Identity::Primary(p) => &p.wallet_address,
            Identity::Linked { linked, .. } => &linked.wallet_address,
        }
    }

    pub fn blockchain_id(&self) -> &str {
        match self {
            Identity::Primary(p) => &p.blockchain_id,
            Identity::Linked { linked, .. } => &linked.blockchain_id,
        }
    }

    pub fn is_linked(&self) -> bool {
        matches!(self, Identity::Linked { .. })
    }

    pub fn into_owner(self) -> PrimaryIdentity {
        match self {
            Identity::Primary(p) => p,
            Identity::Linked { parent, .. } => parent,
        }
    }
}

// ---------------------------------------------------------------------------
// WalletOccupant
// ---------------------------------------------------------------------------

/// Who currently holds a wallet key in the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WalletOccupant {
    Primary(Uuid),
    Linked { id: Uuid, parent_id: Uuid },
}

impl WalletOccupant {
    /// The primary that owns the occupying identity.
    pub fn owner_id(&self) -> Uuid {
        match self {
            WalletOccupant::Primary(id) => *id,
            WalletOccupant::Linked { parent_id, .. } => *parent_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 10, 9, 30, 0).unwrap()
    }

    #[test]
    fn trial_boundaries() {
        let trial = TrialState::started_at(t0());

        // Day 4 of a 5-day trial: still active, one day left.
        let day4 = t0() + Duration::days(4);
        assert!(trial.is_active(day4, 5));
        assert_eq!(trial.days_remaining(day4, 5), 1);

        // Day 5: over.
        let day5 = t0() + Duration::days(5);
        assert!(!trial.is_active(day5, 5));
        assert!(trial.is_expired(day5, 5));
        assert_eq!(trial.days_remaining(day5, 5), 0);
    }

    #[test]
    fn partial_days_are_floored() {
        let trial = TrialState::started_at(t0());
        let almost_five = t0() + Duration::days(5) - Duration::seconds(1);
        assert_eq!(trial.elapsed_days(almost_five), Some(4));
        assert!(trial.is_active(almost_five, 5));
    }

    #[test]
    fn unset_trial_is_neither_active_nor_expired() {
        let trial = TrialState::default();
        assert_eq!(trial.status(t0(), 5), TrialStatus::NotStarted);
        assert!(!trial.is_active(t0(), 5));
        assert!(!trial.is_expired(t0(), 5));
        assert_eq!(trial.days_remaining(t0(), 5), 0);
    }

    #[test]
    fn used_trial_is_expired_even_inside_window() {
        let trial = TrialState {
            trial_start_date: Some(t0()),
            trial_used: true,
        };
        assert_eq!(trial.status(t0() + Duration::days(1), 5), TrialStatus::Expired);
    }

    #[test]
    fn future_start_counts_as_day_zero() {
        let trial = TrialState::started_at(t0() + Duration::hours(2));
        assert_eq!(trial.elapsed_days(t0()), Some(0));
        assert_eq!(trial.days_remaining(t0(), 5), 5);
    }

    #[test]
    fn subscription_expires_at_period_end() {
        let sub = Subscription {
            plan: "pro".into(),
            period_end: t0(),
            active: true,
            updated_at: t0() - Duration::days(30),
        };
        assert!(sub.is_current(t0() - Duration::seconds(1)));
        assert!(!sub.is_current(t0()));

        let cancelled = Subscription {
            active: false,
            ..sub
        };
        assert!(!cancelled.is_current(t0() - Duration::days(1)));
    }

    #[test]
    fn linked_identity_reports_parent_as_owner() {
        let owner_key = WalletKey::parse("0xowner", "1").unwrap();
        let extra_key = WalletKey::parse("0xExtra", "1").unwrap();
        let parent = PrimaryIdentity::new(&owner_key, 700, t0());
        let linked = LinkedIdentity::new(&extra_key, parent.id, "free", t0());
        let linked_id = linked.id;

        let identity = Identity::Linked {
            linked,
            parent: parent.clone(),
        };
        assert_eq!(identity.id(), linked_id);
        assert_eq!(identity.billing_id(), parent.id);
        assert_eq!(identity.wallet_address(), "0xExtra");
        assert!(identity.is_linked());
        assert_eq!(identity.into_owner(), parent);
    }

    #[test]
    fn identity_serializes_with_kind_tag() {
        let key = WalletKey::parse("0xowner", "1").unwrap();
        let identity = Identity::Primary(PrimaryIdentity::new(&key, 0, t0()));
        let json = serde_json::to_value(&identity).unwrap();
        assert_eq!(json["kind"], "primary");
        assert_eq!(json["wallet_address"], "0xowner");
    }
}
