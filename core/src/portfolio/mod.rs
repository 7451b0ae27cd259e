//! # Wallet Portfolio
//!
//! Owners link extra wallets under their primary, up to the plan's wallet
//! allowance. The check and the write happen in one store transaction: two
//! simultaneous link requests on the last free slot produce one link and one
//! `WALLET_LIMIT_EXCEEDED`, never two links.
//!
//! ## Rejections
//!
//! | Wallet already is...                 | Code                         |
//! |--------------------------------------|------------------------------|
//! | the owner's own primary              | `CANNOT_ADD_PRIMARY_WALLET`  |
//! | someone else's primary               | `WALLET_EXISTS_PRIMARY`      |
//! | linked under this owner              | `WALLET_EXISTS_SAME_USER`    |
//! | linked under someone else            | `WALLET_EXISTS_OTHER_USER`   |
//! | free, but the plan is full           | `WALLET_LIMIT_EXCEEDED`      |
//!
//! Occupancy is checked before the limit.

use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::entitlement::EntitlementCalculator;
use crate::error::{ErrorCode, GateResult};
use crate::identity::{Identity, LinkedIdentity, WalletKey, WalletOccupant};
use crate::storage::{GateDB, LinkWrite};

/// What happened to a link request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked(LinkedIdentity),
    Rejected(ErrorCode),
}

/// Maps an existing occupant of a wallet key to the rejection an owner sees.
pub fn occupancy_rejection(owner_id: Uuid, occupant: WalletOccupant) -> ErrorCode {
    match occupant {
        WalletOccupant::Primary(id) if id == owner_id => ErrorCode::CannotAddPrimaryWallet,
        WalletOccupant::Primary(_) => ErrorCode::WalletExistsPrimary,
        WalletOccupant::Linked { parent_id, .. } if parent_id == owner_id => {
            ErrorCode::WalletExistsSameUser
        }
        WalletOccupant::Linked { .. } => ErrorCode::WalletExistsOtherUser,
    }
}

pub struct PortfolioManager {
    db: GateDB,
    entitlements: EntitlementCalculator,
    clock: Arc<dyn Clock>,
}

impl PortfolioManager {
    pub fn new(db: GateDB, entitlements: EntitlementCalculator, clock: Arc<dyn Clock>) -> Self {
        Self {
            db,
            entitlements,
            clock,
        }
    }

    /// Links `wallet` under `owner`. A linked owner is treated as its parent,
    /// so the new wallet always hangs directly off a primary.
    pub fn link_wallet(&self, owner: &Identity, wallet: &WalletKey) -> GateResult<LinkOutcome> {
        let owner = owner.owner();
        let now = self.clock.now();
        let entitlement = self.entitlements.for_primary(owner, now)?;
        let linked = LinkedIdentity::new(wallet, owner.id, &entitlement.plan_name, now);

        let outcome = match self.db.insert_linked(wallet, &linked, entitlement.linkable_wallets())? {
            LinkWrite::Linked => {
                info!(
                    owner = %owner.id,
                    linked = %linked.id,
                    %wallet,
                    plan = %entitlement.plan_name,
                    "wallet linked"
                );
                LinkOutcome::Linked(linked)
            }
            LinkWrite::Occupied(occupant) => {
                LinkOutcome::Rejected(occupancy_rejection(owner.id, occupant))
            }
            LinkWrite::LimitReached { linked } => {
                debug!(
                    owner = %owner.id,
                    linked,
                    max_wallets = entitlement.max_wallets,
                    "wallet limit reached"
                );
                LinkOutcome::Rejected(ErrorCode::WalletLimitExceeded)
            }
        };
        Ok(outcome)
    }

    /// The owner's linked wallets (a linked identity lists its siblings).
    pub fn linked_wallets(&self, owner: &Identity) -> GateResult<Vec<LinkedIdentity>> {
        Ok(self.db.linked_of(owner.billing_id())?)
    }

    pub fn linked_count(&self, owner: &Identity) -> GateResult<u32> {
        Ok(self.db.linked_count(owner.billing_id())?)
    }
}
