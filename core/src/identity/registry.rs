//! Primary identity registration and record maintenance.
//!
//! Registration is the only way identities come into existence (linking is
//! the portfolio's job). Identities are never deleted.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use super::types::{PrimaryIdentity, WalletOccupant};
use super::wallet::WalletKey;
use crate::clock::Clock;
use crate::error::{GateError, GateResult};
use crate::storage::{ClaimOutcome, GateDB};

/// What happened when a wallet asked to register.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// New primary created, trial started.
    Registered(PrimaryIdentity),
    /// The wallet already belongs to an identity. Nothing was written.
    AlreadyRegistered(WalletOccupant),
}

pub struct IdentityRegistry {
    db: GateDB,
    clock: Arc<dyn Clock>,
}

impl IdentityRegistry {
    pub fn new(db: GateDB, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    /// Creates a primary for `wallet` with a trial starting now. The wallet
    /// key is claimed atomically across both wallet indexes; a lost race is
    /// reported as [`RegistrationOutcome::AlreadyRegistered`].
    ///
    /// Ownership of the wallet must already have been proven.
    pub fn register_primary(
        &self,
        wallet: &WalletKey,
        credit_score: u32,
    ) -> GateResult<RegistrationOutcome> {
        let primary = PrimaryIdentity::new(wallet, credit_score, self.clock.now());
        match self.db.insert_primary(wallet, &primary)? {
            ClaimOutcome::Claimed => {
                info!(id = %primary.id, %wallet, "primary identity registered");
                Ok(RegistrationOutcome::Registered(primary))
            }
            ClaimOutcome::Occupied(occupant) => {
                Ok(RegistrationOutcome::AlreadyRegistered(occupant))
            }
        }
    }

    /// Stores a score pushed by the credit-scoring service.
    pub fn set_credit_score(&self, id: Uuid, score: u32) -> GateResult<PrimaryIdentity> {
        self.db
            .update_primary(id, |p| {
                if p.credit_score == score {
                    return false;
                }
                p.credit_score = score;
                true
            })?
            .ok_or(GateError::IdentityNotFound(id))
    }

    /// Flags the trial as consumed. Returns whether a write happened.
    pub fn mark_trial_used(&self, id: Uuid) -> GateResult<bool> {
        let mut changed = false;
        self.db
            .update_primary(id, |p| {
                // Re-evaluated on every CAS retry.
                changed = !p.trial.trial_used;
                p.trial.trial_used = true;
                changed
            })?
            .ok_or(GateError::IdentityNotFound(id))?;
        Ok(changed)
    }

    /// Like [`IdentityRegistry::mark_trial_used`], but failures are logged
    /// and swallowed. The gate calls this on its read path.
    pub fn mark_trial_used_best_effort(&self, id: Uuid) {
        match self.mark_trial_used(id) {
            Ok(true) => info!(%id, "trial window elapsed; marked used"),
            Ok(false) => {}
            Err(e) => warn!(%id, error = %e, "failed to flag expired trial"),
        }
    }
}
