//! Wallet → identity resolution.
//!
//! Two index lookups at most: the primary index, then the linked index. A
//! miss on both is a normal answer (`Ok(None)`), not an error. A linked
//! record whose parent has gone missing is a different story: the store has
//! lost integrity, and we say so.

use uuid::Uuid;

use super::types::{Identity, WalletOccupant};
use super::wallet::WalletKey;
use crate::error::GateResult;
use crate::storage::{GateDB, StoreError};

#[derive(Debug, Clone)]
pub struct IdentityResolver {
    db: GateDB,
}

impl IdentityResolver {
    pub fn new(db: GateDB) -> Self {
        Self { db }
    }

    /// Validates the pair, then resolves it. Matching ignores case.
    pub fn resolve(&self, wallet: &str, chain: &str) -> GateResult<Option<Identity>> {
        let key = WalletKey::parse(wallet, chain)?;
        self.resolve_key(&key)
    }

    pub fn resolve_key(&self, key: &WalletKey) -> GateResult<Option<Identity>> {
        match self.db.find_occupant(key)? {
            Some(occupant) => self.load(occupant).map(Some),
            None => Ok(None),
        }
    }

    /// Looks an identity up by id, primary first.
    pub fn resolve_by_id(&self, id: Uuid) -> GateResult<Option<Identity>> {
        if let Some(primary) = self.db.get_primary(id)? {
            return Ok(Some(Identity::Primary(primary)));
        }
        match self.db.get_linked(id)? {
            Some(linked) => {
                let parent_id = linked.parent_id;
                self.load(WalletOccupant::Linked { id, parent_id }).map(Some)
            }
            None => Ok(None),
        }
    }

    fn load(&self, occupant: WalletOccupant) -> GateResult<Identity> {
        match occupant {
            WalletOccupant::Primary(id) => {
                let primary = self
                    .db
                    .get_primary(id)?
                    .ok_or_else(|| dangling(format!("wallet index points at missing primary {id}")))?;
                Ok(Identity::Primary(primary))
            }
            WalletOccupant::Linked { id, parent_id } => {
                let linked = self
                    .db
                    .get_linked(id)?
                    .ok_or_else(|| dangling(format!("wallet index points at missing linked {id}")))?;
                let parent = self.db.get_primary(parent_id)?.ok_or_else(|| {
                    dangling(format!("linked {id} has missing parent {parent_id}"))
                })?;
                Ok(Identity::Linked { linked, parent })
            }
        }
    }
}

fn dangling(msg: String) -> StoreError {
    StoreError::Corrupt(msg)
}
