//! # GateDB: Persistent Storage Engine
//!
//! Every piece of shared mutable state in Tollgate lives here, on top of
//! sled's embedded key-value store. The request pipeline above this module
//! is stateless; correctness under concurrency comes from the three atomic
//! primitives sled gives us:
//!
//! - `update_and_fetch` for usage counters,
//! - `compare_and_swap` for read-modify-write of identity records,
//! - serializable multi-tree transactions for anything that must check and
//!   claim in one step (registration, linking).
//!
//! ## Tree Layout
//!
//! | Tree                 | Key                                  | Value                        |
//! |----------------------|--------------------------------------|------------------------------|
//! | `primary_identities` | `id` (16B)                           | `bincode(PrimaryIdentity)`   |
//! | `linked_identities`  | `id` (16B)                           | `bincode(LinkedIdentity)`    |
//! | `primary_wallets`    | wallet lookup key                    | primary `id` (16B)           |
//! | `linked_wallets`     | wallet lookup key                    | linked `id` ++ parent `id`   |
//! | `portfolio_links`    | parent `id` ++ linked `id`           | empty                        |
//! | `portfolio_counts`   | parent `id`                          | linked count (4B BE)         |
//! | `usage`              | `id` ++ year (4B BE) ++ month (1B)   | query count (8B BE)          |
//! | `transactions`       | `id` ++ year ++ month ++ txn `id`    | `bincode(TransactionRecord)` |
//!
//! The wallet lookup key is [`WalletKey::lookup_key`]: lowercased chain,
//! NUL, lowercased address. Both wallet index trees share that keyspace and
//! every write that claims a key checks *both* inside one transaction, so a
//! wallet is never Primary and Linked at the same time.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{
    ConflictableTransactionError, TransactionError, TransactionalTree,
};
use sled::{Db, IVec, Transactional, Tree};
use std::path::Path;
use uuid::Uuid;

use crate::identity::types::{LinkedIdentity, PrimaryIdentity, WalletOccupant};
use crate::identity::wallet::WalletKey;
use crate::usage::period::{Period, PERIOD_KEY_LEN};
use crate::usage::transactions::{succeeded_volume, TransactionRecord};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// Bytes on disk that cannot be what we wrote: wrong length, dangling
    /// reference, etc.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl From<TransactionError<StoreError>> for StoreError {
    fn from(e: TransactionError<StoreError>) -> Self {
        match e {
            TransactionError::Abort(inner) => inner,
            TransactionError::Storage(inner) => StoreError::Sled(inner),
        }
    }
}

pub type DbResult<T> = Result<T, StoreError>;

type TxResult<T> = Result<T, ConflictableTransactionError<StoreError>>;

// ---------------------------------------------------------------------------
// Write Outcomes
// ---------------------------------------------------------------------------

/// Result of trying to claim a wallet key for a new primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    Occupied(WalletOccupant),
}

/// Result of trying to link a wallet under a parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkWrite {
    Linked,
    Occupied(WalletOccupant),
    /// The parent already has `linked` wallets, which is the maximum allowed.
    LimitReached { linked: u32 },
}

// ---------------------------------------------------------------------------
// GateDB
// ---------------------------------------------------------------------------

/// Persistent storage for identities, portfolios and usage.
///
/// Cheap to clone: every handle points at the same sled instance, and sled
/// trees are safe for concurrent reads and writes without outside locking.
#[derive(Debug, Clone)]
pub struct GateDB {
    db: Db,
    primary_identities: Tree,
    linked_identities: Tree,
    primary_wallets: Tree,
    linked_wallets: Tree,
    portfolio_links: Tree,
    portfolio_counts: Tree,
    usage: Tree,
    transactions: Tree,
}

impl GateDB {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// In-memory database, removed on drop. For tests and benches.
    pub fn open_temporary() -> DbResult<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        Ok(Self {
            primary_identities: db.open_tree("primary_identities")?,
            linked_identities: db.open_tree("linked_identities")?,
            primary_wallets: db.open_tree("primary_wallets")?,
            linked_wallets: db.open_tree("linked_wallets")?,
            portfolio_links: db.open_tree("portfolio_links")?,
            portfolio_counts: db.open_tree("portfolio_counts")?,
            usage: db.open_tree("usage")?,
            transactions: db.open_tree("transactions")?,
            db,
        })
    }

    // -- Identity reads -----------------------------------------------------

    pub fn get_primary(&self, id: Uuid) -> DbResult<Option<PrimaryIdentity>> {
        get_record(&self.primary_identities, id.as_bytes())
    }

    pub fn get_linked(&self, id: Uuid) -> DbResult<Option<LinkedIdentity>> {
        get_record(&self.linked_identities, id.as_bytes())
    }

    /// Who holds `wallet`, checking the primary index first.
    pub fn find_occupant(&self, wallet: &WalletKey) -> DbResult<Option<WalletOccupant>> {
        let key = wallet.lookup_key();
        if let Some(bytes) = self.primary_wallets.get(&key)? {
            return Ok(Some(WalletOccupant::Primary(decode_uuid(&bytes)?)));
        }
        match self.linked_wallets.get(&key)? {
            Some(bytes) => Ok(Some(decode_linked_index(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Linked identities under `parent_id`, in key order.
    pub fn linked_of(&self, parent_id: Uuid) -> DbResult<Vec<LinkedIdentity>> {
        let mut out = Vec::new();
        for entry in self.portfolio_links.scan_prefix(parent_id.as_bytes()) {
            let (key, _) = entry?;
            let linked_id = decode_uuid(&key[16..])?;
            let linked = self.get_linked(linked_id)?.ok_or_else(|| {
                StoreError::Corrupt(format!("portfolio link to missing identity {linked_id}"))
            })?;
            out.push(linked);
        }
        Ok(out)
    }

    pub fn linked_count(&self, parent_id: Uuid) -> DbResult<u32> {
        match self.portfolio_counts.get(parent_id.as_bytes())? {
            Some(bytes) => decode_u32(&bytes),
            None => Ok(0),
        }
    }

    // -- Identity writes ----------------------------------------------------

    /// Stores `primary` under `wallet` if neither index already holds it.
    pub fn insert_primary(
        &self,
        wallet: &WalletKey,
        primary: &PrimaryIdentity,
    ) -> DbResult<ClaimOutcome> {
        let key = wallet.lookup_key();
        let record = encode(primary)?;
        let id = primary.id;

        let outcome = (
            &self.primary_wallets,
            &self.linked_wallets,
            &self.primary_identities,
        )
            .transaction(|(primary_wallets, linked_wallets, identities)| -> TxResult<ClaimOutcome> {
                if let Some(occupant) = tx_occupant(primary_wallets, linked_wallets, &key)? {
                    return Ok(ClaimOutcome::Occupied(occupant));
                }
                primary_wallets.insert(key.as_slice(), id.as_bytes().as_slice())?;
                identities.insert(id.as_bytes().as_slice(), record.as_slice())?;
                Ok(ClaimOutcome::Claimed)
            })?;
        Ok(outcome)
    }

    /// Links `linked` under its parent in one serializable step: occupancy
    /// check, limit check against `max_linked`, then every index write.
    pub fn insert_linked(
        &self,
        wallet: &WalletKey,
        linked: &LinkedIdentity,
        max_linked: u32,
    ) -> DbResult<LinkWrite> {
        let key = wallet.lookup_key();
        let record = encode(linked)?;
        let parent = linked.parent_id;
        let mut index_value = Vec::with_capacity(32);
        index_value.extend_from_slice(linked.id.as_bytes());
        index_value.extend_from_slice(parent.as_bytes());
        let mut link_key = Vec::with_capacity(32);
        link_key.extend_from_slice(parent.as_bytes());
        link_key.extend_from_slice(linked.id.as_bytes());

        let outcome = (
            &self.primary_wallets,
            &self.linked_wallets,
            &self.linked_identities,
            &self.portfolio_links,
            &self.portfolio_counts,
        )
            .transaction(
                |(primary_wallets, linked_wallets, identities, links, counts)| -> TxResult<LinkWrite> {
                    if let Some(occupant) = tx_occupant(primary_wallets, linked_wallets, &key)? {
                        return Ok(LinkWrite::Occupied(occupant));
                    }

                    let current = match counts.get(parent.as_bytes())? {
                        Some(bytes) => decode_u32(&bytes).map_err(ConflictableTransactionError::Abort)?,
                        None => 0,
                    };
                    if current.saturating_add(1) > max_linked {
                        return Ok(LinkWrite::LimitReached { linked: current });
                    }

                    linked_wallets.insert(key.as_slice(), index_value.as_slice())?;
                    identities.insert(linked.id.as_bytes().as_slice(), record.as_slice())?;
                    links.insert(link_key.as_slice(), &[] as &[u8])?;
                    counts.insert(parent.as_bytes().as_slice(), (current + 1).to_be_bytes().to_vec())?;
                    Ok(LinkWrite::Linked)
                },
            )?;
        Ok(outcome)
    }

    /// Read-modify-write of a primary via compare-and-swap, retried until
    /// no concurrent writer interferes. `f` returns `false` to leave the
    /// record untouched. Returns the record as it stands afterwards, or
    /// `None` if it doesn't exist.
    pub fn update_primary<F>(&self, id: Uuid, f: F) -> DbResult<Option<PrimaryIdentity>>
    where
        F: FnMut(&mut PrimaryIdentity) -> bool,
    {
        update_record(&self.primary_identities, id.as_bytes(), f)
    }

    /// Same as [`GateDB::update_primary`] for linked identities.
    pub fn update_linked<F>(&self, id: Uuid, f: F) -> DbResult<Option<LinkedIdentity>>
    where
        F: FnMut(&mut LinkedIdentity) -> bool,
    {
        update_record(&self.linked_identities, id.as_bytes(), f)
    }

    // -- Usage --------------------------------------------------------------

    /// Atomically bumps the query counter and returns the new value. An
    /// absent counter starts at zero.
    ///
    /// A counter that doesn't decode is left untouched and reported as
    /// [`StoreError::Corrupt`], same as [`GateDB::get_usage`].
    pub fn increment_usage(&self, identity_id: Uuid, period: Period) -> DbResult<u64> {
        let key = period_key(identity_id, period);
        let updated = self.usage.update_and_fetch(key, |old| match old {
            None => Some(1u64.to_be_bytes().to_vec()),
            Some(bytes) => match decode_u64(bytes) {
                Ok(current) => Some(current.saturating_add(1).to_be_bytes().to_vec()),
                Err(_) => Some(bytes.to_vec()),
            },
        })?;
        match updated {
            Some(bytes) => decode_u64(&bytes),
            None => Err(StoreError::Corrupt("usage counter vanished during update".into())),
        }
    }

    pub fn get_usage(&self, identity_id: Uuid, period: Period) -> DbResult<u64> {
        match self.usage.get(period_key(identity_id, period))? {
            Some(bytes) => decode_u64(&bytes),
            None => Ok(0),
        }
    }

    /// Overwrites a raw counter value.
    #[cfg(test)]
    pub(crate) fn put_raw_usage(&self, identity_id: Uuid, period: Period, bytes: &[u8]) {
        self.usage
            .insert(period_key(identity_id, period), bytes)
            .expect("raw usage write");
    }

    // -- Transactions -------------------------------------------------------

    pub fn put_transaction(&self, period: Period, record: &TransactionRecord) -> DbResult<()> {
        let mut key = period_key(record.identity_id, period).to_vec();
        key.extend_from_slice(record.id.as_bytes());
        self.transactions.insert(key, encode(record)?)?;
        Ok(())
    }

    /// All transactions of one identity in one month.
    pub fn transactions_in(
        &self,
        identity_id: Uuid,
        period: Period,
    ) -> DbResult<Vec<TransactionRecord>> {
        let prefix = period_key(identity_id, period);
        let mut out = Vec::new();
        for entry in self.transactions.scan_prefix(prefix) {
            let (_, value) = entry?;
            out.push(decode(&value)?);
        }
        Ok(out)
    }

    /// Sum of succeeded amounts in the month. Recomputed on every call.
    pub fn succeeded_volume(&self, identity_id: Uuid, period: Period) -> DbResult<u64> {
        let records = self.transactions_in(identity_id, period)?;
        Ok(succeeded_volume(&records))
    }

    // -- Utility ------------------------------------------------------------

    pub fn primary_count(&self) -> usize {
        self.primary_identities.len()
    }

    pub fn linked_total(&self) -> usize {
        self.linked_identities.len()
    }

    /// Blocks until every pending write is durable.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn encode<T: Serialize>(value: &T) -> DbResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn get_record<T: DeserializeOwned>(tree: &Tree, key: &[u8]) -> DbResult<Option<T>> {
    match tree.get(key)? {
        Some(bytes) => Ok(Some(decode(&bytes)?)),
        None => Ok(None),
    }
}

fn update_record<T, F>(tree: &Tree, key: &[u8], mut f: F) -> DbResult<Option<T>>
where
    T: Serialize + DeserializeOwned,
    F: FnMut(&mut T) -> bool,
{
    loop {
        let Some(old) = tree.get(key)? else {
            return Ok(None);
        };
        let mut record: T = decode(&old)?;
        if !f(&mut record) {
            return Ok(Some(record));
        }
        let new = encode(&record)?;
        match tree.compare_and_swap(key, Some(&old), Some(new))? {
            Ok(()) => return Ok(Some(record)),
            Err(_) => continue,
        }
    }
}

fn tx_occupant(
    primary_wallets: &TransactionalTree,
    linked_wallets: &TransactionalTree,
    key: &[u8],
) -> TxResult<Option<WalletOccupant>> {
    if let Some(bytes) = primary_wallets.get(key)? {
        let id = decode_uuid(&bytes).map_err(ConflictableTransactionError::Abort)?;
        return Ok(Some(WalletOccupant::Primary(id)));
    }
    match linked_wallets.get(key)? {
        Some(bytes) => Ok(Some(
            decode_linked_index(&bytes).map_err(ConflictableTransactionError::Abort)?,
        )),
        None => Ok(None),
    }
}

fn period_key(identity_id: Uuid, period: Period) -> [u8; 16 + PERIOD_KEY_LEN] {
    let mut key = [0u8; 16 + PERIOD_KEY_LEN];
    key[..16].copy_from_slice(identity_id.as_bytes());
    key[16..].copy_from_slice(&period.key_bytes());
    key
}

fn decode_uuid(bytes: &[u8]) -> DbResult<Uuid> {
    Uuid::from_slice(bytes).map_err(|_| StoreError::Corrupt(format!("bad id length {}", bytes.len())))
}

fn decode_linked_index(bytes: &IVec) -> DbResult<WalletOccupant> {
    if bytes.len() != 32 {
        return Err(StoreError::Corrupt(format!(
            "bad linked index length {}",
            bytes.len()
        )));
    }
    Ok(WalletOccupant::Linked {
        id: decode_uuid(&bytes[..16])?,
        parent_id: decode_uuid(&bytes[16..])?,
    })
}

fn decode_u32(bytes: &[u8]) -> DbResult<u32> {
    let arr: [u8; 4] = bytes
        .try_into()
        .map_err(|_| StoreError::Corrupt("invalid count bytes".to_string()))?;
    Ok(u32::from_be_bytes(arr))
}

fn decode_u64(bytes: &[u8]) -> DbResult<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| StoreError::Corrupt("invalid counter bytes".to_string()))?;
    Ok(u64::from_be_bytes(arr))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::transactions::TransactionStatus;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    // -- Helpers ------------------------------------------------------------

    fn key(addr: &str) -> WalletKey {
        WalletKey::parse(addr, "1").unwrap()
    }

    fn register(db: &GateDB, addr: &str) -> PrimaryIdentity {
        let primary = PrimaryIdentity::new(&key(addr), 500, Utc::now());
        assert_eq!(
            db.insert_primary(&key(addr), &primary).unwrap(),
            ClaimOutcome::Claimed
        );
        primary
    }

    fn link(db: &GateDB, parent: &PrimaryIdentity, addr: &str, max: u32) -> LinkWrite {
        let linked = LinkedIdentity::new(&key(addr), parent.id, "free", Utc::now());
        db.insert_linked(&key(addr), &linked, max).unwrap()
    }

    fn may() -> Period {
        Period::new(2026, 5).unwrap()
    }

    // -- Tests --------------------------------------------------------------

    #[test]
    fn open_temporary_database() {
        let db = GateDB::open_temporary().expect("should create temp db");
        assert_eq!(db.primary_count(), 0);
        assert_eq!(db.linked_total(), 0);
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let id = {
            let db = GateDB::open(dir.path()).unwrap();
            let p = register(&db, "0xpersist");
            db.increment_usage(p.id, may()).unwrap();
            db.flush().unwrap();
            p.id
        };

        let db = GateDB::open(dir.path()).unwrap();
        assert!(db.get_primary(id).unwrap().is_some());
        assert_eq!(db.get_usage(id, may()).unwrap(), 1);
    }

    #[test]
    fn primary_lookup_is_case_insensitive() {
        let db = GateDB::open_temporary().unwrap();
        let p = register(&db, "0xAbCdEf");
        assert_eq!(
            db.find_occupant(&key("0XABCDEF")).unwrap(),
            Some(WalletOccupant::Primary(p.id))
        );
        assert_eq!(db.find_occupant(&key("0xother")).unwrap(), None);
    }

    #[test]
    fn duplicate_primary_is_reported_not_overwritten() {
        let db = GateDB::open_temporary().unwrap();
        let first = register(&db, "0xdup");
        let second = PrimaryIdentity::new(&key("0xDUP"), 0, Utc::now());
        assert_eq!(
            db.insert_primary(&key("0xDUP"), &second).unwrap(),
            ClaimOutcome::Occupied(WalletOccupant::Primary(first.id))
        );
        assert_eq!(db.primary_count(), 1);
    }

    #[test]
    fn linked_wallet_cannot_become_primary() {
        let db = GateDB::open_temporary().unwrap();
        let owner = register(&db, "0xowner");
        assert_eq!(link(&db, &owner, "0xextra", 4), LinkWrite::Linked);

        let squatter = PrimaryIdentity::new(&key("0xextra"), 0, Utc::now());
        assert!(matches!(
            db.insert_primary(&key("0xextra"), &squatter).unwrap(),
            ClaimOutcome::Occupied(WalletOccupant::Linked { parent_id, .. }) if parent_id == owner.id
        ));
    }

    #[test]
    fn link_respects_limit_and_tracks_count() {
        let db = GateDB::open_temporary().unwrap();
        let owner = register(&db, "0xowner");

        assert_eq!(link(&db, &owner, "0xa01", 2), LinkWrite::Linked);
        assert_eq!(link(&db, &owner, "0xa02", 2), LinkWrite::Linked);
        assert_eq!(
            link(&db, &owner, "0xa03", 2),
            LinkWrite::LimitReached { linked: 2 }
        );

        assert_eq!(db.linked_count(owner.id).unwrap(), 2);
        let linked = db.linked_of(owner.id).unwrap();
        assert_eq!(linked.len(), 2);
        assert!(linked.iter().all(|l| l.parent_id == owner.id));
    }

    #[test]
    fn concurrent_links_never_overshoot() {
        let db = GateDB::open_temporary().unwrap();
        let owner = Arc::new(register(&db, "0xowner"));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let db = db.clone();
                let owner = Arc::clone(&owner);
                std::thread::spawn(move || link(&db, &owner, &format!("0xrace{i}"), 3))
            })
            .collect();

        let linked = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|w| *w == LinkWrite::Linked)
            .count();
        assert_eq!(linked, 3);
        assert_eq!(db.linked_count(owner.id).unwrap(), 3);
    }

    #[test]
    fn usage_counter_starts_at_zero_and_increments() {
        let db = GateDB::open_temporary().unwrap();
        let id = Uuid::new_v4();
        assert_eq!(db.get_usage(id, may()).unwrap(), 0);
        assert_eq!(db.increment_usage(id, may()).unwrap(), 1);
        assert_eq!(db.increment_usage(id, may()).unwrap(), 2);

        // Next month is a different key.
        let june = Period::new(2026, 6).unwrap();
        assert_eq!(db.get_usage(id, june).unwrap(), 0);
    }

    #[test]
    fn update_primary_applies_and_skips() {
        let db = GateDB::open_temporary().unwrap();
        let p = register(&db, "0xupdate");

        let updated = db
            .update_primary(p.id, |rec| {
                rec.trial.trial_used = true;
                true
            })
            .unwrap()
            .unwrap();
        assert!(updated.trial.trial_used);
        assert!(db.get_primary(p.id).unwrap().unwrap().trial.trial_used);

        assert!(db.update_primary(Uuid::new_v4(), |_| true).unwrap().is_none());
    }

    #[test]
    fn corrupt_counter_is_reported_not_reset() {
        let db = GateDB::open_temporary().unwrap();
        let id = Uuid::new_v4();
        db.put_raw_usage(id, may(), &[1, 2, 3]);

        assert!(matches!(db.increment_usage(id, may()), Err(StoreError::Corrupt(_))));
        assert!(matches!(db.get_usage(id, may()), Err(StoreError::Corrupt(_))));
        let raw = db.usage.get(period_key(id, may())).unwrap().unwrap();
        assert_eq!(&raw[..], &[1u8, 2, 3]);

        // Other months are unaffected.
        let june = Period::new(2026, 6).unwrap();
        assert_eq!(db.increment_usage(id, june).unwrap(), 1);
    }

    #[test]
    fn volume_is_bounded_to_identity_and_month() {
        let db = GateDB::open_temporary().unwrap();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let at = Utc.with_ymd_and_hms(2026, 5, 3, 0, 0, 0).unwrap();
        let june = Period::new(2026, 6).unwrap();

        for (who, amount, status, period) in [
            (alice, 1_000, TransactionStatus::Succeeded, may()),
            (alice, 2_000, TransactionStatus::Failed, may()),
            (alice, 4_000, TransactionStatus::Succeeded, june),
            (bob, 8_000, TransactionStatus::Succeeded, may()),
        ] {
            let rec = TransactionRecord::new(who, amount, status, at);
            db.put_transaction(period, &rec).unwrap();
        }

        assert_eq!(db.succeeded_volume(alice, may()).unwrap(), 1_000);
        assert_eq!(db.transactions_in(alice, may()).unwrap().len(), 2);
        assert_eq!(db.succeeded_volume(alice, june).unwrap(), 4_000);
        assert_eq!(db.succeeded_volume(bob, may()).unwrap(), 8_000);
    }
}
