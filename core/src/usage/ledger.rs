//! The usage ledger.
//!
//! Counters only go up. `record_query` is a single atomic
//! insert-or-increment in the store, so N concurrent calls leave the counter
//! at exactly N more than where it started. There is no read-then-write
//! anywhere on this path.

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use super::period::Period;
use super::transactions::{TransactionRecord, TransactionStatus};
use crate::error::{GateResult, ValidationError};
use crate::storage::GateDB;

/// Reads and writes usage for billing identities.
#[derive(Debug, Clone)]
pub struct UsageLedger {
    db: GateDB,
}

impl UsageLedger {
    pub fn new(db: GateDB) -> Self {
        Self { db }
    }

    /// Counts one query against `identity_id` in `period` and returns the
    /// new total.
    pub fn record_query(&self, identity_id: Uuid, period: Period) -> GateResult<u64> {
        let used = self.db.increment_usage(identity_id, period)?;
        debug!(%identity_id, %period, used, "query recorded");
        Ok(used)
    }

    /// Queries used so far in `period`. Zero when nothing was recorded.
    pub fn get_usage(&self, identity_id: Uuid, period: Period) -> GateResult<u64> {
        Ok(self.db.get_usage(identity_id, period)?)
    }

    /// Appends a transaction to the month bucket containing `at`.
    ///
    /// # Errors
    ///
    /// [`ValidationError::ZeroAmount`] for a zero amount; storage errors
    /// otherwise.
    pub fn record_transaction(
        &self,
        identity_id: Uuid,
        amount: u64,
        status: TransactionStatus,
        at: DateTime<Utc>,
    ) -> GateResult<TransactionRecord> {
        if amount == 0 {
            return Err(ValidationError::ZeroAmount.into());
        }
        let record = TransactionRecord::new(identity_id, amount, status, at);
        let period = Period::containing(at);
        self.db.put_transaction(period, &record)?;
        debug!(%identity_id, %period, amount, ?status, txn_id = %record.id, "transaction recorded");
        Ok(record)
    }

    /// Sum of succeeded transaction amounts in `period`, computed fresh.
    pub fn current_volume(&self, identity_id: Uuid, period: Period) -> GateResult<u64> {
        Ok(self.db.succeeded_volume(identity_id, period)?)
    }

    pub fn transactions(&self, identity_id: Uuid, period: Period) -> GateResult<Vec<TransactionRecord>> {
        Ok(self.db.transactions_in(identity_id, period)?)
    }
}
