//! Transaction records and the monthly volume window.
//!
//! Volume is not a stored counter. Each transaction is appended under
//! `identity ++ period ++ txn_id`; the current volume is a prefix scan over
//! one identity's month, summing the amounts of succeeded transactions.
//! Failed and pending ones are kept for the record but never count.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome reported by the payment side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Succeeded,
    Failed,
    Pending,
}

impl TransactionStatus {
    /// Only succeeded transactions count toward volume.
    pub fn counts_toward_volume(&self) -> bool {
        matches!(self, TransactionStatus::Succeeded)
    }
}

/// One transaction as stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: Uuid,
    /// Billing identity the amount is charged against.
    pub identity_id: Uuid,
    /// Minor currency units.
    pub amount: u64,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn new(identity_id: Uuid, amount: u64, status: TransactionStatus, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            identity_id,
            amount,
            status,
            created_at: at,
        }
    }
}

/// Sums the amounts that count toward volume, saturating at `u64::MAX`.
pub fn succeeded_volume<'a, I>(records: I) -> u64
where
    I: IntoIterator<Item = &'a TransactionRecord>,
{
    records
        .into_iter()
        .filter(|r| r.status.counts_toward_volume())
        .fold(0u64, |acc, r| acc.saturating_add(r.amount))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_succeeded_counts() {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let records = vec![
            TransactionRecord::new(id, 500, TransactionStatus::Succeeded, now),
            TransactionRecord::new(id, 700, TransactionStatus::Failed, now),
            TransactionRecord::new(id, 900, TransactionStatus::Pending, now),
            TransactionRecord::new(id, 250, TransactionStatus::Succeeded, now),
        ];
        assert_eq!(succeeded_volume(&records), 750);
    }

    #[test]
    fn volume_saturates() {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let records = vec![
            TransactionRecord::new(id, u64::MAX, TransactionStatus::Succeeded, now),
            TransactionRecord::new(id, 1, TransactionStatus::Succeeded, now),
        ];
        assert_eq!(succeeded_volume(&records), u64::MAX);
    }

    #[test]
    fn status_uses_snake_case_on_the_wire() {
        let json = serde_json::to_string(&TransactionStatus::Succeeded).unwrap();
        assert_eq!(json, "\"succeeded\"");
    }
}
