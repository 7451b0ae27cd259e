//! Calendar-month billing periods.
//!
//! There is no rollover job. A period is just `(year, month)` baked into the
//! store key, so the first query of a new month lands on a fresh key and
//! starts counting from zero on its own.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Encoded width of a period inside store keys: year (4B BE) ++ month (1B).
pub const PERIOD_KEY_LEN: usize = 5;

/// A UTC calendar month.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    year: i32,
    month: u32,
}

impl Period {
    /// # Errors
    ///
    /// [`ValidationError::InvalidPeriod`] unless `month` is 1..=12 and `year`
    /// is 1..=9999.
    pub fn new(year: i32, month: u32) -> Result<Self, ValidationError> {
        if !(1..=12).contains(&month) || !(1..=9999).contains(&year) {
            return Err(ValidationError::InvalidPeriod { year, month });
        }
        Ok(Self { year, month })
    }

    /// The month `now` falls in.
    pub fn containing(now: DateTime<Utc>) -> Self {
        Self {
            year: now.year(),
            month: now.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// Big-endian so lexicographic key order is chronological order.
    pub fn key_bytes(&self) -> [u8; PERIOD_KEY_LEN] {
        let y = self.year.to_be_bytes();
        [y[0], y[1], y[2], y[3], self.month as u8]
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for Period {
    type Err = ValidationError;

    /// Parses `YYYY-MM`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = ValidationError::InvalidPeriod { year: 0, month: 0 };
        let (y, m) = s.split_once('-').ok_or(invalid.clone())?;
        let year: i32 = y.parse().map_err(|_| invalid.clone())?;
        let month: u32 = m.parse().map_err(|_| invalid)?;
        Self::new(year, month)
    }
}
