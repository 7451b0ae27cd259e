//! # Plan Catalogue
//!
//! The static list of subscription tiers, keyed by name. Plans are data, not
//! code: the node can load a JSON catalogue at startup, and everything
//! downstream only ever asks "what are the limits of plan X".
//!
//! ## File Format
//!
//! ```json
//! {
//!   "free_plan": "free",
//!   "plans": [
//!     { "name": "free", "monthly_query_limit": 100, "max_wallets": 1,
//!       "txn_volume_limit": 100000, "price": 0 },
//!     { "name": "enterprise", "monthly_query_limit": 100000, "max_wallets": 25,
//!       "txn_volume_limit": null, "price": 29900 }
//!   ]
//! }
//! ```
//!
//! Amounts (`txn_volume_limit`, `price`) are in minor currency units (cents).
//! `null` volume means unlimited.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use crate::config::FREE_PLAN_NAME;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CatalogueError {
    #[error("catalogue has no plans")]
    Empty,

    #[error("duplicate plan name: {0}")]
    DuplicatePlan(String),

    #[error("free plan {0:?} missing from catalogue")]
    MissingFreePlan(String),

    #[error("failed to read catalogue: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse catalogue: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// A subscription tier.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Unique name; also the plan id used by the payment collaborator.
    pub name: String,
    /// Queries allowed per calendar month.
    pub monthly_query_limit: u64,
    /// Wallets allowed in total, *including* the primary.
    pub max_wallets: u32,
    /// Monthly successful-transaction volume cap in cents. `None` = unlimited.
    pub txn_volume_limit: Option<u64>,
    /// Monthly price in cents.
    pub price: u64,
}

impl Plan {
    pub fn new(
        name: &str,
        monthly_query_limit: u64,
        max_wallets: u32,
        txn_volume_limit: Option<u64>,
        price: u64,
    ) -> Self {
        Self {
            name: name.to_string(),
            monthly_query_limit,
            max_wallets,
            txn_volume_limit,
            price,
        }
    }

    /// How many wallets may be linked on top of the primary.
    pub fn linkable_wallets(&self) -> u32 {
        self.max_wallets.saturating_sub(1)
    }
}

// ---------------------------------------------------------------------------
// PlanCatalogue
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CatalogueFile {
    #[serde(default)]
    free_plan: Option<String>,
    plans: Vec<Plan>,
}

/// Plans keyed by lowercase name, plus the designated fallback plan.
#[derive(Clone, Debug)]
pub struct PlanCatalogue {
    plans: BTreeMap<String, Plan>,
    free_plan: String,
}

impl PlanCatalogue {
    /// Builds a catalogue, rejecting duplicates and a missing free plan.
    pub fn new(plans: Vec<Plan>, free_plan: &str) -> Result<Self, CatalogueError> {
        if plans.is_empty() {
            return Err(CatalogueError::Empty);
        }

        let mut map = BTreeMap::new();
        for plan in plans {
            let key = plan.name.to_ascii_lowercase();
            if map.contains_key(&key) {
                return Err(CatalogueError::DuplicatePlan(plan.name));
            }
            map.insert(key, plan);
        }

        let free_key = free_plan.to_ascii_lowercase();
        if !map.contains_key(&free_key) {
            return Err(CatalogueError::MissingFreePlan(free_plan.to_string()));
        }

        Ok(Self {
            plans: map,
            free_plan: free_key,
        })
    }

    /// The tiers Tollgate ships with.
    ///
    /// | Plan       | Queries/mo | Wallets | Txn volume/mo | Price/mo |
    /// |------------|-----------:|--------:|--------------:|---------:|
    /// | free       |        100 |       1 |        $1,000 |       $0 |
    /// | basic      |      1,000 |       3 |        $5,000 |      $19 |
    /// | pro        |     10,000 |       5 |       $20,000 |      $49 |
    /// | enterprise |    100,000 |      25 |     unlimited |     $299 |
    pub fn builtin() -> Self {
        let plans = [
            Plan::new(FREE_PLAN_NAME, 100, 1, Some(100_000), 0),
            Plan::new("basic", 1_000, 3, Some(500_000), 1_900),
            Plan::new("pro", 10_000, 5, Some(2_000_000), 4_900),
            Plan::new("enterprise", 100_000, 25, None, 29_900),
        ];
        Self {
            plans: plans.into_iter().map(|p| (p.name.clone(), p)).collect(),
            free_plan: FREE_PLAN_NAME.to_string(),
        }
    }

    /// Parses the JSON catalogue format described in the module docs.
    pub fn from_json_str(json: &str) -> Result<Self, CatalogueError> {
        let file: CatalogueFile =
            serde_json::from_str(json).map_err(|e| CatalogueError::Parse(e.to_string()))?;
        let free = file.free_plan.as_deref().unwrap_or(FREE_PLAN_NAME);
        Self::new(file.plans, free)
    }

    /// Reads and parses a JSON catalogue file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CatalogueError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Serializes back to the file format (used by `tollgate-node init`).
    pub fn to_json_pretty(&self) -> String {
        let value = serde_json::json!({
            "free_plan": self.free_plan,
            "plans": self.plans.values().collect::<Vec<_>>(),
        });
        serde_json::to_string_pretty(&value).unwrap_or_default()
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&Plan> {
        self.plans.get(&name.to_ascii_lowercase())
    }

    pub fn free_plan(&self) -> &Plan {
        // Presence checked in `new`.
        &self.plans[&self.free_plan]
    }

    pub fn is_free(&self, name: &str) -> bool {
        name.eq_ignore_ascii_case(&self.free_plan)
    }

    /// Plans ordered by price, cheapest first.
    pub fn plans(&self) -> Vec<&Plan> {
        let mut plans: Vec<&Plan> = self.plans.values().collect();
        plans.sort_by(|a, b| a.price.cmp(&b.price).then_with(|| a.name.cmp(&b.name)));
        plans
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

impl Default for PlanCatalogue {
    fn default() -> Self {
        Self::builtin()
    }
}
