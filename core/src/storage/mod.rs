//! # Storage Module
//!
//! sled-backed persistence for identities, wallet portfolios, usage
//! counters and transactions. Everything that more than one request can
//! touch at the same time lives behind [`GateDB`].
//!
//! ## Design Decisions
//!
//! 1. **One sled instance, many trees.** Each record type gets its own tree
//!    so prefix scans stay cheap and multi-tree transactions can span
//!    exactly the trees a write needs.
//!
//! 2. **Bincode on disk, JSON on the wire.** Records are stored with
//!    bincode; the node speaks JSON.
//!
//! 3. **Big-endian integers in keys.** Lexicographic order is numeric
//!    order, so a month's transactions sit next to each other.

pub mod db;

pub use db::{ClaimOutcome, DbResult, GateDB, LinkWrite, StoreError};
