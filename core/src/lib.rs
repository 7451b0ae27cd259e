// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Tollgate: Core Library
//!
//! Tollgate sits in front of a metered API whose callers have no username,
//! no password and no API key: just a wallet address and the chain it lives
//! on. From that pair we work out who is paying, what they are paying for,
//! and whether this particular request still fits inside what they paid for.
//!
//! ## Architecture
//!
//! - **identity**: Primary/Linked wallet identities, resolution, registration
//!   and ownership proofs.
//! - **plan**: The plan catalogue (free, basic, pro, enterprise, or whatever
//!   the operator loads from JSON).
//! - **entitlement**: Effective plan + limits + trial state, recomputed on
//!   every request.
//! - **usage**: Monthly query counters and the transaction volume window.
//! - **gate**: The allow/deny checkpoint in front of every metered call.
//! - **portfolio**: Linking extra wallets under an owner, within plan limits.
//! - **billing**: Applying subscription changes pushed by the payment side.
//! - **storage**: sled-backed persistence with atomic counters.
//! - **service**: [`Tollgate`], the facade that wires all of the above.
//! - **config**: Constants and tunables.
//!
//! ## Request Pipeline
//!
//! ```text
//! (wallet, chain) → resolve → entitlement → usage read → gate
//!                                                        │
//!                                  allow ──► operation ──► record usage
//!                                  deny  ──► structured reason code
//! ```
//!
//! The only shared mutable state is in the store. Everything above it is
//! stateless and safe to run from as many threads as you like.

pub mod billing;
pub mod clock;
pub mod config;
pub mod entitlement;
pub mod error;
pub mod gate;
pub mod identity;
pub mod plan;
pub mod portfolio;
pub mod service;
pub mod storage;
pub mod usage;

pub use error::{ErrorCode, GateError, GateResult, ValidationError};
pub use service::Tollgate;
