//! # Identity Module
//!
//! Callers are known only by a wallet address and a chain. This module turns
//! that pair into somebody we can bill.
//!
//! 1. **WalletKey**: validated (address, chain) with a case-insensitive
//!    lookup key. Display casing is whatever the wallet registered with.
//! 2. **Primary / Linked**: a primary owns the subscription and the trial;
//!    a linked wallet borrows everything from exactly one primary.
//! 3. **Resolver**: wallet → identity, at most two index lookups.
//! 4. **Registry**: creates primaries and maintains their records.
//! 5. **Signature**: ownership proofs checked before anything is created.

pub mod registry;
pub mod resolver;
pub mod signature;
pub mod types;
pub mod wallet;

pub use registry::{IdentityRegistry, RegistrationOutcome};
pub use resolver::IdentityResolver;
pub use signature::{
    link_message, ownership_message, Ed25519Verifier, SignatureError, SignatureVerifier,
    UpstreamVerified,
};
pub use types::{
    Identity, LinkedIdentity, PrimaryIdentity, Subscription, TrialState, TrialStatus,
    WalletOccupant,
};
pub use wallet::WalletKey;
