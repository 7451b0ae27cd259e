//! # Wallet Keys
//!
//! A [`WalletKey`] is a validated (address, chain) pair. It keeps the casing
//! the caller gave us for display, and derives a
//! normalized lookup key for the store, so `0xAbC…` and `0xabc…` on the same
//! chain land on the same identity.
//!
//! ```text
//! lookup key = lowercase(chain) ++ 0x00 ++ lowercase(address)
//! ```
//!
//! Neither half may contain a NUL byte (validation only admits a small ASCII
//! alphabet), so the separator can't be forged.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::{MAX_CHAIN_ID_LENGTH, MAX_WALLET_ADDRESS_LENGTH, MIN_WALLET_ADDRESS_LENGTH};
use crate::error::ValidationError;

const SEPARATOR: u8 = 0x00;

/// A validated wallet address on a specific chain.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WalletKey {
    address: String,
    chain: String,
}

impl WalletKey {
    /// Validates and wraps an address/chain pair. No lookups happen here.
    ///
    /// # Errors
    ///
    /// Any [`ValidationError`] describing what is wrong with the input.
    /// Whitespace is not trimmed: `" 0xabc"` is rejected, not corrected.
    pub fn parse(address: &str, chain: &str) -> Result<Self, ValidationError> {
        validate_address(address)?;
        validate_chain(chain)?;
        Ok(Self {
            address: address.to_string(),
            chain: chain.to_string(),
        })
    }

    /// The address exactly as supplied.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The chain identifier exactly as supplied.
    pub fn chain(&self) -> &str {
        &self.chain
    }

    /// Normalized store key. Case-insensitive on both halves.
    pub fn lookup_key(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(self.chain.len() + 1 + self.address.len());
        key.extend(self.chain.bytes().map(|b| b.to_ascii_lowercase()));
        key.push(SEPARATOR);
        key.extend(self.address.bytes().map(|b| b.to_ascii_lowercase()));
        key
    }

    /// True when both keys name the same wallet, ignoring case.
    pub fn same_wallet(&self, other: &WalletKey) -> bool {
        self.address.eq_ignore_ascii_case(&other.address)
            && self.chain.eq_ignore_ascii_case(&other.chain)
    }
}

impl fmt::Display for WalletKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.address, self.chain)
    }
}

fn validate_address(address: &str) -> Result<(), ValidationError> {
    if address.is_empty() {
        return Err(ValidationError::EmptyWallet);
    }
    if let Some(ch) = address
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':')))
    {
        return Err(ValidationError::WalletCharacter(ch));
    }
    // Safe to use byte length from here on: everything left is ASCII.
    let len = address.len();
    if !(MIN_WALLET_ADDRESS_LENGTH..=MAX_WALLET_ADDRESS_LENGTH).contains(&len) {
        return Err(ValidationError::WalletLength {
            len,
            min: MIN_WALLET_ADDRESS_LENGTH,
            max: MAX_WALLET_ADDRESS_LENGTH,
        });
    }
    Ok(())
}

fn validate_chain(chain: &str) -> Result<(), ValidationError> {
    if chain.is_empty() {
        return Err(ValidationError::EmptyChain);
    }
    if let Some(ch) = chain
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':')))
    {
        return Err(ValidationError::ChainCharacter(ch));
    }
    if chain.len() > MAX_CHAIN_ID_LENGTH {
        return Err(ValidationError::ChainLength {
            max: MAX_CHAIN_ID_LENGTH,
        });
    }
    Ok(())
}
