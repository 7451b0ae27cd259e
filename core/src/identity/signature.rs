//! Wallet ownership proofs.
//!
//! Registration requires the caller to sign a canonical message with the
//! wallet's key. Linking requires two signatures over one message that names
//! both wallets, one from the owner and one from the wallet being linked. Which signature scheme that means depends
//! on the chain, so verification sits behind [`SignatureVerifier`].
//!
//! [`Ed25519Verifier`] covers chains whose addresses *are* Ed25519 public
//! keys (Solana and friends: base58 or hex). Chains we can't verify locally
//! get [`SignatureError::UnsupportedChain`]; deployments that prove
//! ownership upstream (a wallet-connect gateway, say) can plug in
//! [`UpstreamVerified`] instead.

use ed25519_dalek::{Signature, VerifyingKey, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
use std::collections::BTreeSet;
use thiserror::Error;

use super::wallet::WalletKey;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("no signature scheme configured for chain {0:?}")]
    UnsupportedChain(String),

    #[error("wallet address is not a valid public key")]
    InvalidPublicKey,

    #[error("signature is not valid hex or base58 of the right length")]
    InvalidSignatureEncoding,

    #[error("signature does not match wallet")]
    VerificationFailed,
}

/// Checks that `signature` over `message` was produced by `wallet`'s key.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, wallet: &WalletKey, message: &[u8], signature: &str)
        -> Result<(), SignatureError>;
}

/// The message a wallet signs to prove ownership for `action`
/// (`"register"`, `"link"`).
///
/// Chain and address are lowercased so the message doesn't depend on how
/// the caller happened to case them.
pub fn ownership_message(action: &str, wallet: &WalletKey) -> Vec<u8> {
    format!(
        "tollgate:{}:{}:{}",
        action,
        wallet.chain().to_ascii_lowercase(),
        wallet.address().to_ascii_lowercase()
    )
    .into_bytes()
}

/// The message both sides sign to link `wallet` under `owner`.
///
/// Naming both wallets stops a signature from one link request being
/// replayed to attach the same wallet to a different owner.
pub fn link_message(owner: &WalletKey, wallet: &WalletKey) -> Vec<u8> {
    format!(
        "tollgate:link:{}:{}:{}:{}",
        owner.chain().to_ascii_lowercase(),
        owner.address().to_ascii_lowercase(),
        wallet.chain().to_ascii_lowercase(),
        wallet.address().to_ascii_lowercase()
    )
    .into_bytes()
}

// ---------------------------------------------------------------------------
// Ed25519
// ---------------------------------------------------------------------------

/// Verifies Ed25519 signatures for chains whose address is the public key.
#[derive(Debug, Clone)]
pub struct Ed25519Verifier {
    chains: BTreeSet<String>,
}

impl Ed25519Verifier {
    pub fn new<I, S>(chains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            chains: chains
                .into_iter()
                .map(|c| c.as_ref().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn supports(&self, chain: &str) -> bool {
        self.chains.contains(&chain.to_ascii_lowercase())
    }
}

impl Default for Ed25519Verifier {
    fn default() -> Self {
        Self::new(["solana", "solana-devnet", "aptos", "sui"])
    }
}

impl SignatureVerifier for Ed25519Verifier {
    fn verify(
        &self,
        wallet: &WalletKey,
        message: &[u8],
        signature: &str,
    ) -> Result<(), SignatureError> {
        if !self.supports(wallet.chain()) {
            return Err(SignatureError::UnsupportedChain(wallet.chain().to_string()));
        }

        let key_bytes: [u8; PUBLIC_KEY_LENGTH] = decode_fixed(wallet.address())
            .ok_or(SignatureError::InvalidPublicKey)?;
        let verifying_key =
            VerifyingKey::from_bytes(&key_bytes).map_err(|_| SignatureError::InvalidPublicKey)?;

        let sig_bytes: [u8; SIGNATURE_LENGTH] =
            decode_fixed(signature).ok_or(SignatureError::InvalidSignatureEncoding)?;
        let signature = Signature::from_bytes(&sig_bytes);

        verifying_key
            .verify_strict(message, &signature)
            .map_err(|_| SignatureError::VerificationFailed)
    }
}

/// Hex (optionally `0x`-prefixed) first, then base58.
fn decode_fixed<const N: usize>(s: &str) -> Option<[u8; N]> {
    let stripped = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if stripped.len() == N * 2 {
        if let Ok(bytes) = hex::decode(stripped) {
            return bytes.try_into().ok();
        }
    }
    bs58::decode(s).into_vec().ok()?.try_into().ok()
}

// ---------------------------------------------------------------------------
// Upstream
// ---------------------------------------------------------------------------

/// Accepts every signature. Only for deployments where ownership has
/// already been proven before the request reaches us.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpstreamVerified;

impl SignatureVerifier for UpstreamVerified {
    fn verify(&self, _: &WalletKey, _: &[u8], _: &str) -> Result<(), SignatureError> {
        Ok(())
    }
}
