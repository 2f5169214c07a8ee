// ============================================================================
// Transition Module - Builders & Validators
// ============================================================================
//
// Every market change is one of four transitions:
//
//   OpenPosition   (addEntry)     Open     append an entry
//   ModifyPosition (updateEntry)  Open     owner rewrites their entry
//   Redeem         (redeem)       Decided  owner cashes out winning shares
//   Resolve        (decide)       Open     miners sign the outcome
//
//   Open ──Resolve──▶ Decided (terminal)
//
// Builders take an immutable snapshot (previous output + entries) and return
// the next output with the witness the contract expects. Validators replay
// the contract's checks from a claimed transition so anyone can reject a bad
// one before the ledger does.
//
// Components:
//   - witness: per-transition witness types and their wire codec
//   - builder: genesis and the four transition builders
//   - validator: witness replay, market tx checks, external verifier seam
//
// ============================================================================

pub mod builder;
pub mod validator;
pub mod witness;

pub use builder::*;
pub use validator::*;
pub use witness::*;

use ed25519_dalek::{Signature, Signer, SigningKey};
use sha2::{Digest, Sha256};

use crate::codec::Hash256;
use crate::error::Result;
use crate::market::{MarketOutput, PublicKey};

/// Domain tag for owner authorizations
const AUTHORIZATION_TAG: &[u8] = b"blackbook-market-transition";

/// A proposed market transition: the claimed next output and its witness
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub output: MarketOutput,
    pub witness: TransitionWitness,
}

impl Transition {
    pub fn kind(&self) -> TransitionKind {
        self.witness.kind()
    }
}

/// Signs transitions on behalf of an entry owner
///
/// The core never holds keys; callers hand in whatever signs for them.
pub trait Authorizer {
    fn public_key(&self) -> PublicKey;

    fn sign_digest(&self, digest: &Hash256) -> Signature;
}

impl Authorizer for SigningKey {
    fn public_key(&self) -> PublicKey {
        self.verifying_key()
    }

    fn sign_digest(&self, digest: &Hash256) -> Signature {
        self.sign(digest.as_bytes())
    }
}

/// Digest an owner signs to authorize moving `prev` to `next`
///
/// Covers both full outputs so the signature cannot be replayed on another
/// market state or with a different collateral amount.
pub fn authorization_digest(prev: &MarketOutput, next: &MarketOutput) -> Result<Hash256> {
    let mut hasher = Sha256::new();
    hasher.update(AUTHORIZATION_TAG);
    hasher.update(prev.state.encode()?);
    hasher.update(prev.collateral.to_le_bytes());
    hasher.update(next.state.encode()?);
    hasher.update(next.collateral.to_le_bytes());
    Ok(Hash256(hasher.finalize().into()))
}
