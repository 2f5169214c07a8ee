// ============================================================================
// Oracle Verifier - Weighted Miner Verdicts
// ============================================================================
//
// A market is resolved by a verdict signed by registered miners. Each miner
// carries a vote weight fixed at market creation; a verdict is accepted when
// the miners whose signatures validate hold a strict majority of the total
// weight.
//
// Signatures cover the market details as well as the decision, so a verdict
// for one market cannot be replayed against another with the same miners.
//
// ============================================================================

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

use crate::codec::{encode_uint, ByteReader, Hash256};
use crate::error::{MarketError, Result};
use crate::market::{read_public_key, MarketDetails, Outcome, PublicKey, PUBLIC_KEY_LEN};

/// Domain tag for verdict messages
const VERDICT_TAG: &[u8] = b"blackbook-market-verdict";

/// Width of a miner's vote weight on the wire
pub const VOTES_WIDTH: usize = 2;

pub const SIGNATURE_LEN: usize = 64;

// ============================================================================
// MINER REGISTRY
// ============================================================================

/// A miner allowed to sign verdicts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinerDetail {
    pub public_key: PublicKey,
    pub votes: u16,
}

/// Ordered miner set fixed at market creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinerRegistry {
    miners: Vec<MinerDetail>,
}

impl MinerRegistry {
    pub fn new(miners: Vec<MinerDetail>) -> Result<Self> {
        let registry = Self { miners };
        registry.validate()?;
        Ok(registry)
    }

    /// Non-empty, positive weights, no repeated keys, count fits one byte
    pub fn validate(&self) -> Result<()> {
        if self.miners.is_empty() {
            return Err(MarketError::format("Miner registry is empty"));
        }
        if self.miners.len() > u8::MAX as usize {
            return Err(MarketError::bounds(format!("{} miners exceed maximum 255", self.miners.len())));
        }
        let mut seen = HashSet::new();
        for miner in &self.miners {
            if miner.votes == 0 {
                return Err(MarketError::format("Miner registered with zero votes"));
            }
            if !seen.insert(miner.public_key.to_bytes()) {
                return Err(MarketError::identity("Miner registered twice"));
            }
        }
        Ok(())
    }

    pub fn miners(&self) -> &[MinerDetail] {
        &self.miners
    }

    pub fn total_votes(&self) -> u32 {
        self.miners.iter().map(|m| m.votes as u32).sum()
    }

    /// Strict majority of the total weight
    pub fn threshold(&self) -> u32 {
        self.total_votes() / 2 + 1
    }

    pub fn votes_of(&self, public_key: &PublicKey) -> Option<u16> {
        self.miners
            .iter()
            .find(|m| m.public_key == *public_key)
            .map(|m| m.votes)
    }

    /// Wire form: count || (public key || votes)*
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = encode_uint(self.miners.len() as u64, 1)?;
        for miner in &self.miners {
            out.extend_from_slice(miner.public_key.as_bytes());
            out.extend(encode_uint(miner.votes as u64, VOTES_WIDTH)?);
        }
        Ok(out)
    }

    pub fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        let count = reader.read_u8()? as usize;
        let mut miners = Vec::with_capacity(count);
        for _ in 0..count {
            let public_key = read_public_key(reader)?;
            let votes = reader.read_uint(VOTES_WIDTH)? as u16;
            miners.push(MinerDetail { public_key, votes });
        }
        Self::new(miners)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);
        let registry = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(registry)
    }
}

// ============================================================================
// VERDICT SIGNATURES
// ============================================================================

/// One miner's signature over a verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MinerSignature {
    pub public_key: PublicKey,
    pub signature: Signature,
}

impl MinerSignature {
    /// Sign a verdict as a miner
    pub fn sign(signing_key: &SigningKey, details: &MarketDetails, outcome: Outcome) -> Result<Self> {
        let message = verdict_message(details, outcome)?;
        Ok(Self {
            public_key: signing_key.verifying_key(),
            signature: signing_key.sign(message.as_bytes()),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PUBLIC_KEY_LEN + SIGNATURE_LEN);
        out.extend_from_slice(self.public_key.as_bytes());
        out.extend_from_slice(&self.signature.to_bytes());
        out
    }

    pub fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        let public_key = read_public_key(reader)?;
        let sig_bytes: [u8; SIGNATURE_LEN] = reader
            .read(SIGNATURE_LEN)?
            .try_into()
            .map_err(|_| MarketError::format("Signature must be 64 bytes"))?;
        Ok(Self {
            public_key,
            signature: Signature::from_bytes(&sig_bytes),
        })
    }
}

/// Encode a signature list: count || (public key || signature)*
pub fn signatures_to_bytes(signatures: &[MinerSignature]) -> Result<Vec<u8>> {
    let mut out = encode_uint(signatures.len() as u64, 1)?;
    for signature in signatures {
        out.extend(signature.to_bytes());
    }
    Ok(out)
}

pub fn signatures_from_bytes(bytes: &[u8]) -> Result<Vec<MinerSignature>> {
    let mut reader = ByteReader::new(bytes);
    let count = reader.read_u8()? as usize;
    let signatures = (0..count)
        .map(|_| MinerSignature::read(&mut reader))
        .collect::<Result<Vec<_>>>()?;
    reader.finish()?;
    Ok(signatures)
}

/// Message miners sign for a verdict on this market
pub fn verdict_message(details: &MarketDetails, outcome: Outcome) -> Result<Hash256> {
    let mut hasher = Sha256::new();
    hasher.update(VERDICT_TAG);
    hasher.update(details.to_bytes()?);
    hasher.update([outcome.as_u8()]);
    Ok(Hash256(hasher.finalize().into()))
}

/// Vote weight behind a verdict
///
/// Each registered miner counts once. Signatures from unknown keys or that
/// fail verification add nothing; they do not abort the count.
pub fn verdict_weight(
    registry: &MinerRegistry,
    details: &MarketDetails,
    outcome: Outcome,
    signatures: &[MinerSignature],
) -> Result<u32> {
    let message = verdict_message(details, outcome)?;
    let mut counted = HashSet::new();
    let mut weight = 0u32;

    for sig in signatures {
        let votes = match registry.votes_of(&sig.public_key) {
            Some(votes) => votes,
            None => {
                tracing::debug!(miner = %hex::encode(sig.public_key.as_bytes()), "Ignoring unregistered miner");
                continue;
            }
        };
        if counted.contains(&sig.public_key.to_bytes()) {
            continue;
        }
        if sig.public_key.verify(message.as_bytes(), &sig.signature).is_err() {
            tracing::debug!(miner = %hex::encode(sig.public_key.as_bytes()), "Miner signature failed verification");
            continue;
        }
        counted.insert(sig.public_key.to_bytes());
        weight += votes as u32;
    }
    Ok(weight)
}

/// True when the verdict reaches the registry threshold
pub fn verify_verdict(
    registry: &MinerRegistry,
    details: &MarketDetails,
    outcome: Outcome,
    signatures: &[MinerSignature],
) -> bool {
    match verdict_weight(registry, details, outcome, signatures) {
        Ok(weight) => weight >= registry.threshold(),
        Err(_) => false,
    }
}

/// Like `verify_verdict`, with the shortfall in the error
pub fn check_verdict(
    registry: &MinerRegistry,
    details: &MarketDetails,
    outcome: Outcome,
    signatures: &[MinerSignature],
) -> Result<()> {
    let weight = verdict_weight(registry, details, outcome, signatures)?;
    if weight < registry.threshold() {
        return Err(MarketError::authorization(format!(
            "Verdict carries {} of {} votes, needs {}",
            weight,
            registry.total_votes(),
            registry.threshold()
        )));
    }
    Ok(())
}
