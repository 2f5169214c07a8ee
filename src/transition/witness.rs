//! Unlocking witnesses for the four market transitions
//!
//! Field order follows the contract's function arguments; the selector byte
//! that picks the contract function comes last. Fixed-width fields are
//! written bare, variable ones (proofs, optional entries, signature lists)
//! carry a 2-byte length prefix.

use ed25519_dalek::Signature;

use crate::codec::{encode_uint, write_var, ByteReader};
use crate::error::{MarketError, Result};
use crate::lmsr::COLLATERAL_WIDTH;
use crate::market::{read_public_key, Balance, Entry, Outcome, PublicKey};
use crate::merkle::MerkleProof;
use crate::oracle::{signatures_from_bytes, signatures_to_bytes, MinerSignature, SIGNATURE_LEN};

/// Contract function selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransitionKind {
    OpenPosition = 0,
    ModifyPosition = 1,
    Redeem = 2,
    Resolve = 3,
}

impl TransitionKind {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(TransitionKind::OpenPosition),
            1 => Some(TransitionKind::ModifyPosition),
            2 => Some(TransitionKind::Redeem),
            3 => Some(TransitionKind::Resolve),
            _ => None,
        }
    }

    /// Name of the contract function
    pub fn name(&self) -> &'static str {
        match self {
            TransitionKind::OpenPosition => "addEntry",
            TransitionKind::ModifyPosition => "updateEntry",
            TransitionKind::Redeem => "redeem",
            TransitionKind::Resolve => "decide",
        }
    }

    /// Selector of an encoded witness
    pub fn of_witness_bytes(bytes: &[u8]) -> Result<Self> {
        let selector = *bytes
            .last()
            .ok_or_else(|| MarketError::format("Empty witness"))?;
        Self::from_u8(selector)
            .ok_or_else(|| MarketError::format(format!("Unknown function selector {}", selector)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenPositionWitness {
    pub entry: Entry,
    /// Collateral for the new aggregate, as committed in the pricing table
    pub new_collateral: u64,
    pub price_proof: MerkleProof,
    /// Current last entry and its path, `None` for an empty ledger
    pub last_entry: Option<Entry>,
    pub last_path: MerkleProof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyPositionWitness {
    pub new_balance: Balance,
    pub old_balance: Balance,
    pub public_key: PublicKey,
    pub signature: Signature,
    pub new_collateral: u64,
    pub price_proof: MerkleProof,
    pub path: MerkleProof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedeemWitness {
    pub old_balance: Balance,
    pub public_key: PublicKey,
    pub signature: Signature,
    pub path: MerkleProof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveWitness {
    pub outcome: Outcome,
    pub signatures: Vec<MinerSignature>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionWitness {
    OpenPosition(OpenPositionWitness),
    ModifyPosition(ModifyPositionWitness),
    Redeem(RedeemWitness),
    Resolve(ResolveWitness),
}

fn read_signature(reader: &mut ByteReader<'_>) -> Result<Signature> {
    let bytes: [u8; SIGNATURE_LEN] = reader
        .read(SIGNATURE_LEN)?
        .try_into()
        .map_err(|_| MarketError::format("Signature must be 64 bytes"))?;
    Ok(Signature::from_bytes(&bytes))
}

impl TransitionWitness {
    pub fn kind(&self) -> TransitionKind {
        match self {
            TransitionWitness::OpenPosition(_) => TransitionKind::OpenPosition,
            TransitionWitness::ModifyPosition(_) => TransitionKind::ModifyPosition,
            TransitionWitness::Redeem(_) => TransitionKind::Redeem,
            TransitionWitness::Resolve(_) => TransitionKind::Resolve,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        match self {
            TransitionWitness::OpenPosition(w) => {
                out.extend(w.entry.balance.to_bytes()?);
                out.extend_from_slice(w.entry.public_key.as_bytes());
                out.extend(encode_uint(w.new_collateral, COLLATERAL_WIDTH)?);
                write_var(&mut out, &w.price_proof.to_bytes())?;
                let last_entry = match &w.last_entry {
                    Some(entry) => entry.to_bytes()?,
                    None => Vec::new(),
                };
                write_var(&mut out, &last_entry)?;
                write_var(&mut out, &w.last_path.to_bytes())?;
            }
            TransitionWitness::ModifyPosition(w) => {
                out.extend(w.new_balance.to_bytes()?);
                out.extend(w.old_balance.to_bytes()?);
                out.extend_from_slice(w.public_key.as_bytes());
                out.extend_from_slice(&w.signature.to_bytes());
                out.extend(encode_uint(w.new_collateral, COLLATERAL_WIDTH)?);
                write_var(&mut out, &w.price_proof.to_bytes())?;
                write_var(&mut out, &w.path.to_bytes())?;
            }
            TransitionWitness::Redeem(w) => {
                out.extend(w.old_balance.to_bytes()?);
                out.extend_from_slice(w.public_key.as_bytes());
                out.extend_from_slice(&w.signature.to_bytes());
                write_var(&mut out, &w.path.to_bytes())?;
            }
            TransitionWitness::Resolve(w) => {
                out.push(w.outcome.as_u8());
                write_var(&mut out, &signatures_to_bytes(&w.signatures)?)?;
            }
        }
        out.push(self.kind().as_u8());
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let kind = TransitionKind::of_witness_bytes(bytes)?;
        let mut reader = ByteReader::new(&bytes[..bytes.len() - 1]);

        let witness = match kind {
            TransitionKind::OpenPosition => {
                let balance = Balance::read(&mut reader)?;
                let public_key = read_public_key(&mut reader)?;
                let new_collateral = reader.read_uint(COLLATERAL_WIDTH)?;
                let price_proof = MerkleProof::from_bytes(reader.read_var()?)?;
                let last_entry = match reader.read_var()? {
                    [] => None,
                    entry => Some(Entry::from_bytes(entry)?),
                };
                let last_path = MerkleProof::from_bytes(reader.read_var()?)?;
                TransitionWitness::OpenPosition(OpenPositionWitness {
                    entry: Entry::new(public_key, balance),
                    new_collateral,
                    price_proof,
                    last_entry,
                    last_path,
                })
            }
            TransitionKind::ModifyPosition => TransitionWitness::ModifyPosition(ModifyPositionWitness {
                new_balance: Balance::read(&mut reader)?,
                old_balance: Balance::read(&mut reader)?,
                public_key: read_public_key(&mut reader)?,
                signature: read_signature(&mut reader)?,
                new_collateral: reader.read_uint(COLLATERAL_WIDTH)?,
                price_proof: MerkleProof::from_bytes(reader.read_var()?)?,
                path: MerkleProof::from_bytes(reader.read_var()?)?,
            }),
            TransitionKind::Redeem => TransitionWitness::Redeem(RedeemWitness {
                old_balance: Balance::read(&mut reader)?,
                public_key: read_public_key(&mut reader)?,
                signature: read_signature(&mut reader)?,
                path: MerkleProof::from_bytes(reader.read_var()?)?,
            }),
            TransitionKind::Resolve => {
                let decision = reader.read_u8()?;
                let outcome = Outcome::from_u8(decision)
                    .ok_or_else(|| MarketError::format(format!("Invalid decision {}", decision)))?;
                let signatures = signatures_from_bytes(reader.read_var()?)?;
                TransitionWitness::Resolve(ResolveWitness { outcome, signatures })
            }
        };

        reader.finish()?;
        Ok(witness)
    }
}
