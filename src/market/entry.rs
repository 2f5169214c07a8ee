//! Ledger entries and the balance ledger built from them
//!
//! The ledger is the ordered list of entries; an entry's position is fixed
//! when it is appended and is its Merkle leaf index.

use ed25519_dalek::VerifyingKey;

use crate::codec::{sha256, ByteReader, Hash256};
use crate::error::{MarketError, Result};
use crate::merkle::{merkle_path, merkle_root, MerkleProof};

use super::balance::{Balance, BALANCE_LEN};

/// Participant identity
pub type PublicKey = VerifyingKey;

pub const PUBLIC_KEY_LEN: usize = 32;

/// Bytes of an encoded entry
pub const ENTRY_LEN: usize = PUBLIC_KEY_LEN + BALANCE_LEN;

pub fn read_public_key(reader: &mut ByteReader<'_>) -> Result<PublicKey> {
    let bytes: [u8; PUBLIC_KEY_LEN] = reader
        .read(PUBLIC_KEY_LEN)?
        .try_into()
        .map_err(|_| MarketError::format("Public key must be 32 bytes"))?;
    PublicKey::from_bytes(&bytes).map_err(|e| MarketError::format(format!("Invalid public key: {}", e)))
}

/// One participant's position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub balance: Balance,
    pub public_key: PublicKey,
}

impl Entry {
    pub fn new(public_key: PublicKey, balance: Balance) -> Self {
        Self { balance, public_key }
    }

    /// Wire form: public key || liquidity || shares for || shares against
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(ENTRY_LEN);
        out.extend_from_slice(self.public_key.as_bytes());
        out.extend(self.balance.to_bytes()?);
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);
        let public_key = read_public_key(&mut reader)?;
        let balance = Balance::read(&mut reader)?;
        reader.finish()?;
        Ok(Self { balance, public_key })
    }

    /// Merkle leaf of this entry
    pub fn leaf(&self) -> Result<Hash256> {
        Ok(sha256(&self.to_bytes()?))
    }

    pub fn is_owned_by(&self, public_key: &PublicKey) -> bool {
        self.public_key == *public_key
    }
}

// ============================================================================
// LEDGER FUNCTIONS
// ============================================================================

pub fn ledger_leaves(entries: &[Entry]) -> Result<Vec<Hash256>> {
    entries.iter().map(Entry::leaf).collect()
}

/// Merkle root over the entries in ledger order
pub fn ledger_root(entries: &[Entry]) -> Result<Hash256> {
    Ok(merkle_root(&ledger_leaves(entries)?))
}

/// Proof for the entry at `index`
pub fn ledger_path(entries: &[Entry], index: usize) -> Result<MerkleProof> {
    merkle_path(&ledger_leaves(entries)?, index)
}

/// Field-wise sum of every entry's balance
pub fn aggregate(entries: &[Entry]) -> Result<Balance> {
    entries
        .iter()
        .try_fold(Balance::zero(), |total, entry| total.checked_add(&entry.balance))
}

/// Check that a claimed aggregate equals the sum of the entries
pub fn validate_entries(balance: &Balance, entries: &[Entry]) -> Result<()> {
    let calculated = aggregate(entries)?;
    if calculated != *balance {
        return Err(MarketError::consistency(format!(
            "Market balance {:?} does not match entries {:?}",
            balance, calculated
        )));
    }
    Ok(())
}

/// Ledger position of the entry owned by `public_key`
pub fn find_entry(entries: &[Entry], public_key: &PublicKey) -> Result<usize> {
    entries
        .iter()
        .position(|entry| entry.is_owned_by(public_key))
        .ok_or_else(|| {
            MarketError::identity(format!("No entry for public key {}", hex::encode(public_key.as_bytes())))
        })
}

/// Fail if `public_key` already owns an entry
pub fn ensure_absent(entries: &[Entry], public_key: &PublicKey) -> Result<()> {
    if entries.iter().any(|entry| entry.is_owned_by(public_key)) {
        return Err(MarketError::identity(format!(
            "Public key {} already has an entry",
            hex::encode(public_key.as_bytes())
        )));
    }
    Ok(())
}
