//! The committed market state and its wire encoding
//!
//! Layout:
//!
//! ```text
//! decided(1) decision(1) | liquidity(1) for(1) against(1) | balance root(32)
//!   | details length(2) details json | miner count(1) (key(32) votes(2))*
//! ```

use serde::{Deserialize, Serialize};

use crate::codec::{decode_json_field, encode_json_field, sha256, write_var, ByteReader, Hash256};
use crate::config::{MarketLimits, WIRE_FIELD_MAX};
use crate::error::{MarketError, Result};
use crate::lmsr::{payout, required_collateral};
use crate::oracle::MinerRegistry;

use super::balance::{Balance, Outcome};
use super::entry::{aggregate, Entry};

pub const STATUS_LEN: usize = 2;

// ============================================================================
// STATUS
// ============================================================================

/// Open until an oracle verdict decides it; decided is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketStatus {
    Open,
    Decided(Outcome),
}

impl MarketStatus {
    pub fn is_decided(&self) -> bool {
        matches!(self, MarketStatus::Decided(_))
    }

    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            MarketStatus::Open => None,
            MarketStatus::Decided(outcome) => Some(*outcome),
        }
    }

    pub fn to_bytes(&self) -> [u8; STATUS_LEN] {
        match self {
            MarketStatus::Open => [0, 0],
            MarketStatus::Decided(outcome) => [1, outcome.as_u8()],
        }
    }

    pub fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        let decided = reader.read_u8()?;
        let decision = reader.read_u8()?;
        match (decided, decision) {
            (0, 0) => Ok(MarketStatus::Open),
            (1, d) => Outcome::from_u8(d)
                .map(MarketStatus::Decided)
                .ok_or_else(|| MarketError::format(format!("Invalid decision byte {}", d))),
            (decided, decision) => Err(MarketError::format(format!(
                "Invalid market status bytes {:02x}{:02x}",
                decided, decision
            ))),
        }
    }
}

// ============================================================================
// DETAILS
// ============================================================================

/// Market configuration, immutable after creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MarketDetails {
    /// Where the oracle publishes the outcome
    pub resolve: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_liquidity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_shares: Option<u32>,
}

impl MarketDetails {
    pub fn new(resolve: impl Into<String>) -> Self {
        Self {
            resolve: resolve.into(),
            max_liquidity: None,
            max_shares: None,
        }
    }

    pub fn with_limits(mut self, max_liquidity: u32, max_shares: u32) -> Self {
        self.max_liquidity = Some(max_liquidity);
        self.max_shares = Some(max_shares);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.resolve.trim().is_empty() {
            return Err(MarketError::format("Market details need a resolve endpoint"));
        }
        for max in [self.max_liquidity, self.max_shares].into_iter().flatten() {
            if max > WIRE_FIELD_MAX {
                return Err(MarketError::bounds(format!(
                    "Market maximum {} exceeds wire maximum {}",
                    max, WIRE_FIELD_MAX
                )));
            }
        }
        Ok(())
    }

    /// Limits this market runs with
    pub fn limits(&self, defaults: &MarketLimits) -> MarketLimits {
        defaults.effective(self.max_liquidity, self.max_shares)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encode_json_field(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        decode_json_field(bytes)
    }
}

// ============================================================================
// MARKET STATE
// ============================================================================

/// Everything committed in the market output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketState {
    pub status: MarketStatus,
    pub details: MarketDetails,
    /// Aggregate of all entry balances (informational once decided)
    pub balance: Balance,
    pub balance_root: Hash256,
    pub miners: MinerRegistry,
}

impl MarketState {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.status.to_bytes());
        out.extend(self.balance.to_bytes()?);
        out.extend_from_slice(self.balance_root.as_bytes());
        write_var(&mut out, &self.details.to_bytes()?)?;
        out.extend(self.miners.to_bytes()?);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);
        let status = MarketStatus::read(&mut reader)?;
        let balance = Balance::read(&mut reader)?;
        let balance_root = reader.read_hash()?;
        let details = MarketDetails::from_bytes(reader.read_var()?)?;
        let miners = MinerRegistry::read(&mut reader)?;
        reader.finish()?;
        Ok(Self { status, details, balance, balance_root, miners })
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        Self::decode(&crate::codec::from_hex(s)?)
    }

    pub fn to_hex(&self) -> Result<String> {
        Ok(crate::codec::to_hex(&self.encode()?))
    }

    /// Hash of the encoded state
    pub fn hash(&self) -> Result<Hash256> {
        Ok(sha256(&self.encode()?))
    }

    pub fn limits(&self, defaults: &MarketLimits) -> MarketLimits {
        self.details.limits(defaults)
    }

    /// Structural and bound invariants. The status and root are well formed
    /// by construction; the rest is checked here.
    pub fn validate(&self, defaults: &MarketLimits) -> Result<()> {
        self.details.validate()?;
        self.balance.check_limits(&self.limits(defaults))?;
        self.miners.validate()?;
        Ok(())
    }

    pub fn is_valid(&self, defaults: &MarketLimits) -> bool {
        self.validate(defaults).is_ok()
    }
}

/// A market state together with the value locked in its output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketOutput {
    pub state: MarketState,
    pub collateral: u64,
}

/// Collateral the market must hold for these entries
///
/// Open markets are priced by LMSR over the aggregate; decided markets only
/// owe the outstanding winning shares.
pub fn market_collateral(status: &MarketStatus, entries: &[Entry]) -> Result<u64> {
    match status {
        MarketStatus::Open => required_collateral(&aggregate(entries)?),
        MarketStatus::Decided(outcome) => {
            let winning: u32 = entries.iter().map(|e| e.balance.shares_on(*outcome)).sum();
            Ok(payout(winning))
        }
    }
}
