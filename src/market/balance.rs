//! Share and liquidity balances

use serde::{Deserialize, Serialize};

use crate::codec::{encode_uint, ByteReader};
use crate::config::MarketLimits;
use crate::error::{MarketError, Result};

/// Bytes of an encoded balance: liquidity, shares for, shares against
pub const BALANCE_LEN: usize = 3;

/// Which side of the binary market won
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Outcome {
    Against = 0,
    For = 1,
}

impl Outcome {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Outcome::Against),
            1 => Some(Outcome::For),
            _ => None,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Outcome::Against => Outcome::For,
            Outcome::For => Outcome::Against,
        }
    }
}

/// A participant's (or the whole market's) position
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Balance {
    pub liquidity: u32,
    pub shares_for: u32,
    pub shares_against: u32,
}

impl Balance {
    pub const fn new(liquidity: u32, shares_for: u32, shares_against: u32) -> Self {
        Self { liquidity, shares_for, shares_against }
    }

    pub const fn zero() -> Self {
        Self::new(0, 0, 0)
    }

    /// Shares held on one side
    pub fn shares_on(&self, outcome: Outcome) -> u32 {
        match outcome {
            Outcome::For => self.shares_for,
            Outcome::Against => self.shares_against,
        }
    }

    /// Same liquidity, both share fields cleared
    pub fn without_shares(&self) -> Self {
        Self::new(self.liquidity, 0, 0)
    }

    pub fn checked_add(&self, other: &Balance) -> Result<Balance> {
        let add = |a: u32, b: u32| {
            a.checked_add(b)
                .ok_or_else(|| MarketError::bounds("Aggregate balance overflow"))
        };
        Ok(Balance {
            liquidity: add(self.liquidity, other.liquidity)?,
            shares_for: add(self.shares_for, other.shares_for)?,
            shares_against: add(self.shares_against, other.shares_against)?,
        })
    }

    pub fn checked_sub(&self, other: &Balance) -> Result<Balance> {
        let sub = |a: u32, b: u32| {
            a.checked_sub(b)
                .ok_or_else(|| MarketError::consistency("Balance would go negative"))
        };
        Ok(Balance {
            liquidity: sub(self.liquidity, other.liquidity)?,
            shares_for: sub(self.shares_for, other.shares_for)?,
            shares_against: sub(self.shares_against, other.shares_against)?,
        })
    }

    /// Reject any field above the limits; values are never clamped
    pub fn check_limits(&self, limits: &MarketLimits) -> Result<()> {
        if self.liquidity > limits.max_liquidity {
            return Err(MarketError::bounds(format!(
                "Liquidity {} exceeds maximum {}",
                self.liquidity, limits.max_liquidity
            )));
        }
        if self.shares_for > limits.max_shares || self.shares_against > limits.max_shares {
            return Err(MarketError::bounds(format!(
                "Shares ({}, {}) exceed maximum {}",
                self.shares_for, self.shares_against, limits.max_shares
            )));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(BALANCE_LEN);
        out.extend(encode_uint(self.liquidity as u64, 1)?);
        out.extend(encode_uint(self.shares_for as u64, 1)?);
        out.extend(encode_uint(self.shares_against as u64, 1)?);
        Ok(out)
    }

    pub fn read(reader: &mut ByteReader<'_>) -> Result<Self> {
        Ok(Self::new(
            reader.read_u8()? as u32,
            reader.read_u8()? as u32,
            reader.read_u8()? as u32,
        ))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);
        let balance = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_bytes() {
        let balance = Balance::new(1, 2, 255);
        assert_eq!(balance.to_bytes().unwrap(), vec![1, 2, 255]);
        assert_eq!(Balance::from_bytes(&[1, 2, 255]).unwrap(), balance);
        assert!(Balance::from_bytes(&[1, 2]).is_err());
        assert!(Balance::from_bytes(&[1, 2, 3, 4]).is_err());
    }

    #[test]
    fn test_wide_balance_does_not_encode() {
        let balance = Balance::new(0, 256, 0);
        assert!(matches!(balance.to_bytes(), Err(MarketError::Bounds(_))));
    }

    #[test]
    fn test_check_limits() {
        let limits = MarketLimits::new(2, 5).unwrap();
        assert!(Balance::new(2, 5, 5).check_limits(&limits).is_ok());
        assert!(Balance::new(3, 0, 0).check_limits(&limits).is_err());
        assert!(Balance::new(0, 0, 6).check_limits(&limits).is_err());
    }

    #[test]
    fn test_shares_on_outcome() {
        let balance = Balance::new(1, 4, 9);
        assert_eq!(balance.shares_on(Outcome::For), 4);
        assert_eq!(balance.shares_on(Outcome::Against), 9);
        assert_eq!(balance.without_shares(), Balance::new(1, 0, 0));
        assert_eq!(Outcome::For.opposite(), Outcome::Against);
        assert_eq!(Outcome::from_u8(2), None);
    }
}
