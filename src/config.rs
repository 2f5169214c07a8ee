//! Market configuration
//!
//! Limits are passed explicitly to every function that needs bounds. A
//! market's own details may override the defaults chosen here.

use serde::{Deserialize, Serialize};

use crate::error::{MarketError, Result};

/// Default maximum aggregate liquidity
pub const DEFAULT_MAX_LIQUIDITY: u32 = 10;

/// Default maximum aggregate shares per side
pub const DEFAULT_MAX_SHARES: u32 = 50;

/// Balance fields are one byte on the wire
pub const WIRE_FIELD_MAX: u32 = u8::MAX as u32;

/// Upper bounds for a market's aggregate balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketLimits {
    pub max_liquidity: u32,
    pub max_shares: u32,
}

impl MarketLimits {
    pub fn new(max_liquidity: u32, max_shares: u32) -> Result<Self> {
        let limits = Self { max_liquidity, max_shares };
        limits.validate()?;
        Ok(limits)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_liquidity > WIRE_FIELD_MAX || self.max_shares > WIRE_FIELD_MAX {
            return Err(MarketError::bounds(format!(
                "Limits ({}, {}) exceed wire maximum {}",
                self.max_liquidity, self.max_shares, WIRE_FIELD_MAX
            )));
        }
        Ok(())
    }

    /// Limits a market actually runs with: its own maxima, else these
    pub fn effective(&self, max_liquidity: Option<u32>, max_shares: Option<u32>) -> MarketLimits {
        MarketLimits {
            max_liquidity: max_liquidity.unwrap_or(self.max_liquidity),
            max_shares: max_shares.unwrap_or(self.max_shares),
        }
    }
}

impl Default for MarketLimits {
    fn default() -> Self {
        Self {
            max_liquidity: DEFAULT_MAX_LIQUIDITY,
            max_shares: DEFAULT_MAX_SHARES,
        }
    }
}

/// Top-level configuration for callers building transitions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Limits for markets whose details carry no maxima
    pub default_limits: MarketLimits,
}

impl MarketConfig {
    /// Load from the environment (and `.env` if present)
    ///
    /// Reads `MARKET_MAX_LIQUIDITY` and `MARKET_MAX_SHARES`; unset values
    /// fall back to the defaults.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = MarketLimits::default();
        let max_liquidity = read_var_u32(&lookup, "MARKET_MAX_LIQUIDITY")?.unwrap_or(defaults.max_liquidity);
        let max_shares = read_var_u32(&lookup, "MARKET_MAX_SHARES")?.unwrap_or(defaults.max_shares);

        let config = MarketConfig {
            default_limits: MarketLimits::new(max_liquidity, max_shares)?,
        };
        tracing::debug!(
            max_liquidity = config.default_limits.max_liquidity,
            max_shares = config.default_limits.max_shares,
            "Loaded market config"
        );
        Ok(config)
    }
}

fn read_var_u32<F>(lookup: &F, key: &str) -> Result<Option<u32>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|e| MarketError::format(format!("{}={:?} is not a number: {}", key, value, e))),
        None => Ok(None),
    }
}
