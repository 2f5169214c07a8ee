//! Error taxonomy for market state transitions.
//!
//! Every rejection is final for the candidate transition. Callers look at the
//! variant to decide whether a corrected request is worth building.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarketError {
    /// Malformed wire bytes, hex or JSON
    #[error("Format error: {0}")]
    Format(String),

    /// Value above a configured maximum, or an index out of range
    #[error("Bounds error: {0}")]
    Bounds(String),

    /// Duplicate or missing participant identity
    #[error("Identity error: {0}")]
    Identity(String),

    /// Invalid signature or oracle threshold not met
    #[error("Authorization error: {0}")]
    Authorization(String),

    /// Claimed root, balance or collateral disagrees with recomputation
    #[error("Consistency error: {0}")]
    Consistency(String),
}

impl MarketError {
    pub fn format(msg: impl Into<String>) -> Self {
        MarketError::Format(msg.into())
    }

    pub fn bounds(msg: impl Into<String>) -> Self {
        MarketError::Bounds(msg.into())
    }

    pub fn identity(msg: impl Into<String>) -> Self {
        MarketError::Identity(msg.into())
    }

    pub fn authorization(msg: impl Into<String>) -> Self {
        MarketError::Authorization(msg.into())
    }

    pub fn consistency(msg: impl Into<String>) -> Self {
        MarketError::Consistency(msg.into())
    }

    /// Short name of the error kind, used in log fields
    pub fn kind(&self) -> &'static str {
        match self {
            MarketError::Format(_) => "format",
            MarketError::Bounds(_) => "bounds",
            MarketError::Identity(_) => "identity",
            MarketError::Authorization(_) => "authorization",
            MarketError::Consistency(_) => "consistency",
        }
    }
}

pub type Result<T> = std::result::Result<T, MarketError>;
