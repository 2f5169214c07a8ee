/// BlackBook LMSR Market State Machine
/// Exports all modules for use as a library crate

pub mod codec;
pub mod config;
pub mod error;
pub mod lmsr;
pub mod market;
pub mod merkle;
pub mod oracle;
pub mod transition;

pub use codec::{sha256, ByteReader, Hash256};
pub use config::{MarketConfig, MarketLimits, DEFAULT_MAX_LIQUIDITY, DEFAULT_MAX_SHARES};
pub use error::{MarketError, Result};
pub use lmsr::{
    lmsr_cost, marginal_price_for, payout, pricing_table, required_collateral, trade_cost,
    verify_price_lookup, PriceLookup, PricingTable, SATS_PER_SHARE,
};
pub use market::{
    aggregate, find_entry, ledger_path, ledger_root, market_collateral, validate_entries, Balance,
    Entry, MarketDetails, MarketOutput, MarketState, MarketStatus, Outcome, PublicKey,
};
pub use merkle::{merkle_path, merkle_root, root_after_append, root_from_path, MerkleProof, MerkleTree, EMPTY_ROOT};
pub use oracle::{verify_verdict, MinerDetail, MinerRegistry, MinerSignature};
pub use transition::{
    apply_witness, authorization_digest, build_genesis, build_modify_position, build_open_position,
    build_redeem, build_resolve, is_valid_market_update_tx, is_valid_transition_tx, validate_market_tx,
    validate_transition, verify_witness, Authorizer, ContractVerifier, EncodedOutput, ReplayVerifier,
    Transition, TransitionKind, TransitionWitness,
};
