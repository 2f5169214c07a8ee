// ============================================================================
// Market Module - State Model & Balance Ledger
// ============================================================================
//
// The data a market commits to on chain:
//   - balance: share/liquidity positions and outcomes
//   - entry: participant entries and the Merkle ledger over them
//   - state: status, details, aggregate, ledger root, miner registry
//
// States are immutable snapshots. A transition reads one snapshot and
// produces a new one; nothing here mutates a state in place.
//
// ============================================================================

pub mod balance;
pub mod entry;
pub mod state;

pub use balance::*;
pub use entry::*;
pub use state::*;
