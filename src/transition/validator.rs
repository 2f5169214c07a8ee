//! Transition validation
//!
//! `verify_witness` replays what the on-chain contract checks, using only
//! the previous output, the claimed next output and the witness: paths are
//! checked against the committed roots, never against a full ledger.
//! `validate_market_tx` then checks the claimed next output against the
//! full entry list for callers that track it.

use ed25519_dalek::Verifier;

use crate::codec::Hash256;
use crate::config::{MarketConfig, MarketLimits};
use crate::error::{MarketError, Result};
use crate::lmsr::{payout, verify_price_lookup, PricingTable};
use crate::market::{
    ensure_absent, find_entry, ledger_root, market_collateral, validate_entries, Balance, Entry,
    MarketOutput, MarketState, MarketStatus, PublicKey,
};
use crate::merkle::{root_after_append, root_from_path, verify_path, MerkleProof, EMPTY_ROOT};
use crate::oracle::check_verdict;

use super::builder::check_table;
use super::{authorization_digest, Transition, TransitionWitness};

// ============================================================================
// WITNESS REPLAY
// ============================================================================

fn expect_root(actual: &Hash256, expected: &Hash256, what: &str) -> Result<()> {
    if actual != expected {
        return Err(MarketError::consistency(format!(
            "{} root {} does not match {}",
            what, actual, expected
        )));
    }
    Ok(())
}

fn expect_balance(actual: &Balance, expected: &Balance) -> Result<()> {
    if actual != expected {
        return Err(MarketError::consistency(format!(
            "Aggregate balance {:?}, expected {:?}",
            actual, expected
        )));
    }
    Ok(())
}

fn expect_open(state: &MarketState) -> Result<()> {
    if state.status != MarketStatus::Open {
        return Err(MarketError::consistency("Market is already decided"));
    }
    Ok(())
}

/// Previous leaf must sit under the previous root
fn check_leaf(root: &Hash256, entry: &Entry, path: &MerkleProof) -> Result<()> {
    if !verify_path(root, &entry.leaf()?, path) {
        return Err(MarketError::consistency(format!(
            "Entry {} is not in the ledger along a {}-node path",
            hex::encode(entry.public_key.as_bytes()),
            path.nodes.len()
        )));
    }
    Ok(())
}

/// Claimed collateral must be committed in the pricing table and covered
fn check_price(table: &PricingTable, next: &MarketOutput, collateral: u64, proof: &MerkleProof) -> Result<()> {
    if !verify_price_lookup(&table.root(), &next.state.balance, collateral, proof) {
        return Err(MarketError::consistency(format!(
            "Collateral {} is not the table price of {:?}",
            collateral, next.state.balance
        )));
    }
    if collateral > next.collateral {
        return Err(MarketError::consistency(format!(
            "Output holds {} but the market needs {}",
            next.collateral, collateral
        )));
    }
    tracing::debug!(collateral, balance = ?next.state.balance, "Price proof accepted");
    Ok(())
}

fn check_owner_signature(
    public_key: &PublicKey,
    signature: &ed25519_dalek::Signature,
    prev: &MarketOutput,
    next: &MarketOutput,
) -> Result<()> {
    let digest = authorization_digest(prev, next)?;
    public_key
        .verify(digest.as_bytes(), signature)
        .map_err(|_| MarketError::authorization("Owner signature does not cover this transition"))
}

/// Replay the contract checks for `tx` applied to `prev`
pub fn verify_witness(
    prev: &MarketOutput,
    tx: &Transition,
    config: &MarketConfig,
    table: &PricingTable,
) -> Result<()> {
    let defaults = &config.default_limits;
    let next = &tx.output;
    prev.state.validate(defaults)?;
    next.state.validate(defaults)?;

    if next.state.details != prev.state.details {
        return Err(MarketError::consistency("Market details cannot change"));
    }
    if next.state.miners != prev.state.miners {
        return Err(MarketError::consistency("Miner registry cannot change"));
    }

    match &tx.witness {
        TransitionWitness::OpenPosition(w) => {
            expect_open(&prev.state)?;
            expect_open(&next.state)?;
            check_table(table, &prev.state.limits(defaults))?;

            let last = match &w.last_entry {
                Some(entry) => {
                    check_leaf(&prev.state.balance_root, entry, &w.last_path)?;
                    Some(entry.leaf()?)
                }
                None => {
                    expect_root(&prev.state.balance_root, &EMPTY_ROOT, "Previous")?;
                    None
                }
            };
            let root = root_after_append(last.as_ref().map(|leaf| (leaf, &w.last_path)), &w.entry.leaf()?)?;
            expect_root(&next.state.balance_root, &root, "New")?;
            expect_balance(&next.state.balance, &prev.state.balance.checked_add(&w.entry.balance)?)?;
            check_price(table, next, w.new_collateral, &w.price_proof)?;
        }
        TransitionWitness::ModifyPosition(w) => {
            expect_open(&prev.state)?;
            expect_open(&next.state)?;
            check_table(table, &prev.state.limits(defaults))?;

            check_leaf(&prev.state.balance_root, &Entry::new(w.public_key, w.old_balance), &w.path)?;
            let root = root_from_path(&Entry::new(w.public_key, w.new_balance).leaf()?, &w.path);
            expect_root(&next.state.balance_root, &root, "New")?;
            let expected = prev
                .state
                .balance
                .checked_sub(&w.old_balance)?
                .checked_add(&w.new_balance)?;
            expect_balance(&next.state.balance, &expected)?;
            check_owner_signature(&w.public_key, &w.signature, prev, next)?;
            check_price(table, next, w.new_collateral, &w.price_proof)?;
        }
        TransitionWitness::Redeem(w) => {
            let outcome = prev
                .state
                .status
                .outcome()
                .ok_or_else(|| MarketError::consistency("Market is not decided yet"))?;
            if next.state.status != prev.state.status {
                return Err(MarketError::consistency("Decided status cannot change"));
            }

            check_leaf(&prev.state.balance_root, &Entry::new(w.public_key, w.old_balance), &w.path)?;
            let cleared = Entry::new(w.public_key, w.old_balance.without_shares());
            expect_root(&next.state.balance_root, &root_from_path(&cleared.leaf()?, &w.path), "New")?;
            expect_balance(&next.state.balance, &prev.state.balance)?;

            let redeemed = payout(w.old_balance.shares_on(outcome));
            let remaining = prev.collateral.checked_sub(redeemed).ok_or_else(|| {
                MarketError::consistency(format!(
                    "Market holds {} but owes {} for this redemption",
                    prev.collateral, redeemed
                ))
            })?;
            if next.collateral < remaining {
                return Err(MarketError::consistency(format!(
                    "Redemption of {} leaves {}, output holds {}",
                    redeemed, remaining, next.collateral
                )));
            }
            check_owner_signature(&w.public_key, &w.signature, prev, next)?;
        }
        TransitionWitness::Resolve(w) => {
            expect_open(&prev.state)?;
            if next.state.status != MarketStatus::Decided(w.outcome) {
                return Err(MarketError::consistency(format!(
                    "Resolved status {:?} does not record outcome {:?}",
                    next.state.status, w.outcome
                )));
            }
            expect_root(&next.state.balance_root, &prev.state.balance_root, "Resolved")?;
            expect_balance(&next.state.balance, &prev.state.balance)?;
            if next.collateral != prev.collateral {
                return Err(MarketError::consistency("Resolution cannot move collateral"));
            }
            check_verdict(&prev.state.miners, &prev.state.details, w.outcome, &w.signatures)?;
        }
    }
    Ok(())
}

// ============================================================================
// LEDGER FOLLOWING
// ============================================================================

fn owned_position(entries: &[Entry], public_key: &PublicKey, old_balance: &Balance, path: &MerkleProof) -> Result<usize> {
    let index = find_entry(entries, public_key)?;
    if entries[index].balance != *old_balance {
        return Err(MarketError::consistency(format!(
            "Entry holds {:?}, witness claims {:?}",
            entries[index].balance, old_balance
        )));
    }
    if path.index() != Some(index) {
        return Err(MarketError::consistency(format!(
            "Path points at position {:?}, entry is at {}",
            path.index(),
            index
        )));
    }
    Ok(index)
}

/// Entries after applying a witness to `prev_entries`
pub fn apply_witness(prev_entries: &[Entry], witness: &TransitionWitness) -> Result<Vec<Entry>> {
    let mut entries = prev_entries.to_vec();
    match witness {
        TransitionWitness::OpenPosition(w) => {
            ensure_absent(&entries, &w.entry.public_key)?;
            entries.push(w.entry);
        }
        TransitionWitness::ModifyPosition(w) => {
            let index = owned_position(&entries, &w.public_key, &w.old_balance, &w.path)?;
            entries[index].balance = w.new_balance;
        }
        TransitionWitness::Redeem(w) => {
            let index = owned_position(&entries, &w.public_key, &w.old_balance, &w.path)?;
            entries[index].balance = w.old_balance.without_shares();
        }
        TransitionWitness::Resolve(_) => {}
    }
    Ok(entries)
}

// ============================================================================
// MARKET TX CHECKS
// ============================================================================

/// Check an output against the full entry list
pub fn validate_market_tx(output: &MarketOutput, entries: &[Entry], defaults: &MarketLimits) -> Result<()> {
    output.state.validate(defaults)?;
    expect_root(&output.state.balance_root, &ledger_root(entries)?, "Committed")?;
    if output.state.status == MarketStatus::Open {
        validate_entries(&output.state.balance, entries)?;
    }
    let required = market_collateral(&output.state.status, entries)?;
    if required > output.collateral {
        return Err(MarketError::consistency(format!(
            "Output holds {} but the market needs {}",
            output.collateral, required
        )));
    }
    Ok(())
}

/// Full check of a transition; returns the entries it leads to
pub fn validate_transition(
    prev: &MarketOutput,
    prev_entries: &[Entry],
    tx: &Transition,
    config: &MarketConfig,
    table: &PricingTable,
) -> Result<Vec<Entry>> {
    validate_market_tx(prev, prev_entries, &config.default_limits)?;
    verify_witness(prev, tx, config, table)?;
    let entries = apply_witness(prev_entries, &tx.witness)?;
    validate_market_tx(&tx.output, &entries, &config.default_limits)?;
    Ok(entries)
}

/// True when `tx` is a valid transition from `prev` leading to `new_entries`
pub fn is_valid_transition_tx(
    prev: &MarketOutput,
    prev_entries: &[Entry],
    tx: &Transition,
    new_entries: &[Entry],
    config: &MarketConfig,
    table: &PricingTable,
) -> bool {
    match validate_transition(prev, prev_entries, tx, config, table) {
        Ok(entries) if entries == new_entries => true,
        Ok(_) => {
            tracing::warn!(kind = tx.kind().name(), "Rejected transition: entries differ from the witness");
            false
        }
        Err(e) => {
            tracing::warn!(kind = tx.kind().name(), error = %e, "Rejected transition");
            false
        }
    }
}

// ============================================================================
// EXTERNAL VERIFIER
// ============================================================================

/// A market output as the ledger carries it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedOutput {
    pub state: Vec<u8>,
    pub collateral: u64,
}

impl EncodedOutput {
    pub fn from_output(output: &MarketOutput) -> Result<Self> {
        Ok(Self {
            state: output.state.encode()?,
            collateral: output.collateral,
        })
    }

    pub fn decode(&self) -> Result<MarketOutput> {
        Ok(MarketOutput {
            state: MarketState::decode(&self.state)?,
            collateral: self.collateral,
        })
    }
}

/// Runs the market contract against a spending transaction
pub trait ContractVerifier {
    fn verify(&self, locking: &EncodedOutput, witness: &[u8], proposed: &EncodedOutput) -> bool;
}

/// Verifier that replays the contract in process
pub struct ReplayVerifier<'a> {
    pub config: &'a MarketConfig,
    pub table: &'a PricingTable,
}

impl<'a> ReplayVerifier<'a> {
    pub fn new(config: &'a MarketConfig, table: &'a PricingTable) -> Self {
        Self { config, table }
    }

    fn replay(&self, locking: &EncodedOutput, witness: &[u8], proposed: &EncodedOutput) -> Result<()> {
        let prev = locking.decode()?;
        let tx = Transition {
            output: proposed.decode()?,
            witness: TransitionWitness::from_bytes(witness)?,
        };
        verify_witness(&prev, &tx, self.config, self.table)
    }
}

impl ContractVerifier for ReplayVerifier<'_> {
    fn verify(&self, locking: &EncodedOutput, witness: &[u8], proposed: &EncodedOutput) -> bool {
        match self.replay(locking, witness, proposed) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Contract replay rejected witness");
                false
            }
        }
    }
}

/// External contract check and in-process validation must both pass
pub fn is_valid_market_update_tx<V: ContractVerifier + ?Sized>(
    verifier: &V,
    prev: &MarketOutput,
    prev_entries: &[Entry],
    tx: &Transition,
    new_entries: &[Entry],
    config: &MarketConfig,
    table: &PricingTable,
) -> bool {
    let encoded = EncodedOutput::from_output(prev)
        .and_then(|locking| Ok((locking, tx.witness.to_bytes()?, EncodedOutput::from_output(&tx.output)?)));
    let (locking, witness, proposed) = match encoded {
        Ok(parts) => parts,
        Err(e) => {
            tracing::warn!(error = %e, "Cannot encode transition for the contract");
            return false;
        }
    };
    if !verifier.verify(&locking, &witness, &proposed) {
        tracing::warn!(kind = tx.kind().name(), "Contract verifier rejected transition");
        return false;
    }
    is_valid_transition_tx(prev, prev_entries, tx, new_entries, config, table)
}
