//! Transition builders
//!
//! Each builder fails fast with the specific error kind so the caller can
//! decide whether a corrected request is worth retrying.

use crate::config::{MarketConfig, MarketLimits};
use crate::error::{MarketError, Result};
use crate::lmsr::{payout, PricingTable};
use crate::market::{
    aggregate, ensure_absent, find_entry, ledger_path, ledger_root, validate_entries, Balance, Entry,
    MarketDetails, MarketOutput, MarketState, MarketStatus, Outcome, PublicKey,
};
use crate::merkle::{root_after_append, root_from_path, MerkleProof};
use crate::oracle::{check_verdict, MinerRegistry, MinerSignature};

use super::{
    authorization_digest, Authorizer, ModifyPositionWitness, OpenPositionWitness, RedeemWitness,
    ResolveWitness, Transition, TransitionWitness,
};

// ============================================================================
// SNAPSHOT CHECKS
// ============================================================================

/// Validate the previous state and return the limits it runs with
fn snapshot_limits(prev: &MarketOutput, config: &MarketConfig) -> Result<MarketLimits> {
    prev.state.validate(&config.default_limits)?;
    Ok(prev.state.limits(&config.default_limits))
}

pub(crate) fn check_table(table: &PricingTable, limits: &MarketLimits) -> Result<()> {
    if table.limits() != *limits {
        return Err(MarketError::consistency(format!(
            "Pricing table built for {:?}, market runs with {:?}",
            table.limits(),
            limits
        )));
    }
    Ok(())
}

fn require_open(state: &MarketState) -> Result<()> {
    match state.status {
        MarketStatus::Open => Ok(()),
        MarketStatus::Decided(_) => Err(MarketError::consistency("Market is already decided")),
    }
}

fn check_ledger(prev: &MarketOutput, prev_entries: &[Entry]) -> Result<()> {
    let root = ledger_root(prev_entries)?;
    if root != prev.state.balance_root {
        return Err(MarketError::consistency(format!(
            "Entries hash to {}, market commits to {}",
            root, prev.state.balance_root
        )));
    }
    Ok(())
}

// ============================================================================
// GENESIS
// ============================================================================

/// Create a market whose only entry is the creator's liquidity
pub fn build_genesis(
    details: MarketDetails,
    miners: MinerRegistry,
    creator: PublicKey,
    liquidity: u32,
    config: &MarketConfig,
    table: &PricingTable,
) -> Result<(MarketOutput, Vec<Entry>)> {
    if liquidity == 0 {
        return Err(MarketError::bounds("Genesis liquidity must be positive"));
    }
    details.validate()?;
    let limits = details.limits(&config.default_limits);
    check_table(table, &limits)?;

    let entries = vec![Entry::new(creator, Balance::new(liquidity, 0, 0))];
    let balance = aggregate(&entries)?;
    let price = table.lookup(&balance)?;

    let state = MarketState {
        status: MarketStatus::Open,
        details,
        balance,
        balance_root: ledger_root(&entries)?,
        miners,
    };
    state.validate(&config.default_limits)?;

    tracing::info!(
        resolve = %state.details.resolve,
        liquidity,
        collateral = price.collateral,
        "Built market genesis"
    );
    Ok((MarketOutput { state, collateral: price.collateral }, entries))
}

// ============================================================================
// OPEN POSITION
// ============================================================================

/// Append a new participant's entry
pub fn build_open_position(
    prev: &MarketOutput,
    prev_entries: &[Entry],
    entry: Entry,
    config: &MarketConfig,
    table: &PricingTable,
) -> Result<Transition> {
    let limits = snapshot_limits(prev, config)?;
    require_open(&prev.state)?;
    check_table(table, &limits)?;
    check_ledger(prev, prev_entries)?;
    validate_entries(&prev.state.balance, prev_entries)?;
    ensure_absent(prev_entries, &entry.public_key)?;

    let new_balance = prev.state.balance.checked_add(&entry.balance)?;
    new_balance.check_limits(&limits)?;
    let price = table.lookup(&new_balance)?;

    let (last_entry, last_path) = match prev_entries.last() {
        Some(last) => (Some(*last), ledger_path(prev_entries, prev_entries.len() - 1)?),
        None => (None, MerkleProof::default()),
    };
    let last_leaf = last_entry.map(|e| e.leaf()).transpose()?;
    let new_root = root_after_append(last_leaf.as_ref().map(|leaf| (leaf, &last_path)), &entry.leaf()?)?;

    let mut state = prev.state.clone();
    state.balance = new_balance;
    state.balance_root = new_root;

    tracing::info!(
        position = prev_entries.len(),
        balance = ?entry.balance,
        collateral = price.collateral,
        "Built open-position transition"
    );
    Ok(Transition {
        output: MarketOutput { state, collateral: price.collateral },
        witness: TransitionWitness::OpenPosition(OpenPositionWitness {
            entry,
            new_collateral: price.collateral,
            price_proof: price.proof,
            last_entry,
            last_path,
        }),
    })
}

// ============================================================================
// MODIFY POSITION
// ============================================================================

/// Replace the caller's entry with `new_balance`
pub fn build_modify_position<A: Authorizer + ?Sized>(
    prev: &MarketOutput,
    prev_entries: &[Entry],
    new_balance: Balance,
    owner: &A,
    config: &MarketConfig,
    table: &PricingTable,
) -> Result<Transition> {
    let limits = snapshot_limits(prev, config)?;
    require_open(&prev.state)?;
    check_table(table, &limits)?;
    check_ledger(prev, prev_entries)?;
    validate_entries(&prev.state.balance, prev_entries)?;

    let public_key = owner.public_key();
    let index = find_entry(prev_entries, &public_key)?;
    let old_balance = prev_entries[index].balance;

    let aggregate_balance = prev
        .state
        .balance
        .checked_sub(&old_balance)?
        .checked_add(&new_balance)?;
    aggregate_balance.check_limits(&limits)?;
    let price = table.lookup(&aggregate_balance)?;

    let path = ledger_path(prev_entries, index)?;
    let new_entry = Entry::new(public_key, new_balance);

    let mut state = prev.state.clone();
    state.balance = aggregate_balance;
    state.balance_root = root_from_path(&new_entry.leaf()?, &path);
    let output = MarketOutput { state, collateral: price.collateral };

    let signature = owner.sign_digest(&authorization_digest(prev, &output)?);

    tracing::info!(
        position = index,
        old = ?old_balance,
        new = ?new_balance,
        collateral = price.collateral,
        "Built modify-position transition"
    );
    Ok(Transition {
        output,
        witness: TransitionWitness::ModifyPosition(ModifyPositionWitness {
            new_balance,
            old_balance,
            public_key,
            signature,
            new_collateral: price.collateral,
            price_proof: price.proof,
            path,
        }),
    })
}

// ============================================================================
// REDEEM
// ============================================================================

/// Cash out the caller's winning shares after resolution
///
/// Both share fields are zeroed. Only the winning side pays out; losing
/// shares are cleared for nothing, and a position with no winning shares
/// redeems for zero.
pub fn build_redeem<A: Authorizer + ?Sized>(
    prev: &MarketOutput,
    prev_entries: &[Entry],
    owner: &A,
    config: &MarketConfig,
) -> Result<Transition> {
    snapshot_limits(prev, config)?;
    let outcome = prev
        .state
        .status
        .outcome()
        .ok_or_else(|| MarketError::consistency("Market is not decided yet"))?;
    check_ledger(prev, prev_entries)?;

    let public_key = owner.public_key();
    let index = find_entry(prev_entries, &public_key)?;
    let old_balance = prev_entries[index].balance;
    let new_entry = Entry::new(public_key, old_balance.without_shares());

    let redeemed = payout(old_balance.shares_on(outcome));
    let collateral = prev.collateral.checked_sub(redeemed).ok_or_else(|| {
        MarketError::consistency(format!(
            "Market holds {} but owes {} for this redemption",
            prev.collateral, redeemed
        ))
    })?;

    let path = ledger_path(prev_entries, index)?;

    // Aggregate balance is informational once decided and stays as is
    let mut state = prev.state.clone();
    state.balance_root = root_from_path(&new_entry.leaf()?, &path);
    let output = MarketOutput { state, collateral };

    let signature = owner.sign_digest(&authorization_digest(prev, &output)?);

    tracing::info!(position = index, ?outcome, redeemed, collateral, "Built redeem transition");
    Ok(Transition {
        output,
        witness: TransitionWitness::Redeem(RedeemWitness {
            old_balance,
            public_key,
            signature,
            path,
        }),
    })
}

// ============================================================================
// RESOLVE
// ============================================================================

/// Decide the market from a miner-signed verdict
pub fn build_resolve(
    prev: &MarketOutput,
    outcome: Outcome,
    signatures: Vec<MinerSignature>,
    config: &MarketConfig,
) -> Result<Transition> {
    snapshot_limits(prev, config)?;
    require_open(&prev.state)?;
    check_verdict(&prev.state.miners, &prev.state.details, outcome, &signatures)?;

    let mut state = prev.state.clone();
    state.status = MarketStatus::Decided(outcome);

    tracing::info!(?outcome, signatures = signatures.len(), "Built resolve transition");
    Ok(Transition {
        output: MarketOutput { state, collateral: prev.collateral },
        witness: TransitionWitness::Resolve(ResolveWitness { outcome, signatures }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::sha256;
    use crate::lmsr::required_collateral;
    use crate::oracle::MinerDetail;
    use ed25519_dalek::SigningKey;

    fn signing_key(name: &str) -> SigningKey {
        SigningKey::from_bytes(&sha256(name.as_bytes()).0)
    }

    fn config() -> MarketConfig {
        MarketConfig { default_limits: MarketLimits::new(4, 12).unwrap() }
    }

    fn table() -> PricingTable {
        PricingTable::build(config().default_limits).unwrap()
    }

    fn miners() -> MinerRegistry {
        MinerRegistry::new(vec![
            MinerDetail { public_key: signing_key("miner-1").verifying_key(), votes: 40 },
            MinerDetail { public_key: signing_key("miner-2").verifying_key(), votes: 60 },
        ])
        .unwrap()
    }

    fn genesis(table: &PricingTable) -> (MarketOutput, Vec<Entry>) {
        build_genesis(
            MarketDetails::new("https://oracle.example/resolve"),
            miners(),
            signing_key("A").verifying_key(),
            1,
            &config(),
            table,
        )
        .unwrap()
    }

    #[test]
    fn test_genesis() {
        let table = table();
        let (output, entries) = genesis(&table);
        assert_eq!(entries.len(), 1);
        assert_eq!(output.state.balance, Balance::new(1, 0, 0));
        assert_eq!(output.state.balance_root, entries[0].leaf().unwrap());
        assert_eq!(output.collateral, required_collateral(&Balance::new(1, 0, 0)).unwrap());

        let zero = build_genesis(
            MarketDetails::new("r"),
            miners(),
            signing_key("A").verifying_key(),
            0,
            &config(),
            &table,
        );
        assert!(matches!(zero, Err(MarketError::Bounds(_))));
    }

    #[test]
    fn test_genesis_rejects_mismatched_table() {
        let table = table();
        let result = build_genesis(
            MarketDetails::new("r").with_limits(2, 5),
            miners(),
            signing_key("A").verifying_key(),
            1,
            &config(),
            &table,
        );
        assert!(matches!(result, Err(MarketError::Consistency(_))));
    }

    #[test]
    fn test_open_position_appends() {
        let table = table();
        let (prev, entries) = genesis(&table);
        let entry = Entry::new(signing_key("B").verifying_key(), Balance::new(1, 3, 0));

        let tx = build_open_position(&prev, &entries, entry, &config(), &table).unwrap();
        let mut expected = entries.clone();
        expected.push(entry);

        assert_eq!(tx.output.state.balance, Balance::new(2, 3, 0));
        assert_eq!(tx.output.state.balance_root, ledger_root(&expected).unwrap());
        assert_eq!(tx.output.collateral, required_collateral(&Balance::new(2, 3, 0)).unwrap());
    }

    #[test]
    fn test_open_position_rejects_duplicate_and_bounds() {
        let table = table();
        let (prev, entries) = genesis(&table);

        let dup = Entry::new(signing_key("A").verifying_key(), Balance::new(1, 0, 0));
        assert!(matches!(
            build_open_position(&prev, &entries, dup, &config(), &table),
            Err(MarketError::Identity(_))
        ));

        let too_big = Entry::new(signing_key("B").verifying_key(), Balance::new(0, 13, 0));
        assert!(matches!(
            build_open_position(&prev, &entries, too_big, &config(), &table),
            Err(MarketError::Bounds(_))
        ));
    }

    #[test]
    fn test_open_position_rejects_stale_entries() {
        let table = table();
        let (prev, _) = genesis(&table);
        let wrong = vec![Entry::new(signing_key("Z").verifying_key(), Balance::new(1, 0, 0))];
        let entry = Entry::new(signing_key("B").verifying_key(), Balance::new(1, 0, 0));
        assert!(matches!(
            build_open_position(&prev, &wrong, entry, &config(), &table),
            Err(MarketError::Consistency(_))
        ));
    }

    #[test]
    fn test_modify_requires_existing_entry() {
        let table = table();
        let (prev, entries) = genesis(&table);
        let result = build_modify_position(&prev, &entries, Balance::new(1, 1, 0), &signing_key("B"), &config(), &table);
        assert!(matches!(result, Err(MarketError::Identity(_))));
    }

    #[test]
    fn test_modify_replaces_entry() {
        let table = table();
        let (prev, entries) = genesis(&table);
        let owner = signing_key("A");

        let tx = build_modify_position(&prev, &entries, Balance::new(2, 0, 4), &owner, &config(), &table).unwrap();
        let expected = vec![Entry::new(owner.verifying_key(), Balance::new(2, 0, 4))];
        assert_eq!(tx.output.state.balance, Balance::new(2, 0, 4));
        assert_eq!(tx.output.state.balance_root, ledger_root(&expected).unwrap());
        assert_eq!(tx.output.collateral, required_collateral(&Balance::new(2, 0, 4)).unwrap());
    }

    #[test]
    fn test_resolve_and_no_double_resolution() {
        let table = table();
        let (prev, _) = genesis(&table);
        let sig = MinerSignature::sign(&signing_key("miner-2"), &prev.state.details, Outcome::For).unwrap();

        let tx = build_resolve(&prev, Outcome::For, vec![sig.clone()], &config()).unwrap();
        assert_eq!(tx.output.state.status, MarketStatus::Decided(Outcome::For));
        assert_eq!(tx.output.state.balance_root, prev.state.balance_root);
        assert_eq!(tx.output.collateral, prev.collateral);

        let again = build_resolve(&tx.output, Outcome::For, vec![sig], &config());
        assert!(matches!(again, Err(MarketError::Consistency(_))));
    }

    #[test]
    fn test_resolve_needs_threshold() {
        let table = table();
        let (prev, _) = genesis(&table);
        let sig = MinerSignature::sign(&signing_key("miner-1"), &prev.state.details, Outcome::For).unwrap();
        assert!(matches!(
            build_resolve(&prev, Outcome::For, vec![sig], &config()),
            Err(MarketError::Authorization(_))
        ));
    }

    #[test]
    fn test_redeem_requires_decided_market() {
        let table = table();
        let (prev, entries) = genesis(&table);
        assert!(matches!(
            build_redeem(&prev, &entries, &signing_key("A"), &config()),
            Err(MarketError::Consistency(_))
        ));
    }
}
