/// Market lifecycle integration tests
///
/// Runs genesis → open → modify → resolve → redeem with deterministic test
/// keys derived as SHA256(seed || name).
/// ⚠️ These keys are for testing only - NEVER use in production!

use blackbook_lmsr_market::{
    aggregate, apply_witness, build_genesis, build_modify_position, build_open_position, build_redeem,
    build_resolve, is_valid_market_update_tx, ledger_root, market_collateral, merkle_root, payout,
    required_collateral, Balance, Entry, MarketConfig, MarketDetails, MarketError, MarketOutput,
    MarketState, MarketStatus, MinerDetail, MinerRegistry, MinerSignature, Outcome, PricingTable,
    ReplayVerifier, Transition, SATS_PER_SHARE,
};
use ed25519_dalek::SigningKey;
use sha2::{Digest, Sha256};

// ============================================================================
// TEST ACCOUNTS
// ============================================================================

const TEST_SEED: &[u8; 32] = b"blackbook_market_test_seed_v1___";

fn account(name: &str) -> SigningKey {
    let mut hasher = Sha256::new();
    hasher.update(TEST_SEED);
    hasher.update(name.as_bytes());
    let derived: [u8; 32] = hasher.finalize().into();
    SigningKey::from_bytes(&derived)
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

// ============================================================================
// HARNESS
// ============================================================================

/// Tracks a market the way an observer of the chain would
struct Market {
    config: MarketConfig,
    table: PricingTable,
    output: MarketOutput,
    entries: Vec<Entry>,
}

impl Market {
    fn create() -> Self {
        init_tracing();
        let config = MarketConfig::default();
        let details = MarketDetails::new("https://oracle.blackbook.example/markets/42").with_limits(3, 12);
        let table = PricingTable::build(details.limits(&config.default_limits)).unwrap();
        let miners = MinerRegistry::new(vec![
            MinerDetail { public_key: account("miner_40").verifying_key(), votes: 40 },
            MinerDetail { public_key: account("miner_60").verifying_key(), votes: 60 },
        ])
        .unwrap();

        let (output, entries) =
            build_genesis(details, miners, account("alice").verifying_key(), 1, &config, &table).unwrap();
        Market { config, table, output, entries }
    }

    /// Check `tx` the way the ledger and an observer both would, then accept it
    fn accept(&mut self, tx: Transition) {
        let new_entries = apply_witness(&self.entries, &tx.witness).unwrap();
        let verifier = ReplayVerifier::new(&self.config, &self.table);
        assert!(
            is_valid_market_update_tx(&verifier, &self.output, &self.entries, &tx, &new_entries, &self.config, &self.table),
            "{} transition rejected",
            tx.kind().name()
        );
        self.output = tx.output;
        self.entries = new_entries;
    }

    fn open(&mut self, name: &str, balance: Balance) {
        let entry = Entry::new(account(name).verifying_key(), balance);
        let tx = build_open_position(&self.output, &self.entries, entry, &self.config, &self.table).unwrap();
        self.accept(tx);
    }

    fn modify(&mut self, name: &str, balance: Balance) {
        let tx = build_modify_position(&self.output, &self.entries, balance, &account(name), &self.config, &self.table)
            .unwrap();
        self.accept(tx);
    }

    fn verdict(&self, miner: &str, outcome: Outcome) -> MinerSignature {
        MinerSignature::sign(&account(miner), &self.output.state.details, outcome).unwrap()
    }

    fn balance_of(&self, name: &str) -> Balance {
        let key = account(name).verifying_key();
        self.entries.iter().find(|e| e.is_owned_by(&key)).unwrap().balance
    }
}

// ============================================================================
// LIFECYCLE
// ============================================================================

#[test]
fn test_full_market_lifecycle() {
    let mut market = Market::create();
    assert_eq!(market.output.state.status, MarketStatus::Open);
    assert_eq!(market.output.collateral, required_collateral(&Balance::new(1, 0, 0)).unwrap());

    // A:(1,2,0), B:(1,0,3)
    market.modify("alice", Balance::new(1, 2, 0));
    market.open("bob", Balance::new(1, 0, 3));
    assert_eq!(market.output.state.balance, Balance::new(2, 2, 3));
    assert_eq!(aggregate(&market.entries).unwrap(), Balance::new(2, 2, 3));

    // C:(1,1,1) appended with the path-only root update
    market.open("carol", Balance::new(1, 1, 1));
    assert_eq!(market.output.state.balance, Balance::new(3, 3, 4));
    let leaves: Vec<_> = market.entries.iter().map(|e| e.leaf().unwrap()).collect();
    assert_eq!(market.output.state.balance_root, merkle_root(&leaves));
    assert_eq!(market.output.collateral, required_collateral(&Balance::new(3, 3, 4)).unwrap());

    // 40 of 100 votes is short of the 51 threshold
    let weak = build_resolve(&market.output, Outcome::For, vec![market.verdict("miner_40", Outcome::For)], &market.config);
    assert!(matches!(weak, Err(MarketError::Authorization(_))));

    let signatures = vec![market.verdict("miner_40", Outcome::For), market.verdict("miner_60", Outcome::For)];
    let tx = build_resolve(&market.output, Outcome::For, signatures.clone(), &market.config).unwrap();
    market.accept(tx);
    assert_eq!(market.output.state.status, MarketStatus::Decided(Outcome::For));

    // No double resolution
    let again = build_resolve(&market.output, Outcome::Against, signatures, &market.config);
    assert!(matches!(again, Err(MarketError::Consistency(_))));

    // Bob only holds losing shares: cleared for nothing
    let before = market.output.collateral;
    let tx = build_redeem(&market.output, &market.entries, &account("bob"), &market.config).unwrap();
    assert_eq!(tx.output.collateral, before);
    market.accept(tx);
    assert_eq!(market.balance_of("bob"), Balance::new(1, 0, 0));

    let tx = build_redeem(&market.output, &market.entries, &account("alice"), &market.config).unwrap();
    assert_eq!(tx.output.collateral, before - 2 * SATS_PER_SHARE);
    market.accept(tx);

    let tx = build_redeem(&market.output, &market.entries, &account("carol"), &market.config).unwrap();
    assert_eq!(tx.output.collateral, before - payout(3));
    market.accept(tx);

    assert_eq!(market_collateral(&market.output.state.status, &market.entries).unwrap(), 0);
    assert!(market.entries.iter().all(|e| e.balance.shares_for == 0 && e.balance.shares_against == 0));
}

#[test]
fn test_market_limits_come_from_details() {
    let mut market = Market::create();
    market.open("bob", Balance::new(2, 0, 0));

    // Liquidity 3 is the market's maximum even though the default is 10
    let entry = Entry::new(account("carol").verifying_key(), Balance::new(1, 0, 0));
    let result = build_open_position(&market.output, &market.entries, entry, &market.config, &market.table);
    assert!(matches!(result, Err(MarketError::Bounds(_))));

    let result = build_modify_position(&market.output, &market.entries, Balance::new(1, 13, 0), &account("alice"), &market.config, &market.table);
    assert!(matches!(result, Err(MarketError::Bounds(_))));
}

#[test]
fn test_second_entry_for_same_key_rejected() {
    let mut market = Market::create();
    market.open("bob", Balance::new(0, 1, 0));
    let entry = Entry::new(account("bob").verifying_key(), Balance::new(0, 0, 1));
    let result = build_open_position(&market.output, &market.entries, entry, &market.config, &market.table);
    assert!(matches!(result, Err(MarketError::Identity(_))));
}

#[test]
fn test_committed_state_survives_the_wire() {
    let mut market = Market::create();
    market.open("bob", Balance::new(1, 4, 2));

    let hex = market.output.state.to_hex().unwrap();
    let decoded = MarketState::from_hex(&hex).unwrap();
    assert_eq!(decoded, market.output.state);
    assert_eq!(decoded.balance_root, ledger_root(&market.entries).unwrap());
    assert_eq!(&hex[..4], "0000");
}

#[test]
fn test_redeem_before_resolution_rejected() {
    let market = Market::create();
    let result = build_redeem(&market.output, &market.entries, &account("alice"), &market.config);
    assert!(matches!(result, Err(MarketError::Consistency(_))));
}
