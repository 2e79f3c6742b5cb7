// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Full lease lifecycle through the library API, persisted to a temporary
//! database and reopened.

use std::sync::Arc;

use alloy::primitives::Address;
use alloy::signers::{local::PrivateKeySigner, SignerSync};

use enclave_lease_server::clock::ManualClock;
use enclave_lease_server::config::MarketConfig;
use enclave_lease_server::market::{registration_subject, Market};
use enclave_lease_server::signature::{address_subject, claim_message, ClaimKind, SignedClaim};

const T0: u64 = 1_700_000_000;
const OWNER_FUNDS: u128 = 1_000_000;

fn key(seed: u8) -> PrivateKeySigner {
    PrivateKeySigner::from_slice(&[seed; 32]).unwrap()
}

fn sign(key: &PrivateKeySigner, kind: ClaimKind, subject: &str, timestamp: u64) -> SignedClaim {
    let signature = key
        .sign_message_sync(claim_message(kind, subject, timestamp).as_bytes())
        .unwrap();
    SignedClaim {
        timestamp,
        signature: alloy::hex::encode_prefixed(signature.as_bytes()),
    }
}

struct World {
    owner: Address,
    operator: Address,
    nodes: Vec<PrivateKeySigner>,
    config: MarketConfig,
}

impl World {
    fn new(data_dir: std::path::PathBuf) -> Self {
        let owner = Address::repeat_byte(0xaa);
        let operator = Address::repeat_byte(0xbb);
        let nodes = vec![key(1), key(2), key(3)];

        let mut config = MarketConfig {
            data_dir: Some(data_dir),
            trusted_signers: nodes.iter().map(|k| k.address()).collect(),
            ledger_genesis: vec![(owner, OWNER_FUNDS), (operator, 10_000)],
            ..Default::default()
        };
        config.lease.replication_factor = 2;
        config.lease.min_duration = 100;
        config.lease.ack_timeout = 50;
        config.lease.dead_timeout = 200;

        Self {
            owner,
            operator,
            nodes,
            config,
        }
    }

    fn open(&self, clock: Arc<ManualClock>) -> Market {
        let mut market = Market::new(&self.config, clock.clone()).unwrap();
        let now = market.now();
        for node in &self.nodes {
            let subject = registration_subject(self.operator, 1_000, 100);
            let claim = sign(node, ClaimKind::Register, &subject, now);
            market
                .register_node(self.operator, 1_000, 100, &claim)
                .unwrap();
        }
        market
    }

    fn key_of(&self, address: Address) -> &PrivateKeySigner {
        self.nodes
            .iter()
            .find(|k| k.address() == address)
            .unwrap()
    }
}

#[test]
fn lease_survives_a_dead_node_and_settles_on_termination() {
    let dir = tempfile::tempdir().unwrap();
    let world = World::new(dir.path().to_path_buf());
    let clock = Arc::new(ManualClock::new(T0));
    let mut market = world.open(clock.clone());

    // Create and acknowledge.
    let lease = market.create_lease(world.owner, 10, T0 + 1_000, 20_000).unwrap();
    assert_eq!(lease.id, 1);
    let assigned: Vec<Address> = lease.assigned_nodes.iter().map(|a| a.node).collect();
    assert_eq!(assigned.len(), 2);

    let subject = lease.id.to_string();
    assert!(!market
        .acknowledge(lease.id, &sign(world.key_of(assigned[0]), ClaimKind::Acknowledge, &subject, T0))
        .unwrap());
    assert!(market
        .acknowledge(lease.id, &sign(world.key_of(assigned[1]), ClaimKind::Acknowledge, &subject, T0))
        .unwrap());

    // The first node keeps reporting; its operator is paid for held bytes.
    clock.set(T0 + 150);
    let healthy = assigned[0];
    let claim = sign(
        world.key_of(healthy),
        ClaimKind::Alive,
        &address_subject(healthy),
        T0 + 150,
    );
    assert_eq!(market.report_alive(healthy, &claim).unwrap(), 150 * 10);
    assert_eq!(market.balance_of(world.operator), 10_000 - 300 + 1_500);

    // Extend while live.
    let extended = market
        .update_lease_end(lease.id, world.owner, T0 + 1_500, 10_000)
        .unwrap();
    assert_eq!(extended.end_time, T0 + 1_500);
    assert_eq!(extended.total_deposit, 30_000);

    // The silent node is replaced by the spare, which must acknowledge anew.
    clock.set(T0 + 301);
    let silent = assigned[1];
    assert_eq!(market.report_dead(silent, &[lease.id]).unwrap(), vec![lease.id]);
    let slots = market.assignments(lease.id).unwrap();
    let spare = world
        .nodes
        .iter()
        .map(|k| k.address())
        .find(|a| !assigned.contains(a))
        .unwrap();
    assert!(slots.iter().any(|s| s.node == spare && !s.acknowledged));
    assert!(market.penalties_of(Address::ZERO) > 0);

    assert!(market
        .acknowledge(lease.id, &sign(world.key_of(spare), ClaimKind::Acknowledge, &subject, T0 + 301))
        .unwrap());

    // Two replicas were billed for every second up to termination.
    clock.set(T0 + 320);
    let refund = market.terminate(lease.id).unwrap();
    assert_eq!(refund, 30_000 - 320 * 10 * 2);
    assert_eq!(market.balance_of(world.owner), OWNER_FUNDS - 30_000 + refund);
    assert!(market.lease(lease.id).is_err());

    let names: Vec<&str> = market
        .events(0, 100)
        .unwrap()
        .iter()
        .map(|r| r.event.name())
        .collect();
    for expected in [
        "lease_created",
        "node_acknowledged",
        "node_alive",
        "lease_end_updated",
        "node_replaced",
        "node_slashed",
        "node_dead_processed",
        "lease_terminated",
    ] {
        assert!(names.contains(&expected), "missing {expected} in {names:?}");
    }
}

#[test]
fn reopened_market_restores_leases_and_continues_sequences() {
    let dir = tempfile::tempdir().unwrap();
    let world = World::new(dir.path().to_path_buf());
    let clock = Arc::new(ManualClock::new(T0));

    let (lease, events_before) = {
        let mut market = world.open(clock.clone());
        let lease = market.create_lease(world.owner, 10, T0 + 1_000, 20_000).unwrap();
        (lease, market.events(0, 100).unwrap())
    };
    let mut market = world.open(clock.clone());
    assert!(market.is_persistent());
    assert_eq!(market.lease(lease.id).unwrap(), lease);

    let events_after = market.events(0, 100).unwrap();
    assert_eq!(events_after.len(), events_before.len());

    // Re-registered holders carry the restored lease again.
    for slot in &lease.assigned_nodes {
        assert_eq!(market.node(slot.node).unwrap().occupied, 10);
    }

    // The restored escrow is still there to refund.
    clock.set(T0 + 50);
    let owner_before = market.balance_of(world.owner);
    let refund = market.terminate(lease.id).unwrap();
    assert_eq!(refund, 20_000 - 50 * 10 * 2);
    assert_eq!(market.balance_of(world.owner), owner_before + refund);
    for slot in &lease.assigned_nodes {
        assert_eq!(market.node(slot.node).unwrap().occupied, 0);
    }
    let seq_after_terminate = market.events(0, 100).unwrap().last().map(|r| r.seq);

    let next = market.create_lease(world.owner, 10, T0 + 1_000, 20_000).unwrap();
    assert_eq!(next.id, lease.id + 1);
    let latest = market.events(0, 100).unwrap();
    assert_eq!(
        latest.last().map(|r| r.seq),
        seq_after_terminate.map(|seq| seq + 1)
    );
}
