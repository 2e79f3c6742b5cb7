// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Market Service
//!
//! [`Market`] is the serialization boundary around the lease engine. It reads
//! the clock, runs one engine operation, and on success persists the touched
//! leases and publishes the operation's events. Callers hold it behind a
//! single mutex, so operations are totally ordered.
//!
//! ## Event Publishing
//!
//! Every committed event is
//! - logged through `tracing` at `info`
//! - wrapped in an [`EventRecord`] with the next sequence number
//! - appended to the durable log (or the in-memory tail when persistence is
//!   disabled)

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use alloy::primitives::Address;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::MarketConfig;
use crate::lease::{
    Amount, EventRecord, Lease, LeaseEngine, LeaseError, LeaseId, NodeAssignment, Timestamp,
};
use crate::ledger::{InMemoryLedger, Ledger, LedgerError};
use crate::registry::{InMemoryRegistry, NodeRecord, NodeRegistry, RegistryError};
use crate::signature::{address_subject, ClaimKind, SignatureAuthority, SignedClaim};
use crate::storage::{Changeset, DbError, LeaseDatabase, DATABASE_FILE};

/// Events kept in memory when running without a database.
const MEMORY_EVENT_TAIL: usize = 10_000;

pub type Engine = LeaseEngine<InMemoryRegistry, InMemoryLedger>;

#[derive(Debug, thiserror::Error)]
pub enum MarketError {
    #[error(transparent)]
    Lease(#[from] LeaseError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("persistence failed: {0}")]
    Storage(#[from] DbError),
}

/// Outcome of one keeper pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KeeperReport {
    pub swept: Vec<LeaseId>,
    pub dead_nodes: Vec<Address>,
}

pub struct Market {
    engine: Engine,
    db: Option<LeaseDatabase>,
    clock: Arc<dyn Clock>,
    authority: SignatureAuthority,
    next_event_seq: u64,
    event_tail: VecDeque<EventRecord>,
}

/// Subject of a node registration claim: the node consents to `owner`
/// receiving its payouts and posting `bond`.
pub fn registration_subject(owner: Address, capacity: u64, bond: Amount) -> String {
    format!("{}:{capacity}:{bond}", address_subject(owner))
}

impl Market {
    /// Build the market from configuration, restoring persisted leases.
    pub fn new(config: &MarketConfig, clock: Arc<dyn Clock>) -> Result<Self, MarketError> {
        let mut registry = InMemoryRegistry::new(config.signature_max_age, config.slash_rate);
        for signer in &config.trusted_signers {
            registry.trust_signer(*signer);
        }

        let mut ledger = InMemoryLedger::new();
        for (account, amount) in &config.ledger_genesis {
            ledger.credit(*account, *amount)?;
        }

        let authority = SignatureAuthority::default();
        let mut engine = LeaseEngine::new(config.lease.clone(), registry, ledger, authority.clone());

        let mut next_event_seq = 1;
        let db = match &config.data_dir {
            Some(dir) => {
                let db = LeaseDatabase::open(&dir.join(DATABASE_FILE))?;
                let leases = db.load_leases()?;
                info!(
                    leases = leases.len(),
                    path = %dir.display(),
                    "Restored lease table"
                );
                // Restored escrow is still owed to owners and nodes.
                let escrow = leases
                    .iter()
                    .try_fold(0, |total: Amount, lease| total.checked_add(lease.balance))
                    .ok_or(LedgerError::Overflow)?;
                engine.ledger_mut().fund_pool(escrow)?;
                engine.restore(leases, db.next_lease_id()?);
                next_event_seq = db.next_event_seq()?;
                Some(db)
            }
            None => {
                warn!("DATA_DIR is empty, running without persistence");
                None
            }
        };

        Ok(Self {
            engine,
            db,
            clock,
            authority,
            next_event_seq,
            event_tail: VecDeque::new(),
        })
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn authority(&self) -> &SignatureAuthority {
        &self.authority
    }

    pub fn signature_max_age(&self) -> u64 {
        self.engine.registry().signature_max_age()
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    // =========================================================================
    // Lease operations
    // =========================================================================

    pub fn create_lease(
        &mut self,
        owner: Address,
        size_limit: u64,
        end_time: Timestamp,
        deposit: Amount,
    ) -> Result<Lease, MarketError> {
        let now = self.now();
        let id = self
            .engine
            .create_lease(owner, size_limit, end_time, deposit, now)?;
        self.commit()?;
        Ok(self.engine.lease(id)?.clone())
    }

    pub fn acknowledge(&mut self, lease_id: LeaseId, claim: &SignedClaim) -> Result<bool, MarketError> {
        let now = self.now();
        let live = self.engine.acknowledge(lease_id, claim, now)?;
        self.commit()?;
        Ok(live)
    }

    pub fn sweep_unacknowledged(&mut self, lease_id: LeaseId) -> Result<Amount, MarketError> {
        let now = self.now();
        let refund = self.engine.sweep_unacknowledged(lease_id, now)?;
        self.commit()?;
        Ok(refund)
    }

    pub fn report_alive(&mut self, node: Address, claim: &SignedClaim) -> Result<Amount, MarketError> {
        let now = self.now();
        let payout = self.engine.report_alive(node, claim, now)?;
        self.commit()?;
        Ok(payout)
    }

    pub fn report_dead(
        &mut self,
        node: Address,
        lease_ids: &[LeaseId],
    ) -> Result<Vec<LeaseId>, MarketError> {
        let now = self.now();
        let processed = self.engine.report_dead(node, lease_ids, now)?;
        self.commit()?;
        Ok(processed)
    }

    pub fn update_lease_end(
        &mut self,
        lease_id: LeaseId,
        caller: Address,
        new_end: Timestamp,
        deposit: Amount,
    ) -> Result<Lease, MarketError> {
        let now = self.now();
        self.engine
            .update_lease_end(lease_id, caller, new_end, deposit, now)?;
        self.commit()?;
        Ok(self.engine.lease(lease_id)?.clone())
    }

    pub fn terminate(&mut self, lease_id: LeaseId) -> Result<Amount, MarketError> {
        let now = self.now();
        let refund = self.engine.terminate(lease_id, now)?;
        self.commit()?;
        Ok(refund)
    }

    // =========================================================================
    // Nodes and accounts
    // =========================================================================

    /// Register the trusted enclave that signed `claim`, bonded by `owner`.
    pub fn register_node(
        &mut self,
        owner: Address,
        capacity: u64,
        bond: Amount,
        claim: &SignedClaim,
    ) -> Result<NodeRecord, MarketError> {
        let now = self.now();
        let subject = registration_subject(owner, capacity, bond);
        let node = self.authority.verify_node_claim(
            ClaimKind::Register,
            &subject,
            claim,
            now,
            self.engine.registry(),
        )?;
        if self.engine.registry().is_registered(node) {
            return Err(RegistryError::AlreadyRegistered(node).into());
        }

        if bond > 0 {
            self.engine.ledger_mut().transfer_in(owner, bond)?;
        }
        self.engine
            .registry_mut()
            .register(node, owner, capacity, bond, now)?;

        // A node coming back after a restart still stores its restored leases.
        let held: u64 = self
            .engine
            .leases_of_node(node)
            .into_iter()
            .filter_map(|id| self.engine.lease(id).ok())
            .map(|lease| lease.size_limit)
            .sum();
        if held > 0 {
            self.engine.registry_mut().reserve(node, held)?;
            info!(node = %node, held, "Reserved capacity for restored leases");
        }

        let record = self
            .engine
            .registry()
            .node(node)
            .cloned()
            .ok_or(RegistryError::UnknownNode(node))?;
        info!(node = %node, owner = %owner, capacity, bond, "Registered storage node");
        Ok(record)
    }

    pub fn node(&self, address: Address) -> Option<NodeRecord> {
        self.engine.registry().node(address).cloned()
    }

    pub fn balance_of(&self, account: Address) -> Amount {
        self.engine.ledger().balance_of(account)
    }

    pub fn penalties_of(&self, account: Address) -> Amount {
        self.engine.registry().penalties_of(account)
    }

    pub fn lease(&self, lease_id: LeaseId) -> Result<Lease, MarketError> {
        Ok(self.engine.lease(lease_id)?.clone())
    }

    pub fn assignments(&self, lease_id: LeaseId) -> Result<Vec<NodeAssignment>, MarketError> {
        Ok(self.engine.assignments(lease_id)?.to_vec())
    }

    /// Up to `limit` events with `seq > after`, oldest first.
    pub fn events(&self, after: u64, limit: usize) -> Result<Vec<EventRecord>, MarketError> {
        match &self.db {
            Some(db) => Ok(db.events_after(after, limit)?),
            None => Ok(self
                .event_tail
                .iter()
                .filter(|record| record.seq > after)
                .take(limit)
                .cloned()
                .collect()),
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.db.is_some()
    }

    // =========================================================================
    // Keeper
    // =========================================================================

    /// Sweep every sweepable lease and report every silent node.
    ///
    /// Individual failures are logged and do not stop the pass.
    pub fn keeper_tick(&mut self) -> KeeperReport {
        let now = self.now();
        let mut report = KeeperReport::default();

        for lease_id in self.engine.pending_sweeps(now) {
            match self.sweep_unacknowledged(lease_id) {
                Ok(refund) => {
                    info!(lease_id, refund, "Keeper swept unacknowledged lease");
                    report.swept.push(lease_id);
                }
                Err(e) => warn!(lease_id, error = %e, "Keeper sweep failed"),
            }
        }

        for (node, lease_ids) in self.engine.dead_candidates(now) {
            match self.report_dead(node, &lease_ids) {
                Ok(processed) => {
                    info!(node = %node, leases = ?processed, "Keeper reported dead node");
                    report.dead_nodes.push(node);
                }
                Err(e) => warn!(node = %node, error = %e, "Keeper dead report failed"),
            }
        }

        report
    }

    // =========================================================================
    // Commit
    // =========================================================================

    /// Publish and persist the events of the operation that just succeeded.
    fn commit(&mut self) -> Result<(), MarketError> {
        let events = self.engine.take_events();
        if events.is_empty() {
            return Ok(());
        }

        let records: Vec<EventRecord> = events
            .into_iter()
            .map(|event| {
                let record = EventRecord::new(self.next_event_seq, event);
                self.next_event_seq += 1;
                record
            })
            .collect();

        for record in &records {
            let payload = serde_json::to_string(&record.event).unwrap_or_default();
            info!(
                seq = record.seq,
                event_id = %record.event_id,
                event = record.event.name(),
                lease_id = ?record.event.lease_id(),
                payload = %payload,
                "Lease event"
            );
        }

        let Some(db) = &self.db else {
            self.event_tail.extend(records);
            while self.event_tail.len() > MEMORY_EVENT_TAIL {
                self.event_tail.pop_front();
            }
            return Ok(());
        };

        let touched: BTreeSet<LeaseId> = records.iter().filter_map(|r| r.event.lease_id()).collect();
        let mut changes = Changeset {
            events: &records,
            next_lease_id: self.engine.next_id(),
            ..Default::default()
        };
        for id in touched {
            match self.engine.lease(id) {
                Ok(lease) => changes.upserts.push(lease),
                Err(_) => changes.deletions.push(id),
            }
        }

        db.commit(&changes).map_err(|e| {
            error!(error = %e, "Failed to persist committed operation");
            MarketError::from(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use alloy::signers::local::PrivateKeySigner;

    use super::*;
    use crate::clock::ManualClock;
    use crate::signature::testing::{sign_claim, signer};

    const T0: Timestamp = 1_700_000_000;

    fn owner() -> Address {
        Address::repeat_byte(0xaa)
    }

    fn config(keys: &[PrivateKeySigner], data_dir: Option<std::path::PathBuf>) -> MarketConfig {
        let mut config = MarketConfig {
            data_dir,
            trusted_signers: keys.iter().map(|k| k.address()).collect(),
            ledger_genesis: vec![(owner(), 1_000_000_000)],
            ..Default::default()
        };
        config.lease.replication_factor = 2;
        config.lease.min_duration = 100;
        config.lease.ack_timeout = 50;
        config.lease.dead_timeout = 200;
        config
    }

    fn register(market: &mut Market, key: &PrivateKeySigner) -> NodeRecord {
        let subject = registration_subject(owner(), 1_000, 100);
        let claim = sign_claim(key, ClaimKind::Register, &subject, market.now());
        market.register_node(owner(), 1_000, 100, &claim).unwrap()
    }

    fn ack(market: &mut Market, key: &PrivateKeySigner, lease_id: LeaseId) -> bool {
        let claim = sign_claim(key, ClaimKind::Acknowledge, &lease_id.to_string(), market.now());
        market.acknowledge(lease_id, &claim).unwrap()
    }

    #[test]
    fn register_node_requires_trusted_fresh_claim_and_bond() {
        let keys = [signer(1), signer(2)];
        let clock = Arc::new(ManualClock::new(T0));
        let mut market = Market::new(&config(&keys[..1], None), clock).unwrap();

        let record = register(&mut market, &keys[0]);
        assert_eq!(record.address, keys[0].address());
        assert_eq!(record.bond, 100);
        assert_eq!(market.balance_of(owner()), 1_000_000_000 - 100);

        let subject = registration_subject(owner(), 1_000, 100);
        let claim = sign_claim(&keys[0], ClaimKind::Register, &subject, T0);
        let again = market.register_node(owner(), 1_000, 100, &claim).unwrap_err();
        assert!(matches!(again, MarketError::Registry(RegistryError::AlreadyRegistered(_))));

        let claim = sign_claim(&keys[1], ClaimKind::Register, &subject, T0);
        let untrusted = market.register_node(owner(), 1_000, 100, &claim).unwrap_err();
        assert!(matches!(untrusted, MarketError::Lease(LeaseError::UnverifiedSigner(_))));
        assert_eq!(market.balance_of(owner()), 1_000_000_000 - 100);
    }

    #[test]
    fn events_are_sequenced_in_memory() {
        let keys = [signer(1), signer(2)];
        let clock = Arc::new(ManualClock::new(T0));
        let mut market = Market::new(&config(&keys, None), clock.clone()).unwrap();
        for key in &keys {
            register(&mut market, key);
        }

        let lease = market.create_lease(owner(), 10, T0 + 1_000, 20_000).unwrap();
        for key in &keys {
            ack(&mut market, key, lease.id);
        }

        let events = market.events(0, 100).unwrap();
        let seqs: Vec<u64> = events.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(events[0].event.name(), "lease_created");
        assert_eq!(market.events(2, 100).unwrap().len(), 1);

        // Failed operations publish nothing.
        assert!(market.terminate(99).is_err());
        assert_eq!(market.events(0, 100).unwrap().len(), 3);
    }

    #[test]
    fn keeper_sweeps_and_reports_dead_nodes() {
        let keys = [signer(1), signer(2), signer(3), signer(4)];
        let clock = Arc::new(ManualClock::new(T0));
        let mut market = Market::new(&config(&keys, None), clock.clone()).unwrap();
        for key in &keys {
            register(&mut market, key);
        }

        let stalled = market.create_lease(owner(), 10, T0 + 1_000, 20_000).unwrap();
        let live = market.create_lease(owner(), 10, T0 + 1_000, 20_000).unwrap();
        for node in &live.assigned_nodes {
            let key = keys.iter().find(|k| k.address() == node.node).unwrap();
            ack(&mut market, key, live.id);
        }

        clock.advance(51);
        let report = market.keeper_tick();
        assert_eq!(report.swept, vec![stalled.id]);
        assert!(report.dead_nodes.is_empty());

        clock.advance(200);
        let report = market.keeper_tick();
        assert!(report.swept.is_empty());
        assert_eq!(report.dead_nodes.len(), 2);
        assert!(market.lease(stalled.id).is_err());
    }

    #[test]
    fn restart_restores_leases_and_sequences() {
        let keys = [signer(1), signer(2)];
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(T0));

        let lease = {
            let mut market =
                Market::new(&config(&keys, Some(dir.path().to_path_buf())), clock.clone()).unwrap();
            for key in &keys {
                register(&mut market, key);
            }
            let lease = market.create_lease(owner(), 10, T0 + 1_000, 20_000).unwrap();
            let doomed = market.create_lease(owner(), 10, T0 + 1_000, 20_000).unwrap();
            market.terminate(doomed.id).unwrap();
            lease
        };

        let mut market =
            Market::new(&config(&keys, Some(dir.path().to_path_buf())), clock).unwrap();
        assert!(market.is_persistent());
        assert_eq!(market.lease(lease.id).unwrap(), lease);
        assert!(market.lease(2).is_err());
        assert_eq!(market.engine().next_id(), 3);
        assert_eq!(market.events(0, 10).unwrap().len(), 3);

        // Registry state is rebuilt from configuration, not restored.
        for key in &keys {
            register(&mut market, key);
        }
        let next = market.create_lease(owner(), 10, T0 + 1_000, 20_000).unwrap();
        assert_eq!(next.id, 3);
        assert_eq!(market.events(0, 10).unwrap().last().unwrap().seq, 4);
    }

    #[test]
    fn restored_lease_keeps_its_escrow_and_capacity() {
        let keys = [signer(1), signer(2), signer(3)];
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(T0));
        let data_dir = Some(dir.path().to_path_buf());

        let lease = {
            let mut market = Market::new(&config(&keys, data_dir.clone()), clock.clone()).unwrap();
            for key in &keys {
                register(&mut market, key);
            }
            market.create_lease(owner(), 10, T0 + 1_000, 20_000).unwrap()
        };
        let holders = lease.assigned_nodes.iter().map(|a| a.node).collect::<Vec<_>>();

        let mut market = Market::new(&config(&keys, data_dir), clock.clone()).unwrap();
        assert_eq!(market.engine().ledger().pool_balance(), 20_000);
        for key in &keys {
            let record = register(&mut market, key);
            let expected = if holders.contains(&key.address()) { 10 } else { 0 };
            assert_eq!(record.occupied, expected);
        }
        let genesis_after_bonds = market.balance_of(owner());

        clock.advance(100);
        let refund = market.terminate(lease.id).unwrap();
        assert_eq!(refund, 20_000 - 100 * 10 * 2);
        assert_eq!(market.balance_of(owner()), genesis_after_bonds + refund);
        for node in holders {
            assert_eq!(market.node(node).unwrap().occupied, 0);
        }
    }
}
