// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Node Registry
//!
//! The lease engine talks to storage nodes only through [`NodeRegistry`].
//! A registry tracks each node's capacity, liveness timestamp, owner and
//! bond, and decides which enclave signing keys are currently trusted.
//!
//! [`InMemoryRegistry`] is the registry this service runs with. Attestation
//! is reduced to a configured set of trusted signer addresses, and selection
//! is deterministic (most free capacity first) rather than weighted-random.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::lease::{Amount, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown node {0}")]
    UnknownNode(Address),

    #[error("node {0} is already registered")]
    AlreadyRegistered(Address),

    #[error("node {node} cannot release {size} bytes, only {occupied} occupied")]
    CapacityUnderflow {
        node: Address,
        size: u64,
        occupied: u64,
    },
}

impl RegistryError {
    pub fn error_code(&self) -> &'static str {
        match self {
            RegistryError::UnknownNode(_) => "unknown_node",
            RegistryError::AlreadyRegistered(_) => "node_already_registered",
            RegistryError::CapacityUnderflow { .. } => "capacity_underflow",
        }
    }
}

/// Capacity, liveness and trust bookkeeping for storage nodes.
pub trait NodeRegistry {
    /// Reserve `size` bytes on up to `count` distinct nodes, skipping `exclude`.
    ///
    /// Best effort: may return fewer than `count` nodes. Every returned node
    /// already holds the reservation and must be released on rollback.
    fn select(&mut self, count: usize, size: u64, exclude: &[Address]) -> Vec<Address>;

    /// Return reserved capacity.
    fn release(&mut self, node: Address, size: u64) -> Result<(), RegistryError>;

    /// Penalize `node` in proportion to `size`, crediting `beneficiary`.
    fn slash(&mut self, node: Address, size: u64, beneficiary: Address)
        -> Result<Amount, RegistryError>;

    fn touch_alive(&mut self, node: Address, timestamp: Timestamp) -> Result<(), RegistryError>;

    fn last_alive(&self, node: Address) -> Result<Timestamp, RegistryError>;

    fn occupied_size(&self, node: Address) -> Result<u64, RegistryError>;

    /// Payout address of the node's operator.
    fn owner(&self, node: Address) -> Result<Address, RegistryError>;

    /// Whether `signer` is an enclave key backed by a trusted image.
    fn is_verified_signer(&self, signer: Address) -> bool;

    /// Oldest signature, in seconds, the registry accepts.
    fn signature_max_age(&self) -> u64;
}

/// A registered storage node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NodeRecord {
    #[schema(value_type = String)]
    pub address: Address,
    #[schema(value_type = String)]
    pub owner: Address,
    pub capacity: u64,
    pub occupied: u64,
    /// Remaining bond after slashing.
    pub bond: u128,
    pub last_alive: u64,
}

impl NodeRecord {
    pub fn free(&self) -> u64 {
        self.capacity.saturating_sub(self.occupied)
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryRegistry {
    nodes: BTreeMap<Address, NodeRecord>,
    trusted: BTreeSet<Address>,
    penalties: HashMap<Address, Amount>,
    signature_max_age: u64,
    /// Bond forfeited per slashed byte.
    slash_rate: Amount,
}

impl InMemoryRegistry {
    pub fn new(signature_max_age: u64, slash_rate: Amount) -> Self {
        Self {
            nodes: BTreeMap::new(),
            trusted: BTreeSet::new(),
            penalties: HashMap::new(),
            signature_max_age,
            slash_rate,
        }
    }

    pub fn trust_signer(&mut self, signer: Address) {
        self.trusted.insert(signer);
    }

    /// Add a node. Its liveness clock starts at `now`.
    pub fn register(
        &mut self,
        address: Address,
        owner: Address,
        capacity: u64,
        bond: Amount,
        now: Timestamp,
    ) -> Result<&NodeRecord, RegistryError> {
        if self.nodes.contains_key(&address) {
            return Err(RegistryError::AlreadyRegistered(address));
        }
        let record = NodeRecord {
            address,
            owner,
            capacity,
            occupied: 0,
            bond,
            last_alive: now,
        };
        Ok(self.nodes.entry(address).or_insert(record))
    }

    /// Mark `size` bytes as held without a selection, for leases a node
    /// already stores. Capacity is not checked; an overcommitted node simply
    /// has no free space.
    pub fn reserve(&mut self, node: Address, size: u64) -> Result<(), RegistryError> {
        let record = self.node_mut(node)?;
        record.occupied = record.occupied.saturating_add(size);
        Ok(())
    }

    pub fn node(&self, address: Address) -> Option<&NodeRecord> {
        self.nodes.get(&address)
    }

    pub fn is_registered(&self, address: Address) -> bool {
        self.nodes.contains_key(&address)
    }

    /// Slashed bond credited to `beneficiary` so far.
    pub fn penalties_of(&self, beneficiary: Address) -> Amount {
        self.penalties.get(&beneficiary).copied().unwrap_or(0)
    }

    fn node_mut(&mut self, node: Address) -> Result<&mut NodeRecord, RegistryError> {
        self.nodes
            .get_mut(&node)
            .ok_or(RegistryError::UnknownNode(node))
    }

    fn record(&self, node: Address) -> Result<&NodeRecord, RegistryError> {
        self.nodes.get(&node).ok_or(RegistryError::UnknownNode(node))
    }
}

impl NodeRegistry for InMemoryRegistry {
    fn select(&mut self, count: usize, size: u64, exclude: &[Address]) -> Vec<Address> {
        let mut candidates: Vec<(u64, Address)> = self
            .nodes
            .values()
            .filter(|n| self.trusted.contains(&n.address))
            .filter(|n| !exclude.contains(&n.address))
            .filter(|n| n.free() >= size)
            .map(|n| (n.free(), n.address))
            .collect();

        // Most free capacity first; address breaks ties.
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let picked: Vec<Address> = candidates
            .into_iter()
            .take(count)
            .map(|(_, address)| address)
            .collect();

        for address in &picked {
            if let Some(node) = self.nodes.get_mut(address) {
                node.occupied += size;
            }
        }
        picked
    }

    fn release(&mut self, node: Address, size: u64) -> Result<(), RegistryError> {
        let record = self.node_mut(node)?;
        if record.occupied < size {
            return Err(RegistryError::CapacityUnderflow {
                node,
                size,
                occupied: record.occupied,
            });
        }
        record.occupied -= size;
        Ok(())
    }

    fn slash(
        &mut self,
        node: Address,
        size: u64,
        beneficiary: Address,
    ) -> Result<Amount, RegistryError> {
        let rate = self.slash_rate;
        let record = self.node_mut(node)?;
        let penalty = Amount::from(size).saturating_mul(rate).min(record.bond);
        record.bond -= penalty;
        *self.penalties.entry(beneficiary).or_default() += penalty;
        Ok(penalty)
    }

    fn touch_alive(&mut self, node: Address, timestamp: Timestamp) -> Result<(), RegistryError> {
        self.node_mut(node)?.last_alive = timestamp;
        Ok(())
    }

    fn last_alive(&self, node: Address) -> Result<Timestamp, RegistryError> {
        Ok(self.record(node)?.last_alive)
    }

    fn occupied_size(&self, node: Address) -> Result<u64, RegistryError> {
        Ok(self.record(node)?.occupied)
    }

    fn owner(&self, node: Address) -> Result<Address, RegistryError> {
        Ok(self.record(node)?.owner)
    }

    fn is_verified_signer(&self, signer: Address) -> bool {
        self.trusted.contains(&signer)
    }

    fn signature_max_age(&self) -> u64 {
        self.signature_max_age
    }
}
