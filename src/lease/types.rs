// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Lease records and the per-slot node assignments they own.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Opaque, monotonically increasing lease identifier.
pub type LeaseId = u64;

/// Unix time in seconds.
pub type Timestamp = u64;

/// Fixed-point balance in the ledger's smallest unit.
pub type Amount = u128;

/// One replication slot of a lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct NodeAssignment {
    /// Enclave signing address of the assigned node.
    #[schema(value_type = String)]
    pub node: Address,
    /// Whether the node confirmed it holds the data within its window.
    pub acknowledged: bool,
    /// When the node was selected for this slot.
    pub assigned_at: u64,
}

impl NodeAssignment {
    pub fn pending(node: Address, assigned_at: Timestamp) -> Self {
        Self {
            node,
            acknowledged: false,
            assigned_at,
        }
    }

    /// Last instant at which the node may still acknowledge.
    pub fn ack_deadline(&self, ack_timeout: u64) -> Timestamp {
        self.assigned_at.saturating_add(ack_timeout)
    }
}

/// A paid commitment to keep a secret replicated for a time window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub id: LeaseId,
    pub owner: Address,
    /// Bytes stored on every assigned node. Fixed for the lease's life.
    pub size_limit: u64,
    /// Escrow remaining for this lease.
    pub balance: Amount,
    /// Everything the owner has deposited, net of shortening refunds.
    pub total_deposit: Amount,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    /// Escrow has been debited through this instant.
    pub last_settled_time: Timestamp,
    pub assigned_nodes: Vec<NodeAssignment>,
    /// First instant every slot had acknowledged. Never cleared, so a
    /// replacement slot awaiting its acknowledgment does not demote the lease.
    #[serde(default)]
    pub live_since: Option<Timestamp>,
}

impl Lease {
    /// The lease has gone live at some point.
    pub fn is_live(&self) -> bool {
        self.live_since.is_some()
    }

    /// Every current slot has acknowledged.
    pub fn all_acknowledged(&self) -> bool {
        !self.assigned_nodes.is_empty() && self.assigned_nodes.iter().all(|a| a.acknowledged)
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.end_time
    }

    pub fn slot_of(&self, node: Address) -> Option<usize> {
        self.assigned_nodes.iter().position(|a| a.node == node)
    }

    pub fn nodes(&self) -> Vec<Address> {
        self.assigned_nodes.iter().map(|a| a.node).collect()
    }

    pub fn unacknowledged(&self) -> Vec<Address> {
        self.assigned_nodes
            .iter()
            .filter(|a| !a.acknowledged)
            .map(|a| a.node)
            .collect()
    }

    /// True once every slot's acknowledgment deadline lies strictly in the past.
    pub fn ack_windows_elapsed(&self, now: Timestamp, ack_timeout: u64) -> bool {
        self.assigned_nodes
            .iter()
            .all(|a| now > a.ack_deadline(ack_timeout))
    }
}
