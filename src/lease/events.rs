// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Lease transition events.
//!
//! Events are the market's only audit trail. The engine buffers them while an
//! operation runs and hands them out only after the operation commits, so
//! each causing transition is recorded exactly once.

use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::LeaseId;

/// Why a lease record was removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Explicit `terminate` call.
    Requested,
    /// Dead-node handling left no assigned nodes.
    ReplicasExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LeaseEvent {
    LeaseCreated {
        lease_id: u64,
        #[schema(value_type = String)]
        owner: Address,
        size_limit: u64,
        deposit: u128,
        start_time: u64,
        end_time: u64,
        #[schema(value_type = Vec<String>)]
        nodes: Vec<Address>,
    },
    NodeAcknowledged {
        lease_id: u64,
        #[schema(value_type = String)]
        node: Address,
        /// Every slot has now acknowledged.
        live: bool,
    },
    AcknowledgmentFailed {
        lease_id: u64,
        #[schema(value_type = Vec<String>)]
        unacknowledged: Vec<Address>,
        refund: u128,
    },
    NodeAlive {
        #[schema(value_type = String)]
        node: Address,
        #[schema(value_type = String)]
        owner: Address,
        timestamp: u64,
        elapsed: u64,
        occupied_size: u64,
        payout: u128,
    },
    LeaseSettled {
        lease_id: u64,
        settled_until: u64,
        amount: u128,
        balance: u128,
    },
    NodeReplaced {
        lease_id: u64,
        #[schema(value_type = String)]
        dead_node: Address,
        #[schema(value_type = String)]
        replacement: Address,
    },
    NodeRemoved {
        lease_id: u64,
        #[schema(value_type = String)]
        node: Address,
    },
    ResourceUnavailable {
        lease_id: u64,
        #[schema(value_type = String)]
        node: Address,
        size: u64,
    },
    NodeSlashed {
        lease_id: u64,
        #[schema(value_type = String)]
        node: Address,
        size: u64,
        penalty: u128,
        #[schema(value_type = String)]
        beneficiary: Address,
    },
    NodeDeadProcessed {
        #[schema(value_type = String)]
        node: Address,
        processed: Vec<u64>,
        timestamp: u64,
    },
    LeaseEndUpdated {
        lease_id: u64,
        previous_end: u64,
        new_end: u64,
        deposit: u128,
        refund: u128,
    },
    LeaseTerminated {
        lease_id: u64,
        #[schema(value_type = String)]
        owner: Address,
        refund: u128,
        reason: TerminationReason,
    },
}

impl LeaseEvent {
    /// The lease this event touched, if any.
    pub fn lease_id(&self) -> Option<LeaseId> {
        match self {
            LeaseEvent::LeaseCreated { lease_id, .. }
            | LeaseEvent::NodeAcknowledged { lease_id, .. }
            | LeaseEvent::AcknowledgmentFailed { lease_id, .. }
            | LeaseEvent::LeaseSettled { lease_id, .. }
            | LeaseEvent::NodeReplaced { lease_id, .. }
            | LeaseEvent::NodeRemoved { lease_id, .. }
            | LeaseEvent::ResourceUnavailable { lease_id, .. }
            | LeaseEvent::NodeSlashed { lease_id, .. }
            | LeaseEvent::LeaseEndUpdated { lease_id, .. }
            | LeaseEvent::LeaseTerminated { lease_id, .. } => Some(*lease_id),
            LeaseEvent::NodeAlive { .. } | LeaseEvent::NodeDeadProcessed { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LeaseEvent::LeaseCreated { .. } => "lease_created",
            LeaseEvent::NodeAcknowledged { .. } => "node_acknowledged",
            LeaseEvent::AcknowledgmentFailed { .. } => "acknowledgment_failed",
            LeaseEvent::NodeAlive { .. } => "node_alive",
            LeaseEvent::LeaseSettled { .. } => "lease_settled",
            LeaseEvent::NodeReplaced { .. } => "node_replaced",
            LeaseEvent::NodeRemoved { .. } => "node_removed",
            LeaseEvent::ResourceUnavailable { .. } => "resource_unavailable",
            LeaseEvent::NodeSlashed { .. } => "node_slashed",
            LeaseEvent::NodeDeadProcessed { .. } => "node_dead_processed",
            LeaseEvent::LeaseEndUpdated { .. } => "lease_end_updated",
            LeaseEvent::LeaseTerminated { .. } => "lease_terminated",
        }
    }
}

/// A committed event as stored in the audit log.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EventRecord {
    /// Position in the log, starting at 1.
    pub seq: u64,
    pub event_id: uuid::Uuid,
    pub recorded_at: DateTime<Utc>,
    pub event: LeaseEvent,
}

impl EventRecord {
    pub fn new(seq: u64, event: LeaseEvent) -> Self {
        Self {
            seq,
            event_id: uuid::Uuid::new_v4(),
            recorded_at: Utc::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let event = LeaseEvent::NodeRemoved {
            lease_id: 7,
            node: Address::repeat_byte(0x11),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "node_removed");
        assert_eq!(json["lease_id"], 7);
        assert_eq!(event.name(), "node_removed");
    }

    #[test]
    fn node_level_events_have_no_lease() {
        let event = LeaseEvent::NodeDeadProcessed {
            node: Address::ZERO,
            processed: vec![1, 2],
            timestamp: 10,
        };
        assert_eq!(event.lease_id(), None);

        let event = LeaseEvent::LeaseTerminated {
            lease_id: 3,
            owner: Address::ZERO,
            refund: 0,
            reason: TerminationReason::Requested,
        };
        assert_eq!(event.lease_id(), Some(3));
    }
}
