// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Lease Engine
//!
//! The storage-lease lifecycle and its accounting.
//!
//! A lease pays for `size_limit` bytes to be held by `replication_factor`
//! attested nodes until `end_time`. The engine owns every lease record and is
//! the only code that mutates one. Nodes and money live with the
//! [`NodeRegistry`](crate::registry::NodeRegistry) and
//! [`Ledger`](crate::ledger::Ledger) collaborators.
//!
//! ## Lifecycle
//!
//! ```text
//! create ──► pending ──(all nodes ack)──► live ──(end_time)──► expired
//!               │                          │                      │
//!        sweep (window elapsed)     terminate / dead      dead reports drain
//!               ▼                          ▼                      ▼
//!            removed                    removed               removed
//! ```
//!
//! ## Time
//!
//! The engine never reads a clock. Every operation takes `now` from its
//! caller, and time-based transitions only happen when somebody calls
//! [`LeaseEngine::sweep_unacknowledged`] or [`LeaseEngine::report_dead`].

mod accounting;
mod engine;
mod error;
mod events;
mod types;

use alloy::primitives::Address;

pub use accounting::{liveness_payout, storage_cost};
pub use engine::LeaseEngine;
pub use error::{ErrorKind, LeaseError};
pub use events::{EventRecord, LeaseEvent, TerminationReason};
pub use types::{Amount, Lease, LeaseId, NodeAssignment, Timestamp};

/// Market-wide lease parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseParams {
    /// Nodes assigned to every new lease.
    pub replication_factor: usize,
    /// Price per byte per second per replica.
    pub fee_rate: Amount,
    /// Largest `size_limit` a lease may request.
    pub max_size: u64,
    pub min_duration: u64,
    pub max_duration: u64,
    /// Seconds a newly assigned node has to acknowledge.
    pub ack_timeout: u64,
    /// Seconds of silence after which a node may be reported dead.
    pub dead_timeout: u64,
    /// Beneficiary of slashed bonds.
    pub protocol_pool: Address,
}
