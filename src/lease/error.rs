// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Lease engine errors.
//!
//! Every variant is a precondition failure: the operation that raised it left
//! no trace in the lease table, and the caller may retry once the inputs or
//! the clock allow it.

use alloy::primitives::Address;

use super::{Amount, LeaseId, Timestamp};
use crate::ledger::LedgerError;
use crate::registry::RegistryError;
use crate::signature::SignatureError;

/// Coarse classification used to pick an HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Resource,
    NotFound,
    Forbidden,
    State,
    Duplicate,
    Collaborator,
}

#[derive(Debug, thiserror::Error)]
pub enum LeaseError {
    // Validation
    #[error("size limit {size} outside (0, {max}]")]
    InvalidSize { size: u64, max: u64 },

    #[error("lease duration {duration}s outside [{min}s, {max}s]")]
    InvalidDuration { duration: u64, min: u64, max: u64 },

    #[error("deposit {provided} below required minimum {required}")]
    InsufficientDeposit { required: Amount, provided: Amount },

    #[error("signature is {age}s old, maximum is {max_age}s")]
    StaleSignature { age: u64, max_age: u64 },

    #[error("signature timestamp {timestamp} is in the future")]
    FutureSignature { timestamp: Timestamp },

    #[error("signer {0} is not a verified enclave key")]
    UnverifiedSigner(Address),

    #[error("claim for node {node} was signed by {signer}")]
    SignerMismatch { node: Address, signer: Address },

    #[error("invalid signature: {0}")]
    InvalidSignature(#[from] SignatureError),

    #[error("end time {end_time} is not a valid new end")]
    InvalidEndTime { end_time: Timestamp },

    #[error("amount arithmetic overflowed")]
    AmountOverflow,

    // Resource
    #[error("only {available} of {requested} nodes available")]
    InsufficientNodes { requested: usize, available: usize },

    // State
    #[error("lease {0} not found")]
    LeaseNotFound(LeaseId),

    #[error("lease {0} has expired")]
    LeaseExpired(LeaseId),

    #[error("caller {caller} does not own lease {lease_id}")]
    NotOwner { lease_id: LeaseId, caller: Address },

    #[error("node {node} is not assigned to lease {lease_id}")]
    NotAssigned { lease_id: LeaseId, node: Address },

    #[error("acknowledgment window for node {node} on lease {lease_id} has closed")]
    AckWindowClosed { lease_id: LeaseId, node: Address },

    #[error("lease {0} still has an open acknowledgment window")]
    AckWindowOpen(LeaseId),

    #[error("lease {0} is not fully acknowledged")]
    NotFullyAcknowledged(LeaseId),

    #[error("node {node} was last alive at {last_alive}, within the dead timeout")]
    NodeStillAlive { node: Address, last_alive: Timestamp },

    #[error("liveness timestamp {timestamp} does not advance past {last_alive}")]
    LivenessNotNewer {
        timestamp: Timestamp,
        last_alive: Timestamp,
    },

    #[error("refund {refund} exceeds lease {lease_id} balance {balance}")]
    EscrowShortfall {
        lease_id: LeaseId,
        refund: Amount,
        balance: Amount,
    },

    // Duplicate
    #[error("node {node} already acknowledged lease {lease_id}")]
    AlreadyAcknowledged { lease_id: LeaseId, node: Address },

    #[error("lease {0} is already fully acknowledged")]
    AlreadyLive(LeaseId),

    // Collaborators
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl LeaseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LeaseError::InvalidSize { .. }
            | LeaseError::InvalidDuration { .. }
            | LeaseError::InsufficientDeposit { .. }
            | LeaseError::StaleSignature { .. }
            | LeaseError::FutureSignature { .. }
            | LeaseError::UnverifiedSigner(_)
            | LeaseError::SignerMismatch { .. }
            | LeaseError::InvalidSignature(_)
            | LeaseError::InvalidEndTime { .. }
            | LeaseError::AmountOverflow => ErrorKind::Validation,
            LeaseError::InsufficientNodes { .. } => ErrorKind::Resource,
            LeaseError::LeaseNotFound(_) => ErrorKind::NotFound,
            LeaseError::NotOwner { .. } => ErrorKind::Forbidden,
            LeaseError::LeaseExpired(_)
            | LeaseError::NotAssigned { .. }
            | LeaseError::AckWindowClosed { .. }
            | LeaseError::AckWindowOpen(_)
            | LeaseError::NotFullyAcknowledged(_)
            | LeaseError::NodeStillAlive { .. }
            | LeaseError::LivenessNotNewer { .. }
            | LeaseError::EscrowShortfall { .. } => ErrorKind::State,
            LeaseError::AlreadyAcknowledged { .. } | LeaseError::AlreadyLive(_) => {
                ErrorKind::Duplicate
            }
            LeaseError::Registry(RegistryError::UnknownNode(_)) => ErrorKind::NotFound,
            LeaseError::Ledger(LedgerError::InsufficientFunds { .. }) => ErrorKind::Validation,
            LeaseError::Registry(_) | LeaseError::Ledger(_) => ErrorKind::Collaborator,
        }
    }

    /// Stable machine-readable reason.
    pub fn error_code(&self) -> &'static str {
        match self {
            LeaseError::InvalidSize { .. } => "invalid_size",
            LeaseError::InvalidDuration { .. } => "invalid_duration",
            LeaseError::InsufficientDeposit { .. } => "insufficient_deposit",
            LeaseError::StaleSignature { .. } => "stale_signature",
            LeaseError::FutureSignature { .. } => "future_signature",
            LeaseError::UnverifiedSigner(_) => "unverified_signer",
            LeaseError::SignerMismatch { .. } => "signer_mismatch",
            LeaseError::InvalidSignature(_) => "invalid_signature",
            LeaseError::InvalidEndTime { .. } => "invalid_end_time",
            LeaseError::AmountOverflow => "amount_overflow",
            LeaseError::InsufficientNodes { .. } => "insufficient_nodes",
            LeaseError::LeaseNotFound(_) => "lease_not_found",
            LeaseError::LeaseExpired(_) => "lease_expired",
            LeaseError::NotOwner { .. } => "not_owner",
            LeaseError::NotAssigned { .. } => "not_assigned",
            LeaseError::AckWindowClosed { .. } => "ack_window_closed",
            LeaseError::AckWindowOpen(_) => "ack_window_open",
            LeaseError::NotFullyAcknowledged(_) => "not_fully_acknowledged",
            LeaseError::NodeStillAlive { .. } => "node_still_alive",
            LeaseError::LivenessNotNewer { .. } => "liveness_not_newer",
            LeaseError::EscrowShortfall { .. } => "escrow_shortfall",
            LeaseError::AlreadyAcknowledged { .. } => "already_acknowledged",
            LeaseError::AlreadyLive(_) => "already_live",
            LeaseError::Registry(e) => e.error_code(),
            LeaseError::Ledger(e) => e.error_code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_cover_the_taxonomy() {
        assert_eq!(
            LeaseError::InsufficientDeposit {
                required: 2,
                provided: 1
            }
            .kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            LeaseError::InsufficientNodes {
                requested: 3,
                available: 2
            }
            .kind(),
            ErrorKind::Resource
        );
        assert_eq!(LeaseError::AckWindowOpen(1).kind(), ErrorKind::State);
        assert_eq!(LeaseError::AlreadyLive(1).kind(), ErrorKind::Duplicate);
        assert_eq!(LeaseError::LeaseNotFound(9).kind(), ErrorKind::NotFound);
        assert_eq!(
            LeaseError::Ledger(LedgerError::PoolExhausted {
                requested: 5,
                available: 1
            })
            .kind(),
            ErrorKind::Collaborator
        );
    }

    #[test]
    fn display_includes_context() {
        let err = LeaseError::InvalidDuration {
            duration: 5,
            min: 10,
            max: 20,
        };
        assert_eq!(err.to_string(), "lease duration 5s outside [10s, 20s]");
        assert_eq!(err.error_code(), "invalid_duration");
    }
}
