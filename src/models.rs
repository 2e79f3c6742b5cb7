// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! This module defines the request and response data structures used by
//! the REST API. All types derive `ToSchema` for OpenAPI documentation.
//!
//! ## Addresses and Amounts
//!
//! Addresses travel as 0x-prefixed hex strings and are parsed into
//! `alloy::primitives::Address` at the edge. Amounts are integers in the
//! ledger's smallest unit.
//!
//! ## Model Categories
//!
//! - **Leases**: creation, end-time updates, lease views
//! - **Node claims**: acknowledgment, liveness and registration bodies
//! - **Accounts**: ledger balances and slashing penalties

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::lease::{Lease, NodeAssignment, Timestamp};
use crate::signature::SignedClaim;

// =============================================================================
// Lease Models
// =============================================================================

/// Request to open a lease. The authenticated caller becomes the owner.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateLeaseRequest {
    /// Bytes to store on every replica.
    pub size_limit: u64,
    /// Unix seconds at which the lease ends.
    pub end_time: u64,
    /// Escrow to pull from the caller's account.
    pub deposit: u128,
}

/// Request to move a lease's end time.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateLeaseEndRequest {
    pub end_time: u64,
    /// Extra escrow, only used when extending.
    #[serde(default)]
    pub deposit: u128,
}

/// A lease as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct LeaseView {
    pub id: u64,
    #[schema(value_type = String)]
    pub owner: Address,
    pub size_limit: u64,
    pub balance: u128,
    pub total_deposit: u128,
    pub start_time: u64,
    pub end_time: u64,
    pub last_settled_time: u64,
    /// Every assigned node acknowledged at some point; stays set while a
    /// replacement node is pending.
    pub live: bool,
    /// First instant the lease was fully acknowledged.
    pub live_since: Option<u64>,
    pub expired: bool,
    pub assigned_nodes: Vec<NodeAssignment>,
}

impl LeaseView {
    pub fn new(lease: &Lease, now: Timestamp) -> Self {
        Self {
            id: lease.id,
            owner: lease.owner,
            size_limit: lease.size_limit,
            balance: lease.balance,
            total_deposit: lease.total_deposit,
            start_time: lease.start_time,
            end_time: lease.end_time,
            last_settled_time: lease.last_settled_time,
            live: lease.is_live(),
            live_since: lease.live_since,
            expired: lease.is_expired(now),
            assigned_nodes: lease.assigned_nodes.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AcknowledgeResponse {
    pub lease_id: u64,
    /// Every assigned node has now acknowledged.
    pub live: bool,
}

/// Funds returned to a lease owner by a sweep or termination.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefundResponse {
    pub lease_id: u64,
    pub refund: u128,
}

// =============================================================================
// Node Models
// =============================================================================

/// Register the enclave that signed `claim`, bonded by the caller.
///
/// The claim subject is `{owner}:{capacity}:{bond}` with the owner as
/// lowercase 0x hex.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegisterNodeRequest {
    pub capacity: u64,
    pub bond: u128,
    pub claim: SignedClaim,
}

/// Liveness report signed by the node itself over its own address.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReportAliveRequest {
    #[schema(value_type = String)]
    pub node: Address,
    pub claim: SignedClaim,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReportAliveResponse {
    #[schema(value_type = String)]
    pub node: Address,
    /// Paid to the node's operator.
    pub payout: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReportDeadRequest {
    /// Leases the node is believed to hold.
    pub lease_ids: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReportDeadResponse {
    #[schema(value_type = String)]
    pub node: Address,
    /// Leases where the node held an acknowledged slot.
    pub processed: Vec<u64>,
}

// =============================================================================
// Account Models
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AccountResponse {
    #[schema(value_type = String)]
    pub address: Address,
    pub balance: u128,
    /// Slashed bonds credited to this account.
    pub penalties: u128,
}
