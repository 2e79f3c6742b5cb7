// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Storage price arithmetic.
//!
//! Every charge in the market is `seconds × bytes × fee_rate × replicas`.
//! Minimum deposits and shortening refunds price at the configured
//! replication factor, while escrow settlement prices at the lease's current
//! replica count. Keep the two call sites distinct.

use super::{Amount, LeaseError};

/// Price `seconds` of storing `size` bytes on `replicas` nodes.
pub fn storage_cost(
    seconds: u64,
    size: u64,
    fee_rate: Amount,
    replicas: usize,
) -> Result<Amount, LeaseError> {
    Amount::from(seconds)
        .checked_mul(Amount::from(size))
        .and_then(|v| v.checked_mul(fee_rate))
        .and_then(|v| v.checked_mul(replicas as Amount))
        .ok_or(LeaseError::AmountOverflow)
}

/// Per-node liveness payment for `seconds` of holding `occupied` bytes.
pub fn liveness_payout(seconds: u64, occupied: u64, fee_rate: Amount) -> Result<Amount, LeaseError> {
    storage_cost(seconds, occupied, fee_rate, 1)
}
