// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The lease state machine.
//!
//! Every public mutating operation runs inside [`LeaseEngine::transact`] and
//! follows the same order: check every precondition, perform the fallible
//! ledger transfer, then mutate the lease table and hand capacity back to the
//! registry. A failed check or transfer therefore leaves nothing behind, and
//! events buffered by the failed call are dropped.

use std::collections::{BTreeMap, BTreeSet};

use alloy::primitives::Address;
use tracing::{debug, error, info, warn};

use super::accounting::{liveness_payout, storage_cost};
use super::{
    Amount, Lease, LeaseError, LeaseEvent, LeaseId, LeaseParams, NodeAssignment,
    TerminationReason, Timestamp,
};
use crate::ledger::{Ledger, LedgerError};
use crate::registry::NodeRegistry;
use crate::signature::{address_subject, ClaimKind, SignatureAuthority, SignedClaim};

/// Escrow debit for one lease up to a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Settlement {
    until: Timestamp,
    amount: Amount,
}

pub struct LeaseEngine<R, L> {
    params: LeaseParams,
    leases: BTreeMap<LeaseId, Lease>,
    next_id: LeaseId,
    registry: R,
    ledger: L,
    authority: SignatureAuthority,
    /// Events of committed operations not yet taken by the caller.
    pending: Vec<LeaseEvent>,
}

impl<R: NodeRegistry, L: Ledger> LeaseEngine<R, L> {
    pub fn new(params: LeaseParams, registry: R, ledger: L, authority: SignatureAuthority) -> Self {
        Self {
            params,
            leases: BTreeMap::new(),
            next_id: 1,
            registry,
            ledger,
            authority,
            pending: Vec::new(),
        }
    }

    /// Reload persisted leases. `next_id` never moves backwards.
    pub fn restore(&mut self, leases: impl IntoIterator<Item = Lease>, next_id: LeaseId) {
        for lease in leases {
            self.next_id = self.next_id.max(lease.id + 1);
            self.leases.insert(lease.id, lease);
        }
        self.next_id = self.next_id.max(next_id);
    }

    /// Take the events of every operation committed since the last call.
    pub fn take_events(&mut self) -> Vec<LeaseEvent> {
        std::mem::take(&mut self.pending)
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Open a lease paid for by `owner` and reserve capacity on
    /// `replication_factor` nodes.
    pub fn create_lease(
        &mut self,
        owner: Address,
        size_limit: u64,
        end_time: Timestamp,
        deposit: Amount,
        now: Timestamp,
    ) -> Result<LeaseId, LeaseError> {
        self.transact(|engine| engine.create_lease_inner(owner, size_limit, end_time, deposit, now))
    }

    fn create_lease_inner(
        &mut self,
        owner: Address,
        size_limit: u64,
        end_time: Timestamp,
        deposit: Amount,
        now: Timestamp,
    ) -> Result<LeaseId, LeaseError> {
        let params = &self.params;
        if size_limit == 0 || size_limit > params.max_size {
            return Err(LeaseError::InvalidSize {
                size: size_limit,
                max: params.max_size,
            });
        }

        let duration = end_time.saturating_sub(now);
        if end_time <= now || duration < params.min_duration || duration > params.max_duration {
            return Err(LeaseError::InvalidDuration {
                duration,
                min: params.min_duration,
                max: params.max_duration,
            });
        }

        let required = storage_cost(
            duration,
            size_limit,
            params.fee_rate,
            params.replication_factor,
        )?;
        if deposit < required {
            return Err(LeaseError::InsufficientDeposit {
                required,
                provided: deposit,
            });
        }

        let requested = params.replication_factor;
        let nodes = self.registry.select(requested, size_limit, &[]);
        if nodes.len() < requested {
            let available = nodes.len();
            self.release_all(&nodes, size_limit, None);
            return Err(LeaseError::InsufficientNodes {
                requested,
                available,
            });
        }

        if let Err(e) = self.ledger.transfer_in(owner, deposit) {
            self.release_all(&nodes, size_limit, None);
            return Err(e.into());
        }

        let id = self.next_id;
        self.next_id += 1;

        let lease = Lease {
            id,
            owner,
            size_limit,
            balance: deposit,
            total_deposit: deposit,
            start_time: now,
            end_time,
            last_settled_time: now,
            assigned_nodes: nodes
                .iter()
                .map(|node| NodeAssignment::pending(*node, now))
                .collect(),
            live_since: None,
        };
        self.leases.insert(id, lease);

        self.emit(LeaseEvent::LeaseCreated {
            lease_id: id,
            owner,
            size_limit,
            deposit,
            start_time: now,
            end_time,
            nodes,
        });
        Ok(id)
    }

    /// Record a node's signed acknowledgment. Returns whether the lease is
    /// now live.
    pub fn acknowledge(
        &mut self,
        lease_id: LeaseId,
        claim: &SignedClaim,
        now: Timestamp,
    ) -> Result<bool, LeaseError> {
        self.transact(|engine| {
            let ack_timeout = engine.params.ack_timeout;
            let lease = engine.get(lease_id)?;
            if lease.is_expired(now) {
                return Err(LeaseError::LeaseExpired(lease_id));
            }

            let node = engine.authority.verify_node_claim(
                ClaimKind::Acknowledge,
                &lease_id.to_string(),
                claim,
                now,
                &engine.registry,
            )?;

            let slot = lease
                .slot_of(node)
                .ok_or(LeaseError::NotAssigned { lease_id, node })?;
            let assignment = &lease.assigned_nodes[slot];
            if assignment.acknowledged {
                return Err(if lease.all_acknowledged() {
                    LeaseError::AlreadyLive(lease_id)
                } else {
                    LeaseError::AlreadyAcknowledged { lease_id, node }
                });
            }
            if now > assignment.ack_deadline(ack_timeout) {
                return Err(LeaseError::AckWindowClosed { lease_id, node });
            }

            let lease = engine.get_mut(lease_id)?;
            lease.assigned_nodes[slot].acknowledged = true;
            let live = lease.all_acknowledged();
            if live && lease.live_since.is_none() {
                lease.live_since = Some(now);
            }

            engine.emit(LeaseEvent::NodeAcknowledged {
                lease_id,
                node,
                live,
            });
            Ok(live)
        })
    }

    /// Remove a lease that never went live once every acknowledgment window
    /// has elapsed. Returns the refund paid to the owner.
    pub fn sweep_unacknowledged(
        &mut self,
        lease_id: LeaseId,
        now: Timestamp,
    ) -> Result<Amount, LeaseError> {
        self.transact(|engine| {
            let lease = engine.get(lease_id)?;
            if lease.is_live() {
                return Err(LeaseError::AlreadyLive(lease_id));
            }
            if !lease.ack_windows_elapsed(now, engine.params.ack_timeout) {
                return Err(LeaseError::AckWindowOpen(lease_id));
            }

            let (owner, refund) = (lease.owner, lease.balance);
            if refund > 0 {
                engine.ledger.transfer_out(owner, refund)?;
            }

            let lease = engine.remove(lease_id)?;
            let unacknowledged = lease.unacknowledged();
            engine.release_all(&lease.nodes(), lease.size_limit, Some(lease_id));

            engine.emit(LeaseEvent::AcknowledgmentFailed {
                lease_id,
                unacknowledged,
                refund,
            });
            Ok(refund)
        })
    }

    /// Pay a node for the time since its last liveness report. Returns the
    /// payout.
    pub fn report_alive(
        &mut self,
        node: Address,
        claim: &SignedClaim,
        now: Timestamp,
    ) -> Result<Amount, LeaseError> {
        self.transact(|engine| {
            let signer = engine.authority.verify_node_claim(
                ClaimKind::Alive,
                &address_subject(node),
                claim,
                now,
                &engine.registry,
            )?;
            if signer != node {
                return Err(LeaseError::SignerMismatch { node, signer });
            }

            let last_alive = engine.registry.last_alive(node)?;
            if claim.timestamp <= last_alive {
                return Err(LeaseError::LivenessNotNewer {
                    timestamp: claim.timestamp,
                    last_alive,
                });
            }

            let elapsed = claim.timestamp - last_alive;
            let occupied_size = engine.registry.occupied_size(node)?;
            let payout = liveness_payout(elapsed, occupied_size, engine.params.fee_rate)?;
            let owner = engine.registry.owner(node)?;

            if payout > 0 {
                engine.ledger.transfer_out(owner, payout)?;
            }
            engine.registry.touch_alive(node, claim.timestamp)?;

            engine.emit(LeaseEvent::NodeAlive {
                node,
                owner,
                timestamp: claim.timestamp,
                elapsed,
                occupied_size,
                payout,
            });
            Ok(payout)
        })
    }

    /// Handle a node that stopped reporting liveness.
    ///
    /// Leases that do not exist, or where the node holds no acknowledged
    /// slot, are skipped. Returns the ids of the leases that were processed.
    /// A failure on any listed lease aborts the whole report, leaving the
    /// node's liveness clock untouched so the report can be retried.
    pub fn report_dead(
        &mut self,
        node: Address,
        lease_ids: &[LeaseId],
        now: Timestamp,
    ) -> Result<Vec<LeaseId>, LeaseError> {
        self.transact(|engine| {
            let last_alive = engine.registry.last_alive(node)?;
            if !engine.is_dead(last_alive, now) {
                return Err(LeaseError::NodeStillAlive { node, last_alive });
            }

            let mut seen = BTreeSet::new();
            let mut targets = Vec::new();
            for &lease_id in lease_ids {
                if !seen.insert(lease_id) {
                    continue;
                }
                let holds_acknowledged_slot = engine.leases.get(&lease_id).is_some_and(|lease| {
                    lease
                        .slot_of(node)
                        .is_some_and(|slot| lease.assigned_nodes[slot].acknowledged)
                });
                if holds_acknowledged_slot {
                    targets.push(lease_id);
                } else {
                    debug!(lease_id, node = %node, "Skipping lease without acknowledged slot");
                }
            }

            // Nothing below may fail once the first lease has been touched.
            engine.check_dead_refunds(&targets, now)?;
            let mut processed = Vec::with_capacity(targets.len());
            for lease_id in targets {
                engine.process_dead_slot(lease_id, node, now)?;
                processed.push(lease_id);
            }

            engine.registry.touch_alive(node, now)?;
            engine.emit(LeaseEvent::NodeDeadProcessed {
                node,
                processed: processed.clone(),
                timestamp: now,
            });
            Ok(processed)
        })
    }

    /// Move a live lease's end time. Extending pulls `deposit` into escrow;
    /// shortening refunds the removed time at the target replication factor.
    pub fn update_lease_end(
        &mut self,
        lease_id: LeaseId,
        caller: Address,
        new_end: Timestamp,
        deposit: Amount,
        now: Timestamp,
    ) -> Result<(), LeaseError> {
        self.transact(|engine| {
            let params = &engine.params;
            let lease = engine.get(lease_id)?;
            if caller != lease.owner {
                return Err(LeaseError::NotOwner { lease_id, caller });
            }
            if lease.is_expired(now) {
                return Err(LeaseError::LeaseExpired(lease_id));
            }
            if !lease.is_live() {
                return Err(LeaseError::NotFullyAcknowledged(lease_id));
            }
            if new_end <= now || new_end == lease.end_time {
                return Err(LeaseError::InvalidEndTime { end_time: new_end });
            }

            let (owner, previous_end) = (lease.owner, lease.end_time);
            let (deposit, refund) = if new_end > previous_end {
                let total = lease
                    .total_deposit
                    .checked_add(deposit)
                    .ok_or(LeaseError::AmountOverflow)?;
                let balance = lease
                    .balance
                    .checked_add(deposit)
                    .ok_or(LeaseError::AmountOverflow)?;
                let required = storage_cost(
                    new_end - lease.start_time,
                    lease.size_limit,
                    params.fee_rate,
                    params.replication_factor,
                )?;
                if total < required {
                    return Err(LeaseError::InsufficientDeposit {
                        required,
                        provided: total,
                    });
                }

                if deposit > 0 {
                    engine.ledger.transfer_in(owner, deposit)?;
                }
                let lease = engine.get_mut(lease_id)?;
                lease.total_deposit = total;
                lease.balance = balance;
                lease.end_time = new_end;
                (deposit, 0)
            } else {
                if deposit > 0 {
                    debug!(lease_id, deposit, "Ignoring deposit on shortening");
                }
                let refund = storage_cost(
                    previous_end - new_end,
                    lease.size_limit,
                    params.fee_rate,
                    params.replication_factor,
                )?;
                if refund > lease.balance {
                    return Err(LeaseError::EscrowShortfall {
                        lease_id,
                        refund,
                        balance: lease.balance,
                    });
                }

                if refund > 0 {
                    engine.ledger.transfer_out(owner, refund)?;
                }
                let lease = engine.get_mut(lease_id)?;
                lease.balance -= refund;
                lease.total_deposit = lease.total_deposit.saturating_sub(refund);
                lease.end_time = new_end;
                (0, refund)
            };

            engine.emit(LeaseEvent::LeaseEndUpdated {
                lease_id,
                previous_end,
                new_end,
                deposit,
                refund,
            });
            Ok(())
        })
    }

    /// Settle a lease, refund what remains and delete it. Returns the refund.
    pub fn terminate(&mut self, lease_id: LeaseId, now: Timestamp) -> Result<Amount, LeaseError> {
        self.transact(|engine| {
            let lease = engine.get(lease_id)?;
            let settlement = engine.settlement(lease, now)?;
            let refund = lease.balance - settlement.amount;
            let owner = lease.owner;

            if refund > 0 {
                engine.ledger.transfer_out(owner, refund)?;
            }

            engine.apply_settlement(lease_id, settlement)?;
            let lease = engine.remove(lease_id)?;
            engine.release_all(&lease.nodes(), lease.size_limit, Some(lease_id));

            engine.emit(LeaseEvent::LeaseTerminated {
                lease_id,
                owner,
                refund,
                reason: TerminationReason::Requested,
            });
            Ok(refund)
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn params(&self) -> &LeaseParams {
        &self.params
    }

    pub fn lease(&self, lease_id: LeaseId) -> Result<&Lease, LeaseError> {
        self.get(lease_id)
    }

    pub fn assignments(&self, lease_id: LeaseId) -> Result<&[NodeAssignment], LeaseError> {
        Ok(&self.get(lease_id)?.assigned_nodes)
    }

    pub fn leases(&self) -> impl Iterator<Item = &Lease> {
        self.leases.values()
    }

    pub fn lease_count(&self) -> usize {
        self.leases.len()
    }

    /// Id the next created lease will receive.
    pub fn next_id(&self) -> LeaseId {
        self.next_id
    }

    /// Leases that list `node` in their assignment set.
    pub fn leases_of_node(&self, node: Address) -> Vec<LeaseId> {
        self.leases
            .values()
            .filter(|lease| lease.slot_of(node).is_some())
            .map(|lease| lease.id)
            .collect()
    }

    /// Leases a sweep would currently succeed on.
    pub fn pending_sweeps(&self, now: Timestamp) -> Vec<LeaseId> {
        let ack_timeout = self.params.ack_timeout;
        self.leases
            .values()
            .filter(|lease| !lease.is_live() && lease.ack_windows_elapsed(now, ack_timeout))
            .map(|lease| lease.id)
            .collect()
    }

    /// Silent nodes holding at least one acknowledged slot, with those leases.
    pub fn dead_candidates(&self, now: Timestamp) -> Vec<(Address, Vec<LeaseId>)> {
        let mut holders: BTreeMap<Address, Vec<LeaseId>> = BTreeMap::new();
        for lease in self.leases.values() {
            for slot in lease.assigned_nodes.iter().filter(|a| a.acknowledged) {
                holders.entry(slot.node).or_default().push(lease.id);
            }
        }
        holders
            .into_iter()
            .filter(|(node, _)| {
                self.registry
                    .last_alive(*node)
                    .is_ok_and(|last_alive| self.is_dead(last_alive, now))
            })
            .collect()
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut R {
        &mut self.registry
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut L {
        &mut self.ledger
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Run `op`, dropping the events it buffered if it fails.
    fn transact<T>(
        &mut self,
        op: impl FnOnce(&mut Self) -> Result<T, LeaseError>,
    ) -> Result<T, LeaseError> {
        let mark = self.pending.len();
        let result = op(self);
        if result.is_err() {
            self.pending.truncate(mark);
        }
        result
    }

    fn emit(&mut self, event: LeaseEvent) {
        debug!(event = event.name(), lease_id = ?event.lease_id(), "Buffered lease event");
        self.pending.push(event);
    }

    fn get(&self, lease_id: LeaseId) -> Result<&Lease, LeaseError> {
        self.leases
            .get(&lease_id)
            .ok_or(LeaseError::LeaseNotFound(lease_id))
    }

    fn get_mut(&mut self, lease_id: LeaseId) -> Result<&mut Lease, LeaseError> {
        self.leases
            .get_mut(&lease_id)
            .ok_or(LeaseError::LeaseNotFound(lease_id))
    }

    fn remove(&mut self, lease_id: LeaseId) -> Result<Lease, LeaseError> {
        self.leases
            .remove(&lease_id)
            .ok_or(LeaseError::LeaseNotFound(lease_id))
    }

    fn is_dead(&self, last_alive: Timestamp, now: Timestamp) -> bool {
        now.checked_sub(self.params.dead_timeout)
            .is_some_and(|threshold| last_alive < threshold)
    }

    /// Debit owed by `lease` for time up to `min(now, end_time)` at its
    /// current replica count. Clamped to the balance.
    fn settlement(&self, lease: &Lease, now: Timestamp) -> Result<Settlement, LeaseError> {
        let until = now.min(lease.end_time).max(lease.last_settled_time);
        let owed = storage_cost(
            until - lease.last_settled_time,
            lease.size_limit,
            self.params.fee_rate,
            lease.assigned_nodes.len(),
        )?;
        if owed > lease.balance {
            warn!(
                lease_id = lease.id,
                owed,
                balance = lease.balance,
                "Settlement exceeds escrow, clamping to balance"
            );
        }
        Ok(Settlement {
            until,
            amount: owed.min(lease.balance),
        })
    }

    fn apply_settlement(
        &mut self,
        lease_id: LeaseId,
        settlement: Settlement,
    ) -> Result<(), LeaseError> {
        let lease = self.get_mut(lease_id)?;
        if settlement.until == lease.last_settled_time {
            return Ok(());
        }
        lease.balance -= settlement.amount;
        lease.last_settled_time = settlement.until;
        let balance = lease.balance;

        self.emit(LeaseEvent::LeaseSettled {
            lease_id,
            settled_until: settlement.until,
            amount: settlement.amount,
            balance,
        });
        Ok(())
    }

    /// Verify every lease in `targets` can be settled and that the pool
    /// covers the refunds owed if each dead slot turns out to be the last.
    fn check_dead_refunds(&self, targets: &[LeaseId], now: Timestamp) -> Result<(), LeaseError> {
        let mut requested: Amount = 0;
        for &lease_id in targets {
            let lease = self.get(lease_id)?;
            let settlement = self.settlement(lease, now)?;
            if lease.assigned_nodes.len() == 1 {
                requested = requested
                    .checked_add(lease.balance - settlement.amount)
                    .ok_or(LeaseError::AmountOverflow)?;
            }
        }
        let available = self.ledger.pool_balance();
        if requested > available {
            return Err(LedgerError::PoolExhausted {
                requested,
                available,
            }
            .into());
        }
        Ok(())
    }

    /// Settle, replace or remove the dead node's slot, then slash it.
    ///
    /// Everything fallible happens before the first mutation, so an error
    /// leaves the lease exactly as it was.
    fn process_dead_slot(
        &mut self,
        lease_id: LeaseId,
        node: Address,
        now: Timestamp,
    ) -> Result<(), LeaseError> {
        let lease = self.get(lease_id)?;
        let slot = lease
            .slot_of(node)
            .ok_or(LeaseError::NotAssigned { lease_id, node })?;
        let settlement = self.settlement(lease, now)?;
        let (owner, size) = (lease.owner, lease.size_limit);
        let remaining = lease.balance - settlement.amount;
        let last_slot = lease.assigned_nodes.len() == 1;

        if lease.is_expired(now) {
            if last_slot && remaining > 0 {
                self.ledger.transfer_out(owner, remaining)?;
            }
            self.apply_settlement(lease_id, settlement)?;
            self.remove_slot(lease_id, slot, node)?;
        } else {
            let exclude = lease.nodes();
            let replacement = self.registry.select(1, size, &exclude).into_iter().next();
            match replacement {
                Some(replacement) => {
                    self.apply_settlement(lease_id, settlement)?;
                    let lease = self.get_mut(lease_id)?;
                    lease.assigned_nodes[slot] = NodeAssignment::pending(replacement, now);
                    self.emit(LeaseEvent::NodeReplaced {
                        lease_id,
                        dead_node: node,
                        replacement,
                    });
                }
                None => {
                    if last_slot && remaining > 0 {
                        self.ledger.transfer_out(owner, remaining)?;
                    }
                    self.apply_settlement(lease_id, settlement)?;
                    self.emit(LeaseEvent::ResourceUnavailable {
                        lease_id,
                        node,
                        size,
                    });
                    self.remove_slot(lease_id, slot, node)?;
                }
            }
        }

        if let Err(e) = self.registry.release(node, size) {
            error!(lease_id, node = %node, error = %e, "Failed to release dead node capacity");
        }
        match self.registry.slash(node, size, self.params.protocol_pool) {
            Ok(penalty) => self.emit(LeaseEvent::NodeSlashed {
                lease_id,
                node,
                size,
                penalty,
                beneficiary: self.params.protocol_pool,
            }),
            Err(e) => error!(lease_id, node = %node, error = %e, "Failed to slash dead node"),
        }
        Ok(())
    }

    /// Swap-remove a slot. A lease left without nodes is deleted and its
    /// (already refunded) balance reported in a termination event.
    fn remove_slot(&mut self, lease_id: LeaseId, slot: usize, node: Address) -> Result<(), LeaseError> {
        let lease = self.get_mut(lease_id)?;
        lease.assigned_nodes.swap_remove(slot);
        let emptied = lease.assigned_nodes.is_empty();
        self.emit(LeaseEvent::NodeRemoved { lease_id, node });

        if emptied {
            let lease = self.remove(lease_id)?;
            info!(lease_id, refund = lease.balance, "Lease lost its last node");
            self.emit(LeaseEvent::LeaseTerminated {
                lease_id,
                owner: lease.owner,
                refund: lease.balance,
                reason: TerminationReason::ReplicasExhausted,
            });
        }
        Ok(())
    }

    fn release_all(&mut self, nodes: &[Address], size: u64, lease_id: Option<LeaseId>) {
        for node in nodes {
            if let Err(e) = self.registry.release(*node, size) {
                error!(lease_id = ?lease_id, node = %node, error = %e, "Failed to release node capacity");
            }
        }
    }
}
