// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Custodial value transfer.
//!
//! The market holds every deposit in a single custodial pool. `transfer_in`
//! moves funds from an external account into the pool; `transfer_out` pays
//! from the pool to an external account. Lease escrow is bookkeeping on the
//! lease record, not a separate account.

use std::collections::HashMap;

use alloy::primitives::Address;

use crate::lease::Amount;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("account {account} holds {available}, needs {requested}")]
    InsufficientFunds {
        account: Address,
        requested: Amount,
        available: Amount,
    },

    #[error("custodial pool holds {available}, needs {requested}")]
    PoolExhausted { requested: Amount, available: Amount },

    #[error("balance overflow")]
    Overflow,
}

impl LedgerError {
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::InsufficientFunds { .. } => "insufficient_funds",
            LedgerError::PoolExhausted { .. } => "pool_exhausted",
            LedgerError::Overflow => "ledger_overflow",
        }
    }
}

pub trait Ledger {
    /// Debit `from` and credit the custodial pool.
    fn transfer_in(&mut self, from: Address, amount: Amount) -> Result<(), LedgerError>;

    /// Debit the custodial pool and credit `to`.
    fn transfer_out(&mut self, to: Address, amount: Amount) -> Result<(), LedgerError>;

    fn balance_of(&self, account: Address) -> Amount;

    /// Funds currently held in custody.
    fn pool_balance(&self) -> Amount;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    accounts: HashMap<Address, Amount>,
    pool: Amount,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint into an external account (genesis allocations).
    pub fn credit(&mut self, account: Address, amount: Amount) -> Result<(), LedgerError> {
        let balance = self.accounts.entry(account).or_default();
        *balance = balance.checked_add(amount).ok_or(LedgerError::Overflow)?;
        Ok(())
    }

    /// Mint directly into the custodial pool.
    pub fn fund_pool(&mut self, amount: Amount) -> Result<(), LedgerError> {
        self.pool = self.pool.checked_add(amount).ok_or(LedgerError::Overflow)?;
        Ok(())
    }
}

impl Ledger for InMemoryLedger {
    fn transfer_in(&mut self, from: Address, amount: Amount) -> Result<(), LedgerError> {
        let available = self.balance_of(from);
        if available < amount {
            return Err(LedgerError::InsufficientFunds {
                account: from,
                requested: amount,
                available,
            });
        }
        let pool = self.pool.checked_add(amount).ok_or(LedgerError::Overflow)?;
        self.accounts.insert(from, available - amount);
        self.pool = pool;
        Ok(())
    }

    fn transfer_out(&mut self, to: Address, amount: Amount) -> Result<(), LedgerError> {
        if self.pool < amount {
            return Err(LedgerError::PoolExhausted {
                requested: amount,
                available: self.pool,
            });
        }
        let balance = self
            .balance_of(to)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        self.pool -= amount;
        self.accounts.insert(to, balance);
        Ok(())
    }

    fn balance_of(&self, account: Address) -> Amount {
        self.accounts.get(&account).copied().unwrap_or(0)
    }

    fn pool_balance(&self) -> Amount {
        self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfers_conserve_total() {
        let alice = Address::repeat_byte(1);
        let bob = Address::repeat_byte(2);
        let mut ledger = InMemoryLedger::new();
        ledger.credit(alice, 100).unwrap();

        ledger.transfer_in(alice, 60).unwrap();
        ledger.transfer_out(bob, 25).unwrap();

        assert_eq!(ledger.balance_of(alice), 40);
        assert_eq!(ledger.balance_of(bob), 25);
        assert_eq!(ledger.pool_balance(), 35);
    }

    #[test]
    fn failed_transfers_leave_balances_untouched() {
        let alice = Address::repeat_byte(1);
        let mut ledger = InMemoryLedger::new();
        ledger.credit(alice, 10).unwrap();

        let err = ledger.transfer_in(alice, 11).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));
        assert_eq!(ledger.balance_of(alice), 10);
        assert_eq!(ledger.pool_balance(), 0);

        let err = ledger.transfer_out(alice, 1).unwrap_err();
        assert_eq!(
            err,
            LedgerError::PoolExhausted {
                requested: 1,
                available: 0
            }
        );
        assert_eq!(ledger.balance_of(alice), 10);
    }
}
