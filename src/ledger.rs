use crate::error::{EscrowError, Result};
use crate::model::AccountId;
use crate::Amount;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Aggregate view of the ledger's internal pools, for audit reads.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LedgerTotals {
    pub total_supply: Amount,
    pub escrow_pool: Amount,
    pub bonded_pool: Amount,
    pub treasury: Amount,
}

/// Single-asset token ledger backing the protocol.
///
/// Free balances live per account; escrowed funds, bonded collateral and
/// accrued fees live in three internal pools so that
/// `total_supply == sum(balances) + escrow_pool + bonded_pool + treasury`
/// holds at all times. Payments are pull-based: a buyer grants the escrow a
/// spend allowance and `escrow_lock` consumes it.
#[derive(Debug, Default)]
pub struct Ledger {
    balances: HashMap<AccountId, Amount>,
    allowances: HashMap<AccountId, Amount>,
    escrow_pool: Amount,
    bonded_pool: Amount,
    treasury: Amount,
    total_supply: Amount,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance_of(&self, account: &AccountId) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn allowance_of(&self, owner: &AccountId) -> Amount {
        self.allowances.get(owner).copied().unwrap_or(0)
    }

    pub fn totals(&self) -> LedgerTotals {
        LedgerTotals {
            total_supply: self.total_supply,
            escrow_pool: self.escrow_pool,
            bonded_pool: self.bonded_pool,
            treasury: self.treasury,
        }
    }

    /// Credits new supply to an account. Authorization happens in the engine.
    pub(crate) fn mint(&mut self, account: &AccountId, amount: Amount) -> Result<()> {
        if amount == 0 {
            return Err(EscrowError::InvalidAmount);
        }
        let balance = self.balances.entry(*account).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or(EscrowError::InvalidAmount)?;
        self.total_supply = self
            .total_supply
            .checked_add(amount)
            .ok_or(EscrowError::InvalidAmount)?;
        Ok(())
    }

    /// Sets (not increments) the escrow's spend allowance for `owner`.
    pub(crate) fn approve(&mut self, owner: &AccountId, amount: Amount) {
        self.allowances.insert(*owner, amount);
    }

    /// Direct account-to-account transfer, used by the revenue router.
    pub(crate) fn transfer(
        &mut self,
        from: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<()> {
        self.debit(from, amount)?;
        *self.balances.entry(*to).or_insert(0) += amount;
        Ok(())
    }

    /// Pulls `amount` from the buyer into the escrow pool, consuming allowance.
    pub(crate) fn escrow_lock(&mut self, buyer: &AccountId, amount: Amount) -> Result<()> {
        let allowance = self.allowance_of(buyer);
        if allowance < amount {
            return Err(EscrowError::InsufficientAllowance {
                available: allowance,
                required: amount,
            });
        }
        self.debit(buyer, amount)?;
        self.allowances.insert(*buyer, allowance - amount);
        self.escrow_pool += amount;
        Ok(())
    }

    /// Pays `net` to the seller and accrues `fee` to the treasury. The sum
    /// must equal what was locked for the payment, so nothing is created or
    /// destroyed.
    pub(crate) fn escrow_settle(
        &mut self,
        seller: &AccountId,
        net: Amount,
        fee: Amount,
    ) -> Result<()> {
        let gross = net + fee;
        if self.escrow_pool < gross {
            return Err(EscrowError::InsufficientFunds {
                available: self.escrow_pool,
                required: gross,
            });
        }
        self.escrow_pool -= gross;
        *self.balances.entry(*seller).or_insert(0) += net;
        self.treasury += fee;
        Ok(())
    }

    /// Returns the full escrowed amount to the buyer.
    pub(crate) fn escrow_refund(&mut self, buyer: &AccountId, amount: Amount) -> Result<()> {
        if self.escrow_pool < amount {
            return Err(EscrowError::InsufficientFunds {
                available: self.escrow_pool,
                required: amount,
            });
        }
        self.escrow_pool -= amount;
        *self.balances.entry(*buyer).or_insert(0) += amount;
        Ok(())
    }

    /// Moves a seller's free balance into the bonded pool.
    pub(crate) fn bond_lock(&mut self, seller: &AccountId, amount: Amount) -> Result<()> {
        self.debit(seller, amount)?;
        self.bonded_pool += amount;
        Ok(())
    }

    /// Returns previously bonded funds to the seller's free balance.
    pub(crate) fn bond_release(&mut self, seller: &AccountId, amount: Amount) -> Result<()> {
        if self.bonded_pool < amount {
            return Err(EscrowError::InsufficientFunds {
                available: self.bonded_pool,
                required: amount,
            });
        }
        self.bonded_pool -= amount;
        *self.balances.entry(*seller).or_insert(0) += amount;
        Ok(())
    }

    /// Routes slashed collateral from the bonded pool to the treasury.
    pub(crate) fn bond_slash(&mut self, amount: Amount) -> Result<()> {
        if self.bonded_pool < amount {
            return Err(EscrowError::InsufficientFunds {
                available: self.bonded_pool,
                required: amount,
            });
        }
        self.bonded_pool -= amount;
        self.treasury += amount;
        Ok(())
    }

    fn debit(&mut self, account: &AccountId, amount: Amount) -> Result<()> {
        let balance = self.balance_of(account);
        if balance < amount {
            return Err(EscrowError::InsufficientFunds {
                available: balance,
                required: amount,
            });
        }
        self.balances.insert(*account, balance - amount);
        Ok(())
    }
}
