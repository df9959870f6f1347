use crate::error::{EscrowError, Result};
use crate::model::{AccountId, PaymentId, BPS_DENOMINATOR, MAX_SLASH_BPS};
use crate::{Amount, Bps};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Seller collateral. Created implicitly on first deposit, never destroyed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bond {
    pub seller: AccountId,
    pub amount: Amount,
    /// Withdrawal forbidden before this instant; every deposit extends it.
    pub locked_until: DateTime<Utc>,
    /// In-flight payments referencing this seller; gates withdrawal.
    pub active_payments: u64,
    /// Cumulative amount ever slashed, for audit only.
    pub total_slashed: Amount,
}

/// Audit record appended on every slash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlashRecord {
    pub seller: AccountId,
    pub payment_id: PaymentId,
    pub slash_bps: Bps,
    pub amount: Amount,
    pub reason: String,
    pub slashed_at: DateTime<Utc>,
}

/// Holds seller collateral. Bonds are a deterrent: slashing is an explicit
/// authorized action, not an automatic consequence of dispute outcomes.
/// Token movement is paired with these book entries by the escrow engine.
#[derive(Debug)]
pub struct BondVault {
    bonds: HashMap<AccountId, Bond>,
    slash_log: Vec<SlashRecord>,
    lock_secs: u64,
}

impl BondVault {
    pub fn new(lock_secs: u64) -> Self {
        Self {
            bonds: HashMap::new(),
            slash_log: Vec::new(),
            lock_secs,
        }
    }

    /// Credits a deposit and resets the lock to `now + lock period`. The
    /// caller has already validated the amount and moved the tokens.
    pub(crate) fn deposit(&mut self, seller: AccountId, amount: Amount, now: DateTime<Utc>) {
        let bond = self.bonds.entry(seller).or_insert_with(|| Bond {
            seller,
            amount: 0,
            locked_until: now,
            active_payments: 0,
            total_slashed: 0,
        });
        bond.amount += amount;
        bond.locked_until = now + Duration::seconds(self.lock_secs as i64);
        tracing::info!(seller = %seller, amount, locked_until = %bond.locked_until, "bond deposited");
    }

    /// Debits a withdrawal if the lock has elapsed and nothing is in flight.
    pub(crate) fn withdraw(
        &mut self,
        seller: &AccountId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if amount == 0 {
            return Err(EscrowError::InvalidAmount);
        }
        let bond = self.bonds.get_mut(seller).ok_or(EscrowError::InsufficientBond {
            available: 0,
            required: amount,
        })?;
        if bond.amount < amount {
            return Err(EscrowError::InsufficientBond {
                available: bond.amount,
                required: amount,
            });
        }
        if now < bond.locked_until {
            return Err(EscrowError::BondLocked(bond.locked_until));
        }
        if bond.active_payments > 0 {
            return Err(EscrowError::ActivePaymentsExist(bond.active_payments));
        }
        bond.amount -= amount;
        tracing::info!(seller = %seller, amount, "bond withdrawn");
        Ok(())
    }

    /// Removes `amount × slash_bps / 10000` from the bond and appends an
    /// audit record. Returns the slashed amount so the engine can route the
    /// tokens to the treasury.
    pub(crate) fn slash(
        &mut self,
        seller: &AccountId,
        payment_id: PaymentId,
        slash_bps: Bps,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<Amount> {
        if slash_bps > MAX_SLASH_BPS {
            return Err(EscrowError::SlashExceedsMax(slash_bps));
        }
        let bond = self.bonds.get_mut(seller).ok_or(EscrowError::InsufficientBond {
            available: 0,
            required: 0,
        })?;
        let amount =
            (bond.amount as u128 * slash_bps as u128 / BPS_DENOMINATOR as u128) as Amount;
        if amount > bond.amount {
            return Err(EscrowError::SlashExceedsBond {
                amount,
                bonded: bond.amount,
            });
        }
        bond.amount -= amount;
        bond.total_slashed += amount;
        self.slash_log.push(SlashRecord {
            seller: *seller,
            payment_id,
            slash_bps,
            amount,
            reason,
            slashed_at: now,
        });
        tracing::warn!(seller = %seller, payment = %payment_id, slash_bps, amount, "bond slashed");
        Ok(amount)
    }

    pub(crate) fn increment_active(&mut self, seller: AccountId, now: DateTime<Utc>) {
        let bond = self.bonds.entry(seller).or_insert_with(|| Bond {
            seller,
            amount: 0,
            locked_until: now,
            active_payments: 0,
            total_slashed: 0,
        });
        bond.active_payments += 1;
    }

    pub(crate) fn decrement_active(&mut self, seller: &AccountId) {
        if let Some(bond) = self.bonds.get_mut(seller) {
            bond.active_payments = bond.active_payments.saturating_sub(1);
        }
    }

    pub fn get(&self, seller: &AccountId) -> Option<&Bond> {
        self.bonds.get(seller)
    }

    pub fn balance_of(&self, seller: &AccountId) -> Amount {
        self.bonds.get(seller).map(|b| b.amount).unwrap_or(0)
    }

    pub fn slash_records(&self, seller: &AccountId) -> Vec<&SlashRecord> {
        self.slash_log.iter().filter(|r| r.seller == *seller).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCK_SECS: u64 = 604_800;

    fn seller() -> AccountId {
        AccountId::from_bytes([4; 32])
    }

    fn payment_id() -> PaymentId {
        PaymentId::from_bytes([8; 32])
    }

    #[test]
    fn every_deposit_extends_the_lock() {
        let mut vault = BondVault::new(LOCK_SECS);
        let t0 = Utc::now();
        vault.deposit(seller(), 100, t0);

        let t1 = t0 + Duration::seconds(100_000);
        vault.deposit(seller(), 1, t1);

        let bond = vault.get(&seller()).unwrap();
        assert_eq!(bond.amount, 101);
        assert_eq!(bond.locked_until, t1 + Duration::seconds(LOCK_SECS as i64));
    }

    #[test]
    fn withdraw_gating_covers_all_combinations() {
        let mut vault = BondVault::new(LOCK_SECS);
        let t0 = Utc::now();
        let unlocked = t0 + Duration::seconds(LOCK_SECS as i64);
        vault.deposit(seller(), 100, t0);

        // locked, no active payments
        assert!(matches!(
            vault.withdraw(&seller(), 50, t0),
            Err(EscrowError::BondLocked(_))
        ));

        // locked, active payments
        vault.increment_active(seller(), t0);
        assert!(matches!(
            vault.withdraw(&seller(), 50, t0),
            Err(EscrowError::BondLocked(_))
        ));

        // unlocked, active payments
        assert!(matches!(
            vault.withdraw(&seller(), 50, unlocked),
            Err(EscrowError::ActivePaymentsExist(1))
        ));

        // unlocked, no active payments
        vault.decrement_active(&seller());
        vault.withdraw(&seller(), 50, unlocked).unwrap();
        assert_eq!(vault.balance_of(&seller()), 50);

        // more than balance
        assert!(matches!(
            vault.withdraw(&seller(), 51, unlocked),
            Err(EscrowError::InsufficientBond { available: 50, .. })
        ));
    }

    #[test]
    fn slash_bounds() {
        let mut vault = BondVault::new(LOCK_SECS);
        let now = Utc::now();
        vault.deposit(seller(), 100, now);

        assert!(matches!(
            vault.slash(&seller(), payment_id(), 6_000, "too much".into(), now),
            Err(EscrowError::SlashExceedsMax(6_000))
        ));

        let taken = vault
            .slash(&seller(), payment_id(), 5_000, "half".into(), now)
            .unwrap();
        assert_eq!(taken, 50);
        assert_eq!(vault.balance_of(&seller()), 50);
        assert_eq!(vault.get(&seller()).unwrap().total_slashed, 50);
        assert_eq!(vault.slash_records(&seller()).len(), 1);
    }

    #[test]
    fn slash_uses_floor_division() {
        let mut vault = BondVault::new(LOCK_SECS);
        let now = Utc::now();
        vault.deposit(seller(), 3, now);

        // 3 * 5000 / 10000 = 1.5 -> 1; dust stays with the bond owner
        let taken = vault
            .slash(&seller(), payment_id(), 5_000, "floor".into(), now)
            .unwrap();
        assert_eq!(taken, 1);
        assert_eq!(vault.balance_of(&seller()), 2);
    }

    #[test]
    fn decrement_never_underflows() {
        let mut vault = BondVault::new(LOCK_SECS);
        vault.decrement_active(&seller());
        vault.increment_active(seller(), Utc::now());
        vault.decrement_active(&seller());
        vault.decrement_active(&seller());
        assert_eq!(vault.get(&seller()).unwrap().active_payments, 0);
    }
}
