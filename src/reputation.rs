use crate::model::{AccountId, PaymentId, TOKEN_UNIT};
use crate::Amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Leaderboard capacity; a full board only admits strictly better sellers.
pub const LEADERBOARD_CAPACITY: usize = 50;

/// Volume at which the volume term of the seller score saturates (1000 tokens).
pub const VOLUME_SCORE_TARGET: u128 = 1_000 * TOKEN_UNIT as u128;

/// Payment count at which the buyer activity term saturates.
pub const BUYER_ACTIVITY_TARGET: u64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellerScore {
    pub seller: AccountId,
    pub total_deliveries: u64,
    pub successful_deliveries: u64,
    pub total_disputes: u64,
    pub disputes_lost: u64,
    pub total_refunds: u64,
    pub total_volume: u128,
    pub first_seen: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuyerScore {
    pub buyer: AccountId,
    pub total_payments: u64,
    pub total_disputes: u64,
    pub disputes_won: u64,
    pub total_volume: u128,
    pub first_seen: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Running settlement-outcome statistics per principal.
///
/// Counters are mutated additively by the escrow on terminal transitions; the
/// composite scores are derived on read and never stored.
#[derive(Debug, Default)]
pub struct ReputationEngine {
    sellers: HashMap<AccountId, SellerScore>,
    buyers: HashMap<AccountId, BuyerScore>,
    leaderboard: Vec<AccountId>,
}

impl ReputationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_delivery(
        &mut self,
        payment_id: PaymentId,
        seller: AccountId,
        buyer: AccountId,
        amount: Amount,
        now: DateTime<Utc>,
    ) {
        let s = self.seller_entry(seller, now);
        s.total_deliveries += 1;
        s.successful_deliveries += 1;
        s.total_volume += amount as u128;
        s.last_activity = now;

        let b = self.buyer_entry(buyer, now);
        b.total_payments += 1;
        b.total_volume += amount as u128;
        b.last_activity = now;

        tracing::debug!(payment = %payment_id, seller = %seller, "delivery recorded");
        self.update_leaderboard(seller);
    }

    pub(crate) fn record_dispute(
        &mut self,
        payment_id: PaymentId,
        seller: AccountId,
        buyer: AccountId,
        buyer_won: bool,
        now: DateTime<Utc>,
    ) {
        let s = self.seller_entry(seller, now);
        s.total_disputes += 1;
        if buyer_won {
            s.disputes_lost += 1;
        }
        s.last_activity = now;

        let b = self.buyer_entry(buyer, now);
        b.total_disputes += 1;
        if buyer_won {
            b.disputes_won += 1;
        }
        b.last_activity = now;

        tracing::debug!(payment = %payment_id, seller = %seller, buyer_won, "dispute recorded");
    }

    /// A refund counts as an attempted delivery that did not succeed.
    pub(crate) fn record_refund(
        &mut self,
        payment_id: PaymentId,
        seller: AccountId,
        buyer: AccountId,
        now: DateTime<Utc>,
    ) {
        let s = self.seller_entry(seller, now);
        s.total_refunds += 1;
        s.total_deliveries += 1;
        s.last_activity = now;

        let b = self.buyer_entry(buyer, now);
        b.total_payments += 1;
        b.last_activity = now;

        tracing::debug!(payment = %payment_id, seller = %seller, "refund recorded");
    }

    /// Composite seller score in [0, 10000], recomputed from the counters:
    /// 7000 weighted on delivery success, 2000 on disputes not lost, 1000 on
    /// volume up to [`VOLUME_SCORE_TARGET`]. Basis-point floor division per
    /// term; zero until the first finished delivery.
    pub fn seller_score(&self, seller: &AccountId) -> u32 {
        let Some(s) = self.sellers.get(seller) else {
            return 0;
        };
        if s.total_deliveries == 0 {
            return 0;
        }
        let total = s.total_deliveries as u128;
        let success_term = 7_000 * s.successful_deliveries as u128 / total;
        let lost = (s.disputes_lost as u128).min(total);
        let dispute_term = 2_000 * (total - lost) / total;
        let volume_term = 1_000 * s.total_volume.min(VOLUME_SCORE_TARGET) / VOLUME_SCORE_TARGET;
        (success_term + dispute_term + volume_term) as u32
    }

    /// Composite buyer score in [0, 10000]: 8000 weighted on disputes raised
    /// and lost, 2000 on activity up to [`BUYER_ACTIVITY_TARGET`] payments.
    pub fn buyer_score(&self, buyer: &AccountId) -> u32 {
        let Some(b) = self.buyers.get(buyer) else {
            return 0;
        };
        if b.total_payments == 0 {
            return 0;
        }
        let payments = b.total_payments as u128;
        let lost = (b.total_disputes.saturating_sub(b.disputes_won) as u128).min(payments);
        let conduct_term = 8_000 * (payments - lost) / payments;
        let activity_term =
            2_000 * (b.total_payments.min(BUYER_ACTIVITY_TARGET) as u128) / BUYER_ACTIVITY_TARGET as u128;
        (conduct_term + activity_term) as u32
    }

    pub fn seller(&self, seller: &AccountId) -> Option<&SellerScore> {
        self.sellers.get(seller)
    }

    pub fn buyer(&self, buyer: &AccountId) -> Option<&BuyerScore> {
        self.buyers.get(buyer)
    }

    /// Current board members with live scores, best first.
    pub fn leaderboard(&self) -> Vec<(AccountId, u32)> {
        let mut board: Vec<(AccountId, u32)> = self
            .leaderboard
            .iter()
            .map(|s| (*s, self.seller_score(s)))
            .collect();
        board.sort_by(|a, b| b.1.cmp(&a.1));
        board
    }

    fn seller_entry(&mut self, seller: AccountId, now: DateTime<Utc>) -> &mut SellerScore {
        self.sellers.entry(seller).or_insert_with(|| SellerScore {
            seller,
            total_deliveries: 0,
            successful_deliveries: 0,
            total_disputes: 0,
            disputes_lost: 0,
            total_refunds: 0,
            total_volume: 0,
            first_seen: now,
            last_activity: now,
        })
    }

    fn buyer_entry(&mut self, buyer: AccountId, now: DateTime<Utc>) -> &mut BuyerScore {
        self.buyers.entry(buyer).or_insert_with(|| BuyerScore {
            buyer,
            total_payments: 0,
            total_disputes: 0,
            disputes_won: 0,
            total_volume: 0,
            first_seen: now,
            last_activity: now,
        })
    }

    /// Bounded top-K maintained incrementally: free slots admit anyone, a
    /// full board rescans for the current minimum and replaces it only when
    /// the candidate scores strictly higher. Equal scores keep the incumbent.
    fn update_leaderboard(&mut self, seller: AccountId) {
        if self.leaderboard.contains(&seller) {
            return;
        }
        if self.leaderboard.len() < LEADERBOARD_CAPACITY {
            self.leaderboard.push(seller);
            return;
        }
        let candidate = self.seller_score(&seller);
        let weakest = self
            .leaderboard
            .iter()
            .enumerate()
            .map(|(i, member)| (i, self.seller_score(member)))
            .min_by_key(|&(_, score)| score);
        if let Some((index, score)) = weakest {
            if candidate > score {
                self.leaderboard[index] = seller;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(tag: u8) -> AccountId {
        AccountId::from_bytes([tag; 32])
    }

    fn pid(tag: u8) -> PaymentId {
        PaymentId::from_bytes([tag; 32])
    }

    #[test]
    fn unknown_principals_score_zero() {
        let engine = ReputationEngine::new();
        assert_eq!(engine.seller_score(&account(1)), 0);
        assert_eq!(engine.buyer_score(&account(1)), 0);
    }

    #[test]
    fn perfect_seller_approaches_ten_thousand() {
        let mut engine = ReputationEngine::new();
        let now = Utc::now();
        let (seller, buyer) = (account(1), account(2));

        // 1000 tokens of volume saturates the volume term
        engine.record_delivery(pid(1), seller, buyer, 1_000 * TOKEN_UNIT, now);
        assert_eq!(engine.seller_score(&seller), 10_000);
    }

    #[test]
    fn refunds_drag_the_success_term() {
        let mut engine = ReputationEngine::new();
        let now = Utc::now();
        let (seller, buyer) = (account(1), account(2));

        engine.record_delivery(pid(1), seller, buyer, 1, now);
        engine.record_refund(pid(2), seller, buyer, now);

        // 1 of 2 deliveries succeeded: 3500 + 2000 + 0 volume
        assert_eq!(engine.seller_score(&seller), 3_500 + 2_000);
        let s = engine.seller(&seller).unwrap();
        assert_eq!(s.total_deliveries, 2);
        assert_eq!(s.total_refunds, 1);
    }

    #[test]
    fn lost_disputes_drag_the_dispute_term() {
        let mut engine = ReputationEngine::new();
        let now = Utc::now();
        let (seller, buyer) = (account(1), account(2));

        engine.record_delivery(pid(1), seller, buyer, 1, now);
        engine.record_delivery(pid(2), seller, buyer, 1, now);
        engine.record_dispute(pid(2), seller, buyer, true, now);

        // 7000 * 2/2 + 2000 * (2-1)/2 = 7000 + 1000
        assert_eq!(engine.seller_score(&seller), 8_000);
        assert_eq!(engine.seller(&seller).unwrap().disputes_lost, 1);
        assert_eq!(engine.buyer(&buyer).unwrap().disputes_won, 1);
    }

    #[test]
    fn buyer_score_tracks_conduct_and_activity() {
        let mut engine = ReputationEngine::new();
        let now = Utc::now();
        let (seller, buyer) = (account(1), account(2));

        engine.record_delivery(pid(1), seller, buyer, 1, now);
        // 8000 + 2000 * 1/100
        assert_eq!(engine.buyer_score(&buyer), 8_020);

        // a dispute the buyer lost costs the conduct term
        engine.record_delivery(pid(2), seller, buyer, 1, now);
        engine.record_dispute(pid(2), seller, buyer, false, now);
        // 8000 * (2-1)/2 + 2000 * 2/100
        assert_eq!(engine.buyer_score(&buyer), 4_040);
    }

    #[test]
    fn full_board_only_admits_strictly_better() {
        let mut engine = ReputationEngine::new();
        let now = Utc::now();
        let buyer = account(200);

        // fill the board with sellers at score 9000 (one delivery, no volume)
        for i in 0..LEADERBOARD_CAPACITY as u8 {
            engine.record_delivery(pid(i), account(i + 1), buyer, 1, now);
        }
        assert_eq!(engine.leaderboard().len(), LEADERBOARD_CAPACITY);

        // equal score: incumbent stays
        let equal = account(100);
        engine.record_delivery(pid(101), equal, buyer, 1, now);
        assert!(!engine.leaderboard().iter().any(|(s, _)| *s == equal));

        // strictly better (volume term saturated): replaces the weakest
        let better = account(101);
        engine.record_delivery(pid(102), better, buyer, 1_000 * TOKEN_UNIT, now);
        let board = engine.leaderboard();
        assert_eq!(board.len(), LEADERBOARD_CAPACITY);
        assert!(board.iter().any(|(s, _)| *s == better));
        assert_eq!(board[0].0, better);
    }
}
