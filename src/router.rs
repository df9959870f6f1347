use crate::error::{EscrowError, Result};
use crate::escrow::EscrowEngine;
use crate::model::{AccountId, Digest, EndpointId, PaymentId, BPS_DENOMINATOR};
use crate::{Amount, Bps};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One leg of a revenue split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitShare {
    pub payee: AccountId,
    pub share_bps: Bps,
}

/// A fixed-share payout scheme. Shares must sum to exactly 10 000 bps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Split {
    pub id: Uuid,
    pub owner: AccountId,
    pub shares: Vec<SplitShare>,
    pub created_at: DateTime<Utc>,
}

/// One entry of a batch open request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOpenItem {
    pub endpoint_id: EndpointId,
    pub max_price: Amount,
    pub buyer_note_hash: Digest,
}

/// Convenience layer on top of the escrow: multi-open and revenue splitting.
/// Neither adds protocol semantics; both reduce call overhead for callers
/// driving many endpoints.
impl EscrowEngine {
    /// Opens one payment per item, all-or-nothing. Every item is validated —
    /// including the buyer's cumulative balance and allowance — before the
    /// first open commits, so a failing item aborts the whole batch cleanly.
    pub fn open_batch(
        &mut self,
        buyer: AccountId,
        items: &[BatchOpenItem],
        now: DateTime<Utc>,
    ) -> Result<Vec<PaymentId>> {
        if items.is_empty() {
            return Err(EscrowError::InvalidInput("empty batch".to_string()));
        }

        let mut total: Amount = 0;
        for item in items {
            let endpoint = self
                .registry()
                .get(&item.endpoint_id)
                .ok_or(EscrowError::InvalidEndpoint(item.endpoint_id))?;
            if !endpoint.active {
                return Err(EscrowError::EndpointNotActive(item.endpoint_id));
            }
            if endpoint.price_per_call > item.max_price {
                return Err(EscrowError::PriceAboveMax {
                    price: endpoint.price_per_call,
                    max_price: item.max_price,
                });
            }
            total += endpoint.price_per_call;
        }

        let allowance = self.ledger().allowance_of(&buyer);
        if allowance < total {
            return Err(EscrowError::InsufficientAllowance {
                available: allowance,
                required: total,
            });
        }
        let balance = self.ledger().balance_of(&buyer);
        if balance < total {
            return Err(EscrowError::InsufficientFunds {
                available: balance,
                required: total,
            });
        }

        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            let id = self.open(buyer, item.endpoint_id, item.max_price, item.buyer_note_hash, now)?;
            ids.push(id);
        }
        tracing::info!(buyer = %buyer, count = ids.len(), total, "batch opened");
        Ok(ids)
    }

    /// Registers a fixed-share payout scheme.
    pub fn create_split(
        &mut self,
        owner: AccountId,
        shares: Vec<SplitShare>,
        now: DateTime<Utc>,
    ) -> Result<Uuid> {
        if shares.is_empty() {
            return Err(EscrowError::InvalidInput("split has no payees".to_string()));
        }
        let sum: u32 = shares.iter().map(|s| s.share_bps as u32).sum();
        if sum != BPS_DENOMINATOR as u32 {
            return Err(EscrowError::InvalidSplitShares(sum));
        }
        if shares.iter().any(|s| s.share_bps == 0) {
            return Err(EscrowError::InvalidInput("zero-bps share".to_string()));
        }

        let id = Uuid::new_v4();
        self.splits.insert(
            id,
            Split {
                id,
                owner,
                shares,
                created_at: now,
            },
        );
        Ok(id)
    }

    pub fn split(&self, id: &Uuid) -> Option<&Split> {
        self.splits.get(id)
    }

    /// Pays `amount` from the caller's balance through a split. Each leg is
    /// floor-divided; rounding dust stays with the payer.
    pub fn distribute(
        &mut self,
        payer: AccountId,
        split_id: Uuid,
        amount: Amount,
    ) -> Result<Vec<(AccountId, Amount)>> {
        if amount == 0 {
            return Err(EscrowError::InvalidAmount);
        }
        let split = self
            .splits
            .get(&split_id)
            .ok_or(EscrowError::SplitNotFound(split_id))?;

        let legs: Vec<(AccountId, Amount)> = split
            .shares
            .iter()
            .map(|s| {
                let cut =
                    (amount as u128 * s.share_bps as u128 / BPS_DENOMINATOR as u128) as Amount;
                (s.payee, cut)
            })
            .collect();
        let total: Amount = legs.iter().map(|(_, cut)| cut).sum();

        let balance = self.ledger().balance_of(&payer);
        if balance < total {
            return Err(EscrowError::InsufficientFunds {
                available: balance,
                required: total,
            });
        }

        for (payee, cut) in &legs {
            if *cut > 0 {
                self.ledger_mut().transfer(&payer, payee, *cut)?;
            }
        }
        tracing::info!(payer = %payer, split = %split_id, amount, paid = total, "split distributed");
        Ok(legs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolConfig;
    use crate::model::{Category, TOKEN_UNIT};
    use crate::signature::generate_keypair;

    fn account(tag: u8) -> AccountId {
        AccountId::from_bytes([tag; 32])
    }

    fn engine_with_operator() -> (EscrowEngine, AccountId) {
        let (_, operator) = generate_keypair();
        let config = ProtocolConfig {
            operator: Some(operator),
            ..ProtocolConfig::default()
        };
        (EscrowEngine::new(config).unwrap(), operator)
    }

    #[test]
    fn batch_open_is_all_or_nothing() {
        let (mut engine, operator) = engine_with_operator();
        let now = Utc::now();
        let (_, seller) = generate_keypair();
        let (_, buyer) = generate_keypair();

        let cheap = engine
            .register_endpoint(seller, "x://a".into(), TOKEN_UNIT, Category::Data, 86_400, 0, now)
            .unwrap();
        let pricey = engine
            .register_endpoint(seller, "x://b".into(), 3 * TOKEN_UNIT, Category::Data, 86_400, 0, now)
            .unwrap();

        // funds cover only the first item: nothing commits
        engine.mint(operator, buyer, 2 * TOKEN_UNIT).unwrap();
        engine.approve(buyer, 10 * TOKEN_UNIT);
        let items = vec![
            BatchOpenItem {
                endpoint_id: cheap,
                max_price: TOKEN_UNIT,
                buyer_note_hash: Digest::of(b"a"),
            },
            BatchOpenItem {
                endpoint_id: pricey,
                max_price: 3 * TOKEN_UNIT,
                buyer_note_hash: Digest::of(b"b"),
            },
        ];
        assert!(matches!(
            engine.open_batch(buyer, &items, now),
            Err(EscrowError::InsufficientFunds { required, .. }) if required == 4 * TOKEN_UNIT
        ));
        assert!(engine.payments_for_buyer(&buyer).is_empty());
        assert_eq!(engine.ledger().balance_of(&buyer), 2 * TOKEN_UNIT);

        // topped up: both open
        engine.mint(operator, buyer, 2 * TOKEN_UNIT).unwrap();
        let ids = engine.open_batch(buyer, &items, now).unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(engine.ledger().balance_of(&buyer), 0);
        assert_eq!(engine.ledger().totals().escrow_pool, 4 * TOKEN_UNIT);
    }

    #[test]
    fn empty_batch_rejected() {
        let (mut engine, _) = engine_with_operator();
        let (_, buyer) = generate_keypair();
        assert!(engine.open_batch(buyer, &[], Utc::now()).is_err());
    }

    #[test]
    fn split_shares_must_sum_to_denominator() {
        let (mut engine, _) = engine_with_operator();
        let now = Utc::now();
        let owner = account(1);

        let short = vec![
            SplitShare { payee: account(2), share_bps: 6_000 },
            SplitShare { payee: account(3), share_bps: 3_000 },
        ];
        assert!(matches!(
            engine.create_split(owner, short, now),
            Err(EscrowError::InvalidSplitShares(9_000))
        ));

        let exact = vec![
            SplitShare { payee: account(2), share_bps: 6_000 },
            SplitShare { payee: account(3), share_bps: 4_000 },
        ];
        let id = engine.create_split(owner, exact, now).unwrap();
        assert_eq!(engine.split(&id).unwrap().shares.len(), 2);
    }

    #[test]
    fn distribute_floors_and_keeps_dust_with_payer() {
        let (mut engine, operator) = engine_with_operator();
        let now = Utc::now();
        let payer = account(1);
        engine.mint(operator, payer, 1_001).unwrap();

        let id = engine
            .create_split(
                payer,
                vec![
                    SplitShare { payee: account(2), share_bps: 3_333 },
                    SplitShare { payee: account(3), share_bps: 6_667 },
                ],
                now,
            )
            .unwrap();

        let legs = engine.distribute(payer, id, 1_001).unwrap();
        // 1001*3333/10000 = 333, 1001*6667/10000 = 667 -> 1000 paid, 1 dust
        assert_eq!(legs, vec![(account(2), 333), (account(3), 667)]);
        assert_eq!(engine.ledger().balance_of(&account(2)), 333);
        assert_eq!(engine.ledger().balance_of(&account(3)), 667);
        assert_eq!(engine.ledger().balance_of(&payer), 1);
    }

    #[test]
    fn distribute_unknown_split_fails() {
        let (mut engine, _) = engine_with_operator();
        assert!(matches!(
            engine.distribute(account(1), Uuid::new_v4(), 100),
            Err(EscrowError::SplitNotFound(_))
        ));
    }
}
