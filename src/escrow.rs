use crate::bond::BondVault;
use crate::config::ProtocolConfig;
use crate::error::{EscrowError, Result};
use crate::ledger::Ledger;
use crate::model::{
    AccountId, Category, Digest, EndpointId, Payment, PaymentId, PaymentStatus, BPS_DENOMINATOR,
    MAX_PROTOCOL_FEE_BPS,
};
use crate::receipts::{Receipt, ReceiptStore};
use crate::registry::Registry;
use crate::reputation::ReputationEngine;
use crate::router::Split;
use crate::signature::{DeliveryCommitment, SigningDomain};
use crate::{Amount, Bps};
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::Signature;
use std::collections::HashMap;
use uuid::Uuid;

/// The transition a payment is due for under the external clock, if any.
/// Both are permissionless: anyone may trigger them once the time gate holds,
/// which keeps the protocol live without a central scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Release,
    Refund,
}

/// Pure time-gate predicate; the caller polls, the core never self-schedules.
pub fn due_transition(payment: &Payment, now: DateTime<Utc>) -> Option<Transition> {
    match payment.status {
        PaymentStatus::Pending if now > payment.delivery_deadline => Some(Transition::Refund),
        PaymentStatus::Delivered => match payment.dispute_deadline {
            Some(deadline) if now >= deadline => Some(Transition::Release),
            _ => None,
        },
        _ => None,
    }
}

pub(crate) fn protocol_fee(amount: Amount, fee_bps: Bps) -> Amount {
    (amount as u128 * fee_bps as u128 / BPS_DENOMINATOR as u128) as Amount
}

/// The escrow core: owns the payment arena and orchestrates the registry,
/// ledger, bond vault, receipt store and reputation counters.
///
/// Every public operation is a single atomic transition: all validation runs
/// before the first write, so a rejected call leaves no partial state. Time
/// enters exclusively through the `now` argument — the external ledger clock
/// of the deployment — and never through an internal timer.
pub struct EscrowEngine {
    config: ProtocolConfig,
    domain: SigningDomain,
    ledger: Ledger,
    registry: Registry,
    vault: BondVault,
    receipts: ReceiptStore,
    reputation: ReputationEngine,
    payments: HashMap<PaymentId, Payment>,
    by_buyer: HashMap<AccountId, Vec<PaymentId>>,
    by_seller: HashMap<AccountId, Vec<PaymentId>>,
    open_counter: u64,
    pub(crate) splits: HashMap<Uuid, Split>,
}

impl EscrowEngine {
    pub fn new(config: ProtocolConfig) -> Result<Self> {
        if config.protocol_fee_bps > MAX_PROTOCOL_FEE_BPS {
            return Err(EscrowError::Config(format!(
                "protocol fee {} bps exceeds the {} bps cap",
                config.protocol_fee_bps, MAX_PROTOCOL_FEE_BPS
            )));
        }
        let domain = SigningDomain::new(config.instance.clone());
        let vault = BondVault::new(config.bond_lock_secs);
        Ok(Self {
            config,
            domain,
            ledger: Ledger::new(),
            registry: Registry::new(),
            vault,
            receipts: ReceiptStore::new(),
            reputation: ReputationEngine::new(),
            payments: HashMap::new(),
            by_buyer: HashMap::new(),
            by_seller: HashMap::new(),
            open_counter: 0,
            splits: HashMap::new(),
        })
    }

    // --- listings ---

    #[allow(clippy::too_many_arguments)]
    pub fn register_endpoint(
        &mut self,
        seller: AccountId,
        metadata_uri: String,
        price_per_call: Amount,
        category: Category,
        dispute_window_secs: u64,
        required_bond: Amount,
        now: DateTime<Utc>,
    ) -> Result<EndpointId> {
        self.registry.register(
            seller,
            metadata_uri,
            price_per_call,
            category,
            dispute_window_secs,
            required_bond,
            now,
        )
    }

    pub fn update_endpoint(
        &mut self,
        caller: AccountId,
        id: EndpointId,
        metadata_uri: String,
        price_per_call: Amount,
        dispute_window_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.registry
            .update(&caller, id, metadata_uri, price_per_call, dispute_window_secs, now)
    }

    pub fn deactivate_endpoint(
        &mut self,
        caller: AccountId,
        id: EndpointId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.registry.deactivate(&caller, id, now)
    }

    pub fn reactivate_endpoint(
        &mut self,
        caller: AccountId,
        id: EndpointId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.registry.reactivate(&caller, id, now)
    }

    // --- funding ---

    /// Operator-only supply faucet.
    pub fn mint(&mut self, caller: AccountId, to: AccountId, amount: Amount) -> Result<()> {
        self.require_operator(&caller)?;
        self.ledger.mint(&to, amount)
    }

    /// Grants the escrow a spend allowance over the caller's balance.
    pub fn approve(&mut self, owner: AccountId, amount: Amount) {
        self.ledger.approve(&owner, amount);
    }

    // --- payment lifecycle ---

    /// Opens a payment against an active listing. The amount is the listing
    /// price at this instant (price lock); `max_price` is the buyer's
    /// slippage guard against a front-running price update.
    pub fn open(
        &mut self,
        buyer: AccountId,
        endpoint_id: EndpointId,
        max_price: Amount,
        buyer_note_hash: Digest,
        now: DateTime<Utc>,
    ) -> Result<PaymentId> {
        let endpoint = self
            .registry
            .get(&endpoint_id)
            .ok_or(EscrowError::InvalidEndpoint(endpoint_id))?;
        if !endpoint.active {
            return Err(EscrowError::EndpointNotActive(endpoint_id));
        }
        let amount = endpoint.price_per_call;
        if amount == 0 {
            return Err(EscrowError::InvalidAmount);
        }
        if amount > max_price {
            return Err(EscrowError::PriceAboveMax {
                price: amount,
                max_price,
            });
        }
        let seller = endpoint.seller;
        let dispute_window_secs = endpoint.dispute_window_secs;

        self.ledger.escrow_lock(&buyer, amount)?;

        let id = PaymentId::derive(&buyer, &endpoint_id, self.open_counter);
        self.open_counter += 1;
        let payment = Payment {
            id,
            endpoint_id,
            buyer,
            seller,
            amount,
            opened_at: now,
            delivery_deadline: now + Duration::seconds(self.config.delivery_deadline_secs as i64),
            dispute_window_secs,
            delivered_at: None,
            dispute_deadline: None,
            status: PaymentStatus::Pending,
            buyer_note_hash,
            delivery_hash: None,
            response_meta_hash: None,
            evidence_hash: None,
        };
        self.payments.insert(id, payment);
        self.by_buyer.entry(buyer).or_default().push(id);
        self.by_seller.entry(seller).or_default().push(id);
        self.vault.increment_active(seller, now);

        tracing::info!(payment = %id, buyer = %buyer, seller = %seller, amount, "payment opened");
        Ok(id)
    }

    /// Pending -> Delivered on a valid seller commitment. Starts the real
    /// dispute clock and writes the immutable receipt.
    pub fn mark_delivered(
        &mut self,
        payment_id: PaymentId,
        commitment: &DeliveryCommitment,
        signature: &Signature,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let payment = self
            .payments
            .get_mut(&payment_id)
            .ok_or(EscrowError::PaymentNotFound(payment_id))?;
        payment.ensure_deliverable(now)?;

        if commitment.payment_id != payment_id {
            return Err(EscrowError::InvalidSignature);
        }
        let skew = (now - commitment.signed_at).num_seconds().abs();
        if skew > self.config.max_commitment_age_secs as i64 {
            return Err(EscrowError::InvalidSignature);
        }
        commitment.verify(&self.domain, &payment.seller, signature)?;

        payment.mark_delivered(commitment.delivery_hash, commitment.response_meta_hash, now)?;
        let receipt = Receipt {
            payment_id,
            endpoint_id: payment.endpoint_id,
            buyer: payment.buyer,
            seller: payment.seller,
            delivery_hash: commitment.delivery_hash,
            response_meta_hash: commitment.response_meta_hash,
            amount: payment.amount,
            issued_at: now,
        };
        let endpoint_id = payment.endpoint_id;

        self.registry.increment_calls(endpoint_id)?;
        self.receipts.store(receipt)?;

        tracing::info!(payment = %payment_id, "delivery proven");
        Ok(())
    }

    /// Delivered -> Disputed, buyer only, inside the window.
    pub fn dispute(
        &mut self,
        caller: AccountId,
        payment_id: PaymentId,
        evidence_hash: Digest,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let payment = self
            .payments
            .get_mut(&payment_id)
            .ok_or(EscrowError::PaymentNotFound(payment_id))?;
        payment.dispute(&caller, evidence_hash, now)?;
        tracing::info!(payment = %payment_id, buyer = %caller, "payment disputed");
        Ok(())
    }

    /// Delivered -> Released once the dispute window elapses. Permissionless.
    pub fn release(&mut self, payment_id: PaymentId, now: DateTime<Utc>) -> Result<()> {
        let payment = self
            .payments
            .get(&payment_id)
            .ok_or(EscrowError::PaymentNotFound(payment_id))?;
        payment.ensure_releasable(now)?;
        let (seller, buyer, amount) = (payment.seller, payment.buyer, payment.amount);

        let fee = protocol_fee(amount, self.config.protocol_fee_bps);
        self.ledger.escrow_settle(&seller, amount - fee, fee)?;
        if let Some(payment) = self.payments.get_mut(&payment_id) {
            payment.status = PaymentStatus::Released;
        }
        self.vault.decrement_active(&seller);
        self.reputation
            .record_delivery(payment_id, seller, buyer, amount, now);

        tracing::info!(payment = %payment_id, seller = %seller, net = amount - fee, fee, "payment released");
        Ok(())
    }

    /// Pending -> Refunded after the delivery deadline passes. Permissionless.
    pub fn refund(&mut self, payment_id: PaymentId, now: DateTime<Utc>) -> Result<()> {
        let payment = self
            .payments
            .get(&payment_id)
            .ok_or(EscrowError::PaymentNotFound(payment_id))?;
        payment.ensure_refundable(now)?;
        let (seller, buyer, amount) = (payment.seller, payment.buyer, payment.amount);

        self.ledger.escrow_refund(&buyer, amount)?;
        if let Some(payment) = self.payments.get_mut(&payment_id) {
            payment.status = PaymentStatus::Refunded;
        }
        self.vault.decrement_active(&seller);
        self.reputation.record_refund(payment_id, seller, buyer, now);

        tracing::info!(payment = %payment_id, buyer = %buyer, amount, "payment refunded");
        Ok(())
    }

    /// Disputed -> Released or Refunded by the single trusted arbitrator.
    /// No appeal path. Slashing is deliberately NOT coupled to the outcome;
    /// it remains a separate operator action.
    pub fn resolve_dispute(
        &mut self,
        caller: AccountId,
        payment_id: PaymentId,
        buyer_wins: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.require_arbitrator(&caller)?;
        let payment = self
            .payments
            .get(&payment_id)
            .ok_or(EscrowError::PaymentNotFound(payment_id))?;
        payment.ensure_disputed()?;
        let (seller, buyer, amount) = (payment.seller, payment.buyer, payment.amount);

        if buyer_wins {
            self.ledger.escrow_refund(&buyer, amount)?;
            if let Some(payment) = self.payments.get_mut(&payment_id) {
                payment.status = PaymentStatus::Refunded;
            }
            self.reputation
                .record_dispute(payment_id, seller, buyer, true, now);
            self.reputation.record_refund(payment_id, seller, buyer, now);
        } else {
            let fee = protocol_fee(amount, self.config.protocol_fee_bps);
            self.ledger.escrow_settle(&seller, amount - fee, fee)?;
            if let Some(payment) = self.payments.get_mut(&payment_id) {
                payment.status = PaymentStatus::Released;
            }
            self.reputation
                .record_dispute(payment_id, seller, buyer, false, now);
            self.reputation
                .record_delivery(payment_id, seller, buyer, amount, now);
        }
        self.vault.decrement_active(&seller);

        tracing::info!(payment = %payment_id, buyer_wins, "dispute resolved");
        Ok(())
    }

    // --- collateral ---

    pub fn deposit_bond(
        &mut self,
        seller: AccountId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if amount == 0 {
            return Err(EscrowError::InvalidAmount);
        }
        self.ledger.bond_lock(&seller, amount)?;
        self.vault.deposit(seller, amount, now);
        Ok(())
    }

    pub fn withdraw_bond(
        &mut self,
        seller: AccountId,
        amount: Amount,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.vault.withdraw(&seller, amount, now)?;
        self.ledger.bond_release(&seller, amount)
    }

    /// Operator-only penalty, capped at 50% of the current bond per action.
    pub fn slash(
        &mut self,
        caller: AccountId,
        seller: AccountId,
        payment_id: PaymentId,
        slash_bps: Bps,
        reason: String,
        now: DateTime<Utc>,
    ) -> Result<Amount> {
        self.require_operator(&caller)?;
        let amount = self.vault.slash(&seller, payment_id, slash_bps, reason, now)?;
        if amount > 0 {
            self.ledger.bond_slash(amount)?;
        }
        Ok(amount)
    }

    // --- reads ---

    pub fn payment(&self, payment_id: &PaymentId) -> Option<&Payment> {
        self.payments.get(payment_id)
    }

    pub fn payments_for_buyer(&self, buyer: &AccountId) -> Vec<&Payment> {
        self.by_buyer
            .get(buyer)
            .map(|ids| ids.iter().filter_map(|id| self.payments.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn payments_for_seller(&self, seller: &AccountId) -> Vec<&Payment> {
        self.by_seller
            .get(seller)
            .map(|ids| ids.iter().filter_map(|id| self.payments.get(id)).collect())
            .unwrap_or_default()
    }

    /// What `release`/`refund` would do for this payment right now.
    pub fn due(&self, payment_id: &PaymentId, now: DateTime<Utc>) -> Result<Option<Transition>> {
        self.payments
            .get(payment_id)
            .map(|p| due_transition(p, now))
            .ok_or(EscrowError::PaymentNotFound(*payment_id))
    }

    pub fn fees_accrued(&self) -> Amount {
        self.ledger.totals().treasury
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn vault(&self) -> &BondVault {
        &self.vault
    }

    pub fn receipts(&self) -> &ReceiptStore {
        &self.receipts
    }

    pub fn reputation(&self) -> &ReputationEngine {
        &self.reputation
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn domain(&self) -> &SigningDomain {
        &self.domain
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub(crate) fn ledger_mut(&mut self) -> &mut Ledger {
        &mut self.ledger
    }

    fn require_operator(&self, caller: &AccountId) -> Result<()> {
        match self.config.operator {
            Some(operator) if operator == *caller => Ok(()),
            _ => Err(EscrowError::NotOperator),
        }
    }

    fn require_arbitrator(&self, caller: &AccountId) -> Result<()> {
        match self.config.arbitrator {
            Some(arbitrator) if arbitrator == *caller => Ok(()),
            _ => Err(EscrowError::NotArbitrator),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MIN_DISPUTE_WINDOW_SECS, TOKEN_UNIT};
    use crate::signature::generate_keypair;
    use ed25519_dalek::SigningKey;

    const PRICE: Amount = TOKEN_UNIT;
    const WINDOW: u64 = 86_400;

    struct Harness {
        engine: EscrowEngine,
        seller_key: SigningKey,
        seller: AccountId,
        buyer: AccountId,
        operator: AccountId,
        arbitrator: AccountId,
        endpoint: EndpointId,
        t0: DateTime<Utc>,
    }

    fn harness() -> Harness {
        let (seller_key, seller) = generate_keypair();
        let (_, buyer) = generate_keypair();
        let (_, operator) = generate_keypair();
        let (_, arbitrator) = generate_keypair();

        let config = ProtocolConfig {
            operator: Some(operator),
            arbitrator: Some(arbitrator),
            ..ProtocolConfig::default()
        };
        let mut engine = EscrowEngine::new(config).unwrap();
        let t0 = Utc::now();

        engine.mint(operator, buyer, 10 * PRICE).unwrap();
        engine.approve(buyer, 10 * PRICE);
        let endpoint = engine
            .register_endpoint(
                seller,
                "ipfs://inference-api".into(),
                PRICE,
                Category::Inference,
                WINDOW,
                0,
                t0,
            )
            .unwrap();

        Harness {
            engine,
            seller_key,
            seller,
            buyer,
            operator,
            arbitrator,
            endpoint,
            t0,
        }
    }

    fn deliver(h: &mut Harness, payment_id: PaymentId, at: DateTime<Utc>) {
        let commitment = DeliveryCommitment {
            payment_id,
            delivery_hash: Digest::of(b"response"),
            response_meta_hash: Digest::of(b"meta"),
            signed_at: at,
        };
        let sig = commitment.sign(h.engine.domain(), &h.seller_key);
        h.engine
            .mark_delivered(payment_id, &commitment, &sig, at)
            .unwrap();
    }

    #[test]
    fn happy_path_releases_net_of_fee() {
        let mut h = harness();
        let id = h
            .engine
            .open(h.buyer, h.endpoint, PRICE, Digest::of(b"req"), h.t0)
            .unwrap();
        assert_eq!(h.engine.payment(&id).unwrap().status, PaymentStatus::Pending);
        assert_eq!(h.engine.ledger().balance_of(&h.buyer), 9 * PRICE);

        let delivered_at = h.t0 + Duration::seconds(60);
        deliver(&mut h, id, delivered_at);
        let p = h.engine.payment(&id).unwrap();
        assert_eq!(p.status, PaymentStatus::Delivered);
        assert_eq!(
            p.dispute_deadline,
            Some(delivered_at + Duration::seconds(WINDOW as i64))
        );

        // window still active: release refused
        let early = delivered_at + Duration::seconds(100);
        assert!(matches!(
            h.engine.release(id, early),
            Err(EscrowError::DisputeWindowActive(_))
        ));

        let after = delivered_at + Duration::seconds(WINDOW as i64);
        h.engine.release(id, after).unwrap();

        let fee = PRICE * 100 / 10_000;
        assert_eq!(h.engine.ledger().balance_of(&h.seller), PRICE - fee);
        assert_eq!(h.engine.fees_accrued(), fee);
        assert_eq!(h.engine.payment(&id).unwrap().status, PaymentStatus::Released);
        assert_eq!(h.engine.registry().get(&h.endpoint).unwrap().total_calls, 1);
        assert!(h.engine.receipts().exists(&id));

        let score = h.engine.reputation().seller(&h.seller).unwrap();
        assert_eq!(score.successful_deliveries, 1);
    }

    #[test]
    fn conservation_on_release_and_refund() {
        let mut h = harness();
        let supply = h.engine.ledger().totals().total_supply;

        let released = h
            .engine
            .open(h.buyer, h.endpoint, PRICE, Digest::of(b"a"), h.t0)
            .unwrap();
        let t0 = h.t0;
        deliver(&mut h, released, t0);
        h.engine
            .release(released, h.t0 + Duration::seconds(WINDOW as i64))
            .unwrap();

        let refunded = h
            .engine
            .open(h.buyer, h.endpoint, PRICE, Digest::of(b"b"), h.t0)
            .unwrap();
        h.engine
            .refund(refunded, h.t0 + Duration::seconds(3_601))
            .unwrap();

        let totals = h.engine.ledger().totals();
        let free = h.engine.ledger().balance_of(&h.buyer)
            + h.engine.ledger().balance_of(&h.seller);
        assert_eq!(free + totals.escrow_pool + totals.treasury, supply);
        assert_eq!(totals.total_supply, supply);

        // released payment: seller net + fee == amount, exactly
        assert_eq!(h.engine.ledger().balance_of(&h.seller) + h.engine.fees_accrued(), PRICE);
    }

    #[test]
    fn price_lock_survives_endpoint_update() {
        let mut h = harness();
        let id = h
            .engine
            .open(h.buyer, h.endpoint, PRICE, Digest::of(b"req"), h.t0)
            .unwrap();

        h.engine
            .update_endpoint(
                h.seller,
                h.endpoint,
                "ipfs://inference-api".into(),
                5 * PRICE,
                MIN_DISPUTE_WINDOW_SECS,
                h.t0,
            )
            .unwrap();

        let p = h.engine.payment(&id).unwrap();
        assert_eq!(p.amount, PRICE);
        assert_eq!(p.dispute_window_secs, WINDOW);
    }

    #[test]
    fn slippage_guard_blocks_raised_price() {
        let mut h = harness();
        h.engine
            .update_endpoint(
                h.seller,
                h.endpoint,
                "ipfs://inference-api".into(),
                2 * PRICE,
                WINDOW,
                h.t0,
            )
            .unwrap();
        assert!(matches!(
            h.engine.open(h.buyer, h.endpoint, PRICE, Digest::of(b"req"), h.t0),
            Err(EscrowError::PriceAboveMax { .. })
        ));
    }

    #[test]
    fn open_requires_active_endpoint_and_allowance() {
        let mut h = harness();
        h.engine.deactivate_endpoint(h.seller, h.endpoint, h.t0).unwrap();
        assert!(matches!(
            h.engine.open(h.buyer, h.endpoint, PRICE, Digest::of(b"req"), h.t0),
            Err(EscrowError::EndpointNotActive(_))
        ));
        h.engine.reactivate_endpoint(h.seller, h.endpoint, h.t0).unwrap();

        h.engine.approve(h.buyer, 0);
        assert!(matches!(
            h.engine.open(h.buyer, h.endpoint, PRICE, Digest::of(b"req"), h.t0),
            Err(EscrowError::InsufficientAllowance { .. })
        ));

        let ghost = EndpointId::from_bytes([9; 32]);
        assert!(matches!(
            h.engine.open(h.buyer, ghost, PRICE, Digest::of(b"req"), h.t0),
            Err(EscrowError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn timeout_refund_is_full_and_single() {
        let mut h = harness();
        let id = h
            .engine
            .open(h.buyer, h.endpoint, PRICE, Digest::of(b"req"), h.t0)
            .unwrap();

        // too early
        assert!(matches!(
            h.engine.refund(id, h.t0 + Duration::seconds(3_600)),
            Err(EscrowError::DeliveryDeadlineNotPassed)
        ));

        let late = h.t0 + Duration::seconds(3_601);
        assert_eq!(h.engine.due(&id, late).unwrap(), Some(Transition::Refund));
        h.engine.refund(id, late).unwrap();
        assert_eq!(h.engine.ledger().balance_of(&h.buyer), 10 * PRICE);
        assert_eq!(h.engine.payment(&id).unwrap().status, PaymentStatus::Refunded);

        // a second refund fails on status
        assert!(matches!(
            h.engine.refund(id, late),
            Err(EscrowError::InvalidStatus { .. })
        ));

        let score = h.engine.reputation().seller(&h.seller).unwrap();
        assert_eq!(score.total_refunds, 1);
        assert_eq!(score.total_deliveries, 1);
    }

    #[test]
    fn bad_signature_leaves_payment_pending() {
        let mut h = harness();
        let id = h
            .engine
            .open(h.buyer, h.endpoint, PRICE, Digest::of(b"req"), h.t0)
            .unwrap();

        let (wrong_key, _) = generate_keypair();
        let commitment = DeliveryCommitment {
            payment_id: id,
            delivery_hash: Digest::of(b"response"),
            response_meta_hash: Digest::of(b"meta"),
            signed_at: h.t0,
        };
        let sig = commitment.sign(h.engine.domain(), &wrong_key);
        assert!(matches!(
            h.engine.mark_delivered(id, &commitment, &sig, h.t0),
            Err(EscrowError::InvalidSignature)
        ));

        let p = h.engine.payment(&id).unwrap();
        assert_eq!(p.status, PaymentStatus::Pending);
        assert!(!h.engine.receipts().exists(&id));
        assert_eq!(h.engine.registry().get(&h.endpoint).unwrap().total_calls, 0);
    }

    #[test]
    fn stale_commitment_is_rejected() {
        let mut h = harness();
        let id = h
            .engine
            .open(h.buyer, h.endpoint, PRICE, Digest::of(b"req"), h.t0)
            .unwrap();

        let commitment = DeliveryCommitment {
            payment_id: id,
            delivery_hash: Digest::of(b"response"),
            response_meta_hash: Digest::of(b"meta"),
            signed_at: h.t0 - Duration::seconds(601),
        };
        let sig = commitment.sign(h.engine.domain(), &h.seller_key);
        assert!(matches!(
            h.engine.mark_delivered(id, &commitment, &sig, h.t0),
            Err(EscrowError::InvalidSignature)
        ));
    }

    #[test]
    fn dispute_resolution_for_buyer_refunds_in_full() {
        let mut h = harness();
        let id = h
            .engine
            .open(h.buyer, h.endpoint, PRICE, Digest::of(b"req"), h.t0)
            .unwrap();
        let t0 = h.t0;
        deliver(&mut h, id, t0);

        h.engine
            .dispute(h.buyer, id, Digest::of(b"garbage output"), h.t0)
            .unwrap();
        assert_eq!(h.engine.payment(&id).unwrap().status, PaymentStatus::Disputed);

        // release is now impossible
        assert!(matches!(
            h.engine.release(id, h.t0 + Duration::seconds(WINDOW as i64)),
            Err(EscrowError::InvalidStatus { .. })
        ));

        // only the arbitrator may resolve
        assert!(matches!(
            h.engine.resolve_dispute(h.buyer, id, true, h.t0),
            Err(EscrowError::NotArbitrator)
        ));

        h.engine.resolve_dispute(h.arbitrator, id, true, h.t0).unwrap();
        assert_eq!(h.engine.payment(&id).unwrap().status, PaymentStatus::Refunded);
        assert_eq!(h.engine.ledger().balance_of(&h.buyer), 10 * PRICE);
        assert_eq!(h.engine.ledger().balance_of(&h.seller), 0);

        let score = h.engine.reputation().seller(&h.seller).unwrap();
        assert_eq!(score.disputes_lost, 1);
        assert_eq!(score.total_refunds, 1);
    }

    #[test]
    fn dispute_resolution_for_seller_releases_with_fee() {
        let mut h = harness();
        let id = h
            .engine
            .open(h.buyer, h.endpoint, PRICE, Digest::of(b"req"), h.t0)
            .unwrap();
        let t0 = h.t0;
        deliver(&mut h, id, t0);
        h.engine
            .dispute(h.buyer, id, Digest::of(b"evidence"), h.t0)
            .unwrap();

        h.engine.resolve_dispute(h.arbitrator, id, false, h.t0).unwrap();
        let fee = PRICE * 100 / 10_000;
        assert_eq!(h.engine.payment(&id).unwrap().status, PaymentStatus::Released);
        assert_eq!(h.engine.ledger().balance_of(&h.seller), PRICE - fee);

        let score = h.engine.reputation().seller(&h.seller).unwrap();
        assert_eq!(score.total_disputes, 1);
        assert_eq!(score.disputes_lost, 0);
        assert_eq!(score.successful_deliveries, 1);
    }

    #[test]
    fn active_payment_counter_pairs_open_and_terminal() {
        let mut h = harness();
        h.engine.mint(h.operator, h.seller, PRICE).unwrap();
        h.engine.deposit_bond(h.seller, PRICE, h.t0).unwrap();

        let id = h
            .engine
            .open(h.buyer, h.endpoint, PRICE, Digest::of(b"req"), h.t0)
            .unwrap();
        assert_eq!(h.engine.vault().get(&h.seller).unwrap().active_payments, 1);

        let unlocked = h.t0 + Duration::seconds(h.engine.config().bond_lock_secs as i64);
        assert!(matches!(
            h.engine.withdraw_bond(h.seller, PRICE, unlocked),
            Err(EscrowError::ActivePaymentsExist(1))
        ));

        let t0 = h.t0;
        deliver(&mut h, id, t0);
        h.engine
            .release(id, h.t0 + Duration::seconds(WINDOW as i64))
            .unwrap();
        assert_eq!(h.engine.vault().get(&h.seller).unwrap().active_payments, 0);

        h.engine.withdraw_bond(h.seller, PRICE, unlocked).unwrap();
        assert_eq!(h.engine.ledger().balance_of(&h.seller), PRICE * 2 - PRICE * 100 / 10_000);
    }

    #[test]
    fn slash_is_operator_gated_and_routed_to_treasury() {
        let mut h = harness();
        h.engine.mint(h.operator, h.seller, 100).unwrap();
        h.engine.deposit_bond(h.seller, 100, h.t0).unwrap();

        let pid = PaymentId::from_bytes([7; 32]);
        assert!(matches!(
            h.engine
                .slash(h.buyer, h.seller, pid, 5_000, "misbehavior".into(), h.t0),
            Err(EscrowError::NotOperator)
        ));

        let taken = h
            .engine
            .slash(h.operator, h.seller, pid, 5_000, "misbehavior".into(), h.t0)
            .unwrap();
        assert_eq!(taken, 50);
        assert_eq!(h.engine.vault().balance_of(&h.seller), 50);
        assert_eq!(h.engine.fees_accrued(), 50);
        assert_eq!(h.engine.vault().slash_records(&h.seller).len(), 1);
    }

    #[test]
    fn mint_is_operator_gated() {
        let mut h = harness();
        assert!(matches!(
            h.engine.mint(h.buyer, h.buyer, 1),
            Err(EscrowError::NotOperator)
        ));
    }

    #[test]
    fn due_transition_predicate() {
        let mut h = harness();
        let id = h
            .engine
            .open(h.buyer, h.endpoint, PRICE, Digest::of(b"req"), h.t0)
            .unwrap();
        assert_eq!(h.engine.due(&id, h.t0).unwrap(), None);
        assert_eq!(
            h.engine.due(&id, h.t0 + Duration::seconds(3_601)).unwrap(),
            Some(Transition::Refund)
        );

        let t0 = h.t0;
        deliver(&mut h, id, t0);
        assert_eq!(h.engine.due(&id, h.t0).unwrap(), None);
        let after = h.t0 + Duration::seconds(WINDOW as i64);
        assert_eq!(h.engine.due(&id, after).unwrap(), Some(Transition::Release));

        h.engine.release(id, after).unwrap();
        assert_eq!(h.engine.due(&id, after).unwrap(), None);
    }

    #[test]
    fn payment_indices_cover_both_principals() {
        let mut h = harness();
        let id = h
            .engine
            .open(h.buyer, h.endpoint, PRICE, Digest::of(b"req"), h.t0)
            .unwrap();
        assert_eq!(h.engine.payments_for_buyer(&h.buyer)[0].id, id);
        assert_eq!(h.engine.payments_for_seller(&h.seller)[0].id, id);
    }
}
