use crate::error::{EscrowError, Result};
use crate::model::{AccountId, Digest, EndpointId, PaymentId};
use crate::Amount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Immutable proof-of-delivery record, written exactly once per payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub payment_id: PaymentId,
    pub endpoint_id: EndpointId,
    pub buyer: AccountId,
    pub seller: AccountId,
    pub delivery_hash: Digest,
    pub response_meta_hash: Digest,
    pub amount: Amount,
    pub issued_at: DateTime<Utc>,
}

/// Append-only, write-once store of delivery receipts keyed by payment id.
#[derive(Debug, Default)]
pub struct ReceiptStore {
    receipts: HashMap<PaymentId, Receipt>,
}

impl ReceiptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails if a receipt already exists for the payment; the original is
    /// never overwritten.
    pub(crate) fn store(&mut self, receipt: Receipt) -> Result<()> {
        if self.receipts.contains_key(&receipt.payment_id) {
            return Err(EscrowError::ReceiptExists(receipt.payment_id));
        }
        self.receipts.insert(receipt.payment_id, receipt);
        Ok(())
    }

    pub fn get(&self, payment_id: &PaymentId) -> Option<&Receipt> {
        self.receipts.get(payment_id)
    }

    pub fn exists(&self, payment_id: &PaymentId) -> bool {
        self.receipts.contains_key(payment_id)
    }

    /// Plain equality against what was stored; no cryptographic re-derivation.
    pub fn verify_delivery_hash(&self, payment_id: &PaymentId, expected: &Digest) -> bool {
        self.receipts
            .get(payment_id)
            .map(|r| r.delivery_hash == *expected)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.receipts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receipts.is_empty()
    }
}
