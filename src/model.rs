use crate::error::{EscrowError, Result};
use crate::Amount;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::str::FromStr;

/// One whole token, expressed in smallest units.
pub const TOKEN_UNIT: Amount = 1_000_000;

/// Basis-point denominator used for every fee and slash computation.
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Protocol-wide cap on the settlement fee (5%).
pub const MAX_PROTOCOL_FEE_BPS: u16 = 500;

/// Cap on a single slash action (50% of the current bond).
pub const MAX_SLASH_BPS: u16 = 5_000;

/// Shortest dispute window an endpoint may advertise (1 hour).
pub const MIN_DISPUTE_WINDOW_SECS: u64 = 3_600;

/// Longest dispute window an endpoint may advertise (30 days).
pub const MAX_DISPUTE_WINDOW_SECS: u64 = 2_592_000;

macro_rules! hex_bytes_32 {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            pub const fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self)
            }
        }

        impl FromStr for $name {
            type Err = EscrowError;

            fn from_str(s: &str) -> Result<Self> {
                let raw = hex::decode(s)
                    .map_err(|e| EscrowError::InvalidInput(format!("invalid hex: {e}")))?;
                let bytes: [u8; 32] = raw.try_into().map_err(|_| {
                    EscrowError::InvalidInput(format!(
                        "{} must be 32 bytes of hex",
                        stringify!($name)
                    ))
                })?;
                Ok(Self(bytes))
            }
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(
                &self,
                serializer: S,
            ) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(
                deserializer: D,
            ) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

// A principal is its ed25519 verifying key; there is no separate address space.
hex_bytes_32!(AccountId);
hex_bytes_32!(EndpointId);
hex_bytes_32!(PaymentId);
hex_bytes_32!(Digest);

impl Digest {
    /// Commitment digest of arbitrary off-chain content.
    pub fn of(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        Self(hasher.finalize().into())
    }
}

impl EndpointId {
    pub(crate) fn derive(seller: &AccountId, nonce: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"meterpay/endpoint");
        hasher.update(seller.as_bytes());
        hasher.update(nonce.to_be_bytes());
        Self(hasher.finalize().into())
    }
}

impl PaymentId {
    pub(crate) fn derive(buyer: &AccountId, endpoint: &EndpointId, counter: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"meterpay/payment");
        hasher.update(buyer.as_bytes());
        hasher.update(endpoint.as_bytes());
        hasher.update(counter.to_be_bytes());
        Self(hasher.finalize().into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Inference,
    Data,
    Search,
    Compute,
    Storage,
    Media,
    Other,
}

/// A seller-published API listing. Never destroyed, only deactivated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: EndpointId,
    pub seller: AccountId,
    pub metadata_uri: String,
    pub price_per_call: Amount,
    pub category: Category,
    pub dispute_window_secs: u64,
    /// Advisory minimum collateral; not enforced at open time.
    pub required_bond: Amount,
    pub active: bool,
    pub total_calls: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Shared validation for `register` and `update`.
pub(crate) fn validate_listing(
    metadata_uri: &str,
    price_per_call: Amount,
    dispute_window_secs: u64,
) -> Result<()> {
    if metadata_uri.is_empty() {
        return Err(EscrowError::EmptyMetadata);
    }
    if price_per_call == 0 {
        return Err(EscrowError::InvalidPrice);
    }
    if !(MIN_DISPUTE_WINDOW_SECS..=MAX_DISPUTE_WINDOW_SECS).contains(&dispute_window_secs) {
        return Err(EscrowError::InvalidDisputeWindow(dispute_window_secs));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Delivered,
    Released,
    Refunded,
    Disputed,
}

impl PaymentStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(self, PaymentStatus::Released | PaymentStatus::Refunded)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Delivered => "delivered",
            PaymentStatus::Released => "released",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Disputed => "disputed",
        };
        f.write_str(name)
    }
}

/// One escrowed payment. `amount` and the dispute-window length are locked at
/// open time; later endpoint updates do not touch in-flight payments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub endpoint_id: EndpointId,
    pub buyer: AccountId,
    pub seller: AccountId,
    pub amount: Amount,
    pub opened_at: DateTime<Utc>,
    /// Seller must prove delivery before this instant or the buyer can reclaim.
    pub delivery_deadline: DateTime<Utc>,
    /// Window length copied from the endpoint at open time.
    pub dispute_window_secs: u64,
    pub delivered_at: Option<DateTime<Utc>>,
    /// The real dispute clock: `None` until delivery, then anchored to it.
    pub dispute_deadline: Option<DateTime<Utc>>,
    pub status: PaymentStatus,
    pub buyer_note_hash: Digest,
    pub delivery_hash: Option<Digest>,
    pub response_meta_hash: Option<Digest>,
    pub evidence_hash: Option<Digest>,
}

impl Payment {
    fn require_status(&self, required: PaymentStatus) -> Result<()> {
        if self.status != required {
            return Err(EscrowError::InvalidStatus {
                id: self.id,
                actual: self.status,
                required,
            });
        }
        Ok(())
    }

    /// Status and deadline gates for delivery, checked before signature
    /// verification so callers see state errors ahead of crypto errors.
    pub(crate) fn ensure_deliverable(&self, now: DateTime<Utc>) -> Result<()> {
        self.require_status(PaymentStatus::Pending)?;
        if now > self.delivery_deadline {
            return Err(EscrowError::DeliveryDeadlinePassed);
        }
        Ok(())
    }

    /// Pending -> Delivered. Signature verification happens before this is
    /// called; here only the status and the delivery deadline gate.
    pub(crate) fn mark_delivered(
        &mut self,
        delivery_hash: Digest,
        response_meta_hash: Digest,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.require_status(PaymentStatus::Pending)?;
        if now > self.delivery_deadline {
            return Err(EscrowError::DeliveryDeadlinePassed);
        }
        self.status = PaymentStatus::Delivered;
        self.delivered_at = Some(now);
        self.dispute_deadline = Some(now + Duration::seconds(self.dispute_window_secs as i64));
        self.delivery_hash = Some(delivery_hash);
        self.response_meta_hash = Some(response_meta_hash);
        Ok(())
    }

    /// Delivered -> Disputed, buyer only, inside the window.
    pub(crate) fn dispute(
        &mut self,
        caller: &AccountId,
        evidence_hash: Digest,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if *caller != self.buyer {
            return Err(EscrowError::NotBuyer);
        }
        self.require_status(PaymentStatus::Delivered)?;
        let Some(deadline) = self.dispute_deadline else {
            return Err(EscrowError::DisputeWindowExpired);
        };
        if now > deadline {
            return Err(EscrowError::DisputeWindowExpired);
        }
        self.status = PaymentStatus::Disputed;
        self.evidence_hash = Some(evidence_hash);
        Ok(())
    }

    /// Checks the release gate without mutating; the engine moves funds first.
    pub(crate) fn ensure_releasable(&self, now: DateTime<Utc>) -> Result<()> {
        self.require_status(PaymentStatus::Delivered)?;
        let Some(deadline) = self.dispute_deadline else {
            return Err(EscrowError::InvalidStatus {
                id: self.id,
                actual: self.status,
                required: PaymentStatus::Delivered,
            });
        };
        if now < deadline {
            return Err(EscrowError::DisputeWindowActive(deadline));
        }
        Ok(())
    }

    /// Checks the timeout-refund gate without mutating.
    pub(crate) fn ensure_refundable(&self, now: DateTime<Utc>) -> Result<()> {
        self.require_status(PaymentStatus::Pending)?;
        if now <= self.delivery_deadline {
            return Err(EscrowError::DeliveryDeadlineNotPassed);
        }
        Ok(())
    }

    pub(crate) fn ensure_disputed(&self) -> Result<()> {
        self.require_status(PaymentStatus::Disputed)
    }
}
