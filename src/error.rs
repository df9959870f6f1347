use crate::model::{EndpointId, PaymentId, PaymentStatus};
use crate::{Amount, Bps};
use chrono::{DateTime, Utc};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EscrowError>;

/// Every rejection the protocol can hand back to a caller.
///
/// Variants are deliberately specific: a UI must be able to explain *why* an
/// action was refused (e.g. "dispute window still active, funds auto-release
/// at <time>") without string-matching messages.
#[derive(Error, Debug)]
pub enum EscrowError {
    // --- validation ---
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("metadata URI must not be empty")]
    EmptyMetadata,

    #[error("price per call must be positive")]
    InvalidPrice,

    #[error("dispute window of {0}s is outside the allowed range")]
    InvalidDisputeWindow(u64),

    #[error("amount must be positive")]
    InvalidAmount,

    #[error("endpoint price {price} exceeds buyer maximum {max_price}")]
    PriceAboveMax { price: Amount, max_price: Amount },

    #[error("split shares must sum to 10000 bps, got {0}")]
    InvalidSplitShares(u32),

    // --- lookup ---
    #[error("unknown endpoint {0}")]
    InvalidEndpoint(EndpointId),

    #[error("endpoint {0} is not active")]
    EndpointNotActive(EndpointId),

    #[error("unknown payment {0}")]
    PaymentNotFound(PaymentId),

    #[error("no receipt recorded for payment {0}")]
    ReceiptNotFound(PaymentId),

    #[error("unknown split {0}")]
    SplitNotFound(uuid::Uuid),

    // --- state ---
    #[error("payment {id} is {actual}, operation requires {required}")]
    InvalidStatus {
        id: PaymentId,
        actual: PaymentStatus,
        required: PaymentStatus,
    },

    #[error("receipt already recorded for payment {0}")]
    ReceiptExists(PaymentId),

    // --- authorization ---
    #[error("caller is not the payment buyer")]
    NotBuyer,

    #[error("caller is not the endpoint seller")]
    NotSeller,

    #[error("caller is not the arbitrator")]
    NotArbitrator,

    #[error("caller is not the operator")]
    NotOperator,

    // --- temporal ---
    #[error("delivery deadline has passed")]
    DeliveryDeadlinePassed,

    #[error("delivery deadline has not passed yet")]
    DeliveryDeadlineNotPassed,

    #[error("dispute window has expired")]
    DisputeWindowExpired,

    #[error("dispute window is active until {0}")]
    DisputeWindowActive(DateTime<Utc>),

    #[error("bond is locked until {0}")]
    BondLocked(DateTime<Utc>),

    // --- funds ---
    #[error("insufficient funds: have {available}, need {required}")]
    InsufficientFunds {
        available: Amount,
        required: Amount,
    },

    #[error("insufficient allowance: have {available}, need {required}")]
    InsufficientAllowance {
        available: Amount,
        required: Amount,
    },

    #[error("insufficient bond: have {available}, need {required}")]
    InsufficientBond {
        available: Amount,
        required: Amount,
    },

    #[error("{0} active payments reference this seller")]
    ActivePaymentsExist(u64),

    #[error("slash of {0} bps exceeds the maximum of 5000 bps")]
    SlashExceedsMax(Bps),

    #[error("slash amount {amount} exceeds bonded balance {bonded}")]
    SlashExceedsBond { amount: Amount, bonded: Amount },

    // --- cryptographic ---
    #[error("delivery commitment signature is invalid")]
    InvalidSignature,

    // --- service layer ---
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(String),
}

impl EscrowError {
    /// Stable machine-readable tag for the service layer.
    pub fn kind(&self) -> &'static str {
        match self {
            EscrowError::Config(_) => "config",
            EscrowError::InvalidInput(_) => "invalid_input",
            EscrowError::EmptyMetadata => "empty_metadata",
            EscrowError::InvalidPrice => "invalid_price",
            EscrowError::InvalidDisputeWindow(_) => "invalid_dispute_window",
            EscrowError::InvalidAmount => "invalid_amount",
            EscrowError::PriceAboveMax { .. } => "price_above_max",
            EscrowError::InvalidSplitShares(_) => "invalid_split_shares",
            EscrowError::InvalidEndpoint(_) => "invalid_endpoint",
            EscrowError::EndpointNotActive(_) => "endpoint_not_active",
            EscrowError::PaymentNotFound(_) => "payment_not_found",
            EscrowError::ReceiptNotFound(_) => "receipt_not_found",
            EscrowError::SplitNotFound(_) => "split_not_found",
            EscrowError::InvalidStatus { .. } => "invalid_status",
            EscrowError::ReceiptExists(_) => "receipt_exists",
            EscrowError::NotBuyer => "not_buyer",
            EscrowError::NotSeller => "not_seller",
            EscrowError::NotArbitrator => "not_arbitrator",
            EscrowError::NotOperator => "not_operator",
            EscrowError::DeliveryDeadlinePassed => "delivery_deadline_passed",
            EscrowError::DeliveryDeadlineNotPassed => "delivery_deadline_not_passed",
            EscrowError::DisputeWindowExpired => "dispute_window_expired",
            EscrowError::DisputeWindowActive(_) => "dispute_window_active",
            EscrowError::BondLocked(_) => "bond_locked",
            EscrowError::InsufficientFunds { .. } => "insufficient_funds",
            EscrowError::InsufficientAllowance { .. } => "insufficient_allowance",
            EscrowError::InsufficientBond { .. } => "insufficient_bond",
            EscrowError::ActivePaymentsExist(_) => "active_payments_exist",
            EscrowError::SlashExceedsMax(_) => "slash_exceeds_max",
            EscrowError::SlashExceedsBond { .. } => "slash_exceeds_bond",
            EscrowError::InvalidSignature => "invalid_signature",
            EscrowError::Serialization(_) => "serialization",
            EscrowError::Network(_) => "network",
            EscrowError::Io(_) => "io",
        }
    }
}

impl From<serde_json::Error> for EscrowError {
    fn from(err: serde_json::Error) -> Self {
        EscrowError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for EscrowError {
    fn from(err: std::io::Error) -> Self {
        EscrowError::Io(err.to_string())
    }
}
