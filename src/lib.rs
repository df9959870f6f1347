//! # meterpay — escrow micropayments for metered API access
//!
//! A buyer pays a seller per API call; funds sit in escrow until the seller
//! proves delivery with a signed commitment, then a dispute window elapses
//! before anyone may trigger the release.
//!
//! ## Architecture
//!
//! - **Registry**: seller-published endpoint listings (price, dispute window, category)
//! - **Escrow**: the payment state machine — open, deliver, dispute, release, refund
//! - **BondVault**: seller collateral with withdrawal locks and slashing
//! - **ReceiptStore**: write-once delivery receipts keyed by payment id
//! - **Reputation**: settlement-outcome counters and derived composite scores
//! - **Router**: batch opens and fixed-share revenue splits
//! - **x402**: HTTP `402 Payment Required` challenge/response convention for sellers
//! - **escrowd**: Axum service exposing the protocol over JSON

pub mod bond;
pub mod config;
pub mod error;
pub mod escrow;
pub mod ledger;
pub mod model;
pub mod receipts;
pub mod registry;
pub mod reputation;
pub mod router;
pub mod server;
pub mod signature;
pub mod x402;

pub use bond::{Bond, BondVault, SlashRecord};
pub use config::AppConfig;
pub use error::{EscrowError, Result};
pub use escrow::{EscrowEngine, Transition};
pub use model::{
    AccountId, Category, Digest, Endpoint, EndpointId, Payment, PaymentId, PaymentStatus,
};
pub use receipts::{Receipt, ReceiptStore};
pub use registry::Registry;
pub use reputation::{BuyerScore, ReputationEngine, SellerScore};
pub use signature::{DeliveryCommitment, SigningDomain};

/// Monetary amount in the token's smallest unit.
pub type Amount = u64;

/// Basis points, denominator 10 000.
pub type Bps = u16;
