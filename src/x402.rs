use crate::error::{EscrowError, Result};
use crate::model::{AccountId, Digest, EndpointId, Payment, PaymentId, PaymentStatus};
use crate::server::{OpenPaymentRequest, OpenPaymentResponse};
use crate::Amount;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

/// Header carrying the escrow payment id on a retried request.
pub const PAYMENT_ID_HEADER: &str = "x-payment-id";

/// Body of a seller's `402 Payment Required` response: everything a buyer
/// needs to open an escrow payment and retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentChallenge {
    pub price: Amount,
    pub endpoint_id: EndpointId,
    pub escrow_url: String,
    pub token: String,
    pub chain_id: u64,
}

/// Buyer-side client for the 402 convention.
///
/// `get` fetches a resource; on a `402` it parses the challenge, opens an
/// escrow payment for the advertised price, and retries the request with the
/// payment id attached. The challenge price doubles as the slippage bound,
/// so a listing repriced between challenge and open is rejected by the
/// escrow rather than silently paid.
pub struct X402Client {
    http: Client,
    escrow_url: String,
    account: AccountId,
}

impl X402Client {
    pub fn new(escrow_url: impl Into<String>, account: AccountId) -> Self {
        Self {
            http: Client::new(),
            escrow_url: escrow_url.into(),
            account,
        }
    }

    pub async fn get(&self, resource_url: &str) -> Result<reqwest::Response> {
        let first = self.http.get(resource_url).send().await?;
        if first.status() != StatusCode::PAYMENT_REQUIRED {
            return Ok(first);
        }

        let challenge: PaymentChallenge = first
            .json()
            .await
            .map_err(|e| EscrowError::Serialization(format!("bad 402 challenge: {e}")))?;
        let payment_id = self
            .open_payment(&challenge, Digest::of(resource_url.as_bytes()))
            .await?;
        tracing::debug!(payment = %payment_id, resource = resource_url, "retrying with payment");

        let retry = self
            .http
            .get(resource_url)
            .header(PAYMENT_ID_HEADER, payment_id.to_string())
            .send()
            .await?;
        Ok(retry)
    }

    async fn open_payment(
        &self,
        challenge: &PaymentChallenge,
        buyer_note_hash: Digest,
    ) -> Result<PaymentId> {
        let request = OpenPaymentRequest {
            buyer: self.account,
            endpoint_id: challenge.endpoint_id,
            max_price: challenge.price,
            buyer_note_hash,
        };
        let response = self
            .http
            .post(format!("{}/payments", self.escrow_url))
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EscrowError::InvalidInput(format!(
                "escrow refused payment open ({status}): {body}"
            )));
        }
        let opened: OpenPaymentResponse = response
            .json()
            .await
            .map_err(|e| EscrowError::Serialization(format!("bad open response: {e}")))?;
        Ok(opened.payment_id)
    }
}

/// Seller-side check before serving a request that presents a payment id:
/// the referenced payment must be pending, on the right endpoint, and for at
/// least the current price.
pub struct SellerGate {
    http: Client,
    escrow_url: String,
}

impl SellerGate {
    pub fn new(escrow_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            escrow_url: escrow_url.into(),
        }
    }

    pub async fn verify_payment(
        &self,
        payment_id: &PaymentId,
        endpoint_id: &EndpointId,
        min_amount: Amount,
    ) -> Result<bool> {
        let response = self
            .http
            .get(format!("{}/payments/{payment_id}", self.escrow_url))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let payment: Payment = response
            .json()
            .await
            .map_err(|e| EscrowError::Serialization(format!("bad payment view: {e}")))?;
        Ok(payment.status == PaymentStatus::Pending
            && payment.endpoint_id == *endpoint_id
            && payment.amount >= min_amount)
    }
}
