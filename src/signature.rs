use crate::error::{EscrowError, Result};
use crate::model::{AccountId, Digest, PaymentId};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

pub const PROTOCOL_NAME: &str = "meterpay";
pub const PROTOCOL_VERSION: &str = "1";

/// Domain separator bound into every signed commitment.
///
/// Name and version are protocol constants; `instance` identifies the
/// deployment, so a commitment signed for one escrow cannot be replayed
/// against another or against a future protocol version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningDomain {
    pub name: String,
    pub version: String,
    pub instance: String,
}

impl SigningDomain {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            name: PROTOCOL_NAME.to_string(),
            version: PROTOCOL_VERSION.to_string(),
            instance: instance.into(),
        }
    }

    fn tag(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.name.as_bytes());
        hasher.update(b"|");
        hasher.update(self.version.as_bytes());
        hasher.update(b"|");
        hasher.update(self.instance.as_bytes());
        hasher.finalize().into()
    }
}

/// The structured payload a seller signs to prove delivery: the payment,
/// both content commitments, and the signing time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryCommitment {
    pub payment_id: PaymentId,
    pub delivery_hash: Digest,
    pub response_meta_hash: Digest,
    pub signed_at: DateTime<Utc>,
}

impl DeliveryCommitment {
    fn message(&self, domain: &SigningDomain) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(domain.tag());
        hasher.update(self.payment_id.as_bytes());
        hasher.update(self.delivery_hash.as_bytes());
        hasher.update(self.response_meta_hash.as_bytes());
        hasher.update(self.signed_at.timestamp().to_be_bytes());
        hasher.finalize().into()
    }

    pub fn sign(&self, domain: &SigningDomain, key: &SigningKey) -> Signature {
        key.sign(&self.message(domain))
    }

    /// Checks that `signature` over this commitment verifies against the
    /// expected signer's key. Principals are their verifying keys, so this is
    /// the "recovers to the payment's seller" check.
    pub fn verify(
        &self,
        domain: &SigningDomain,
        signer: &AccountId,
        signature: &Signature,
    ) -> Result<()> {
        let key = VerifyingKey::from_bytes(signer.as_bytes())
            .map_err(|_| EscrowError::InvalidSignature)?;
        key.verify(&self.message(domain), signature)
            .map_err(|_| EscrowError::InvalidSignature)
    }
}

/// Fresh seller/buyer identity: the signing key and its account id.
pub fn generate_keypair() -> (SigningKey, AccountId) {
    let key = SigningKey::generate(&mut rand::rngs::OsRng);
    let account = AccountId::from_bytes(key.verifying_key().to_bytes());
    (key, account)
}

/// Parses a wire signature from base64.
pub fn signature_from_base64(encoded: &str) -> Result<Signature> {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    let raw = STANDARD
        .decode(encoded)
        .map_err(|_| EscrowError::InvalidSignature)?;
    let bytes: [u8; 64] = raw
        .try_into()
        .map_err(|_| EscrowError::InvalidSignature)?;
    Ok(Signature::from_bytes(&bytes))
}

/// Encodes a signature for the wire.
pub fn signature_to_base64(signature: &Signature) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    STANDARD.encode(signature.to_bytes())
}
