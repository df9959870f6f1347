use crate::error::{EscrowError, Result};
use crate::model::{validate_listing, AccountId, Category, Endpoint, EndpointId};
use crate::Amount;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Seller-published endpoint listings.
///
/// Endpoints are addressed by an id derived from the seller and a per-seller
/// registration nonce; they are never removed, only deactivated. The primary
/// map and the per-seller index are always written together.
#[derive(Debug, Default)]
pub struct Registry {
    endpoints: HashMap<EndpointId, Endpoint>,
    by_seller: HashMap<AccountId, Vec<EndpointId>>,
    order: Vec<EndpointId>,
    nonces: HashMap<AccountId, u64>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        seller: AccountId,
        metadata_uri: String,
        price_per_call: Amount,
        category: Category,
        dispute_window_secs: u64,
        required_bond: Amount,
        now: DateTime<Utc>,
    ) -> Result<EndpointId> {
        validate_listing(&metadata_uri, price_per_call, dispute_window_secs)?;

        let nonce = self.nonces.entry(seller).or_insert(0);
        let id = EndpointId::derive(&seller, *nonce);
        *nonce += 1;

        let endpoint = Endpoint {
            id,
            seller,
            metadata_uri,
            price_per_call,
            category,
            dispute_window_secs,
            required_bond,
            active: true,
            total_calls: 0,
            created_at: now,
            updated_at: now,
        };
        self.endpoints.insert(id, endpoint);
        self.by_seller.entry(seller).or_default().push(id);
        self.order.push(id);

        tracing::info!(endpoint = %id, seller = %seller, price = price_per_call, "endpoint registered");
        Ok(id)
    }

    /// Seller-only. Does not touch in-flight payments: their amount and
    /// window were copied at open time.
    pub fn update(
        &mut self,
        caller: &AccountId,
        id: EndpointId,
        metadata_uri: String,
        price_per_call: Amount,
        dispute_window_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        validate_listing(&metadata_uri, price_per_call, dispute_window_secs)?;
        let endpoint = self
            .endpoints
            .get_mut(&id)
            .ok_or(EscrowError::InvalidEndpoint(id))?;
        if endpoint.seller != *caller {
            return Err(EscrowError::NotSeller);
        }
        endpoint.metadata_uri = metadata_uri;
        endpoint.price_per_call = price_per_call;
        endpoint.dispute_window_secs = dispute_window_secs;
        endpoint.updated_at = now;
        Ok(())
    }

    pub fn deactivate(&mut self, caller: &AccountId, id: EndpointId, now: DateTime<Utc>) -> Result<()> {
        self.set_active(caller, id, false, now)
    }

    pub fn reactivate(&mut self, caller: &AccountId, id: EndpointId, now: DateTime<Utc>) -> Result<()> {
        self.set_active(caller, id, true, now)
    }

    fn set_active(
        &mut self,
        caller: &AccountId,
        id: EndpointId,
        active: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let endpoint = self
            .endpoints
            .get_mut(&id)
            .ok_or(EscrowError::InvalidEndpoint(id))?;
        if endpoint.seller != *caller {
            return Err(EscrowError::NotSeller);
        }
        endpoint.active = active;
        endpoint.updated_at = now;
        tracing::info!(endpoint = %id, active, "endpoint visibility changed");
        Ok(())
    }

    /// Escrow-only: bumps the successful-delivery counter.
    pub(crate) fn increment_calls(&mut self, id: EndpointId) -> Result<()> {
        let endpoint = self
            .endpoints
            .get_mut(&id)
            .ok_or(EscrowError::InvalidEndpoint(id))?;
        endpoint.total_calls += 1;
        Ok(())
    }

    pub fn get(&self, id: &EndpointId) -> Option<&Endpoint> {
        self.endpoints.get(id)
    }

    pub fn list_by_seller(&self, seller: &AccountId) -> Vec<&Endpoint> {
        self.by_seller
            .get(seller)
            .map(|ids| ids.iter().filter_map(|id| self.endpoints.get(id)).collect())
            .unwrap_or_default()
    }

    /// All endpoint ids in registration order.
    pub fn all_ids(&self) -> &[EndpointId] {
        &self.order
    }

    pub fn is_active(&self, id: &EndpointId) -> bool {
        self.endpoints.get(id).map(|e| e.active).unwrap_or(false)
    }

    pub fn price_of(&self, id: &EndpointId) -> Result<Amount> {
        self.endpoints
            .get(id)
            .map(|e| e.price_per_call)
            .ok_or(EscrowError::InvalidEndpoint(*id))
    }

    pub fn dispute_window_of(&self, id: &EndpointId) -> Result<u64> {
        self.endpoints
            .get(id)
            .map(|e| e.dispute_window_secs)
            .ok_or(EscrowError::InvalidEndpoint(*id))
    }
}
