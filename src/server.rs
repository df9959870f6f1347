use crate::bond::{Bond, SlashRecord};
use crate::error::EscrowError;
use crate::escrow::EscrowEngine;
use crate::model::{AccountId, Category, Digest, Endpoint, EndpointId, Payment, PaymentId};
use crate::receipts::Receipt;
use crate::reputation::{BuyerScore, SellerScore};
use crate::router::{BatchOpenItem, SplitShare};
use crate::signature::{signature_from_base64, DeliveryCommitment};
use crate::x402::PaymentChallenge;
use crate::{Amount, Bps};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Shared service state: the engine behind one lock, so every request is a
/// single atomic transition against the protocol state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RwLock<EscrowEngine>>,
    pub public_url: String,
}

impl AppState {
    pub fn new(engine: EscrowEngine, public_url: impl Into<String>) -> Self {
        Self {
            engine: Arc::new(RwLock::new(engine)),
            public_url: public_url.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub kind: String,
    pub error: String,
}

type Rejection = (StatusCode, Json<ApiError>);

type ApiResult<T> = std::result::Result<Json<T>, Rejection>;

/// Maps an engine rejection onto an HTTP status while preserving the
/// machine-readable kind, so clients can explain the refusal precisely.
fn reject(err: EscrowError) -> Rejection {
    use EscrowError::*;
    let status = match &err {
        InvalidEndpoint(_) | PaymentNotFound(_) | ReceiptNotFound(_) | SplitNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        NotBuyer | NotSeller | NotArbitrator | NotOperator => StatusCode::FORBIDDEN,
        InvalidSignature => StatusCode::UNAUTHORIZED,
        EndpointNotActive(_)
        | InvalidStatus { .. }
        | ReceiptExists(_)
        | DeliveryDeadlinePassed
        | DeliveryDeadlineNotPassed
        | DisputeWindowExpired
        | DisputeWindowActive(_)
        | BondLocked(_)
        | InsufficientFunds { .. }
        | InsufficientAllowance { .. }
        | InsufficientBond { .. }
        | ActivePaymentsExist(_)
        | SlashExceedsMax(_)
        | SlashExceedsBond { .. }
        | PriceAboveMax { .. } => StatusCode::CONFLICT,
        Config(_) | Network(_) | Io(_) | Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!("request failed: {err}");
    } else {
        tracing::debug!("request rejected: {err}");
    }
    (
        status,
        Json(ApiError {
            kind: err.kind().to_string(),
            error: err.to_string(),
        }),
    )
}

// --- wire types ---

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterEndpointRequest {
    pub seller: AccountId,
    pub metadata_uri: String,
    pub price_per_call: Amount,
    pub category: Category,
    pub dispute_window_secs: u64,
    #[serde(default)]
    pub required_bond: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EndpointIdResponse {
    pub endpoint_id: EndpointId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateEndpointRequest {
    pub caller: AccountId,
    pub metadata_uri: String,
    pub price_per_call: Amount,
    pub dispute_window_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CallerRequest {
    pub caller: AccountId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MintRequest {
    pub caller: AccountId,
    pub to: AccountId,
    pub amount: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApproveRequest {
    pub owner: AccountId,
    pub amount: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AccountView {
    pub account: AccountId,
    pub balance: Amount,
    pub allowance: Amount,
    pub bonded: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OpenPaymentRequest {
    pub buyer: AccountId,
    pub endpoint_id: EndpointId,
    pub max_price: Amount,
    pub buyer_note_hash: Digest,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OpenPaymentResponse {
    pub payment_id: PaymentId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchOpenRequest {
    pub buyer: AccountId,
    pub items: Vec<BatchOpenItem>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchOpenResponse {
    pub payment_ids: Vec<PaymentId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeliverRequest {
    pub delivery_hash: Digest,
    pub response_meta_hash: Digest,
    pub signed_at: DateTime<Utc>,
    /// Base64 ed25519 signature over the structured commitment.
    pub signature: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DisputeRequest {
    pub caller: AccountId,
    pub evidence_hash: Digest,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub caller: AccountId,
    pub buyer_wins: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BondRequest {
    pub seller: AccountId,
    pub amount: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SlashRequest {
    pub caller: AccountId,
    pub seller: AccountId,
    pub payment_id: PaymentId,
    pub slash_bps: Bps,
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SlashResponse {
    pub slashed: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSplitRequest {
    pub owner: AccountId,
    pub shares: Vec<SplitShare>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSplitResponse {
    pub split_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DistributeRequest {
    pub payer: AccountId,
    pub amount: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DistributeResponse {
    pub legs: Vec<(AccountId, Amount)>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SellerScoreView {
    pub seller: AccountId,
    pub score: u32,
    pub stats: Option<SellerScore>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BuyerScoreView {
    pub buyer: AccountId,
    pub score: u32,
    pub stats: Option<BuyerScore>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub seller: AccountId,
    pub score: u32,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/endpoints", post(register_endpoint).get(list_endpoints))
        .route("/endpoints/:id", get(get_endpoint).put(update_endpoint))
        .route("/endpoints/:id/deactivate", post(deactivate_endpoint))
        .route("/endpoints/:id/reactivate", post(reactivate_endpoint))
        .route("/endpoints/:id/challenge", get(endpoint_challenge))
        .route("/sellers/:account/endpoints", get(seller_endpoints))
        .route("/sellers/:account/payments", get(seller_payments))
        .route("/sellers/:account/score", get(seller_score))
        .route("/buyers/:account/payments", get(buyer_payments))
        .route("/buyers/:account/score", get(buyer_score))
        .route("/accounts/mint", post(mint))
        .route("/accounts/approve", post(approve))
        .route("/accounts/:account", get(account_view))
        .route("/payments", post(open_payment))
        .route("/payments/batch", post(open_batch))
        .route("/payments/:id", get(get_payment))
        .route("/payments/:id/deliver", post(deliver))
        .route("/payments/:id/dispute", post(dispute))
        .route("/payments/:id/release", post(release))
        .route("/payments/:id/refund", post(refund))
        .route("/payments/:id/resolve", post(resolve))
        .route("/bonds/deposit", post(deposit_bond))
        .route("/bonds/withdraw", post(withdraw_bond))
        .route("/bonds/slash", post(slash))
        .route("/bonds/:seller", get(get_bond))
        .route("/bonds/:seller/slashes", get(get_slashes))
        .route("/receipts/:payment_id", get(get_receipt))
        .route("/splits", post(create_split))
        .route("/splits/:id/distribute", post(distribute))
        .route("/leaderboard", get(leaderboard))
        .route("/treasury", get(treasury))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "healthy"}))
}

async fn register_endpoint(
    State(state): State<AppState>,
    Json(req): Json<RegisterEndpointRequest>,
) -> ApiResult<EndpointIdResponse> {
    let endpoint_id = state
        .engine
        .write()
        .register_endpoint(
            req.seller,
            req.metadata_uri,
            req.price_per_call,
            req.category,
            req.dispute_window_secs,
            req.required_bond,
            Utc::now(),
        )
        .map_err(reject)?;
    Ok(Json(EndpointIdResponse { endpoint_id }))
}

async fn list_endpoints(State(state): State<AppState>) -> Json<Vec<Endpoint>> {
    let engine = state.engine.read();
    let endpoints = engine
        .registry()
        .all_ids()
        .iter()
        .filter_map(|id| engine.registry().get(id).cloned())
        .collect();
    Json(endpoints)
}

async fn get_endpoint(
    State(state): State<AppState>,
    Path(id): Path<EndpointId>,
) -> ApiResult<Endpoint> {
    state
        .engine
        .read()
        .registry()
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| reject(EscrowError::InvalidEndpoint(id)))
}

async fn update_endpoint(
    State(state): State<AppState>,
    Path(id): Path<EndpointId>,
    Json(req): Json<UpdateEndpointRequest>,
) -> ApiResult<serde_json::Value> {
    state
        .engine
        .write()
        .update_endpoint(
            req.caller,
            id,
            req.metadata_uri,
            req.price_per_call,
            req.dispute_window_secs,
            Utc::now(),
        )
        .map_err(reject)?;
    Ok(Json(serde_json::json!({"updated": true})))
}

async fn deactivate_endpoint(
    State(state): State<AppState>,
    Path(id): Path<EndpointId>,
    Json(req): Json<CallerRequest>,
) -> ApiResult<serde_json::Value> {
    state
        .engine
        .write()
        .deactivate_endpoint(req.caller, id, Utc::now())
        .map_err(reject)?;
    Ok(Json(serde_json::json!({"active": false})))
}

async fn reactivate_endpoint(
    State(state): State<AppState>,
    Path(id): Path<EndpointId>,
    Json(req): Json<CallerRequest>,
) -> ApiResult<serde_json::Value> {
    state
        .engine
        .write()
        .reactivate_endpoint(req.caller, id, Utc::now())
        .map_err(reject)?;
    Ok(Json(serde_json::json!({"active": true})))
}

/// The body a seller returns with `402 Payment Required`.
async fn endpoint_challenge(
    State(state): State<AppState>,
    Path(id): Path<EndpointId>,
) -> ApiResult<PaymentChallenge> {
    let engine = state.engine.read();
    let endpoint = engine
        .registry()
        .get(&id)
        .ok_or_else(|| reject(EscrowError::InvalidEndpoint(id)))?;
    Ok(Json(PaymentChallenge {
        price: endpoint.price_per_call,
        endpoint_id: id,
        escrow_url: state.public_url.clone(),
        token: engine.config().token_symbol.clone(),
        chain_id: engine.config().chain_id,
    }))
}

async fn seller_endpoints(
    State(state): State<AppState>,
    Path(account): Path<AccountId>,
) -> Json<Vec<Endpoint>> {
    let engine = state.engine.read();
    Json(engine.registry().list_by_seller(&account).into_iter().cloned().collect())
}

async fn mint(State(state): State<AppState>, Json(req): Json<MintRequest>) -> ApiResult<serde_json::Value> {
    state
        .engine
        .write()
        .mint(req.caller, req.to, req.amount)
        .map_err(reject)?;
    Ok(Json(serde_json::json!({"minted": req.amount})))
}

async fn approve(
    State(state): State<AppState>,
    Json(req): Json<ApproveRequest>,
) -> Json<serde_json::Value> {
    state.engine.write().approve(req.owner, req.amount);
    Json(serde_json::json!({"allowance": req.amount}))
}

async fn account_view(
    State(state): State<AppState>,
    Path(account): Path<AccountId>,
) -> Json<AccountView> {
    let engine = state.engine.read();
    Json(AccountView {
        account,
        balance: engine.ledger().balance_of(&account),
        allowance: engine.ledger().allowance_of(&account),
        bonded: engine.vault().balance_of(&account),
    })
}

async fn open_payment(
    State(state): State<AppState>,
    Json(req): Json<OpenPaymentRequest>,
) -> ApiResult<OpenPaymentResponse> {
    let payment_id = state
        .engine
        .write()
        .open(req.buyer, req.endpoint_id, req.max_price, req.buyer_note_hash, Utc::now())
        .map_err(reject)?;
    Ok(Json(OpenPaymentResponse { payment_id }))
}

async fn open_batch(
    State(state): State<AppState>,
    Json(req): Json<BatchOpenRequest>,
) -> ApiResult<BatchOpenResponse> {
    let payment_ids = state
        .engine
        .write()
        .open_batch(req.buyer, &req.items, Utc::now())
        .map_err(reject)?;
    Ok(Json(BatchOpenResponse { payment_ids }))
}

async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<PaymentId>,
) -> ApiResult<Payment> {
    state
        .engine
        .read()
        .payment(&id)
        .cloned()
        .map(Json)
        .ok_or_else(|| reject(EscrowError::PaymentNotFound(id)))
}

async fn buyer_payments(
    State(state): State<AppState>,
    Path(account): Path<AccountId>,
) -> Json<Vec<Payment>> {
    let engine = state.engine.read();
    Json(engine.payments_for_buyer(&account).into_iter().cloned().collect())
}

async fn seller_payments(
    State(state): State<AppState>,
    Path(account): Path<AccountId>,
) -> Json<Vec<Payment>> {
    let engine = state.engine.read();
    Json(engine.payments_for_seller(&account).into_iter().cloned().collect())
}

async fn deliver(
    State(state): State<AppState>,
    Path(id): Path<PaymentId>,
    Json(req): Json<DeliverRequest>,
) -> ApiResult<serde_json::Value> {
    let signature = signature_from_base64(&req.signature).map_err(reject)?;
    let commitment = DeliveryCommitment {
        payment_id: id,
        delivery_hash: req.delivery_hash,
        response_meta_hash: req.response_meta_hash,
        signed_at: req.signed_at,
    };
    state
        .engine
        .write()
        .mark_delivered(id, &commitment, &signature, Utc::now())
        .map_err(reject)?;
    Ok(Json(serde_json::json!({"status": "delivered"})))
}

async fn dispute(
    State(state): State<AppState>,
    Path(id): Path<PaymentId>,
    Json(req): Json<DisputeRequest>,
) -> ApiResult<serde_json::Value> {
    state
        .engine
        .write()
        .dispute(req.caller, id, req.evidence_hash, Utc::now())
        .map_err(reject)?;
    Ok(Json(serde_json::json!({"status": "disputed"})))
}

async fn release(
    State(state): State<AppState>,
    Path(id): Path<PaymentId>,
) -> ApiResult<serde_json::Value> {
    state.engine.write().release(id, Utc::now()).map_err(reject)?;
    Ok(Json(serde_json::json!({"status": "released"})))
}

async fn refund(
    State(state): State<AppState>,
    Path(id): Path<PaymentId>,
) -> ApiResult<serde_json::Value> {
    state.engine.write().refund(id, Utc::now()).map_err(reject)?;
    Ok(Json(serde_json::json!({"status": "refunded"})))
}

async fn resolve(
    State(state): State<AppState>,
    Path(id): Path<PaymentId>,
    Json(req): Json<ResolveRequest>,
) -> ApiResult<serde_json::Value> {
    state
        .engine
        .write()
        .resolve_dispute(req.caller, id, req.buyer_wins, Utc::now())
        .map_err(reject)?;
    Ok(Json(serde_json::json!({"buyer_wins": req.buyer_wins})))
}

async fn deposit_bond(
    State(state): State<AppState>,
    Json(req): Json<BondRequest>,
) -> ApiResult<serde_json::Value> {
    state
        .engine
        .write()
        .deposit_bond(req.seller, req.amount, Utc::now())
        .map_err(reject)?;
    Ok(Json(serde_json::json!({"deposited": req.amount})))
}

async fn withdraw_bond(
    State(state): State<AppState>,
    Json(req): Json<BondRequest>,
) -> ApiResult<serde_json::Value> {
    state
        .engine
        .write()
        .withdraw_bond(req.seller, req.amount, Utc::now())
        .map_err(reject)?;
    Ok(Json(serde_json::json!({"withdrawn": req.amount})))
}

async fn slash(State(state): State<AppState>, Json(req): Json<SlashRequest>) -> ApiResult<SlashResponse> {
    let slashed = state
        .engine
        .write()
        .slash(req.caller, req.seller, req.payment_id, req.slash_bps, req.reason, Utc::now())
        .map_err(reject)?;
    Ok(Json(SlashResponse { slashed }))
}

async fn get_bond(State(state): State<AppState>, Path(seller): Path<AccountId>) -> ApiResult<Bond> {
    state
        .engine
        .read()
        .vault()
        .get(&seller)
        .cloned()
        .map(Json)
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ApiError {
                    kind: "bond_not_found".to_string(),
                    error: format!("no bond for seller {seller}"),
                }),
            )
        })
}

async fn get_slashes(
    State(state): State<AppState>,
    Path(seller): Path<AccountId>,
) -> Json<Vec<SlashRecord>> {
    let engine = state.engine.read();
    Json(engine.vault().slash_records(&seller).into_iter().cloned().collect())
}

async fn get_receipt(
    State(state): State<AppState>,
    Path(payment_id): Path<PaymentId>,
) -> ApiResult<Receipt> {
    state
        .engine
        .read()
        .receipts()
        .get(&payment_id)
        .cloned()
        .map(Json)
        .ok_or_else(|| reject(EscrowError::ReceiptNotFound(payment_id)))
}

async fn seller_score(
    State(state): State<AppState>,
    Path(account): Path<AccountId>,
) -> Json<SellerScoreView> {
    let engine = state.engine.read();
    Json(SellerScoreView {
        seller: account,
        score: engine.reputation().seller_score(&account),
        stats: engine.reputation().seller(&account).cloned(),
    })
}

async fn buyer_score(
    State(state): State<AppState>,
    Path(account): Path<AccountId>,
) -> Json<BuyerScoreView> {
    let engine = state.engine.read();
    Json(BuyerScoreView {
        buyer: account,
        score: engine.reputation().buyer_score(&account),
        stats: engine.reputation().buyer(&account).cloned(),
    })
}

async fn create_split(
    State(state): State<AppState>,
    Json(req): Json<CreateSplitRequest>,
) -> ApiResult<CreateSplitResponse> {
    let split_id = state
        .engine
        .write()
        .create_split(req.owner, req.shares, Utc::now())
        .map_err(reject)?;
    Ok(Json(CreateSplitResponse { split_id }))
}

async fn distribute(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<DistributeRequest>,
) -> ApiResult<DistributeResponse> {
    let legs = state
        .engine
        .write()
        .distribute(req.payer, id, req.amount)
        .map_err(reject)?;
    Ok(Json(DistributeResponse { legs }))
}

async fn leaderboard(State(state): State<AppState>) -> Json<Vec<LeaderboardEntry>> {
    let engine = state.engine.read();
    Json(
        engine
            .reputation()
            .leaderboard()
            .into_iter()
            .map(|(seller, score)| LeaderboardEntry { seller, score })
            .collect(),
    )
}

async fn treasury(State(state): State<AppState>) -> Json<crate::ledger::LedgerTotals> {
    Json(state.engine.read().ledger().totals())
}
