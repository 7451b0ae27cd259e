//! # HTTP API
//!
//! JSON-over-HTTP surface of the node, built on `axum`.
//!
//! ## Endpoints
//!
//! | Method | Path                                      | Description                          |
//! |--------|-------------------------------------------|--------------------------------------|
//! | GET    | `/health`                                 | Liveness probe                       |
//! | GET    | `/status`                                 | Version, uptime, identity counts     |
//! | GET    | `/plans`                                  | Plan catalogue                       |
//! | POST   | `/identities`                             | Register a primary (signed)          |
//! | GET    | `/identities/:chain/:wallet`              | Resolve a wallet                     |
//! | GET    | `/identities/:chain/:wallet/entitlement`  | Effective plan and trial state       |
//! | GET    | `/identities/:chain/:wallet/wallets`      | Linked wallets of the billing owner  |
//! | GET    | `/identities/:chain/:wallet/usage`        | Usage report (`?period=YYYY-MM`)     |
//! | POST   | `/quota/query`                            | Query gate                           |
//! | POST   | `/usage/query`                            | Charge one query                     |
//! | POST   | `/quota/transaction`                      | Transaction gate                     |
//! | POST   | `/transactions`                           | Record a transaction outcome         |
//! | POST   | `/wallets/link`                           | Link a wallet under an owner (signed)|
//! | POST   | `/subscriptions`                          | Payment collaborator notification    |
//!
//! `/wallets/link` needs two signatures over the same link message, one by
//! the owner wallet and one by the wallet being linked. `/subscriptions`
//! needs the shared billing secret in `x-tollgate-billing-secret`.
//!
//! Every rejection is a 4xx with `{ "code": ..., "message": ... }`. Gate
//! denials carry the rejection code (`TRIAL_EXPIRED`, ...) as `code`.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use tollgate_core::billing::{SubscriptionApplied, SubscriptionUpdate};
use tollgate_core::entitlement::Entitlement;
use tollgate_core::gate::QuotaDecision;
use tollgate_core::identity::{
    Identity, LinkedIdentity, PrimaryIdentity, RegistrationOutcome, SignatureError, WalletKey,
    WalletOccupant,
};
use tollgate_core::plan::Plan;
use tollgate_core::portfolio::LinkOutcome;
use tollgate_core::service::UsageReport;
use tollgate_core::usage::{TransactionRecord, TransactionStatus};
use tollgate_core::{ErrorCode, GateError, Tollgate};

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub tollgate: Arc<Tollgate>,
    pub metrics: SharedMetrics,
    pub version: String,
    pub started_at: DateTime<Utc>,
    /// Expected `x-tollgate-billing-secret`. `None` locks `/subscriptions`.
    pub billing_secret: Option<Arc<str>>,
}

/// Header carrying the payment collaborator's shared secret.
pub const BILLING_SECRET_HEADER: &str = "x-tollgate-billing-secret";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

/// Anything a handler can fail with, mapped to a status and error body.
#[derive(Debug)]
pub enum ApiError {
    /// An expected rejection (quota hit, wallet taken, not registered).
    Rejected(ErrorCode),
    Gate(GateError),
    Signature(SignatureError),
    BadRequest(String),
    Unauthorized,
}

impl From<GateError> for ApiError {
    fn from(e: GateError) -> Self {
        ApiError::Gate(e)
    }
}

impl From<SignatureError> for ApiError {
    fn from(e: SignatureError) -> Self {
        ApiError::Signature(e)
    }
}

impl From<tollgate_core::ValidationError> for ApiError {
    fn from(e: tollgate_core::ValidationError) -> Self {
        ApiError::Gate(GateError::Validation(e))
    }
}

/// Transport status for a rejection code.
pub fn rejection_status(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::WalletNotRegistered => StatusCode::NOT_FOUND,
        ErrorCode::TrialExpired | ErrorCode::PlanTxnLimitExceeded => StatusCode::PAYMENT_REQUIRED,
        ErrorCode::QueryLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::WalletLimitExceeded => StatusCode::FORBIDDEN,
        ErrorCode::CannotAddPrimaryWallet
        | ErrorCode::WalletExistsPrimary
        | ErrorCode::WalletExistsSameUser
        | ErrorCode::WalletExistsOtherUser => StatusCode::CONFLICT,
    }
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Rejected(code) => (
                rejection_status(*code),
                code.as_str(),
                code.message().to_string(),
            ),
            ApiError::Gate(e) => {
                let (status, code) = match e {
                    GateError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_FAILED"),
                    GateError::UnknownPlan(_) => (StatusCode::UNPROCESSABLE_ENTITY, "UNKNOWN_PLAN"),
                    GateError::IdentityNotFound(_) => (StatusCode::NOT_FOUND, "IDENTITY_NOT_FOUND"),
                    GateError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_FAILURE"),
                    GateError::Catalogue(_) => {
                        (StatusCode::INTERNAL_SERVER_ERROR, "CATALOGUE_INVALID")
                    }
                };
                (status, code, e.to_string())
            }
            ApiError::Signature(e @ SignatureError::UnsupportedChain(_)) => {
                (StatusCode::BAD_REQUEST, "UNSUPPORTED_CHAIN", e.to_string())
            }
            ApiError::Signature(e) => (StatusCode::UNAUTHORIZED, "INVALID_SIGNATURE", e.to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "missing or invalid billing secret".to_string(),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        if status.is_server_error() {
            tracing::error!(%code, %message, "request failed");
        } else {
            tracing::debug!(%code, %message, status = status.as_u16(), "request rejected");
        }
        let body = ErrorResponse {
            code: code.to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Resolves a wallet or answers `WALLET_NOT_REGISTERED`.
fn require_identity(state: &AppState, wallet: &str, chain: &str) -> ApiResult<Identity> {
    state
        .tollgate
        .resolve_identity(wallet, chain)?
        .ok_or(ApiError::Rejected(ErrorCode::WalletNotRegistered))
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub uptime_seconds: i64,
    pub primary_identities: usize,
    pub linked_identities: usize,
    pub plans: usize,
    pub trial_days: u32,
}

#[derive(Debug, Serialize)]
pub struct PlansResponse<'a> {
    pub free_plan: &'a str,
    pub plans: Vec<&'a Plan>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub wallet_address: String,
    pub blockchain_id: String,
    /// Signature over `tollgate:register:<chain>:<address>`.
    pub signature: String,
    #[serde(default)]
    pub credit_score: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub identity: PrimaryIdentity,
    pub entitlement: Entitlement,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResolveResponse {
    pub identity: Identity,
    pub billing_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct WalletRequest {
    pub wallet_address: String,
    pub blockchain_id: String,
}

#[derive(Debug, Deserialize)]
pub struct TransactionQuotaRequest {
    pub wallet_address: String,
    pub blockchain_id: String,
    /// Proposed amount in cents.
    pub amount: u64,
}

#[derive(Debug, Deserialize)]
pub struct RecordTransactionRequest {
    pub wallet_address: String,
    pub blockchain_id: String,
    pub amount: u64,
    pub status: TransactionStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DecisionResponse {
    pub allowed: bool,
    pub identity_id: Uuid,
    pub billing_id: Uuid,
    pub plan_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordQueryResponse {
    pub billing_id: Uuid,
    pub period: String,
    pub queries_used: u64,
}

#[derive(Debug, Deserialize)]
pub struct LinkRequest {
    pub owner_wallet_address: String,
    pub owner_blockchain_id: String,
    pub wallet_address: String,
    pub blockchain_id: String,
    /// Owner wallet's signature over
    /// `tollgate:link:<owner_chain>:<owner_address>:<chain>:<address>`.
    pub owner_signature: String,
    /// The linked wallet's signature over the same message.
    pub signature: String,
}

#[derive(Debug, Deserialize)]
pub struct UsageParams {
    pub period: Option<String>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/plans", get(plans_handler))
        .route("/identities", post(register_handler))
        .route("/identities/:chain/:wallet", get(resolve_handler))
        .route("/identities/:chain/:wallet/entitlement", get(entitlement_handler))
        .route("/identities/:chain/:wallet/wallets", get(linked_wallets_handler))
        .route("/identities/:chain/:wallet/usage", get(usage_handler))
        .route("/quota/query", post(query_quota_handler))
        .route("/usage/query", post(record_query_handler))
        .route("/quota/transaction", post(transaction_quota_handler))
        .route("/transactions", post(record_transaction_handler))
        .route("/wallets/link", post(link_handler))
        .route("/subscriptions", post(subscription_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let tg = &state.tollgate;
    Json(StatusResponse {
        version: state.version.clone(),
        uptime_seconds: (tg.now() - state.started_at).num_seconds().max(0),
        primary_identities: tg.db().primary_count(),
        linked_identities: tg.db().linked_total(),
        plans: tg.catalogue().len(),
        trial_days: tg.config().trial_days,
    })
}

async fn plans_handler(State(state): State<AppState>) -> Response {
    let catalogue = state.tollgate.catalogue();
    Json(PlansResponse {
        free_plan: &catalogue.free_plan().name,
        plans: catalogue.plans(),
    })
    .into_response()
}

/// `POST /identities`: registers a primary after checking the ownership
/// proof. 201 on creation, 409 if the wallet is already held.
async fn register_handler(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<RegisterResponse>)> {
    let key = WalletKey::parse(&req.wallet_address, &req.blockchain_id)?;
    state
        .tollgate
        .verify_ownership("register", &key, &req.signature)?;

    match state
        .tollgate
        .register_primary(&req.wallet_address, &req.blockchain_id, req.credit_score)?
    {
        RegistrationOutcome::Registered(identity) => {
            state.metrics.identities_registered_total.inc();
            let entitlement = state
                .tollgate
                .get_entitlement(&Identity::Primary(identity.clone()))?;
            Ok((
                StatusCode::CREATED,
                Json(RegisterResponse {
                    identity,
                    entitlement,
                }),
            ))
        }
        RegistrationOutcome::AlreadyRegistered(WalletOccupant::Primary(_)) => {
            Err(ApiError::Rejected(ErrorCode::WalletExistsPrimary))
        }
        RegistrationOutcome::AlreadyRegistered(WalletOccupant::Linked { .. }) => {
            Err(ApiError::Rejected(ErrorCode::WalletExistsOtherUser))
        }
    }
}

async fn resolve_handler(
    Path((chain, wallet)): Path<(String, String)>,
    State(state): State<AppState>,
) -> ApiResult<Json<ResolveResponse>> {
    let identity = require_identity(&state, &wallet, &chain)?;
    Ok(Json(ResolveResponse {
        billing_id: identity.billing_id(),
        identity,
    }))
}

async fn entitlement_handler(
    Path((chain, wallet)): Path<(String, String)>,
    State(state): State<AppState>,
) -> ApiResult<Json<Entitlement>> {
    let identity = require_identity(&state, &wallet, &chain)?;
    Ok(Json(state.tollgate.get_entitlement(&identity)?))
}

async fn linked_wallets_handler(
    Path((chain, wallet)): Path<(String, String)>,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<LinkedIdentity>>> {
    let identity = require_identity(&state, &wallet, &chain)?;
    Ok(Json(state.tollgate.linked_wallets(&identity)?))
}

async fn usage_handler(
    Path((chain, wallet)): Path<(String, String)>,
    Query(params): Query<UsageParams>,
    State(state): State<AppState>,
) -> ApiResult<Json<UsageReport>> {
    let period = params
        .period
        .as_deref()
        .map(Tollgate::parse_period)
        .transpose()?;
    let identity = require_identity(&state, &wallet, &chain)?;
    Ok(Json(state.tollgate.usage_report(&identity, period)?))
}

/// Shared tail of both gate handlers: metrics, then 200 or the rejection.
fn decision_response(
    state: &AppState,
    gate: &str,
    decision: QuotaDecision,
    identity: Option<Identity>,
) -> ApiResult<Json<DecisionResponse>> {
    state.metrics.observe_decision(gate, &decision);
    match (decision, identity) {
        (QuotaDecision::Allow, Some(identity)) => {
            let entitlement = state.tollgate.get_entitlement(&identity)?;
            Ok(Json(DecisionResponse {
                allowed: true,
                identity_id: identity.id(),
                billing_id: identity.billing_id(),
                plan_name: entitlement.plan_name,
            }))
        }
        (QuotaDecision::Deny(code), _) => Err(ApiError::Rejected(code)),
        (QuotaDecision::Allow, None) => Err(ApiError::Rejected(ErrorCode::WalletNotRegistered)),
    }
}

/// `POST /quota/query`: may this wallet make another query?
async fn query_quota_handler(
    State(state): State<AppState>,
    Json(req): Json<WalletRequest>,
) -> ApiResult<Json<DecisionResponse>> {
    let timer = state.metrics.gate_latency_seconds.start_timer();
    let auth = state
        .tollgate
        .authorize_query(&req.wallet_address, &req.blockchain_id)?;
    timer.observe_duration();
    decision_response(&state, "query", auth.decision, auth.identity)
}

/// `POST /usage/query`: charges one query to the billing owner for the
/// current month. Callers gate first; this endpoint does not.
async fn record_query_handler(
    State(state): State<AppState>,
    Json(req): Json<WalletRequest>,
) -> ApiResult<Json<RecordQueryResponse>> {
    let identity = require_identity(&state, &req.wallet_address, &req.blockchain_id)?;
    let period = state.tollgate.current_period();
    let queries_used = state.tollgate.record_query(&identity, period)?;
    state.metrics.queries_recorded_total.inc();
    Ok(Json(RecordQueryResponse {
        billing_id: identity.billing_id(),
        period: period.to_string(),
        queries_used,
    }))
}

/// `POST /quota/transaction`: would this amount fit under the monthly cap?
async fn transaction_quota_handler(
    State(state): State<AppState>,
    Json(req): Json<TransactionQuotaRequest>,
) -> ApiResult<Json<DecisionResponse>> {
    let timer = state.metrics.gate_latency_seconds.start_timer();
    let auth =
        state
            .tollgate
            .authorize_transaction(&req.wallet_address, &req.blockchain_id, req.amount)?;
    timer.observe_duration();
    decision_response(&state, "transaction", auth.decision, auth.identity)
}

async fn record_transaction_handler(
    State(state): State<AppState>,
    Json(req): Json<RecordTransactionRequest>,
) -> ApiResult<(StatusCode, Json<TransactionRecord>)> {
    let identity = require_identity(&state, &req.wallet_address, &req.blockchain_id)?;
    let record = state
        .tollgate
        .record_transaction(&identity, req.amount, req.status)?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// `POST /wallets/link`: the owner is resolved first, then both
/// signatures are checked, then the link is attempted.
async fn link_handler(
    State(state): State<AppState>,
    Json(req): Json<LinkRequest>,
) -> ApiResult<(StatusCode, Json<LinkedIdentity>)> {
    let owner = require_identity(&state, &req.owner_wallet_address, &req.owner_blockchain_id)?;
    let owner_key = WalletKey::parse(&req.owner_wallet_address, &req.owner_blockchain_id)?;
    let key = WalletKey::parse(&req.wallet_address, &req.blockchain_id)?;
    state
        .tollgate
        .verify_link(&owner_key, &key, &req.owner_signature, &req.signature)?;

    match state
        .tollgate
        .link_wallet(&owner, &req.wallet_address, &req.blockchain_id)?
    {
        LinkOutcome::Linked(linked) => {
            state.metrics.wallets_linked_total.inc();
            Ok((StatusCode::CREATED, Json(linked)))
        }
        LinkOutcome::Rejected(code) => Err(ApiError::Rejected(code)),
    }
}

/// Constant-time check of the billing secret header.
fn require_billing_secret(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    let (Some(expected), Some(given)) = (
        state.billing_secret.as_deref(),
        headers.get(BILLING_SECRET_HEADER),
    ) else {
        return Err(ApiError::Unauthorized);
    };
    if bool::from(expected.as_bytes().ct_eq(given.as_bytes())) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

/// `POST /subscriptions`: nothing is applied without the billing secret.
async fn subscription_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(update): Json<SubscriptionUpdate>,
) -> ApiResult<Json<SubscriptionApplied>> {
    require_billing_secret(&state, &headers)?;
    if update.plan_id.trim().is_empty() {
        return Err(ApiError::BadRequest("plan_id must not be empty".into()));
    }
    Ok(Json(state.tollgate.apply_subscription_update(&update)?))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
