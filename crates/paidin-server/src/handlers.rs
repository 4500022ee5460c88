//! HTTP Handlers

use axum::{
    Json,
    body::Bytes,
    extract::{FromRequestParts, Path, Query, State},
    http::{HeaderMap, StatusCode, request::Parts},
    response::{IntoResponse, Response},
};
use paidin_core::{
    BreezWallet, PaymentStore, PlaidAccount, ProviderKind, WalletTransaction, WalletType,
    WebhookEvent, WebhookFilter,
};
use paidin_pipeline::{
    FundWalletRequest, FundWalletResponse, Job, Lane, PaymentStatus, PayoutRequest,
    PayoutResponse, PipelineError, RequestStatus, SwapDirection, SwapRequest, SwapResponse,
};
use paidin_providers::webhook::signature_header;
use paidin_providers::{Invoice, InvoiceRequest, InvoiceStatus, LinkToken, ProviderError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::AppState;

const USER_HEADER: &str = "x-user-id";
const ADMIN_HEADER: &str = "x-admin-token";
const FAILED_JOBS_LIMIT: usize = 50;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// Error rendered as `{ "error", "code" }` with a matching status
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: String,
    code: &'static str,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            code,
        }
    }

    fn unauthenticated() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", "Missing or invalid x-user-id")
    }

    fn not_found(what: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", what)
    }

    fn invoicing_disabled() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "INVOICING_DISABLED",
            "Invoicing not configured",
        )
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = match &err {
            PipelineError::Authorization(_) => StatusCode::FORBIDDEN,
            PipelineError::Validation(_) | PipelineError::SignatureVerification(_) => {
                StatusCode::BAD_REQUEST
            }
            PipelineError::InsufficientFunds { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::WalletNotFound(_) | PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::Provider(e) if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::Provider(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(code = err.code(), error = %err, "Request failed");
        } else {
            tracing::debug!(code = err.code(), error = %err, "Request rejected");
        }
        Self {
            status,
            error: err.user_message().to_string(),
            code: err.code(),
        }
    }
}

impl From<ProviderError> for ApiError {
    fn from(err: ProviderError) -> Self {
        PipelineError::from(err).into()
    }
}

impl From<paidin_core::CoreError> for ApiError {
    fn from(err: paidin_core::CoreError) -> Self {
        PipelineError::from(err).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.error,
                code: self.code.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Extractors
// ============================================================================

/// Authenticated user id forwarded by the gateway
#[derive(Clone, Copy, Debug)]
pub struct Requester(pub Uuid);

impl<S: Send + Sync> FromRequestParts<S> for Requester {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .map(Self)
            .ok_or_else(ApiError::unauthenticated)
    }
}

/// Passes only when `x-admin-token` matches the configured token
pub struct Admin;

impl FromRequestParts<AppState> for Admin {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.admin_token.as_deref() else {
            return Err(ApiError::new(
                StatusCode::FORBIDDEN,
                "ADMIN_DISABLED",
                "Admin access not configured",
            ));
        };
        let presented = parts.headers.get(ADMIN_HEADER).and_then(|v| v.to_str().ok());
        match presented {
            Some(token) if constant_time_eq(token.as_bytes(), expected.as_bytes()) => Ok(Self),
            _ => Err(ApiError::new(
                StatusCode::FORBIDDEN,
                "AUTHORIZATION_ERROR",
                "Invalid admin token",
            )),
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

async fn require_member(state: &AppState, company_id: Uuid, user_id: Uuid) -> ApiResult<()> {
    match state.pipeline.store.member_role(company_id, user_id).await? {
        Some(_) => Ok(()),
        None => Err(PipelineError::Authorization(format!(
            "user {user_id} is not a member of company {company_id}"
        ))
        .into()),
    }
}

// ============================================================================
// Request & response types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub queue: &'static str,
    pub invoicing: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
pub struct FundBody {
    pub company_id: Uuid,
    pub plaid_account_id: Uuid,
    pub amount_usd: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct SwapBody {
    pub company_id: Uuid,
    pub direction: SwapDirection,
    pub amount: Decimal,

    /// Run on the conversion lane instead of inline
    #[serde(default)]
    pub deferred: bool,
}

#[derive(Debug, Deserialize)]
pub struct PayoutBody {
    pub company_id: Uuid,
    pub employee_id: Uuid,
    pub amount_sats: u64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BalanceQuery {
    pub company_id: Uuid,
    pub wallet_type: WalletType,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub company_id: Uuid,
    pub wallet_type: WalletType,
    pub balance_sats: u64,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub company_id: Uuid,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct LinkTokenBody {
    pub company_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ExchangeBody {
    pub company_id: Uuid,
    pub public_token: String,
}

#[derive(Debug, Deserialize)]
pub struct InvoiceBody {
    pub company_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct InvoiceQuery {
    pub company_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct InvoiceResponse {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub payment_url: String,
}

#[derive(Debug, Serialize)]
pub struct InvoiceStatusResponse {
    pub id: String,
    pub status: InvoiceStatus,
}

// ============================================================================
// Core routes
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        queue: state.pipeline.queue.mode(),
        invoicing: state.invoicing.as_ref().map(|s| s.provider().as_str()),
    })
}

pub async fn fund_wallet(
    State(state): State<AppState>,
    Requester(user_id): Requester,
    Json(body): Json<FundBody>,
) -> ApiResult<(StatusCode, Json<FundWalletResponse>)> {
    let response = state
        .pipeline
        .orchestrator
        .fund_company_wallet(FundWalletRequest {
            requested_by: user_id,
            company_id: body.company_id,
            plaid_account_id: body.plaid_account_id,
            amount_usd: body.amount_usd,
        })
        .await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

pub async fn create_swap(
    State(state): State<AppState>,
    Requester(user_id): Requester,
    Json(body): Json<SwapBody>,
) -> ApiResult<(StatusCode, Json<SwapResponse>)> {
    let request = SwapRequest {
        user_id,
        company_id: body.company_id,
        direction: body.direction,
        amount: body.amount,
    };
    let orchestrator = &state.pipeline.orchestrator;
    let response = if body.deferred {
        orchestrator.queue_employee_swap(request).await?
    } else {
        orchestrator.process_employee_swap(request).await?
    };
    let status = match response.status {
        RequestStatus::Completed => StatusCode::OK,
        RequestStatus::Queued | RequestStatus::Accepted => StatusCode::ACCEPTED,
    };
    Ok((status, Json(response)))
}

pub async fn create_payout(
    State(state): State<AppState>,
    Requester(user_id): Requester,
    Json(body): Json<PayoutBody>,
) -> ApiResult<(StatusCode, Json<PayoutResponse>)> {
    let response = state
        .pipeline
        .orchestrator
        .process_employee_payout(PayoutRequest {
            requested_by: user_id,
            company_id: body.company_id,
            employee_id: body.employee_id,
            amount_sats: body.amount_sats,
            description: body.description,
        })
        .await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

pub async fn payment_status(
    State(state): State<AppState>,
    Requester(user_id): Requester,
    Path(payment_intent_id): Path<Uuid>,
) -> ApiResult<Json<PaymentStatus>> {
    Ok(Json(
        state
            .pipeline
            .orchestrator
            .get_payment_status(user_id, payment_intent_id)
            .await?,
    ))
}

pub async fn wallet_balance(
    State(state): State<AppState>,
    Requester(user_id): Requester,
    Query(query): Query<BalanceQuery>,
) -> ApiResult<Json<BalanceResponse>> {
    let balance_sats = state
        .pipeline
        .orchestrator
        .get_wallet_balance(user_id, query.company_id, query.wallet_type)
        .await?;
    Ok(Json(BalanceResponse {
        company_id: query.company_id,
        wallet_type: query.wallet_type,
        balance_sats,
    }))
}

pub async fn transaction_history(
    State(state): State<AppState>,
    Requester(user_id): Requester,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<WalletTransaction>>> {
    Ok(Json(
        state
            .pipeline
            .orchestrator
            .get_transaction_history(user_id, query.company_id, query.limit)
            .await?,
    ))
}

// ============================================================================
// Bank linking
// ============================================================================

pub async fn plaid_link_token(
    State(state): State<AppState>,
    Requester(user_id): Requester,
    Json(body): Json<LinkTokenBody>,
) -> ApiResult<Json<LinkToken>> {
    require_member(&state, body.company_id, user_id).await?;
    Ok(Json(state.plaid.create_link_token(user_id, body.company_id).await?))
}

pub async fn plaid_exchange(
    State(state): State<AppState>,
    Requester(user_id): Requester,
    Json(body): Json<ExchangeBody>,
) -> ApiResult<(StatusCode, Json<Vec<PlaidAccount>>)> {
    require_member(&state, body.company_id, user_id).await?;
    let accounts = state
        .plaid
        .exchange_public_token(&body.public_token, user_id, body.company_id)
        .await?;
    tracing::info!(user_id = %user_id, accounts = accounts.len(), "Bank accounts linked");
    Ok((StatusCode::CREATED, Json(accounts)))
}

pub async fn plaid_remove_account(
    State(state): State<AppState>,
    Requester(user_id): Requester,
    Path(account_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let account = state
        .pipeline
        .store
        .plaid_account(account_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("bank account {account_id}")))?;
    if account.user_id != user_id {
        return Err(PipelineError::Authorization("bank account belongs to another user".into()).into());
    }
    state.plaid.remove_account(account_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Invoicing
// ============================================================================

pub async fn create_invoice(
    State(state): State<AppState>,
    Requester(user_id): Requester,
    Json(body): Json<InvoiceBody>,
) -> ApiResult<(StatusCode, Json<InvoiceResponse>)> {
    require_member(&state, body.company_id, user_id).await?;
    let service = state.invoicing.as_ref().ok_or_else(ApiError::invoicing_disabled)?;
    if body.amount <= Decimal::ZERO {
        return Err(PipelineError::Validation("amount must be positive".into()).into());
    }
    let request = InvoiceRequest {
        amount: body.amount,
        currency: body.currency,
        description: body.description,
        order_id: body.order_id,
    };
    let invoice = service.create_invoice(&request).await?;
    tracing::info!(
        company_id = %body.company_id,
        user_id = %user_id,
        invoice_id = %invoice.id,
        "Invoice created"
    );
    let payment_url = service.payment_url(&invoice);
    Ok((
        StatusCode::CREATED,
        Json(InvoiceResponse {
            invoice,
            payment_url,
        }),
    ))
}

pub async fn invoice_status(
    State(state): State<AppState>,
    Requester(user_id): Requester,
    Path(invoice_id): Path<String>,
    Query(query): Query<InvoiceQuery>,
) -> ApiResult<Json<InvoiceStatusResponse>> {
    require_member(&state, query.company_id, user_id).await?;
    let service = state.invoicing.as_ref().ok_or_else(ApiError::invoicing_disabled)?;
    let status = service.get_invoice_status(&invoice_id).await?;
    Ok(Json(InvoiceStatusResponse {
        id: invoice_id,
        status,
    }))
}

// ============================================================================
// Webhooks
// ============================================================================

/// Inbound provider callback
pub async fn provider_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let provider = match provider.parse::<ProviderKind>() {
        Ok(ProviderKind::Plaid) | Err(_) => {
            return Err(ApiError::not_found(format!("no webhook endpoint for '{provider}'")));
        }
        Ok(kind) => kind,
    };

    let signature = headers
        .get(signature_header(provider))
        .and_then(|v| v.to_str().ok());

    state
        .pipeline
        .dispatcher
        .receive(provider, signature, &body)
        .await?;

    Ok(Json(serde_json::json!({ "received": true })))
}

// ============================================================================
// Admin
// ============================================================================

pub async fn list_webhooks(
    State(state): State<AppState>,
    _admin: Admin,
    Query(filter): Query<WebhookFilter>,
) -> ApiResult<Json<Vec<WebhookEvent>>> {
    let filter = WebhookFilter {
        limit: Some(filter.limit.unwrap_or(100).min(1000)),
        ..filter
    };
    Ok(Json(state.pipeline.dispatcher.list_events(&filter).await?))
}

pub async fn replay_webhook(
    State(state): State<AppState>,
    _admin: Admin,
    Path((provider, event_id)): Path<(String, String)>,
) -> ApiResult<Json<WebhookEvent>> {
    let provider: ProviderKind = provider
        .parse()
        .map_err(|_| ApiError::not_found(format!("unknown provider '{provider}'")))?;
    Ok(Json(
        state.pipeline.dispatcher.replay(provider, &event_id).await?,
    ))
}

pub async fn failed_jobs(
    State(state): State<AppState>,
    _admin: Admin,
    Path(lane): Path<String>,
) -> ApiResult<Json<Vec<Job>>> {
    let lane: Lane = lane.parse()?;
    Ok(Json(
        state
            .pipeline
            .queue
            .failed_jobs(lane, FAILED_JOBS_LIMIT)
            .await?,
    ))
}

pub async fn sync_wallet(
    State(state): State<AppState>,
    _admin: Admin,
    Path(wallet_id): Path<Uuid>,
) -> ApiResult<Json<BreezWallet>> {
    Ok(Json(state.pipeline.orchestrator.sync_wallet(wallet_id).await?))
}
