//! API route handlers.
//!
//! All endpoints return JSON. State is the shared `Arc<CashoutService>`.
//! There is no session layer here: callers identify themselves with a
//! `user_id` field, the way an internal service behind a gateway does.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::CashoutError;
use crate::orchestrator::{CashoutService, HistoryFilter, NewCashout};
use crate::types::{
    CashoutRequest, CashoutStatus, ChannelHealth, FeeQuote, HistoryStats, PaymentChannelAccount,
    PayoutMethod, SpeedTier, UserCashoutProfile, VipTier,
};

pub type AppState = Arc<CashoutService>;

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Wraps the core error so each variant maps to one HTTP status and a
/// stable machine-readable code.
pub struct ApiError(CashoutError);

impl From<CashoutError> for ApiError {
    fn from(e: CashoutError) -> Self {
        Self(e)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CashoutError::Validation(_) => StatusCode::BAD_REQUEST,
            CashoutError::QuotaExceeded { .. } | CashoutError::InsufficientFunds { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            CashoutError::Unauthorized => StatusCode::FORBIDDEN,
            CashoutError::NotFound(_) => StatusCode::NOT_FOUND,
            CashoutError::InvalidTransition { .. } => StatusCode::CONFLICT,
            CashoutError::NoProvider { .. } => StatusCode::SERVICE_UNAVAILABLE,
            CashoutError::Channel { .. } => StatusCode::BAD_GATEWAY,
            CashoutError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            code: self.0.code(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Request / response payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateCashoutBody {
    pub user_id: String,
    pub amount: Decimal,
    pub method: PayoutMethod,
    pub speed_tier: SpeedTier,
    pub account_id: String,
}

#[derive(Debug, Deserialize)]
pub struct UserParam {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct QuoteParams {
    pub user_id: String,
    pub amount: Decimal,
    pub method: PayoutMethod,
    pub speed_tier: SpeedTier,
}

#[derive(Debug, Deserialize)]
pub struct MethodsParams {
    pub amount: Decimal,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub user_id: String,
    pub status: Option<CashoutStatus>,
    pub method: Option<PayoutMethod>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub requests: Vec<CashoutRequest>,
    pub stats: HistoryStats,
}

#[derive(Debug, Deserialize)]
pub struct AddAccountBody {
    pub user_id: String,
    pub method: PayoutMethod,
    pub destination: String,
    pub label: String,
}

#[derive(Debug, Deserialize)]
pub struct ResolveBody {
    pub approve: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReverseBody {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct TierBody {
    pub user_id: String,
    pub tier: VipTier,
}

// ---------------------------------------------------------------------------
// Cashout handlers
// ---------------------------------------------------------------------------

/// POST /api/cashouts
pub async fn create_cashout(
    State(service): State<AppState>,
    Json(body): Json<CreateCashoutBody>,
) -> ApiResult<(StatusCode, Json<CashoutRequest>)> {
    let request = service
        .initiate(
            &body.user_id,
            NewCashout {
                amount: body.amount,
                method: body.method,
                speed_tier: body.speed_tier,
                account_id: body.account_id,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(request)))
}

/// GET /api/cashouts/:id
pub async fn get_cashout(
    State(service): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<UserParam>,
) -> ApiResult<Json<CashoutRequest>> {
    Ok(Json(service.get_cashout(&id, &params.user_id).await?))
}

/// POST /api/cashouts/:id/cancel
pub async fn cancel_cashout(
    State(service): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UserParam>,
) -> ApiResult<Json<CashoutRequest>> {
    Ok(Json(service.cancel(&id, &body.user_id).await?))
}

/// POST /api/cashouts/:id/resolve — reviewer decision on a held request.
pub async fn resolve_cashout(
    State(service): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ResolveBody>,
) -> ApiResult<Json<CashoutRequest>> {
    Ok(Json(service.resolve_hold(&id, body.approve, body.reason).await?))
}

/// POST /api/cashouts/:id/reverse
pub async fn reverse_cashout(
    State(service): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ReverseBody>,
) -> ApiResult<Json<CashoutRequest>> {
    Ok(Json(service.reverse(&id, &body.reason).await?))
}

/// GET /api/cashouts
pub async fn list_cashouts(
    State(service): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<HistoryResponse>> {
    let filter = HistoryFilter {
        status: params.status,
        method: params.method,
        from: params.from,
        to: params.to,
        min_amount: params.min_amount,
        max_amount: params.max_amount,
    };
    let (requests, stats) = service.history(&params.user_id, &filter).await?;
    Ok(Json(HistoryResponse { requests, stats }))
}

// ---------------------------------------------------------------------------
// Quote and routing handlers
// ---------------------------------------------------------------------------

/// GET /api/quote
pub async fn get_quote(
    State(service): State<AppState>,
    Query(params): Query<QuoteParams>,
) -> ApiResult<Json<FeeQuote>> {
    let quote = service
        .quote(&params.user_id, params.amount, params.method, params.speed_tier)
        .await?;
    Ok(Json(quote))
}

/// GET /api/methods — methods with at least one channel covering `amount`.
pub async fn get_methods(
    State(service): State<AppState>,
    Query(params): Query<MethodsParams>,
) -> Json<Vec<PayoutMethod>> {
    Json(service.available_methods(params.amount).await)
}

/// GET /api/channels
pub async fn get_channels(State(service): State<AppState>) -> Json<Vec<ChannelHealth>> {
    Json(service.channel_health().await)
}

// ---------------------------------------------------------------------------
// Account and profile handlers
// ---------------------------------------------------------------------------

/// POST /api/accounts
pub async fn add_account(
    State(service): State<AppState>,
    Json(body): Json<AddAccountBody>,
) -> ApiResult<(StatusCode, Json<PaymentChannelAccount>)> {
    let account = service
        .add_account(&body.user_id, body.method, &body.destination, &body.label)
        .await?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// GET /api/accounts
pub async fn list_accounts(
    State(service): State<AppState>,
    Query(params): Query<UserParam>,
) -> ApiResult<Json<Vec<PaymentChannelAccount>>> {
    Ok(Json(service.list_accounts(&params.user_id).await?))
}

/// DELETE /api/accounts/:id
pub async fn remove_account(
    State(service): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<UserParam>,
) -> ApiResult<StatusCode> {
    service.remove_account(&params.user_id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/tier
pub async fn set_tier(
    State(service): State<AppState>,
    Json(body): Json<TierBody>,
) -> ApiResult<Json<UserCashoutProfile>> {
    Ok(Json(service.upgrade_tier(&body.user_id, body.tier).await?))
}

/// GET /api/profile
pub async fn get_profile(
    State(service): State<AppState>,
    Query(params): Query<UserParam>,
) -> ApiResult<Json<UserCashoutProfile>> {
    Ok(Json(service.profile(&params.user_id).await?))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
