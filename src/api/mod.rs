//! HTTP surface for cycles, bids and the settlement triggers
//!
//! Identity arrives in `x-member-id` / `x-admin-id` headers set by the
//! authentication layer in front of this service.

#[cfg(test)]
mod tests;

use crate::completion::{CompletionStatus, CompletionWatcher};
use crate::cycles::CycleOpener;
use crate::error::{ChitError, ErrorKind};
use crate::ledger::{BidBoard, BidLedger, BidReceipt};
use crate::scanner::{ExpiryScanner, RequestCheck};
use crate::settlement::{SettlementEngine, SettlementTrigger};
use crate::types::{Cycle, CycleId, GroupId, MemberId, Money, SettlementSummary};
use axum::{
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const MEMBER_HEADER: &str = "x-member-id";
pub const ADMIN_HEADER: &str = "x-admin-id";

/// Shared handler state
pub struct AppState {
    pub opener: CycleOpener,
    pub ledger: BidLedger,
    pub engine: Arc<SettlementEngine>,
    pub scanner: Arc<ExpiryScanner>,
    pub completion: CompletionWatcher,
    pub request_check: Option<Arc<RequestCheck>>,
}

#[derive(Debug, Deserialize)]
pub struct OpenCycleRequest {
    pub bidding_start: DateTime<Utc>,
    pub bidding_end: DateTime<Utc>,
    /// Announce the cycle to members
    #[serde(default = "default_notify")]
    pub notify: bool,
}

fn default_notify() -> bool {
    true
}

/// Amount is converted in the handler so precision errors get a JSON body
#[derive(Debug, Deserialize)]
pub struct PlaceBidRequest {
    pub amount: Decimal,
}

#[derive(Debug, Serialize)]
pub struct CloseExpiredResponse {
    pub expired: usize,
    pub closed: usize,
    pub already_settled: usize,
    pub failed: usize,
    pub message: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(&'static str),
    Engine(ChitError),
}

impl From<ChitError> for ApiError {
    fn from(err: ChitError) -> Self {
        ApiError::Engine(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Engine(err) => match err {
                ChitError::AlreadySettled(_) => StatusCode::CONFLICT,
                ChitError::NotAMember { .. } | ChitError::AlreadyWon { .. } => {
                    StatusCode::FORBIDDEN
                }
                _ => match err.kind() {
                    ErrorKind::NotFound => StatusCode::NOT_FOUND,
                    ErrorKind::InvalidState | ErrorKind::Validation => StatusCode::BAD_REQUEST,
                    ErrorKind::NoEligibleWinner => StatusCode::UNPROCESSABLE_ENTITY,
                    ErrorKind::Persistence | ErrorKind::Notification | ErrorKind::Config => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                },
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = match &self {
            ApiError::Unauthorized(msg) => msg.to_string(),
            ApiError::Engine(err) if status == StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!("Request failed: {}", err);
                "Internal error".to_string()
            }
            ApiError::Engine(err) => err.to_string(),
        };
        (status, Json(ErrorBody { error })).into_response()
    }
}

fn header_id(headers: &HeaderMap, name: &str) -> Option<MemberId> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn require_admin(headers: &HeaderMap) -> Result<MemberId, ApiError> {
    header_id(headers, ADMIN_HEADER).ok_or(ApiError::Unauthorized("Admin identity required"))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "timestamp": Utc::now() }))
}

async fn open_cycle(
    State(state): State<Arc<AppState>>,
    Path(group_id): Path<GroupId>,
    headers: HeaderMap,
    Json(body): Json<OpenCycleRequest>,
) -> Result<(StatusCode, Json<Cycle>), ApiError> {
    let admin_id = require_admin(&headers)?;
    let cycle = state
        .opener
        .open_cycle(group_id, body.bidding_start, body.bidding_end, body.notify)
        .await?;
    tracing::info!(cycle_id = cycle.id, group_id, admin_id, "Cycle opened via API");
    Ok((StatusCode::CREATED, Json(cycle)))
}

async fn place_bid(
    State(state): State<Arc<AppState>>,
    Path(cycle_id): Path<CycleId>,
    headers: HeaderMap,
    Json(body): Json<PlaceBidRequest>,
) -> Result<Json<BidReceipt>, ApiError> {
    let member_id = header_id(&headers, MEMBER_HEADER)
        .ok_or(ApiError::Unauthorized("Member identity required"))?;
    let amount = Money::from_decimal(body.amount)?;
    let receipt = state.ledger.place_bid(cycle_id, member_id, amount).await?;
    Ok(Json(receipt))
}

async fn get_bid_board(
    State(state): State<Arc<AppState>>,
    Path(cycle_id): Path<CycleId>,
) -> Result<Json<BidBoard>, ApiError> {
    Ok(Json(state.ledger.bid_board(cycle_id).await?))
}

async fn settle_cycle(
    State(state): State<Arc<AppState>>,
    Path(cycle_id): Path<CycleId>,
    headers: HeaderMap,
) -> Result<Json<SettlementSummary>, ApiError> {
    let admin_id = require_admin(&headers)?;
    let summary = state
        .engine
        .settle(cycle_id, SettlementTrigger::Admin { admin_id })
        .await?;
    Ok(Json(summary))
}

async fn close_expired(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<CloseExpiredResponse>, ApiError> {
    let admin_id = require_admin(&headers)?;
    let report = state
        .scanner
        .run_once(Utc::now(), SettlementTrigger::Admin { admin_id })
        .await?;

    let closed = report.settled_count();
    let message = if report.expired == 0 {
        "No expired cycles to close".to_string()
    } else {
        format!("Closed {} cycle(s)", closed)
    };
    Ok(Json(CloseExpiredResponse {
        expired: report.expired,
        closed,
        already_settled: report.already_settled,
        failed: report.failed.len(),
        message,
    }))
}

async fn approve_payout(
    State(state): State<Arc<AppState>>,
    Path(cycle_id): Path<CycleId>,
    headers: HeaderMap,
) -> Result<Json<CompletionStatus>, ApiError> {
    require_admin(&headers)?;
    Ok(Json(state.completion.approve_payout(cycle_id).await?))
}

/// Runs the rate-limited expiry check in the background, then the request
async fn check_expired_cycles(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(check) = &state.request_check {
        check.on_request();
    }
    next.run(request).await
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/groups/{group_id}/cycles", post(open_cycle))
        .route("/cycles/close-expired", post(close_expired))
        .route("/cycles/{cycle_id}/bids", post(place_bid))
        .route("/cycles/{cycle_id}/board", get(get_bid_board))
        .route("/cycles/{cycle_id}/settle", post(settle_cycle))
        .route("/cycles/{cycle_id}/approve-payout", post(approve_payout))
        .layer(middleware::from_fn_with_state(state.clone(), check_expired_cycles))
        .with_state(state)
}

pub async fn start_server(
    state: Arc<AppState>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Settlement API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
