use std::sync::Arc;

use alloy::primitives::Address;
use axum::{
    Router,
    extract::{Json, Path, Query, State, rejection::QueryRejection},
    http::StatusCode,
    routing::get,
};
use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{Instrument, error, info};
use transfer_sync::query::{DEFAULT_PAGE, DEFAULT_PAGE_SIZE};
use transfer_sync::{BalanceService, BalanceView, TransferQueryService, TransferView};

const INVALID_ADDRESS: &str = "Invalid Ethereum address format";
const INVALID_PAGINATION: &str = "Invalid pagination parameters";

#[derive(Clone)]
struct ApiState {
    transfers: Arc<TransferQueryService>,
    balances: Arc<BalanceService>,
}

#[derive(Serialize)]
pub(crate) struct Success<T> {
    success: bool,
    data: T,
}

impl<T> Success<T> {
    pub(crate) fn new(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Failure {
    success: bool,
    message: &'static str,
    error: String,
}

pub(crate) type ApiError = (StatusCode, Json<Failure>);
pub(crate) type HandlerResult<T> = std::result::Result<Json<Success<T>>, ApiError>;

pub(crate) fn failure(status: StatusCode, message: &'static str, error: impl ToString) -> ApiError {
    (
        status,
        Json(Failure {
            success: false,
            message,
            error: error.to_string(),
        }),
    )
}

/// Accepts `0x` followed by exactly 40 hex digits, in any case.
pub(crate) fn parse_address(raw: &str) -> std::result::Result<Address, ApiError> {
    let invalid = || failure(StatusCode::BAD_REQUEST, INVALID_ADDRESS, raw);
    let digits = raw.strip_prefix("0x").ok_or_else(invalid)?;
    if digits.len() != 40 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    raw.parse().map_err(|_| invalid())
}

#[derive(Debug, Deserialize)]
struct PageParams {
    page: Option<u64>,
    limit: Option<u64>,
}

impl PageParams {
    fn from_query(
        query: std::result::Result<Query<Self>, QueryRejection>,
    ) -> std::result::Result<Self, ApiError> {
        query
            .map(|Query(params)| params)
            .map_err(|rejection| {
                failure(
                    StatusCode::BAD_REQUEST,
                    INVALID_PAGINATION,
                    rejection.body_text(),
                )
            })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
    page: u64,
    limit: u64,
    total: u64,
    total_pages: u64,
}

#[derive(Serialize)]
struct TransfersData {
    address: String,
    transfers: Vec<TransferView>,
    pagination: Pagination,
}

pub async fn run(
    listen_addr: String,
    transfers: Arc<TransferQueryService>,
    balances: Arc<BalanceService>,
) -> Result<()> {
    let state = ApiState {
        transfers,
        balances,
    };
    let app = Router::new()
        .route("/api/v1/transfers/{address}", get(get_transfers))
        .route("/api/v1/balance/native/{address}", get(get_native_balance))
        .route("/api/v1/balance/token/{address}", get(get_token_balance))
        .with_state(state);
    let listener = TcpListener::bind(&listen_addr)
        .await
        .wrap_err("bind api listener")?;
    info!(addr = %listen_addr, "api server listening");
    async move { axum::serve(listener, app).await }
        .instrument(tracing::info_span!("http", addr = %listen_addr))
        .await
        .wrap_err("api server failed")?;
    Ok(())
}

async fn get_transfers(
    State(state): State<ApiState>,
    Path(address): Path<String>,
    params: std::result::Result<Query<PageParams>, QueryRejection>,
) -> HandlerResult<TransfersData> {
    let address = parse_address(&address)?;
    let params = PageParams::from_query(params)?;
    let history = state
        .transfers
        .get_transfers(
            address,
            params.page.unwrap_or(DEFAULT_PAGE),
            params.limit.unwrap_or(DEFAULT_PAGE_SIZE),
        )
        .await
        .map_err(|err| {
            error!(?err, %address, "failed to fetch transfer history");
            failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to fetch transfer history",
                err,
            )
        })?;
    Ok(Success::new(TransfersData {
        address: local_db::address_key(&address),
        transfers: history.transfers,
        pagination: Pagination {
            page: history.page,
            limit: history.limit,
            total: history.total,
            total_pages: history.total_pages,
        },
    }))
}

async fn get_native_balance(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> HandlerResult<BalanceView> {
    let address = parse_address(&address)?;
    let balance = state.balances.native_balance(address).await.map_err(|err| {
        error!(?err, %address, "failed to fetch native balance");
        failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to fetch native balance",
            err,
        )
    })?;
    Ok(Success::new(balance))
}

async fn get_token_balance(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> HandlerResult<BalanceView> {
    let address = parse_address(&address)?;
    let balance = state.balances.token_balance(address).await.map_err(|err| {
        error!(?err, %address, "failed to fetch token balance");
        failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to fetch token balance",
            err,
        )
    })?;
    Ok(Success::new(balance))
}
