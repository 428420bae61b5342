use std::sync::Arc;

use axum::{
    Router,
    extract::{Json, State},
    http::{HeaderMap, StatusCode, header},
    routing::post,
};
use config::AdminConfig;
use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{Instrument, error, info};
use transfer_sync::{FailedRange, IndexRequest, Indexer, IndexerError, ScanRange};

use crate::api::{HandlerResult, Success, failure, parse_address};

#[derive(Clone)]
struct AdminState {
    token: String,
    indexer: Arc<Indexer>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct IndexTransfersRequest {
    address: Option<String>,
    from_block: Option<u64>,
    to_block: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IndexTransfersResponse {
    message: &'static str,
    address: String,
    from_block: u64,
    to_block: u64,
    indexed_count: usize,
    scanned_ranges: Vec<ScanRange>,
    failed_ranges: Vec<FailedRange>,
}

pub async fn run(cfg: AdminConfig, indexer: Arc<Indexer>) -> Result<()> {
    let state = AdminState {
        token: cfg.token,
        indexer,
    };
    let app = Router::new()
        .route("/admin/index-transfers", post(index_transfers))
        .with_state(state);
    let listener = TcpListener::bind(&cfg.listen_addr)
        .await
        .wrap_err("bind admin listener")?;
    info!(addr = %cfg.listen_addr, "admin server listening");
    async move { axum::serve(listener, app).await }
        .instrument(tracing::info_span!("http", addr = %cfg.listen_addr))
        .await
        .wrap_err("admin server failed")?;
    Ok(())
}

async fn index_transfers(
    State(state): State<AdminState>,
    headers: HeaderMap,
    payload: Option<Json<IndexTransfersRequest>>,
) -> HandlerResult<IndexTransfersResponse> {
    if !is_authorized(&headers, &state.token) {
        return Err(failure(
            StatusCode::UNAUTHORIZED,
            "Unauthorized",
            "missing or invalid bearer token",
        ));
    }
    let payload = payload.map(|Json(payload)| payload).unwrap_or_default();
    let address = payload.address.as_deref().map(parse_address).transpose()?;

    let report = state
        .indexer
        .index_range(IndexRequest {
            from_block: payload.from_block,
            to_block: payload.to_block,
            address,
        })
        .await
        .map_err(|err| {
            error!(?err, "admin indexing run failed");
            let status = match &err {
                IndexerError::InvalidRange { .. } => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            failure(status, "Failed to index transfers", err)
        })?;

    Ok(Success::new(IndexTransfersResponse {
        message: "Transfer indexing completed",
        address: local_db::address_key(&report.address),
        from_block: report.range.from_block,
        to_block: report.range.to_block,
        indexed_count: report.indexed_count(),
        scanned_ranges: report.scanned,
        failed_ranges: report.failed,
    }))
}

fn is_authorized(headers: &HeaderMap, token: &str) -> bool {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return false;
    };
    let Ok(value) = value.to_str() else {
        return false;
    };
    value
        .strip_prefix("Bearer ")
        .is_some_and(|provided| provided == token)
}
