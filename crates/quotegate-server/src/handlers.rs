use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::ApiError;
use crate::middleware::ClientIdentity;
use crate::operations::{HistoryArgs, QuoteArgs};
use crate::server::AppState;
use crate::upstream::{Candle, Quote};

#[derive(Serialize)]
pub struct HealthResponse<'a> {
    status: &'a str,
}

pub async fn root() -> impl IntoResponse {
    let body = json!({
        "service": "Quotegate",
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    });
    (StatusCode::OK, Json(body))
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}

pub async fn readyz() -> impl IntoResponse {
    (StatusCode::OK, Json(HealthResponse { status: "ready" }))
}

/// Deep health check: store round trip plus upstream reachability.
///
/// Each client gets one run per configured interval.
pub async fn upstream_health(
    State(state): State<AppState>,
    identity: ClientIdentity,
) -> Result<impl IntoResponse, ApiError> {
    if !state.health_gate.admit(&identity.key, identity.is_admin) {
        tracing::debug!(client = %identity.key, "health check throttled");
        return Err(ApiError::TooManyRequests {
            message: "Health check already performed recently".into(),
            retry_after_secs: state.health_gate.interval().as_secs(),
        });
    }

    let store = state.cache.store();
    let store_ok = state.cache.ping().await.is_ok();
    let (screener_ok, page_ok) = state.upstream.probe().await;

    let healthy = store_ok && (screener_ok || page_ok);
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    tracing::info!(store_ok, screener_ok, page_ok, "upstream health checked");

    Ok((
        status,
        Json(json!({
            "status": if healthy { "ok" } else { "degraded" },
            "store": { "mode": store.mode(), "ok": store_ok },
            "upstream": { "screener": screener_ok, "page": page_ok },
            "market_open": state.clock.is_open(),
        })),
    ))
}

pub async fn quote(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<Quote>, ApiError> {
    let args = QuoteArgs::parse(&symbol)?;
    let quote = state.operations.quote.invoke(&state.cache, args).await?;
    Ok(Json(quote))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub interval: Option<String>,
    pub range: Option<String>,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    symbol: String,
    interval: String,
    range: String,
    candles: Vec<Candle>,
}

pub async fn history(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let args = HistoryArgs::parse(&symbol, query.interval.as_deref(), query.range.as_deref())?;
    let candles = state
        .operations
        .history
        .invoke(&state.cache, args.clone())
        .await?;
    Ok(Json(HistoryResponse {
        symbol: args.symbol,
        interval: args.interval,
        range: args.range,
        candles,
    }))
}
