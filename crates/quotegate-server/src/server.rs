use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{Router, middleware, routing::get};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

use quotegate_cache::{CacheManager, KvStore, connect_store};
use quotegate_core::{HealthCheckGate, MarketClock, RateLimiter};

use crate::operations::Operations;
use crate::upstream::UpstreamClient;
use crate::{config::AppConfig, handlers, middleware as app_middleware, ws};

/// Shared state constructed once at startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub cache: Arc<CacheManager>,
    pub clock: Arc<dyn MarketClock>,
    pub limiter: Arc<RateLimiter>,
    pub health_gate: Arc<HealthCheckGate>,
    pub upstream: UpstreamClient,
    pub operations: Arc<Operations>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn KvStore>,
        clock: Arc<dyn MarketClock>,
        upstream: UpstreamClient,
        operations: Operations,
    ) -> Self {
        let cache = CacheManager::new(store, Arc::clone(&clock), config.cache.key_prefix.clone());
        let limiter = RateLimiter::with_window(config.rate_limit.daily_limit, config.rate_limit.window());
        let health_gate = HealthCheckGate::new(config.rate_limit.health_check_interval());
        Self {
            config: Arc::new(config),
            cache: Arc::new(cache),
            clock,
            limiter: Arc::new(limiter),
            health_gate: Arc::new(health_gate),
            upstream,
            operations: Arc::new(operations),
        }
    }

    /// Connect the cache store and wire the upstream operations.
    pub async fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let clock = config
            .market
            .clock()
            .map_err(|e| anyhow::anyhow!(e))
            .context("invalid market configuration")?;
        let upstream = UpstreamClient::new(&config.upstream).context("failed to build upstream client")?;
        let operations = Operations::upstream(&config.operations, &upstream);
        let store = connect_store(&config.redis).await;
        tracing::info!(
            store = store.mode(),
            daily_limit = config.rate_limit.daily_limit,
            rate_limit_enabled = config.rate_limit.enabled,
            "application state initialized"
        );
        Ok(Self::new(config, store, clock, upstream, operations))
    }
}

pub fn build_app(state: AppState) -> Router {
    let body_limit = state.config.server.body_limit_bytes;

    // Routes charged against the daily quota
    let metered = Router::new()
        .route("/quote/{symbol}", get(handlers::quote))
        .route("/history/{symbol}", get(handlers::history))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::rate_limit,
        ));

    Router::new()
        // Health and info endpoints
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/readyz", get(handlers::readyz))
        .route("/health/upstream", get(handlers::upstream_health))
        // Admission is checked inside the handler so refusal can close the socket
        .route("/ws/{channel}", get(ws::ws_handler))
        .merge(metered)
        .layer(middleware::from_fn(app_middleware::request_id))
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .extensions()
                        .get::<axum::http::HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: std::time::Duration, span: &tracing::Span| {
                        span.record("http.status_code", tracing::field::display(res.status().as_u16()));
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

pub struct QuotegateServer {
    addr: SocketAddr,
    app: Router,
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    pub async fn build(self) -> anyhow::Result<QuotegateServer> {
        let state = AppState::from_config(self.config).await?;
        Ok(QuotegateServer {
            addr: self.addr,
            app: build_app(state),
        })
    }
}

impl QuotegateServer {
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("failed to bind {}", self.addr))?;
        tracing::info!("listening on {}", self.addr);
        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;
        Ok(())
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
