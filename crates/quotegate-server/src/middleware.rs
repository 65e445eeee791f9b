use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, FromRequestParts, State},
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use uuid::Uuid;

use quotegate_core::{ClientKey, RateLimitMeta};

use crate::config::RateLimitConfig;
use crate::server::AppState;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const API_KEY_QUERY: &str = "api_key";

// =============================================================================
// Request id
// =============================================================================

/// Preserve an incoming `x-request-id` or generate one, and echo it back.
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let header_name = HeaderName::from_static("x-request-id");

    let req_id_value = req
        .headers()
        .get(&header_name)
        .cloned()
        .or_else(|| HeaderValue::from_str(&Uuid::new_v4().to_string()).ok());

    let Some(req_id_value) = req_id_value else {
        return next.run(req).await;
    };

    // Downstream access logging reads it from extensions
    req.extensions_mut().insert(req_id_value.clone());

    let mut res = next.run(req).await;
    res.headers_mut().insert(header_name, req_id_value);
    res
}

// =============================================================================
// Client identity
// =============================================================================

/// Who a request is charged to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub key: ClientKey,
    pub is_admin: bool,
}

impl ClientIdentity {
    pub fn from_parts(parts: &Parts, config: &RateLimitConfig) -> Self {
        let api_key = api_key(&parts.headers, parts.uri.query());
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        let ip = if config.trust_proxy_headers {
            forwarded_ip(&parts.headers).unwrap_or(peer)
        } else {
            peer
        };

        let admin_key = config.admin_key.as_deref();
        let is_admin = matches!((api_key.as_deref(), admin_key), (Some(k), Some(admin)) if k == admin);
        Self {
            key: ClientKey::resolve(api_key.as_deref(), ip),
            is_admin,
        }
    }
}

impl FromRequestParts<AppState> for ClientIdentity {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(parts, &state.config.rate_limit))
    }
}

/// API key from the `x-api-key` header, else the `api_key` query parameter.
fn api_key(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    if let Some(key) = headers
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
    {
        return Some(key.to_string());
    }
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(name, value)| name == API_KEY_QUERY && !value.is_empty())
        .map(|(_, value)| value.into_owned())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    // X-Forwarded-For may hold a chain; the first hop is the client
    let forwarded_for = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|first| first.trim().parse().ok());

    forwarded_for.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|h| h.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    })
}

// =============================================================================
// Rate limiting
// =============================================================================

/// Refused admission: 429 with quota metadata and `retry-after`.
#[derive(Debug, Clone)]
pub struct RateLimitRejection {
    pub meta: RateLimitMeta,
}

impl IntoResponse for RateLimitRejection {
    fn into_response(self) -> Response {
        let retry_after = self.meta.reset_in_secs.unwrap_or(1).max(1);
        let body = Json(json!({
            "error": "rate_limit_exceeded",
            "message": "Daily request limit exceeded",
            "rate_limit": self.meta,
        }));
        let mut res = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
        res.headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        apply_rate_limit_headers(res.headers_mut(), &self.meta);
        res
    }
}

pub fn apply_rate_limit_headers(headers: &mut HeaderMap, meta: &RateLimitMeta) {
    let fields = [
        ("x-ratelimit-limit", meta.limit.map(u64::from)),
        ("x-ratelimit-remaining", meta.remaining.map(u64::from)),
        ("x-ratelimit-reset", meta.reset_in_secs),
    ];
    for (name, value) in fields {
        if let Some(value) = value {
            headers.insert(HeaderName::from_static(name), HeaderValue::from(value));
        }
    }
}

/// Admit the request against the daily quota before any operation runs.
pub async fn rate_limit(
    State(state): State<AppState>,
    identity: ClientIdentity,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !state.config.rate_limit.enabled {
        return next.run(req).await;
    }

    let admission = state.limiter.admit(&identity.key, identity.is_admin);
    if !admission.allowed {
        tracing::debug!(client = %identity.key, path = %req.uri().path(), "request refused");
        return RateLimitRejection {
            meta: admission.meta,
        }
        .into_response();
    }

    tracing::debug!(client = %identity.key, count = ?admission.count, "request admitted");
    let mut res = next.run(req).await;
    apply_rate_limit_headers(res.headers_mut(), &admission.meta);
    res
}
