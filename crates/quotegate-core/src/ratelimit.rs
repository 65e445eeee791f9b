//! In-memory admission control.
//!
//! Two counter families live here:
//!
//! - [`RateLimiter`]: per-client daily quota. An entry is created on the first
//!   call, incremented on each admitted call and lazily discarded on the next
//!   access after its window expired.
//! - [`HealthCheckGate`]: at most one grant per client per interval for the
//!   expensive health-check endpoint.
//!
//! Both bypass unconditionally for administrators. State is process-local and
//! lost on restart; the limiter is best-effort, not a durable quota system.
//!
//! ```text
//! NoEntry ──► Active(count < limit) ──► Active(count == limit, refusing)
//!    ▲                                              │
//!    └────────────── window expiry (on access) ─────┘
//! ```

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

/// Identity a quota is charged to.
///
/// A presented API key always wins over the connection address, so clients
/// sharing a NAT but holding distinct keys are counted separately.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ClientKey {
    ApiKey(String),
    Ip(IpAddr),
}

impl ClientKey {
    pub fn resolve(api_key: Option<&str>, ip: IpAddr) -> Self {
        match api_key.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => Self::ApiKey(key.to_string()),
            None => Self::Ip(ip),
        }
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Never log a full key
            Self::ApiKey(key) => {
                let visible: String = key.chars().take(4).collect();
                write!(f, "key:{visible}…")
            }
            Self::Ip(ip) => write!(f, "ip:{ip}"),
        }
    }
}

/// Quota metadata attached to responses at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_in_secs: Option<u64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub admin: bool,
}

impl RateLimitMeta {
    fn admin() -> Self {
        Self {
            limit: None,
            remaining: None,
            reset_in_secs: None,
            admin: true,
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    /// Counter value after the check; `None` for administrators.
    pub count: Option<u32>,
    pub meta: RateLimitMeta,
}

#[derive(Debug, Clone, Copy)]
struct RateLimitEntry {
    count: u32,
    window_expires_at: Instant,
}

/// Per-client fixed-window request counter.
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    entries: Mutex<HashMap<ClientKey, RateLimitEntry>>,
}

impl RateLimiter {
    pub const DEFAULT_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

    pub fn new(limit: u32) -> Self {
        Self::with_window(limit, Self::DEFAULT_WINDOW)
    }

    pub fn with_window(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Admit or refuse one call for `key`.
    ///
    /// Expiry check, read and increment happen under one lock that is never
    /// held across an await point.
    pub fn admit(&self, key: &ClientKey, is_admin: bool) -> Admission {
        if is_admin {
            return Admission {
                allowed: true,
                count: None,
                meta: RateLimitMeta::admin(),
            };
        }

        let now = Instant::now();
        let mut entries = self.entries.lock();

        if entries
            .get(key)
            .is_some_and(|entry| entry.window_expires_at <= now)
        {
            tracing::debug!(client = %key, "rate limit window expired, resetting");
            entries.remove(key);
        }

        let entry = entries.entry(key.clone()).or_insert(RateLimitEntry {
            count: 0,
            window_expires_at: now + self.window,
        });

        let allowed = entry.count < self.limit;
        if allowed {
            entry.count += 1;
        }

        let reset_in = entry.window_expires_at.saturating_duration_since(now);
        let admission = Admission {
            allowed,
            count: Some(entry.count),
            meta: RateLimitMeta {
                limit: Some(self.limit),
                remaining: Some(self.limit.saturating_sub(entry.count)),
                reset_in_secs: Some(reset_in.as_secs()),
                admin: false,
            },
        };
        drop(entries);

        if !allowed {
            tracing::info!(
                client = %key,
                limit = self.limit,
                reset_in_secs = reset_in.as_secs(),
                "rate limit exceeded"
            );
        }
        admission
    }

    /// Current counter for `key`, ignoring expiry.
    pub fn count(&self, key: &ClientKey) -> Option<u32> {
        self.entries.lock().get(key).map(|entry| entry.count)
    }

    pub fn tracked_clients(&self) -> usize {
        self.entries.lock().len()
    }
}

/// One grant per client per interval for the health-check path.
pub struct HealthCheckGate {
    interval: Duration,
    next_eligible: Mutex<HashMap<ClientKey, Instant>>,
}

impl HealthCheckGate {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30 * 60);

    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_eligible: Mutex::new(HashMap::new()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn admit(&self, key: &ClientKey, is_admin: bool) -> bool {
        if is_admin {
            return true;
        }

        let now = Instant::now();
        let mut next_eligible = self.next_eligible.lock();

        if next_eligible.get(key).is_some_and(|at| *at <= now) {
            next_eligible.remove(key);
        }

        if next_eligible.contains_key(key) {
            return false;
        }
        next_eligible.insert(key.clone(), now + self.interval);
        true
    }

    pub fn tracked_clients(&self) -> usize {
        self.next_eligible.lock().len()
    }
}

impl Default for HealthCheckGate {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTERVAL)
    }
}
