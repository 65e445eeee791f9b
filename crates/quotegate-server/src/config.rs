use quotegate_cache::{RedisConfig, TtlPolicy};
use quotegate_core::{MarketClock, SessionClock};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use time::macros::format_description;
use time::{Time, UtcOffset, Weekday};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Redis configuration
    #[serde(default)]
    pub redis: RedisConfig,
    /// Result cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Exchange session used to pick cache TTLs
    #[serde(default)]
    pub market: MarketConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Per-operation retry and TTL settings
    #[serde(default)]
    pub operations: OperationsConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        if self.redis.enabled && self.redis.pool_size == 0 {
            return Err("redis.pool_size must be > 0".into());
        }
        if self.cache.key_prefix.is_empty() || self.cache.key_prefix.contains(':') {
            return Err("cache.key_prefix must be non-empty and must not contain ':'".into());
        }
        // Rate limit validation
        if self.rate_limit.enabled {
            if self.rate_limit.daily_limit == 0 {
                return Err("rate_limit.daily_limit must be > 0".into());
            }
            if self.rate_limit.window_secs == 0 {
                return Err("rate_limit.window_secs must be > 0".into());
            }
        }
        if matches!(self.rate_limit.admin_key.as_deref(), Some("")) {
            return Err("rate_limit.admin_key must not be empty when set".into());
        }
        self.market.session()?;
        // Upstream validation
        for (name, url) in [
            ("upstream.screener_url", &self.upstream.screener_url),
            ("upstream.page_url", &self.upstream.page_url),
        ] {
            url::Url::parse(url).map_err(|e| format!("{name} is not a valid URL: {e}"))?;
        }
        if self.upstream.timeout_ms == 0 {
            return Err("upstream.timeout_ms must be > 0".into());
        }
        for (name, op) in [
            ("quote", &self.operations.quote),
            ("history", &self.operations.history),
        ] {
            if op.base_ttl_secs == 0 || op.closed_ttl_secs == 0 {
                return Err(format!("operations.{name} TTLs must be > 0"));
            }
            if op.retries > MAX_RETRIES {
                return Err(format!("operations.{name}.retries must be <= {MAX_RETRIES}"));
            }
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_body_limit() -> usize {
    64 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// First segment of every cache key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_key_prefix() -> String {
    "quotegate".into()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Requests admitted per client per window
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Minimum spacing between deep health checks per client
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    /// API key that bypasses all admission checks
    #[serde(default)]
    pub admin_key: Option<String>,
    /// Take the client IP from `X-Forwarded-For` / `X-Real-IP`. Disable when
    /// clients connect directly, or keyless callers can pick their own IP.
    #[serde(default = "default_true")]
    pub trust_proxy_headers: bool,
}

fn default_true() -> bool {
    true
}
fn default_daily_limit() -> u32 {
    1000
}
fn default_window_secs() -> u64 {
    24 * 60 * 60
}
fn default_health_check_interval_secs() -> u64 {
    30 * 60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            daily_limit: default_daily_limit(),
            window_secs: default_window_secs(),
            health_check_interval_secs: default_health_check_interval_secs(),
            admin_key: None,
            trust_proxy_headers: true,
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}

/// Session hours of the reference exchange.
///
/// Times are `HH:MM` in the exchange's local offset. `force_open` pins the
/// market status, which is useful for deployments that track a single
/// freshness regime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i8,
    #[serde(default = "default_open")]
    pub open: String,
    #[serde(default = "default_close")]
    pub close: String,
    /// Trading weekdays, e.g. `["monday", "tuesday"]`
    #[serde(default = "default_trading_days")]
    pub trading_days: Vec<String>,
    #[serde(default)]
    pub force_open: Option<bool>,
}

fn default_utc_offset_hours() -> i8 {
    -5
}
fn default_open() -> String {
    "09:30".into()
}
fn default_close() -> String {
    "16:00".into()
}
fn default_trading_days() -> Vec<String> {
    ["monday", "tuesday", "wednesday", "thursday", "friday"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: default_utc_offset_hours(),
            open: default_open(),
            close: default_close(),
            trading_days: default_trading_days(),
            force_open: None,
        }
    }
}

impl MarketConfig {
    pub fn session(&self) -> Result<SessionClock, String> {
        let offset = UtcOffset::from_hms(self.utc_offset_hours, 0, 0)
            .map_err(|e| format!("market.utc_offset_hours out of range: {e}"))?;
        let open = parse_session_time("market.open", &self.open)?;
        let close = parse_session_time("market.close", &self.close)?;
        if open >= close {
            return Err("market.open must be before market.close".into());
        }
        let days = self
            .trading_days
            .iter()
            .map(|d| parse_weekday(d))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SessionClock::new(offset, open, close).with_trading_days(days))
    }

    pub fn clock(&self) -> Result<Arc<dyn MarketClock>, String> {
        match self.force_open {
            Some(open) => Ok(Arc::new(quotegate_core::FixedClock::new(open))),
            None => Ok(Arc::new(self.session()?)),
        }
    }
}

fn parse_session_time(field: &str, raw: &str) -> Result<Time, String> {
    Time::parse(raw, format_description!("[hour]:[minute]"))
        .map_err(|e| format!("{field} must be HH:MM: {e}"))
}

fn parse_weekday(raw: &str) -> Result<Weekday, String> {
    Ok(match raw.to_ascii_lowercase().as_str() {
        "monday" | "mon" => Weekday::Monday,
        "tuesday" | "tue" => Weekday::Tuesday,
        "wednesday" | "wed" => Weekday::Wednesday,
        "thursday" | "thu" => Weekday::Thursday,
        "friday" | "fri" => Weekday::Friday,
        "saturday" | "sat" => Weekday::Saturday,
        "sunday" | "sun" => Weekday::Sunday,
        other => return Err(format!("market.trading_days: unknown weekday '{other}'")),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Primary JSON screener API
    #[serde(default = "default_screener_url")]
    pub screener_url: String,
    /// Secondary page source used by fallbacks
    #[serde(default = "default_page_url")]
    pub page_url: String,
    #[serde(default = "default_upstream_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_screener_url() -> String {
    "http://localhost:9001".into()
}
fn default_page_url() -> String {
    "http://localhost:9002".into()
}
fn default_upstream_timeout_ms() -> u64 {
    10_000
}
fn default_user_agent() -> String {
    format!("quotegate/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            screener_url: default_screener_url(),
            page_url: default_page_url(),
            timeout_ms: default_upstream_timeout_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Upper bound on `operations.*.retries`.
pub const MAX_RETRIES: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct OperationConfig {
    /// Extra primary attempts before the fallback runs
    pub retries: u32,
    /// TTL while the market is open
    pub base_ttl_secs: u64,
    /// TTL while the market is closed
    pub closed_ttl_secs: u64,
}

impl OperationConfig {
    pub fn ttl(&self) -> TtlPolicy {
        TtlPolicy::from_secs(self.base_ttl_secs, self.closed_ttl_secs)
    }
}

/// Settings as written; unset fields fall back to the operation's defaults.
#[derive(Debug, Default, Deserialize)]
struct OperationOverrides {
    retries: Option<u32>,
    base_ttl_secs: Option<u64>,
    closed_ttl_secs: Option<u64>,
}

impl OperationOverrides {
    fn over(self, defaults: OperationConfig) -> OperationConfig {
        OperationConfig {
            retries: self.retries.unwrap_or(defaults.retries),
            base_ttl_secs: self.base_ttl_secs.unwrap_or(defaults.base_ttl_secs),
            closed_ttl_secs: self.closed_ttl_secs.unwrap_or(defaults.closed_ttl_secs),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawOperations {
    #[serde(default)]
    quote: OperationOverrides,
    #[serde(default)]
    history: OperationOverrides,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "RawOperations")]
pub struct OperationsConfig {
    pub quote: OperationConfig,
    pub history: OperationConfig,
}

impl From<RawOperations> for OperationsConfig {
    fn from(raw: RawOperations) -> Self {
        Self {
            quote: raw.quote.over(default_quote_op()),
            history: raw.history.over(default_history_op()),
        }
    }
}

fn default_quote_op() -> OperationConfig {
    OperationConfig {
        retries: 2,
        base_ttl_secs: 60,
        closed_ttl_secs: 600,
    }
}
fn default_history_op() -> OperationConfig {
    OperationConfig {
        retries: 2,
        base_ttl_secs: 300,
        closed_ttl_secs: 3600,
    }
}

impl Default for OperationsConfig {
    fn default() -> Self {
        Self {
            quote: default_quote_op(),
            history: default_history_op(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Default configuration file looked up in the working directory.
    pub const DEFAULT_CONFIG_FILE: &str = "quotegate.toml";
    /// Environment variable naming the configuration file.
    pub const CONFIG_PATH_VAR: &str = "QUOTEGATE_CONFIG";

    /// Configuration file chosen at startup and where the choice came from.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ConfigPath {
        pub path: String,
        pub origin: &'static str,
    }

    /// `--config <path>` beats `QUOTEGATE_CONFIG`, which beats the default file.
    pub fn config_path(args: impl IntoIterator<Item = String>, env_path: Option<String>) -> ConfigPath {
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            if arg == "--config" {
                if let Some(path) = args.next() {
                    return ConfigPath { path, origin: "--config" };
                }
            }
        }
        match env_path.filter(|p| !p.is_empty()) {
            Some(path) => ConfigPath {
                path,
                origin: CONFIG_PATH_VAR,
            },
            None => ConfigPath {
                path: DEFAULT_CONFIG_FILE.to_string(),
                origin: "default",
            },
        }
    }

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., QUOTEGATE__RATE_LIMIT__DAILY_LIMIT=500
        builder = builder.add_source(
            Environment::with_prefix("QUOTEGATE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
