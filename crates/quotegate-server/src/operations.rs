//! Cached, dispatched upstream operations exposed by the HTTP layer.
//!
//! An [`OperationDescriptor`] binds a name, a [`DispatchPolicy`] and a
//! [`TtlPolicy`]. Caching wraps the whole retry/fallback unit, so a value
//! obtained through the fallback is cached like any other.

use serde::Serialize;

use quotegate_cache::{CacheManager, Cacheable, TtlPolicy};
use quotegate_core::{DispatchPolicy, Fallback, OperationError, Result};

use crate::config::OperationsConfig;
use crate::upstream::{Candle, Quote, UpstreamClient};

pub const HISTORY_INTERVALS: &[&str] = &["1m", "5m", "15m", "1h", "1d", "1wk", "1mo"];
pub const HISTORY_RANGES: &[&str] = &["1d", "5d", "1mo", "3mo", "6mo", "1y", "5y", "max"];

pub struct OperationDescriptor<A, T> {
    dispatch: DispatchPolicy<A, T>,
    ttl: TtlPolicy,
}

impl<A, T> OperationDescriptor<A, T>
where
    A: Serialize + Clone + Send + Sync + 'static,
    T: Cacheable + Send + 'static,
{
    pub fn new(dispatch: DispatchPolicy<A, T>, ttl: TtlPolicy) -> Self {
        Self { dispatch, ttl }
    }

    pub fn name(&self) -> &str {
        self.dispatch.name()
    }

    pub fn ttl(&self) -> TtlPolicy {
        self.ttl
    }

    pub async fn invoke(&self, cache: &CacheManager, args: A) -> Result<T> {
        cache
            .cached(self.dispatch.name(), &args, self.ttl, || {
                self.dispatch.call(args.clone())
            })
            .await
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuoteArgs {
    pub symbol: String,
}

/// History request with boundary defaults already applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryArgs {
    pub symbol: String,
    pub interval: String,
    pub range: String,
}

/// The page source only takes a symbol and a range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageHistoryArgs {
    pub symbol: String,
    pub range: String,
}

impl QuoteArgs {
    pub fn parse(symbol: &str) -> Result<Self> {
        Ok(Self {
            symbol: normalize_symbol(symbol)?,
        })
    }
}

impl HistoryArgs {
    pub const DEFAULT_INTERVAL: &'static str = "1d";
    pub const DEFAULT_RANGE: &'static str = "1mo";

    pub fn parse(symbol: &str, interval: Option<&str>, range: Option<&str>) -> Result<Self> {
        let interval = interval.unwrap_or(Self::DEFAULT_INTERVAL);
        let range = range.unwrap_or(Self::DEFAULT_RANGE);
        if !HISTORY_INTERVALS.contains(&interval) {
            return Err(OperationError::bad_input(format!(
                "interval must be one of {HISTORY_INTERVALS:?}"
            )));
        }
        if !HISTORY_RANGES.contains(&range) {
            return Err(OperationError::bad_input(format!(
                "range must be one of {HISTORY_RANGES:?}"
            )));
        }
        Ok(Self {
            symbol: normalize_symbol(symbol)?,
            interval: interval.to_string(),
            range: range.to_string(),
        })
    }

    pub fn page_args(&self) -> PageHistoryArgs {
        PageHistoryArgs {
            symbol: self.symbol.clone(),
            range: self.range.clone(),
        }
    }
}

fn normalize_symbol(raw: &str) -> Result<String> {
    let symbol = raw.trim().to_ascii_uppercase();
    let valid = !symbol.is_empty()
        && symbol.len() <= 12
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^' | '='));
    if valid {
        Ok(symbol)
    } else {
        Err(OperationError::bad_input(format!("invalid symbol '{raw}'")))
    }
}

pub struct Operations {
    pub quote: OperationDescriptor<QuoteArgs, Quote>,
    pub history: OperationDescriptor<HistoryArgs, Vec<Candle>>,
}

impl Operations {
    /// Screener as primary, page source as fallback.
    pub fn upstream(config: &OperationsConfig, client: &UpstreamClient) -> Self {
        let quote = {
            let primary = client.clone();
            let fallback = client.clone();
            DispatchPolicy::new("quote", move |args: QuoteArgs| {
                let client = primary.clone();
                async move { client.screener_quote(&args.symbol).await }
            })
            .retries(config.quote.retries)
            .fallback(Fallback::new(
                "page_quote",
                |args: &QuoteArgs| args.symbol.clone(),
                move |symbol: String| {
                    let client = fallback.clone();
                    async move { client.page_quote(&symbol).await }
                },
            ))
        };

        let history = {
            let primary = client.clone();
            let fallback = client.clone();
            DispatchPolicy::new("history", move |args: HistoryArgs| {
                let client = primary.clone();
                async move {
                    client
                        .screener_history(&args.symbol, &args.interval, &args.range)
                        .await
                }
            })
            .retries(config.history.retries)
            .fallback(Fallback::new(
                "page_history",
                HistoryArgs::page_args,
                move |args: PageHistoryArgs| {
                    let client = fallback.clone();
                    async move { client.page_history(&args.symbol, &args.range).await }
                },
            ))
        };

        Self {
            quote: OperationDescriptor::new(quote, config.quote.ttl()),
            history: OperationDescriptor::new(history, config.history.ttl()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quotegate_cache::MemoryStore;
    use quotegate_core::FixedClock;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::macros::datetime;

    fn quote(symbol: &str, price: f64) -> Quote {
        Quote {
            symbol: symbol.into(),
            price,
            change: None,
            change_percent: None,
            volume: None,
            as_of: datetime!(2024-03-01 21:00:00 UTC),
        }
    }

    fn cache() -> CacheManager {
        CacheManager::new(Arc::new(MemoryStore::new()), Arc::new(FixedClock::new(false)), "t")
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_result_is_cached() {
        let primary_calls = Arc::new(AtomicUsize::new(0));
        let fallback_calls = Arc::new(AtomicUsize::new(0));

        let dispatch = {
            let primary_calls = Arc::clone(&primary_calls);
            let fallback_calls = Arc::clone(&fallback_calls);
            DispatchPolicy::new("quote", move |_: QuoteArgs| {
                primary_calls.fetch_add(1, Ordering::SeqCst);
                async { Err(OperationError::upstream("503")) }
            })
            .retries(2)
            .fallback(Fallback::new(
                "page_quote",
                |args: &QuoteArgs| args.symbol.clone(),
                move |symbol: String| {
                    fallback_calls.fetch_add(1, Ordering::SeqCst);
                    async move { Ok(quote(&symbol, 10.0)) }
                },
            ))
        };
        let op = OperationDescriptor::new(dispatch, TtlPolicy::from_secs(60, 600));
        let cache = cache();

        let first = op.invoke(&cache, QuoteArgs::parse("aapl").unwrap()).await.unwrap();
        let second = op.invoke(&cache, QuoteArgs::parse("AAPL").unwrap()).await.unwrap();

        assert_eq!(first, quote("AAPL", 10.0));
        assert_eq!(second, first);
        assert_eq!(primary_calls.load(Ordering::SeqCst), 3);
        assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);

        let key = cache.key_for("quote", &QuoteArgs::parse("AAPL").unwrap()).unwrap();
        assert_eq!(
            cache.store().ttl(key.as_str()).await.unwrap(),
            Some(std::time::Duration::from_secs(600))
        );
    }

    #[tokio::test]
    async fn client_facing_errors_are_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatch = {
            let calls = Arc::clone(&calls);
            DispatchPolicy::new("quote", move |args: QuoteArgs| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Err::<Quote, _>(OperationError::not_found(args.symbol)) }
            })
            .retries(3)
        };
        let op = OperationDescriptor::new(dispatch, TtlPolicy::from_secs(60, 600));
        let cache = cache();

        for _ in 0..2 {
            let err = op.invoke(&cache, QuoteArgs::parse("ZZZZ").unwrap()).await.unwrap_err();
            assert!(matches!(err, OperationError::NotFound(_)));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn history_defaults_and_validation() {
        let args = HistoryArgs::parse("msft", None, None).unwrap();
        assert_eq!(args.symbol, "MSFT");
        assert_eq!(args.interval, "1d");
        assert_eq!(args.range, "1mo");
        assert_eq!(
            args.page_args(),
            PageHistoryArgs {
                symbol: "MSFT".into(),
                range: "1mo".into()
            }
        );

        assert!(matches!(
            HistoryArgs::parse("MSFT", Some("2h"), None),
            Err(OperationError::BadInput(_))
        ));
        assert!(matches!(
            HistoryArgs::parse("MSFT", None, Some("forever")),
            Err(OperationError::BadInput(_))
        ));
        assert!(QuoteArgs::parse("").is_err());
        assert!(QuoteArgs::parse("AAPL; DROP").is_err());
        assert_eq!(QuoteArgs::parse(" brk.b ").unwrap().symbol, "BRK.B");
    }
}
