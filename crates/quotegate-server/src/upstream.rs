//! HTTP client for the upstream data sources.
//!
//! The screener API is the primary source and serves the domain types
//! directly. The page source is the fallback: it exposes a flatter quote
//! record and columnar daily history that are converted here.

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use quotegate_core::{OperationError, Result};

use crate::config::UpstreamConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub price: f64,
    #[serde(default)]
    pub change: Option<f64>,
    #[serde(default)]
    pub change_percent: Option<f64>,
    #[serde(default)]
    pub volume: Option<u64>,
    #[serde(with = "time::serde::rfc3339")]
    pub as_of: OffsetDateTime,
}
quotegate_cache::register_type!(Quote, "Quote");

/// One OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    #[serde(with = "time::serde::rfc3339")]
    pub time: OffsetDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: u64,
}
quotegate_cache::register_type!(Candle, "Candle");

#[derive(Debug, Deserialize)]
struct PageQuote {
    symbol: String,
    price: f64,
    /// Unix seconds
    time: i64,
}

#[derive(Debug, Deserialize)]
struct PageSeries {
    timestamps: Vec<i64>,
    open: Vec<f64>,
    high: Vec<f64>,
    low: Vec<f64>,
    close: Vec<f64>,
    #[serde(default)]
    volume: Vec<u64>,
}

fn unix_time(secs: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(secs)
        .map_err(|e| OperationError::parse(format!("invalid timestamp {secs}: {e}")))
}

impl PageQuote {
    fn into_quote(self) -> Result<Quote> {
        Ok(Quote {
            symbol: self.symbol,
            price: self.price,
            change: None,
            change_percent: None,
            volume: None,
            as_of: unix_time(self.time)?,
        })
    }
}

impl PageSeries {
    fn into_candles(self) -> Result<Vec<Candle>> {
        let n = self.timestamps.len();
        if [self.open.len(), self.high.len(), self.low.len(), self.close.len()]
            .iter()
            .any(|&len| len != n)
            || !(self.volume.is_empty() || self.volume.len() == n)
        {
            return Err(OperationError::parse("page series columns differ in length"));
        }
        (0..n)
            .map(|i| -> Result<Candle> {
                Ok(Candle {
                    time: unix_time(self.timestamps[i])?,
                    open: self.open[i],
                    high: self.high[i],
                    low: self.low[i],
                    close: self.close[i],
                    volume: self.volume.get(i).copied().unwrap_or(0),
                })
            })
            .collect()
    }
}

/// Shared client for both upstream sources.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: Client,
    screener_url: String,
    page_url: String,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> reqwest::Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            http,
            screener_url: config.screener_url.trim_end_matches('/').to_string(),
            page_url: config.page_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn screener_quote(&self, symbol: &str) -> Result<Quote> {
        let url = format!("{}/quote/{symbol}", self.screener_url);
        fetch_json(self.http.get(url), "screener").await
    }

    pub async fn screener_history(&self, symbol: &str, interval: &str, range: &str) -> Result<Vec<Candle>> {
        let url = format!("{}/history/{symbol}", self.screener_url);
        let request = self
            .http
            .get(url)
            .query(&[("interval", interval), ("range", range)]);
        fetch_json(request, "screener").await
    }

    pub async fn page_quote(&self, symbol: &str) -> Result<Quote> {
        let url = format!("{}/quote/{symbol}", self.page_url);
        let page: PageQuote = fetch_json(self.http.get(url), "page").await?;
        page.into_quote()
    }

    /// Daily bars only; the page source has no intraday series.
    pub async fn page_history(&self, symbol: &str, range: &str) -> Result<Vec<Candle>> {
        let url = format!("{}/history/{symbol}", self.page_url);
        let request = self.http.get(url).query(&[("range", range)]);
        let series: PageSeries = fetch_json(request, "page").await?;
        series.into_candles()
    }

    /// Probe both sources. Any HTTP response counts as reachable.
    pub async fn probe(&self) -> (bool, bool) {
        let screener = self.http.get(&self.screener_url).send();
        let page = self.http.get(&self.page_url).send();
        let (screener, page) = tokio::join!(screener, page);
        (screener.is_ok(), page.is_ok())
    }
}

async fn fetch_json<T: DeserializeOwned>(request: RequestBuilder, source: &str) -> Result<T> {
    let response = request
        .send()
        .await
        .map_err(|e| OperationError::network(format!("{source}: {e}")))?;

    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(OperationError::not_found(format!(
            "{source}: {}",
            response.url().path()
        )));
    }
    if !status.is_success() {
        return Err(OperationError::upstream(format!("{source} returned {status}")));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| OperationError::parse(format!("{source}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(screener: &MockServer, page: &MockServer) -> UpstreamClient {
        UpstreamClient::new(&UpstreamConfig {
            screener_url: screener.uri(),
            page_url: page.uri(),
            ..UpstreamConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn screener_quote_is_decoded() {
        let screener = MockServer::start().await;
        let page = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quote/AAPL"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "symbol": "AAPL",
                "price": 181.5,
                "change": 1.25,
                "as_of": "2024-03-01T14:30:00Z"
            })))
            .mount(&screener)
            .await;

        let quote = client(&screener, &page).screener_quote("AAPL").await.unwrap();
        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(quote.change, Some(1.25));
        assert_eq!(quote.volume, None);
    }

    #[tokio::test]
    async fn status_codes_map_to_error_classes() {
        let screener = MockServer::start().await;
        let page = MockServer::start().await;
        Mock::given(path("/quote/NOPE"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&screener)
            .await;
        Mock::given(path("/quote/DOWN"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&screener)
            .await;
        Mock::given(path("/quote/JUNK"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&screener)
            .await;

        let client = client(&screener, &page);
        assert!(matches!(client.screener_quote("NOPE").await, Err(OperationError::NotFound(_))));
        assert!(matches!(client.screener_quote("DOWN").await, Err(OperationError::Upstream(_))));
        assert!(matches!(client.screener_quote("JUNK").await, Err(OperationError::Parse(_))));
    }

    #[tokio::test]
    async fn unreachable_source_is_a_network_error() {
        let client = UpstreamClient::new(&UpstreamConfig {
            screener_url: "http://127.0.0.1:1".into(),
            timeout_ms: 500,
            ..UpstreamConfig::default()
        })
        .unwrap();
        let err = client.screener_quote("AAPL").await.unwrap_err();
        assert!(matches!(err, OperationError::Network(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn page_history_is_converted_from_columns() {
        let screener = MockServer::start().await;
        let page = MockServer::start().await;
        Mock::given(path("/history/MSFT"))
            .and(query_param("range", "5d"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "timestamps": [1709251200, 1709510400],
                "open": [1.0, 2.0],
                "high": [1.5, 2.5],
                "low": [0.5, 1.5],
                "close": [1.2, 2.2],
                "volume": [100, 200]
            })))
            .mount(&page)
            .await;
        Mock::given(path("/history/BAD"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "timestamps": [1709251200],
                "open": [], "high": [], "low": [], "close": []
            })))
            .mount(&page)
            .await;

        let client = client(&screener, &page);
        let candles = client.page_history("MSFT", "5d").await.unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[1].close, 2.2);
        assert_eq!(candles[0].time.unix_timestamp(), 1709251200);

        assert!(matches!(client.page_history("BAD", "5d").await, Err(OperationError::Parse(_))));
    }
}
