use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::market::errors::MarketDataError;
use crate::market::polygon::types::{AggregatesEnvelope, LastTradeEnvelope};
use crate::market::provider::{DailyBar, MarketDataProvider, Trade};

/// Which Polygon endpoint answers `latest_trade`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteEndpoint {
    /// Real-time last trade. Needs a paid plan.
    LastTrade,
    /// Previous session's daily close. Available on every plan.
    PreviousClose,
}

impl fmt::Display for QuoteEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuoteEndpoint::LastTrade => f.write_str("last_trade"),
            QuoteEndpoint::PreviousClose => f.write_str("previous_close"),
        }
    }
}

impl FromStr for QuoteEndpoint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "last_trade" => Ok(QuoteEndpoint::LastTrade),
            "previous_close" => Ok(QuoteEndpoint::PreviousClose),
            other => Err(anyhow::anyhow!("Invalid QuoteEndpoint value: {}", other)),
        }
    }
}

#[derive(Clone)]
pub struct PolygonClient {
    http: Client,
    url: String,
    api_key: String,
    endpoint: QuoteEndpoint,
}

impl PolygonClient {
    pub fn new(url: String, api_key: String, endpoint: QuoteEndpoint) -> Result<Self, MarketDataError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(5))
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            endpoint,
        })
    }

    /// Polygon answers 404 for tickers it does not know, which is missing
    /// data for that ticker rather than a transport failure.
    async fn get_json<T: DeserializeOwned>(
        &self,
        ticker: &str,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<T, MarketDataError> {
        let resp = self
            .http
            .get(url)
            .query(&[("apiKey", self.api_key.as_str())])
            .query(params)
            .send()
            .await?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(MarketDataError::NoData(ticker.to_string()));
        }

        Ok(resp.error_for_status()?.json().await?)
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn last_trade(&self, ticker: &str) -> Result<Trade, MarketDataError> {
        let url = format!("{}/v2/last/trade/{}", self.url, ticker);

        let envelope: LastTradeEnvelope = self.get_json(ticker, &url, &[]).await?;
        let trade = envelope.into_trade(ticker)?;

        debug!(price = trade.price, ts_ms = trade.timestamp_ms, "polygon last trade fetched");
        Ok(trade)
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn previous_close(&self, ticker: &str) -> Result<Trade, MarketDataError> {
        let url = format!("{}/v2/aggs/ticker/{}/prev", self.url, ticker);

        let envelope: AggregatesEnvelope = self.get_json(ticker, &url, &[]).await?;
        let trade = envelope.into_trade(ticker)?;

        debug!(price = trade.price, ts_ms = trade.timestamp_ms, "polygon previous close fetched");
        Ok(trade)
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn day_range(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyBar>, MarketDataError> {
        let url = format!(
            "{}/v2/aggs/ticker/{}/range/1/day/{}/{}",
            self.url,
            ticker,
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d")
        );

        let envelope: AggregatesEnvelope = self
            .get_json(ticker, &url, &[("adjusted", "true"), ("sort", "asc")])
            .await?;
        let bars = envelope.into_daily_bars(ticker)?;

        debug!(bars = bars.len(), "polygon daily aggregates fetched");
        Ok(bars)
    }
}

#[async_trait]
impl MarketDataProvider for PolygonClient {
    async fn latest_trade(&self, ticker: &str) -> Result<Trade, MarketDataError> {
        match self.endpoint {
            QuoteEndpoint::LastTrade => self.last_trade(ticker).await,
            QuoteEndpoint::PreviousClose => self.previous_close(ticker).await,
        }
    }

    async fn daily_aggregates(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<DailyBar>, MarketDataError> {
        self.day_range(ticker, from, to).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Answers exactly one request with `response` and hands back the raw
    /// request head it received.
    async fn serve_once(response: String) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let n = sock.read(&mut buf).await.unwrap();
            sock.write_all(response.as_bytes()).await.unwrap();
            let _ = sock.shutdown().await;
            String::from_utf8_lossy(&buf[..n]).into_owned()
        });
        (format!("http://{addr}"), handle)
    }

    fn reply(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    fn client(url: String, endpoint: QuoteEndpoint) -> PolygonClient {
        PolygonClient::new(url, "k".into(), endpoint).unwrap()
    }

    #[test]
    fn endpoint_names_round_trip() {
        for e in [QuoteEndpoint::LastTrade, QuoteEndpoint::PreviousClose] {
            assert_eq!(e.to_string().parse::<QuoteEndpoint>().unwrap(), e);
        }
        assert_eq!(
            " Previous_Close ".parse::<QuoteEndpoint>().unwrap(),
            QuoteEndpoint::PreviousClose
        );
    }

    #[tokio::test]
    async fn unreachable_host_is_an_http_error() {
        // port 9 (discard) on localhost; nothing listens there in CI
        let client = PolygonClient::new(
            "http://127.0.0.1:9/".into(),
            "k".into(),
            QuoteEndpoint::PreviousClose,
        )
        .unwrap();

        let err = client.latest_trade("AAPL").await.unwrap_err();
        assert!(matches!(err, MarketDataError::Http(_)));
    }

    #[tokio::test]
    async fn unknown_ticker_is_no_data() {
        let (url, server) = serve_once(reply("404 Not Found", "")).await;
        let err = client(url, QuoteEndpoint::LastTrade)
            .latest_trade("NOPE")
            .await
            .unwrap_err();

        assert!(matches!(err, MarketDataError::NoData(t) if t == "NOPE"));
        let request = server.await.unwrap();
        assert!(request.starts_with("GET /v2/last/trade/NOPE?"));
        assert!(request.contains("apiKey=k"));
    }

    #[tokio::test]
    async fn server_errors_stay_http_errors() {
        let (url, _server) = serve_once(reply("503 Service Unavailable", "")).await;
        let err = client(url, QuoteEndpoint::PreviousClose)
            .latest_trade("AAPL")
            .await
            .unwrap_err();

        assert!(matches!(err, MarketDataError::Http(_)));
    }

    #[tokio::test]
    async fn daily_aggregates_request_the_day_range() {
        let body = r#"{"status":"OK","resultsCount":2,"results":[{"c":10.5,"v":100,"t":1704153600000},{"c":11.0,"v":300,"t":1704240000000}]}"#;
        let (url, server) = serve_once(reply("200 OK", body)).await;
        let from = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();

        let bars = client(url, QuoteEndpoint::PreviousClose)
            .daily_aggregates("AAPL", from, to)
            .await
            .unwrap();

        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].close, 11.0);
        assert_eq!(bars[1].volume, Some(300.0));

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /v2/aggs/ticker/AAPL/range/1/day/2024-01-01/2024-01-31?"));
        assert!(request.contains("apiKey=k"));
        assert!(request.contains("sort=asc"));
    }

    #[tokio::test]
    async fn unknown_ticker_range_is_no_data() {
        let (url, _server) = serve_once(reply("404 Not Found", "")).await;
        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let err = client(url, QuoteEndpoint::PreviousClose)
            .daily_aggregates("NOPE", day, day)
            .await
            .unwrap_err();

        assert!(matches!(err, MarketDataError::NoData(_)));
    }
}
