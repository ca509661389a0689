use crate::error::FetchError;
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://finnhub.io/api/v1";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ERROR_BODY_CHARS: usize = 300;

/// Anything that can produce the latest price for a symbol.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn fetch_price(&self, symbol: &str) -> Result<f64, FetchError>;
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    c: Value, // Current price
    #[serde(default)]
    pc: Value, // Previous close
}

fn usable(value: &Value) -> Option<f64> {
    value.as_f64().filter(|v| *v != 0.0 && v.is_finite())
}

/// Picks the price out of a `/quote` body: current price when non-zero,
/// otherwise previous close, otherwise an error.
pub fn parse_quote(body: &str, symbol: &str) -> Result<f64, FetchError> {
    let trimmed = body.trim();
    if trimmed.is_empty()
        || trimmed == "{}"
        || trimmed.eq_ignore_ascii_case("Symbol not supported")
    {
        return Err(FetchError::Unsupported {
            symbol: symbol.to_string(),
            body: truncate(trimmed),
        });
    }

    let quote: QuoteData = serde_json::from_str(trimmed).map_err(|source| FetchError::Malformed {
        symbol: symbol.to_string(),
        source,
    })?;

    if let Some(price) = usable(&quote.c) {
        return Ok(price);
    }
    if let Some(price) = usable(&quote.pc) {
        debug!("{}: current price is zero, using previous close {}", symbol, price);
        return Ok(price);
    }
    Err(FetchError::MissingPrice {
        symbol: symbol.to_string(),
    })
}

fn truncate(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY_CHARS).collect()
}

pub struct FinnhubClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl FinnhubClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, FetchError> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        let api_key = api_key.trim().to_string();
        if api_key.is_empty() {
            warn!("FINNHUB_API_KEY is not set; quote requests will be rejected by the server");
        }

        // No idle pooling: every request opens its own connection.
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(FetchError::Client)?;

        info!("Created FinnhubClient: base_url='{}'", base_url);

        Ok(Self {
            base_url,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl QuoteSource for FinnhubClient {
    async fn fetch_price(&self, symbol: &str) -> Result<f64, FetchError> {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(FetchError::EmptySymbol);
        }

        let url = format!("{}/quote", self.base_url);
        debug!("GET {}?symbol={}", url, symbol);

        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol.as_str()), ("token", self.api_key.as_str())])
            .send()
            .await
            .map_err(|source| FetchError::Network {
                symbol: symbol.clone(),
                source,
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|source| FetchError::Network {
            symbol: symbol.clone(),
            source,
        })?;

        if !status.is_success() {
            return Err(FetchError::Status {
                symbol,
                status: status.as_u16(),
                body: truncate(&body),
            });
        }

        parse_quote(&body, &symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves exactly one canned HTTP response and returns the base URL.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2048];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{}", addr)
    }

    #[test]
    fn prefers_current_price() {
        assert_eq!(parse_quote(r#"{"c":101.5,"pc":99.0}"#, "AAPL").unwrap(), 101.5);
    }

    #[test]
    fn falls_back_to_previous_close() {
        assert_eq!(parse_quote(r#"{"c":0,"pc":101.5}"#, "AAPL").unwrap(), 101.5);
    }

    #[test]
    fn fails_without_a_usable_price() {
        assert!(matches!(
            parse_quote(r#"{"c":0,"pc":0}"#, "AAPL"),
            Err(FetchError::MissingPrice { .. })
        ));
        assert!(matches!(
            parse_quote(r#"{"c":"n/a","d":null}"#, "AAPL"),
            Err(FetchError::MissingPrice { .. })
        ));
    }

    #[test]
    fn rejects_empty_and_unsupported_bodies() {
        for body in ["", "   ", "{}", "Symbol not supported", "symbol NOT supported"] {
            assert!(
                matches!(parse_quote(body, "ZZZZ"), Err(FetchError::Unsupported { .. })),
                "body {:?}",
                body
            );
        }
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            parse_quote("<html>oops</html>", "AAPL"),
            Err(FetchError::Malformed { .. })
        ));
    }

    #[tokio::test]
    async fn empty_symbol_fails_before_any_request() {
        let client = FinnhubClient::new("http://127.0.0.1:9", "key").unwrap();
        assert!(matches!(
            client.fetch_price("  ").await,
            Err(FetchError::EmptySymbol)
        ));
    }

    #[tokio::test]
    async fn fetches_price_over_http() {
        let base_url = serve_once("200 OK", r#"{"c":187.25,"d":1.1,"pc":186.0}"#).await;
        let client = FinnhubClient::new(&base_url, "key").unwrap();
        assert_eq!(client.fetch_price("aapl").await.unwrap(), 187.25);
    }

    #[tokio::test]
    async fn non_200_status_is_an_error() {
        let base_url = serve_once("429 Too Many Requests", r#"{"error":"API limit reached"}"#).await;
        let client = FinnhubClient::new(&base_url, "").unwrap();
        match client.fetch_price("AAPL").await {
            Err(FetchError::Status { status, body, .. }) => {
                assert_eq!(status, 429);
                assert!(body.contains("API limit"));
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[test]
    fn error_bodies_are_truncated() {
        let long = "x".repeat(1000);
        assert_eq!(truncate(&long).len(), MAX_ERROR_BODY_CHARS);
    }
}
