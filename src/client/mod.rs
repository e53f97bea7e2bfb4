use async_trait::async_trait;
use futures_util::future::join_all;
use log::warn;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{Chain, Config};
use crate::domain::{ApyInfo, Candle, Ticker};
use crate::errors::{EngineError, EngineResult};
use crate::logging;

pub mod graphql;

// ==================================================
// TRANSPORT SEAM
// ==================================================
//
// The retry/failover logic is written against this trait so tests can
// script responses instead of patching HTTP internals.

#[derive(Debug, Clone)]
pub enum TransportError {
    Timeout(String),
    Connect(String),
    /// Any HTTP response with a non-success status. Terminal for its URL.
    Status {
        code: u16,
        body: String,
    },
    Decode(String),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Timeout(_) | TransportError::Connect(_))
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Timeout(msg) => write!(f, "timeout: {msg}"),
            TransportError::Connect(msg) => write!(f, "connect: {msg}"),
            TransportError::Status { code, body } => write!(f, "status {code}: {body}"),
            TransportError::Decode(msg) => write!(f, "decode: {msg}"),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn get_json(&self, url: &str, params: &[(String, String)])
        -> Result<Value, TransportError>;
    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, TransportError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("HTTP client");
        Self { client }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_decode() {
        TransportError::Decode(e.to_string())
    } else {
        TransportError::Connect(e.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_json(
        &self,
        url: &str,
        params: &[(String, String)],
    ) -> Result<Value, TransportError> {
        let response = self
            .client
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                code: status.as_u16(),
                body,
            });
        }
        response.json().await.map_err(map_reqwest_error)
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value, TransportError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                code: status.as_u16(),
                body: text,
            });
        }
        response.json().await.map_err(map_reqwest_error)
    }
}

// ==================================================
// API CLIENT (RETRY + FAILOVER)
// ==================================================

#[derive(Debug, Clone)]
pub struct RestEndpoints {
    pub primary: String,
    pub backup: Option<String>,
}

enum Payload<'a> {
    Get(&'a [(String, String)]),
    Post(&'a Value),
}

pub struct ApiClient {
    transport: Arc<dyn Transport>,
    endpoints: HashMap<Chain, RestEndpoints>,
    subsquid: HashMap<Chain, String>,
    max_retries: u32,
    base_delay: Duration,
}

impl ApiClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        endpoints: HashMap<Chain, RestEndpoints>,
        subsquid: HashMap<Chain, String>,
        max_retries: u32,
        base_delay: Duration,
    ) -> Self {
        Self {
            transport,
            endpoints,
            subsquid,
            max_retries,
            base_delay,
        }
    }

    pub fn from_config(config: &Config, transport: Arc<dyn Transport>) -> Self {
        let mut endpoints = HashMap::new();
        let mut subsquid = HashMap::new();
        for (chain, cfg) in &config.chains {
            endpoints.insert(
                *chain,
                RestEndpoints {
                    primary: cfg.oracle_url.clone(),
                    backup: cfg.oracle_backup_url.clone(),
                },
            );
            subsquid.insert(*chain, cfg.subsquid_url.clone());
        }
        Self::new(
            transport,
            endpoints,
            subsquid,
            config.trading.max_retries,
            Duration::from_millis(config.trading.retry_base_delay_ms),
        )
    }

    /// REST request against the chain's primary endpoint, failing over to
    /// the backup after retries are exhausted.
    pub async fn request(
        &self,
        chain: Chain,
        path: &str,
        params: &[(String, String)],
    ) -> EngineResult<Value> {
        let urls = self.ordered_urls(chain, path)?;
        self.request_urls(&urls, Payload::Get(params)).await
    }

    /// GraphQL request against the chain's indexer. Single URL, same
    /// retry semantics.
    pub async fn graphql(&self, chain: Chain, query: &str, variables: Value) -> EngineResult<Value> {
        let url = self
            .subsquid
            .get(&chain)
            .cloned()
            .ok_or_else(|| {
                EngineError::Configuration(format!(
                    "no subsquid endpoint for chain {}",
                    chain.as_str()
                ))
            })?;
        let body = json!({ "query": query, "variables": variables });
        self.request_urls(&[url], Payload::Post(&body)).await
    }

    fn ordered_urls(&self, chain: Chain, path: &str) -> EngineResult<Vec<String>> {
        let endpoints = self.endpoints.get(&chain).ok_or_else(|| {
            EngineError::Configuration(format!("no REST endpoint for chain {}", chain.as_str()))
        })?;

        let mut urls = vec![format!("{}{}", endpoints.primary, path)];
        if let Some(backup) = &endpoints.backup {
            urls.push(format!("{backup}{path}"));
        }
        Ok(urls)
    }

    async fn request_urls(&self, urls: &[String], payload: Payload<'_>) -> EngineResult<Value> {
        let mut failures: Vec<String> = Vec::new();

        for url in urls {
            for attempt in 0..self.max_retries {
                let result = match &payload {
                    Payload::Get(params) => self.transport.get_json(url, params).await,
                    Payload::Post(body) => self.transport.post_json(url, body).await,
                };

                match result {
                    Ok(value) => return Ok(value),
                    Err(e) if e.is_retryable() => {
                        logging::log_retry(attempt + 1, &format!("{url}: {e}"));
                        failures.push(format!("{url} attempt {}: {e}", attempt + 1));
                        if attempt + 1 < self.max_retries {
                            let delay = self.base_delay * 2u32.pow(attempt);
                            tokio::time::sleep(delay).await;
                        }
                    }
                    // A delivered response (or an undecodable one) is
                    // terminal for this URL; move straight to the next.
                    Err(e) => {
                        failures.push(format!("{url}: {e}"));
                        break;
                    }
                }
            }
        }

        Err(EngineError::AllEndpointsFailed {
            endpoint: urls.first().cloned().unwrap_or_default(),
            detail: failures.join("; "),
        })
    }

    // ==================================================
    // TYPED REST WRAPPERS
    // ==================================================

    pub async fn get_tickers(&self, chain: Chain) -> EngineResult<Vec<Ticker>> {
        let value = self.request(chain, "/prices/tickers", &[]).await?;
        serde_json::from_value(value).map_err(|e| EngineError::Transport(e.to_string()))
    }

    pub async fn get_candles(
        &self,
        chain: Chain,
        token_symbol: &str,
        period: &str,
        limit: u32,
    ) -> EngineResult<Vec<Candle>> {
        let params = [
            ("tokenSymbol".to_string(), token_symbol.to_string()),
            ("period".to_string(), period.to_string()),
            ("limit".to_string(), limit.to_string()),
        ];
        let value = self.request(chain, "/prices/candles", &params).await?;
        parse_candles(&value)
    }

    pub async fn get_apy(&self, chain: Chain) -> EngineResult<Vec<ApyInfo>> {
        let value = self.request(chain, "/apy", &[]).await?;
        let rows = value
            .get("markets")
            .cloned()
            .unwrap_or_else(|| value.clone());
        serde_json::from_value(rows).map_err(|e| EngineError::Transport(e.to_string()))
    }

    /// Fetch candles for many symbols concurrently. An individual failed
    /// fetch is logged and dropped from the aggregate, never fatal.
    pub async fn get_candles_many(
        &self,
        chain: Chain,
        symbols: &[&str],
        period: &str,
        limit: u32,
    ) -> HashMap<String, Vec<Candle>> {
        let futures = symbols
            .iter()
            .map(|symbol| async move {
                (
                    symbol.to_string(),
                    self.get_candles(chain, symbol, period, limit).await,
                )
            })
            .collect::<Vec<_>>();

        let mut out = HashMap::new();
        for (symbol, result) in join_all(futures).await {
            match result {
                Ok(candles) => {
                    out.insert(symbol, candles);
                }
                Err(e) => warn!("dropping candles for {symbol}: {e}"),
            }
        }
        out
    }
}

/// REST candles arrive as positional arrays: [timestamp, o, h, l, c].
/// Numbers are re-parsed through their text form so no binary-float
/// round-off leaks into Decimal.
fn parse_candles(value: &Value) -> EngineResult<Vec<Candle>> {
    let rows = value
        .get("candles")
        .and_then(Value::as_array)
        .ok_or_else(|| EngineError::Transport("candles payload missing".to_string()))?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let cells = row
            .as_array()
            .filter(|c| c.len() >= 5)
            .ok_or_else(|| EngineError::Transport("malformed candle row".to_string()))?;

        let number = |i: usize| -> EngineResult<Decimal> {
            Decimal::from_str(&cells[i].to_string())
                .map_err(|e| EngineError::Transport(format!("candle cell {i}: {e}")))
        };

        out.push(Candle {
            timestamp: cells[0]
                .as_i64()
                .ok_or_else(|| EngineError::Transport("candle timestamp".to_string()))?,
            open: number(1)?,
            high: number(2)?,
            low: number(3)?,
            close: number(4)?,
        });
    }
    Ok(out)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::Mutex;

    /// Scripted transport: pops one result per call and records the URL.
    pub(crate) struct MockTransport {
        responses: Mutex<Vec<Result<Value, TransportError>>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl MockTransport {
        pub(crate) fn new(responses: Vec<Result<Value, TransportError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn get_json(
            &self,
            url: &str,
            _params: &[(String, String)],
        ) -> Result<Value, TransportError> {
            self.calls.lock().await.push(url.to_string());
            let mut responses = self.responses.lock().await;
            if responses.is_empty() {
                return Err(TransportError::Connect("script exhausted".to_string()));
            }
            responses.remove(0)
        }

        async fn post_json(&self, url: &str, _body: &Value) -> Result<Value, TransportError> {
            self.get_json(url, &[]).await
        }
    }

    fn client_with(transport: Arc<MockTransport>, max_retries: u32) -> ApiClient {
        let mut endpoints = HashMap::new();
        endpoints.insert(
            Chain::Arbitrum,
            RestEndpoints {
                primary: "https://primary".to_string(),
                backup: Some("https://backup".to_string()),
            },
        );
        ApiClient::new(
            transport,
            endpoints,
            HashMap::new(),
            max_retries,
            Duration::from_millis(1),
        )
    }

    #[tokio::test]
    async fn two_primary_timeouts_then_backup_succeeds() {
        let transport = Arc::new(MockTransport::new(vec![
            Err(TransportError::Timeout("t1".to_string())),
            Err(TransportError::Timeout("t2".to_string())),
            Ok(json!({"ok": true})),
        ]));
        let client = client_with(transport.clone(), 2);

        let value = client.request(Chain::Arbitrum, "/x", &[]).await.unwrap();
        assert_eq!(value, json!({"ok": true}));

        let calls = transport.calls.lock().await.clone();
        assert_eq!(
            calls,
            vec![
                "https://primary/x".to_string(),
                "https://primary/x".to_string(),
                "https://backup/x".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn status_error_is_terminal_for_its_url() {
        let transport = Arc::new(MockTransport::new(vec![
            Err(TransportError::Status {
                code: 500,
                body: "boom".to_string(),
            }),
            Ok(json!(1)),
        ]));
        let client = client_with(transport.clone(), 3);

        client.request(Chain::Arbitrum, "/y", &[]).await.unwrap();

        // One primary attempt only (no retries after a delivered 500),
        // then straight to the backup.
        let calls = transport.calls.lock().await.clone();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1], "https://backup/y");
    }

    #[tokio::test]
    async fn all_exhausted_yields_aggregated_error() {
        let transport = Arc::new(MockTransport::new(vec![
            Err(TransportError::Timeout("a".to_string())),
            Err(TransportError::Timeout("b".to_string())),
            Err(TransportError::Timeout("c".to_string())),
            Err(TransportError::Timeout("d".to_string())),
        ]));
        let client = client_with(transport.clone(), 2);

        let err = client.request(Chain::Arbitrum, "/z", &[]).await.unwrap_err();
        match err {
            EngineError::AllEndpointsFailed { detail, .. } => {
                assert!(detail.contains("attempt 2"));
                assert!(detail.contains("backup"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(transport.calls.lock().await.len(), 4);
    }

    #[tokio::test]
    async fn missing_chain_is_configuration_error() {
        let transport = Arc::new(MockTransport::new(vec![]));
        let client = client_with(transport, 2);
        let err = client
            .request(Chain::Avalanche, "/x", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn candle_parsing_preserves_decimal_text() {
        let value = json!({"candles": [[1700000000, 100.1, 101.5, 99.8, 100.9]]});
        let candles = parse_candles(&value).unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].open.to_string(), "100.1");
    }
}
