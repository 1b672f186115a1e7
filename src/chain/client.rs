//! Chain-data REST client with rate limiting and retries.
//!
//! # Responsibilities
//! - Talk to an Esplora / mempool.space style REST API
//! - Wait for the shared rate limiter before every attempt
//! - Retry transient failures with linear backoff
//! - Decode endpoint responses into typed values
//!
//! Cancellation is by drop: abandoning a call releases any pending limiter
//! reservation and aborts the in-flight request.

use std::str::FromStr;

use async_trait::async_trait;
use bitcoin::consensus::encode::serialize_hex;
use bitcoin::{BlockHash, Transaction, Txid};
use reqwest::Method;
use tracing::{debug, warn};
use url::Url;

use crate::chain::types::{
    BlockResponse, ChainError, ChainResult, FeeEstimates, ResultExt, TransactionResponse,
};
use crate::chain::ChainSource;
use crate::config::ClientConfig;
use crate::observability::metrics;
use crate::resilience::{RateLimiter, RetryPolicy, Retryable};

/// Rate-limited chain-data client.
#[derive(Debug)]
pub struct ChainClient {
    http: reqwest::Client,
    base_url: String,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl ChainClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `config` - Client configuration
    ///
    /// # Returns
    /// A new client or error if the base URL or HTTP stack is unusable
    pub fn new(config: &ClientConfig) -> ChainResult<Self> {
        let parsed = Url::parse(&config.base_url).map_err(|e| {
            ChainError::Http(format!("Invalid base URL '{}': {}", config.base_url, e))
        })?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        tracing::info!(
            base_url = %parsed,
            requests_per_second = config.requests_per_second,
            retry_attempts = config.retry_attempts,
            "Chain client initialized"
        );

        Ok(Self {
            http,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            limiter: RateLimiter::new(config.requests_per_second, config.burst_size),
            retry: RetryPolicy::new(config.retry_attempts, config.retry_delay()),
        })
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Issue a raw request and return the response body.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<String>,
    ) -> ChainResult<Vec<u8>> {
        self.execute("raw", method, path, body).await
    }

    async fn execute(
        &self,
        endpoint: &'static str,
        method: Method,
        path: &str,
        body: Option<String>,
    ) -> ChainResult<Vec<u8>> {
        let url = self.url_for(path);
        let mut attempt: u32 = 0;

        loop {
            self.limiter.acquire().await;

            let err = match self.attempt(method.clone(), &url, body.clone()).await {
                Ok(bytes) => {
                    metrics::record_chain_request(endpoint, "ok");
                    return Ok(bytes);
                }
                Err(err) => err,
            };
            metrics::record_chain_request(endpoint, "error");

            match self.retry.next_delay(attempt, &err) {
                Some((delay, reason)) => {
                    warn!(
                        %url,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Chain request failed, retrying"
                    );
                    metrics::record_retry(reason.as_str());
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None if err.retry_reason().is_some() => {
                    return Err(ChainError::RetriesExhausted {
                        attempts: attempt + 1,
                        source: Box::new(err),
                    });
                }
                None => return Err(err),
            }
        }
    }

    async fn attempt(&self, method: Method, url: &str, body: Option<String>) -> ChainResult<Vec<u8>> {
        let mut request = self.http.request(method, url);
        if let Some(body) = body {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "text/plain")
                .body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if status.is_success() {
            debug!(%url, status = status.as_u16(), len = bytes.len(), "Chain request ok");
            return Ok(bytes.to_vec());
        }

        let body = String::from_utf8_lossy(&bytes).trim().to_string();
        Err(ChainError::from_status(status.as_u16(), body))
    }

    async fn get_text(&self, endpoint: &'static str, path: &str) -> ChainResult<String> {
        let bytes = self.execute(endpoint, Method::GET, path, None).await?;
        String::from_utf8(bytes)
            .map(|s| s.trim().to_string())
            .map_err(|e| ChainError::Decode(e.to_string()))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &'static str,
        path: &str,
    ) -> ChainResult<T> {
        let bytes = self.execute(endpoint, Method::GET, path, None).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn parse_plain<T>(text: &str, what: &str) -> ChainResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    text.trim()
        .parse()
        .map_err(|e| ChainError::Decode(format!("Invalid {what} '{text}': {e}")))
}

#[async_trait]
impl ChainSource for ChainClient {
    async fn current_height(&self) -> ChainResult<u32> {
        let text = self.get_text("tip_height", "/blocks/tip/height").await?;
        parse_plain(&text, "height")
    }

    async fn block_hash(&self, height: u32) -> ChainResult<BlockHash> {
        let text = self
            .get_text("block_hash", &format!("/block-height/{height}"))
            .await?;
        parse_plain(&text, "block hash")
    }

    async fn block(&self, hash: &BlockHash) -> ChainResult<BlockResponse> {
        self.get_json("block", &format!("/block/{hash}")).await
    }

    async fn transaction(&self, txid: &Txid) -> ChainResult<TransactionResponse> {
        self.get_json("transaction", &format!("/tx/{txid}")).await
    }

    async fn broadcast(&self, tx: &Transaction) -> ChainResult<Txid> {
        let expected = tx.compute_txid();
        let bytes = self
            .execute("broadcast", Method::POST, "/tx", Some(serialize_hex(tx)))
            .await
            .context("broadcast transaction")?;
        let text = String::from_utf8_lossy(&bytes);
        let actual: Txid = parse_plain(&text, "txid")?;

        if actual != expected {
            return Err(ChainError::TxidMismatch { expected, actual });
        }
        tracing::info!(txid = %actual, "Transaction broadcast");
        Ok(actual)
    }

    async fn fee_estimates(&self) -> ChainResult<FeeEstimates> {
        self.get_json("fees", "/v1/fees/recommended").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> ChainClient {
        let config = ClientConfig {
            base_url: base_url.into(),
            ..Default::default()
        };
        ChainClient::new(&config).unwrap()
    }

    #[test]
    fn test_url_join_keeps_base_path() {
        let c = client("https://mempool.space/api");
        assert_eq!(
            c.url_for("/blocks/tip/height"),
            "https://mempool.space/api/blocks/tip/height"
        );

        let c = client("https://mempool.space/testnet/api/");
        assert_eq!(c.url_for("tx"), "https://mempool.space/testnet/api/tx");
    }

    #[test]
    fn test_invalid_base_url() {
        let config = ClientConfig {
            base_url: "not a url".into(),
            ..Default::default()
        };
        assert!(ChainClient::new(&config).is_err());
    }

    #[test]
    fn test_parse_plain() {
        let height: u32 = parse_plain("840000\n", "height").unwrap();
        assert_eq!(height, 840000);

        let err = parse_plain::<u32>("abc", "height").unwrap_err();
        assert!(matches!(err, ChainError::Decode(_)));
    }
}
