//! HTTP client for the Kraken Spot REST API.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::Client as HttpClient;
use serde::Deserialize;
use sha2::{Digest, Sha256, Sha512};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::AccountConfig;

/// Production Kraken HTTP API endpoint.
const BASE_HTTP_API_URL: &str = "https://api.kraken.com";

/// Default rate limit (requests per minute).
const DEFAULT_RATE_LIMIT: i64 = 60;

/// HTTP request timeout. A submission that exceeds this has an unknown
/// outcome; callers re-query on the next cycle instead of assuming
/// failure.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Kraken API error ("EOrder:Insufficient funds" style messages).
#[derive(Debug, Error)]
#[error("kraken api error: {message}")]
pub struct ApiError {
    pub message: String,
}

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("rate limit exceeded: {current}/{limit} per minute")]
    RateLimitExceeded { current: i64, limit: i64 },

    #[error("invalid api secret: {0}")]
    InvalidSecret(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Configuration for creating a new Client.
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub rate_limit: i64,
}

impl ClientConfig {
    pub fn new(api_key: String, api_secret: String, rate_limit: i64) -> Self {
        Self {
            base_url: BASE_HTTP_API_URL.to_string(),
            api_key,
            api_secret,
            rate_limit: if rate_limit > 0 {
                rate_limit
            } else {
                DEFAULT_RATE_LIMIT
            },
        }
    }
}

struct RateLimitState {
    window_start: Instant,
}

/// Envelope every Kraken response is wrapped in.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    error: Vec<String>,
    #[serde(default)]
    result: serde_json::Value,
}

/// HTTP client for the Kraken Spot API.
/// Handles request signing, rate limiting, and error handling.
pub struct Client {
    config: ClientConfig,
    http_client: HttpClient,
    request_count: AtomicI64,
    nonce: AtomicI64,
    rate_limit_state: Mutex<RateLimitState>,
}

impl Client {
    /// Creates a new Kraken API client.
    pub fn new(config: ClientConfig) -> Self {
        let http_client = HttpClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build http client");

        Self {
            config,
            http_client,
            request_count: AtomicI64::new(0),
            nonce: AtomicI64::new(chrono::Utc::now().timestamp_millis()),
            rate_limit_state: Mutex::new(RateLimitState {
                window_start: Instant::now(),
            }),
        }
    }

    /// Creates a new Kraken API client from account config.
    pub fn from_config(account_config: &AccountConfig) -> Self {
        let config = ClientConfig::new(
            account_config.api_key.clone(),
            account_config.api_secret.clone(),
            account_config
                .rate_limit
                .map(i64::from)
                .unwrap_or(DEFAULT_RATE_LIMIT),
        );
        Self::new(config)
    }

    /// Creates the API-Sign header value for a private endpoint.
    ///
    /// Kraken signs `path || SHA256(nonce || postdata)` with
    /// HMAC-SHA512 keyed by the base64-decoded API secret.
    fn sign(&self, path: &str, nonce: i64, postdata: &str) -> Result<String> {
        let secret = base64::engine::general_purpose::STANDARD
            .decode(&self.config.api_secret)
            .map_err(|e| ClientError::InvalidSecret(e.to_string()))?;

        let mut sha = Sha256::new();
        sha.update(nonce.to_string().as_bytes());
        sha.update(postdata.as_bytes());
        let digest = sha.finalize();

        let mut mac = Hmac::<Sha512>::new_from_slice(&secret)
            .map_err(|e| ClientError::InvalidSecret(e.to_string()))?;
        mac.update(path.as_bytes());
        mac.update(&digest);

        Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
    }

    /// Sends a request to a public endpoint (no authentication).
    pub async fn public(
        &self,
        endpoint: &str,
        params: Option<BTreeMap<String, String>>,
    ) -> Result<serde_json::Value> {
        self.check_rate_limit()?;

        let mut url = format!("{}/0/public/{}", self.config.base_url, endpoint);
        if let Some(params) = params {
            let query: String = params
                .iter()
                .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
                .collect::<Vec<_>>()
                .join("&");
            if !query.is_empty() {
                url = format!("{}?{}", url, query);
            }
        }

        debug!(endpoint = %endpoint, "sending public request");
        let response = self.http_client.get(&url).send().await?;
        self.increment_request_count();

        let body = response.bytes().await?;
        self.parse_envelope(&body)
    }

    /// Sends a signed request to a private endpoint.
    pub async fn private(
        &self,
        endpoint: &str,
        params: Option<BTreeMap<String, String>>,
    ) -> Result<serde_json::Value> {
        self.check_rate_limit()?;

        let path = format!("/0/private/{}", endpoint);
        let nonce = self.next_nonce();

        let mut form: Vec<(String, String)> = vec![("nonce".to_string(), nonce.to_string())];
        if let Some(params) = params {
            form.extend(params);
        }
        let postdata: String = form
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let signature = self.sign(&path, nonce, &postdata)?;

        debug!(endpoint = %endpoint, "sending private request");
        let response = self
            .http_client
            .post(format!("{}{}", self.config.base_url, path))
            .header("API-Key", &self.config.api_key)
            .header("API-Sign", signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(postdata)
            .send()
            .await?;
        self.increment_request_count();

        let body = response.bytes().await?;
        self.parse_envelope(&body)
    }

    /// Unwraps the `{error: [], result: ...}` envelope.
    fn parse_envelope(&self, body: &[u8]) -> Result<serde_json::Value> {
        let envelope: Envelope = serde_json::from_slice(body)?;
        if !envelope.error.is_empty() {
            let message = envelope.error.join("; ");
            warn!(message = %message, "api error");
            return Err(ClientError::Api(ApiError { message }));
        }
        Ok(envelope.result)
    }

    /// Monotonic nonce for signed requests.
    fn next_nonce(&self) -> i64 {
        let candidate = chrono::Utc::now().timestamp_millis();
        let previous = self.nonce.fetch_max(candidate, Ordering::SeqCst);
        if previous >= candidate {
            self.nonce.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            candidate
        }
    }

    /// Verifies we haven't exceeded the rate limit.
    fn check_rate_limit(&self) -> Result<()> {
        let mut state = self.rate_limit_state.lock().unwrap();

        // Reset counter every minute
        if state.window_start.elapsed() > Duration::from_secs(60) {
            self.request_count.store(0, Ordering::SeqCst);
            state.window_start = Instant::now();
        }

        let current = self.request_count.load(Ordering::SeqCst);
        if current >= self.config.rate_limit {
            return Err(ClientError::RateLimitExceeded {
                current,
                limit: self.config.rate_limit,
            });
        }

        Ok(())
    }

    /// Increments the request counter.
    fn increment_request_count(&self) {
        self.request_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Fetches the current server time from Kraken.
    pub async fn get_server_time(&self) -> Result<chrono::DateTime<chrono::Utc>> {
        let result = self.public("Time", None).await?;
        let unixtime = result
            .get("unixtime")
            .and_then(|v| v.as_i64())
            .unwrap_or_default();
        Ok(chrono::DateTime::from_timestamp(unixtime, 0).unwrap_or_default())
    }

    /// Checks connectivity to the Kraken API by fetching server time.
    pub async fn ping(&self) -> Result<()> {
        self.get_server_time().await?;
        Ok(())
    }

    /// Returns the current request count in the window.
    pub fn request_count(&self) -> i64 {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Returns the maximum requests per minute.
    pub fn rate_limit(&self) -> i64 {
        self.config.rate_limit
    }
}
