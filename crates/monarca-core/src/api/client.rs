//! API client for the message store's REST endpoints.

use std::future::Future;
use std::time::Duration;

use reqwest::{header, Client, Response};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{debug, warn};
use url::Url;

use crate::chat::message::{NewMessage, RemoteRecord};
use crate::chat::realtime;
use crate::config::RemoteConfig;

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) reads.
/// Inserts are never retried so a message cannot be stored twice.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

const REST_PATH: &str = "rest/v1/";
const SIGNUP_PATH: &str = "auth/v1/signup";

#[derive(Debug, Deserialize)]
struct SignupResponse {
    access_token: String,
}

/// Read and write access to the shared message log.
pub trait MessageStore: Send + Sync {
    /// Up to `limit` messages in creation order, oldest first.
    fn recent_messages(
        &self,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<RemoteRecord>, ApiError>> + Send;

    /// Insert a message and return the stored row(s).
    fn insert_message(
        &self,
        message: &NewMessage,
    ) -> impl Future<Output = Result<Vec<RemoteRecord>, ApiError>> + Send;
}

/// API client for the hosted store.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base: Url,
    anon_key: String,
    table: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(config: &RemoteConfig) -> Result<Self, ApiError> {
        let mut base = Url::parse(&config.url)
            .map_err(|e| ApiError::InvalidConfig(format!("remote url {:?}: {}", config.url, e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base,
            anon_key: config.anon_key.clone(),
            table: config.table.clone(),
            token: None,
        })
    }

    /// Create a new ApiClient with the given token, sharing the connection pool.
    pub fn with_token(&self, token: String) -> Self {
        Self {
            client: self.client.clone(),
            base: self.base.clone(),
            anon_key: self.anon_key.clone(),
            table: self.table.clone(),
            token: Some(token),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn anon_key(&self) -> &str {
        &self.anon_key
    }

    /// Socket URL of the realtime service for this store.
    pub fn realtime_url(&self) -> Result<Url, ApiError> {
        realtime::endpoint(&self.base, &self.anon_key)
            .map_err(|e| ApiError::InvalidConfig(format!("realtime url: {}", e)))
    }

    fn table_url(&self) -> Result<Url, ApiError> {
        self.base
            .join(REST_PATH)
            .and_then(|rest| rest.join(&self.table))
            .map_err(|e| ApiError::InvalidConfig(format!("table url: {}", e)))
    }

    fn history_url(&self, limit: usize) -> Result<Url, ApiError> {
        let mut url = self.table_url()?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("order", "created_at.asc")
            .append_pair("limit", &limit.to_string());
        Ok(url)
    }

    fn headers(&self) -> Result<header::HeaderMap, ApiError> {
        let value = |v: &str| {
            header::HeaderValue::from_str(v)
                .map_err(|e| ApiError::InvalidConfig(format!("header value: {}", e)))
        };

        let bearer = self.token.as_deref().unwrap_or(&self.anon_key);
        let mut headers = header::HeaderMap::new();
        headers.insert("apikey", value(&self.anon_key)?);
        headers.insert(header::AUTHORIZATION, value(&format!("Bearer {}", bearer))?);
        headers.insert(header::CONTENT_TYPE, value("application/json")?);
        headers.insert("Prefer", value("return=representation")?);
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse_json<T: DeserializeOwned>(response: Response, what: &str) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("{}: {}", what, e)))
    }

    async fn get<T: DeserializeOwned>(&self, url: &Url) -> Result<T, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self
                .client
                .get(url.clone())
                .headers(self.headers()?)
                .send()
                .await?;

            if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                retries += 1;
                if retries > MAX_RATE_LIMIT_RETRIES {
                    return Err(ApiError::RateLimited);
                }
                warn!(url = %url, retry = retries, backoff_ms, "Rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2; // Exponential backoff
                continue;
            }

            let response = Self::check_response(response).await?;
            return Self::parse_json(response, url.path()).await;
        }
    }

    /// Sign up an anonymous user and return its access token.
    pub async fn sign_in_anonymously(&self) -> Result<String, ApiError> {
        let url = self
            .base
            .join(SIGNUP_PATH)
            .map_err(|e| ApiError::InvalidConfig(format!("signup url: {}", e)))?;

        let response = self
            .client
            .post(url)
            .header("apikey", &self.anon_key)
            .json(&serde_json::json!({}))
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let signup: SignupResponse = Self::parse_json(response, "signup").await?;
        debug!("Signed in anonymously");
        Ok(signup.access_token)
    }
}

impl MessageStore for ApiClient {
    async fn recent_messages(&self, limit: usize) -> Result<Vec<RemoteRecord>, ApiError> {
        let url = self.history_url(limit)?;
        let records: Vec<RemoteRecord> = self.get(&url).await?;
        debug!(count = records.len(), "Loaded message history");
        Ok(records)
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<Vec<RemoteRecord>, ApiError> {
        let url = self.table_url()?;
        let response = self
            .client
            .post(url)
            .headers(self.headers()?)
            .json(message)
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let records: Vec<RemoteRecord> = Self::parse_json(response, "insert").await?;
        if records.is_empty() {
            return Err(ApiError::InvalidResponse(
                "insert returned no rows".to_string(),
            ));
        }
        Ok(records)
    }
}
