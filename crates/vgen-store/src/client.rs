//! Supabase REST (PostgREST) client.
//!
//! - Service-role authentication (`apikey` header plus bearer)
//! - HTTP client tuning (pooling, timeouts)
//! - Exponential backoff with jitter for idempotent requests
//! - Observability (tracing spans, metrics)
//!
//! Inserts and RPC calls are sent once. A timed-out insert may still have
//! been committed, so callers recover by re-querying instead of resending.

use std::time::{Duration, Instant};

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info_span, warn, Instrument};

use crate::error::{StoreError, StoreResult};
use crate::metrics::record_request;
use crate::query::Query;
use crate::retry::{with_retry, RetryConfig};

/// Supabase client configuration.
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`
    pub url: String,
    /// Service role key; bypasses row-level security
    pub service_key: String,
    /// Request timeout
    pub timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Retry configuration
    pub retry: RetryConfig,
}

impl SupabaseConfig {
    pub fn new(url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            service_key: service_key.into(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            retry: RetryConfig::default(),
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        let url = std::env::var("SUPABASE_URL")
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| StoreError::config("SUPABASE_URL must be set"))?;

        let service_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| StoreError::config("SUPABASE_SERVICE_ROLE_KEY must be set"))?;

        let timeout_secs: u64 = std::env::var("SUPABASE_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);

        Ok(Self {
            timeout: Duration::from_secs(timeout_secs),
            retry: RetryConfig::from_env(),
            ..Self::new(url, service_key)
        })
    }
}

/// Supabase REST client.
#[derive(Clone)]
pub struct SupabaseClient {
    http: Client,
    config: SupabaseConfig,
}

impl SupabaseClient {
    pub fn new(config: SupabaseConfig) -> StoreResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("vgen-store/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(StoreError::Network)?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        Self::new(SupabaseConfig::from_env()?)
    }

    pub fn config(&self) -> &SupabaseConfig {
        &self.config
    }

    fn table_url(&self, table: &str, query: &Query) -> String {
        let base = format!("{}/rest/v1/{}", self.config.url, table);
        if query.is_empty() {
            base
        } else {
            format!("{}?{}", base, query.to_query_string())
        }
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.config.service_key)
            .bearer_auth(&self.config.service_key)
    }

    /// Read rows matching `query`.
    pub async fn select<T: DeserializeOwned>(&self, table: &str, query: &Query) -> StoreResult<Vec<T>> {
        let url = self.table_url(table, query);
        let (this, url) = (self, url.as_str());

        self.execute_request("select", table, async {
            with_retry(&self.config.retry, "select", move || async move {
                let response = this.request(Method::GET, url).send().await?;
                let response = Self::check(response).await?;
                Ok(response.json::<Vec<T>>().await?)
            })
            .await
        })
        .await
    }

    /// Insert one row and return it as stored.
    pub async fn insert<B, T>(&self, table: &str, body: &B) -> StoreResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.table_url(table, &Query::new());

        self.execute_request("insert", table, async {
            let response = self
                .request(Method::POST, &url)
                .header("Prefer", "return=representation")
                .json(body)
                .send()
                .await?;
            let response = Self::check(response).await?;

            let mut rows: Vec<T> = response.json().await?;
            if rows.is_empty() {
                return Err(StoreError::invalid_response(format!(
                    "insert into {} returned no rows",
                    table
                )));
            }
            Ok(rows.swap_remove(0))
        })
        .await
    }

    /// Patch rows matching `query` and return the rows that changed.
    ///
    /// An empty result means no row matched, which is how conditional
    /// updates report a lost race.
    pub async fn update<B, T>(&self, table: &str, query: &Query, body: &B) -> StoreResult<Vec<T>>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = self.table_url(table, query);
        let (this, url) = (self, url.as_str());

        self.execute_request("update", table, async {
            with_retry(&self.config.retry, "update", move || async move {
                let response = this
                    .request(Method::PATCH, url)
                    .header("Prefer", "return=representation")
                    .json(body)
                    .send()
                    .await?;
                let response = Self::check(response).await?;
                Ok(response.json::<Vec<T>>().await?)
            })
            .await
        })
        .await
    }

    /// Delete rows matching `query`.
    pub async fn delete(&self, table: &str, query: &Query) -> StoreResult<()> {
        let url = self.table_url(table, query);
        let (this, url) = (self, url.as_str());

        self.execute_request("delete", table, async {
            with_retry(&self.config.retry, "delete", move || async move {
                let response = this
                    .request(Method::DELETE, url)
                    .header("Prefer", "return=minimal")
                    .send()
                    .await?;
                Self::check(response).await?;
                Ok(())
            })
            .await
        })
        .await
    }

    /// Call a stored procedure. Void functions yield `Value::Null`.
    pub async fn rpc<B: Serialize + ?Sized>(&self, function: &str, args: &B) -> StoreResult<Value> {
        let url = format!("{}/rest/v1/rpc/{}", self.config.url, function);

        self.execute_request("rpc", function, async {
            let response = self.request(Method::POST, &url).json(args).send().await?;
            let response = Self::check(response).await?;

            let text = response.text().await?;
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            Ok(serde_json::from_str(&text)?)
        })
        .await
    }

    /// Check the REST endpoint is reachable with our key.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/rest/v1/", self.config.url);
        match self.request(Method::GET, &url).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!("Supabase health check failed: {}", response.status());
                false
            }
            Err(e) => {
                warn!("Supabase health check error: {}", e);
                false
            }
        }
    }

    async fn check(response: Response) -> StoreResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after_ms = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(|secs| secs * 1000);
        let body = response.text().await.unwrap_or_default();

        Err(StoreError::from_http_status(status.as_u16(), &body, retry_after_ms))
    }

    async fn execute_request<T, F>(&self, operation: &str, table: &str, fut: F) -> StoreResult<T>
    where
        F: std::future::Future<Output = StoreResult<T>>,
    {
        let span = info_span!("supabase_request", operation = %operation, table = %table);

        let start = Instant::now();
        let result = fut.instrument(span).await;
        let latency_ms = start.elapsed().as_millis() as f64;

        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status().unwrap_or(500),
        };
        record_request(operation, table, status, latency_ms);

        if let Err(e) = &result {
            debug!(operation = %operation, table = %table, "Supabase request failed: {}", e);
        }

        result
    }
}
