//! API client for the back-office REST API.
//!
//! `ApiClient` sends authenticated JSON requests using the token held by
//! `TokenLifecycle`. `CachedApi` layers the TTL cache on top: collection
//! reads go through the cache, and every mutation invalidates the
//! collection it touched.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client, Method};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::TokenLifecycle;
use crate::cache::{CacheKey, FetchOptions, TtlCache};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Per-request timeout. A timed-out collection read falls back to the cache.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// API client for the back-office REST API.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    tokens: Arc<TokenLifecycle>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, tokens: Arc<TokenLifecycle>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.request::<T, ()>(Method::GET, path, None).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn put_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.request(Method::PUT, path, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.request::<Value, ()>(Method::DELETE, path, None)
            .await
            .map(|_| ())
    }

    async fn request<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, ApiError> {
        let token = self.tokens.get_token().ok_or(ApiError::NotAuthenticated)?;
        let url = self.url(path);
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut builder = self
                .client
                .request(method.clone(), &url)
                .bearer_auth(&token)
                .header(header::ACCEPT, "application/json");
            if let Some(body) = body {
                builder = builder.json(body);
            }

            let response = builder.send().await?;
            let status = response.status();

            if status.is_success() {
                let text = response.text().await?;
                // DELETE and some PUTs answer with an empty body
                let text = if text.trim().is_empty() { "null" } else { text.as_str() };
                return serde_json::from_str(text).map_err(|e| {
                    ApiError::InvalidResponse(format!("Failed to parse JSON from {}: {}", url, e))
                });
            }

            if status.as_u16() == 429 {
                retries += 1;
                if retries > MAX_RATE_LIMIT_RETRIES {
                    return Err(ApiError::RateLimited);
                }
                warn!(url = %url, retry = retries, backoff_ms, "Rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            let error = ApiError::from_status(status, &body);
            if matches!(error, ApiError::Unauthorized) {
                warn!(url = %url, "Token rejected by server, ending session");
                self.tokens.handle_unauthorized();
            }
            return Err(error);
        }
    }
}

/// REST access with read-through caching of whole collections.
#[derive(Clone)]
pub struct CachedApi {
    api: ApiClient,
    cache: Arc<TtlCache>,
}

impl CachedApi {
    pub fn new(api: ApiClient, cache: Arc<TtlCache>) -> Self {
        Self { api, cache }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    /// Read a collection through the cache.
    pub async fn collection(&self, key: &CacheKey, options: FetchOptions) -> Result<Value, ApiError> {
        let path = key.api_path();
        debug!(cache = %key, path = %path, bypass = options.bypass_cache, "Reading collection");
        self.cache
            .get_or_fetch(key, options, || self.api.get_json::<Value>(&path))
            .await
    }

    /// Typed variant of `collection`.
    pub async fn collection_as<T>(&self, key: &CacheKey, options: FetchOptions) -> Result<T, ApiError>
    where
        T: Serialize + DeserializeOwned,
    {
        let path = key.api_path();
        self.cache
            .get_or_fetch(key, options, || self.api.get_json::<T>(&path))
            .await
    }

    pub async fn create<B: Serialize>(&self, key: &CacheKey, body: &B) -> Result<Value, ApiError> {
        let created = self.api.post_json(&key.api_path(), body).await?;
        self.after_mutation(key);
        Ok(created)
    }

    pub async fn update<B: Serialize>(
        &self,
        key: &CacheKey,
        id: &str,
        body: &B,
    ) -> Result<Value, ApiError> {
        let path = format!("{}/{}", key.api_path(), id);
        let updated = self.api.put_json(&path, body).await?;
        self.after_mutation(key);
        Ok(updated)
    }

    pub async fn remove(&self, key: &CacheKey, id: &str) -> Result<(), ApiError> {
        let path = format!("{}/{}", key.api_path(), id);
        self.api.delete(&path).await?;
        self.after_mutation(key);
        Ok(())
    }

    /// A mutation may also change pending-task queues and counters.
    fn after_mutation(&self, key: &CacheKey) {
        self.cache.invalidate(key);
        for dependent in [CacheKey::PendingTasks, CacheKey::UnreviewedCount, CacheKey::Statistics] {
            if &dependent != key {
                self.cache.invalidate(&dependent);
            }
        }
    }
}
