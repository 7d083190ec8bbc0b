//! HTTP update source.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, trace};

use crate::response::parse_response;
use skein_core::{ApiError, ApiResult, BotInfo, GetUpdatesParams, Update, UpdateSource};

/// Connection settings of an [`HttpSource`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpSourceConfig {
    /// Bot token, sent as part of the method URL.
    pub token: String,

    /// Base URL of the API server.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Timeout of calls other than long polls, in seconds. A long poll may
    /// take this much longer than its own timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl HttpSourceConfig {
    /// Creates a config for `token` against the public API server.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_url: default_api_url(),
            timeout_secs: default_timeout_secs(),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Fetches updates from a Bot-API-style HTTP endpoint.
///
/// Each method is a `POST {api_url}/bot{token}/{method}` with a JSON body.
#[derive(Clone)]
pub struct HttpSource {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl std::fmt::Debug for HttpSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The base URL embeds the token.
        f.debug_struct("HttpSource")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl HttpSource {
    /// Creates a source for `token` against the public API server.
    pub fn new(token: impl Into<String>) -> ApiResult<Self> {
        Self::with_config(HttpSourceConfig::new(token))
    }

    /// Creates a source from `config`.
    pub fn with_config(config: HttpSourceConfig) -> ApiResult<Self> {
        let client = ClientBuilder::new()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ApiError::network(e.to_string()))?;

        info!(url = %config.api_url, "Created HTTP update source");
        Ok(Self::with_client(client, &config))
    }

    /// Creates a source that reuses an existing client.
    pub fn with_client(client: Client, config: &HttpSourceConfig) -> Self {
        Self {
            client,
            base_url: format!(
                "{}/bot{}",
                config.api_url.trim_end_matches('/'),
                config.token
            ),
            timeout: config.timeout(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    /// Calls `method` and decodes its result.
    pub async fn call<P, T>(&self, method: &str, params: &P) -> ApiResult<T>
    where
        P: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        self.call_with_timeout(method, params, self.timeout).await
    }

    async fn call_with_timeout<P, T>(
        &self,
        method: &str,
        params: &P,
        timeout: Duration,
    ) -> ApiResult<T>
    where
        P: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        trace!(method, "Calling API method");

        // Request errors print their URL, which contains the token.
        let resp = self
            .client
            .post(self.method_url(method))
            .timeout(timeout)
            .json(params)
            .send()
            .await
            .map_err(|e| ApiError::network(e.without_url().to_string()))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| ApiError::network(e.without_url().to_string()))?;

        parse_response(status, &body)
    }
}

#[async_trait]
impl UpdateSource for HttpSource {
    async fn get_updates(&self, params: &GetUpdatesParams) -> ApiResult<Vec<Update>> {
        let timeout = self.timeout + Duration::from_secs(params.timeout.into());
        self.call_with_timeout("getUpdates", params, timeout).await
    }

    async fn get_me(&self) -> ApiResult<BotInfo> {
        self.call("getMe", &json!({})).await
    }

    async fn delete_webhook(&self, drop_pending_updates: bool) -> ApiResult<bool> {
        self.call(
            "deleteWebhook",
            &json!({ "drop_pending_updates": drop_pending_updates }),
        )
        .await
    }
}
