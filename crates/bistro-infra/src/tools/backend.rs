//! GraphQL client for the reservation backend.
//!
//! Every request is a POST of `{query, variables}` with the shared
//! credential in an `x-api-key` header. A non-2xx status or a non-empty
//! `errors` array is a [`ToolFailure`]; otherwise `data` is returned.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use bistro_core::tool::registry::ToolFailure;
use bistro_types::config::ToolsConfig;

/// Longest backend error body kept in a failure message.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("failed to build backend HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Serialize)]
struct GraphqlRequest<'a> {
    query: &'a str,
    variables: &'a Map<String, Value>,
}

#[derive(Deserialize)]
struct GraphqlResponse {
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphqlError>,
}

#[derive(Deserialize)]
struct GraphqlError {
    message: String,
}

/// Shared HTTP client for the backend. Cheap to clone.
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    url: String,
    api_key: Option<SecretString>,
}

impl BackendClient {
    pub fn new(config: &ToolsConfig, api_key: Option<SecretString>) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("bistro/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        if api_key.is_none() {
            tracing::warn!(env = %config.api_key_env, "no backend credential set; requests will be unauthenticated");
        }
        Ok(Self {
            http,
            url: config.backend_url.clone(),
            api_key,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run one GraphQL document and return its `data` object.
    pub async fn execute(&self, query: &str, variables: &Map<String, Value>) -> Result<Value, ToolFailure> {
        let mut request = self
            .http
            .post(&self.url)
            .json(&GraphqlRequest { query, variables });
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ToolFailure::new(format!("backend request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let detail = if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                truncate(body.trim(), MAX_ERROR_BODY)
            };
            return Err(ToolFailure::http(status.as_u16(), detail));
        }

        let body: GraphqlResponse = response
            .json()
            .await
            .map_err(|e| ToolFailure::new(format!("backend returned invalid JSON: {e}")))?;

        if !body.errors.is_empty() {
            let messages: Vec<_> = body.errors.into_iter().map(|e| e.message).collect();
            debug!(errors = ?messages, "backend returned GraphQL errors");
            return Err(ToolFailure::new(messages.join("; ")));
        }

        body.data
            .filter(|data| !data.is_null())
            .ok_or_else(|| ToolFailure::new("backend response has no data"))
    }
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
