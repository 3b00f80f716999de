//! REST backend client using Reqwest
//!
//! Speaks the PostgREST dialect exposed by the hosted backend:
//! `GET /rest/v1/<table>?select=<cols>&<col>=in.("a","b")`, `POST` for inserts
//! and `DELETE` with filters in the query string.

use async_trait::async_trait;
use bridge_traits::{
    backend::{BackendClient, BackendResponse, Filter, Mutation, SelectQuery},
    error::{BridgeError, Result},
};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const REST_PREFIX: &str = "rest/v1";

/// Reqwest-based [`BackendClient`]
///
/// Provides:
/// - Connection pooling via reqwest
/// - Bearer + `apikey` headers on every call
/// - TLS through rustls
///
/// There is no retry layer: a transport failure is returned as
/// [`BridgeError::Network`] and the caller decides what to do.
pub struct RestBackendClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RestBackendClient {
    /// Create a client with a 30 second request timeout
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, api_key, Duration::from_secs(30))
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("songbook-core/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(client, base_url, api_key))
    }

    /// Wrap a preconfigured reqwest client
    pub fn with_client(client: Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}/{}", self.base_url.trim_end_matches('/'), REST_PREFIX, table)
    }

    fn filter_pairs(filters: &[Filter]) -> Vec<(String, String)> {
        filters
            .iter()
            .map(|filter| (filter.column().to_string(), filter.render_value()))
            .collect()
    }

    fn select_pairs(query: &SelectQuery) -> Vec<(String, String)> {
        let mut pairs = vec![("select".to_string(), query.columns.clone())];
        pairs.extend(Self::filter_pairs(&query.filters));
        pairs
    }

    fn authorized(&self, request: RequestBuilder, access_token: &str) -> RequestBuilder {
        request
            .bearer_auth(access_token)
            .header("apikey", &self.api_key)
    }

    async fn send(request: RequestBuilder) -> Result<BackendResponse> {
        let response = request.send().await.map_err(|e| {
            warn!(error = %e, "Backend request failed");
            if e.is_timeout() {
                BridgeError::Network("Request timed out".to_string())
            } else if e.is_connect() {
                BridgeError::Network(format!("Connection failed: {}", e))
            } else {
                BridgeError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| BridgeError::Network(e.to_string()))?;

        debug!(status, bytes = text.len(), "Backend response received");
        Ok(BackendResponse::new(status, parse_body(&text)))
    }
}

/// Empty bodies become `null`; non-JSON bodies are kept as a string.
fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[async_trait]
impl BackendClient for RestBackendClient {
    async fn select(&self, access_token: &str, query: SelectQuery) -> Result<BackendResponse> {
        debug!(table = %query.table, filters = query.filters.len(), "Backend select");

        let request = self
            .client
            .get(self.table_url(&query.table))
            .query(&Self::select_pairs(&query));

        Self::send(self.authorized(request, access_token)).await
    }

    async fn mutate(&self, access_token: &str, mutation: Mutation) -> Result<BackendResponse> {
        debug!(table = %mutation.table(), "Backend mutation");

        let request = match &mutation {
            Mutation::Insert { table, row } => self.client.post(self.table_url(table)).json(row),
            Mutation::Delete { table, filters } => {
                if filters.is_empty() {
                    return Err(BridgeError::InvalidPayload(
                        "Refusing unfiltered delete".to_string(),
                    ));
                }
                self.client
                    .delete(self.table_url(table))
                    .query(&Self::filter_pairs(filters))
            }
        };

        let request = request.header("Prefer", "return=representation");
        Self::send(self.authorized(request, access_token)).await
    }
}
