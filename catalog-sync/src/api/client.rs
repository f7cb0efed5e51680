//! Commerce platform client
//!
//! The remote API is reached through the [`Transport`] trait so the
//! resilience layer can be driven by the real HTTP transport in production
//! and by scripted transports in tests.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::error::ApiError;
use super::models::EntityId;
use super::query::{Document, Field, GraphqlRequest, GraphqlResponse};
use super::resilience::{RateLimiter, RequestExecutor, ResilienceConfig};

/// Header carrying REST-style call-limit usage (`used/limit`)
pub const CALL_LIMIT_HEADER: &str = "X-Shopify-Shop-Api-Call-Limit";
/// Header carrying the admin access token
pub const ACCESS_TOKEN_HEADER: &str = "X-Shopify-Access-Token";

/// Raw HTTP-level response from the GraphQL endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    /// Value of the call-limit header, if the remote sent one
    pub call_limit: Option<String>,
    /// Parsed JSON body, or the raw text as a JSON string when it was not JSON
    pub body: Value,
}

impl TransportResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            call_limit: None,
            body,
        }
    }
}

/// Failure before any HTTP status was received
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("{0}")]
    Other(String),
}

/// Stream of downloaded body chunks
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Outbound channel to the remote platform
#[async_trait]
pub trait Transport: Send + Sync {
    /// Post a GraphQL request to the admin endpoint
    async fn post_graphql(
        &self,
        request: &GraphqlRequest,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError>;

    /// Stream the body at `url` (bulk operation result files)
    async fn download(&self, url: &str, timeout: Duration) -> Result<ByteStream, TransportError>;
}

/// `reqwest`-backed transport for the platform's admin GraphQL API
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
    access_token: String,
}

impl HttpTransport {
    /// `shop` is either a bare domain (`example.myshopify.com`) or a base URL
    pub fn new(shop: &str, access_token: &str, api_version: &str) -> anyhow::Result<Self> {
        let base = if shop.contains("://") {
            shop.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", shop.trim_end_matches('/'))
        };

        let client = reqwest::Client::builder()
            .user_agent(concat!("catalog-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/admin/api/{}/graphql.json", base, api_version),
            access_token: access_token.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn map_reqwest_error(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout)
    } else if err.is_connect() || err.is_request() || err.is_body() {
        TransportError::Connection(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_graphql(
        &self,
        request: &GraphqlRequest,
        timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(ACCESS_TOKEN_HEADER, &self.access_token)
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        let status = response.status().as_u16();
        let call_limit = response
            .headers()
            .get(CALL_LIMIT_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response
            .text()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));

        Ok(TransportResponse {
            status,
            call_limit,
            body,
        })
    }

    async fn download(&self, url: &str, timeout: Duration) -> Result<ByteStream, TransportError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        if !response.status().is_success() {
            return Err(TransportError::Status(response.status().as_u16()));
        }

        Ok(response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| map_reqwest_error(e, timeout)))
            .boxed())
    }
}

/// Minimal view of a single catalog entity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntitySummary {
    pub id: EntityId,
    pub title: Option<String>,
    pub status: Option<String>,
}

/// High-level client: every call goes through the shared executor
#[derive(Clone)]
pub struct CommerceClient {
    executor: Arc<RequestExecutor>,
    transport: Arc<dyn Transport>,
    config: Arc<ResilienceConfig>,
}

impl CommerceClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        limiter: Arc<RateLimiter>,
        config: ResilienceConfig,
    ) -> Self {
        let executor = RequestExecutor::new(Arc::clone(&transport), limiter, &config);
        Self {
            executor: Arc::new(executor),
            transport,
            config: Arc::new(config),
        }
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    /// Run a request with the configured retry budget and timeout
    pub async fn graphql(&self, request: &GraphqlRequest) -> Result<GraphqlResponse, ApiError> {
        self.executor.execute_default(request).await
    }

    /// Look up one entity; `Ok(None)` when the remote has no such record
    pub async fn fetch_entity(&self, id: &EntityId) -> Result<Option<EntitySummary>, ApiError> {
        let mut doc = Document::query("FetchEntity");
        let id_arg = doc.bind("id", "ID!", json!(id.as_str()));
        let request = doc
            .field(
                Field::new("node")
                    .arg("id", id_arg)
                    .scalars(["id"])
                    .select(Field::inline_fragment("Product").scalars(["title", "status"]))
                    .select(Field::inline_fragment("ProductVariant").scalars(["title"])),
            )
            .into_request();

        let response = self.graphql(&request).await?;
        let node = &response.data["node"];
        if node.is_null() {
            return Ok(None);
        }

        Ok(Some(EntitySummary {
            id: id.clone(),
            title: node["title"].as_str().map(str::to_string),
            status: node["status"].as_str().map(str::to_string),
        }))
    }
}

impl std::fmt::Debug for CommerceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommerceClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
