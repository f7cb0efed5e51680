//! Resilient request executor
//!
//! Every outbound GraphQL call goes through [`RequestExecutor::execute`]:
//! one token is debited per attempt, the response is classified, remote
//! headroom feeds back into the shared limiter, and failed attempts are
//! retried according to the [`RetryPolicy`].

use log::{debug, warn};
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::{Duration, sleep};

use super::config::{RateLimitConfig, ResilienceConfig};
use super::rate_limiter::{HeadroomTier, RateLimiter};
use super::retry::{RetryDecision, RetryPolicy};
use crate::api::client::{Transport, TransportError, TransportResponse};
use crate::api::error::ApiError;
use crate::api::query::{GraphqlRequest, GraphqlResponse};

/// Executes GraphQL requests against a [`Transport`] with rate limiting and retries
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
    rate_limit: RateLimitConfig,
    request_timeout: Duration,
    request_logging: bool,
    attempts: AtomicU64,
}

impl RequestExecutor {
    pub fn new(
        transport: Arc<dyn Transport>,
        limiter: Arc<RateLimiter>,
        config: &ResilienceConfig,
    ) -> Self {
        Self {
            transport,
            limiter,
            policy: RetryPolicy::new(config.retry.clone()),
            rate_limit: config.rate_limit.clone(),
            request_timeout: config.batch.request_timeout,
            request_logging: config.monitoring.request_logging,
            attempts: AtomicU64::new(0),
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Attempts sent to the transport since creation
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Execute with the configured retry budget and request timeout
    pub async fn execute_default(
        &self,
        request: &GraphqlRequest,
    ) -> Result<GraphqlResponse, ApiError> {
        self.execute(request, None, None).await
    }

    /// Execute a request, retrying throttled and transient failures.
    ///
    /// `max_retries` bounds transient failures (the call fails on the
    /// `max_retries`-th one); throttled attempts are retried on their own
    /// schedule until `max_throttle_retries` is reached. Client errors are
    /// surfaced immediately.
    pub async fn execute(
        &self,
        request: &GraphqlRequest,
        max_retries: Option<u32>,
        timeout: Option<Duration>,
    ) -> Result<GraphqlResponse, ApiError> {
        let max_retries = self.policy.max_retries(max_retries);
        let timeout = timeout.unwrap_or(self.request_timeout);
        let max_throttle_retries = self.policy.config().max_throttle_retries;

        let mut transient_failures: u32 = 0;
        let mut throttle_streak: u32 = 0;

        loop {
            let error = match self.attempt(request, timeout).await {
                Ok(response) => return Ok(response),
                Err(error) => error,
            };

            match self.policy.classify(&error) {
                RetryDecision::Throttled => {
                    self.limiter.apply_tier(HeadroomTier::Throttled);
                    if throttle_streak >= max_throttle_retries {
                        warn!(
                            "Giving up after {} throttled attempts: {}",
                            throttle_streak + 1,
                            error
                        );
                        return Err(error);
                    }
                    let delay = self.policy.throttle_delay(throttle_streak);
                    throttle_streak += 1;
                    warn!(
                        "Request throttled (streak {}), backing off {:?}",
                        throttle_streak, delay
                    );
                    sleep(delay).await;
                }
                RetryDecision::Transient => {
                    transient_failures += 1;
                    if transient_failures >= max_retries {
                        warn!(
                            "Request failed after {} attempt(s): {}",
                            transient_failures, error
                        );
                        return Err(error);
                    }
                    let delay = self.policy.transient_delay(transient_failures - 1);
                    warn!(
                        "Transient failure ({}/{}), retrying in {:?}: {}",
                        transient_failures, max_retries, delay, error
                    );
                    sleep(delay).await;
                }
                RetryDecision::Fatal => return Err(error),
            }
        }
    }

    async fn attempt(
        &self,
        request: &GraphqlRequest,
        timeout: Duration,
    ) -> Result<GraphqlResponse, ApiError> {
        self.limiter.acquire(1.0).await;
        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;

        if self.request_logging {
            debug!(
                "GraphQL attempt #{} ({} variable(s)): {}",
                attempt,
                request.variables.len(),
                request.query
            );
        }

        let response = self
            .transport
            .post_graphql(request, timeout)
            .await
            .map_err(transport_error)?;

        let parsed = classify_response(response)?;
        self.record_headroom(&parsed);
        Ok(parsed)
    }

    fn record_headroom(&self, response: &GraphqlResponse) {
        let tier = match response.headroom {
            Some(headroom) => {
                let fraction = headroom.fraction();
                if fraction < self.rate_limit.critical_headroom {
                    HeadroomTier::Critical
                } else if fraction < self.rate_limit.low_headroom {
                    HeadroomTier::Low
                } else {
                    HeadroomTier::Healthy
                }
            }
            // Without a signal only leave the throttled tier behind
            None if self.limiter.tier() == HeadroomTier::Throttled => HeadroomTier::Healthy,
            None => return,
        };
        self.limiter.apply_tier(tier);
    }
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("policy", &self.policy)
            .field("request_timeout", &self.request_timeout)
            .field("attempts", &self.attempts())
            .finish_non_exhaustive()
    }
}

fn transport_error(error: TransportError) -> ApiError {
    match error {
        TransportError::Status(status) if status >= 500 => {
            ApiError::Transient(format!("HTTP {status}"))
        }
        TransportError::Status(429) => ApiError::Throttled("HTTP 429".to_string()),
        TransportError::Status(status) => ApiError::Client {
            status,
            message: format!("HTTP {status}"),
        },
        other => ApiError::Transient(other.to_string()),
    }
}

/// Map an HTTP-level response onto success or an [`ApiError`]
pub(crate) fn classify_response(response: TransportResponse) -> Result<GraphqlResponse, ApiError> {
    let status = response.status;

    if status == 429 {
        return Err(ApiError::Throttled(body_message(&response.body, status)));
    }
    if status >= 500 {
        return Err(ApiError::Transient(format!(
            "HTTP {}: {}",
            status,
            body_message(&response.body, status)
        )));
    }
    if status >= 400 {
        return Err(ApiError::Client {
            status,
            message: body_message(&response.body, status),
        });
    }
    if !response.body.is_object() {
        return Err(ApiError::Decode(format!(
            "expected a JSON object, got: {}",
            truncate(&response.body.to_string(), 200)
        )));
    }

    let parsed = GraphqlResponse::from_body(&response.body, response.call_limit.as_deref());
    if parsed.is_throttled() {
        return Err(ApiError::Throttled(parsed.error_summary()));
    }
    if !parsed.has_data() && !parsed.errors.is_empty() {
        return Err(ApiError::Remote(parsed.error_summary()));
    }
    Ok(parsed)
}

/// Best-effort error text from an error response body
fn body_message(body: &Value, status: u16) -> String {
    let message = match body {
        Value::String(text) if !text.trim().is_empty() => Some(truncate(text.trim(), 200)),
        Value::Object(map) => match map.get("errors") {
            Some(Value::String(text)) => Some(text.clone()),
            Some(Value::Array(errors)) => {
                let messages: Vec<&str> = errors
                    .iter()
                    .filter_map(|e| e.get("message").and_then(Value::as_str))
                    .collect();
                (!messages.is_empty()).then(|| messages.join("; "))
            }
            _ => map.get("message").and_then(Value::as_str).map(str::to_string),
        },
        _ => None,
    };
    message.unwrap_or_else(|| format!("HTTP {status}"))
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
