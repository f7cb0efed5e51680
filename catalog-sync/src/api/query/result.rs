//! Parsed GraphQL responses and rate-limit headroom

use serde::Deserialize;
use serde_json::Value;

/// One entry of a response's top-level `errors` array
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GraphqlError {
    pub message: String,
    #[serde(default)]
    pub path: Vec<Value>,
    #[serde(default)]
    pub extensions: Option<Value>,
}

impl GraphqlError {
    /// `extensions.code`, if present
    pub fn code(&self) -> Option<&str> {
        self.extensions
            .as_ref()
            .and_then(|ext| ext.get("code"))
            .and_then(Value::as_str)
    }

    pub fn is_throttled(&self) -> bool {
        self.code() == Some("THROTTLED") || self.message.to_lowercase().contains("throttled")
    }

    /// First path segment (the alias of the failing root field)
    pub fn root(&self) -> Option<&str> {
        self.path.first().and_then(Value::as_str)
    }
}

/// Remaining remote budget reported alongside a response
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Headroom {
    pub currently_available: f64,
    pub maximum_available: f64,
}

impl Headroom {
    /// Remaining fraction of the budget in `[0, 1]`
    pub fn fraction(&self) -> f64 {
        if self.maximum_available <= 0.0 {
            return 1.0;
        }
        (self.currently_available / self.maximum_available).clamp(0.0, 1.0)
    }

    /// From GraphQL `extensions.cost.throttleStatus`
    pub fn from_extensions(body: &Value) -> Option<Self> {
        let status = body.pointer("/extensions/cost/throttleStatus")?;
        Some(Self {
            currently_available: status.get("currentlyAvailable")?.as_f64()?,
            maximum_available: status.get("maximumAvailable")?.as_f64()?,
        })
    }

    /// From a REST-style call-limit header such as `32/40` (used/limit)
    pub fn from_call_limit(header: &str) -> Option<Self> {
        let (used, limit) = header.trim().split_once('/')?;
        let used: f64 = used.trim().parse().ok()?;
        let limit: f64 = limit.trim().parse().ok()?;
        Some(Self {
            currently_available: (limit - used).max(0.0),
            maximum_available: limit,
        })
    }
}

/// Successful (HTTP-level) GraphQL response
#[derive(Debug, Clone, PartialEq)]
pub struct GraphqlResponse {
    pub data: Value,
    pub errors: Vec<GraphqlError>,
    pub headroom: Option<Headroom>,
}

impl GraphqlResponse {
    /// Split a response body into data, errors and headroom
    pub fn from_body(body: &Value, call_limit: Option<&str>) -> Self {
        let data = body.get("data").cloned().unwrap_or(Value::Null);
        let errors = body
            .get("errors")
            .and_then(|errors| serde_json::from_value::<Vec<GraphqlError>>(errors.clone()).ok())
            .unwrap_or_default();
        let headroom =
            Headroom::from_extensions(body).or_else(|| call_limit.and_then(Headroom::from_call_limit));

        Self {
            data,
            errors,
            headroom,
        }
    }

    /// Errors not attributed to any root field
    pub fn global_errors(&self) -> impl Iterator<Item = &GraphqlError> {
        self.errors.iter().filter(|e| e.root().is_none())
    }

    /// Errors attributed to the root field reported under `key`
    pub fn errors_for<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a GraphqlError> {
        self.errors.iter().filter(move |e| e.root() == Some(key))
    }

    pub fn is_throttled(&self) -> bool {
        self.errors.iter().any(GraphqlError::is_throttled)
    }

    pub fn has_data(&self) -> bool {
        !self.data.is_null()
    }

    /// Messages of all errors, joined for display
    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("; ")
    }
}
