//! Wire-level GraphQL request

use serde::Serialize;
use serde_json::{Map, Value};

/// A rendered document plus its variables, ready to post
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphqlRequest {
    pub query: String,
    pub variables: Map<String, Value>,
}

impl GraphqlRequest {
    pub fn new(query: impl Into<String>, variables: Map<String, Value>) -> Self {
        Self {
            query: query.into(),
            variables,
        }
    }

    /// Request with caller-provided document text and JSON variables
    ///
    /// Non-object `variables` are ignored.
    pub fn raw(query: impl Into<String>, variables: Option<Value>) -> Self {
        let variables = match variables {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        Self::new(query, variables)
    }

    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "query": self.query,
            "variables": Value::Object(self.variables.clone()),
        })
    }
}
