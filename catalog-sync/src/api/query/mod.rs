//! GraphQL Query Builder Module
//!
//! Provides a typed builder for GraphQL documents sent to the commerce
//! platform, plus the request and response shapes that travel on the wire.

pub mod document;
pub mod request;
pub mod result;

pub use document::{Argument, Document, Field, OperationKind};
pub use request::GraphqlRequest;
pub use result::{GraphqlError, GraphqlResponse, Headroom};
