//! Commerce platform API layer
//!
//! Transport, typed GraphQL documents, the shared resilience stack
//! (limiter, retries, adaptive concurrency) and the catalog operations
//! built on top of them.

pub mod bulk;
pub mod client;
pub mod error;
pub mod models;
pub mod operations;
pub mod publications;
pub mod query;
pub mod resilience;

#[cfg(test)]
pub(crate) mod mock;

pub use bulk::{AsyncOperationHandle, BulkOperationTracker, BulkResult, BulkStatus};
pub use client::{
    ByteStream, CommerceClient, EntitySummary, HttpTransport, Transport, TransportError,
    TransportResponse,
};
pub use error::{ApiError, ErrorKind};
pub use models::{
    AttributeFields, AttributeKey, AttributeSet, ChannelSet, EntityId, EntityIdError, EntityKind,
    Publication,
};
pub use operations::{
    BatchRequestBuilder, BatchResponseParser, EntityPlan, Mutation, MutationGroup, MutationResult,
};
pub use publications::{ChannelResolution, PublicationCache};
pub use query::{Document, Field, GraphqlRequest, GraphqlResponse, Headroom};
pub use resilience::{
    AdaptiveConcurrency, HeadroomTier, RateLimitConfig, RateLimiter, RateLimiterStats,
    RequestExecutor, ResilienceConfig, ResilienceConfigBuilder, RetryConfig, RetryPolicy,
};
