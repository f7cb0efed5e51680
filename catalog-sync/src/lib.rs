//! Rate-limited bulk sync of product channels and marketplace attributes
//! against a commerce platform's admin GraphQL API.

pub mod api;
pub mod config;
pub mod sync;

pub use api::{ApiError, CommerceClient, HttpTransport, RateLimiter, ResilienceConfig};
pub use config::AppConfig;
pub use sync::{BatchOutcome, DesiredState, Orchestrator, RunOptions, SyncRequest, SyncResponse};
