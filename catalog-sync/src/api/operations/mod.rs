//! Catalog mutation operations
//!
//! This module provides the mutation types sent to the platform and the
//! builder/parser pair that packs them into aliased batch requests.

pub mod batch;
pub mod operation;

pub use batch::{BatchRequestBuilder, BatchResponseParser, EntityPlan, MutationGroup};
pub use operation::{Mutation, MutationResult};
