//! Pluggable attribute classification
//!
//! A classifier may fill blank attributes for an entity before mutations
//! are planned. Values the caller supplied are never overridden.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::api::error::ApiError;
use crate::api::models::{AttributeSet, EntityId};

#[async_trait]
pub trait AttributeClassifier: Send + Sync {
    /// Attributes to write for `entity`, starting from the requested ones
    async fn classify(
        &self,
        entity: &EntityId,
        requested: &AttributeSet,
    ) -> Result<AttributeSet, ApiError>;
}

/// Leaves the requested attributes untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct NoClassifier;

#[async_trait]
impl AttributeClassifier for NoClassifier {
    async fn classify(
        &self,
        _entity: &EntityId,
        requested: &AttributeSet,
    ) -> Result<AttributeSet, ApiError> {
        Ok(requested.clone())
    }
}

/// Fills blanks from a fixed per-entity table
#[derive(Debug, Clone, Default)]
pub struct MapClassifier {
    known: HashMap<EntityId, AttributeSet>,
}

impl MapClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, entity: EntityId, attributes: AttributeSet) -> Self {
        self.known.insert(entity, attributes);
        self
    }
}

#[async_trait]
impl AttributeClassifier for MapClassifier {
    async fn classify(
        &self,
        entity: &EntityId,
        requested: &AttributeSet,
    ) -> Result<AttributeSet, ApiError> {
        let mut attributes = requested.clone();
        if let Some(known) = self.known.get(entity) {
            attributes.fill_blanks_from(known);
        }
        Ok(attributes)
    }
}
