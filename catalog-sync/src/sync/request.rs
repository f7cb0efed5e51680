//! Request and response shapes exchanged with the hosting layer

use serde::{Deserialize, Serialize};

use super::orchestrator::DesiredState;
use super::outcome::BatchOutcome;
use crate::api::error::ApiError;
use crate::api::models::{AttributeFields, AttributeSet, ChannelSet};

/// `{ entityIds, desiredChannels?, desiredAttributes? }`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub entity_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_channels: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_attributes: Option<AttributeFields>,
}

impl SyncRequest {
    /// Exactly one of channels or attributes must be given
    pub fn desired_state(&self) -> Result<DesiredState, ApiError> {
        match (&self.desired_channels, &self.desired_attributes) {
            (Some(channels), None) => Ok(DesiredState::Channels(ChannelSet::new(channels))),
            (None, Some(fields)) => Ok(DesiredState::Attributes(AttributeSet::from(fields.clone()))),
            (Some(_), Some(_)) => Err(ApiError::InvalidInput(
                "desiredChannels and desiredAttributes are mutually exclusive".to_string(),
            )),
            (None, None) => Err(ApiError::InvalidInput(
                "one of desiredChannels or desiredAttributes is required".to_string(),
            )),
        }
    }
}

/// `{ success, message, updatedProducts, failedProducts }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub success: bool,
    pub message: String,
    pub updated_products: Vec<String>,
    pub failed_products: Vec<String>,
}

impl From<&BatchOutcome> for SyncResponse {
    fn from(outcome: &BatchOutcome) -> Self {
        Self {
            success: outcome.is_success(),
            message: outcome.summary(),
            updated_products: outcome.succeeded_ids.clone(),
            failed_products: outcome.failed_ids.clone(),
        }
    }
}
