//! Error taxonomy for remote API calls

use thiserror::Error;

/// Failure of a single remote call after the executor's retry policy ran
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    /// The remote reported rate-limit exhaustion
    #[error("throttled: {0}")]
    Throttled(String),

    /// Timeout, aborted connection or 5xx
    #[error("transient failure: {0}")]
    Transient(String),

    /// 4xx other than throttling
    #[error("HTTP {status}: {message}")]
    Client { status: u16, message: String },

    /// Top-level GraphQL error without usable data
    #[error("remote error: {0}")]
    Remote(String),

    /// Field-level error reported for one mutation
    #[error("mutation rejected: {0}")]
    Mutation(String),

    /// Local input could not be turned into a request
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("deadline exceeded before completion")]
    DeadlineExceeded,
}

/// Coarse classification used for retry decisions and failure summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Throttled,
    Transient,
    Client,
    Deadline,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Throttled => "throttled",
            Self::Transient => "transient",
            Self::Client => "client",
            Self::Deadline => "deadline",
        }
    }
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Throttled(_) => ErrorKind::Throttled,
            Self::Transient(_) => ErrorKind::Transient,
            Self::DeadlineExceeded => ErrorKind::Deadline,
            Self::Client { .. }
            | Self::Remote(_)
            | Self::Mutation(_)
            | Self::InvalidInput(_)
            | Self::Decode(_) => ErrorKind::Client,
        }
    }

    pub fn is_throttled(&self) -> bool {
        matches!(self, Self::Throttled(_))
    }
}
