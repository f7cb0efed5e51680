//! Bulk synchronization engine
//!
//! Drives channel and attribute changes across many catalog entities on top
//! of the shared API resilience stack.

pub mod classifier;
pub mod orchestrator;
pub mod outcome;
pub mod progress;
pub mod request;

pub use classifier::{AttributeClassifier, MapClassifier, NoClassifier};
pub use orchestrator::{DesiredState, Orchestrator, RunOptions};
pub use outcome::{BatchOutcome, EntityFailure, FailureCount};
pub use progress::{BatchProgress, ChannelProgress, NoProgress, ProgressReporter};
pub use request::{SyncRequest, SyncResponse};
