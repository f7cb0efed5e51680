//! Incremental progress reporting for long runs

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use super::outcome::FailureCount;

/// Snapshot emitted after each chunk
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub run_id: Uuid,
    /// 1-based chunk number
    pub batch_number: usize,
    pub total_batches: usize,
    pub processed_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    /// Concurrency the next chunk will use
    pub max_concurrent: usize,
    pub failures: Vec<FailureCount>,
}

/// Receiver of progress snapshots. Must not block.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, progress: &BatchProgress);
}

impl<F> ProgressReporter for F
where
    F: Fn(&BatchProgress) + Send + Sync,
{
    fn report(&self, progress: &BatchProgress) {
        self(progress)
    }
}

/// Forwards snapshots into a channel; a closed receiver is ignored
#[derive(Debug, Clone)]
pub struct ChannelProgress(pub UnboundedSender<BatchProgress>);

impl ProgressReporter for ChannelProgress {
    fn report(&self, progress: &BatchProgress) {
        let _ = self.0.send(progress.clone());
    }
}

/// Discards every snapshot
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _progress: &BatchProgress) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn snapshot(batch_number: usize) -> BatchProgress {
        BatchProgress {
            run_id: Uuid::nil(),
            batch_number,
            total_batches: 2,
            processed_count: batch_number * 10,
            success_count: batch_number * 10,
            failure_count: 0,
            max_concurrent: 2,
            failures: Vec::new(),
        }
    }

    #[test]
    fn test_closure_reporter() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let reporter = move |p: &BatchProgress| sink.lock().unwrap().push(p.batch_number);

        reporter.report(&snapshot(1));
        reporter.report(&snapshot(2));
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_channel_reporter_survives_closed_receiver() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let reporter = ChannelProgress(tx);

        reporter.report(&snapshot(1));
        assert_eq!(rx.recv().await.unwrap().batch_number, 1);

        drop(rx);
        reporter.report(&snapshot(2));
    }

    #[test]
    fn test_progress_serializes_camel_case() {
        let json = serde_json::to_value(snapshot(1)).unwrap();
        assert_eq!(json["batchNumber"], 1);
        assert_eq!(json["totalBatches"], 2);
        assert_eq!(json["maxConcurrent"], 2);
    }
}
