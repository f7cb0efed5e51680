//! Aggregated result of a bulk run

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::api::error::{ApiError, ErrorKind};

/// Failure of a single entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityFailure {
    pub id: String,
    pub error_type: ErrorKind,
    pub message: String,
}

/// Distinct failure cause with its number of occurrences
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureCount {
    pub error_type: ErrorKind,
    pub message: String,
    pub count: usize,
}

/// Final accounting of a run. Every input id lands in exactly one of
/// `succeeded_ids` or `failed_ids`, in input order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub run_id: Uuid,
    pub succeeded_ids: Vec<String>,
    pub failed_ids: Vec<String>,
    pub failures: Vec<EntityFailure>,
    /// Error description → number of entities that failed with it
    pub failure_reasons: BTreeMap<String, usize>,
    /// The run stopped early (deadline); unprocessed ids are in `failed_ids`
    pub interrupted: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchOutcome {
    pub fn is_success(&self) -> bool {
        self.failed_ids.is_empty()
    }

    pub fn total(&self) -> usize {
        self.succeeded_ids.len() + self.failed_ids.len()
    }

    /// Failures grouped by cause, most frequent first
    pub fn failure_breakdown(&self) -> Vec<FailureCount> {
        breakdown(self.failures.iter())
    }

    /// Human-readable summary including the failure breakdown
    pub fn summary(&self) -> String {
        let mut summary = if self.is_success() {
            format!("Updated {} product(s)", self.succeeded_ids.len())
        } else {
            let causes: Vec<String> = self
                .failure_breakdown()
                .iter()
                .map(|f| format!("{} ({})", f.message, f.count))
                .collect();
            format!(
                "Updated {} of {} product(s); {} failed: {}",
                self.succeeded_ids.len(),
                self.total(),
                self.failed_ids.len(),
                causes.join(", ")
            )
        };
        if self.interrupted {
            summary.push_str(" [interrupted]");
        }
        summary
    }
}

fn breakdown<'a>(failures: impl Iterator<Item = &'a EntityFailure>) -> Vec<FailureCount> {
    let mut counts: BTreeMap<(ErrorKind, &str), usize> = BTreeMap::new();
    for failure in failures {
        *counts
            .entry((failure.error_type, failure.message.as_str()))
            .or_default() += 1;
    }

    let mut grouped: Vec<FailureCount> = counts
        .into_iter()
        .map(|((error_type, message), count)| FailureCount {
            error_type,
            message: message.to_string(),
            count,
        })
        .collect();
    grouped.sort_by(|a, b| b.count.cmp(&a.count));
    grouped
}

#[derive(Debug)]
struct Slot {
    raw: String,
    result: Option<Result<(), EntityFailure>>,
}

/// Incremental builder; the outcome is immutable once finished
#[derive(Debug)]
pub(crate) struct OutcomeBuilder {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    slots: Vec<Slot>,
    succeeded: usize,
    failed: usize,
}

impl OutcomeBuilder {
    pub(crate) fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            slots: Vec::new(),
            succeeded: 0,
            failed: 0,
        }
    }

    /// Register an input id, returning its slot
    pub(crate) fn add(&mut self, raw: impl Into<String>) -> usize {
        self.slots.push(Slot {
            raw: raw.into(),
            result: None,
        });
        self.slots.len() - 1
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Record a success; the first result recorded for a slot wins
    pub(crate) fn succeed(&mut self, slot: usize) {
        if let Some(entry) = self.slots.get_mut(slot).filter(|s| s.result.is_none()) {
            entry.result = Some(Ok(()));
            self.succeeded += 1;
        }
    }

    pub(crate) fn fail(&mut self, slot: usize, error: &ApiError) {
        if let Some(entry) = self.slots.get_mut(slot).filter(|s| s.result.is_none()) {
            entry.result = Some(Err(EntityFailure {
                id: entry.raw.clone(),
                error_type: error.kind(),
                message: error.to_string(),
            }));
            self.failed += 1;
        }
    }

    pub(crate) fn success_count(&self) -> usize {
        self.succeeded
    }

    pub(crate) fn failure_count(&self) -> usize {
        self.failed
    }

    pub(crate) fn processed_count(&self) -> usize {
        self.succeeded + self.failed
    }

    pub(crate) fn failure_breakdown(&self) -> Vec<FailureCount> {
        breakdown(self.slots.iter().filter_map(|slot| match &slot.result {
            Some(Err(failure)) => Some(failure),
            _ => None,
        }))
    }

    /// Close the run. Slots never reached are failed as past the deadline.
    pub(crate) fn finish(self, interrupted: bool) -> BatchOutcome {
        let mut succeeded_ids = Vec::with_capacity(self.succeeded);
        let mut failed_ids = Vec::with_capacity(self.slots.len() - self.succeeded);
        let mut failures = Vec::with_capacity(failed_ids.capacity());
        let mut failure_reasons = BTreeMap::new();

        for slot in self.slots {
            let result = slot.result.unwrap_or_else(|| {
                Err(EntityFailure {
                    id: slot.raw.clone(),
                    error_type: ErrorKind::Deadline,
                    message: ApiError::DeadlineExceeded.to_string(),
                })
            });
            match result {
                Ok(()) => succeeded_ids.push(slot.raw),
                Err(failure) => {
                    *failure_reasons.entry(failure.message.clone()).or_insert(0) += 1;
                    failed_ids.push(slot.raw);
                    failures.push(failure);
                }
            }
        }

        BatchOutcome {
            run_id: self.run_id,
            succeeded_ids,
            failed_ids,
            failures,
            failure_reasons,
            interrupted,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}
