//! Adaptive bulk orchestrator
//!
//! Drives a desired-state change across many entities. Ids are processed in
//! fixed-size chunks; each chunk is packed into aliased requests which are
//! dispatched in sub-groups of the controller's current concurrency. After
//! every chunk the success rate feeds the [`AdaptiveConcurrency`] controller
//! and the pacing delays. Chunks run strictly one after another.
//!
//! A single entity's failure never aborts the run. Only setup failures
//! (publication lookup) do, and a caller deadline stops it early with the
//! partial outcome still returned.

use futures::future::join_all;
use log::{debug, error, info, warn};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::time::{Duration, Instant, sleep_until, timeout_at};
use uuid::Uuid;

use super::classifier::{AttributeClassifier, NoClassifier};
use super::outcome::{BatchOutcome, OutcomeBuilder};
use super::progress::{BatchProgress, ProgressReporter};
use crate::api::bulk::{AsyncOperationHandle, BulkOperationTracker};
use crate::api::client::CommerceClient;
use crate::api::error::ApiError;
use crate::api::models::{AttributeSet, ChannelSet, EntityId, Publication};
use crate::api::operations::{BatchRequestBuilder, BatchResponseParser, EntityPlan, MutationGroup};
use crate::api::publications::PublicationCache;
use crate::api::query::{GraphqlRequest, GraphqlResponse};
use crate::api::resilience::{AdaptiveConcurrency, ResilienceConfig};

/// Target state to drive every entity towards
#[derive(Debug, Clone, PartialEq)]
pub enum DesiredState {
    /// Published exactly on these channels among the known publications
    Channels(ChannelSet),
    /// These marketplace attributes set (blank values skipped)
    Attributes(AttributeSet),
}

impl fmt::Display for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channels(channels) => {
                write!(f, "channels [{}]", channels.names().collect::<Vec<_>>().join(", "))
            }
            Self::Attributes(attributes) => {
                let keys: Vec<&str> = attributes.non_blank().map(|(k, _)| k.metafield_key()).collect();
                write!(f, "attributes [{}]", keys.join(", "))
            }
        }
    }
}

/// Per-run options
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Stop dispatching at this instant; unfinished ids are reported failed
    pub deadline: Option<Instant>,
    pub progress: Option<Arc<dyn ProgressReporter>>,
}

impl RunOptions {
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_progress(mut self, reporter: impl ProgressReporter + 'static) -> Self {
        self.progress = Some(Arc::new(reporter));
        self
    }

    fn report(&self, progress: &BatchProgress) {
        if let Some(reporter) = &self.progress {
            reporter.report(progress);
        }
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Sleep for `delay`, waking early at the deadline
    async fn pause(&self, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        let wake = Instant::now() + delay;
        let wake = self.deadline.map_or(wake, |deadline| wake.min(deadline));
        sleep_until(wake).await;
    }
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("deadline", &self.deadline)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// What a run resolved before dispatching anything
enum Target {
    Channels(Arc<Vec<Publication>>, ChannelSet),
    Attributes(AttributeSet),
}

pub struct Orchestrator {
    client: CommerceClient,
    publications: Arc<PublicationCache>,
    classifier: Arc<dyn AttributeClassifier>,
}

impl Orchestrator {
    pub fn new(client: CommerceClient) -> Self {
        let publications = Arc::new(PublicationCache::new(client.clone()));
        Self {
            client,
            publications,
            classifier: Arc::new(NoClassifier),
        }
    }

    /// Share a publication cache with other orchestrators
    pub fn with_publications(mut self, publications: Arc<PublicationCache>) -> Self {
        self.publications = publications;
        self
    }

    pub fn with_classifier(mut self, classifier: impl AttributeClassifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn client(&self) -> &CommerceClient {
        &self.client
    }

    pub fn publications(&self) -> &Arc<PublicationCache> {
        &self.publications
    }

    fn config(&self) -> &ResilienceConfig {
        self.client.config()
    }

    /// Run without a deadline or progress reporting
    pub async fn run(
        &self,
        entity_ids: &[String],
        desired: &DesiredState,
    ) -> Result<BatchOutcome, ApiError> {
        self.run_with(entity_ids, desired, RunOptions::default()).await
    }

    /// Drive every id to `desired`.
    ///
    /// Returns `Err` only for setup failures; per-entity failures are in the outcome.
    pub async fn run_with(
        &self,
        entity_ids: &[String],
        desired: &DesiredState,
        options: RunOptions,
    ) -> Result<BatchOutcome, ApiError> {
        let run_id = Uuid::new_v4();
        let config = self.config();
        let run_label = if config.monitoring.correlation_ids {
            format!("Run {}", run_id)
        } else {
            "Run".to_string()
        };

        let mut outcome = OutcomeBuilder::new(run_id);
        let work = ingest(entity_ids, &mut outcome);
        info!(
            "{}: {} id(s) ({} unique, {} valid) towards {}",
            run_label,
            entity_ids.len(),
            outcome.len(),
            work.len(),
            desired
        );

        let target = match desired {
            DesiredState::Channels(channels) => {
                let resolution = self.publications.resolve(channels).await.map_err(|e| {
                    error!("{}: cannot enumerate publications: {}", run_label, e);
                    e
                })?;
                if resolution.recognized.is_empty() {
                    warn!(
                        "{}: none of the desired channels are known; entities will be unpublished everywhere",
                        run_label
                    );
                }
                Target::Channels(resolution.publications, channels.clone())
            }
            DesiredState::Attributes(attributes) => Target::Attributes(attributes.clone()),
        };

        let batch_size = config.batch.batch_size.max(1);
        let builder = BatchRequestBuilder::new(config.batch.max_mutations_per_request);
        let mut concurrency = AdaptiveConcurrency::new(config.concurrency.clone());
        let total_batches = work.len().div_ceil(batch_size);
        let mut interrupted = false;

        for (index, chunk) in work.chunks(batch_size).enumerate() {
            let batch_number = index + 1;
            if options.expired() {
                warn!(
                    "{}: deadline reached before chunk {}/{}",
                    run_label, batch_number, total_batches
                );
                interrupted = true;
                break;
            }

            let before = (outcome.success_count(), outcome.failure_count());
            let completed = self
                .run_chunk(chunk, &target, &builder, &concurrency, &options, &mut outcome)
                .await;

            let successes = outcome.success_count() - before.0;
            let failures = outcome.failure_count() - before.1;
            let rate = success_rate(successes, failures);

            info!(
                "{}: chunk {}/{} done, {} ok, {} failed (concurrency {})",
                run_label,
                batch_number,
                total_batches,
                successes,
                failures,
                concurrency.current()
            );

            if !completed {
                warn!("{}: deadline reached during chunk {}", run_label, batch_number);
                interrupted = true;
                options.report(&batch_progress(
                    run_id,
                    batch_number,
                    total_batches,
                    &outcome,
                    &concurrency,
                ));
                break;
            }

            let adjustment = concurrency.record_chunk(rate);
            if adjustment.is_penalty() {
                debug!("{}: penalty pause {:?}", run_label, config.pacing.penalty);
                options.pause(config.pacing.penalty).await;
            }

            options.report(&batch_progress(
                run_id,
                batch_number,
                total_batches,
                &outcome,
                &concurrency,
            ));

            if batch_number < total_batches {
                let delay = config
                    .pacing
                    .chunk
                    .for_rate(rate, config.concurrency.low_success_rate);
                options.pause(delay).await;
            }
        }

        let stats = concurrency.stats();
        debug!(
            "{}: concurrency {} (ceiling {}), {} adjustment(s) over {} chunk(s), rate {:.2}",
            run_label,
            stats.current,
            stats.ceiling,
            stats.increases + stats.decreases,
            stats.chunks_recorded,
            stats.adjustment_rate()
        );

        let outcome = outcome.finish(interrupted);
        if outcome.is_success() {
            info!("{}: {}", run_label, outcome.summary());
        } else {
            warn!("{}: {}", run_label, outcome.summary());
        }
        Ok(outcome)
    }

    /// Process one chunk. Returns false when the deadline cut it short.
    async fn run_chunk(
        &self,
        chunk: &[(usize, EntityId)],
        target: &Target,
        builder: &BatchRequestBuilder,
        concurrency: &AdaptiveConcurrency,
        options: &RunOptions,
        outcome: &mut OutcomeBuilder,
    ) -> bool {
        let slots: HashMap<&EntityId, usize> = chunk.iter().map(|(slot, id)| (id, *slot)).collect();

        let mut plans = Vec::with_capacity(chunk.len());
        match target {
            Target::Channels(publications, channels) => {
                for (_, entity) in chunk {
                    plans.push(EntityPlan::channels(entity, publications, channels));
                }
            }
            Target::Attributes(requested) => {
                let namespace = &self.config().batch.attribute_namespace;
                let classified = join_all(
                    chunk
                        .iter()
                        .map(|(_, entity)| self.classifier.classify(entity, requested)),
                )
                .await;
                for ((slot, entity), attributes) in chunk.iter().zip(classified) {
                    match attributes {
                        Ok(attributes) => {
                            plans.push(EntityPlan::attributes(entity, namespace, &attributes))
                        }
                        Err(e) => outcome.fail(*slot, &e),
                    }
                }
            }
        }

        // Nothing to send: already in the desired state
        for plan in plans.iter().filter(|plan| plan.is_empty()) {
            if let Some(slot) = slots.get(&plan.entity) {
                outcome.succeed(*slot);
            }
        }

        let groups = builder.build(&plans);
        let width = concurrency.current().max(1);
        let sub_groups: Vec<&[MutationGroup]> = groups.chunks(width).collect();
        let pacing = &self.config().pacing;
        let low_rate = self.config().concurrency.low_success_rate;

        for (index, sub_group) in sub_groups.iter().enumerate() {
            if options.expired() {
                return false;
            }

            // Each group races the deadline on its own so finished groups keep their results
            let results = join_all(sub_group.iter().map(|group| async move {
                match options.deadline {
                    Some(deadline) => timeout_at(deadline, self.dispatch(group)).await.ok(),
                    None => Some(self.dispatch(group).await),
                }
            }))
            .await;
            let cut_short = results.iter().any(Option::is_none);

            let mut successes = 0;
            let mut failures = 0;
            for (entity, result) in results.into_iter().flatten().flatten() {
                let Some(slot) = slots.get(&entity).copied() else {
                    continue;
                };
                match result {
                    Ok(()) => {
                        successes += 1;
                        outcome.succeed(slot);
                    }
                    Err(e) => {
                        failures += 1;
                        debug!("{} failed: {}", entity, e);
                        outcome.fail(slot, &e);
                    }
                }
            }

            if cut_short {
                // Abandoned groups leave their entities unresolved
                return false;
            }

            if index + 1 < sub_groups.len() {
                let delay = pacing
                    .sub_group
                    .for_rate(success_rate(successes, failures), low_rate);
                options.pause(delay).await;
            }
        }

        true
    }

    /// Send one aliased request and split the response per entity
    async fn dispatch(&self, group: &MutationGroup) -> Vec<(EntityId, Result<(), ApiError>)> {
        match self.client.graphql(&group.request).await {
            Ok(response) => BatchResponseParser::entity_results(group, &response),
            Err(e) => group
                .entities
                .iter()
                .map(|entity| (entity.clone(), Err(e.clone())))
                .collect(),
        }
    }

    /// Run an arbitrary document under the shared throttling discipline
    pub async fn execute_request(
        &self,
        query: &str,
        variables: Option<Value>,
        retries: Option<u32>,
        timeout: Option<Duration>,
    ) -> Result<GraphqlResponse, ApiError> {
        let request = GraphqlRequest::raw(query, variables);
        self.client.executor().execute(&request, retries, timeout).await
    }

    /// Download a completed bulk job's ids and drive them to `desired`
    pub async fn run_bulk_result(
        &self,
        tracker: &BulkOperationTracker,
        handle: &AsyncOperationHandle,
        desired: &DesiredState,
        options: RunOptions,
    ) -> Result<BatchOutcome, ApiError> {
        let result = tracker.fetch_result(handle).await?;
        if result.truncated {
            warn!(
                "Bulk result for {} was truncated; running the {} id(s) read",
                handle.operation_id,
                result.entity_ids.len()
            );
        }
        let ids: Vec<String> = result.entity_ids.iter().map(ToString::to_string).collect();
        self.run_with(&ids, desired, options).await
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("client", &self.client)
            .field("publications", &self.publications)
            .finish_non_exhaustive()
    }
}

/// Register ids in the outcome, failing malformed ones and collapsing
/// duplicates (first occurrence kept). Returns the dispatchable work.
fn ingest(entity_ids: &[String], outcome: &mut OutcomeBuilder) -> Vec<(usize, EntityId)> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut work = Vec::with_capacity(entity_ids.len());

    for raw in entity_ids {
        match EntityId::product(raw) {
            Ok(id) => {
                if seen.insert(id.as_str().to_string()) {
                    let slot = outcome.add(raw.as_str());
                    work.push((slot, id));
                }
            }
            Err(e) => {
                if seen.insert(raw.trim().to_string()) {
                    let slot = outcome.add(raw.as_str());
                    outcome.fail(slot, &ApiError::InvalidInput(e.to_string()));
                }
            }
        }
    }
    work
}

fn batch_progress(
    run_id: Uuid,
    batch_number: usize,
    total_batches: usize,
    outcome: &OutcomeBuilder,
    concurrency: &AdaptiveConcurrency,
) -> BatchProgress {
    BatchProgress {
        run_id,
        batch_number,
        total_batches,
        processed_count: outcome.processed_count(),
        success_count: outcome.success_count(),
        failure_count: outcome.failure_count(),
        max_concurrent: concurrency.current(),
        failures: outcome.failure_breakdown(),
    }
}

fn success_rate(successes: usize, failures: usize) -> f64 {
    let total = successes + failures;
    if total == 0 {
        1.0
    } else {
        successes as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::TransportError;
    use crate::api::mock::{MockTransport, alias_entities, ok, status};
    use crate::api::models::AttributeKey;
    use crate::api::publications::publications_page;
    use crate::api::resilience::{RateLimiter, ResilienceConfigBuilder, RetryConfig};
    use crate::sync::classifier::MapClassifier;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_config(max_mutations_per_request: usize) -> ResilienceConfig {
        ResilienceConfig::builder()
            .retry_config(RetryConfig {
                jitter: false,
                ..RetryConfig::default()
            })
            .batch_size(10)
            .max_mutations_per_request(max_mutations_per_request)
            .build()
    }

    fn orchestrator(transport: Arc<MockTransport>, config: ResilienceConfig) -> Orchestrator {
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        Orchestrator::new(CommerceClient::new(transport, limiter, config))
    }

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    fn is_publications_query(request: &GraphqlRequest) -> bool {
        request.query.starts_with("query Publications")
    }

    fn one_channel() -> Value {
        publications_page(&[("gid://shopify/Publication/1", "Online Store")], None)
    }

    /// Success payload for every alias of a mutation request
    fn all_ok(request: &GraphqlRequest) -> Value {
        let data: serde_json::Map<String, Value> = alias_entities(request)
            .into_iter()
            .map(|(alias, _)| (alias, json!({"userErrors": []})))
            .collect();
        json!({ "data": data })
    }

    fn online_store() -> DesiredState {
        DesiredState::Channels(ChannelSet::new(["Online Store"]))
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_succeed() {
        let transport = Arc::new(MockTransport::new(|request| {
            if is_publications_query(request) {
                ok(one_channel())
            } else {
                ok(all_ok(request))
            }
        }));
        let orchestrator = orchestrator(transport.clone(), test_config(1));

        let outcome = orchestrator
            .run(&ids(&["1", "2", "3"]), &online_store())
            .await
            .unwrap();

        assert_eq!(outcome.succeeded_ids, vec!["1", "2", "3"]);
        assert!(outcome.failed_ids.is_empty());
        assert!(outcome.is_success());
        // One publication lookup plus one request per entity
        assert_eq!(transport.call_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_then_ok_and_client_error() {
        let throttles = Arc::new(AtomicU32::new(0));
        let counter = throttles.clone();
        let transport = Arc::new(MockTransport::new(move |request| {
            if is_publications_query(request) {
                return ok(one_channel());
            }
            let entities = alias_entities(request);
            if entities.iter().any(|(_, e)| e == "gid://shopify/Product/2") {
                return status(400, json!({"errors": "Bad Request"}));
            }
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                return ok(json!({"errors": [{"message": "Throttled", "extensions": {"code": "THROTTLED"}}]}));
            }
            ok(all_ok(request))
        }));
        let orchestrator = orchestrator(transport.clone(), test_config(1));

        let outcome = orchestrator.run(&ids(&["1", "2"]), &online_store()).await.unwrap();

        assert_eq!(outcome.succeeded_ids, vec!["1"]);
        assert_eq!(outcome.failed_ids, vec!["2"]);
        assert!(!outcome.is_success());
        assert_eq!(outcome.failure_reasons.len(), 1);
        assert_eq!(outcome.failure_reasons.get("HTTP 400: Bad Request"), Some(&1));
        assert!(outcome.summary().contains("HTTP 400: Bad Request (1)"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_attributes_issue_no_calls() {
        let transport = Arc::new(MockTransport::new(|request| ok(all_ok(request))));
        let orchestrator = orchestrator(transport.clone(), test_config(20));
        let blank = AttributeSet::from(crate::api::models::AttributeFields {
            category: Some(String::new()),
            color: Some(String::new()),
            size: Some(String::new()),
            gender: Some(String::new()),
            age_group: Some(String::new()),
        });

        let outcome = orchestrator
            .run(&ids(&["1"]), &DesiredState::Attributes(blank.clone()))
            .await
            .unwrap();
        assert_eq!(outcome.succeeded_ids, vec!["1"]);
        assert!(outcome.failed_ids.is_empty());
        assert_eq!(transport.call_count(), 0);

        let many: Vec<String> = (1..=25).map(|n| n.to_string()).collect();
        let outcome = orchestrator
            .run(&many, &DesiredState::Attributes(blank))
            .await
            .unwrap();
        assert!(outcome.failed_ids.is_empty());
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attribute_run_packs_requests() {
        let transport = Arc::new(MockTransport::new(|request| ok(all_ok(request))));
        let orchestrator = orchestrator(transport.clone(), test_config(5));
        let attributes = AttributeSet::new()
            .with(AttributeKey::Color, "Red")
            .with(AttributeKey::Size, "");

        let many: Vec<String> = (1..=12).map(|n| n.to_string()).collect();
        let outcome = orchestrator
            .run(&many, &DesiredState::Attributes(attributes))
            .await
            .unwrap();

        assert_eq!(outcome.succeeded_ids.len(), 12);
        // Chunks of 10 and 2 ids, five mutations per request: 5 + 5 + 2
        assert_eq!(transport.call_count(), 3);
        let first = &transport.requests()[0];
        let metafields = first.variables["metafields_0"].as_array().unwrap();
        assert_eq!(metafields.len(), 1);
        assert_eq!(metafields[0]["key"], "color");
        assert_eq!(metafields[0]["namespace"], "mm-google-shopping");
    }

    #[tokio::test(start_paused = true)]
    async fn test_partition_invariant() {
        let transport = Arc::new(MockTransport::new(|request| {
            if is_publications_query(request) {
                return ok(one_channel());
            }
            let entities = alias_entities(request);
            let numeric: u64 = entities[0].1.rsplit('/').next().unwrap().parse().unwrap();
            match numeric % 5 {
                0 => status(422, json!({"errors": [{"message": "Unprocessable"}]})),
                3 => Err(TransportError::Connection("reset by peer".into())),
                1 => ok(json!({"data": {"m0": {"userErrors": [{"field": ["id"], "message": "Product not found"}]}}})),
                _ => ok(all_ok(request)),
            }
        }));
        let mut config = test_config(1);
        config.retry.max_retries = 2;
        let orchestrator = orchestrator(transport, config);

        let mut input: Vec<String> = (1..=30).map(|n| n.to_string()).collect();
        input.push("gid://shopify/Product/4".into());
        input.push("abc".into());
        input.push("".into());
        input.push("7".into());

        let outcome = orchestrator.run(&input, &online_store()).await.unwrap();

        let succeeded: HashSet<&String> = outcome.succeeded_ids.iter().collect();
        let failed: HashSet<&String> = outcome.failed_ids.iter().collect();
        assert!(succeeded.is_disjoint(&failed));

        // Duplicates collapse onto their first occurrence
        let expected: HashSet<String> = (1..=30)
            .map(|n| n.to_string())
            .chain(["abc".to_string(), String::new()])
            .collect();
        let union: HashSet<String> = succeeded.union(&failed).map(|s| s.to_string()).collect();
        assert_eq!(union, expected);
        assert_eq!(outcome.total(), 32);

        assert!(failed.contains(&"abc".to_string()));
        assert!(failed.contains(&"5".to_string()));
        assert!(failed.contains(&"3".to_string()));
        assert!(failed.contains(&"1".to_string()));
        assert!(succeeded.contains(&"2".to_string()));
        assert_eq!(
            outcome.failure_reasons.get("mutation rejected: id: Product not found"),
            Some(&6)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_double_charge() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let transport = Arc::new(MockTransport::new(move |request| {
            if is_publications_query(request) {
                return ok(one_channel());
            }
            match counter.fetch_add(1, Ordering::SeqCst) % 4 {
                0 => ok(json!({"errors": [{"message": "Throttled", "extensions": {"code": "THROTTLED"}}]})),
                1 => status(502, Value::String("Bad Gateway".into())),
                _ => ok(all_ok(request)),
            }
        }));
        let orchestrator = orchestrator(transport.clone(), test_config(2));

        let many: Vec<String> = (1..=8).map(|n| n.to_string()).collect();
        let outcome = orchestrator.run(&many, &online_store()).await.unwrap();
        assert_eq!(outcome.total(), 8);

        let stats = orchestrator.client().executor().limiter().stats();
        assert_eq!(stats.acquisitions as usize, transport.call_count());
        assert_eq!(stats.debited as usize, transport.call_count());
        assert!(transport.call_count() > 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_and_concurrency_backoff() {
        let transport = Arc::new(MockTransport::new(|request| {
            if is_publications_query(request) {
                ok(one_channel())
            } else {
                status(400, json!({"errors": "Bad Request"}))
            }
        }));
        let config = ResilienceConfigBuilder::from_config(test_config(1))
            .batch_size(2)
            .build();
        let orchestrator = orchestrator(transport, config);

        let seen: Arc<Mutex<Vec<BatchProgress>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let options =
            RunOptions::default().with_progress(move |p: &BatchProgress| sink.lock().unwrap().push(p.clone()));

        let many: Vec<String> = (1..=8).map(|n| n.to_string()).collect();
        let outcome = orchestrator
            .run_with(&many, &online_store(), options)
            .await
            .unwrap();
        assert_eq!(outcome.failed_ids.len(), 8);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert_eq!(
            seen.iter().map(|p| p.batch_number).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
        assert!(seen.iter().all(|p| p.total_batches == 4));
        assert_eq!(seen[3].processed_count, 8);
        assert_eq!(seen[3].failure_count, 8);
        assert_eq!(seen[0].max_concurrent, 2);
        assert_eq!(seen[1].max_concurrent, 1);
        assert!(seen.iter().all(|p| (1..=3).contains(&p.max_concurrent)));
        assert_eq!(seen[3].failures.len(), 1);
        assert_eq!(seen[3].failures[0].count, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_returns_partial_outcome() {
        let transport = Arc::new(MockTransport::new(|request| {
            if is_publications_query(request) {
                ok(one_channel())
            } else {
                ok(all_ok(request))
            }
        }));
        let config = ResilienceConfigBuilder::from_config(test_config(1))
            .batch_size(1)
            .build();
        let orchestrator = orchestrator(transport, config);

        let options = RunOptions::default().with_timeout(Duration::from_secs(1));
        let outcome = orchestrator
            .run_with(&ids(&["1", "2", "3"]), &online_store(), options)
            .await
            .unwrap();

        assert!(outcome.interrupted);
        assert_eq!(outcome.succeeded_ids, vec!["1"]);
        assert_eq!(outcome.failed_ids, vec!["2", "3"]);
        assert_eq!(
            outcome.failure_reasons.get("deadline exceeded before completion"),
            Some(&2)
        );
    }

    /// Entity 1 succeeds at once; entity 2 stays throttled
    fn second_throttled() -> Arc<MockTransport> {
        Arc::new(MockTransport::new(|request| {
            if is_publications_query(request) {
                return ok(one_channel());
            }
            let entities = alias_entities(request);
            if entities.iter().any(|(_, e)| e == "gid://shopify/Product/2") {
                return ok(json!({"errors": [{"message": "Throttled", "extensions": {"code": "THROTTLED"}}]}));
            }
            ok(all_ok(request))
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_keeps_finished_groups_of_a_sub_group() {
        // Both groups share one sub-group; only the throttled one is pending at the deadline
        let orchestrator = orchestrator(second_throttled(), test_config(1));

        let options = RunOptions::default().with_timeout(Duration::from_secs(3));
        let outcome = orchestrator
            .run_with(&ids(&["1", "2"]), &online_store(), options)
            .await
            .unwrap();

        assert!(outcome.interrupted);
        assert_eq!(outcome.succeeded_ids, vec!["1"]);
        assert_eq!(outcome.failed_ids, vec!["2"]);
        assert_eq!(outcome.failure_reasons.len(), 1);
        assert_eq!(
            outcome.failure_reasons.get("deadline exceeded before completion"),
            Some(&1)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_reports_final_progress() {
        let orchestrator = orchestrator(second_throttled(), test_config(1));

        let seen: Arc<Mutex<Vec<BatchProgress>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let options = RunOptions::default()
            .with_timeout(Duration::from_secs(3))
            .with_progress(move |p: &BatchProgress| sink.lock().unwrap().push(p.clone()));
        let outcome = orchestrator
            .run_with(&ids(&["1", "2"]), &online_store(), options)
            .await
            .unwrap();
        assert!(outcome.interrupted);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].batch_number, 1);
        assert_eq!(seen[0].total_batches, 1);
        assert_eq!(seen[0].processed_count, 1);
        assert_eq!(seen[0].success_count, 1);
        assert_eq!(seen[0].failure_count, 0);
    }

    fn unthrottled_config(batch_size: usize) -> ResilienceConfig {
        ResilienceConfigBuilder::from_config(test_config(1))
            .enable_rate_limiting(false)
            .batch_size(batch_size)
            .build()
    }

    /// Wall time of a run over ids `1..=count`, where the ids in `bad` get a 400
    async fn timed_run(bad: &'static [&'static str], count: usize, batch_size: usize) -> Duration {
        let transport = Arc::new(MockTransport::new(move |request| {
            if is_publications_query(request) {
                return ok(one_channel());
            }
            let entities = alias_entities(request);
            let numeric = entities[0].1.rsplit('/').next().unwrap_or_default();
            if bad.iter().any(|b| *b == numeric) {
                status(400, json!({"errors": "Bad Request"}))
            } else {
                ok(all_ok(request))
            }
        }));
        let orchestrator = orchestrator(transport, unthrottled_config(batch_size));
        let input: Vec<String> = (1..=count).map(|n| n.to_string()).collect();

        let start = Instant::now();
        orchestrator.run(&input, &online_store()).await.unwrap();
        start.elapsed()
    }

    fn assert_elapsed(elapsed: Duration, secs: u64) {
        let expected = Duration::from_secs(secs);
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(100),
            "expected {:?}, took {:?}",
            expected,
            elapsed
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunk_delay_follows_success_rate() {
        // Three clean chunks: two 2s gaps, none after the last
        assert_elapsed(timed_run(&[], 3, 1).await, 4);
        // Half of each chunk fails: one 5s gap
        assert_elapsed(timed_run(&["2", "4"], 4, 2).await, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_penalty_after_failure_streak() {
        // 10s gap, then the second failing chunk drops concurrency: 5s penalty plus 10s gap
        assert_elapsed(timed_run(&["1", "2", "3"], 3, 1).await, 25);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sub_group_delay_follows_success_rate() {
        // One chunk of four groups split into two sub-groups of two
        assert_elapsed(timed_run(&[], 4, 4).await, 1);
        assert_elapsed(timed_run(&["1"], 4, 4).await, 2);
        assert_elapsed(timed_run(&["1", "2"], 4, 4).await, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_channels_unpublish_everywhere() {
        let transport = Arc::new(MockTransport::new(|request| {
            if is_publications_query(request) {
                ok(one_channel())
            } else {
                ok(all_ok(request))
            }
        }));
        let orchestrator = orchestrator(transport.clone(), test_config(5));

        let desired = DesiredState::Channels(ChannelSet::new(["Pinterest"]));
        let outcome = orchestrator.run(&ids(&["1"]), &desired).await.unwrap();

        assert!(outcome.is_success());
        let mutation = &transport.requests()[1];
        assert!(mutation.query.contains("m0: publishableUnpublish"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_publication_failure_aborts_run() {
        let transport = Arc::new(MockTransport::new(|_| {
            status(403, json!({"errors": "Forbidden"}))
        }));
        let orchestrator = orchestrator(transport.clone(), test_config(5));

        let err = orchestrator.run(&ids(&["1", "2"]), &online_store()).await.unwrap_err();
        assert!(matches!(err, ApiError::Client { status: 403, .. }));
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_classifier_fills_blank_attributes() {
        let transport = Arc::new(MockTransport::new(|request| ok(all_ok(request))));
        let entity = EntityId::product("1").unwrap();
        let orchestrator = orchestrator(transport.clone(), test_config(5)).with_classifier(
            MapClassifier::new().insert(entity, AttributeSet::new().with(AttributeKey::Gender, "male")),
        );

        let outcome = orchestrator
            .run(&ids(&["1", "2"]), &DesiredState::Attributes(AttributeSet::new()))
            .await
            .unwrap();

        assert_eq!(outcome.succeeded_ids, vec!["1", "2"]);
        assert_eq!(transport.call_count(), 1);
        let request = &transport.requests()[0];
        assert_eq!(request.variables["metafields_0"][0]["key"], "gender");
        assert_eq!(request.variables["metafields_0"][0]["value"], "male");
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_request_passthrough() {
        let transport = Arc::new(MockTransport::new(|request| {
            assert_eq!(request.variables["first"], json!(5));
            ok(json!({"data": {"products": {"nodes": []}}}))
        }));
        let orchestrator = orchestrator(transport, test_config(5));

        let response = orchestrator
            .execute_request(
                "query($first: Int!) { products(first: $first) { nodes { id } } }",
                Some(json!({"first": 5})),
                Some(2),
                Some(Duration::from_secs(5)),
            )
            .await
            .unwrap();
        assert!(response.data["products"]["nodes"].is_array());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_bulk_result() {
        let url = "https://storage.example.com/r.jsonl";
        let transport = Arc::new(
            MockTransport::new(|request| {
                if is_publications_query(request) {
                    ok(one_channel())
                } else {
                    ok(all_ok(request))
                }
            })
            .with_download(
                url,
                &["{\"id\":\"gid://shopify/Product/10\"}\n{\"id\":\"gid://shopify/Product/11\"}\n"],
            ),
        );
        let orchestrator = orchestrator(transport.clone(), test_config(5));
        let tracker = BulkOperationTracker::new(orchestrator.client().clone());
        let handle = AsyncOperationHandle {
            operation_id: "gid://shopify/BulkOperation/1".into(),
            status: crate::api::bulk::BulkStatus::Completed,
            result_location: Some(url.into()),
            object_count: Some(2),
            error_code: None,
        };

        let outcome = orchestrator
            .run_bulk_result(&tracker, &handle, &online_store(), RunOptions::default())
            .await
            .unwrap();
        assert_eq!(
            outcome.succeeded_ids,
            vec!["gid://shopify/Product/10", "gid://shopify/Product/11"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_bulk_result_after_interrupted_download() {
        let url = "https://storage.example.com/r.jsonl";
        let transport = Arc::new(
            MockTransport::new(|request| {
                if is_publications_query(request) {
                    ok(one_channel())
                } else {
                    ok(all_ok(request))
                }
            })
            .with_broken_download(
                url,
                &["{\"id\":\"gid://shopify/Product/10\"}\n{\"id\":\"gid://shopify/Product/11\"}\n{\"id\":"],
                TransportError::Timeout(Duration::from_secs(300)),
            ),
        );
        let orchestrator = orchestrator(transport.clone(), test_config(5));
        let tracker = BulkOperationTracker::new(orchestrator.client().clone());
        let handle = AsyncOperationHandle {
            operation_id: "gid://shopify/BulkOperation/2".into(),
            status: crate::api::bulk::BulkStatus::Completed,
            result_location: Some(url.into()),
            object_count: Some(3),
            error_code: None,
        };

        let outcome = orchestrator
            .run_bulk_result(&tracker, &handle, &online_store(), RunOptions::default())
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(
            outcome.succeeded_ids,
            vec!["gid://shopify/Product/10", "gid://shopify/Product/11"]
        );
        // Publication lookup plus one packed mutation
        assert_eq!(transport.call_count(), 2);
    }
}
