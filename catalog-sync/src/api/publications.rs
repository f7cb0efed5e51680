//! Publication name → id cache
//!
//! The list of remote publications is shared by every run in the process.
//! It is fetched through the executor with cursor pagination and replaced
//! wholesale once its TTL has elapsed.

use arc_swap::ArcSwapOption;
use log::{debug, info};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use super::client::CommerceClient;
use super::error::ApiError;
use super::models::{ChannelSet, Publication};
use super::query::{Argument, Document, Field};

pub const DEFAULT_PUBLICATION_TTL: Duration = Duration::from_secs(10 * 60);
const PAGE_SIZE: i64 = 50;

#[derive(Debug)]
struct Snapshot {
    publications: Arc<Vec<Publication>>,
    fetched_at: Instant,
}

/// Known publications split against a desired [`ChannelSet`]
#[derive(Debug, Clone)]
pub struct ChannelResolution {
    /// Every publication the remote knows
    pub publications: Arc<Vec<Publication>>,
    /// Desired channels that matched a publication
    pub recognized: Vec<Publication>,
    /// Desired channel names with no matching publication
    pub unknown: Vec<String>,
}

pub struct PublicationCache {
    client: CommerceClient,
    ttl: Duration,
    snapshot: ArcSwapOption<Snapshot>,
    refresh: Mutex<()>,
}

impl PublicationCache {
    pub fn new(client: CommerceClient) -> Self {
        Self::with_ttl(client, DEFAULT_PUBLICATION_TTL)
    }

    pub fn with_ttl(client: CommerceClient, ttl: Duration) -> Self {
        Self {
            client,
            ttl,
            snapshot: ArcSwapOption::empty(),
            refresh: Mutex::new(()),
        }
    }

    fn fresh(&self) -> Option<Arc<Vec<Publication>>> {
        self.snapshot
            .load_full()
            .filter(|snapshot| snapshot.fetched_at.elapsed() < self.ttl)
            .map(|snapshot| Arc::clone(&snapshot.publications))
    }

    /// Cached publications, fetching them when missing or stale
    pub async fn publications(&self) -> Result<Arc<Vec<Publication>>, ApiError> {
        if let Some(publications) = self.fresh() {
            return Ok(publications);
        }

        // One fetch at a time; later callers pick up the new snapshot
        let _guard = self.refresh.lock().await;
        if let Some(publications) = self.fresh() {
            return Ok(publications);
        }

        let publications = Arc::new(self.fetch_all().await?);
        info!("Publication cache: loaded {} publication(s)", publications.len());
        self.snapshot.store(Some(Arc::new(Snapshot {
            publications: Arc::clone(&publications),
            fetched_at: Instant::now(),
        })));
        Ok(publications)
    }

    /// Match desired channel names against known publications
    pub async fn resolve(&self, desired: &ChannelSet) -> Result<ChannelResolution, ApiError> {
        let publications = self.publications().await?;

        let recognized: Vec<Publication> = publications
            .iter()
            .filter(|publication| desired.contains(&publication.name))
            .cloned()
            .collect();
        let unknown: Vec<String> = desired
            .names()
            .filter(|name| {
                !recognized
                    .iter()
                    .any(|p| p.name.trim().to_lowercase() == *name)
            })
            .map(str::to_string)
            .collect();

        if !unknown.is_empty() {
            debug!("Ignoring unknown channel(s): {}", unknown.join(", "));
        }

        Ok(ChannelResolution {
            publications,
            recognized,
            unknown,
        })
    }

    /// Drop the cached list; the next call refetches
    pub fn invalidate(&self) {
        self.snapshot.store(None);
    }

    async fn fetch_all(&self) -> Result<Vec<Publication>, ApiError> {
        let mut publications = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut doc = Document::query("Publications");
            let after = doc.bind("after", "String", json!(cursor));
            let request = doc
                .field(
                    Field::new("publications")
                        .arg("first", Argument::Int(PAGE_SIZE))
                        .arg("after", after)
                        .select(Field::new("pageInfo").scalars(["hasNextPage", "endCursor"]))
                        .select(Field::new("nodes").scalars(["id", "name"])),
                )
                .into_request();

            let response = self.client.graphql(&request).await?;
            let page = &response.data["publications"];
            let nodes = page["nodes"].as_array().ok_or_else(|| {
                ApiError::Decode("publications response has no nodes".to_string())
            })?;

            for node in nodes {
                if let (Some(id), Some(name)) = (node["id"].as_str(), node["name"].as_str()) {
                    publications.push(Publication {
                        id: id.to_string(),
                        name: name.to_string(),
                    });
                }
            }

            let has_next = page["pageInfo"]["hasNextPage"].as_bool().unwrap_or(false);
            match page["pageInfo"]["endCursor"].as_str() {
                Some(end) if has_next => cursor = Some(end.to_string()),
                _ => break,
            }
        }

        Ok(publications)
    }
}

impl std::fmt::Debug for PublicationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicationCache")
            .field("ttl", &self.ttl)
            .field("cached", &self.snapshot.load().is_some())
            .finish_non_exhaustive()
    }
}

/// Response body for one page of publications
#[cfg(test)]
pub(crate) fn publications_page(
    nodes: &[(&str, &str)],
    end_cursor: Option<&str>,
) -> serde_json::Value {
    let nodes: Vec<serde_json::Value> = nodes
        .iter()
        .map(|(id, name)| json!({"id": id, "name": name}))
        .collect();
    json!({"data": {"publications": {
        "pageInfo": {"hasNextPage": end_cursor.is_some(), "endCursor": end_cursor},
        "nodes": nodes
    }}})
}
