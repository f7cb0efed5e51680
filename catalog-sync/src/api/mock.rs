//! Scripted transport for unit tests

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::client::{ByteStream, Transport, TransportError, TransportResponse};
use super::query::GraphqlRequest;

type Handler =
    dyn Fn(&GraphqlRequest) -> Result<TransportResponse, TransportError> + Send + Sync + 'static;

/// Transport answering every request through a handler closure
pub struct MockTransport {
    handler: Box<Handler>,
    calls: AtomicUsize,
    requests: Mutex<Vec<GraphqlRequest>>,
    downloads: Mutex<HashMap<String, Vec<Result<Bytes, TransportError>>>>,
}

impl MockTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&GraphqlRequest) -> Result<TransportResponse, TransportError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            downloads: Mutex::new(HashMap::new()),
        }
    }

    /// Serve `chunks` as the body of `url`
    pub fn with_download(self, url: &str, chunks: &[&str]) -> Self {
        let chunks = chunks
            .iter()
            .map(|c| Ok(Bytes::from(c.to_string())))
            .collect();
        self.downloads
            .lock()
            .unwrap()
            .insert(url.to_string(), chunks);
        self
    }

    /// Serve `chunks` for `url`, then fail the body with `error`
    pub fn with_broken_download(self, url: &str, chunks: &[&str], error: TransportError) -> Self {
        let this = self.with_download(url, chunks);
        if let Some(body) = this.downloads.lock().unwrap().get_mut(url) {
            body.push(Err(error));
        }
        this
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GraphqlRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn post_graphql(
        &self,
        request: &GraphqlRequest,
        _timeout: Duration,
    ) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        (self.handler)(request)
    }

    async fn download(&self, url: &str, _timeout: Duration) -> Result<ByteStream, TransportError> {
        let chunks = self
            .downloads
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or(TransportError::Status(404))?;
        Ok(futures::stream::iter(chunks).boxed())
    }
}

pub fn ok(body: Value) -> Result<TransportResponse, TransportError> {
    Ok(TransportResponse::json(200, body))
}

pub fn status(code: u16, body: Value) -> Result<TransportResponse, TransportError> {
    Ok(TransportResponse::json(code, body))
}

/// `(alias, entity gid)` pairs of an aliased mutation request.
///
/// Aliases are `m<N>`; the entity is read from `id_<N>` or from the
/// `ownerId` of the first entry in `metafields_<N>`.
pub fn alias_entities(request: &GraphqlRequest) -> Vec<(String, String)> {
    let mut pairs: Vec<(usize, String)> = request
        .variables
        .iter()
        .filter_map(|(name, value)| {
            if let Some(n) = name.strip_prefix("id_") {
                Some((n.parse().ok()?, value.as_str()?.to_string()))
            } else if let Some(n) = name.strip_prefix("metafields_") {
                let owner = value.get(0)?.get("ownerId")?.as_str()?;
                Some((n.parse().ok()?, owner.to_string()))
            } else {
                None
            }
        })
        .collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(n, entity)| (format!("m{n}"), entity))
        .collect()
}
