//! Bulk async-operation tracker
//!
//! Whole-catalog reads run as server-side bulk jobs: a query is submitted
//! once, polled by the caller until it leaves the running state, and its
//! newline-delimited result file is streamed back into entity ids.

use futures::StreamExt;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::time::Duration;

use super::client::CommerceClient;
use super::error::ApiError;
use super::models::{EntityId, EntityKind};
use super::query::{Document, Field, GraphqlResponse};

/// Lifecycle of a bulk job as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BulkStatus {
    Running,
    Completed,
    Failed,
}

impl BulkStatus {
    /// Map the remote's status string (`CREATED`, `RUNNING`, `COMPLETED`, ...)
    pub fn from_remote(status: &str) -> Self {
        match status {
            "CREATED" | "RUNNING" | "CANCELING" => Self::Running,
            "COMPLETED" => Self::Completed,
            _ => Self::Failed,
        }
    }
}

/// Handle to a submitted bulk job
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncOperationHandle {
    pub operation_id: String,
    pub status: BulkStatus,
    /// Download location of the result file; set only once completed
    pub result_location: Option<String>,
    pub object_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl AsyncOperationHandle {
    /// Handle for a job known only by id, to be refreshed with `poll`
    pub fn pending(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            status: BulkStatus::Running,
            result_location: None,
            object_count: None,
            error_code: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == BulkStatus::Running
    }

    fn from_node(node: &Value) -> Result<Self, ApiError> {
        let operation_id = node["id"]
            .as_str()
            .ok_or_else(|| ApiError::Decode("bulk operation has no id".to_string()))?
            .to_string();
        let status = BulkStatus::from_remote(node["status"].as_str().unwrap_or_default());

        let object_count = match &node["objectCount"] {
            Value::String(count) => count.parse().ok(),
            other => other.as_u64(),
        };

        // The remote may expose a url early; only trust it once completed
        let result_location = match status {
            BulkStatus::Completed => node["url"].as_str().map(str::to_string),
            _ => None,
        };

        Ok(Self {
            operation_id,
            status,
            result_location,
            object_count,
            error_code: node["errorCode"].as_str().map(str::to_string),
        })
    }
}

/// Entity ids extracted from a bulk result file
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResult {
    pub entity_ids: Vec<EntityId>,
    /// Non-empty lines read
    pub total_lines: usize,
    /// Lines that were not valid records
    pub skipped_lines: usize,
    /// Nested child rows (carrying `__parentId`), not entities themselves
    pub child_records: usize,
    /// The download broke off before the end of the file
    pub truncated: bool,
}

pub struct BulkOperationTracker {
    client: CommerceClient,
    download_timeout: Duration,
}

impl BulkOperationTracker {
    pub fn new(client: CommerceClient) -> Self {
        let download_timeout = client.config().batch.download_timeout;
        Self {
            client,
            download_timeout,
        }
    }

    /// Start a bulk query job
    pub async fn submit(&self, query: &str) -> Result<AsyncOperationHandle, ApiError> {
        let mut doc = Document::mutation("BulkSubmit");
        let query_arg = doc.bind("query", "String!", json!(query));
        let request = doc
            .field(
                Field::new("bulkOperationRunQuery")
                    .arg("query", query_arg)
                    .select(Field::new("bulkOperation").scalars([
                        "id",
                        "status",
                        "errorCode",
                        "objectCount",
                        "url",
                    ]))
                    .select(Field::new("userErrors").scalars(["field", "message"])),
            )
            .into_request();

        let response = self.client.graphql(&request).await?;
        let payload = root_payload(&response, "bulkOperationRunQuery")?;

        let user_errors: Vec<&str> = payload["userErrors"]
            .as_array()
            .map(|errors| errors.iter().filter_map(|e| e["message"].as_str()).collect())
            .unwrap_or_default();
        if !user_errors.is_empty() {
            return Err(ApiError::Mutation(user_errors.join("; ")));
        }

        let handle = AsyncOperationHandle::from_node(&payload["bulkOperation"])?;
        info!("Submitted bulk operation {}", handle.operation_id);
        Ok(handle)
    }

    /// Fetch the job's current status. A running job is not an error.
    pub async fn poll(
        &self,
        handle: &AsyncOperationHandle,
    ) -> Result<AsyncOperationHandle, ApiError> {
        let mut doc = Document::query("BulkStatus");
        let id = doc.bind("id", "ID!", json!(handle.operation_id));
        let request = doc
            .field(
                Field::new("node").arg("id", id).select(
                    Field::inline_fragment("BulkOperation").scalars([
                        "id",
                        "status",
                        "errorCode",
                        "objectCount",
                        "url",
                    ]),
                ),
            )
            .into_request();

        let response = self.client.graphql(&request).await?;
        let node = &response.data["node"];
        if node.is_null() {
            return Err(ApiError::Remote(format!(
                "bulk operation {} not found",
                handle.operation_id
            )));
        }

        let updated = AsyncOperationHandle::from_node(node)?;
        debug!(
            "Bulk operation {} is {:?} ({} objects)",
            updated.operation_id,
            updated.status,
            updated.object_count.unwrap_or(0)
        );
        Ok(updated)
    }

    /// Download and parse the result of a completed job.
    ///
    /// Malformed lines are logged and skipped; a stream that breaks off
    /// midway returns what was read so far, flagged `truncated`.
    pub async fn fetch_result(&self, handle: &AsyncOperationHandle) -> Result<BulkResult, ApiError> {
        if handle.status != BulkStatus::Completed {
            return Err(ApiError::InvalidInput(format!(
                "bulk operation {} is {:?}, not completed",
                handle.operation_id, handle.status
            )));
        }

        let Some(url) = handle.result_location.as_deref() else {
            // A job that matched nothing completes without a file
            if handle.object_count == Some(0) {
                return Ok(BulkResult::default());
            }
            return Err(ApiError::InvalidInput(format!(
                "bulk operation {} has no result location",
                handle.operation_id
            )));
        };

        let mut stream = self
            .client
            .transport()
            .download(url, self.download_timeout)
            .await
            .map_err(|e| ApiError::Transient(format!("result download failed: {e}")))?;

        let mut parser = ResultParser::default();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    buffer.extend_from_slice(&bytes);
                    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=pos).collect();
                        parser.push_line(&line);
                    }
                }
                Err(e) => {
                    warn!(
                        "Bulk result download for {} interrupted after {} line(s): {}",
                        handle.operation_id, parser.result.total_lines, e
                    );
                    parser.result.truncated = true;
                    break;
                }
            }
        }

        if !parser.result.truncated && !buffer.is_empty() {
            parser.push_line(&buffer);
        }

        let result = parser.result;
        info!(
            "Bulk operation {}: {} entity id(s) from {} line(s), {} skipped",
            handle.operation_id,
            result.entity_ids.len(),
            result.total_lines,
            result.skipped_lines
        );
        Ok(result)
    }
}

fn root_payload<'a>(response: &'a GraphqlResponse, key: &str) -> Result<&'a Value, ApiError> {
    let payload = &response.data[key];
    if payload.is_null() {
        let errors = response.error_summary();
        return Err(if errors.is_empty() {
            ApiError::Decode(format!("response has no {key}"))
        } else {
            ApiError::Remote(errors)
        });
    }
    Ok(payload)
}

#[derive(Default)]
struct ResultParser {
    result: BulkResult,
}

impl ResultParser {
    fn push_line(&mut self, raw: &[u8]) {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        self.result.total_lines += 1;
        let line_number = self.result.total_lines;

        let record: Value = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(e) => {
                warn!("Skipping malformed bulk result line {}: {}", line_number, e);
                self.result.skipped_lines += 1;
                return;
            }
        };

        if record.get("__parentId").is_some() {
            self.result.child_records += 1;
            return;
        }

        match record["id"].as_str().map(|id| EntityId::parse(id, EntityKind::Product)) {
            Some(Ok(id)) => self.result.entity_ids.push(id),
            Some(Err(e)) => {
                warn!("Skipping bulk result line {}: {}", line_number, e);
                self.result.skipped_lines += 1;
            }
            None => {
                warn!("Skipping bulk result line {}: record has no id", line_number);
                self.result.skipped_lines += 1;
            }
        }
    }
}
