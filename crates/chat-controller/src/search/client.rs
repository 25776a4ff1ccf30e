//! HTTP client for an Elasticsearch-compatible search backend.
//!
//! Talks the standard document APIs: index creation, `_bulk` NDJSON
//! upserts, and single-document deletes. All operations are idempotent
//! so the synchronizer can safely replay batches after a crash.

use async_trait::async_trait;
use common::types::MessageId;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::errors::ChatError;
use crate::search::{IndexDocument, IndexOutcome, SearchIndex};

/// Default index name for chat messages.
pub const MESSAGE_INDEX: &str = "parley-messages";

/// Request timeout for index operations.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Elasticsearch-compatible [`SearchIndex`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSearchIndex {
    http: reqwest::Client,
    base_url: String,
    index: String,
}

impl HttpSearchIndex {
    /// Create a client against the given backend base URL.
    pub fn new(base_url: &str) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ChatError::Config(format!("Failed to build search client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            index: MESSAGE_INDEX.to_string(),
        })
    }

    /// Override the index name (for tests against a shared backend).
    #[must_use]
    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = index.into();
        self
    }
}

#[async_trait]
impl SearchIndex for HttpSearchIndex {
    #[instrument(skip_all, fields(index = %self.index))]
    async fn ensure_index(&self) -> Result<(), ChatError> {
        let url = format!("{}/{}", self.base_url, self.index);
        let response = self
            .http
            .put(&url)
            .json(&serde_json::json!({
                "mappings": {
                    "properties": {
                        "message_id": { "type": "long" },
                        "room_id": { "type": "keyword" },
                        "sender_id": { "type": "keyword" },
                        "kind": { "type": "keyword" },
                        "body": { "type": "text" },
                        "created_at": { "type": "date" }
                    }
                }
            }))
            .send()
            .await
            .map_err(index_err)?;

        match response.status() {
            status if status.is_success() => {
                debug!(target: "chat.search", index = %self.index, "Index created");
                Ok(())
            }
            StatusCode::BAD_REQUEST => {
                // Already-exists comes back as a 400 with a typed error
                let body: ErrorEnvelope = response.json().await.map_err(index_err)?;
                if body.error.error_type == "resource_already_exists_exception" {
                    debug!(target: "chat.search", index = %self.index, "Index already exists");
                    Ok(())
                } else {
                    Err(ChatError::Index(format!(
                        "Index creation rejected: {}",
                        body.error.error_type
                    )))
                }
            }
            status => Err(ChatError::Index(format!(
                "Index creation failed with status {status}"
            ))),
        }
    }

    #[instrument(skip_all, fields(index = %self.index, count = docs.len()))]
    async fn bulk_upsert(&self, docs: &[IndexDocument]) -> Result<Vec<IndexOutcome>, ChatError> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        // NDJSON: one action line plus one document line per message
        let mut body = String::new();
        for doc in docs {
            let action = serde_json::json!({ "index": { "_id": doc.message_id.0.to_string() } });
            let source = serde_json::to_string(doc)
                .map_err(|e| ChatError::Index(format!("Failed to serialize document: {e}")))?;
            body.push_str(&action.to_string());
            body.push('\n');
            body.push_str(&source);
            body.push('\n');
        }

        let url = format!("{}/{}/_bulk", self.base_url, self.index);
        let response = self
            .http
            .post(&url)
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(index_err)?;

        if !response.status().is_success() {
            return Err(ChatError::Index(format!(
                "Bulk request failed with status {}",
                response.status()
            )));
        }

        let bulk: BulkResponse = response.json().await.map_err(index_err)?;

        if bulk.items.len() != docs.len() {
            return Err(ChatError::Index(format!(
                "Bulk response item count mismatch: sent {}, got {}",
                docs.len(),
                bulk.items.len()
            )));
        }

        let outcomes = bulk
            .items
            .iter()
            .map(|item| {
                if item.index.error.is_some() {
                    IndexOutcome::Failed
                } else {
                    IndexOutcome::Indexed
                }
            })
            .collect();

        if bulk.errors {
            warn!(
                target: "chat.search",
                index = %self.index,
                "Bulk upsert completed with per-document failures"
            );
        }

        Ok(outcomes)
    }

    #[instrument(skip_all, fields(index = %self.index, message_id = %id))]
    async fn delete(&self, id: MessageId) -> Result<(), ChatError> {
        let url = format!("{}/{}/_doc/{}", self.base_url, self.index, id.0);
        let response = self.http.delete(&url).send().await.map_err(index_err)?;

        match response.status() {
            status if status.is_success() => Ok(()),
            // Already gone, nothing to do
            StatusCode::NOT_FOUND => Ok(()),
            status => Err(ChatError::Index(format!(
                "Delete failed with status {status}"
            ))),
        }
    }
}

/// Map a reqwest error to an index error (never sender-visible).
fn index_err(e: reqwest::Error) -> ChatError {
    ChatError::Index(e.to_string())
}

// ============================================================================
// Backend Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    error_type: String,
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    errors: bool,
    items: Vec<BulkItem>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    index: BulkItemResult,
}

#[derive(Debug, Deserialize)]
struct BulkItemResult {
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let client = HttpSearchIndex::new("http://search:9200/").unwrap();
        assert_eq!(client.base_url, "http://search:9200");
    }

    #[test]
    fn test_with_index_overrides_name() {
        let client = HttpSearchIndex::new("http://search:9200")
            .unwrap()
            .with_index("test-messages");
        assert_eq!(client.index, "test-messages");
    }

    #[test]
    fn test_bulk_response_parsing() {
        let json = r#"{
            "took": 30,
            "errors": true,
            "items": [
                { "index": { "_id": "1", "status": 201 } },
                { "index": { "_id": "2", "status": 400, "error": { "type": "mapper_parsing_exception" } } }
            ]
        }"#;

        let parsed: BulkResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.errors);
        assert_eq!(parsed.items.len(), 2);
        assert!(parsed.items[0].index.error.is_none());
        assert!(parsed.items[1].index.error.is_some());
    }

    #[test]
    fn test_error_envelope_parsing() {
        let json = r#"{
            "error": {
                "type": "resource_already_exists_exception",
                "reason": "index already exists"
            },
            "status": 400
        }"#;

        let parsed: ErrorEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.error.error_type, "resource_already_exists_exception");
    }
}
