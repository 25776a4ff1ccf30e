//! In-memory search index mock.
//!
//! Implements `SearchIndex` with a document map keyed by message ID and
//! injectable failures:
//!
//! - per-document rejection (`with_failing_ids` / `set_failing_ids`),
//!   which surfaces as `IndexOutcome::Failed` in bulk results
//! - whole-request transport failure (`with_transport_failure`), which
//!   surfaces as an `Err` from `bulk_upsert`

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chat_controller::errors::ChatError;
use chat_controller::search::{IndexDocument, IndexOutcome, SearchIndex};
use common::types::MessageId;

/// In-memory mock of the search backend.
#[derive(Debug, Clone)]
pub struct MockSearchIndex {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Indexed documents by message ID.
    docs: HashMap<i64, IndexDocument>,
    /// Message IDs the backend rejects per-document.
    failing_ids: HashSet<i64>,
    /// When set, `bulk_upsert` fails as a whole request.
    fail_transport: bool,
    /// Number of `bulk_upsert` calls.
    upsert_calls: usize,
    /// Message IDs passed to `delete`.
    deleted_ids: Vec<i64>,
}

impl Default for MockSearchIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSearchIndex {
    /// Create a new empty index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Reject these message IDs on every bulk upsert.
    #[must_use]
    pub fn with_failing_ids(self, ids: impl IntoIterator<Item = MessageId>) -> Self {
        self.set_failing_ids(ids);
        self
    }

    /// Fail every `bulk_upsert` as a whole request.
    #[must_use]
    pub fn with_transport_failure(self) -> Self {
        self.inner.lock().unwrap().fail_transport = true;
        self
    }

    /// Replace the set of rejected message IDs at runtime.
    pub fn set_failing_ids(&self, ids: impl IntoIterator<Item = MessageId>) {
        let mut inner = self.inner.lock().unwrap();
        inner.failing_ids = ids.into_iter().map(|id| id.0).collect();
    }

    /// Toggle whole-request failures at runtime.
    pub fn set_transport_failure(&self, fail: bool) {
        self.inner.lock().unwrap().fail_transport = fail;
    }

    /// Number of documents currently indexed.
    pub fn document_count(&self) -> usize {
        self.inner.lock().unwrap().docs.len()
    }

    /// Whether a document for this message ID is indexed.
    pub fn contains(&self, id: MessageId) -> bool {
        self.inner.lock().unwrap().docs.contains_key(&id.0)
    }

    /// Number of `bulk_upsert` calls so far.
    pub fn upsert_calls(&self) -> usize {
        self.inner.lock().unwrap().upsert_calls
    }

    /// Message IDs that `delete` was called with, in call order.
    pub fn deleted_ids(&self) -> Vec<MessageId> {
        self.inner
            .lock()
            .unwrap()
            .deleted_ids
            .iter()
            .copied()
            .map(MessageId)
            .collect()
    }
}

#[async_trait]
impl SearchIndex for MockSearchIndex {
    async fn ensure_index(&self) -> Result<(), ChatError> {
        Ok(())
    }

    async fn bulk_upsert(&self, docs: &[IndexDocument]) -> Result<Vec<IndexOutcome>, ChatError> {
        let mut inner = self.inner.lock().unwrap();
        inner.upsert_calls += 1;

        if inner.fail_transport {
            return Err(ChatError::Index(
                "mock index transport failure".to_string(),
            ));
        }

        let mut outcomes = Vec::with_capacity(docs.len());
        for doc in docs {
            if inner.failing_ids.contains(&doc.message_id.0) {
                outcomes.push(IndexOutcome::Failed);
            } else {
                inner.docs.insert(doc.message_id.0, doc.clone());
                outcomes.push(IndexOutcome::Indexed);
            }
        }
        Ok(outcomes)
    }

    async fn delete(&self, id: MessageId) -> Result<(), ChatError> {
        let mut inner = self.inner.lock().unwrap();
        inner.docs.remove(&id.0);
        inner.deleted_ids.push(id.0);
        Ok(())
    }
}
