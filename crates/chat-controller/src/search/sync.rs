//! Search index synchronizer.
//!
//! Keeps the search index converging toward the message store using a
//! persisted cursor. Three paths feed the index:
//!
//! 1. **Backfill**: on startup, batches of messages past the saved cursor
//!    are bulk-upserted until the store is drained. Crash-safe: the cursor
//!    is saved after each batch, so a restart resumes mid-backfill instead
//!    of starting over. Re-indexing an already-indexed batch is harmless
//!    because documents are keyed by message ID.
//! 2. **Incremental**: the fanout path notifies the synchronizer of each
//!    newly persisted message. These upserts do NOT advance the cursor;
//!    only batch paths do, which keeps cursor advancement strictly ordered.
//! 3. **Sweep**: a periodic batch pass catches anything the incremental
//!    path dropped (notification queue full, backend temporarily down).

use common::types::MessageId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::errors::ChatError;
use crate::search::{IndexDocument, IndexOutcome, SearchIndex};
use crate::store::{MessageStore, StoredMessage};

/// Cursor name in the store's sync_cursors table.
pub const SYNC_CURSOR_NAME: &str = "message-search";

/// Capacity of the incremental notification queue. Overflow is tolerated;
/// the sweep pass picks up anything dropped here.
const NOTIFY_QUEUE_CAPACITY: usize = 1024;

/// Event from the live pipeline to the synchronizer.
#[derive(Debug)]
pub enum SyncEvent {
    /// A message was just persisted and should be indexed.
    Upsert(StoredMessage),
    /// A message was soft-deleted and should leave the index.
    Delete(MessageId),
}

/// Cheap cloneable handle for notifying the synchronizer.
///
/// Notifications are fire-and-forget: `try_send` never blocks the fanout
/// path, and drops are recovered by the sweep.
#[derive(Debug, Clone)]
pub struct SyncNotifier {
    tx: mpsc::Sender<SyncEvent>,
}

impl SyncNotifier {
    /// Queue a message for incremental indexing.
    pub fn notify_upsert(&self, message: StoredMessage) {
        if self.tx.try_send(SyncEvent::Upsert(message)).is_err() {
            debug!(
                target: "chat.search.sync",
                "Notification queue full, sweep will index this message"
            );
        }
    }

    /// Queue a deletion for propagation to the index.
    pub fn notify_delete(&self, id: MessageId) {
        if self.tx.try_send(SyncEvent::Delete(id)).is_err() {
            debug!(
                target: "chat.search.sync",
                message_id = %id,
                "Notification queue full, deletion will be retried"
            );
        }
    }
}

/// Summary of a completed backfill run.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackfillStats {
    /// Number of batches processed.
    pub batches: u32,
    /// Total documents indexed.
    pub indexed: u64,
}

/// Result of a single batch pass.
#[derive(Debug, Clone, Copy)]
struct BatchResult {
    /// Documents indexed in this batch.
    indexed: usize,
    /// Whether the store is drained (batch came back short or empty).
    drained: bool,
}

/// Search index synchronizer task.
///
/// Owns the notification queue receiver; run with [`SearchSynchronizer::run`]
/// after an optional startup [`SearchSynchronizer::backfill`].
pub struct SearchSynchronizer {
    store: Arc<dyn MessageStore>,
    index: Arc<dyn SearchIndex>,
    batch_size: u32,
    sweep_interval: Duration,
    events: mpsc::Receiver<SyncEvent>,
    cancel: CancellationToken,
}

impl SearchSynchronizer {
    /// Create a synchronizer and its notification handle.
    pub fn new(
        store: Arc<dyn MessageStore>,
        index: Arc<dyn SearchIndex>,
        batch_size: u32,
        sweep_interval: Duration,
        cancel: CancellationToken,
    ) -> (Self, SyncNotifier) {
        let (tx, rx) = mpsc::channel(NOTIFY_QUEUE_CAPACITY);
        (
            Self {
                store,
                index,
                batch_size,
                sweep_interval,
                events: rx,
                cancel,
            },
            SyncNotifier { tx },
        )
    }

    /// Run a full backfill from the saved cursor to the end of the store.
    ///
    /// Each batch advances and persists the cursor before the next one is
    /// fetched, so a crash resumes from the last completed batch.
    #[instrument(skip_all, name = "chat.sync.backfill")]
    pub async fn backfill(&self) -> Result<BackfillStats, ChatError> {
        let start_cursor = self.store.load_cursor(SYNC_CURSOR_NAME).await?;
        let pending = self.store.count_since(start_cursor).await?;

        info!(
            target: "chat.search.sync",
            cursor = %start_cursor,
            pending = pending,
            "Starting search backfill"
        );

        let mut stats = BackfillStats::default();
        loop {
            if self.cancel.is_cancelled() {
                info!(target: "chat.search.sync", "Backfill interrupted by shutdown");
                break;
            }

            let result = self.sync_batch().await?;
            if result.indexed > 0 {
                stats.batches += 1;
                stats.indexed += result.indexed as u64;
            }
            if result.drained {
                break;
            }
        }

        info!(
            target: "chat.search.sync",
            batches = stats.batches,
            indexed = stats.indexed,
            "Search backfill complete"
        );
        Ok(stats)
    }

    /// Run the incremental + sweep loop until cancelled.
    #[instrument(skip_all, name = "chat.sync.run")]
    pub async fn run(mut self) {
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so startup backfill
        // and the first sweep don't race.
        sweep.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    info!(target: "chat.search.sync", "Synchronizer shutting down");
                    break;
                }
                event = self.events.recv() => {
                    match event {
                        Some(SyncEvent::Upsert(message)) => self.incremental_upsert(&message).await,
                        Some(SyncEvent::Delete(id)) => self.propagate_delete(id).await,
                        None => {
                            // All notifier handles dropped
                            break;
                        }
                    }
                }
                _ = sweep.tick() => {
                    if let Err(e) = self.sync_batch().await {
                        warn!(
                            target: "chat.search.sync",
                            error = %e,
                            "Sweep batch failed, will retry next interval"
                        );
                    }
                }
            }
        }
    }

    /// Index a single just-persisted message. Does not touch the cursor.
    async fn incremental_upsert(&self, message: &StoredMessage) {
        let docs = [IndexDocument::from(message)];
        match self.index.bulk_upsert(&docs).await {
            Ok(outcomes) if outcomes.iter().all(|o| *o == IndexOutcome::Indexed) => {}
            Ok(_) | Err(_) => {
                // Sweep owns retries; the cursor has not moved past this message
                debug!(
                    target: "chat.search.sync",
                    message_id = %message.id,
                    "Incremental upsert failed, deferring to sweep"
                );
            }
        }
    }

    /// Propagate a soft delete to the index.
    async fn propagate_delete(&self, id: MessageId) {
        if let Err(e) = self.index.delete(id).await {
            warn!(
                target: "chat.search.sync",
                message_id = %id,
                error = %e,
                "Failed to propagate deletion to index"
            );
        }
    }

    /// Fetch one batch past the cursor, upsert it, and advance the cursor
    /// through the contiguous prefix of successfully indexed documents.
    async fn sync_batch(&self) -> Result<BatchResult, ChatError> {
        let cursor = self.store.load_cursor(SYNC_CURSOR_NAME).await?;
        let batch = self.store.list_since(cursor, self.batch_size).await?;

        if batch.is_empty() {
            return Ok(BatchResult {
                indexed: 0,
                drained: true,
            });
        }

        let docs: Vec<IndexDocument> = batch.iter().map(IndexDocument::from).collect();
        let outcomes = self.index.bulk_upsert(&docs).await?;

        let (new_cursor, prefix_len) = indexed_prefix(&batch, &outcomes);

        if let Some(new_cursor) = new_cursor {
            self.store.save_cursor(SYNC_CURSOR_NAME, new_cursor).await?;
        }

        if prefix_len < batch.len() {
            // Cursor stops at the failure; retry resumes there
            return Err(ChatError::Index(format!(
                "Batch indexed {} of {} documents before a rejection",
                prefix_len,
                batch.len()
            )));
        }

        Ok(BatchResult {
            indexed: prefix_len,
            drained: batch.len() < self.batch_size as usize,
        })
    }
}

/// Find the contiguous prefix of successfully indexed documents.
///
/// Returns the cursor value to save (ID of the last message in the prefix)
/// and the prefix length. Advancing only through a contiguous prefix keeps
/// the invariant that every message at or below the cursor is indexed.
fn indexed_prefix(
    batch: &[StoredMessage],
    outcomes: &[IndexOutcome],
) -> (Option<MessageId>, usize) {
    let mut last_id = None;
    let mut len = 0;
    for (message, outcome) in batch.iter().zip(outcomes.iter()) {
        if *outcome != IndexOutcome::Indexed {
            break;
        }
        last_id = Some(message.id);
        len += 1;
    }
    (last_id, len)
}
