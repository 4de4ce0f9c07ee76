//! Indexing consumers, one per event kind.
//!
//! Each consumer runs as its own tokio task for the process lifetime:
//! it declares its queue, then loops on blocking reads, applying every
//! delivered event to the search index through a [`Projector`]. Messages on
//! one consumer are processed strictly in delivery order; the next message
//! is not touched while one is in flight.
//!
//! Deliveries are auto-acknowledged at read time (at-most-once), so a
//! processing failure cannot be redelivered. A failed message is logged and
//! counted, and the loop moves on; a poison message never halts indexing
//! for its event kind.

use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, BrokerError};
use crate::event::{EventKind, QuestionCreated, QuestionDeleted, QuestionUpdated};
use crate::index::{DocumentPatch, IndexError, SearchDocument, SearchIndex};
use crate::shutdown::ShutdownSignal;

/// How long to back off after a failed queue read.
const READ_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Default number of messages fetched per read.
const DEFAULT_BATCH_SIZE: usize = 10;

/// Default blocking-read timeout in milliseconds.
const DEFAULT_BLOCK_MS: u64 = 2000;

/// Errors from processing a single message.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// The payload did not deserialize into the expected event variant
    #[error("malformed event payload: {0}")]
    Deserialize(#[from] serde_json::Error),

    /// The index rejected the mutation
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// What to do with an update event whose document is missing from the
/// index, e.g. because a delete for the same id was consumed first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingUpdatePolicy {
    /// Discard the update; deletes win and the index never holds a
    /// resurrected partial document.
    #[default]
    Drop,

    /// Apply the update as a full upsert with defaulted creation time and
    /// answer fields.
    Resurrect,
}

/// Counters for one consumer, shared with the metrics surface.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    processed: AtomicU64,
    failed: AtomicU64,
}

impl ConsumerStats {
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Applies events of one kind to the search index.
///
/// Mutations are idempotent: creates are upserts, deletes tolerate absent
/// ids, so a redelivered event leaves the index unchanged.
pub struct Projector {
    index: Arc<dyn SearchIndex>,
    kind: EventKind,
    policy: MissingUpdatePolicy,
}

impl Projector {
    pub fn new(index: Arc<dyn SearchIndex>, kind: EventKind, policy: MissingUpdatePolicy) -> Self {
        Self {
            index,
            kind,
            policy,
        }
    }

    /// Deserialize one payload and apply its index mutation.
    pub async fn apply(&self, body: &str) -> Result<(), ConsumerError> {
        match self.kind {
            EventKind::Created => {
                let event: QuestionCreated = serde_json::from_str(body)?;
                let doc = SearchDocument::from_created(&event);
                self.index.upsert(&doc).await?;
                info!(id = %event.question_id, "Indexed created question");
            }
            EventKind::Updated => {
                let event: QuestionUpdated = serde_json::from_str(body)?;
                let patch = DocumentPatch::from_updated(&event);
                match self.index.update(&event.question_id, &patch).await {
                    Ok(()) => info!(id = %event.question_id, "Indexed updated question"),
                    Err(IndexError::NotFound(_)) => self.on_missing(&event, patch).await?,
                    Err(e) => return Err(e.into()),
                }
            }
            EventKind::Deleted => {
                let event: QuestionDeleted = serde_json::from_str(body)?;
                self.index.delete(&event.question_id).await?;
                info!(id = %event.question_id, "Removed question from index");
            }
        }
        Ok(())
    }

    /// An update arrived for a document the index no longer has. Updated
    /// and deleted events travel on separate queues, so this is expected
    /// when a delete overtakes a stale update.
    async fn on_missing(
        &self,
        event: &QuestionUpdated,
        patch: DocumentPatch,
    ) -> Result<(), ConsumerError> {
        match self.policy {
            MissingUpdatePolicy::Drop => {
                warn!(id = %event.question_id, "Dropped update for missing document");
                Ok(())
            }
            MissingUpdatePolicy::Resurrect => {
                let doc = patch.into_document(&event.question_id);
                self.index.upsert(&doc).await?;
                warn!(id = %event.question_id, "Resurrected missing document from update");
                Ok(())
            }
        }
    }
}

/// A long-running consumer for one event kind.
pub struct EventConsumer {
    broker: Broker,
    projector: Projector,
    kind: EventKind,
    name: String,
    batch_size: usize,
    block_ms: u64,
    stats: Arc<ConsumerStats>,
}

impl EventConsumer {
    pub fn new(broker: Broker, index: Arc<dyn SearchIndex>, kind: EventKind) -> Self {
        Self {
            broker,
            projector: Projector::new(index, kind, MissingUpdatePolicy::default()),
            kind,
            name: format!("{}-{}", default_consumer_name(), kind),
            batch_size: DEFAULT_BATCH_SIZE,
            block_ms: DEFAULT_BLOCK_MS,
            stats: Arc::new(ConsumerStats::default()),
        }
    }

    /// Override the generated consumer name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the missing-update policy.
    pub fn with_policy(mut self, policy: MissingUpdatePolicy) -> Self {
        self.projector.policy = policy;
        self
    }

    /// Tune batch size and blocking-read timeout.
    pub fn with_read_options(mut self, batch_size: usize, block_ms: u64) -> Self {
        self.batch_size = batch_size;
        self.block_ms = block_ms;
        self
    }

    /// Shared counters for the metrics surface.
    pub fn stats(&self) -> Arc<ConsumerStats> {
        self.stats.clone()
    }

    /// Run until the shutdown signal fires.
    ///
    /// Declares the queue (repeat-safe), then alternates between blocking
    /// reads and sequential per-message processing. On shutdown the blocking
    /// read is abandoned and the consumer returns; a message already
    /// delivered but not yet applied is lost, per the at-most-once contract.
    pub async fn run(self, shutdown: ShutdownSignal) -> Result<(), BrokerError> {
        let queue = self.kind.queue();
        self.broker.declare(queue).await?;

        let mut receiver = shutdown.subscribe();
        info!(queue = %queue, consumer = %self.name, "Consumer subscribed");

        loop {
            let deliveries = tokio::select! {
                _ = receiver.recv() => {
                    info!(queue = %queue, consumer = %self.name, "Shutdown signal received");
                    break;
                }
                result = self.broker.fetch(queue, &self.name, self.batch_size, self.block_ms) => {
                    match result {
                        Ok(deliveries) => deliveries,
                        Err(e) => {
                            warn!(queue = %queue, error = %e, "Queue read failed");
                            tokio::time::sleep(READ_RETRY_DELAY).await;
                            continue;
                        }
                    }
                }
            };

            for delivery in deliveries {
                // Already acknowledged at read time; a failure here is
                // final for this delivery.
                match self.projector.apply(&delivery.body).await {
                    Ok(()) => {
                        self.stats.record_processed();
                        debug!(id = %delivery.id, queue = %queue, "Processed message");
                    }
                    Err(e) => {
                        self.stats.record_failed();
                        error!(
                            id = %delivery.id,
                            queue = %queue,
                            error = %e,
                            "Failed to process message"
                        );
                    }
                }
            }
        }

        info!(
            queue = %queue,
            consumer = %self.name,
            processed = self.stats.processed(),
            failed = self.stats.failed(),
            "Consumer stopped"
        );
        Ok(())
    }
}

/// Base name for this process's consumers: explicit env override, then
/// hostname, then a random id.
pub fn default_consumer_name() -> String {
    if let Ok(name) = env::var("AGORA_CONSUMER_NAME") {
        return name;
    }

    if let Ok(hostname) = hostname::get() {
        if let Some(name) = hostname.to_str() {
            return name.to_string();
        }
    }

    format!("indexer-{}", uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{MemoryIndex, SearchQuery};
    use serde_json::json;

    fn created_body(id: &str, title: &str) -> String {
        json!({
            "questionId": id,
            "content": "<p>Some <b>marked up</b> content</p>",
            "title": title,
            "createdAt": "2024-01-01T00:00:00Z",
            "tags": ["rust"]
        })
        .to_string()
    }

    fn updated_body(id: &str, title: &str) -> String {
        json!({
            "questionId": id,
            "title": title,
            "content": "updated content",
            "tags": ["rust", "async"]
        })
        .to_string()
    }

    fn projector(index: &Arc<MemoryIndex>, kind: EventKind) -> Projector {
        Projector::new(index.clone() as Arc<dyn SearchIndex>, kind, MissingUpdatePolicy::Drop)
    }

    #[tokio::test]
    async fn test_created_event_is_searchable_without_markup() {
        let index = Arc::new(MemoryIndex::new());
        projector(&index, EventKind::Created)
            .apply(&created_body("q-1", "Borrow checker"))
            .await
            .unwrap();

        let hits = index
            .search(&SearchQuery::new("Borrow checker"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "q-1");
        assert!(!hits[0].content.contains('<'));
        assert_eq!(hits[0].created_at, 1_704_067_200);
    }

    #[tokio::test]
    async fn test_created_event_applied_twice_is_idempotent() {
        let index = Arc::new(MemoryIndex::new());
        let p = projector(&index, EventKind::Created);

        let body = created_body("q-1", "Borrow checker");
        p.apply(&body).await.unwrap();
        let after_first = index.get("q-1").unwrap();

        p.apply(&body).await.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.get("q-1").unwrap(), after_first);
    }

    #[tokio::test]
    async fn test_update_overwrites_title_and_preserves_creation_fields() {
        let index = Arc::new(MemoryIndex::new());
        projector(&index, EventKind::Created)
            .apply(&created_body("q-1", "A"))
            .await
            .unwrap();
        projector(&index, EventKind::Updated)
            .apply(&updated_body("q-1", "B"))
            .await
            .unwrap();

        let hits_b = index.search(&SearchQuery::new("B")).await.unwrap();
        assert_eq!(hits_b.len(), 1);
        assert_eq!(hits_b[0].id, "q-1");
        assert_eq!(hits_b[0].created_at, 1_704_067_200);

        let hits_a = index.search(&SearchQuery::new("A")).await.unwrap();
        assert!(hits_a.is_empty());
    }

    #[tokio::test]
    async fn test_delete_event_removes_document() {
        let index = Arc::new(MemoryIndex::new());
        projector(&index, EventKind::Created)
            .apply(&created_body("q-1", "A"))
            .await
            .unwrap();
        projector(&index, EventKind::Deleted)
            .apply(&json!({"questionId": "q-1"}).to_string())
            .await
            .unwrap();

        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_delete_for_absent_id_is_not_an_error() {
        let index = Arc::new(MemoryIndex::new());
        projector(&index, EventKind::Deleted)
            .apply(&json!({"questionId": "ghost"}).to_string())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_update_dropped_by_default() {
        let index = Arc::new(MemoryIndex::new());
        projector(&index, EventKind::Updated)
            .apply(&updated_body("ghost", "B"))
            .await
            .unwrap();

        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_missing_update_resurrects_under_policy() {
        let index = Arc::new(MemoryIndex::new());
        let p = Projector::new(
            index.clone() as Arc<dyn SearchIndex>,
            EventKind::Updated,
            MissingUpdatePolicy::Resurrect,
        );
        p.apply(&updated_body("q-1", "Back from the dead"))
            .await
            .unwrap();

        let doc = index.get("q-1").unwrap();
        assert_eq!(doc.title, "Back from the dead");
        assert_eq!(doc.created_at, 0);
        assert_eq!(doc.answer_count, 0);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_a_deserialize_error() {
        let index = Arc::new(MemoryIndex::new());
        let err = projector(&index, EventKind::Created)
            .apply("not json")
            .await
            .unwrap_err();
        assert!(matches!(err, ConsumerError::Deserialize(_)));
    }

    #[test]
    fn test_policy_parses_from_config_strings() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: MissingUpdatePolicy,
        }

        let drop: Wrapper = toml::from_str(r#"policy = "drop""#).unwrap();
        assert_eq!(drop.policy, MissingUpdatePolicy::Drop);

        let resurrect: Wrapper = toml::from_str(r#"policy = "resurrect""#).unwrap();
        assert_eq!(resurrect.policy, MissingUpdatePolicy::Resurrect);
    }
}
