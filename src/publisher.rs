//! Fire-and-forget event publishing for the write side.
//!
//! The question service calls this after a mutation has been durably
//! committed. Publish is not part of that transaction: a broker failure
//! here is logged and swallowed, the caller's request completes regardless,
//! and the lost event is the accepted dual-write window (no outbox).

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::broker::{Broker, BrokerError};
use crate::event::{EventKind, QuestionCreated, QuestionDeleted, QuestionUpdated};

/// Errors from an attempted publish.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Publishes question lifecycle events to their queues.
#[derive(Clone)]
pub struct EventPublisher {
    broker: Broker,
}

impl EventPublisher {
    pub fn new(broker: Broker) -> Self {
        Self { broker }
    }

    /// Announce a persisted question. Call only after the row is committed.
    pub async fn question_created(&self, event: &QuestionCreated) {
        self.publish(EventKind::Created, event).await;
    }

    /// Announce a committed edit.
    pub async fn question_updated(&self, event: &QuestionUpdated) {
        self.publish(EventKind::Updated, event).await;
    }

    /// Announce a committed removal.
    pub async fn question_deleted(&self, event: &QuestionDeleted) {
        self.publish(EventKind::Deleted, event).await;
    }

    /// Serialize, declare the destination queue, and append the message.
    /// Returns the broker-assigned id; used where the caller wants the
    /// outcome (tests, the operator tool).
    pub async fn try_publish<T: Serialize>(
        &self,
        kind: EventKind,
        event: &T,
    ) -> Result<String, PublishError> {
        let body = serde_json::to_string(event)?;
        self.broker.declare(kind.queue()).await?;
        let id = self.broker.publish(kind.queue(), &body).await?;
        Ok(id)
    }

    async fn publish<T: Serialize>(&self, kind: EventKind, event: &T) {
        match self.try_publish(kind, event).await {
            Ok(id) => info!(queue = %kind.queue(), id = %id, "Event published"),
            Err(e) => {
                // Not surfaced and not retried; the index lags until the
                // question is mutated again or the projection is rebuilt.
                error!(queue = %kind.queue(), error = %e, "Event publish failed");
            }
        }
    }
}
