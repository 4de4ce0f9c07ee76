//! Question lifecycle event contracts.
//!
//! These are the message contracts shared between the question service
//! (producer) and the search service (consumers). Events are JSON-UTF8 on
//! the wire with camelCase field names, carry no version or sequence number,
//! and are append-only: a consumer applies a full-field overwrite (create),
//! a documented partial overwrite (update), or a full removal (delete).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{QUESTION_CREATED_QUEUE, QUESTION_DELETED_QUEUE, QUESTION_UPDATED_QUEUE};

/// The three question lifecycle transitions, each with its own durable queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

impl EventKind {
    /// The queue this event kind is published to and consumed from.
    ///
    /// Queue names are a stable contract between producer and consumers.
    pub const fn queue(self) -> &'static str {
        match self {
            EventKind::Created => QUESTION_CREATED_QUEUE,
            EventKind::Updated => QUESTION_UPDATED_QUEUE,
            EventKind::Deleted => QUESTION_DELETED_QUEUE,
        }
    }

    /// Short label used in log fields and consumer names.
    pub const fn as_str(self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Updated => "updated",
            EventKind::Deleted => "deleted",
        }
    }

    /// All kinds, in the order consumers are started.
    pub const fn all() -> [EventKind; 3] {
        [EventKind::Created, EventKind::Updated, EventKind::Deleted]
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emitted once after a question row has been durably persisted.
///
/// `question_id` is the stable cross-system identifier: assigned by the
/// write side before this event exists, never reused, never changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionCreated {
    pub question_id: String,
    pub content: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub tags: Vec<String>,
}

/// Emitted after an edit to an existing question has been committed.
///
/// Carries no timestamp: the indexed `createdAt` (and the answer fields)
/// are left untouched when this event is applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionUpdated {
    pub question_id: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
}

/// Emitted after a question row has been removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionDeleted {
    pub question_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_created_round_trip() {
        let json_str = r#"{
            "questionId": "q-42",
            "content": "<p>How do I borrow?</p>",
            "title": "Borrow checker",
            "createdAt": "2024-01-01T00:00:00Z",
            "tags": ["rust", "ownership"]
        }"#;

        let event: QuestionCreated = serde_json::from_str(json_str).unwrap();
        assert_eq!(event.question_id, "q-42");
        assert_eq!(event.title, "Borrow checker");
        assert_eq!(event.tags, vec!["rust", "ownership"]);
        assert_eq!(event.created_at.timestamp(), 1_704_067_200);

        let out = serde_json::to_string(&event).unwrap();
        assert!(out.contains("questionId")); // camelCase on the wire
        assert!(out.contains("createdAt"));
    }

    #[test]
    fn test_updated_has_no_timestamp() {
        let event = QuestionUpdated {
            question_id: "q-1".to_string(),
            title: "t".to_string(),
            content: "c".to_string(),
            tags: vec![],
        };

        let out = serde_json::to_string(&event).unwrap();
        assert!(!out.contains("createdAt"));
    }

    #[test]
    fn test_deleted_is_id_only() {
        let event: QuestionDeleted = serde_json::from_str(r#"{"questionId": "q-9"}"#).unwrap();
        assert_eq!(event.question_id, "q-9");
    }

    #[test]
    fn test_kind_queue_names_are_stable() {
        assert_eq!(EventKind::Created.queue(), "agora:questions:created");
        assert_eq!(EventKind::Updated.queue(), "agora:questions:updated");
        assert_eq!(EventKind::Deleted.queue(), "agora:questions:deleted");
    }
}
