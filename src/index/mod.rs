//! Search-index projection for question documents.
//!
//! The index is a derived, disposable copy of write-side state: documents
//! are created by `QuestionCreated`, partially overwritten by
//! `QuestionUpdated`, and removed by `QuestionDeleted`. Every mutation is
//! keyed by question id and idempotent, so redelivered events leave the
//! index unchanged. Dropping the collection and replaying create events
//! rebuilds it.
//!
//! ## Implementations
//!
//! - [`TypesenseIndex`]: the production document store, over HTTP
//! - [`MemoryIndex`]: in-process double for tests and local development

pub mod memory;
pub mod typesense;

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::{QuestionCreated, QuestionUpdated};

pub use memory::MemoryIndex;
pub use typesense::TypesenseIndex;

/// Coarse markup remover: anything between `<` and `>`, non-greedy.
/// Does not decode HTML entities and does not handle malformed markup.
static MARKUP: LazyLock<Regex> = LazyLock::new(|| Regex::new("<.*?>").unwrap());

/// Errors from index operations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The target document does not exist
    #[error("document {0} not found")]
    NotFound(String),

    /// Transport-level failure talking to the index
    #[error("index request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The index rejected the request
    #[error("index returned {status}: {message}")]
    Api { status: u16, message: String },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A question as stored in the search collection.
///
/// `created_at` is integer epoch seconds so the collection can sort on it;
/// `answer_count` and `has_accepted_answer` are maintained by answer-side
/// processes and only defaulted here at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchDocument {
    pub id: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub created_at: i64,
    pub answer_count: i32,
    pub has_accepted_answer: bool,
}

impl SearchDocument {
    /// Project a creation event into a full document.
    pub fn from_created(event: &QuestionCreated) -> Self {
        Self {
            id: event.question_id.clone(),
            title: event.title.clone(),
            content: strip_markup(&event.content),
            tags: event.tags.clone(),
            created_at: event.created_at.timestamp(),
            answer_count: 0,
            has_accepted_answer: false,
        }
    }
}

/// The fields an update event is allowed to touch.
///
/// Update events carry no creation time or answer data; applying a patch
/// leaves `createdAt`, `answerCount` and `hasAcceptedAnswer` as they were.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentPatch {
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
}

impl DocumentPatch {
    /// Project an update event into a patch.
    pub fn from_updated(event: &QuestionUpdated) -> Self {
        Self {
            title: event.title.clone(),
            content: strip_markup(&event.content),
            tags: event.tags.clone(),
        }
    }

    /// Expand the patch into a full document with defaulted untouched
    /// fields. Used by the resurrect policy when an update arrives for a
    /// document that no longer exists.
    pub fn into_document(self, id: &str) -> SearchDocument {
        SearchDocument {
            id: id.to_string(),
            title: self.title,
            content: self.content,
            tags: self.tags,
            created_at: 0,
            answer_count: 0,
            has_accepted_answer: false,
        }
    }
}

/// Which document fields a free-text query runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryFields {
    TitleAndContent,
    TitleOnly,
}

impl QueryFields {
    pub const fn as_query_by(self) -> &'static str {
        match self {
            QueryFields::TitleAndContent => "title,content",
            QueryFields::TitleOnly => "title",
        }
    }
}

/// A search request: free text, an optional tag filter, and the field set.
///
/// An empty text term means match-all; with a tag filter that yields every
/// document carrying the tag.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub text: String,
    pub tag: Option<String>,
    pub fields: QueryFields,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tag: None,
            fields: QueryFields::TitleAndContent,
        }
    }

    /// Restrict results to documents whose tag set contains the value.
    pub fn with_tag(mut self, tag: Option<String>) -> Self {
        self.tag = tag;
        self
    }

    /// Match against titles only.
    pub fn titles_only(mut self) -> Self {
        self.fields = QueryFields::TitleOnly;
        self
    }
}

/// The document store capability backing the search service.
///
/// Implementations are stateless per call and safe for concurrent use by
/// all consumers and the query path simultaneously.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Create the questions collection if it does not exist yet.
    ///
    /// A not-found signal from the existence probe triggers schema creation;
    /// any other probe error is logged and creation is attempted anyway.
    async fn ensure_schema(&self) -> Result<(), IndexError>;

    /// Write a full document keyed by id, replacing any existing one.
    async fn upsert(&self, doc: &SearchDocument) -> Result<(), IndexError>;

    /// Partially overwrite title/content/tags of an existing document.
    ///
    /// Returns [`IndexError::NotFound`] when no document has the id.
    async fn update(&self, id: &str, patch: &DocumentPatch) -> Result<(), IndexError>;

    /// Remove a document by id. Removing an absent id is a no-op.
    async fn delete(&self, id: &str) -> Result<(), IndexError>;

    /// Run a free-text query, returning ranked documents.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchDocument>, IndexError>;
}

/// Strip `<...>` fragments from content before indexing.
pub(crate) fn strip_markup(content: &str) -> String {
    MARKUP.replace_all(content, "").into_owned()
}
