//! In-process search index.
//!
//! Backs tests and local development with the same [`SearchIndex`] contract
//! as the production store: idempotent writes keyed by id, match-all on an
//! empty text term, and a tag filter. Ranking is naive term overlap with a
//! newest-first tie-break; good enough to assert relevance ordering without
//! a running document store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{DocumentPatch, IndexError, QueryFields, SearchDocument, SearchIndex, SearchQuery};

/// In-memory [`SearchIndex`] implementation.
#[derive(Debug, Default)]
pub struct MemoryIndex {
    docs: Mutex<HashMap<String, SearchDocument>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents currently held.
    pub fn len(&self) -> usize {
        self.docs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch a document by id, for assertions.
    pub fn get(&self, id: &str) -> Option<SearchDocument> {
        self.docs.lock().unwrap().get(id).cloned()
    }
}

/// Count how many query terms occur in `haystack`, case-insensitively.
fn term_hits(haystack: &str, terms: &[&str]) -> usize {
    let haystack = haystack.to_lowercase();
    terms
        .iter()
        .filter(|term| haystack.contains(&term.to_lowercase()))
        .count()
}

fn score(doc: &SearchDocument, terms: &[&str], fields: QueryFields) -> usize {
    let title = term_hits(&doc.title, terms) * 2;
    match fields {
        QueryFields::TitleOnly => title,
        QueryFields::TitleAndContent => title + term_hits(&doc.content, terms),
    }
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn ensure_schema(&self) -> Result<(), IndexError> {
        Ok(())
    }

    async fn upsert(&self, doc: &SearchDocument) -> Result<(), IndexError> {
        self.docs
            .lock()
            .unwrap()
            .insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn update(&self, id: &str, patch: &DocumentPatch) -> Result<(), IndexError> {
        let mut docs = self.docs.lock().unwrap();
        let doc = docs
            .get_mut(id)
            .ok_or_else(|| IndexError::NotFound(id.to_string()))?;

        doc.title = patch.title.clone();
        doc.content = patch.content.clone();
        doc.tags = patch.tags.clone();
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), IndexError> {
        self.docs.lock().unwrap().remove(id);
        Ok(())
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchDocument>, IndexError> {
        let docs = self.docs.lock().unwrap();
        let terms: Vec<&str> = query.text.split_whitespace().collect();

        let mut scored: Vec<(usize, SearchDocument)> = docs
            .values()
            .filter(|doc| match &query.tag {
                Some(tag) => doc.tags.iter().any(|t| t == tag),
                None => true,
            })
            .filter_map(|doc| {
                if terms.is_empty() {
                    // Empty text term: match all, then filter
                    Some((0, doc.clone()))
                } else {
                    match score(doc, &terms, query.fields) {
                        0 => None,
                        s => Some((s, doc.clone())),
                    }
                }
            })
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.created_at.cmp(&a.1.created_at)));
        Ok(scored.into_iter().map(|(_, doc)| doc).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, title: &str, content: &str, tags: &[&str], created_at: i64) -> SearchDocument {
        SearchDocument {
            id: id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            created_at,
            answer_count: 0,
            has_accepted_answer: false,
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let index = MemoryIndex::new();
        let d = doc("q-1", "Borrow checker", "text", &["rust"], 100);

        index.upsert(&d).await.unwrap();
        index.upsert(&d).await.unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(index.get("q-1").unwrap(), d);
    }

    #[tokio::test]
    async fn test_delete_absent_id_is_noop() {
        let index = MemoryIndex::new();
        index.delete("nope").await.unwrap();
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_update_missing_reports_not_found() {
        let index = MemoryIndex::new();
        let patch = DocumentPatch {
            title: "t".to_string(),
            content: "c".to_string(),
            tags: vec![],
        };

        let err = index.update("ghost", &patch).await.unwrap_err();
        assert!(matches!(err, IndexError::NotFound(id) if id == "ghost"));
    }

    #[tokio::test]
    async fn test_update_preserves_untouched_fields() {
        let index = MemoryIndex::new();
        let mut original = doc("q-1", "Old", "old text", &["rust"], 1_704_067_200);
        original.answer_count = 3;
        original.has_accepted_answer = true;
        index.upsert(&original).await.unwrap();

        let patch = DocumentPatch {
            title: "New".to_string(),
            content: "new text".to_string(),
            tags: vec!["rust".to_string(), "async".to_string()],
        };
        index.update("q-1", &patch).await.unwrap();

        let updated = index.get("q-1").unwrap();
        assert_eq!(updated.title, "New");
        assert_eq!(updated.tags.len(), 2);
        assert_eq!(updated.created_at, 1_704_067_200);
        assert_eq!(updated.answer_count, 3);
        assert!(updated.has_accepted_answer);
    }

    #[tokio::test]
    async fn test_search_by_title_and_tag_filter() {
        let index = MemoryIndex::new();
        index
            .upsert(&doc("q-1", "Pointer safety", "raw pointers", &["rust"], 10))
            .await
            .unwrap();
        index
            .upsert(&doc("q-2", "Pointer events", "dom events", &["javascript"], 20))
            .await
            .unwrap();

        let hits = index
            .search(&SearchQuery::new("pointer").with_tag(Some("rust".to_string())))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "q-1");
    }

    #[tokio::test]
    async fn test_empty_text_matches_all_then_filters() {
        let index = MemoryIndex::new();
        index
            .upsert(&doc("q-1", "A", "a", &["rust"], 10))
            .await
            .unwrap();
        index
            .upsert(&doc("q-2", "B", "b", &["go"], 20))
            .await
            .unwrap();

        let all = index.search(&SearchQuery::new("")).await.unwrap();
        assert_eq!(all.len(), 2);

        let tagged = index
            .search(&SearchQuery::new("").with_tag(Some("go".to_string())))
            .await
            .unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].id, "q-2");
    }

    #[tokio::test]
    async fn test_title_matches_outrank_content_matches() {
        let index = MemoryIndex::new();
        index
            .upsert(&doc("q-1", "Other", "lifetimes everywhere", &[], 10))
            .await
            .unwrap();
        index
            .upsert(&doc("q-2", "Lifetimes", "other", &[], 5))
            .await
            .unwrap();

        let hits = index.search(&SearchQuery::new("lifetimes")).await.unwrap();
        assert_eq!(hits[0].id, "q-2");
        assert_eq!(hits[1].id, "q-1");
    }

    #[tokio::test]
    async fn test_titles_only_ignores_content() {
        let index = MemoryIndex::new();
        index
            .upsert(&doc("q-1", "Traits", "generics in depth", &[], 10))
            .await
            .unwrap();

        let hits = index
            .search(&SearchQuery::new("generics").titles_only())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }
}
