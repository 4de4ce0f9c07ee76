//! Typesense-backed search index.
//!
//! A thin HTTP client over the Typesense collection API. All mutations are
//! direct pass-throughs keyed by document id; there is no local caching or
//! batching. The client is cheap to clone and safe for concurrent use.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{DocumentPatch, IndexError, SearchDocument, SearchIndex, SearchQuery};
use crate::QUESTIONS_COLLECTION;

/// Header carrying the API key on every request
const API_KEY_HEADER: &str = "x-typesense-api-key";

/// Default timeout for index requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Search index backed by a Typesense node.
#[derive(Debug, Clone)]
pub struct TypesenseIndex {
    base_url: String,
    api_key: String,
    client: Client,
    timeout: Duration,
}

impl TypesenseIndex {
    /// Create a client for the node at `base_url`.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: Client::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set a custom request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(self.url(path))
            .header(API_KEY_HEADER, &self.api_key)
            .timeout(self.timeout)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(self.url(path))
            .header(API_KEY_HEADER, &self.api_key)
            .timeout(self.timeout)
    }

    fn patch(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .patch(self.url(path))
            .header(API_KEY_HEADER, &self.api_key)
            .timeout(self.timeout)
    }

    fn delete_req(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .delete(self.url(path))
            .header(API_KEY_HEADER, &self.api_key)
            .timeout(self.timeout)
    }
}

/// The questions collection schema. Field set and the default sorting field
/// are a fixed contract with the query path.
fn collection_schema() -> Value {
    json!({
        "name": QUESTIONS_COLLECTION,
        "fields": [
            { "name": "id", "type": "string" },
            { "name": "title", "type": "string" },
            { "name": "content", "type": "string" },
            { "name": "tags", "type": "string[]" },
            { "name": "createdAt", "type": "int64" },
            { "name": "answerCount", "type": "int32" },
            { "name": "hasAcceptedAnswer", "type": "bool" },
        ],
        "default_sorting_field": "createdAt",
    })
}

/// Turn a non-success response into an [`IndexError::Api`].
async fn api_error(response: Response) -> IndexError {
    let status = response.status().as_u16();
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "unreadable response body".to_string());
    IndexError::Api { status, message }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    document: SearchDocument,
}

#[async_trait]
impl SearchIndex for TypesenseIndex {
    async fn ensure_schema(&self) -> Result<(), IndexError> {
        let path = format!("/collections/{}", QUESTIONS_COLLECTION);
        match self.get(&path).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(collection = QUESTIONS_COLLECTION, "Collection already exists");
                return Ok(());
            }
            Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                info!(collection = QUESTIONS_COLLECTION, "Collection not found, creating");
            }
            Ok(response) => {
                // Probe failed for some other reason; creation may still work.
                warn!(
                    status = %response.status(),
                    "Unexpected reply probing collection, attempting creation anyway"
                );
            }
            Err(e) => {
                warn!(error = %e, "Collection probe failed, attempting creation anyway");
            }
        }

        let response = self
            .post("/collections")
            .json(&collection_schema())
            .send()
            .await?;

        let status = response.status();
        // A concurrent starter may have created it between probe and create.
        if status.is_success() || status == StatusCode::CONFLICT {
            info!(collection = QUESTIONS_COLLECTION, "Collection ready");
            Ok(())
        } else {
            Err(api_error(response).await)
        }
    }

    async fn upsert(&self, doc: &SearchDocument) -> Result<(), IndexError> {
        let path = format!("/collections/{}/documents", QUESTIONS_COLLECTION);
        let response = self
            .post(&path)
            .query(&[("action", "upsert")])
            .json(doc)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(api_error(response).await)
        }
    }

    async fn update(&self, id: &str, patch: &DocumentPatch) -> Result<(), IndexError> {
        let path = format!("/collections/{}/documents/{}", QUESTIONS_COLLECTION, id);
        let response = self.patch(&path).json(patch).send().await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status == StatusCode::NOT_FOUND {
            Err(IndexError::NotFound(id.to_string()))
        } else {
            Err(api_error(response).await)
        }
    }

    async fn delete(&self, id: &str) -> Result<(), IndexError> {
        let path = format!("/collections/{}/documents/{}", QUESTIONS_COLLECTION, id);
        let response = self.delete_req(&path).send().await?;

        let status = response.status();
        // Deleting an absent document is a no-op, not an error
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(api_error(response).await)
        }
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchDocument>, IndexError> {
        let path = format!("/collections/{}/documents/search", QUESTIONS_COLLECTION);

        // An empty text term means match-all, then filter
        let text = if query.text.is_empty() { "*" } else { &query.text };

        let mut params: Vec<(&str, String)> = vec![
            ("q", text.to_string()),
            ("query_by", query.fields.as_query_by().to_string()),
        ];
        if let Some(tag) = &query.tag {
            params.push(("filter_by", format!("tags:=[{}]", tag)));
        }

        let response = self.get(&path).query(&params).send().await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let parsed: SearchResponse = response.json().await?;
        Ok(parsed.hits.into_iter().map(|hit| hit.document).collect())
    }
}
