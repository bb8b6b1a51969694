pub mod elasticsearch;
pub mod opensearch;

pub use elasticsearch::ElasticsearchStore;
pub use opensearch::OpenSearchStore;

use crate::error::StoreError;
use crate::models::{Chunk, DocumentSummary, SearchHit, StoredChunk};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Backend-agnostic index store contract. Both backends return
/// identically shaped results so callers never branch on the backend.
///
/// Concurrency: `create_index`/`delete_index` must not run concurrently
/// with `upsert`/`search` against the same index name; quiesce writers
/// around a full reindex. `list_documents` aggregates may lag behind
/// writes by at most one backend refresh interval.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// The vector dimension this store was configured with at startup.
    fn dimension(&self) -> usize;

    /// Cheap liveness check against the backend endpoint.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Idempotent: an existing index of equal dimension is a no-op; a
    /// differing dimension fails and requires an explicit
    /// delete-and-recreate.
    async fn create_index(&self, dimension: usize) -> Result<(), StoreError>;

    /// Idempotent: an absent index is a no-op.
    async fn delete_index(&self) -> Result<(), StoreError>;

    /// Writes one chunk keyed by its id. The vector length is validated
    /// before anything is sent, and the write is search-visible once
    /// this returns.
    async fn upsert(&self, chunk: &Chunk) -> Result<(), StoreError>;

    /// Up to `top_k` hits by descending cosine-similarity-equivalent
    /// score; equal scores keep first-indexed order.
    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, StoreError>;

    /// One row per distinct document name with its chunk count and the
    /// highest page number seen.
    async fn list_documents(&self) -> Result<Vec<DocumentSummary>, StoreError>;

    /// Point lookup; an absent id is `Ok(None)`, not an error.
    async fn get(&self, document_id: &str) -> Result<Option<StoredChunk>, StoreError>;
}

#[async_trait]
impl<S: VectorStore + ?Sized> VectorStore for Box<S> {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        (**self).ping().await
    }

    async fn create_index(&self, dimension: usize) -> Result<(), StoreError> {
        (**self).create_index(dimension).await
    }

    async fn delete_index(&self) -> Result<(), StoreError> {
        (**self).delete_index().await
    }

    async fn upsert(&self, chunk: &Chunk) -> Result<(), StoreError> {
        (**self).upsert(chunk).await
    }

    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, StoreError> {
        (**self).search(query_vector, top_k).await
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>, StoreError> {
        (**self).list_documents().await
    }

    async fn get(&self, document_id: &str) -> Result<Option<StoredChunk>, StoreError> {
        (**self).get(document_id).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Elasticsearch,
    OpenSearch,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "elasticsearch" => Ok(StoreBackend::Elasticsearch),
            "opensearch" => Ok(StoreBackend::OpenSearch),
            other => Err(format!(
                "unknown backend '{other}', expected elasticsearch or opensearch"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub endpoint: String,
    pub index: String,
    pub dimension: usize,
    pub request_timeout: Duration,
    pub max_connect_retries: usize,
    pub call_retries: usize,
    pub retry_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Elasticsearch,
            endpoint: "http://localhost:9200".to_string(),
            index: "medical_documents".to_string(),
            dimension: 768,
            request_timeout: Duration::from_secs(30),
            max_connect_retries: 10,
            call_retries: 3,
            retry_interval: Duration::from_secs(10),
        }
    }
}

/// Builds the configured backend and verifies the connection with
/// bounded retries. A backend that never answers is fatal for the whole
/// run, so this is the only place that blocks on connectivity.
pub async fn connect(config: &StoreConfig) -> Result<Box<dyn VectorStore>, StoreError> {
    let endpoint = Url::parse(&config.endpoint)?;
    let client = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()?;

    let store: Box<dyn VectorStore> = match config.backend {
        StoreBackend::Elasticsearch => Box::new(ElasticsearchStore::from_config(client, config)),
        StoreBackend::OpenSearch => Box::new(OpenSearchStore::from_config(client, config)),
    };

    let attempts = config.max_connect_retries.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match store.ping().await {
            Ok(()) => {
                info!(backend = ?config.backend, endpoint = %endpoint, "connected to index store");
                return Ok(store);
            }
            Err(error) => {
                warn!(
                    attempt,
                    max_attempts = attempts,
                    %error,
                    "index store connection failed"
                );
                last_error = error.to_string();
            }
        }

        if attempt < attempts {
            tokio::time::sleep(config.retry_interval).await;
        }
    }

    Err(StoreError::BackendUnavailable {
        attempts,
        details: last_error,
    })
}

/// Runs one store call with bounded retries on transient failures.
/// Validation errors and definitive backend answers fail fast.
pub(crate) async fn retry_transient<T, Fut, Op>(
    label: &str,
    attempts: usize,
    interval: Duration,
    mut op: Op,
) -> Result<T, StoreError>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let attempts = attempts.max(1);
    let mut last: Option<StoreError> = None;

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() => {
                warn!(attempt, max_attempts = attempts, %error, "{label} hit a transient error");
                last = Some(error);
                if attempt < attempts {
                    tokio::time::sleep(interval).await;
                }
            }
            Err(error) => return Err(error),
        }
    }

    Err(StoreError::BackendUnavailable {
        attempts,
        details: last.map(|error| error.to_string()).unwrap_or_default(),
    })
}

pub(crate) fn str_at(value: &Value, pointer: &str) -> String {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

pub(crate) fn opt_str_at(value: &Value, pointer: &str) -> Option<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
}

pub(crate) fn u64_at(value: &Value, pointer: &str) -> u64 {
    value.pointer(pointer).and_then(Value::as_u64).unwrap_or(0)
}

pub(crate) fn f64_at(value: &Value, pointer: &str) -> f64 {
    value
        .pointer(pointer)
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}

/// Serializes a chunk into the indexed document body. The vector field
/// name differs per backend, everything else is shared.
pub(crate) fn chunk_source(chunk: &Chunk, vector_field: &str) -> Value {
    let mut source = json!({
        "document_name": chunk.document_name,
        "chunk_index": chunk.chunk_index,
        "page_number": chunk.page_number,
        "section": chunk.section,
        "content": chunk.content,
        "context": chunk.context,
        "keywords": chunk.keywords,
        "extracted_date": chunk.extracted_date,
        "ingested_at": chunk.ingested_at,
    });
    source[vector_field] = json!(chunk.embedding);
    source
}

pub(crate) fn hit_from_parts(id: String, score: f64, source: &Value) -> SearchHit {
    SearchHit {
        id,
        document_name: str_at(source, "/document_name"),
        page_number: u64_at(source, "/page_number") as u32,
        section: str_at(source, "/section"),
        content: str_at(source, "/content"),
        extracted_date: opt_str_at(source, "/extracted_date"),
        score,
    }
}

pub(crate) fn stored_chunk_from_parts(id: String, source: &Value) -> StoredChunk {
    StoredChunk {
        id,
        document_name: str_at(source, "/document_name"),
        page_number: u64_at(source, "/page_number") as u32,
        section: str_at(source, "/section"),
        content: str_at(source, "/content"),
        extracted_date: opt_str_at(source, "/extracted_date"),
    }
}

pub(crate) fn summaries_from_buckets(response: &Value) -> Vec<DocumentSummary> {
    response
        .pointer("/aggregations/unique_documents/buckets")
        .and_then(Value::as_array)
        .map(|buckets| {
            buckets
                .iter()
                .map(|bucket| DocumentSummary {
                    document_name: str_at(bucket, "/key"),
                    chunk_count: u64_at(bucket, "/doc_count"),
                    total_pages: f64_at(bucket, "/max_page/value") as u32,
                })
                .collect()
        })
        .unwrap_or_default()
}
