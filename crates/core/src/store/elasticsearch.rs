use super::{
    chunk_source, hit_from_parts, retry_transient, str_at, stored_chunk_from_parts,
    summaries_from_buckets, StoreConfig, VectorStore,
};
use crate::error::StoreError;
use crate::models::{Chunk, DocumentSummary, SearchHit, StoredChunk};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

/// Elasticsearch backend: `dense_vector` field searched with a
/// `script_score` cosine similarity query.
pub struct ElasticsearchStore {
    client: Client,
    endpoint: String,
    index: String,
    dimension: usize,
    call_retries: usize,
    retry_interval: Duration,
}

impl ElasticsearchStore {
    pub fn from_config(client: Client, config: &StoreConfig) -> Self {
        Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            index: config.index.clone(),
            dimension: config.dimension,
            call_retries: config.call_retries,
            retry_interval: config.retry_interval,
        }
    }

    fn index_url(&self) -> String {
        format!("{}/{}", self.endpoint, self.index)
    }

    fn mapping_body(&self, dimension: usize) -> Value {
        json!({
            "mappings": {
                "properties": {
                    "document_name": {"type": "keyword"},
                    "chunk_index": {"type": "long"},
                    "page_number": {"type": "integer"},
                    "section": {"type": "keyword"},
                    "content": {"type": "text"},
                    "context": {"type": "text"},
                    "keywords": {"type": "keyword"},
                    "extracted_date": {"type": "keyword"},
                    "ingested_at": {"type": "date"},
                    "vector": {
                        "type": "dense_vector",
                        "dims": dimension
                    }
                }
            }
        })
    }

    async fn create_index_once(&self, dimension: usize) -> Result<(), StoreError> {
        let response = self.client.head(self.index_url()).send().await?;

        if response.status() == StatusCode::OK {
            let response = self
                .client
                .get(format!("{}/_mapping", self.index_url()))
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(self.unexpected(response.status()));
            }

            let mapping: Value = response.json().await?;
            let existing = mapping
                .pointer(&format!(
                    "/{}/mappings/properties/vector/dims",
                    self.index
                ))
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize;

            if existing != dimension {
                return Err(StoreError::DimensionMismatch {
                    existing,
                    configured: dimension,
                });
            }
            return Ok(());
        }

        if !response.status().is_client_error() {
            return Err(self.unexpected(response.status()));
        }

        let response = self
            .client
            .put(self.index_url())
            .json(&self.mapping_body(dimension))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.unexpected(response.status()));
        }

        Ok(())
    }

    async fn upsert_once(&self, chunk: &Chunk, source: &Value) -> Result<(), StoreError> {
        let response = self
            .client
            .put(format!(
                "{}/_doc/{}?refresh=true",
                self.index_url(),
                chunk.id
            ))
            .json(source)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.unexpected(response.status()));
        }

        let body: Value = response.json().await?;
        match str_at(&body, "/result").as_str() {
            "created" | "updated" => Ok(()),
            other => Err(StoreError::BackendResponse {
                backend: "elasticsearch".to_string(),
                details: format!("unexpected index result '{other}'"),
            }),
        }
    }

    async fn search_once(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let body = json!({
            "size": top_k,
            "query": {
                "script_score": {
                    "query": {"match_all": {}},
                    "script": {
                        "source": "cosineSimilarity(params.query_vector, 'vector') + 1.0",
                        "params": {"query_vector": query_vector}
                    }
                }
            },
            "_source": [
                "document_name", "page_number", "section", "content", "extracted_date"
            ]
        });

        let response = self
            .client
            .post(format!("{}/_search", self.index_url()))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.unexpected(response.status()));
        }

        let parsed: Value = response.json().await?;
        let hits = parsed
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(hits
            .iter()
            .map(|hit| {
                let id = str_at(hit, "/_id");
                let score = hit.pointer("/_score").and_then(Value::as_f64).unwrap_or(0.0);
                let source = hit.pointer("/_source").cloned().unwrap_or(Value::Null);
                hit_from_parts(id, score, &source)
            })
            .collect())
    }

    async fn list_documents_once(&self) -> Result<Vec<DocumentSummary>, StoreError> {
        let body = json!({
            "size": 0,
            "aggs": {
                "unique_documents": {
                    "terms": {
                        "field": "document_name",
                        "size": 1000
                    },
                    "aggs": {
                        "max_page": {
                            "max": {
                                "field": "page_number"
                            }
                        }
                    }
                }
            }
        });

        let response = self
            .client
            .post(format!("{}/_search", self.index_url()))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.unexpected(response.status()));
        }

        let parsed: Value = response.json().await?;
        Ok(summaries_from_buckets(&parsed))
    }

    async fn get_once(&self, document_id: &str) -> Result<Option<StoredChunk>, StoreError> {
        let response = self
            .client
            .get(format!("{}/_doc/{}", self.index_url(), document_id))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(self.unexpected(response.status()));
        }

        let body: Value = response.json().await?;
        let id = str_at(&body, "/_id");
        let source = body.pointer("/_source").cloned().unwrap_or(Value::Null);
        Ok(Some(stored_chunk_from_parts(id, &source)))
    }

    async fn delete_index_once(&self) -> Result<(), StoreError> {
        let response = self.client.delete(self.index_url()).send().await?;

        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }

        Err(self.unexpected(response.status()))
    }

    fn unexpected(&self, status: StatusCode) -> StoreError {
        StoreError::BackendResponse {
            backend: "elasticsearch".to_string(),
            details: status.to_string(),
        }
    }
}

#[async_trait]
impl VectorStore for ElasticsearchStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let response = self.client.get(self.endpoint.as_str()).send().await?;
        if !response.status().is_success() {
            return Err(self.unexpected(response.status()));
        }
        Ok(())
    }

    async fn create_index(&self, dimension: usize) -> Result<(), StoreError> {
        if dimension != self.dimension {
            return Err(StoreError::DimensionMismatch {
                existing: self.dimension,
                configured: dimension,
            });
        }

        retry_transient(
            "elasticsearch create_index",
            self.call_retries,
            self.retry_interval,
            || self.create_index_once(dimension),
        )
        .await
    }

    async fn delete_index(&self) -> Result<(), StoreError> {
        retry_transient(
            "elasticsearch delete_index",
            self.call_retries,
            self.retry_interval,
            || self.delete_index_once(),
        )
        .await
    }

    async fn upsert(&self, chunk: &Chunk) -> Result<(), StoreError> {
        if chunk.embedding.len() != self.dimension {
            return Err(StoreError::InvalidVector {
                expected: self.dimension,
                actual: chunk.embedding.len(),
            });
        }

        let source = chunk_source(chunk, "vector");
        retry_transient(
            "elasticsearch upsert",
            self.call_retries,
            self.retry_interval,
            || self.upsert_once(chunk, &source),
        )
        .await
    }

    async fn search(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, StoreError> {
        if query_vector.len() != self.dimension {
            return Err(StoreError::InvalidVector {
                expected: self.dimension,
                actual: query_vector.len(),
            });
        }

        retry_transient(
            "elasticsearch search",
            self.call_retries,
            self.retry_interval,
            || self.search_once(query_vector, top_k),
        )
        .await
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>, StoreError> {
        retry_transient(
            "elasticsearch list_documents",
            self.call_retries,
            self.retry_interval,
            || self.list_documents_once(),
        )
        .await
    }

    async fn get(&self, document_id: &str) -> Result<Option<StoredChunk>, StoreError> {
        retry_transient(
            "elasticsearch get",
            self.call_retries,
            self.retry_interval,
            || self.get_once(document_id),
        )
        .await
    }
}
