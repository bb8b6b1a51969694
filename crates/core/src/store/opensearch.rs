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

/// OpenSearch backend: `knn_vector` field with an HNSW cosine index,
/// searched with the `knn` query clause.
pub struct OpenSearchStore {
    client: Client,
    endpoint: String,
    index: String,
    dimension: usize,
    call_retries: usize,
    retry_interval: Duration,
}

impl OpenSearchStore {
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
            "settings": {
                "index": {
                    "knn": true,
                    "knn.algo_param.ef_search": 100,
                    "number_of_shards": 1,
                    "number_of_replicas": 1
                }
            },
            "mappings": {
                "properties": {
                    "document_name": {"type": "keyword"},
                    "chunk_index": {"type": "integer"},
                    "page_number": {"type": "integer"},
                    "section": {"type": "keyword"},
                    "content": {"type": "text", "analyzer": "standard"},
                    "context": {"type": "text"},
                    "keywords": {"type": "keyword"},
                    "extracted_date": {"type": "keyword"},
                    "ingested_at": {"type": "date"},
                    "embedding": {
                        "type": "knn_vector",
                        "dimension": dimension,
                        "method": {
                            "name": "hnsw",
                            "space_type": "cosinesimil",
                            "engine": "nmslib",
                            "parameters": {
                                "ef_construction": 200,
                                "m": 16
                            }
                        }
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
                    "/{}/mappings/properties/embedding/dimension",
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
                backend: "opensearch".to_string(),
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
                "knn": {
                    "embedding": {
                        "vector": query_vector,
                        "k": top_k
                    }
                }
            },
            "_source": {
                "includes": [
                    "document_name", "page_number", "section", "content", "extracted_date"
                ]
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
            backend: "opensearch".to_string(),
            details: status.to_string(),
        }
    }
}

#[async_trait]
impl VectorStore for OpenSearchStore {
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
            "opensearch create_index",
            self.call_retries,
            self.retry_interval,
            || self.create_index_once(dimension),
        )
        .await
    }

    async fn delete_index(&self) -> Result<(), StoreError> {
        retry_transient(
            "opensearch delete_index",
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

        let source = chunk_source(chunk, "embedding");
        retry_transient(
            "opensearch upsert",
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
            "opensearch search",
            self.call_retries,
            self.retry_interval,
            || self.search_once(query_vector, top_k),
        )
        .await
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>, StoreError> {
        retry_transient(
            "opensearch list_documents",
            self.call_retries,
            self.retry_interval,
            || self.list_documents_once(),
        )
        .await
    }

    async fn get(&self, document_id: &str) -> Result<Option<StoredChunk>, StoreError> {
        retry_transient(
            "opensearch get",
            self.call_retries,
            self.retry_interval,
            || self.get_once(document_id),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::OpenSearchStore;
    use crate::error::StoreError;
    use crate::models::Chunk;
    use crate::store::{StoreBackend, StoreConfig, VectorStore};
    use chrono::Utc;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    fn store_for(server: &MockServer) -> OpenSearchStore {
        let config = StoreConfig {
            backend: StoreBackend::OpenSearch,
            endpoint: server.base_url(),
            index: "medical_documents".to_string(),
            dimension: 3,
            request_timeout: Duration::from_secs(2),
            max_connect_retries: 1,
            call_retries: 1,
            retry_interval: Duration::from_millis(1),
        };
        OpenSearchStore::from_config(reqwest::Client::new(), &config)
    }

    fn chunk_with_vector(vector: Vec<f32>) -> Chunk {
        Chunk {
            id: "discharge_summary_1".to_string(),
            document_name: "discharge_summary.txt".to_string(),
            chunk_index: 0,
            page_number: 1,
            section: "main".to_string(),
            content: "elevated blood pressure".to_string(),
            context: "elevated blood pressure".to_string(),
            keywords: vec!["blood".to_string(), "elevated".to_string()],
            extracted_date: None,
            embedding: vector,
            ingested_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_rejects_wrong_length_vector() {
        let server = MockServer::start_async().await;
        let store = store_for(&server);

        let result = store
            .upsert(&chunk_with_vector(vec![0.1, 0.2, 0.3, 0.4]))
            .await;

        assert!(matches!(
            result,
            Err(StoreError::InvalidVector {
                expected: 3,
                actual: 4
            })
        ));
    }

    #[tokio::test]
    async fn missing_index_is_created_with_knn_mapping() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(httpmock::Method::HEAD).path("/medical_documents");
            then.status(404);
        });
        let create = server.mock(|when, then| {
            when.method(PUT)
                .path("/medical_documents")
                .json_body_partial(
                    json!({
                        "mappings": {
                            "properties": {
                                "embedding": {
                                    "type": "knn_vector",
                                    "dimension": 3
                                }
                            }
                        }
                    })
                    .to_string(),
                );
            then.status(200).json_body(json!({"acknowledged": true}));
        });

        let store = store_for(&server);
        store.create_index(3).await.unwrap();

        create.assert();
    }

    #[tokio::test]
    async fn search_uses_knn_query_and_parses_hits() {
        let server = MockServer::start_async().await;
        let search = server.mock(|when, then| {
            when.method(POST)
                .path("/medical_documents/_search")
                .json_body_partial(
                    json!({
                        "query": {
                            "knn": {
                                "embedding": {
                                    "vector": [0.5, 0.5, 0.0],
                                    "k": 2
                                }
                            }
                        }
                    })
                    .to_string(),
                );
            then.status(200).json_body(json!({
                "hits": {
                    "hits": [
                        {
                            "_id": "discharge_summary_1",
                            "_score": 0.92,
                            "_source": {
                                "document_name": "discharge_summary.txt",
                                "page_number": 4,
                                "section": "ASSESSMENT",
                                "content": "elevated blood pressure",
                                "extracted_date": "02/16/2022"
                            }
                        }
                    ]
                }
            }));
        });

        let store = store_for(&server);
        let hits = store.search(&[0.5, 0.5, 0.0], 2).await.unwrap();

        search.assert();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_name, "discharge_summary.txt");
        assert_eq!(hits[0].section, "ASSESSMENT");
        assert_eq!(hits[0].extracted_date.as_deref(), Some("02/16/2022"));
    }

    #[tokio::test]
    async fn listing_aggregates_chunk_counts_and_max_page() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/medical_documents/_search");
            then.status(200).json_body(json!({
                "aggregations": {
                    "unique_documents": {
                        "buckets": [
                            {
                                "key": "discharge_summary.txt",
                                "doc_count": 12,
                                "max_page": {"value": 4.0}
                            },
                            {
                                "key": "progress_note.txt",
                                "doc_count": 3,
                                "max_page": {"value": 1.0}
                            }
                        ]
                    }
                }
            }));
        });

        let store = store_for(&server);
        let documents = store.list_documents().await.unwrap();

        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0].document_name, "discharge_summary.txt");
        assert_eq!(documents[0].chunk_count, 12);
        assert_eq!(documents[0].total_pages, 4);
    }
}
