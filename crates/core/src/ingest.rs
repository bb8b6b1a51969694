use crate::encoder::{MeanPoolEncoder, TokenModel};
use crate::error::IngestError;
use crate::models::{
    Chunk, ChunkDraft, Document, IngestionReport, ProcessedDocument, SkippedDocument,
};
use crate::segmenter::Segmenter;
use crate::store::VectorStore;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

/// Segments, embeds, and indexes one document. Chunks that fail to
/// produce a usable embedding are skipped; store errors abort this
/// document only.
pub async fn ingest_document<M: TokenModel>(
    document: &Document,
    segmenter: &Segmenter,
    encoder: &MeanPoolEncoder<M>,
    store: &dyn VectorStore,
) -> Result<ProcessedDocument, IngestError> {
    let text = document.full_text();
    if text.trim().is_empty() {
        return Err(IngestError::EmptyDocument(document.name.clone()));
    }

    let drafts = segmenter.segment(&text);
    if drafts.is_empty() {
        return Err(IngestError::EmptyDocument(document.name.clone()));
    }

    let mut indexed = 0usize;
    let mut skipped = 0usize;

    // Writes go out strictly in chunk-index order, whatever order the
    // embedding calls complete in.
    for (index, draft) in drafts.into_iter().enumerate() {
        let embedding = match encoder.embed(&draft.context).await {
            Ok(vector) => vector,
            Err(error) => {
                warn!(
                    document = %document.name,
                    chunk_index = index,
                    %error,
                    "skipping chunk without a usable embedding"
                );
                skipped += 1;
                continue;
            }
        };

        let chunk = assemble_chunk(&document.name, index as u64, draft, embedding);
        store.upsert(&chunk).await?;
        indexed += 1;
    }

    info!(
        document = %document.name,
        chunks_indexed = indexed,
        chunks_skipped = skipped,
        "document ingested"
    );

    Ok(ProcessedDocument {
        document_name: document.name.clone(),
        chunks_indexed: indexed,
        chunks_skipped: skipped,
    })
}

/// Best-effort bulk ingestion: a failing document is recorded and the
/// run continues. Only an unreachable store — caught before this by
/// `store::connect` — is fatal for a run.
pub async fn ingest_documents<M: TokenModel>(
    documents: &[Document],
    segmenter: &Segmenter,
    encoder: &MeanPoolEncoder<M>,
    store: &dyn VectorStore,
) -> Result<IngestionReport, IngestError> {
    let run_id = Uuid::new_v4();
    info!(%run_id, documents = documents.len(), "starting ingestion run");

    let mut processed = Vec::new();
    let mut skipped = Vec::new();

    for document in documents {
        match ingest_document(document, segmenter, encoder, store).await {
            Ok(outcome) => processed.push(outcome),
            Err(error) => {
                warn!(document = %document.name, %error, "document skipped");
                skipped.push(SkippedDocument {
                    document_name: document.name.clone(),
                    reason: error.to_string(),
                });
            }
        }
    }

    info!(
        %run_id,
        processed = processed.len(),
        skipped = skipped.len(),
        "ingestion run finished"
    );

    Ok(IngestionReport {
        run_id,
        processed,
        skipped,
    })
}

/// Deletes and recreates the index, then re-ingests everything. This is
/// the only path that destroys chunks. Callers must quiesce all other
/// writers and searchers against this index for the duration.
pub async fn reindex<M: TokenModel>(
    documents: &[Document],
    segmenter: &Segmenter,
    encoder: &MeanPoolEncoder<M>,
    store: &dyn VectorStore,
) -> Result<IngestionReport, IngestError> {
    store.delete_index().await?;
    store.create_index(store.dimension()).await?;
    ingest_documents(documents, segmenter, encoder, store).await
}

fn assemble_chunk(
    document_name: &str,
    chunk_index: u64,
    draft: ChunkDraft,
    embedding: Vec<f32>,
) -> Chunk {
    let id = chunk_id(document_name, draft.page_number, chunk_index, &draft.content);
    Chunk {
        id,
        document_name: document_name.to_string(),
        chunk_index,
        page_number: draft.page_number,
        section: draft.section,
        content: draft.content,
        context: draft.context,
        keywords: draft.keywords,
        extracted_date: draft.extracted_date,
        embedding,
        ingested_at: Utc::now(),
    }
}

pub fn chunk_id(document_name: &str, page: u32, index: u64, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_name.as_bytes());
    hasher.update(page.to_le_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::{chunk_id, ingest_document, ingest_documents};
    use crate::encoder::{HashedNgramModel, MeanPoolEncoder, TokenModel};
    use crate::error::{EncodeError, IngestError, StoreError};
    use crate::models::{Chunk, Document, DocumentSummary, SearchHit, StoredChunk};
    use crate::segmenter::{Segmenter, SegmenterConfig};
    use crate::store::VectorStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct RecordingStore {
        dimension: usize,
        written: Mutex<Vec<Chunk>>,
    }

    impl RecordingStore {
        fn new(dimension: usize) -> Self {
            Self {
                dimension,
                written: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl VectorStore for RecordingStore {
        fn dimension(&self) -> usize {
            self.dimension
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }

        async fn create_index(&self, _dimension: usize) -> Result<(), StoreError> {
            Ok(())
        }

        async fn delete_index(&self) -> Result<(), StoreError> {
            Ok(())
        }

        async fn upsert(&self, chunk: &Chunk) -> Result<(), StoreError> {
            if chunk.embedding.len() != self.dimension {
                return Err(StoreError::InvalidVector {
                    expected: self.dimension,
                    actual: chunk.embedding.len(),
                });
            }
            self.written.lock().unwrap().push(chunk.clone());
            Ok(())
        }

        async fn search(
            &self,
            _query_vector: &[f32],
            _top_k: usize,
        ) -> Result<Vec<SearchHit>, StoreError> {
            Ok(Vec::new())
        }

        async fn list_documents(&self) -> Result<Vec<DocumentSummary>, StoreError> {
            Ok(Vec::new())
        }

        async fn get(&self, _document_id: &str) -> Result<Option<StoredChunk>, StoreError> {
            Ok(None)
        }
    }

    /// Errors on any window mentioning the marker word.
    struct FlakyModel {
        inner: HashedNgramModel,
    }

    #[async_trait]
    impl TokenModel for FlakyModel {
        fn dimension(&self) -> usize {
            self.inner.dimension
        }

        fn max_input_chars(&self) -> usize {
            self.inner.max_input_chars
        }

        async fn token_states(&self, text: &str) -> Result<Vec<Vec<f32>>, EncodeError> {
            if text.contains("unreadable") {
                return Err(EncodeError::Endpoint("model refused the span".to_string()));
            }
            self.inner.token_states(text).await
        }
    }

    fn small_segmenter() -> Segmenter {
        Segmenter::new(SegmenterConfig {
            max_chars: 80,
            overlap_chars: 10,
            min_chunk_chars: 20,
            ..SegmenterConfig::default()
        })
        .unwrap()
    }

    fn encoder() -> MeanPoolEncoder<HashedNgramModel> {
        MeanPoolEncoder::new(HashedNgramModel {
            dimension: 16,
            max_input_chars: 4096,
        })
    }

    #[tokio::test]
    async fn chunks_are_written_in_chunk_index_order() {
        let store = RecordingStore::new(16);
        let document = Document::from_text(
            "progress_note.txt",
            concat!(
                "The patient described persistent chest tightness radiating to the left arm",
                "\n\n",
                "Blood pressure readings remained elevated throughout the observation period",
                "\n\n",
                "Follow up imaging confirmed gradual improvement in the lung opacity",
            ),
        );

        let outcome = ingest_document(&document, &small_segmenter(), &encoder(), &store)
            .await
            .unwrap();

        assert_eq!(outcome.chunks_indexed, 3);
        let written = store.written.lock().unwrap();
        let indices: Vec<u64> = written.iter().map(|chunk| chunk.chunk_index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert!(written.iter().all(|chunk| chunk.embedding.len() == 16));
    }

    #[tokio::test]
    async fn empty_document_is_an_ingestion_failure_not_a_crash() {
        let store = RecordingStore::new(16);
        let document = Document::from_text("empty.txt", "   ");

        let result = ingest_document(&document, &small_segmenter(), &encoder(), &store).await;

        assert!(matches!(result, Err(IngestError::EmptyDocument(_))));
        assert!(store.written.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn encoding_failure_skips_the_chunk_and_continues() {
        let store = RecordingStore::new(16);
        let encoder = MeanPoolEncoder::new(FlakyModel {
            inner: HashedNgramModel {
                dimension: 16,
                max_input_chars: 4096,
            },
        });
        let document = Document::from_text(
            "scan.txt",
            concat!(
                "The patient described persistent chest tightness radiating to the left arm",
                "\n\n",
                "SECTION BREAK RESET",
                "\n\n",
                "This span is unreadable noise from a failed optical conversion step",
            ),
        );

        let outcome = ingest_document(&document, &small_segmenter(), &encoder, &store)
            .await
            .unwrap();

        assert_eq!(outcome.chunks_indexed, 1);
        assert_eq!(outcome.chunks_skipped, 1);
        assert_eq!(store.written.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bulk_ingestion_reports_failures_without_aborting() {
        let store = RecordingStore::new(16);
        let documents = vec![
            Document::from_text("empty.txt", ""),
            Document::from_text(
                "note.txt",
                "Blood pressure readings remained elevated throughout the observation period",
            ),
        ];

        let report = ingest_documents(&documents, &small_segmenter(), &encoder(), &store)
            .await
            .unwrap();

        assert_eq!(report.processed.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].document_name, "empty.txt");
        assert_eq!(report.total_chunks_indexed(), 1);
    }

    #[test]
    fn chunk_ids_are_stable_for_identical_input() {
        let first = chunk_id("note.txt", 3, 7, "elevated blood pressure");
        let second = chunk_id("note.txt", 3, 7, "elevated blood pressure");
        assert_eq!(first, second);
        assert_ne!(first, chunk_id("note.txt", 3, 8, "elevated blood pressure"));
    }
}
