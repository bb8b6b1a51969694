pub mod batch;
pub mod encoder;
pub mod error;
pub mod ingest;
pub mod keywords;
pub mod models;
pub mod retrieval;
pub mod segmenter;
pub mod store;

pub use batch::{partition, Batch, BatchItem, CharTokenCounter, TokenCounter};
pub use encoder::{HashedNgramModel, HttpTokenModel, MeanPoolEncoder, TokenModel};
pub use error::{EncodeError, IngestError, StoreError};
pub use ingest::{chunk_id, ingest_document, ingest_documents, reindex};
pub use keywords::extract_keywords;
pub use models::{
    Chunk, ChunkDraft, Document, DocumentMatches, DocumentSummary, IngestionReport,
    KeywordSnippet, ProcessedDocument, Query, RetrievedChunk, SearchHit, SkippedDocument,
    StoredChunk,
};
pub use retrieval::RetrievalOrchestrator;
pub use segmenter::{Segmenter, SegmenterConfig};
pub use store::{
    connect, ElasticsearchStore, OpenSearchStore, StoreBackend, StoreConfig, VectorStore,
};
