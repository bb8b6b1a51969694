use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Raw document as delivered by the text-extraction collaborator.
/// The pipeline never reads files itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub name: String,
    pub pages: Vec<String>,
}

impl Document {
    pub fn from_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pages: vec![text.into()],
        }
    }

    /// Full document text with form feeds between pages, so explicit page
    /// boundaries survive into segmentation.
    pub fn full_text(&self) -> String {
        self.pages.join("\u{000C}")
    }
}

/// Segmenter output before embedding and identity assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkDraft {
    pub page_number: u32,
    pub section: String,
    pub content: String,
    /// Rolling window of recent sibling chunks, used to enrich the
    /// embedding input.
    pub context: String,
    pub keywords: Vec<String>,
    pub extracted_date: Option<String>,
}

/// An indexed chunk. Immutable once written; destroyed only by a full
/// index delete and recreate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_name: String,
    pub chunk_index: u64,
    pub page_number: u32,
    pub section: String,
    pub content: String,
    pub context: String,
    pub keywords: Vec<String>,
    pub extracted_date: Option<String>,
    pub embedding: Vec<f32>,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Query {
    pub text: String,
    pub top_k: usize,
}

impl Query {
    pub fn new(text: impl Into<String>, top_k: usize) -> Self {
        Self {
            text: text.into(),
            top_k,
        }
    }
}

/// One nearest-neighbor result as returned by any store backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub document_name: String,
    pub page_number: u32,
    pub section: String,
    pub content: String,
    pub extracted_date: Option<String>,
    pub score: f64,
}

/// Point-lookup result; same shape as a hit minus the score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunk {
    pub id: String,
    pub document_name: String,
    pub page_number: u32,
    pub section: String,
    pub content: String,
    pub extracted_date: Option<String>,
}

/// Ten-word window around a matched query keyword.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordSnippet {
    pub keyword: String,
    pub summary: String,
    pub date: Option<String>,
}

/// A search hit annotated with lexical-overlap evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub id: String,
    pub page_number: u32,
    pub section: String,
    pub content: String,
    pub extracted_date: Option<String>,
    pub score: f64,
    pub found_keywords: Vec<String>,
    /// True when no query keyword appears verbatim in the chunk, i.e.
    /// the hit is carried by vector similarity alone.
    pub semantic_only: bool,
    pub snippets: Vec<KeywordSnippet>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMatches {
    pub document_name: String,
    pub chunks: Vec<RetrievedChunk>,
}

/// Listing aggregate, one row per distinct document name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub document_name: String,
    pub chunk_count: u64,
    pub total_pages: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedDocument {
    pub document_name: String,
    pub chunks_indexed: usize,
    pub chunks_skipped: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedDocument {
    pub document_name: String,
    pub reason: String,
}

/// Best-effort bulk ingestion outcome: a success list plus skip reasons,
/// never a hard failure for a single bad document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionReport {
    pub run_id: Uuid,
    pub processed: Vec<ProcessedDocument>,
    pub skipped: Vec<SkippedDocument>,
}

impl IngestionReport {
    pub fn total_chunks_indexed(&self) -> usize {
        self.processed.iter().map(|doc| doc.chunks_indexed).sum()
    }
}
