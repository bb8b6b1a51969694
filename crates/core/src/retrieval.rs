use crate::encoder::{MeanPoolEncoder, TokenModel};
use crate::error::IngestError;
use crate::keywords::extract_keywords;
use crate::models::{DocumentMatches, KeywordSnippet, Query, RetrievedChunk, SearchHit};
use crate::store::VectorStore;
use regex::{Regex, RegexBuilder};
use std::collections::HashMap;
use tracing::debug;

/// Words in a keyword snippet.
const SNIPPET_WORDS: usize = 10;
/// Characters scanned on each side of a keyword when looking for a date.
const DATE_WINDOW_CHARS: usize = 100;

/// Executes a query end to end: embed, nearest-neighbor search, group
/// hits by owning document, and annotate each hit with the lexical
/// overlap between query keywords and chunk text.
pub struct RetrievalOrchestrator<M, S>
where
    M: TokenModel,
    S: VectorStore,
{
    encoder: MeanPoolEncoder<M>,
    store: S,
    date_patterns: Vec<Regex>,
}

impl<M, S> RetrievalOrchestrator<M, S>
where
    M: TokenModel,
    S: VectorStore,
{
    pub fn new(encoder: MeanPoolEncoder<M>, store: S) -> Result<Self, IngestError> {
        let date_patterns = [
            r"\b\d{1,2}/\d{1,2}/\d{2,4}\b",
            r"\b\d{1,2}-\d{1,2}-\d{2,4}\b",
            r"\b(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]* \d{1,2},? \d{4}\b",
            r"\b\d{1,2} (?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]* \d{4}\b",
            r"\b\d{4}-\d{1,2}-\d{1,2}\b",
            r"\b\d{1,2}\.\d{1,2}\.\d{2,4}\b",
        ]
        .iter()
        .map(|pattern| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(IngestError::from)
        })
        .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            encoder,
            store,
            date_patterns,
        })
    }

    /// Zero hits is an empty map, not an error. A blank query is an
    /// input error and is never retried.
    pub async fn retrieve(
        &self,
        query: &Query,
    ) -> Result<HashMap<String, DocumentMatches>, IngestError> {
        if query.text.trim().is_empty() {
            return Err(IngestError::InvalidArgument(
                "query text is empty".to_string(),
            ));
        }

        let query_terms = extract_keywords(&query.text);
        let vector = self.encoder.embed(&query.text).await?;
        let hits = self.store.search(&vector, query.top_k).await?;
        debug!(query = %query.text, hits = hits.len(), "vector search complete");

        let mut grouped: HashMap<String, DocumentMatches> = HashMap::new();
        for hit in hits {
            let document_name = hit.document_name.clone();
            let annotated = self.annotate(hit, &query_terms);
            grouped
                .entry(document_name.clone())
                .or_insert_with(|| DocumentMatches {
                    document_name,
                    chunks: Vec::new(),
                })
                .chunks
                .push(annotated);
        }

        for matches in grouped.values_mut() {
            // stable sort: equal scores keep first-indexed order
            matches
                .chunks
                .sort_by(|left, right| right.score.total_cmp(&left.score));
        }

        Ok(grouped)
    }

    fn annotate(&self, hit: SearchHit, query_terms: &[String]) -> RetrievedChunk {
        let lowered = hit.content.to_lowercase();
        let found_keywords: Vec<String> = query_terms
            .iter()
            .filter(|term| lowered.contains(term.as_str()))
            .cloned()
            .collect();

        let snippets = found_keywords
            .iter()
            .map(|keyword| KeywordSnippet {
                keyword: keyword.clone(),
                summary: keyword_summary(&hit.content, keyword, SNIPPET_WORDS),
                date: self
                    .date_near_keyword(&hit.content, keyword)
                    .or_else(|| hit.extracted_date.clone()),
            })
            .collect();

        RetrievedChunk {
            id: hit.id,
            page_number: hit.page_number,
            section: hit.section,
            content: hit.content,
            extracted_date: hit.extracted_date,
            score: hit.score,
            semantic_only: found_keywords.is_empty(),
            found_keywords,
            snippets,
        }
    }

    /// Latest date found within a bounded window around the keyword.
    fn date_near_keyword(&self, text: &str, keyword: &str) -> Option<String> {
        let lowered = text.to_lowercase();
        let position = lowered.find(&keyword.to_lowercase())?;

        let mut start = position.saturating_sub(DATE_WINDOW_CHARS);
        while !text.is_char_boundary(start) {
            start -= 1;
        }
        let mut end = (position + keyword.len() + DATE_WINDOW_CHARS).min(text.len());
        while !text.is_char_boundary(end) {
            end += 1;
        }
        let nearby = &text[start..end];

        for pattern in &self.date_patterns {
            if let Some(found) = pattern.find_iter(nearby).last() {
                return Some(found.as_str().to_string());
            }
        }
        None
    }
}

/// Window of about `max_words` words centered on the first occurrence of
/// the keyword, clamped at the text edges.
fn keyword_summary(text: &str, keyword: &str, max_words: usize) -> String {
    let keyword_lower = keyword.to_lowercase();
    let words: Vec<&str> = text.split_whitespace().collect();

    let Some(position) = words
        .iter()
        .position(|word| word.to_lowercase().contains(&keyword_lower))
    else {
        return format!("Summary for {keyword}");
    };

    let before = (max_words - 1) / 2;
    let after = max_words - 1 - before;

    let mut start = position.saturating_sub(before);
    let mut end = (position + after + 1).min(words.len());

    if start == 0 {
        end = words.len().min(max_words);
    } else if end == words.len() {
        start = words.len().saturating_sub(max_words);
    }

    words[start..end].join(" ")
}
