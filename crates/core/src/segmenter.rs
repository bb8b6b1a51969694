use crate::error::IngestError;
use crate::keywords::extract_keywords;
use crate::models::ChunkDraft;
use regex::{Regex, RegexBuilder};
use std::collections::VecDeque;

/// Windows of preceding sibling chunks kept as embedding context.
const SECTION_CONTEXT_WINDOWS: usize = 3;

/// Separator hierarchy for window splitting, coarsest first. The empty
/// string is the hard character-split fallback.
const SEPARATORS: &[&str] = &["\n\n", "\n", ".", "!", "?", ",", " ", ""];

/// Instructional/template text that must never reach the index. Matched
/// case-insensitively anywhere in a window; the anchored patterns reject
/// blank and digit-only windows outright.
const DEFAULT_BOILERPLATE: &[&str] = &[
    r"Please index all documents you have reviewed",
    r"This should include medical records",
    r"VA benefit records",
    r"transcripts",
    r"MEDICAL RECORD REVIEW",
    r"Record Index",
    r"\[.*?\]",
    r"^\s*$",
    r"^\s*\d+\s*$",
];

#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub min_chunk_chars: usize,
    /// Synthetic paging rate when no explicit page markers are found.
    /// Tuned against the observed corpus, not a general constant.
    pub words_per_page: usize,
    pub boilerplate_patterns: Vec<String>,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            max_chars: 2_000,
            overlap_chars: 200,
            min_chunk_chars: 50,
            words_per_page: 500,
            boilerplate_patterns: DEFAULT_BOILERPLATE
                .iter()
                .map(|pattern| pattern.to_string())
                .collect(),
        }
    }
}

/// Splits raw document text into page-estimated, section-aware
/// overlapping windows. Operates on text only; extraction from files is
/// someone else's job.
pub struct Segmenter {
    config: SegmenterConfig,
    boilerplate: Vec<Regex>,
    page_line: Regex,
    bare_number_line: Regex,
    section_prefix: Regex,
    page_markers: Vec<Regex>,
    date: Regex,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Result<Self, IngestError> {
        let boilerplate = config
            .boilerplate_patterns
            .iter()
            .map(|pattern| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(IngestError::from)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            config,
            boilerplate,
            page_line: Regex::new(r"(?i)\n\s*page\s+\d+\s*\n")?,
            bare_number_line: Regex::new(r"\n\s*\d+\s*\n")?,
            section_prefix: Regex::new(r"^[A-Z][a-z]+:")?,
            page_markers: vec![
                Regex::new(r"(?i)page\s+(\d+)")?,
                Regex::new(r"(?i)p\.\s*(\d+)")?,
                Regex::new(r"(?m)^\s*(\d+)\s*$")?,
            ],
            date: Regex::new(r"\b\d{1,2}/\d{1,2}/\d{2,4}\b")?,
        })
    }

    pub fn with_defaults() -> Result<Self, IngestError> {
        Self::new(SegmenterConfig::default())
    }

    /// Produces ordered chunk drafts for one document. Empty input yields
    /// an empty list; any other input yields at least the fallback chunk.
    pub fn segment(&self, document_text: &str) -> Vec<ChunkDraft> {
        if document_text.trim().is_empty() {
            return Vec::new();
        }

        let mut drafts = Vec::new();
        let mut current_section = String::from("main");
        let mut section_context: VecDeque<String> = VecDeque::new();

        for (page_number, page_text) in self.estimate_pages(document_text) {
            for window in self.split_text(&page_text) {
                let trimmed = window.trim();
                if trimmed.is_empty() || self.is_boilerplate(&window) {
                    continue;
                }

                if looks_all_uppercase(trimmed) || self.section_prefix.is_match(trimmed) {
                    current_section = trimmed.to_string();
                    section_context.clear();
                    push_context(&mut section_context, window);
                    continue;
                }

                push_context(&mut section_context, window.clone());

                if trimmed.len() < self.config.min_chunk_chars {
                    continue;
                }

                let context = section_context
                    .iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(" ");

                // A marker inside the window itself beats the estimate.
                let page = self.extract_page_number(&window).unwrap_or(page_number);

                drafts.push(ChunkDraft {
                    page_number: page,
                    section: current_section.clone(),
                    content: trimmed.to_string(),
                    keywords: extract_keywords(&context),
                    extracted_date: self.extract_date(&window),
                    context,
                });
            }
        }

        if drafts.is_empty() {
            let text = document_text.trim().to_string();
            drafts.push(ChunkDraft {
                page_number: 1,
                section: "main".to_string(),
                content: text.clone(),
                keywords: extract_keywords(&text),
                extracted_date: self.extract_date(&text),
                context: text,
            });
        }

        drafts
    }

    /// Splits on explicit page-break markers; when more than one part
    /// results, each part is one page. Otherwise falls back to synthetic
    /// paging at `words_per_page`.
    fn estimate_pages(&self, text: &str) -> Vec<(u32, String)> {
        let mut parts: Vec<String> = vec![text.to_string()];

        parts = parts
            .iter()
            .flat_map(|part| self.page_line.split(part).map(str::to_string))
            .collect();
        parts = parts
            .iter()
            .flat_map(|part| part.split('\u{000C}').map(str::to_string))
            .collect();
        parts = parts
            .iter()
            .flat_map(|part| self.split_on_bare_number_lines(part))
            .collect();

        if parts.len() > 1 {
            return parts
                .into_iter()
                .enumerate()
                .filter(|(_, part)| !part.trim().is_empty())
                .map(|(index, part)| ((index + 1) as u32, part.trim().to_string()))
                .collect();
        }

        let words: Vec<&str> = text.split_whitespace().collect();
        words
            .chunks(self.config.words_per_page.max(1))
            .enumerate()
            .map(|(index, page)| ((index + 1) as u32, page.join(" ")))
            .collect()
    }

    /// A bare number on its own line counts as a page break only when
    /// real content follows it. The regex crate has no lookahead, so the
    /// followed-by-content check is done manually.
    fn split_on_bare_number_lines(&self, text: &str) -> Vec<String> {
        let mut parts = Vec::new();
        let mut last = 0;

        for found in self.bare_number_line.find_iter(text) {
            let followed_by_content = text[found.end()..]
                .chars()
                .next()
                .is_some_and(|ch| !ch.is_whitespace());

            if followed_by_content {
                parts.push(text[last..found.start()].to_string());
                last = found.end();
            }
        }

        parts.push(text[last..].to_string());
        parts
    }

    /// Splits one page into overlapping windows of at most `max_chars`,
    /// walking the separator hierarchy and preserving separators so
    /// context survives the cut.
    fn split_text(&self, text: &str) -> Vec<String> {
        self.split_with(text, SEPARATORS)
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let max = self.config.max_chars;

        let (separator, remaining): (&str, &[&str]) = match separators
            .iter()
            .position(|sep| sep.is_empty() || text.contains(sep))
        {
            Some(index) => (separators[index], &separators[index + 1..]),
            None => ("", &[]),
        };

        let splits = if separator.is_empty() {
            hard_split(text, max)
        } else {
            split_keeping_separator(text, separator)
        };

        let mut windows = Vec::new();
        let mut mergeable: Vec<String> = Vec::new();

        for split in splits {
            if split.len() < max {
                mergeable.push(split);
                continue;
            }

            if !mergeable.is_empty() {
                windows.extend(self.merge_splits(&mergeable));
                mergeable.clear();
            }

            if remaining.is_empty() {
                windows.push(split);
            } else {
                windows.extend(self.split_with(&split, remaining));
            }
        }

        if !mergeable.is_empty() {
            windows.extend(self.merge_splits(&mergeable));
        }

        windows
    }

    /// Greedily joins adjacent splits into windows up to `max_chars`,
    /// carrying a tail of at most `overlap_chars` into the next window.
    fn merge_splits(&self, splits: &[String]) -> Vec<String> {
        let max = self.config.max_chars;
        let overlap = self.config.overlap_chars;

        let mut windows = Vec::new();
        let mut pending: VecDeque<&String> = VecDeque::new();
        let mut total = 0usize;

        for split in splits {
            let length = split.len();

            if total + length > max && !pending.is_empty() {
                let window: String = pending.iter().map(|s| s.as_str()).collect();
                let window = window.trim();
                if !window.is_empty() {
                    windows.push(window.to_string());
                }

                while total > overlap || (total + length > max && total > 0) {
                    match pending.pop_front() {
                        Some(removed) => total -= removed.len(),
                        None => break,
                    }
                }
            }

            pending.push_back(split);
            total += length;
        }

        let window: String = pending.iter().map(|s| s.as_str()).collect();
        let window = window.trim();
        if !window.is_empty() {
            windows.push(window.to_string());
        }

        windows
    }

    fn is_boilerplate(&self, window: &str) -> bool {
        self.boilerplate.iter().any(|pattern| pattern.is_match(window))
    }

    fn extract_page_number(&self, window: &str) -> Option<u32> {
        for pattern in &self.page_markers {
            if let Some(captures) = pattern.captures(window) {
                if let Ok(number) = captures[1].parse::<u32>() {
                    if number >= 1 {
                        return Some(number);
                    }
                }
            }
        }
        None
    }

    fn extract_date(&self, window: &str) -> Option<String> {
        self.date
            .find(window)
            .map(|found| found.as_str().to_string())
    }
}

fn push_context(context: &mut VecDeque<String>, window: String) {
    if context.len() == SECTION_CONTEXT_WINDOWS {
        context.pop_front();
    }
    context.push_back(window);
}

fn looks_all_uppercase(text: &str) -> bool {
    text.chars().any(char::is_alphabetic) && !text.chars().any(char::is_lowercase)
}

/// Splits with the separator kept attached to the front of the following
/// piece, so joining pieces back reproduces the original text.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut start = 0;

    for (index, _) in text.match_indices(separator) {
        if index > start {
            pieces.push(text[start..index].to_string());
            start = index;
        }
    }

    if start < text.len() {
        pieces.push(text[start..].to_string());
    }

    pieces
}

fn hard_split(text: &str, max: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{Segmenter, SegmenterConfig};

    fn small_config() -> SegmenterConfig {
        SegmenterConfig {
            max_chars: 80,
            overlap_chars: 10,
            min_chunk_chars: 20,
            ..SegmenterConfig::default()
        }
    }

    #[test]
    fn page_markers_assign_pages_and_boilerplate_is_dropped() {
        let segmenter = Segmenter::new(small_config()).unwrap();
        let text = concat!(
            "The patient described persistent chest tightness radiating to the left arm",
            "\n\nMEDICAL RECORD REVIEW",
            "\nPage 2\n",
            "Blood pressure readings remained elevated throughout the observation period",
            "\nPage 3\n",
            "Follow up imaging confirmed gradual improvement in the lung opacity",
        );

        let drafts = segmenter.segment(text);

        let pages: Vec<u32> = drafts.iter().map(|draft| draft.page_number).collect();
        assert_eq!(pages, vec![1, 2, 3]);
        assert!(drafts
            .iter()
            .all(|draft| !draft.content.contains("MEDICAL RECORD REVIEW")));
    }

    #[test]
    fn synthetic_paging_is_monotonically_non_decreasing() {
        let config = SegmenterConfig {
            words_per_page: 50,
            ..SegmenterConfig::default()
        };
        let segmenter = Segmenter::new(config).unwrap();
        let words: Vec<String> = (0..150).map(|index| format!("finding{index}")).collect();

        let drafts = segmenter.segment(&words.join(" "));

        assert!(drafts.len() > 1);
        let pages: Vec<u32> = drafts.iter().map(|draft| draft.page_number).collect();
        assert!(pages.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(pages.first(), Some(&1));
    }

    #[test]
    fn short_document_produces_single_fallback_chunk() {
        let segmenter = Segmenter::with_defaults().unwrap();
        let drafts = segmenter.segment("Normal sinus rhythm.");

        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].page_number, 1);
        assert_eq!(drafts[0].section, "main");
        assert_eq!(drafts[0].content, "Normal sinus rhythm.");
    }

    #[test]
    fn empty_document_produces_no_chunks() {
        let segmenter = Segmenter::with_defaults().unwrap();
        assert!(segmenter.segment("   \n\n  ").is_empty());
    }

    #[test]
    fn uppercase_window_becomes_section_label_and_is_not_emitted() {
        let segmenter = Segmenter::new(small_config()).unwrap();
        let text = concat!(
            "CARDIOLOGY CONSULT",
            "\n\n",
            "The patient described persistent chest tightness radiating to the left arm",
        );

        let drafts = segmenter.segment(text);

        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].section, "CARDIOLOGY CONSULT");
        assert!(drafts[0].content.starts_with("The patient"));
        assert!(drafts[0].context.contains("CARDIOLOGY CONSULT"));
    }

    #[test]
    fn explicit_marker_inside_window_overrides_estimated_page() {
        let segmenter = Segmenter::with_defaults().unwrap();
        let drafts =
            segmenter.segment("The discharge summary as noted on Page 7 shows continued recovery");

        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].page_number, 7);
    }

    #[test]
    fn context_window_is_bounded_to_last_three_siblings() {
        let segmenter = Segmenter::new(small_config()).unwrap();
        let paragraphs: Vec<String> = ["alphafirst", "betasecond", "gammathird", "deltafourth"]
            .iter()
            .map(|token| format!("Progress note {token} documents a stable clinical course today"))
            .collect();

        let drafts = segmenter.segment(&paragraphs.join("\n\n"));

        assert_eq!(drafts.len(), 4);
        let last_context = &drafts[3].context;
        assert!(!last_context.contains("alphafirst"));
        assert!(last_context.contains("betasecond"));
        assert!(last_context.contains("deltafourth"));
    }

    #[test]
    fn adjacent_windows_share_overlap_text() {
        let config = SegmenterConfig {
            max_chars: 80,
            overlap_chars: 20,
            min_chunk_chars: 10,
            ..SegmenterConfig::default()
        };
        let segmenter = Segmenter::new(config).unwrap();
        let words: Vec<String> = (0..40).map(|index| format!("entry{index:02}")).collect();

        let drafts = segmenter.segment(&words.join(" "));

        assert!(drafts.len() > 1);
        for pair in drafts.windows(2) {
            let tail = pair[0].content.split_whitespace().last().unwrap();
            assert!(pair[1].content.contains(tail));
        }
    }

    #[test]
    fn bracketed_template_text_is_dropped() {
        let segmenter = Segmenter::new(small_config()).unwrap();
        let text = concat!(
            "The patient described persistent chest tightness radiating to the left arm",
            "\n\n[insert provider name and signature here]",
        );

        let drafts = segmenter.segment(text);

        assert_eq!(drafts.len(), 1);
        assert!(!drafts[0].content.contains("insert provider"));
    }

    #[test]
    fn dates_are_extracted_from_window_text() {
        let segmenter = Segmenter::with_defaults().unwrap();
        let drafts =
            segmenter.segment("Initial oncology consultation on 01/20/2022 for staging workup");

        assert_eq!(drafts[0].extracted_date.as_deref(), Some("01/20/2022"));
    }
}
