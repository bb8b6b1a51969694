use std::collections::BTreeSet;

/// Fixed English stop-word list. Kept small on purpose; anything shorter
/// than four characters is dropped by the length filter anyway.
const STOP_WORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "because", "been", "before", "being", "below",
    "between", "both", "cannot", "could", "does", "doing", "down", "during", "each", "from",
    "further", "have", "having", "here", "herself", "himself", "into", "itself", "just", "more",
    "most", "myself", "once", "only", "other", "ought", "ourselves", "over", "same", "should",
    "some", "such", "than", "that", "their", "theirs", "them", "themselves", "then", "there",
    "these", "they", "this", "those", "through", "under", "until", "very", "were", "what", "when",
    "where", "which", "while", "will", "with", "would", "your", "yours", "yourself",
];

/// Extracts the normalized keyword set for a chunk or query: alphanumeric
/// tokens, lowercased, stop-words and tokens of length <= 3 dropped,
/// deduplicated. Output is sorted so stored keyword sets are reproducible.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut keywords = BTreeSet::new();

    for token in text.split(|ch: char| !ch.is_alphanumeric()) {
        if token.len() <= 3 {
            continue;
        }

        let lowered = token.to_lowercase();
        if STOP_WORDS.contains(&lowered.as_str()) {
            continue;
        }

        keywords.insert(lowered);
    }

    keywords.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::extract_keywords;

    #[test]
    fn keywords_are_lowercased_and_deduplicated() {
        let keywords = extract_keywords("Chest pain, CHEST pain, chest discomfort");
        assert_eq!(keywords, vec!["chest", "discomfort", "pain"]);
    }

    #[test]
    fn stop_words_and_short_tokens_are_dropped() {
        let keywords = extract_keywords("there would have been an MRI of the spine");
        assert_eq!(keywords, vec!["spine"]);
    }

    #[test]
    fn punctuation_does_not_leak_into_keywords() {
        let keywords = extract_keywords("hypertension; diabetes (type-2)!");
        assert_eq!(keywords, vec!["diabetes", "hypertension", "type"]);
    }
}
