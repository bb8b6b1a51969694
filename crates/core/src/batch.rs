use serde::{Deserialize, Serialize};

/// Deterministic token estimator. Batch boundaries must be reproducible
/// for identical input, so implementations may not consult anything
/// beyond the text itself.
pub trait TokenCounter {
    fn count(&self, text: &str) -> usize;
}

/// Fixed chars-per-token heuristic, rounded up. Close enough for budget
/// packing against a downstream model context; swap in a real tokenizer
/// behind the same trait if exact counts ever matter.
#[derive(Debug, Clone, Copy)]
pub struct CharTokenCounter {
    pub chars_per_token: usize,
}

impl Default for CharTokenCounter {
    fn default() -> Self {
        Self { chars_per_token: 4 }
    }
}

impl TokenCounter for CharTokenCounter {
    fn count(&self, text: &str) -> usize {
        let chars = text.chars().count();
        chars.div_ceil(self.chars_per_token.max(1))
    }
}

/// One unit of content staged for the downstream summarization call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchItem {
    pub name: String,
    pub content: String,
}

impl BatchItem {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub items: Vec<BatchItem>,
    pub token_count: usize,
}

/// Greedy order-preserving bin-packing under `max_tokens`. An item whose
/// own count exceeds the budget becomes a singleton batch rather than
/// being dropped or split.
pub fn partition(
    items: Vec<BatchItem>,
    max_tokens: usize,
    counter: &dyn TokenCounter,
) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut current: Vec<BatchItem> = Vec::new();
    let mut current_tokens = 0usize;

    for item in items {
        let cost = counter.count(&item.content);

        if !current.is_empty() && current_tokens + cost > max_tokens {
            batches.push(Batch {
                items: std::mem::take(&mut current),
                token_count: current_tokens,
            });
            current_tokens = 0;
        }

        current.push(item);
        current_tokens += cost;
    }

    if !current.is_empty() {
        batches.push(Batch {
            items: current,
            token_count: current_tokens,
        });
    }

    batches
}
