use crate::error::EncodeError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Fraction of the model context a windowed sub-chunk is filled to.
const WINDOW_FILL: f64 = 0.8;
/// Fraction of a closed window's words carried into the next window.
const WINDOW_OVERLAP: f64 = 0.2;

/// The model-serving collaborator: token-level hidden states for a span
/// of text that fits the model context.
#[async_trait]
pub trait TokenModel: Send + Sync {
    fn dimension(&self) -> usize;
    fn max_input_chars(&self) -> usize;
    async fn token_states(&self, text: &str) -> Result<Vec<Vec<f32>>, EncodeError>;
}

#[async_trait]
impl<M: TokenModel + ?Sized> TokenModel for Box<M> {
    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn max_input_chars(&self) -> usize {
        (**self).max_input_chars()
    }

    async fn token_states(&self, text: &str) -> Result<Vec<Vec<f32>>, EncodeError> {
        (**self).token_states(text).await
    }
}

/// Turns arbitrary-length text into one fixed-dimension vector by
/// mean-pooling token states, windowing input that exceeds the model
/// context and averaging the window vectors elementwise.
pub struct MeanPoolEncoder<M: TokenModel> {
    model: M,
}

impl<M: TokenModel> MeanPoolEncoder<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    pub fn dimension(&self) -> usize {
        self.model.dimension()
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EncodeError> {
        if text.trim().is_empty() {
            return Err(EncodeError::EmptyInput);
        }

        let max = self.model.max_input_chars();
        if text.len() <= max {
            return self.pool_window(text).await;
        }

        warn!(
            length = text.len(),
            max_input_chars = max,
            "input exceeds model context, windowing"
        );

        let mut vectors = Vec::new();
        for window in split_into_windows(text, max) {
            if window.trim().is_empty() {
                continue;
            }
            match self.pool_window(&window).await {
                Ok(vector) => vectors.push(vector),
                Err(EncodeError::EmptyInput) | Err(EncodeError::NoUsableVector) => continue,
                Err(error) => return Err(error),
            }
        }

        if vectors.is_empty() {
            return Err(EncodeError::NoUsableVector);
        }

        let dimension = self.model.dimension();
        let mut averaged = vec![0f32; dimension];
        for vector in &vectors {
            for (slot, value) in averaged.iter_mut().zip(vector.iter()) {
                *slot += value;
            }
        }
        let count = vectors.len() as f32;
        for slot in &mut averaged {
            *slot /= count;
        }

        Ok(averaged)
    }

    async fn pool_window(&self, text: &str) -> Result<Vec<f32>, EncodeError> {
        let states = self.model.token_states(text).await?;
        if states.is_empty() {
            return Err(EncodeError::NoUsableVector);
        }

        let dimension = self.model.dimension();
        let mut pooled = vec![0f32; dimension];
        for state in &states {
            if state.len() != dimension {
                return Err(EncodeError::DimensionMismatch {
                    expected: dimension,
                    actual: state.len(),
                });
            }
            for (slot, value) in pooled.iter_mut().zip(state.iter()) {
                *slot += value;
            }
        }
        let count = states.len() as f32;
        for slot in &mut pooled {
            *slot /= count;
        }

        Ok(pooled)
    }
}

/// Word-level windows filled to 80% of the model context; the trailing
/// 20% of each window's words seed the next one.
fn split_into_windows(text: &str, max_input_chars: usize) -> Vec<String> {
    let budget = ((max_input_chars as f64) * WINDOW_FILL) as usize;
    let mut windows = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let word_len = word.len() + 1;
        if current_len + word_len > budget && !current.is_empty() {
            windows.push(current.join(" "));
            let keep = ((current.len() as f64) * WINDOW_OVERLAP) as usize;
            current = current.split_off(current.len() - keep);
            current_len = current.iter().map(|kept| kept.len() + 1).sum();
        }
        current.push(word);
        current_len += word_len;
    }

    if !current.is_empty() {
        windows.push(current.join(" "));
    }

    windows
}

/// Deterministic offline model: one hidden state per word, built from
/// FNV-hashed character trigrams. Useful for tests and air-gapped runs;
/// not a substitute for a learned encoder.
#[derive(Debug, Clone, Copy)]
pub struct HashedNgramModel {
    pub dimension: usize,
    pub max_input_chars: usize,
}

impl Default for HashedNgramModel {
    fn default() -> Self {
        Self {
            dimension: 768,
            max_input_chars: 512,
        }
    }
}

#[async_trait]
impl TokenModel for HashedNgramModel {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_input_chars(&self) -> usize {
        self.max_input_chars
    }

    async fn token_states(&self, text: &str) -> Result<Vec<Vec<f32>>, EncodeError> {
        let states = text
            .split_whitespace()
            .map(|word| self.word_state(word))
            .collect();
        Ok(states)
    }
}

impl HashedNgramModel {
    fn word_state(&self, word: &str) -> Vec<f32> {
        let mut state = vec![0f32; self.dimension.max(1)];
        let lowered = word.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.len() < 3 {
            let bucket = (fnv_hash(&lowered) % state.len() as u64) as usize;
            state[bucket] += 1.0;
        } else {
            for window in chars.windows(3) {
                let token: String = window.iter().collect();
                let bucket = (fnv_hash(&token) % state.len() as u64) as usize;
                state[bucket] += 1.0;
            }
        }

        let magnitude = state.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut state {
                *value /= magnitude;
            }
        }

        state
    }
}

fn fnv_hash(token: &str) -> u64 {
    let mut hash = 1469598103934665603u64;
    for byte in token.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    hash
}

#[derive(Debug, Clone, Serialize)]
struct TokenStatesRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct TokenStatesResponse {
    states: Vec<Vec<f32>>,
}

/// Remote model-serving client. Expects an endpoint that accepts
/// `{"text": ...}` and answers `{"states": [[...], ...]}` with one
/// hidden-state vector per token.
pub struct HttpTokenModel {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    dimension: usize,
    max_input_chars: usize,
}

impl HttpTokenModel {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        dimension: usize,
        max_input_chars: usize,
        timeout: Duration,
    ) -> Result<Self, EncodeError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            dimension,
            max_input_chars,
        })
    }
}

#[async_trait]
impl TokenModel for HttpTokenModel {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_input_chars(&self) -> usize {
        self.max_input_chars
    }

    async fn token_states(&self, text: &str) -> Result<Vec<Vec<f32>>, EncodeError> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&TokenStatesRequest { text });

        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(EncodeError::Endpoint(format!(
                "{} returned {}",
                self.endpoint,
                response.status()
            )));
        }

        let payload: TokenStatesResponse = response.json().await?;
        Ok(payload.states)
    }
}

#[cfg(test)]
mod tests {
    use super::{split_into_windows, HashedNgramModel, MeanPoolEncoder};
    use crate::error::EncodeError;

    #[tokio::test]
    async fn embedding_is_deterministic() {
        let encoder = MeanPoolEncoder::new(HashedNgramModel::default());
        let first = encoder.embed("persistent chest tightness").await.unwrap();
        let second = encoder.embed("persistent chest tightness").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn blank_text_is_rejected() {
        let encoder = MeanPoolEncoder::new(HashedNgramModel::default());
        let result = encoder.embed("   ").await;
        assert!(matches!(result, Err(EncodeError::EmptyInput)));
    }

    #[tokio::test]
    async fn over_length_input_collapses_to_one_vector() {
        let model = HashedNgramModel {
            dimension: 64,
            max_input_chars: 512,
        };
        let encoder = MeanPoolEncoder::new(model);
        let words: Vec<String> = (0..1500).map(|index| format!("word{index}")).collect();
        let text = words.join(" ");
        assert!(text.len() > 10_000);

        let vector = encoder.embed(&text).await.unwrap();

        assert_eq!(vector.len(), 64);
        assert!(vector.iter().any(|value| *value != 0.0));
    }

    #[test]
    fn windows_carry_twenty_percent_word_overlap() {
        let words: Vec<String> = (0..100).map(|index| format!("token{index:03}")).collect();
        let windows = split_into_windows(&words.join(" "), 200);

        assert!(windows.len() > 1);
        for pair in windows.windows(2) {
            let tail = pair[0].split_whitespace().last().unwrap();
            assert!(pair[1].contains(tail));
        }
    }

    #[test]
    fn short_input_is_a_single_window() {
        let windows = split_into_windows("one two three", 512);
        assert_eq!(windows, vec!["one two three".to_string()]);
    }
}
