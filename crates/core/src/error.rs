use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("document has no usable content: {0}")]
    EmptyDocument(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("encoding failed: {0}")]
    Encode(#[from] EncodeError),

    #[error("index store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("cannot embed empty text")]
    EmptyInput,

    #[error("no window produced a usable vector")]
    NoUsableVector,

    #[error("model returned dimension {actual}, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("model endpoint rejected request: {0}")]
    Endpoint(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("index exists with dimension {existing}, configured dimension is {configured}; delete and recreate to change it")]
    DimensionMismatch { existing: usize, configured: usize },

    #[error("vector length {actual} does not match index dimension {expected}")]
    InvalidVector { expected: usize, actual: usize },

    #[error("backend unavailable after {attempts} attempts: {details}")]
    BackendUnavailable { attempts: usize, details: String },

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Connection and timeout failures are retried; everything else is
    /// either a validation error or a definitive backend answer.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Http(_))
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
