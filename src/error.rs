use std::io;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Failures raised by a `VectorStore` backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("segment I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("could not encode record: {0}")]
    Encode(String),

    #[error("corrupt record at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    #[error("vector has dimension {actual}, store expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("record {0} already exists")]
    DuplicateId(Uuid),

    #[error("poisoned lock")]
    Poisoned,
}

/// Failures raised by an `EmbeddingProvider`.
#[derive(Debug, Error)]
pub enum EmbedError {
    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("embedding API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("embedding API returned no vectors")]
    EmptyResponse,

    #[error("embedding has dimension {actual}, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Failures raised by a `VisionAnalyzer`.
#[derive(Debug, Error)]
pub enum VisionError {
    #[error("no API key configured or supplied")]
    MissingApiKey,

    #[error("vision request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("vision API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("vision model returned an empty {0}")]
    EmptyResponse(&'static str),

    #[error("vision model did not answer within {0:?}")]
    Timeout(Duration),
}

/// Cause attached to `AnalysisError::StoreUnavailable`.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("embedding provider: {0}")]
    Embedding(#[from] EmbedError),

    #[error("vector store: {0}")]
    VectorStore(#[from] StoreError),

    #[error("{op} timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("store task aborted: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[source] BackendError),
}

impl From<BackendError> for AnalysisError {
    fn from(err: BackendError) -> Self {
        AnalysisError::StoreUnavailable(err)
    }
}

impl From<EmbedError> for AnalysisError {
    fn from(err: EmbedError) -> Self {
        AnalysisError::StoreUnavailable(err.into())
    }
}

impl From<StoreError> for AnalysisError {
    fn from(err: StoreError) -> Self {
        AnalysisError::StoreUnavailable(err.into())
    }
}

/// Failures of the upload workflow.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("vision analysis failed: {0}")]
    Vision(#[from] VisionError),

    #[error(transparent)]
    Store(#[from] AnalysisError),
}
