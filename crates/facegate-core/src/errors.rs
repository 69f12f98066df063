use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid image payload: {0}")]
    InvalidImage(String),

    #[error("no face detected in the image")]
    NoFaceDetected,

    #[error("no face enrolled for user {user_id}")]
    UserNotEnrolled { user_id: String },

    #[error("invalid user id '{user_id}': {message}")]
    InvalidUserId { user_id: String, message: String },

    #[error("encoding length mismatch (known {known}, probe {probe})")]
    DimensionMismatch { known: usize, probe: usize },

    #[error("missing {kind} model; configure it or set ${env}")]
    MissingModel { kind: &'static str, env: &'static str },

    #[error("failed to load model {path}: {message}")]
    ModelLoad { path: PathBuf, message: String },

    #[error("face extraction failed: {0}")]
    Extraction(String),

    #[error("failed to read encoding record {path}: {source}")]
    RecordRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write encoding record {path}: {source}")]
    RecordWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("encoding record {path} is invalid: {message}")]
    InvalidRecord { path: PathBuf, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Failures of the optional encoding cache. Kept as a separate type from
/// [`ServiceError`] so the cache can only ever be best-effort: call sites on
/// the cache path inspect, log and discard these; nothing converts them into
/// a durable-path error.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache entry for {user_id} is invalid: {message}")]
    InvalidEntry { user_id: String, message: String },
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Backend(err.to_string())
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
