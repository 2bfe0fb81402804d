//! Internal, typed errors for each component.
//!
//! None of these ever reach the public `Trace` API — every user-facing
//! method on [`crate::trace::Trace`] catches and logs them instead. They
//! exist so internal plumbing can use `?` instead of stringly-typed errors.

use thiserror::Error;

/// Errors raised while constructing the tracer root.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("apiKey is required")]
    MissingApiKey,

    #[error("projectId is required")]
    MissingProjectId,

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// Errors raised by a `StorageAdapter` implementation.
#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("I/O error on spool entry {id}: {source}")]
    Io {
        id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("spool entry not found: {0}")]
    NotFound(String),
}

/// Errors raised by the serializer pool.
#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("value could not be serialized: {0}")]
    Json(#[source] serde_json::Error),

    #[error("serializer worker panicked")]
    WorkerPanicked,

    #[error("serializer pool is shutting down")]
    PoolClosed,
}

impl From<serde_json::Error> for SerializeError {
    fn from(err: serde_json::Error) -> Self {
        SerializeError::Json(err)
    }
}

/// Errors raised talking to the ingest backend (`/presign`, `/ingest`).
#[derive(Debug, Error, Clone)]
pub enum IngestError {
    #[error("network error: {0}")]
    Network(String),

    #[error("ingest backend returned {status}: {body}")]
    Status { status: u16, body: String },
}

impl From<reqwest::Error> for IngestError {
    fn from(err: reqwest::Error) -> Self {
        IngestError::Network(err.to_string())
    }
}
