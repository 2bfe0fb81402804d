//! xray-sdk
//!
//! An embeddable, in-process telemetry client for multi-step pipeline
//! traces. Every user-facing call is synchronous and non-throwing: it
//! does the minimal bookkeeping needed to answer the caller and hands
//! the rest of the work to a durable local spool and two background
//! upload pipelines.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use xray_sdk::{Config, Tracer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::builder("api-key", "my-project").build()?;
//!     let tracer = Tracer::new(config).await?;
//!
//!     let trace = tracer.create_trace(Default::default());
//!     let data_id = trace.data_id(serde_json::json!({"x": 42}), "input", None);
//!     trace.success(None);
//!
//!     tracer.shutdown().await;
//!     let _ = data_id;
//!     Ok(())
//! }
//! ```

mod batcher;
mod blob_uploader;
mod config;
mod error;
mod event;
mod event_uploader;
mod ingest;
mod metadata;
mod retry;
mod serializer;
mod spool;
mod trace;
mod tracer;

pub use config::{Config, ConfigBuilder};
pub use error::{ConfigError, IngestError, SerializeError, SpoolError};
pub use event::{Artifact, ArtifactType, Event, TraceEndStatus};
pub use metadata::{Metadata, MetadataValue};
pub use retry::{JitterMode, RetryConfig};
pub use spool::{DiskSpool, MemorySpool, SpoolEntryInfo, SpoolKind, StorageAdapter};
pub use trace::{CaptureArtifact, StepOptions, Trace};
pub use tracer::Tracer;
