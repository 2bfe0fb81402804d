//! The per-run handle returned by [`crate::Tracer::create_trace`].
//!
//! Every method here is synchronous and non-throwing: it does the minimal
//! bookkeeping needed to answer the caller (allocate an id, bump a
//! counter) and hands the rest to a background uploader. A disabled
//! tracer hands out a sentinel [`Trace`] whose methods do all of that
//! bookkeeping but skip the emit, so callers never need to branch on
//! whether tracing is enabled.

use crate::blob_uploader::BlobUploader;
use crate::event::{Artifact, ArtifactType, Event, TraceEndStatus};
use crate::event_uploader::EventUploader;
use crate::metadata::{Metadata, MetadataValue};
use crate::tracer::{next_step_number, now_rfc3339};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

struct Inner {
    trace_id: String,
    project_id: String,
    metadata: Metadata,
    event_uploader: Arc<EventUploader>,
    blob_uploader: Arc<BlobUploader>,
    step_counter: AtomicU64,
    ended: AtomicBool,
}

/// A handle to one logical pipeline run. Cheap to clone.
#[derive(Clone)]
pub struct Trace {
    inner: Option<Arc<Inner>>,
}

/// Optional fields accepted by [`Trace::step`].
#[derive(Default)]
pub struct StepOptions {
    pub step_number: Option<u64>,
    pub artifacts: Vec<Artifact>,
    pub metadata: Metadata,
}

/// One artifact to capture in [`Trace::capture`]: a raw value plus the
/// key it should be stored under. `data_id` is allocated internally.
pub struct CaptureArtifact<T> {
    pub data: T,
    pub key: String,
}

impl Trace {
    pub(crate) fn disabled() -> Self {
        Self { inner: None }
    }

    pub(crate) fn new(
        trace_id: String,
        project_id: String,
        metadata: Metadata,
        event_uploader: Arc<EventUploader>,
        blob_uploader: Arc<BlobUploader>,
    ) -> Self {
        Self {
            inner: Some(Arc::new(Inner {
                trace_id,
                project_id,
                metadata,
                event_uploader,
                blob_uploader,
                step_counter: AtomicU64::new(0),
                ended: AtomicBool::new(false),
            })),
        }
    }

    /// The trace's identifier. Empty for a disabled tracer's sentinel trace.
    pub fn trace_id(&self) -> &str {
        self.inner.as_ref().map_or("", |i| i.trace_id.as_str())
    }

    /// Allocate a `dataId` and submit `value` for upload under `key`.
    /// Returns immediately; never serializes on the calling thread.
    pub fn data_id<T>(&self, value: T, key: impl Into<String>, metadata: Option<Metadata>) -> String
    where
        T: serde::Serialize + Send + 'static,
    {
        let data_id = uuid::Uuid::new_v4().to_string();

        let Some(inner) = &self.inner else {
            return data_id;
        };

        let inner = inner.clone();
        let key = key.into();
        let metadata = metadata.unwrap_or_default();
        let data_id_for_task = data_id.clone();

        tokio::spawn(async move {
            inner
                .blob_uploader
                .submit(data_id_for_task, inner.trace_id.clone(), key, metadata, value)
                .await;
        });

        data_id
    }

    /// Allocate a `stepId`, compute `stepNumber` (invariant 3), emit a
    /// `step` event.
    pub fn step(&self, step_name: impl Into<String>, options: StepOptions) {
        let Some(inner) = &self.inner else {
            return;
        };

        let step_id = uuid::Uuid::new_v4().to_string();
        let step_number = next_step_number(&inner.step_counter, options.step_number);

        inner.event_uploader.add(Event::Step {
            step_id,
            trace_id: inner.trace_id.clone(),
            project_id: inner.project_id.clone(),
            step_name: step_name.into(),
            step_number,
            artifacts: options.artifacts,
            metadata: options.metadata,
            timestamp: now_rfc3339(),
        });
    }

    /// Normalize `error` to `{message, stack}`, merge into `metadata`, and
    /// emit a `step` event named `"error"`.
    pub fn error(&self, error: &(dyn std::error::Error + 'static), metadata: Option<Metadata>) {
        let Some(_inner) = &self.inner else {
            return;
        };

        let mut metadata = metadata.unwrap_or_default();
        metadata.insert("message".to_string(), MetadataValue::String(error.to_string()));

        let mut stack = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            stack.push(MetadataValue::String(cause.to_string()));
            source = cause.source();
        }
        metadata.insert("stack".to_string(), MetadataValue::Array(stack));

        self.step(
            "error",
            StepOptions {
                step_number: None,
                artifacts: vec![],
                metadata,
            },
        );
    }

    /// Mark the trace successful. A no-op if the trace has already ended
    /// (by either `success` or `failure`).
    pub fn success(&self, metadata: Option<Metadata>) {
        self.end(TraceEndStatus::Success, metadata);
    }

    /// Mark the trace failed. A no-op if the trace has already ended.
    pub fn failure(&self, metadata: Option<Metadata>) {
        self.end(TraceEndStatus::Failure, metadata);
    }

    fn end(&self, status: TraceEndStatus, metadata: Option<Metadata>) {
        let Some(inner) = &self.inner else {
            return;
        };

        if inner.ended.swap(true, Ordering::AcqRel) {
            return; // already ended: success()/failure() are idempotent
        }

        let success_metadata = metadata.unwrap_or_default();
        let created_at = now_rfc3339();
        let event = match status {
            TraceEndStatus::Success => Event::TraceSuccess {
                trace_id: inner.trace_id.clone(),
                project_id: inner.project_id.clone(),
                metadata: inner.metadata.clone(),
                success_metadata,
                status,
                created_at: created_at.clone(),
                ended_at: created_at,
            },
            TraceEndStatus::Failure => Event::TraceFailure {
                trace_id: inner.trace_id.clone(),
                project_id: inner.project_id.clone(),
                metadata: inner.metadata.clone(),
                success_metadata,
                status,
                created_at: created_at.clone(),
                ended_at: created_at,
            },
        };

        inner.event_uploader.add(event);
    }

    /// Minimal mode: allocate a fresh `dataId` for each artifact (synchronously
    /// submitting each for upload), allocate a `stepId`, auto-increment
    /// `stepNumber`, and emit a `step` event whose artifacts carry no
    /// input/output distinction.
    pub fn capture<T>(&self, step_name: impl Into<String>, artifacts: Vec<CaptureArtifact<T>>, metadata: Option<Metadata>)
    where
        T: serde::Serialize + Send + 'static,
    {
        let step_name = step_name.into();

        let Some(_inner) = &self.inner else {
            for artifact in artifacts {
                self.data_id(artifact.data, artifact.key, None);
            }
            return;
        };

        let wired: Vec<Artifact> = artifacts
            .into_iter()
            .map(|artifact| {
                let data_id = self.data_id(artifact.data, artifact.key, None);
                Artifact {
                    data_id,
                    artifact_type: None::<ArtifactType>,
                }
            })
            .collect();

        self.step(
            step_name,
            StepOptions {
                step_number: None,
                artifacts: wired,
                metadata: metadata.unwrap_or_default(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::tracer::Tracer;
    use std::fmt;
    use std::time::Duration;

    #[derive(Debug)]
    struct BoomError;

    impl fmt::Display for BoomError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "boom")
        }
    }

    impl std::error::Error for BoomError {}

    #[tokio::test]
    async fn disabled_trace_methods_are_total_no_ops() {
        let config = Config::builder("k", "p").enabled(false).build().unwrap();
        let tracer = Tracer::new(config).await.unwrap();
        let trace = tracer.create_trace(Metadata::new());

        assert_eq!(trace.trace_id(), "");
        let id = trace.data_id(42, "in", None);
        assert!(!id.is_empty());
        trace.step("s1", StepOptions::default());
        trace.error(&BoomError, None);
        trace.success(None);
        trace.failure(None);
        trace.capture::<i32>("s2", vec![], None);
    }

    #[tokio::test]
    async fn success_after_success_is_idempotent() {
        let config = Config::builder("k", "p").build().unwrap();
        let tracer = Tracer::new(config).await.unwrap();
        let trace = tracer.create_trace(Metadata::new());

        trace.success(None);
        trace.failure(None); // must be ignored: already ended
    }

    #[tokio::test]
    async fn auto_incrementing_step_numbers_are_monotonic() {
        let config = Config::builder("k", "p").build().unwrap();
        let tracer = Tracer::new(config).await.unwrap();
        let trace = tracer.create_trace(Metadata::new());

        trace.step("a", StepOptions::default());
        trace.step("b", StepOptions::default());
        assert_eq!(trace.inner.as_ref().unwrap().step_counter.load(Ordering::Acquire), 2);
    }

    #[tokio::test]
    async fn success_event_echoes_trace_creation_metadata() {
        use crate::blob_uploader::BlobUploader;
        use crate::event_uploader::EventUploader;
        use crate::ingest::IngestClient;
        use crate::metadata::MetadataValue;
        use crate::serializer::SerializerPool;
        use crate::spool::{MemorySpool, StorageAdapter};
        use std::sync::Arc;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/ingest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"success": true})))
            .mount(&server)
            .await;

        let spool: Arc<dyn StorageAdapter> = Arc::new(MemorySpool::new());
        let ingest = IngestClient::new(server.uri(), "K");
        let event_uploader = Arc::new(EventUploader::new(
            spool.clone(),
            ingest.clone(),
            Duration::from_secs(60),
            50,
            u64::MAX,
        ));
        let serializer = Arc::new(SerializerPool::new(1));
        let blob_uploader = Arc::new(BlobUploader::new(spool, serializer, ingest, u64::MAX));

        let mut creation_metadata = Metadata::new();
        creation_metadata.insert("run".to_string(), MetadataValue::Number(1.into()));

        let trace = Trace::new(
            "p-t1".into(),
            "p".into(),
            creation_metadata.clone(),
            event_uploader.clone(),
            blob_uploader,
        );

        let mut close_metadata = Metadata::new();
        close_metadata.insert("outcome".to_string(), MetadataValue::String("done".into()));
        trace.success(Some(close_metadata));

        event_uploader.force_drain().await;

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = requests[0].body_json().unwrap();
        let event = &body["events"][0];
        assert_eq!(event["eventType"], "trace-success");
        assert_eq!(event["metadata"]["run"], 1.0);
        assert_eq!(event["successMetadata"]["outcome"], "done");
    }
}
