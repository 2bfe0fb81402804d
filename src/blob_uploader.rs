//! Per-blob upload pipeline:
//!
//! ```text
//!  received → serializing → spooled → presigned → uploading → done
//!                           ↑                                   │
//!                           └────────── backoff ←──── failed ───┘
//! ```
//!
//! Any number of blobs may be in flight; each is an independent task.
//! The uploader tracks pending tasks so graceful shutdown can await them.
//!
//! The spool entry for a blob carries no trace_id or key on its own,
//! only opaque payload bytes — insufficient to resume a blob after a
//! crash. We therefore persist a small JSON envelope alongside the
//! serialized value in the `data`-kind spool entry; only the envelope's
//! `payload` field is ever sent in the object-store PUT body.

use crate::ingest::IngestClient;
use crate::metadata::Metadata;
use crate::retry::RetryConfig;
use crate::serializer::SerializerPool;
use crate::spool::{SpoolKind, StorageAdapter};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;

const CONTENT_TYPE: &str = "application/json";

/// One submitted blob task as it travels through the pipeline.
struct BlobTask {
    data_id: String,
    trace_id: String,
    key: String,
    metadata: Metadata,
}

/// On-disk envelope for a `data`-kind spool entry: enough context to
/// resume the presign step after a crash.
#[derive(Serialize, Deserialize)]
struct BlobEnvelope {
    trace_id: String,
    key: String,
    metadata: Metadata,
    payload: Vec<u8>,
}

pub struct BlobUploader {
    spool: Arc<dyn StorageAdapter>,
    serializer: Arc<SerializerPool>,
    ingest: IngestClient,
    retry: RetryConfig,
    pending: Arc<AsyncMutex<JoinSet<()>>>,
    in_flight: Arc<AtomicUsize>,
    quota: u64,
}

impl BlobUploader {
    pub fn new(
        spool: Arc<dyn StorageAdapter>,
        serializer: Arc<SerializerPool>,
        ingest: IngestClient,
        quota: u64,
    ) -> Self {
        Self {
            spool,
            serializer,
            ingest,
            retry: RetryConfig::blob_pipeline(),
            pending: Arc::new(AsyncMutex::new(JoinSet::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            quota,
        }
    }

    /// Submit a blob for upload. Returns immediately; the pipeline runs as
    /// an independent background task.
    pub async fn submit<T>(&self, data_id: String, trace_id: String, key: String, metadata: Metadata, value: T)
    where
        T: serde::Serialize + Send + 'static,
    {
        let task = BlobTask {
            data_id,
            trace_id,
            key,
            metadata,
        };

        let spool = self.spool.clone();
        let serializer = self.serializer.clone();
        let ingest = self.ingest.clone();
        let retry = self.retry.clone();
        let in_flight = self.in_flight.clone();
        let quota = self.quota;

        in_flight.fetch_add(1, Ordering::AcqRel);
        let mut pending = self.pending.lock().await;
        pending.spawn(async move {
            run_received(task, value, spool, serializer, ingest, &retry, quota).await;
            in_flight.fetch_sub(1, Ordering::AcqRel);
        });
    }

    /// Resume a blob left `spooled` (step 2 done) by a previous process,
    /// starting at the presign step. Runs in the background and does not
    /// block `create_trace`. `raw` is the bytes previously written under
    /// `data_id`; envelopes that fail to parse (pre-envelope format, or
    /// corrupt) are dropped. No new spool write happens on this path, so
    /// there is nothing to evict against here: the quota was already
    /// enforced when the envelope was originally written.
    pub async fn resume(&self, data_id: String, raw: bytes::Bytes) {
        let envelope: BlobEnvelope = match serde_json::from_slice(&raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(data_id = %data_id, error = %err, "could not parse recovered spool envelope, dropping");
                return;
            }
        };

        let spool = self.spool.clone();
        let ingest = self.ingest.clone();
        let retry = self.retry.clone();
        let in_flight = self.in_flight.clone();

        in_flight.fetch_add(1, Ordering::AcqRel);
        let mut pending = self.pending.lock().await;
        pending.spawn(async move {
            let task = BlobTask {
                data_id,
                trace_id: envelope.trace_id,
                key: envelope.key,
                metadata: envelope.metadata,
            };
            let payload = bytes::Bytes::from(envelope.payload);
            run_presign_onward(&task, payload, spool, ingest, &retry, 0).await;
            in_flight.fetch_sub(1, Ordering::AcqRel);
        });
    }

    /// Await all in-flight blob tasks. Used at shutdown.
    pub async fn drain(&self) {
        let mut pending = self.pending.lock().await;
        while pending.join_next().await.is_some() {}
    }
}

async fn run_received<T>(
    task: BlobTask,
    value: T,
    spool: Arc<dyn StorageAdapter>,
    serializer: Arc<SerializerPool>,
    ingest: IngestClient,
    retry: &RetryConfig,
    quota: u64,
) where
    T: serde::Serialize + Send + 'static,
{
    let payload = match serializer.serialize(value).await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::debug!(data_id = %task.data_id, error = %err, "blob serialization failed, dropping");
            return;
        }
    };

    let envelope = BlobEnvelope {
        trace_id: task.trace_id.clone(),
        key: task.key.clone(),
        metadata: task.metadata.clone(),
        payload: payload.clone(),
    };
    let encoded_envelope = match serde_json::to_vec(&envelope) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::debug!(data_id = %task.data_id, error = %err, "blob envelope encoding failed, dropping");
            return;
        }
    };

    if let Err(err) = spool
        .write(&task.data_id, encoded_envelope.into(), SpoolKind::Data)
        .await
    {
        tracing::debug!(data_id = %task.data_id, error = %err, "blob spool write failed, dropping");
        return;
    }
    spool.evict_to_fit(quota).await;

    run_presign_onward(&task, bytes::Bytes::from(payload), spool, ingest, retry, 0).await;
}

/// Steps 3–5: presign, PUT, delete — with bounded exponential-backoff
/// retry on any failure. Entry point both for fresh submissions (after
/// step 2) and for recovered tasks (skipping straight to presign).
async fn run_presign_onward(
    task: &BlobTask,
    payload: bytes::Bytes,
    spool: Arc<dyn StorageAdapter>,
    ingest: IngestClient,
    retry: &RetryConfig,
    mut attempt: u32,
) {
    let put_client = reqwest::Client::new();
    let mut delay = retry.initial_backoff;

    loop {
        let outcome = presign_and_put(task, &payload, &ingest, &put_client).await;

        match outcome {
            Ok(()) => {
                if let Err(err) = spool.delete(&task.data_id).await {
                    tracing::debug!(data_id = %task.data_id, error = %err, "failed to delete spool entry after blob upload");
                }
                return;
            }
            Err(err) => {
                if !retry.should_retry(attempt) {
                    tracing::debug!(
                        data_id = %task.data_id,
                        attempts = attempt + 1,
                        error = %err,
                        "blob upload exhausted retries, leaving spool entry for eviction"
                    );
                    return;
                }

                delay = retry.next_backoff(attempt, delay);
                tracing::debug!(
                    data_id = %task.data_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "blob upload failed, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

async fn presign_and_put(
    task: &BlobTask,
    payload: &bytes::Bytes,
    ingest: &IngestClient,
    put_client: &reqwest::Client,
) -> Result<(), String> {
    let metadata = (!task.metadata.is_empty()).then_some(&task.metadata);
    let presigned = ingest
        .presign(&task.data_id, &task.trace_id, &task.key, metadata)
        .await
        .map_err(|e| e.to_string())?;

    let resp = put_client
        .put(&presigned.presigned_url)
        .header("Content-Type", CONTENT_TYPE)
        .body(payload.clone())
        .send()
        .await
        .map_err(|e| e.to_string())?;

    if resp.status().is_success() {
        Ok(())
    } else {
        Err(format!("object store PUT returned {}", resp.status()))
    }
}
