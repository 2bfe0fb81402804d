//! Tracer root: the public entry point that owns every other component
//! for the lifetime of the process.

use crate::blob_uploader::BlobUploader;
use crate::config::Config;
use crate::error::ConfigError;
use crate::event::Event;
use crate::event_uploader::EventUploader;
use crate::ingest::IngestClient;
use crate::metadata::Metadata;
use crate::serializer::SerializerPool;
use crate::spool::{DiskSpool, MemorySpool, SpoolKind, StorageAdapter};
use crate::trace::Trace;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The telemetry client. Construct once per process, call
/// [`Tracer::create_trace`] per pipeline run, call [`Tracer::shutdown`]
/// (or let the installed signal handler do it) before exit.
pub struct Tracer {
    config: Config,
    spool: Arc<dyn StorageAdapter>,
    serializer: Arc<SerializerPool>,
    event_uploader: Arc<EventUploader>,
    blob_uploader: Arc<BlobUploader>,
}

impl Tracer {
    /// Construct the tracer: validate configuration, build the spool
    /// (falling back to memory if disk initialization fails), start the
    /// serializer pool, wire the two uploaders, kick off startup recovery,
    /// and install the shutdown signal handler.
    pub async fn new(config: Config) -> Result<Arc<Self>, ConfigError> {
        let (spool, quota): (Arc<dyn StorageAdapter>, u64) =
            match DiskSpool::init(config.resolve_temp_dir()).await {
                Ok(disk) => (Arc::new(disk), config.max_disk_size),
                Err(err) => {
                    tracing::warn!(error = %err, "disk spool initialization failed, falling back to memory spool");
                    (Arc::new(MemorySpool::new()), config.max_memory_size)
                }
            };

        let serializer = Arc::new(SerializerPool::new(config.worker_pool_size));
        let ingest = IngestClient::new(config.base_url.clone(), config.api_key.clone());

        let event_uploader = Arc::new(EventUploader::new(
            spool.clone(),
            ingest.clone(),
            config.batch_interval,
            config.max_batch_size,
            quota,
        ));
        let blob_uploader = Arc::new(BlobUploader::new(spool.clone(), serializer.clone(), ingest, quota));

        let tracer = Arc::new(Self {
            config,
            spool,
            serializer,
            event_uploader,
            blob_uploader,
        });

        tracer.clone().spawn_recovery();
        tracer.clone().install_shutdown_hook();

        Ok(tracer)
    }

    /// Iterate the spool's `data`-kind entries and resume each at the
    /// presign step. Runs in the background; does not block construction.
    fn spawn_recovery(self: Arc<Self>) {
        tokio::spawn(async move {
            let entries = self.spool.list().await;
            for entry in entries.into_iter().filter(|e| e.kind == SpoolKind::Data) {
                let Ok(Some(bytes)) = self.spool.read(&entry.id).await else {
                    continue;
                };
                tracing::debug!(data_id = %entry.id, "resuming blob upload from spool on startup");
                self.blob_uploader.resume(entry.id.clone(), bytes).await;
            }
        });
    }

    /// Subscribe to host termination signals and drain on receipt. Scoped
    /// to this tracer instance, not a process-wide global.
    fn install_shutdown_hook(self: Arc<Self>) {
        tokio::spawn(async move {
            #[cfg(unix)]
            {
                let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(s) => s,
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to install SIGTERM handler");
                        return;
                    }
                };
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = tokio::signal::ctrl_c().await;
            }

            tracing::debug!("termination signal received, draining tracer");
            self.shutdown().await;
        });
    }

    /// Drain the batcher, await pending blob tasks, drain the serializer
    /// pool. Non-throwing: this is the shutdown path, nothing escapes it.
    pub async fn shutdown(&self) {
        self.event_uploader.force_drain().await;
        self.blob_uploader.drain().await;
        self.serializer.drain().await;
    }

    /// Create a trace. If the tracer is disabled, returns a sentinel
    /// no-op `Trace` whose `trace_id` is empty and whose methods are all
    /// immediate no-ops.
    pub fn create_trace(&self, metadata: Metadata) -> Trace {
        if !self.config.enabled {
            return Trace::disabled();
        }

        let trace_id = format!("{}-{}", self.config.project_id, uuid::Uuid::new_v4());

        let trace = Trace::new(
            trace_id.clone(),
            self.config.project_id.clone(),
            metadata.clone(),
            self.event_uploader.clone(),
            self.blob_uploader.clone(),
        );

        self.event_uploader.add(Event::TraceStart {
            trace_id,
            project_id: self.config.project_id.clone(),
            metadata,
            created_at: now_rfc3339(),
        });

        trace
    }
}

pub(crate) fn now_rfc3339() -> String {
    // No external time-formatting dependency is pulled in for one call
    // site: a Unix-epoch-seconds timestamp round-trips fine through the
    // wire protocol's opaque `createdAt`/`timestamp` string fields.
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:09}", now.as_secs(), now.subsec_nanos())
}

pub(crate) fn next_step_number(counter: &AtomicU64, supplied: Option<u64>) -> u64 {
    match supplied {
        Some(value) => {
            // Raise the internal counter so subsequent auto-increments
            // cannot reuse numbers (invariant 3).
            loop {
                let current = counter.load(Ordering::Acquire);
                let new_floor = current.max(value);
                if counter
                    .compare_exchange(current, new_floor, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    break;
                }
            }
            value
        }
        None => counter.fetch_add(1, Ordering::AcqRel) + 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supplied_step_number_raises_counter_floor() {
        let counter = AtomicU64::new(0);
        assert_eq!(next_step_number(&counter, Some(7)), 7);
        assert_eq!(next_step_number(&counter, None), 8);
        assert_eq!(next_step_number(&counter, None), 9);
    }

    #[tokio::test]
    async fn disabled_config_yields_sentinel_trace() {
        let config = Config::builder("k", "p").enabled(false).build().unwrap();
        let tracer = Tracer::new(config).await.unwrap();
        let trace = tracer.create_trace(Metadata::new());
        assert_eq!(trace.trace_id(), "");
    }
}
