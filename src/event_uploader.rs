//! Owns the event `Batcher`; persists each flushed batch to the spool,
//! calls ingest, deletes on success, and evicts down to quota after
//! every write.

use crate::batcher::Batcher;
use crate::event::Event;
use crate::ingest::IngestClient;
use crate::spool::{SpoolKind, StorageAdapter};
use std::sync::Arc;
use std::time::Duration;

pub struct EventUploader {
    batcher: Arc<Batcher<Event>>,
}

impl EventUploader {
    pub fn new(
        spool: Arc<dyn StorageAdapter>,
        ingest: IngestClient,
        batch_interval: Duration,
        max_batch_size: usize,
        quota: u64,
    ) -> Self {
        let batcher = Batcher::new(batch_interval, max_batch_size, move |batch: Vec<Event>| {
            let spool = spool.clone();
            let ingest = ingest.clone();
            async move { flush_batch(spool, ingest, batch, quota).await }
        });

        Self { batcher }
    }

    /// Synchronous, cheap enqueue — never blocks the caller.
    pub fn add(&self, event: Event) {
        self.batcher.add(event);
    }

    /// Cancel the timer and flush everything remaining. Used at shutdown.
    pub async fn force_drain(&self) {
        self.batcher.force_drain().await;
    }
}

async fn flush_batch(
    spool: Arc<dyn StorageAdapter>,
    ingest: IngestClient,
    batch: Vec<Event>,
    quota: u64,
) -> Result<(), Vec<Event>> {
    let storage_id = uuid::Uuid::new_v4().to_string();

    let encoded = match serde_json::to_vec(&batch) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(error = %err, "failed to encode event batch, dropping batch");
            return Ok(());
        }
    };

    if let Err(err) = spool
        .write(&storage_id, encoded.into(), SpoolKind::Events)
        .await
    {
        tracing::warn!(error = %err, "failed to persist event batch to spool before ingest");
    }
    spool.evict_to_fit(quota).await;

    match ingest.ingest(&batch).await {
        Ok(()) => {
            if let Err(err) = spool.delete(&storage_id).await {
                tracing::debug!(error = %err, "failed to delete spool entry after successful ingest");
            }
            Ok(())
        }
        Err(err) => {
            // The spool entry is left on disk; it will be re-attempted by
            // the next flush (which writes a fresh storage id) and is
            // eventually reclaimed by FIFO eviction.
            tracing::debug!(error = %err, batch_size = batch.len(), "ingest failed, re-queueing batch");
            Err(batch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spool::MemorySpool;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sample_event() -> Event {
        Event::Step {
            step_id: "s1".into(),
            trace_id: "p-t1".into(),
            project_id: "p".into(),
            step_name: "go".into(),
            step_number: 1,
            artifacts: vec![],
            metadata: Default::default(),
            timestamp: "2026-07-31T00:00:00Z".into(),
        }
    }

    #[tokio::test]
    async fn delivers_on_flush_and_clears_spool_entry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/ingest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"success": true})))
            .mount(&server)
            .await;

        let spool: Arc<dyn StorageAdapter> = Arc::new(MemorySpool::new());
        let ingest = IngestClient::new(server.uri(), "K");
        let uploader = EventUploader::new(spool.clone(), ingest, Duration::from_millis(20), 100, u64::MAX);

        uploader.add(sample_event());
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(spool.size().await, 0);
    }

    #[tokio::test]
    async fn requeues_on_ingest_failure_and_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/ingest"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/ingest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"success": true})))
            .mount(&server)
            .await;

        let spool: Arc<dyn StorageAdapter> = Arc::new(MemorySpool::new());
        let ingest = IngestClient::new(server.uri(), "K");
        let uploader = EventUploader::new(spool.clone(), ingest, Duration::from_millis(20), 100, u64::MAX);

        uploader.add(sample_event());
        tokio::time::sleep(Duration::from_millis(150)).await;

        // The failed attempt's spool entry is an intentional orphan
        // (reclaimed only by FIFO eviction, see `flush_batch`), so the
        // observable contract here is delivery, not an empty spool.
        let requests = server.received_requests().await.unwrap();
        assert!(requests.len() >= 2, "expected a retry after the 503");
    }

    #[tokio::test]
    async fn quota_bounds_spool_size_across_flushes() {
        let server = MockServer::start().await;
        // Every ingest attempt fails, so each flush leaves an orphaned
        // spool entry behind; only eviction keeps the spool bounded.
        Mock::given(method("POST"))
            .and(path("/api/v1/ingest"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let spool: Arc<dyn StorageAdapter> = Arc::new(MemorySpool::new());
        let ingest = IngestClient::new(server.uri(), "K");
        let uploader = EventUploader::new(spool.clone(), ingest, Duration::from_millis(10), 1, 200);

        for i in 0..20 {
            uploader.add(Event::Step {
                step_id: format!("s{i}"),
                trace_id: "p-t1".into(),
                project_id: "p".into(),
                step_name: "go".into(),
                step_number: i,
                artifacts: vec![],
                metadata: Default::default(),
                timestamp: "2026-07-31T00:00:00Z".into(),
            });
            tokio::time::sleep(Duration::from_millis(15)).await;
        }

        assert!(
            spool.size().await <= 200,
            "quota of 200 bytes should bound spool size regardless of how many batches flushed"
        );
    }
}
