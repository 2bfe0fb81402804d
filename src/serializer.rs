//! Off-main-thread serialization of arbitrary host values to JSON bytes.
//!
//! The hot path (`Trace::data_id`) never serializes: it boxes a closure
//! that captures the value and hands it to a worker. Workers run on
//! tokio's blocking-thread pool so one slow or panicking serialization
//! never stalls the async scheduler or takes down the pool.

use crate::error::SerializeError;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Semaphore};

type Job = Box<dyn FnOnce() -> Result<Vec<u8>, SerializeError> + Send>;

struct Task {
    job: Job,
    reply: oneshot::Sender<Result<Vec<u8>, SerializeError>>,
}

/// A fixed-size pool of background JSON-encoding workers.
///
/// Each worker is a loop pulling tasks off a shared queue; a worker that
/// panics while serializing fails only the in-flight task, the pool
/// continues with the remaining workers. A pool constructed with size 0
/// falls back to serializing directly via `spawn_blocking` from the
/// caller's async context (still non-blocking of the calling task).
pub struct SerializerPool {
    sender: Mutex<Option<mpsc::UnboundedSender<Task>>>,
    /// Bounds how many jobs may be in flight across the whole pool, one
    /// permit per worker.
    in_flight: Arc<Semaphore>,
    pool_size: usize,
}

impl SerializerPool {
    /// Start `pool_size` background workers.
    pub fn new(pool_size: usize) -> Self {
        if pool_size == 0 {
            return Self {
                sender: Mutex::new(None),
                in_flight: Arc::new(Semaphore::new(1)),
                pool_size: 0,
            };
        }

        let (sender, receiver) = mpsc::unbounded_channel::<Task>();
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        for worker_id in 0..pool_size {
            let receiver = receiver.clone();
            tokio::spawn(async move {
                loop {
                    let task = {
                        let mut receiver = receiver.lock().await;
                        receiver.recv().await
                    };
                    let Some(task) = task else {
                        tracing::debug!(worker_id, "serializer worker shutting down, channel closed");
                        return;
                    };

                    let result = tokio::task::spawn_blocking(move || {
                        std::panic::catch_unwind(AssertUnwindSafe(task.job))
                    })
                    .await;

                    let outcome = match result {
                        Ok(Ok(encoded)) => encoded,
                        Ok(Err(_panic)) => {
                            tracing::warn!(worker_id, "serializer worker panicked, dropping task");
                            Err(SerializeError::WorkerPanicked)
                        }
                        Err(join_err) => {
                            tracing::warn!(worker_id, error = %join_err, "serializer worker task failed to join");
                            Err(SerializeError::WorkerPanicked)
                        }
                    };

                    let _ = task.reply.send(outcome);
                }
            });
        }

        Self {
            sender: Mutex::new(Some(sender)),
            in_flight: Arc::new(Semaphore::new(pool_size)),
            pool_size,
        }
    }

    /// Serialize `value` to JSON bytes without blocking the caller.
    pub async fn serialize<T>(&self, value: T) -> Result<Vec<u8>, SerializeError>
    where
        T: serde::Serialize + Send + 'static,
    {
        let job: Job = Box::new(move || serde_json::to_vec(&value).map_err(SerializeError::from));

        let sender = self.sender.lock().clone();
        let Some(sender) = sender else {
            // Zero live workers: encode directly via spawn_blocking.
            return tokio::task::spawn_blocking(job)
                .await
                .map_err(|_| SerializeError::WorkerPanicked)?;
        };

        let _permit = self.in_flight.acquire().await.map_err(|_| SerializeError::PoolClosed)?;
        let (reply, reply_rx) = oneshot::channel();
        sender
            .send(Task { job, reply })
            .map_err(|_| SerializeError::PoolClosed)?;
        reply_rx.await.map_err(|_| SerializeError::PoolClosed)?
    }

    /// Wait until the queue is empty and no worker is busy, then stop
    /// accepting new work. Used at shutdown. Takes `&self`: the pool is
    /// shared via `Arc` by the tracer, so draining cannot require
    /// exclusive ownership.
    pub async fn drain(&self) {
        if self.pool_size == 0 {
            return;
        }
        // Acquiring every permit means every worker is idle.
        if let Ok(permits) = self.in_flight.clone().acquire_many_owned(self.pool_size as u32).await {
            drop(permits);
        }
        self.sender.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Payload {
        x: u32,
    }

    #[tokio::test]
    async fn serializes_through_worker_pool() {
        let pool = SerializerPool::new(2);
        let bytes = pool.serialize(Payload { x: 42 }).await.unwrap();
        assert_eq!(bytes, br#"{"x":42}"#);
    }

    #[tokio::test]
    async fn falls_back_to_direct_encoding_with_zero_workers() {
        let pool = SerializerPool::new(0);
        let bytes = pool.serialize(Payload { x: 7 }).await.unwrap();
        assert_eq!(bytes, br#"{"x":7}"#);
    }

    #[tokio::test]
    async fn continues_after_a_panicking_job() {
        let pool = SerializerPool::new(1);

        let job: Job = Box::new(|| -> Result<Vec<u8>, SerializeError> { panic!("boom") });
        let (reply, reply_rx) = oneshot::channel();
        pool.sender.lock().as_ref().unwrap().send(Task { job, reply }).unwrap();
        let outcome = reply_rx.await.unwrap();
        assert!(matches!(outcome, Err(SerializeError::WorkerPanicked)));

        // Pool still serves subsequent requests.
        let bytes = pool.serialize(Payload { x: 1 }).await.unwrap();
        assert_eq!(bytes, br#"{"x":1}"#);
    }
}
