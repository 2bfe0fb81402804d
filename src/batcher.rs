//! Time-or-size triggered event batcher.
//!
//! State machine: Idle → Accumulating → Flushing, with failed flushes
//! prepending their snapshot back onto the buffer and restarting the
//! timer. A single `is_processing` flag prevents reentrant flushes; an
//! interval tick that fires mid-flush is a no-op.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

type FlushFn<T> =
    Arc<dyn Fn(Vec<T>) -> Pin<Box<dyn Future<Output = Result<(), Vec<T>>> + Send>> + Send + Sync>;

struct State<T> {
    buffer: VecDeque<T>,
    timer_running: bool,
}

/// A cheap, synchronous `add()` backed by a background timer that flushes
/// on a time-or-size trigger and re-queues on failure.
pub struct Batcher<T: Send + 'static> {
    state: Arc<Mutex<State<T>>>,
    is_processing: Arc<AtomicBool>,
    interval: Duration,
    max_size: usize,
    on_flush: FlushFn<T>,
    wake: Arc<Notify>,
}

impl<T: Send + 'static> Batcher<T> {
    /// `on_flush` is the owner-supplied handler; it may be asynchronous
    /// and fallible. On success the flushed items are gone. On failure,
    /// they are prepended back into the buffer, oldest first.
    pub fn new<F, Fut>(interval: Duration, max_size: usize, on_flush: F) -> Arc<Self>
    where
        F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Vec<T>>> + Send + 'static,
    {
        let on_flush: FlushFn<T> = Arc::new(move |batch| Box::pin(on_flush(batch)));

        let batcher = Arc::new(Self {
            state: Arc::new(Mutex::new(State {
                buffer: VecDeque::new(),
                timer_running: false,
            })),
            is_processing: Arc::new(AtomicBool::new(false)),
            interval,
            max_size,
            on_flush,
            wake: Arc::new(Notify::new()),
        });

        let timer_owner = batcher.clone();
        tokio::spawn(async move { timer_owner.timer_loop().await });

        batcher
    }

    /// Synchronous, cheap enqueue. Starts the timer on the Idle→Accumulating
    /// transition and triggers an immediate flush at `max_size`.
    pub fn add(self: &Arc<Self>, item: T) {
        let should_flush_now = {
            let mut state = self.state.lock();
            state.buffer.push_back(item);
            if !state.timer_running {
                state.timer_running = true;
                self.wake.notify_one();
            }
            state.buffer.len() >= self.max_size
        };

        if should_flush_now {
            let this = self.clone();
            tokio::spawn(async move { this.flush_once().await });
        }
    }

    /// Background timer: sleeps `interval`, flushes if not already
    /// flushing, then waits for the next Idle→Accumulating wakeup so a
    /// quiescent process does not tick forever.
    async fn timer_loop(self: Arc<Self>) {
        loop {
            self.wake.notified().await;
            loop {
                tokio::time::sleep(self.interval).await;

                if self.is_processing.load(Ordering::Acquire) {
                    continue; // reentrant tick while flushing: no-op
                }

                self.flush_once().await;

                let buffer_empty = self.state.lock().buffer.is_empty();
                if buffer_empty {
                    self.state.lock().timer_running = false;
                    break; // back to Idle; wait for next add()
                }
            }
        }
    }

    /// Snapshot the buffer atomically, clear it, call the flush handler.
    /// On failure, prepend the snapshot back preserving age order.
    async fn flush_once(self: &Arc<Self>) {
        if self
            .is_processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return; // already flushing
        }

        let snapshot: Vec<T> = {
            let mut state = self.state.lock();
            state.buffer.drain(..).collect()
        };

        if snapshot.is_empty() {
            self.is_processing.store(false, Ordering::Release);
            return;
        }

        if let Err(failed) = (self.on_flush)(snapshot).await {
            let mut state = self.state.lock();
            // Prepend back preserving age order: failed items go in front
            // of whatever arrived while we were flushing.
            for item in failed.into_iter().rev() {
                state.buffer.push_front(item);
            }
            if !state.timer_running {
                state.timer_running = true;
                self.wake.notify_one();
            }
        }

        self.is_processing.store(false, Ordering::Release);
    }

    /// Cancel the timer, then loop calling flush until the buffer is empty.
    /// Used at shutdown.
    pub async fn force_drain(self: &Arc<Self>) {
        loop {
            let has_pending = !self.state.lock().buffer.is_empty();
            if !has_pending && !self.is_processing.load(Ordering::Acquire) {
                return;
            }
            self.flush_once().await;
            tokio::task::yield_now().await;
        }
    }

    /// Current buffer length, for tests and diagnostics.
    pub fn pending_len(&self) -> usize {
        self.state.lock().buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn flushes_immediately_at_max_batch_size_one() {
        let flushed = Arc::new(Mutex::new(Vec::new()));
        let flushed_clone = flushed.clone();

        let batcher = Batcher::new(Duration::from_secs(60), 1, move |batch: Vec<i32>| {
            let flushed = flushed_clone.clone();
            async move {
                flushed.lock().extend(batch);
                Ok(())
            }
        });

        batcher.add(1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*flushed.lock(), vec![1]);
    }

    #[tokio::test]
    async fn flushes_on_timer_interval() {
        let flushed = Arc::new(Mutex::new(Vec::new()));
        let flushed_clone = flushed.clone();

        let batcher = Batcher::new(Duration::from_millis(20), 100, move |batch: Vec<i32>| {
            let flushed = flushed_clone.clone();
            async move {
                flushed.lock().extend(batch);
                Ok(())
            }
        });

        batcher.add(1);
        batcher.add(2);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(*flushed.lock(), vec![1, 2]);
    }

    #[tokio::test]
    async fn requeues_snapshot_on_flush_failure() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let batcher = Batcher::new(Duration::from_millis(15), 100, move |batch: Vec<i32>| {
            let attempts = attempts_clone.clone();
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(batch)
                } else {
                    Ok(())
                }
            }
        });

        batcher.add(1);
        tokio::time::sleep(Duration::from_millis(100).checked_add(Duration::from_millis(50)).unwrap()).await;

        assert!(attempts.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn force_drain_empties_buffer() {
        let flushed = Arc::new(Mutex::new(Vec::new()));
        let flushed_clone = flushed.clone();

        let batcher = Batcher::new(Duration::from_secs(60), 100, move |batch: Vec<i32>| {
            let flushed = flushed_clone.clone();
            async move {
                flushed.lock().extend(batch);
                Ok(())
            }
        });

        batcher.add(1);
        batcher.add(2);
        batcher.force_drain().await;

        assert_eq!(batcher.pending_len(), 0);
        assert_eq!(*flushed.lock(), vec![1, 2]);
    }
}
