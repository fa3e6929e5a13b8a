// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bounded in-memory job queue.
//
// Admission never waits: a full queue is reported to the client immediately
// so the cashier can retry. Jobs come out in the order they went in, and
// there is exactly one consumer (the print worker).

use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use tillprint_core::config::DEFAULT_QUEUE_CAPACITY;
use tillprint_core::error::{Result, TillprintError};
use tillprint_core::types::PrintJob;

/// FIFO of jobs waiting for the worker.
pub struct JobQueue {
    /// `None` once the queue is closed; dropping the sender lets the
    /// consumer drain what is left and then observe the end.
    tx: StdMutex<Option<mpsc::Sender<PrintJob>>>,
    rx: Mutex<mpsc::Receiver<PrintJob>>,
    capacity: usize,
    /// Jobs accepted and not yet taken by the consumer.
    depth: AtomicUsize,
    closed: AtomicBool,
}

impl JobQueue {
    /// Create a queue holding at most `capacity` jobs (0 means the default).
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_QUEUE_CAPACITY
        } else {
            capacity
        };
        let (tx, rx) = mpsc::channel(capacity);
        info!(capacity, "Job queue created");
        Self {
            tx: StdMutex::new(Some(tx)),
            rx: Mutex::new(rx),
            capacity,
            depth: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<PrintJob>> {
        self.tx.lock().ok().and_then(|guard| guard.clone())
    }

    /// Add a job without waiting.
    ///
    /// Fails with `QueueFull` (carrying the current depth) when the queue is
    /// at capacity, and with `QueueClosed` after [`close`](Self::close).
    pub fn enqueue(&self, job: PrintJob) -> Result<()> {
        let Some(tx) = self.sender() else {
            return Err(TillprintError::QueueClosed);
        };
        self.depth.fetch_add(1, Ordering::SeqCst);
        match tx.try_send(job) {
            Ok(()) => {
                debug!(depth = self.capacity - tx.capacity(), "Job enqueued");
                Ok(())
            }
            Err(err) => {
                self.depth.fetch_sub(1, Ordering::SeqCst);
                match err {
                    mpsc::error::TrySendError::Full(_) => Err(TillprintError::QueueFull {
                        current: self.capacity - tx.capacity(),
                        capacity: self.capacity,
                    }),
                    mpsc::error::TrySendError::Closed(_) => Err(TillprintError::QueueClosed),
                }
            }
        }
    }

    /// Wait for the next job.
    ///
    /// Returns `None` when `cancel` fires or when the queue is closed and
    /// drained.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Option<PrintJob> {
        let mut rx = self.rx.lock().await;
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            job = rx.recv() => job,
        };
        if job.is_some() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
        }
        job
    }

    /// `(current, capacity)`.
    pub fn status(&self) -> (usize, usize) {
        (self.depth.load(Ordering::SeqCst).min(self.capacity), self.capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stop accepting jobs. Safe to call more than once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
        info!("Job queue closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tillprint_core::types::{ConnectionId, JobId};

    fn job(id: &str) -> PrintJob {
        PrintJob::new(JobId(id.into()), ConnectionId(1), serde_json::json!({}))
    }

    #[test]
    fn zero_capacity_uses_default() {
        assert_eq!(JobQueue::new(0).capacity(), DEFAULT_QUEUE_CAPACITY);
    }

    #[tokio::test]
    async fn full_queue_rejects_with_depth() {
        let queue = JobQueue::new(2);
        queue.enqueue(job("a")).expect("a");
        queue.enqueue(job("b")).expect("b");
        assert_eq!(queue.status(), (2, 2));

        match queue.enqueue(job("c")) {
            Err(TillprintError::QueueFull { current, capacity }) => {
                assert_eq!((current, capacity), (2, 2));
            }
            other => panic!("expected QueueFull, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn jobs_come_out_in_order() {
        let queue = JobQueue::new(5);
        for id in ["1", "2", "3"] {
            queue.enqueue(job(id)).expect("enqueue");
        }
        let cancel = CancellationToken::new();
        for id in ["1", "2", "3"] {
            assert_eq!(queue.dequeue(&cancel).await.expect("job").id.as_str(), id);
        }
        assert_eq!(queue.status(), (0, 5));
    }

    #[tokio::test]
    async fn dequeue_returns_none_on_cancel() {
        let queue = JobQueue::new(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(queue.dequeue(&cancel).await.is_none());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_drains() {
        let queue = JobQueue::new(3);
        queue.enqueue(job("left")).expect("enqueue");
        queue.close();
        queue.close();
        assert!(queue.is_closed());
        assert!(matches!(queue.enqueue(job("late")), Err(TillprintError::QueueClosed)));

        let cancel = CancellationToken::new();
        assert_eq!(queue.dequeue(&cancel).await.expect("drained").id.as_str(), "left");
        assert!(queue.dequeue(&cancel).await.is_none());
    }
}
