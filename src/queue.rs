//! In-process job queue
//!
//! Priority-capable, delay-capable hand-off between intake and the worker
//! pool. Entries carry job ids only; the job record store remains the durable
//! source of truth, so a restarted node re-seeds the queue from
//! `JobStore::find_pending`.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default)]
pub struct EnqueueOptions {
    /// Higher priorities dequeue first; ties dequeue FIFO.
    pub priority: i32,
    /// Entry becomes eligible only after the delay elapses.
    pub delay: Option<Duration>,
}

/// A dequeued entry. `attempt` counts dispatch retries for this enqueue.
#[derive(Debug, Clone, Copy)]
pub struct QueueLease {
    pub job_id: Uuid,
    pub attempt: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueEntry {
    job_id: Uuid,
    priority: i32,
    seq: u64,
    attempt: u32,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: highest priority first, then earliest sequence number.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DelayedEntry {
    ready_at: Instant,
    entry: QueueEntry,
}

impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap pops the earliest ready_at first.
        other.ready_at.cmp(&self.ready_at)
    }
}

impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    ready: BinaryHeap<QueueEntry>,
    delayed: BinaryHeap<DelayedEntry>,
    cancelled: HashSet<Uuid>,
    seq: u64,
    closed: bool,
}

impl QueueInner {
    fn promote_due(&mut self, now: Instant) {
        while let Some(head) = self.delayed.peek() {
            if head.ready_at > now {
                break;
            }
            let head = self.delayed.pop().unwrap();
            self.ready.push(head.entry);
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct QueueStats {
    pub waiting: usize,
    pub delayed: usize,
    pub active: usize,
    pub completed: u64,
    pub failed: u64,
}

pub struct JobQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    active: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
            active: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub async fn enqueue(&self, job_id: Uuid, options: EnqueueOptions) {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            debug!(%job_id, "queue closed, dropping enqueue");
            return;
        }
        inner.seq += 1;
        let entry = QueueEntry {
            job_id,
            priority: options.priority,
            seq: inner.seq,
            attempt: 0,
        };
        match options.delay {
            Some(delay) if !delay.is_zero() => inner.delayed.push(DelayedEntry {
                ready_at: Instant::now() + delay,
                entry,
            }),
            _ => inner.ready.push(entry),
        }
        drop(inner);
        self.notify.notify_one();
    }

    /// Re-enqueue after a dispatch failure, preserving priority fairness.
    /// Suppressed when the job was cancelled while in flight.
    pub async fn requeue_with_backoff(&self, job_id: Uuid, attempt: u32, delay: Duration) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.closed || inner.cancelled.remove(&job_id) {
            return false;
        }
        inner.seq += 1;
        let entry = QueueEntry {
            job_id,
            priority: 0,
            seq: inner.seq,
            attempt,
        };
        inner.delayed.push(DelayedEntry {
            ready_at: Instant::now() + delay,
            entry,
        });
        drop(inner);
        self.notify.notify_one();
        true
    }

    /// Block cooperatively until an entry is eligible. Returns `None` once
    /// the queue has been closed.
    pub async fn dequeue(&self) -> Option<QueueLease> {
        loop {
            let notified = self.notify.notified();
            let next_ready_at = {
                let mut inner = self.inner.lock().await;
                if inner.closed {
                    return None;
                }
                inner.promote_due(Instant::now());
                while let Some(entry) = inner.ready.pop() {
                    if inner.cancelled.remove(&entry.job_id) {
                        debug!(job_id = %entry.job_id, "skipping cancelled entry");
                        continue;
                    }
                    return Some(QueueLease {
                        job_id: entry.job_id,
                        attempt: entry.attempt,
                    });
                }
                inner.delayed.peek().map(|d| d.ready_at)
            };

            match next_ready_at {
                Some(at) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep_until(tokio::time::Instant::from_std(at)) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Best-effort cancel. Removes a still-queued entry and returns `true`;
    /// for a job already leased by a worker it only suppresses future
    /// requeues and returns `false`.
    pub async fn cancel(&self, job_id: Uuid) -> bool {
        let mut inner = self.inner.lock().await;
        let before = inner.ready.len() + inner.delayed.len();
        let ready: BinaryHeap<QueueEntry> = inner
            .ready
            .drain()
            .filter(|e| e.job_id != job_id)
            .collect();
        let delayed: BinaryHeap<DelayedEntry> = inner
            .delayed
            .drain()
            .filter(|d| d.entry.job_id != job_id)
            .collect();
        inner.ready = ready;
        inner.delayed = delayed;
        let removed = before != inner.ready.len() + inner.delayed.len();
        if !removed {
            inner.cancelled.insert(job_id);
        }
        removed
    }

    pub fn job_started(&self) {
        self.active.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub async fn job_finished(&self, job_id: Uuid, success: bool) {
        self.active.fetch_sub(1, AtomicOrdering::Relaxed);
        if success {
            self.completed.fetch_add(1, AtomicOrdering::Relaxed);
        } else {
            self.failed.fetch_add(1, AtomicOrdering::Relaxed);
        }
        self.inner.lock().await.cancelled.remove(&job_id);
    }

    pub async fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().await;
        QueueStats {
            waiting: inner.ready.len(),
            delayed: inner.delayed.len(),
            active: self.active.load(AtomicOrdering::Relaxed),
            completed: self.completed.load(AtomicOrdering::Relaxed),
            failed: self.failed.load(AtomicOrdering::Relaxed),
        }
    }

    /// Stop hand-off: waiting and future `dequeue` calls return `None`.
    /// Entries still queued stay PENDING in the record store and are
    /// re-seeded on the next start.
    pub async fn close(&self) {
        self.inner.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}
