//! C1 — `RateLimitedQueue`: FIFO admission queue with periodic release.
//!
//! Grounded on `agents/rate_limiter.py`'s `RateLimitedQueue`/`_queue_processor`
//! for the exact release-loop semantics (drain expired heads before releasing
//! a slot; never let expired entries steal a release), and on the teacher's
//! `reasoning::circuit_breaker::CircuitBreakerRegistry` for the
//! single-mutex-guards-everything shared-state shape.

use crate::config::LaneConfig;
use crate::error::DispatchError;
use crate::types::{ReleaseOutcome, TerminalReason};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;

struct QueueEntry {
    enqueued_at: Instant,
    deadline: Instant,
    tx: oneshot::Sender<ReleaseOutcome>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LaneStatsSnapshot {
    pub enqueued: u64,
    pub released: u64,
    pub rejected: u64,
    pub expired: u64,
    pub current_depth: usize,
    pub peak_depth: usize,
}

struct Inner {
    queue: VecDeque<QueueEntry>,
    enqueued: u64,
    released: u64,
    rejected: u64,
    expired: u64,
    peak_depth: usize,
}

impl Inner {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            enqueued: 0,
            released: 0,
            rejected: 0,
            expired: 0,
            peak_depth: 0,
        }
    }

    fn snapshot(&self) -> LaneStatsSnapshot {
        LaneStatsSnapshot {
            enqueued: self.enqueued,
            released: self.released,
            rejected: self.rejected,
            expired: self.expired,
            current_depth: self.queue.len(),
            peak_depth: self.peak_depth,
        }
    }
}

/// A single rate-limited lane. Construct with [`RateLimitedQueue::new`], then
/// call [`RateLimitedQueue::start`] once before admitting requests.
pub struct RateLimitedQueue {
    name: String,
    config: LaneConfig,
    inner: Mutex<Inner>,
    running: AtomicBool,
    stop_notify: Notify,
    release_handle: Mutex<Option<JoinHandle<()>>>,
}

impl RateLimitedQueue {
    pub fn new(name: impl Into<String>, config: LaneConfig) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner::new()),
            running: AtomicBool::new(true),
            stop_notify: Notify::new(),
            release_handle: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the release engine. Idempotent only in the sense that calling it
    /// twice spawns two loops racing over the same mutex; callers should call
    /// it exactly once (the dispatcher does this lazily behind an init lock).
    pub fn start(self: &Arc<Self>) {
        let me = Arc::clone(self);
        let handle = tokio::spawn(async move { me.release_loop().await });
        *self.release_handle.lock() = Some(handle);
    }

    /// Stop the release engine and resolve every still-queued entry with
    /// `ShuttingDown`. Idempotent.
    pub async fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.stop_notify.notify_one();
        }
        let handle = self.release_handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn stats(&self) -> LaneStatsSnapshot {
        self.inner.lock().snapshot()
    }

    /// Admit one request. Resolves once the entry is released, rejected
    /// (queue at capacity at arrival), or its deadline elapses while queued.
    pub async fn admit(&self) -> Result<Duration, DispatchError> {
        if !self.running.load(Ordering::SeqCst) {
            tracing::warn!(lane = %self.name, "admission refused: shutting down");
            return Err(DispatchError::ShuttingDown);
        }

        let (tx, rx) = oneshot::channel();
        let now = Instant::now();
        {
            let mut inner = self.inner.lock();
            if inner.queue.len() >= self.config.capacity {
                inner.rejected += 1;
                tracing::warn!(lane = %self.name, depth = inner.queue.len(), "admission rejected: lane at capacity");
                return Err(DispatchError::QueueFull {
                    lane: self.name.clone(),
                });
            }
            inner.queue.push_back(QueueEntry {
                enqueued_at: now,
                deadline: now + self.config.timeout,
                tx,
            });
            inner.enqueued += 1;
            inner.peak_depth = inner.peak_depth.max(inner.queue.len());
            tracing::debug!(lane = %self.name, depth = inner.queue.len(), "admitted");
        }

        match rx.await {
            Ok(ReleaseOutcome::Released { waited }) => Ok(waited),
            Ok(ReleaseOutcome::Expired(TerminalReason::Timeout)) => {
                Err(DispatchError::QueueTimeout {
                    lane: self.name.clone(),
                    waited: self.config.timeout,
                })
            }
            Ok(ReleaseOutcome::Expired(TerminalReason::Shutdown)) | Err(_) => {
                Err(DispatchError::ShuttingDown)
            }
        }
    }

    async fn release_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.release_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.release_one();
                }
                _ = self.stop_notify.notified() => break,
            }
        }
        self.drain_shutdown();
    }

    fn release_one(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        while let Some(front) = inner.queue.front() {
            if front.deadline > now {
                break;
            }
            let entry = inner.queue.pop_front().expect("front just peeked");
            inner.expired += 1;
            let _ = entry.tx.send(ReleaseOutcome::Expired(TerminalReason::Timeout));
        }

        if let Some(entry) = inner.queue.pop_front() {
            let waited = now.duration_since(entry.enqueued_at);
            inner.released += 1;
            tracing::debug!(lane = %self.name, waited_ms = waited.as_millis() as u64, "released");
            let _ = entry.tx.send(ReleaseOutcome::Released { waited });
        }
    }

    fn drain_shutdown(&self) {
        let mut inner = self.inner.lock();
        let count = inner.queue.len();
        while let Some(entry) = inner.queue.pop_front() {
            inner.expired += 1;
            let _ = entry.tx.send(ReleaseOutcome::Expired(TerminalReason::Shutdown));
        }
        if count > 0 {
            tracing::info!(lane = %self.name, count, "drained queue on shutdown");
        }
    }
}
