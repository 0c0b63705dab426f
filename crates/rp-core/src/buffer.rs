//! Bounded producer/consumer queue between read-ahead and the publish loop.
//!
//! Admission is gated by two limits: the bytes currently buffered and the
//! simulated time between the oldest and newest buffered package. Both are
//! evaluated as they would stand after the push, so neither limit is ever
//! exceeded while packages are observable. An empty queue always admits.

use parking_lot::{Condvar, Mutex};
use rp_common::Package;
use rp_config::player::{mb_to_bytes, DEFAULT_MAX_READ_AHEAD_MB, DEFAULT_MAX_TIME_SPAN_US};
use rp_config::{keys, ConfigStore};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Fixed bookkeeping cost charged per buffered package.
pub const PACKAGE_OVERHEAD: u64 = std::mem::size_of::<Package>() as u64;

/// Bytes a package is charged against the byte limit.
pub fn package_cost(package: &Package) -> u64 {
    package.size() as u64 + PACKAGE_OVERHEAD
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLimits {
    pub max_bytes: u64,
    /// Simulated µs between front and back.
    pub max_time_span: u64,
}

impl Default for BufferLimits {
    fn default() -> Self {
        BufferLimits {
            max_bytes: mb_to_bytes(DEFAULT_MAX_READ_AHEAD_MB),
            max_time_span: DEFAULT_MAX_TIME_SPAN_US,
        }
    }
}

impl BufferLimits {
    pub fn from_config(config: &dyn ConfigStore) -> Self {
        BufferLimits {
            max_bytes: mb_to_bytes(
                config.get_int(keys::BUFFER_MAX_READ_AHEAD_MB, DEFAULT_MAX_READ_AHEAD_MB),
            ),
            max_time_span: config.get_uint(keys::BUFFER_MAX_TIME_SPAN_US, DEFAULT_MAX_TIME_SPAN_US),
        }
    }
}

#[derive(Debug)]
struct Inner {
    queue: VecDeque<Package>,
    bytes: u64,
    limits: BufferLimits,
    paused: bool,
    push_enabled: bool,
    end_of_file: bool,
    shutdown: bool,
}

impl Inner {
    fn time_span(&self) -> u64 {
        match (self.queue.front(), self.queue.back()) {
            (Some(front), Some(back)) => back.timestamp().saturating_sub(front.timestamp()),
            _ => 0,
        }
    }

    fn accepting(&self) -> bool {
        self.push_enabled && !self.shutdown
    }

    fn admits(&self, package: &Package) -> bool {
        let Some(front) = self.queue.front() else {
            return true;
        };
        let back_ts = self
            .queue
            .back()
            .map_or(package.timestamp(), |b| b.timestamp().max(package.timestamp()));
        let span = back_ts.saturating_sub(front.timestamp());
        self.bytes.saturating_add(package_cost(package)) <= self.limits.max_bytes
            && span <= self.limits.max_time_span
    }

    fn enqueue(&mut self, package: Package) {
        self.bytes += package_cost(&package);
        self.queue.push_back(package);
    }

    fn dequeue(&mut self) -> Option<Package> {
        let package = self.queue.pop_front()?;
        self.bytes = self.bytes.saturating_sub(package_cost(&package));
        Some(package)
    }
}

/// Thread-safe FIFO of packages with byte and time-span backpressure.
pub struct BufferQueue {
    inner: Mutex<Inner>,
    /// Producers waiting for room.
    push_cv: Condvar,
    /// Consumers waiting for data.
    pop_cv: Condvar,
    config: Option<Arc<dyn ConfigStore>>,
}

impl std::fmt::Debug for BufferQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BufferQueue")
            .field("len", &inner.queue.len())
            .field("bytes", &inner.bytes)
            .field("limits", &inner.limits)
            .field("paused", &inner.paused)
            .field("push_enabled", &inner.push_enabled)
            .field("end_of_file", &inner.end_of_file)
            .field("shutdown", &inner.shutdown)
            .finish()
    }
}

impl BufferQueue {
    /// Queue with fixed limits.
    pub fn new(limits: BufferLimits) -> Self {
        BufferQueue {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                bytes: 0,
                limits,
                paused: false,
                push_enabled: true,
                end_of_file: false,
                shutdown: false,
            }),
            push_cv: Condvar::new(),
            pop_cv: Condvar::new(),
            config: None,
        }
    }

    /// Queue whose byte limit is re-read from `config` on every
    /// [`BufferQueue::start_push`].
    pub fn from_config(config: Arc<dyn ConfigStore>) -> Self {
        let mut queue = BufferQueue::new(BufferLimits::from_config(config.as_ref()));
        queue.config = Some(config);
        queue
    }

    /// Append a package, blocking while the queue is full.
    ///
    /// Hands the package back when push is disabled or the queue is shut
    /// down, before or during the wait.
    pub fn push(&self, package: Package) -> Result<(), Package> {
        let mut inner = self.inner.lock();
        while inner.accepting() && !inner.admits(&package) {
            self.push_cv.wait(&mut inner);
        }
        if !inner.accepting() {
            return Err(package);
        }
        inner.enqueue(package);
        drop(inner);
        self.pop_cv.notify_one();
        Ok(())
    }

    /// Non-blocking push. Hands the package back when it is not admitted.
    pub fn try_push(&self, package: Package) -> Result<(), Package> {
        let mut inner = self.inner.lock();
        if !inner.accepting() || !inner.admits(&package) {
            return Err(package);
        }
        inner.enqueue(package);
        drop(inner);
        self.pop_cv.notify_one();
        Ok(())
    }

    /// Take the oldest package, blocking until one is available or the
    /// queue is paused, at end of file, or shut down.
    ///
    /// Returns `(Some, false)` on data, otherwise `(None, end_of_file)`.
    pub fn pop(&self) -> (Option<Package>, bool) {
        let mut inner = self.inner.lock();
        loop {
            if let Some(package) = inner.dequeue() {
                drop(inner);
                self.push_cv.notify_one();
                return (Some(package), false);
            }
            if inner.shutdown || inner.end_of_file || inner.paused {
                return (None, inner.end_of_file);
            }
            self.pop_cv.wait(&mut inner);
        }
    }

    /// Non-blocking pop.
    pub fn try_pop(&self) -> Option<Package> {
        let package = self.inner.lock().dequeue();
        if package.is_some() {
            self.push_cv.notify_one();
        }
        package
    }

    /// Wake consumers without delivering data. Stays in effect until
    /// [`BufferQueue::resume`].
    pub fn pause(&self) {
        self.inner.lock().paused = true;
        self.pop_cv.notify_all();
    }

    pub fn resume(&self) {
        self.inner.lock().paused = false;
    }

    /// Accept pushes again and reload the byte limit.
    pub fn start_push(&self) {
        let mut inner = self.inner.lock();
        if let Some(config) = &self.config {
            inner.limits = BufferLimits::from_config(config.as_ref());
        }
        inner.push_enabled = true;
        debug!(
            max_bytes = inner.limits.max_bytes,
            max_time_span = inner.limits.max_time_span,
            "buffer push enabled"
        );
        drop(inner);
        self.push_cv.notify_all();
    }

    /// Refuse further pushes and release blocked producers. Contents stay.
    pub fn stop_push(&self) {
        self.inner.lock().push_enabled = false;
        self.push_cv.notify_all();
    }

    /// Drop all contents and the end-of-file mark.
    ///
    /// Call [`BufferQueue::stop_push`] first while a producer is running.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.queue.clear();
        inner.bytes = 0;
        inner.end_of_file = false;
        drop(inner);
        self.push_cv.notify_all();
    }

    /// Mark end of file: no more pushes; consumers drain then see EOF.
    pub fn set_end_of_file(&self) {
        let mut inner = self.inner.lock();
        inner.end_of_file = true;
        inner.push_enabled = false;
        drop(inner);
        self.push_cv.notify_all();
        self.pop_cv.notify_all();
    }

    /// Terminate every wait and drop contents. Permanent.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.shutdown = true;
        inner.push_enabled = false;
        inner.queue.clear();
        inner.bytes = 0;
        drop(inner);
        self.push_cv.notify_all();
        self.pop_cv.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().queue.is_empty()
    }

    /// Bytes charged for the buffered packages, overhead included.
    pub fn buffered_bytes(&self) -> u64 {
        self.inner.lock().bytes
    }

    pub fn time_span(&self) -> u64 {
        self.inner.lock().time_span()
    }

    pub fn limits(&self) -> BufferLimits {
        self.inner.lock().limits
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    pub fn is_push_enabled(&self) -> bool {
        self.inner.lock().push_enabled
    }

    pub fn is_end_of_file(&self) -> bool {
        self.inner.lock().end_of_file
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.lock().shutdown
    }
}
