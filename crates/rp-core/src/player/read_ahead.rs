//! Background task feeding the buffer from the synchronizer.

use parking_lot::Mutex;
use rp_common::Package;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

use crate::buffer::BufferQueue;
use crate::publish::ReplayStatistics;
use crate::reader::ReaderSynchronizer;

const IDLE_BACKOFF: Duration = Duration::from_millis(1);

/// Owns the read-ahead thread. At most one runs at a time.
pub struct ReadAhead {
    sync: Arc<Mutex<ReaderSynchronizer>>,
    buffer: Arc<BufferQueue>,
    stats: Arc<ReplayStatistics>,
    run: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ReadAhead {
    pub fn new(
        sync: Arc<Mutex<ReaderSynchronizer>>,
        buffer: Arc<BufferQueue>,
        stats: Arc<ReplayStatistics>,
    ) -> Self {
        ReadAhead {
            sync,
            buffer,
            stats,
            run: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(&mut self) -> std::io::Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        self.run.store(true, Ordering::Release);
        let sync = Arc::clone(&self.sync);
        let buffer = Arc::clone(&self.buffer);
        let stats = Arc::clone(&self.stats);
        let run = Arc::clone(&self.run);
        let handle = thread::Builder::new()
            .name("recplay-read-ahead".into())
            .spawn(move || read_loop(&sync, &buffer, &stats, &run))?;
        self.handle = Some(handle);
        Ok(())
    }

    /// Stop the thread and disable buffer push. Packages held by the thread
    /// but not yet buffered are dropped.
    pub fn stop(&mut self) {
        self.run.store(false, Ordering::Release);
        self.buffer.stop_push();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("read-ahead thread panicked");
            }
        }
    }
}

impl Drop for ReadAhead {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_loop(
    sync: &Mutex<ReaderSynchronizer>,
    buffer: &BufferQueue,
    stats: &ReplayStatistics,
    run: &AtomicBool,
) {
    debug!("read-ahead started");
    let mut pending: VecDeque<Package> = VecDeque::new();
    while run.load(Ordering::Acquire) {
        if pending.is_empty() {
            let mut sync = sync.lock();
            if sync.end_of_file() {
                drop(sync);
                buffer.set_end_of_file();
                debug!("read-ahead reached end of file");
                break;
            }
            pending.extend(sync.next_packages());
            drop(sync);
            if pending.is_empty() {
                thread::sleep(IDLE_BACKOFF);
                continue;
            }
        }

        while let Some(package) = pending.pop_front() {
            match buffer.push(package) {
                Ok(()) => stats.add_read(1),
                Err(refused) => {
                    // Push is off; keep the package until it is re-enabled
                    // or this thread is stopped.
                    pending.push_front(refused);
                    if buffer.is_shutdown() {
                        return;
                    }
                    thread::sleep(IDLE_BACKOFF);
                    break;
                }
            }
        }
    }
    debug!(dropped = pending.len(), "read-ahead stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferLimits;
    use crate::reader::{MemoryReaderFactory, MemoryRecording, ReaderRegistry};
    use rp_config::PlayerConfig;
    use std::path::PathBuf;
    use std::time::Instant;

    fn rig(timestamps: &[u64], limits: BufferLimits) -> ReadAhead {
        let factory = MemoryReaderFactory::new("mem");
        factory.insert("a.mem", MemoryRecording::new("a").packages_at(timestamps, 1));
        let mut registry = ReaderRegistry::new();
        registry.register(Arc::new(factory)).unwrap();
        let mut sync = ReaderSynchronizer::new(Arc::new(PlayerConfig::default()), Arc::new(registry));
        sync.open(&[PathBuf::from("a.mem")]).unwrap();
        ReadAhead::new(
            Arc::new(Mutex::new(sync)),
            Arc::new(BufferQueue::new(limits)),
            Arc::new(ReplayStatistics::new()),
        )
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_fills_buffer_then_signals_eof() {
        let mut ra = rig(&[1, 2, 3, 4], BufferLimits::default());
        ra.start().unwrap();
        wait_until(|| ra.buffer.is_end_of_file());
        assert_eq!(ra.buffer.len(), 4);
        assert_eq!(ra.stats.counters().read_packages, 4);
        ra.stop();
        assert!(!ra.is_running());
    }

    #[test]
    fn test_backpressure_and_resume() {
        let limits = BufferLimits {
            max_bytes: u64::MAX,
            max_time_span: 1,
        };
        let mut ra = rig(&[10, 11, 20, 30], limits);
        ra.start().unwrap();
        wait_until(|| ra.buffer.len() == 2);
        thread::sleep(Duration::from_millis(10));
        assert_eq!(ra.buffer.len(), 2);

        let mut seen = Vec::new();
        while seen.len() < 4 {
            if let Some(p) = ra.buffer.try_pop() {
                seen.push(p.timestamp());
            }
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(seen, vec![10, 11, 20, 30]);
        ra.stop();
    }

    #[test]
    fn test_paused_push_keeps_packages() {
        let limits = BufferLimits {
            max_bytes: u64::MAX,
            max_time_span: 0,
        };
        let mut ra = rig(&[1, 2, 3], limits);
        ra.start().unwrap();
        wait_until(|| ra.buffer.len() == 1);
        ra.buffer.stop_push();
        assert_eq!(ra.buffer.try_pop().map(|p| p.timestamp()), Some(1));
        thread::sleep(Duration::from_millis(10));
        assert!(ra.buffer.is_empty());

        ra.buffer.start_push();
        wait_until(|| ra.buffer.len() == 1);
        assert_eq!(ra.buffer.try_pop().map(|p| p.timestamp()), Some(2));
        ra.stop();
    }
}
