//! Offload pool for file and network I/O
//!
//! Offloaded operations run here while their Task is unmounted. Each job
//! stores its own result and signals its wait key when done.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A unit of blocking work
pub(crate) type IoJob = Box<dyn FnOnce() + Send>;

static NEXT_IO_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate an offload id (the `WaitKey::Io` payload)
pub(crate) fn next_io_id() -> u64 {
    NEXT_IO_ID.fetch_add(1, Ordering::Relaxed)
}

/// Fixed pool of I/O threads fed by an unbounded channel
pub(crate) struct IoPool {
    size: usize,
    tx: Mutex<Option<Sender<IoJob>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
}

impl IoPool {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            size,
            tx: Mutex::new(None),
            handles: Mutex::new(Vec::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    /// Start the I/O threads
    pub(crate) fn start(&self) -> std::io::Result<()> {
        let (tx, rx) = channel::unbounded::<IoJob>();
        let mut handles = self.handles.lock();
        for i in 0..self.size {
            let rx = rx.clone();
            let shutdown = self.shutdown.clone();
            let handle = thread::Builder::new()
                .name(format!("weft-io-{}", i))
                .spawn(move || Self::worker_loop(rx, shutdown))?;
            handles.push(handle);
        }
        *self.tx.lock() = Some(tx);
        Ok(())
    }

    /// Queue `job`; runs it on the calling thread if the pool is not running
    pub(crate) fn submit(&self, job: IoJob) {
        let rejected = match self.tx.lock().as_ref() {
            Some(tx) => match tx.send(job) {
                Ok(()) => None,
                Err(err) => Some(err.into_inner()),
            },
            None => Some(job),
        };
        if let Some(job) = rejected {
            tracing::debug!("offload pool not running, executing job inline");
            job();
        }
    }

    /// Stop accepting jobs and join the threads
    pub(crate) fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.tx.lock().take();
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            crate::scheduler::timer::join_with_deadline(handle, Duration::from_secs(2));
        }
    }

    fn worker_loop(rx: Receiver<IoJob>, shutdown: Arc<AtomicBool>) {
        while !shutdown.load(Ordering::Acquire) {
            let job = match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(job) => job,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                tracing::error!("offloaded job panicked outside its result slot");
            }
        }
    }
}

impl Drop for IoPool {
    fn drop(&mut self) {
        self.stop();
    }
}
