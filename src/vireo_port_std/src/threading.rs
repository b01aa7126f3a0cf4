//! Worker-thread plumbing behind the simulated context switch.
use slab::Slab;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

/// A binary gate. `wait` blocks until somebody `open`s it, consuming the
/// token; an `open` delivered before the matching `wait` is not lost.
///
/// `std::thread::park` would almost do, but it permits spurious wakeups and
/// the simulated context switch must not: a worker that slips through its
/// gate uncommanded would run concurrently with the kernel loop.
#[derive(Debug, Default)]
pub(crate) struct Gate {
    pending: Mutex<bool>,
    condvar: Condvar,
}

impl Gate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Let one `wait` through.
    pub(crate) fn open(&self) {
        let mut pending = self.pending.lock().unwrap();
        *pending = true;
        self.condvar.notify_one();
    }

    /// Discard a pending token, if any. Used when the kernel loop restarts
    /// so a token left over from a previous shutdown cannot fake a trap.
    pub(crate) fn drain(&self) {
        *self.pending.lock().unwrap() = false;
    }

    /// Block until opened, consuming the token.
    pub(crate) fn wait(&self) {
        let mut pending = self.pending.lock().unwrap();
        while !*pending {
            pending = self.condvar.wait(pending).unwrap();
        }
        *pending = false;
    }
}

/// Identifies a worker in a [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ThreadId(usize);

#[derive(Debug)]
struct Worker {
    gate: Arc<Gate>,
}

/// A dynamic set of gated worker threads. Workers start parked; the kernel
/// loop lets exactly one of them run at a time, which is what makes the
/// simulation single-core.
#[derive(Debug)]
pub(crate) struct WorkerPool {
    workers: spin::Mutex<Slab<Worker>>,
}

impl WorkerPool {
    pub(crate) fn new() -> Self {
        Self {
            workers: spin::Mutex::new(Slab::new()),
        }
    }

    /// Spawn a worker thread with the given stack size. The closure receives
    /// the worker's own gate (to park on during traps) and does not start
    /// running until the first [`WorkerPool::schedule`].
    pub(crate) fn spawn(
        &self,
        stack_size: usize,
        f: impl FnOnce(Arc<Gate>) + Send + 'static,
    ) -> ThreadId {
        let gate = Arc::new(Gate::new());
        let id = ThreadId(self.workers.lock().insert(Worker {
            gate: Arc::clone(&gate),
        }));

        // The join handle is dropped on purpose: workers that will never be
        // scheduled again (terminated or orphaned by a shutdown) stay parked
        // until the process exits.
        thread::Builder::new()
            .name(format!("vireo-worker-{}", id.0))
            .stack_size(stack_size)
            .spawn(move || {
                gate.wait();
                f(Arc::clone(&gate));
            })
            .expect("failed to spawn a worker thread");

        log::trace!("spawned worker {id:?}");
        id
    }

    /// Open a worker's gate, letting it run.
    pub(crate) fn schedule(&self, id: ThreadId) {
        let gate = Arc::clone(&self.workers.lock()[id.0].gate);
        gate.open();
    }

    /// Forget a worker. Its thread, if still parked somewhere, is orphaned.
    pub(crate) fn remove(&self, id: ThreadId) {
        self.workers.lock().try_remove(id.0);
    }

    /// Forget every worker.
    pub(crate) fn clear(&self) {
        self.workers.lock().clear();
    }
}
