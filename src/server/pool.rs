//! Bounded worker pool.
//!
//! A fixed set of threads pulls items from a FIFO queue guarded by a mutex
//! and a condition variable. The queue has a hard capacity: once it is full,
//! `submit` hands the item straight back instead of blocking the caller.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use log::{debug, error};

use crate::server::error::Error;

/// A unit of work a pool thread can run.
pub trait Process: Send + 'static {
    type Output: Send + 'static;

    fn process(&mut self) -> Self::Output;
}

/// Why an item was not queued. The item is always returned.
pub enum SubmitError<T> {
    /// The queue already holds `max_requests` items.
    Full(T),
    /// The pool has been shut down.
    Stopped(T),
}

impl<T> SubmitError<T> {
    pub fn into_inner(self) -> T {
        match self {
            SubmitError::Full(item) | SubmitError::Stopped(item) => item,
        }
    }
}

impl<T> fmt::Debug for SubmitError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::Full(_) => f.write_str("Full(..)"),
            SubmitError::Stopped(_) => f.write_str("Stopped(..)"),
        }
    }
}

impl<T> fmt::Display for SubmitError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::Full(_) => f.write_str("work queue is full"),
            SubmitError::Stopped(_) => f.write_str("worker pool is stopped"),
        }
    }
}

struct Queue<T> {
    items: VecDeque<T>,
    stopped: bool,
}

struct Shared<T> {
    queue: Mutex<Queue<T>>,
    available: Condvar,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Queue<T>> {
        // A panicking item must not take the rest of the pool down with it
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed-size thread pool over a bounded queue.
pub struct WorkerPool<T: Process> {
    shared: Arc<Shared<T>>,
    workers: Vec<JoinHandle<()>>,
    max_requests: usize,
}

impl<T: Process> WorkerPool<T> {
    /// Spawns `threads` workers. Each finished item is passed, together with
    /// the result of [`Process::process`], to `on_done` on the worker thread.
    pub fn new<F>(threads: usize, max_requests: usize, on_done: F) -> Result<Self, Error>
    where
        F: Fn(T, T::Output) + Send + Sync + 'static,
    {
        if threads == 0 {
            return Err(Error::PoolError("thread count must be greater than zero".to_string()));
        }
        if max_requests == 0 {
            return Err(Error::PoolError("queue capacity must be greater than zero".to_string()));
        }

        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue {
                items: VecDeque::with_capacity(max_requests.min(1024)),
                stopped: false,
            }),
            available: Condvar::new(),
        });
        let on_done = Arc::new(on_done);

        let mut pool = Self {
            shared,
            workers: Vec::with_capacity(threads),
            max_requests,
        };
        for i in 0..threads {
            let shared = Arc::clone(&pool.shared);
            let on_done = Arc::clone(&on_done);
            let spawned = thread::Builder::new()
                .name(format!("microstatic-worker-{i}"))
                .spawn(move || run_worker(&shared, on_done.as_ref()));
            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    // Dropping the pool stops and joins the workers spawned so far
                    return Err(Error::PoolError(format!("failed to spawn worker {i}: {e}")));
                }
            }
        }
        debug!("Started {threads} workers with a queue of {max_requests}");
        Ok(pool)
    }

    /// Queues an item without blocking.
    pub fn submit(&self, item: T) -> Result<(), SubmitError<T>> {
        let mut queue = self.shared.lock();
        if queue.stopped {
            return Err(SubmitError::Stopped(item));
        }
        if queue.items.len() >= self.max_requests {
            return Err(SubmitError::Full(item));
        }
        queue.items.push_back(item);
        drop(queue);
        self.shared.available.notify_one();
        Ok(())
    }

    /// Items waiting for a worker.
    pub fn len(&self) -> usize {
        self.shared.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.max_requests
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Stops intake, joins the workers once their current item is done, and
    /// returns the items no worker had started.
    pub fn shutdown(&mut self) -> Vec<T> {
        let pending: Vec<T> = {
            let mut queue = self.shared.lock();
            queue.stopped = true;
            queue.items.drain(..).collect()
        };
        self.shared.available.notify_all();

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("A worker thread panicked");
            }
        }
        pending
    }
}

impl<T: Process> Drop for WorkerPool<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker<T, F>(shared: &Shared<T>, on_done: &F)
where
    T: Process,
    F: Fn(T, T::Output),
{
    loop {
        let mut item = {
            let mut queue = shared.lock();
            loop {
                if queue.stopped {
                    return;
                }
                if let Some(item) = queue.items.pop_front() {
                    break item;
                }
                queue = shared
                    .available
                    .wait(queue)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };
        let output = item.process();
        on_done(item, output);
    }
}
