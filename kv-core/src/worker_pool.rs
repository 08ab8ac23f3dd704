//! # Worker Pool
//!
//! Offloads expensive destructor work (freeing a large ZSet) off the
//! event loop thread so a single `del` of a huge sorted set cannot stall
//! every other connection. Deliberately built on `std::sync::{Mutex,
//! Condvar}` over a bounded queue rather than a channel crate, and over
//! a closed set of named jobs rather than an arbitrary boxed closure, so
//! the only work this pool can ever run is work this crate knows how to
//! account for.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, trace};

use crate::zset::ZSet;

/// A unit of work handed to the pool. Closed on purpose: growing this
/// enum is how new kinds of offloaded work get added, not a generic
/// `Box<dyn FnOnce()>`.
pub enum Task {
    /// Drop a ZSet's nodes off the event loop thread.
    DestroyZSet(ZSet),
    /// Ask a worker to exit; used to shut the pool down cleanly.
    Shutdown,
}

struct Shared {
    queue: Mutex<VecDeque<Task>>,
    condvar: Condvar,
}

/// A fixed-size pool of worker threads draining a shared task queue.
pub struct WorkerPool {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `workers` threads, each looping on the shared queue until
    /// it receives [`Task::Shutdown`].
    pub fn new(workers: usize) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
        });

        let handles = (0..workers.max(1))
            .map(|id| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("kv-worker-{id}"))
                    .spawn(move || worker_loop(id, shared))
                    .expect("spawning worker thread")
            })
            .collect();

        WorkerPool { shared, handles }
    }

    /// Queues `task` for a worker to pick up.
    pub fn submit(&self, task: Task) {
        let mut queue = self.shared.queue.lock().expect("worker queue poisoned");
        queue.push_back(task);
        self.shared.condvar.notify_one();
    }

    /// Signals every worker to exit and waits for them to finish.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        {
            let mut queue = self.shared.queue.lock().expect("worker queue poisoned");
            for _ in &self.handles {
                queue.push_back(Task::Shutdown);
            }
            self.shared.condvar.notify_all();
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.stop_and_join();
        }
    }
}

fn worker_loop(id: usize, shared: Arc<Shared>) {
    loop {
        let task = {
            let mut queue = shared.queue.lock().expect("worker queue poisoned");
            while queue.is_empty() {
                queue = shared.condvar.wait(queue).expect("worker queue poisoned");
            }
            queue.pop_front().expect("queue non-empty under lock")
        };

        match task {
            Task::Shutdown => {
                debug!(worker = id, "worker shutting down");
                return;
            }
            Task::DestroyZSet(zset) => {
                trace!(worker = id, members = zset.len(), "dropping zset off event loop");
                drop(zset);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_and_drains_a_large_zset() {
        let pool = WorkerPool::new(2);
        let mut zset = ZSet::new();
        for i in 0..20_000 {
            zset.add(format!("member-{i}").into_bytes(), i as f64);
        }
        pool.submit(Task::DestroyZSet(zset));
        pool.shutdown();
    }

    #[test]
    fn shutdown_joins_all_workers() {
        let pool = WorkerPool::new(4);
        for _ in 0..10 {
            pool.submit(Task::DestroyZSet(ZSet::new()));
        }
        pool.shutdown();
    }
}
