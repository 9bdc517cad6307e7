//! Per-block serializer.
//!
//! All operations targeting one (document, block) pair are applied strictly
//! one at a time; operations on different blocks proceed fully in parallel.
//! One worker per active block, spawned on demand, fed through a bounded
//! queue (natural backpressure), retired after an idle window.
//!
//! Retiring must never lose a queued job and never leave two workers alive
//! for one block. A send can race a retire: the worker drains its queue under
//! the registry lock before exiting, but a submitter that already held the
//! sender can still slip a job into a channel that is about to be dropped.
//! The submitter therefore keeps the closure in a shared take-slot: if the
//! reply channel dies before the closure ran, the slot still holds it and the
//! submission is re-enqueued on a fresh worker.

use crate::op::{BlockId, DocumentId};
use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

pub type BlockKey = (DocumentId, BlockId);

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Recover the guard from a poisoned lock; a panicked worker must not take
/// the whole registry down with it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Worker {
    generation: u64,
    tx: SyncSender<Job>,
}

#[derive(Default)]
struct Registry {
    workers: HashMap<BlockKey, Worker>,
    next_generation: u64,
}

pub struct Dispatcher {
    registry: Arc<Mutex<Registry>>,
    queue_depth: usize,
    idle: Duration,
}

impl Dispatcher {
    pub fn new(queue_depth: usize, idle: Duration) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            queue_depth: queue_depth.max(1),
            idle,
        }
    }

    /// Run `f` on the block's worker and wait for its result. Submissions for
    /// the same key are executed in arrival order, one at a time.
    pub fn execute<R, F>(&self, key: BlockKey, f: F) -> R
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let slot = Arc::new(Mutex::new(Some(f)));
        loop {
            let (generation, tx) = self.worker_for(key);
            let (reply_tx, reply_rx) = mpsc::sync_channel(1);
            let job_slot = Arc::clone(&slot);
            let job: Job = Box::new(move || {
                let f = lock(&job_slot).take();
                if let Some(f) = f {
                    let _ = reply_tx.send(f());
                }
            });

            match tx.send(job) {
                Ok(()) => {
                    if let Ok(result) = reply_rx.recv() {
                        return result;
                    }
                    // Worker retired with the job still queued; the closure
                    // is untouched in the slot, so enqueue it again.
                    self.forget(key, generation);
                }
                Err(_) => self.forget(key, generation),
            }
        }
    }

    /// Number of live block workers.
    pub fn active_workers(&self) -> usize {
        lock(&self.registry).workers.len()
    }

    fn worker_for(&self, key: BlockKey) -> (u64, SyncSender<Job>) {
        let mut registry = lock(&self.registry);
        if !registry.workers.contains_key(&key) {
            let generation = registry.next_generation;
            registry.next_generation += 1;
            let tx = spawn_worker(
                key,
                generation,
                self.queue_depth,
                self.idle,
                Arc::clone(&self.registry),
            );
            registry.workers.insert(key, Worker { generation, tx });
        }
        let worker = &registry.workers[&key];
        (worker.generation, worker.tx.clone())
    }

    /// Drop a dead worker's registration so the next lookup respawns. The
    /// generation check keeps a stale submitter from evicting a live worker.
    fn forget(&self, key: BlockKey, generation: u64) {
        let mut registry = lock(&self.registry);
        if registry
            .workers
            .get(&key)
            .is_some_and(|w| w.generation == generation)
        {
            registry.workers.remove(&key);
        }
    }
}

fn spawn_worker(
    key: BlockKey,
    generation: u64,
    queue_depth: usize,
    idle: Duration,
    registry: Arc<Mutex<Registry>>,
) -> SyncSender<Job> {
    let (tx, rx) = mpsc::sync_channel::<Job>(queue_depth);
    thread::spawn(move || {
        tracing::debug!(block = %key.1, generation, "block worker started");
        loop {
            match rx.recv_timeout(idle) {
                Ok(job) => job(),
                Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => {
                    let mut reg = lock(&registry);
                    // A submission may have raced the timeout; only retire
                    // on a confirmed-empty queue.
                    match rx.try_recv() {
                        Ok(job) => {
                            drop(reg);
                            job();
                        }
                        Err(_) => {
                            if reg
                                .workers
                                .get(&key)
                                .is_some_and(|w| w.generation == generation)
                            {
                                reg.workers.remove(&key);
                            }
                            tracing::debug!(block = %key.1, generation, "idle block worker retired");
                            return;
                        }
                    }
                }
            }
        }
    });
    tx
}
