//! Round-scoped scoring pool.
//!
//! Workers live inside a [`std::thread::scope`], so they can borrow the KB
//! and the beam for the duration of one round and are guaranteed to have
//! joined before the caller mutates anything. Jobs flow through a bounded
//! crossbeam queue; results come back tagged with their input index so the
//! output order never depends on scheduling.

use std::thread;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use crate::error::{RelcompError, RelcompResult};

/// Maximum queued jobs per worker.
const QUEUE_PER_WORKER: usize = 64;

enum Job<T> {
    Score { idx: usize, item: T },
}

/// Fixed-size pool that maps a batch of items through one function.
#[derive(Debug, Clone, Copy)]
pub struct ScoringPool {
    name: &'static str,
    workers: usize,
}

impl ScoringPool {
    /// Creates a pool; `workers` is clamped to at least 1.
    #[must_use]
    pub fn new(name: &'static str, workers: usize) -> Self {
        Self {
            name,
            workers: workers.max(1),
        }
    }

    /// Number of worker threads.
    #[must_use]
    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Applies `f` to every item, returning results in input order.
    ///
    /// With a single worker the batch runs on the calling thread.
    ///
    /// # Errors
    /// Returns an internal error if a worker cannot be spawned or dies.
    pub fn map<T, R, F>(&self, items: Vec<T>, f: F) -> RelcompResult<Vec<R>>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync,
    {
        if self.workers == 1 || items.len() <= 1 {
            return Ok(items.into_iter().map(f).collect());
        }

        let total = items.len();
        let workers = self.workers.min(total);
        let (tx, rx) = bounded::<Job<T>>(workers * QUEUE_PER_WORKER);
        let (result_tx, result_rx) = unbounded::<(usize, R)>();
        let f = &f;

        let collected = thread::scope(|scope| -> RelcompResult<Vec<(usize, R)>> {
            let mut handles = Vec::with_capacity(workers);
            for idx in 0..workers {
                let rx: Receiver<Job<T>> = rx.clone();
                let result_tx: Sender<(usize, R)> = result_tx.clone();
                let handle = thread::Builder::new()
                    .name(format!("relcomp-{}-{idx}", self.name))
                    .spawn_scoped(scope, move || {
                        while let Ok(Job::Score { idx, item }) = rx.recv() {
                            if result_tx.send((idx, f(item))).is_err() {
                                break;
                            }
                        }
                    })
                    .map_err(|e| RelcompError::internal(format!("failed to spawn scoring worker: {e}")))?;
                handles.push(handle);
            }
            drop(rx);
            drop(result_tx);

            for (idx, item) in items.into_iter().enumerate() {
                if tx.send(Job::Score { idx, item }).is_err() {
                    break;
                }
            }
            // Close the queue: workers drain it, then exit.
            drop(tx);

            let results: Vec<(usize, R)> = result_rx.iter().collect();
            for handle in handles {
                handle
                    .join()
                    .map_err(|_| RelcompError::internal("scoring worker panicked"))?;
            }
            Ok(results)
        })?;

        if collected.len() != total {
            return Err(RelcompError::internal(format!(
                "scoring pool returned {} of {total} results",
                collected.len()
            )));
        }
        let mut slots: Vec<Option<R>> = (0..total).map(|_| None).collect();
        for (idx, result) in collected {
            slots[idx] = Some(result);
        }
        slots
            .into_iter()
            .map(|r| r.ok_or_else(|| RelcompError::internal("missing scoring result")))
            .collect()
    }
}
