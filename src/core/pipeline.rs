//! Concurrent image hashing.
//!
//! Lanes:
//! - one dispatcher feeding paths into a bounded work queue, then closing it
//! - N workers loading, hashing and registering each path
//! - one error collector draining load failures for the whole run
//! - the calling thread, draining finished items
//! - one join thread that waits for the workers and then closes the item and
//!   error channels
//!
//! The error collector runs on its own thread so a worker blocked on sending an
//! error can never wait on the consumer that is blocked reading items.

use crossbeam_channel::{bounded, unbounded};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use crate::core::hash::{HashKind, Hasher};
use crate::core::image::ImageLoader;
use crate::core::registry::FingerprintRegistry;
use crate::core::vptree::Item;
use crate::error::LoadErrors;

/// Snapshot handed to the progress callback after each path.
#[derive(Debug, Clone)]
pub struct HashProgress {
    pub completed: usize,
    pub total: usize,
    pub current_file: PathBuf,
    pub failed: bool,
}

pub type ProgressCallback = Box<dyn Fn(HashProgress) + Send + Sync>;

/// Everything one pipeline run produced.
#[derive(Debug)]
pub struct HashOutput {
    pub items: Vec<Item>,
    pub registry: FingerprintRegistry,
    pub errors: Option<LoadErrors>,
    /// The cancellation token fired before every path was processed.
    pub cancelled: bool,
}

/// Default worker count: leave two cores for the dispatcher and collector.
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .saturating_sub(2)
        .max(1)
}

pub struct HashPipeline<'a, L, H> {
    loader: &'a L,
    hasher: &'a H,
    workers: usize,
    cancellation_token: Arc<AtomicBool>,
    progress: Option<&'a ProgressCallback>,
}

impl<'a, L, H> HashPipeline<'a, L, H>
where
    L: ImageLoader,
    H: Hasher<L::Image>,
{
    pub fn new(loader: &'a L, hasher: &'a H) -> Self {
        Self {
            loader,
            hasher,
            workers: default_workers(),
            cancellation_token: Arc::new(AtomicBool::new(false)),
            progress: None,
        }
    }

    /// Zero picks the default.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = if workers == 0 {
            default_workers()
        } else {
            workers
        };
        self
    }

    pub fn with_cancellation_token(mut self, token: Arc<AtomicBool>) -> Self {
        self.cancellation_token = token;
        self
    }

    pub fn with_progress(mut self, callback: Option<&'a ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn loader(&self) -> &'a L {
        self.loader
    }

    pub fn hasher(&self) -> &'a H {
        self.hasher
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation_token.load(Ordering::Relaxed)
    }

    /// Hash every path. Paths that fail to load are skipped and reported in
    /// `errors`; all others yield exactly one item.
    pub fn run(&self, paths: &[PathBuf], kind: HashKind) -> HashOutput {
        let registry = FingerprintRegistry::new();
        let total = paths.len();
        let completed = AtomicUsize::new(0);

        let (work_tx, work_rx) = bounded::<&PathBuf>(self.workers * 2);
        let (item_tx, item_rx) = unbounded::<Item>();
        let (error_tx, error_rx) = unbounded();

        log::debug!(
            "hashing {} path(s) with {} worker(s) using {}",
            total,
            self.workers,
            kind
        );

        let (items, errors) = thread::scope(|s| {
            s.spawn(move || {
                for path in paths {
                    if self.is_cancelled() {
                        log::debug!("dispatcher stopping early: cancelled");
                        break;
                    }
                    if work_tx.send(path).is_err() {
                        break;
                    }
                }
                // work_tx drops here and closes the queue.
            });

            let workers: Vec<_> = (0..self.workers)
                .map(|_| {
                    let work_rx = work_rx.clone();
                    let item_tx = item_tx.clone();
                    let error_tx = error_tx.clone();
                    let registry = &registry;
                    let completed = &completed;
                    s.spawn(move || {
                        let mut hashed = 0usize;
                        for path in work_rx.iter() {
                            // Keep draining so the dispatcher is never stuck.
                            if self.is_cancelled() {
                                continue;
                            }

                            let failed = match self.loader.load(path) {
                                Ok(image) => {
                                    let fingerprint = self.hasher.compute(&image, kind);
                                    let id = registry.insert(path.clone());
                                    if item_tx.send(Item::new(id, fingerprint)).is_err() {
                                        break;
                                    }
                                    hashed += 1;
                                    false
                                }
                                Err(e) => {
                                    log::warn!("{}", e);
                                    let _ = error_tx.send(e);
                                    true
                                }
                            };

                            let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                            if let Some(callback) = self.progress {
                                callback(HashProgress {
                                    completed: done,
                                    total,
                                    current_file: path.clone(),
                                    failed,
                                });
                            }
                        }
                        hashed
                    })
                })
                .collect();
            drop(work_rx);

            let collector = s.spawn(move || error_rx.iter().collect::<LoadErrors>());

            s.spawn(move || {
                let mut hashed = 0;
                for worker in workers {
                    match worker.join() {
                        Ok(count) => hashed += count,
                        Err(_) => log::error!("hash worker panicked"),
                    }
                }
                log::debug!("all workers finished, {} item(s) hashed", hashed);
                // Last senders: dropping them ends both the consumer loop and
                // the collector.
                drop(item_tx);
                drop(error_tx);
            });

            let items: Vec<Item> = item_rx.iter().collect();
            let errors = collector.join().unwrap_or_else(|_| {
                log::error!("error collector panicked");
                LoadErrors::new()
            });
            (items, errors)
        });

        let cancelled = self.is_cancelled() && items.len() + errors.len() < total;
        log::info!(
            "hashed {} of {} file(s), {} failed{}",
            items.len(),
            total,
            errors.len(),
            if cancelled { " (cancelled)" } else { "" }
        );

        HashOutput {
            items,
            registry,
            errors: errors.into_option(),
            cancelled,
        }
    }
}
