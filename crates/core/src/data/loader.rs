// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Batching dataloader and the phase-aware factory that configures it.
//!
//! Workers are OS threads, each owning an RNG seeded once at startup.
//! Batches are dispatched round-robin and handed back in order.

use parking_lot::Mutex;
use rand::SeedableRng;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::DatasetOptions;
use crate::data::prefetch::{PrefetchDataLoader, PrefetchIter};
use crate::data::sampler::{random_indices, sequential_indices, Sampler};
use crate::data::{Batch, Dataset, WorkerRng};
use crate::dist::RuntimeEnv;
use crate::error::{DataError, Result};

/// Batches in flight per worker
pub const DEFAULT_PREFETCH_FACTOR: usize = 2;

/// Training-loop stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Train,
    Val,
    Test,
}

impl Phase {
    pub fn parse(phase: &str) -> Result<Self> {
        match phase {
            "train" => Ok(Phase::Train),
            "val" => Ok(Phase::Val),
            "test" => Ok(Phase::Test),
            other => Err(DataError::InvalidPhase(other.to_string())),
        }
    }
}

/// Seed for one loading worker: `num_workers * rank + worker_id + seed`
pub fn worker_seed(worker_id: usize, num_workers: usize, rank: usize, seed: u64) -> u64 {
    (num_workers as u64)
        .wrapping_mul(rank as u64)
        .wrapping_add(worker_id as u64)
        .wrapping_add(seed)
}

/// Per-worker seeding, bound to this loader's worker count and rank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerInit {
    pub num_workers: usize,
    pub rank: usize,
    pub seed: u64,
}

impl WorkerInit {
    pub fn seed_for(&self, worker_id: usize) -> u64 {
        worker_seed(worker_id, self.num_workers, self.rank, self.seed)
    }

    pub fn rng_for(&self, worker_id: usize) -> WorkerRng {
        WorkerRng::seed_from_u64(self.seed_for(worker_id))
    }
}

/// Resolved dataloader parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLoaderArgs {
    pub phase: Phase,
    pub batch_size: usize,
    pub num_workers: usize,
    pub shuffle: bool,
    pub drop_last: bool,
    pub worker_init: Option<WorkerInit>,
    pub pin_memory: bool,
    pub persistent_workers: bool,
    pub prefetch_factor: usize,
}

impl DataLoaderArgs {
    /// Batch size, worker count and ordering for one dataset.
    ///
    /// Train: per-accelerator values as-is when distributed, else multiplied
    /// by `max(num_gpu, 1)`; shuffled unless a sampler is supplied; incomplete
    /// last batch dropped. Val/test: one image at a time on the calling thread.
    pub fn resolve(opts: &DatasetOptions, env: &RuntimeEnv, has_sampler: bool) -> Result<Self> {
        let phase = Phase::parse(opts.phase()?)?;
        let mut args = match phase {
            Phase::Train => {
                let (batch_size, num_workers) = if env.dist {
                    (opts.require_batch_size()?, opts.require_num_workers()?)
                } else {
                    let multiplier = env.num_gpu.max(1);
                    (
                        opts.require_batch_size()? * multiplier,
                        opts.require_num_workers()? * multiplier,
                    )
                };
                if batch_size == 0 {
                    return Err(DataError::InvalidOption {
                        key: "batch_size_per_gpu".to_string(),
                        reason: "must be > 0".to_string(),
                    });
                }
                Self {
                    phase,
                    batch_size,
                    num_workers,
                    shuffle: !has_sampler,
                    drop_last: true,
                    worker_init: env.seed.map(|seed| WorkerInit {
                        num_workers,
                        rank: env.rank,
                        seed,
                    }),
                    pin_memory: false,
                    persistent_workers: false,
                    prefetch_factor: DEFAULT_PREFETCH_FACTOR,
                }
            }
            Phase::Val | Phase::Test => Self {
                phase,
                batch_size: 1,
                num_workers: 0,
                shuffle: false,
                drop_last: false,
                worker_init: None,
                pin_memory: false,
                persistent_workers: false,
                prefetch_factor: DEFAULT_PREFETCH_FACTOR,
            },
        };
        args.pin_memory = opts.pin_memory;
        args.persistent_workers = opts.persistent_workers;
        Ok(args)
    }

    /// Number of batches for `num_indices` sampled indices
    pub fn num_batches(&self, num_indices: usize) -> usize {
        if self.drop_last {
            num_indices / self.batch_size
        } else {
            num_indices.div_ceil(self.batch_size)
        }
    }
}

struct LoaderInner {
    dataset: Arc<dyn Dataset>,
    args: DataLoaderArgs,
    sampler: Option<Arc<dyn Sampler>>,
    /// Shuffling, and sample loading when there are no workers
    base_rng: Mutex<WorkerRng>,
    /// Persistent workers parked between epochs
    pool: Mutex<Option<WorkerPool>>,
    generation: AtomicU64,
}

/// Iterates a dataset in batches. Cloning shares the same workers and RNG.
#[derive(Clone)]
pub struct DataLoader {
    inner: Arc<LoaderInner>,
}

impl std::fmt::Debug for DataLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataLoader")
            .field("dataset", &self.inner.dataset.type_name())
            .field("len", &self.len())
            .field("args", &self.inner.args)
            .finish()
    }
}

impl DataLoader {
    pub fn new(
        dataset: Arc<dyn Dataset>,
        args: DataLoaderArgs,
        sampler: Option<Arc<dyn Sampler>>,
        base_rng: WorkerRng,
    ) -> Self {
        if args.num_workers > num_cpus::get() {
            warn!(
                "num_workers={} exceeds the {} available CPUs",
                args.num_workers,
                num_cpus::get()
            );
        }
        Self {
            inner: Arc::new(LoaderInner {
                dataset,
                args,
                sampler,
                base_rng: Mutex::new(base_rng),
                pool: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn args(&self) -> &DataLoaderArgs {
        &self.inner.args
    }

    pub fn dataset(&self) -> &Arc<dyn Dataset> {
        &self.inner.dataset
    }

    /// Batches per epoch
    pub fn len(&self) -> usize {
        let num_indices = match &self.inner.sampler {
            Some(s) => s.len(),
            None => self.inner.dataset.len(),
        };
        self.inner.args.num_batches(num_indices)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start one epoch
    pub fn iter(&self) -> Result<DataLoaderIter> {
        let inner = &self.inner;
        let args = &inner.args;
        let generation = inner.generation.fetch_add(1, Ordering::Relaxed);

        let indices = match &inner.sampler {
            Some(sampler) => sampler.indices(),
            None if args.shuffle => random_indices(inner.dataset.len(), &mut inner.base_rng.lock()),
            None => sequential_indices(inner.dataset.len()),
        };
        let mut batches: Vec<Vec<usize>> = indices.chunks(args.batch_size).map(<[usize]>::to_vec).collect();
        if args.drop_last && batches.last().is_some_and(|b| b.len() < args.batch_size) {
            batches.pop();
        }

        let pool = if args.num_workers == 0 {
            None
        } else {
            let parked = if args.persistent_workers {
                inner.pool.lock().take()
            } else {
                None
            };
            match parked {
                Some(pool) => Some(pool),
                None => Some(WorkerPool::spawn(
                    inner.dataset.clone(),
                    args.num_workers,
                    args.worker_init,
                )?),
            }
        };

        debug!(
            "Epoch iterator {}: {} batches, {} workers",
            generation,
            batches.len(),
            args.num_workers
        );
        let mut iter = DataLoaderIter {
            inner: inner.clone(),
            generation,
            batches,
            next_dispatch: 0,
            next_yield: 0,
            pool,
            reorder: HashMap::new(),
        };
        iter.dispatch()?;
        Ok(iter)
    }
}

/// One epoch of batches, in sampler order
pub struct DataLoaderIter {
    inner: Arc<LoaderInner>,
    generation: u64,
    batches: Vec<Vec<usize>>,
    next_dispatch: usize,
    next_yield: usize,
    pool: Option<WorkerPool>,
    reorder: HashMap<usize, Result<Batch>>,
}

impl DataLoaderIter {
    fn dispatch(&mut self) -> Result<()> {
        let Some(pool) = &self.pool else {
            return Ok(());
        };
        let max_in_flight = self.inner.args.prefetch_factor.max(1) * pool.num_workers();
        while self.next_dispatch < self.batches.len() && self.next_dispatch - self.next_yield < max_in_flight {
            let seq = self.next_dispatch;
            pool.send(Job {
                generation: self.generation,
                seq,
                indices: self.batches[seq].clone(),
            })?;
            self.next_dispatch += 1;
        }
        Ok(())
    }

    fn finish_with(&mut self, err: DataError) -> Option<Result<Batch>> {
        self.next_yield = self.batches.len();
        Some(Err(err))
    }

    /// Batches left in this epoch
    pub fn remaining(&self) -> usize {
        self.batches.len() - self.next_yield
    }
}

impl Iterator for DataLoaderIter {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_yield >= self.batches.len() {
            return None;
        }

        if self.pool.is_none() {
            let seq = self.next_yield;
            self.next_yield += 1;
            let batch = {
                let mut rng = self.inner.base_rng.lock();
                fetch_catching(self.inner.dataset.as_ref(), &self.batches[seq], &mut rng, |message| {
                    DataError::LoadPanicked { message }
                })
            };
            return match batch {
                Err(e @ DataError::LoadPanicked { .. }) => self.finish_with(e),
                other => Some(other),
            };
        }

        loop {
            if let Some(batch) = self.reorder.remove(&self.next_yield) {
                self.next_yield += 1;
                return match batch {
                    Err(e @ DataError::WorkerPanicked { .. }) => self.finish_with(e),
                    batch => match self.dispatch() {
                        Ok(()) => Some(batch),
                        Err(e) => self.finish_with(e),
                    },
                };
            }
            let received = match &self.pool {
                Some(pool) => pool.results.recv(),
                None => return None,
            };
            match received {
                Ok(fetched) if fetched.generation == self.generation => {
                    self.reorder.insert(fetched.seq, fetched.batch);
                }
                // left over from an abandoned epoch on persistent workers
                Ok(_) => continue,
                Err(_) => return self.finish_with(DataError::WorkerDisconnected),
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining(), Some(self.remaining()))
    }
}

impl Drop for DataLoaderIter {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            if self.inner.args.persistent_workers {
                let mut slot = self.inner.pool.lock();
                if slot.is_none() {
                    *slot = Some(pool);
                }
            }
        }
    }
}

fn fetch(dataset: &dyn Dataset, indices: &[usize], rng: &mut WorkerRng) -> Result<Batch> {
    let samples = indices
        .iter()
        .map(|&i| dataset.get(i, rng).map(|s| (i, s)))
        .collect::<Result<Vec<_>>>()?;
    Batch::collate(samples)
}

/// `fetch`, with a panic inside the dataset turned into an error
fn fetch_catching(
    dataset: &dyn Dataset,
    indices: &[usize],
    rng: &mut WorkerRng,
    on_panic: impl FnOnce(String) -> DataError,
) -> Result<Batch> {
    catch_unwind(AssertUnwindSafe(|| fetch(dataset, indices, rng)))
        .unwrap_or_else(|payload| Err(on_panic(panic_message(payload.as_ref()))))
}

struct Job {
    generation: u64,
    seq: usize,
    indices: Vec<usize>,
}

struct Fetched {
    generation: u64,
    seq: usize,
    batch: Result<Batch>,
}

struct WorkerPool {
    senders: Vec<mpsc::Sender<Job>>,
    results: mpsc::Receiver<Fetched>,
    handles: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    fn spawn(dataset: Arc<dyn Dataset>, num_workers: usize, worker_init: Option<WorkerInit>) -> Result<Self> {
        let (result_tx, results) = mpsc::channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut pool = Self {
            senders: Vec::with_capacity(num_workers),
            results,
            handles: Vec::with_capacity(num_workers),
            shutdown: shutdown.clone(),
        };

        for worker_id in 0..num_workers {
            let (job_tx, job_rx) = mpsc::channel();
            let rng = match worker_init {
                Some(init) => init.rng_for(worker_id),
                None => WorkerRng::from_rng(&mut rand::rng()),
            };
            let dataset = dataset.clone();
            let result_tx = result_tx.clone();
            let shutdown = shutdown.clone();
            let handle = std::thread::Builder::new()
                .name(format!("dataloader-{}", worker_id))
                .spawn(move || worker_loop(worker_id, dataset, job_rx, result_tx, rng, shutdown))
                .map_err(DataError::Spawn)?;
            pool.senders.push(job_tx);
            pool.handles.push(handle);
        }
        info!("Started {} dataloader workers", num_workers);
        Ok(pool)
    }

    fn num_workers(&self) -> usize {
        self.senders.len()
    }

    fn send(&self, job: Job) -> Result<()> {
        let worker = job.seq % self.senders.len();
        self.senders[worker].send(job).map_err(|_| DataError::WorkerDisconnected)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.senders.clear();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        debug!("Dataloader workers stopped");
    }
}

fn worker_loop(
    worker_id: usize,
    dataset: Arc<dyn Dataset>,
    jobs: mpsc::Receiver<Job>,
    results: mpsc::Sender<Fetched>,
    mut rng: WorkerRng,
    shutdown: Arc<AtomicBool>,
) {
    while let Ok(job) = jobs.recv() {
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        let batch = fetch_catching(dataset.as_ref(), &job.indices, &mut rng, |message| {
            DataError::WorkerPanicked { worker_id, message }
        });
        let fetched = Fetched {
            generation: job.generation,
            seq: job.seq,
            batch,
        };
        if results.send(fetched).is_err() {
            break;
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// What [`build_dataloader`] hands back, depending on `prefetch_mode`
#[derive(Debug, Clone)]
pub enum Loader {
    Plain(DataLoader),
    Prefetch(PrefetchDataLoader),
}

impl Loader {
    pub fn iter(&self) -> Result<LoaderIter> {
        match self {
            Loader::Plain(l) => l.iter().map(LoaderIter::Plain),
            Loader::Prefetch(l) => l.iter().map(LoaderIter::Prefetch),
        }
    }

    pub fn len(&self) -> usize {
        self.inner().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn args(&self) -> &DataLoaderArgs {
        self.inner().args()
    }

    pub fn dataset(&self) -> &Arc<dyn Dataset> {
        self.inner().dataset()
    }

    pub fn inner(&self) -> &DataLoader {
        match self {
            Loader::Plain(l) => l,
            Loader::Prefetch(l) => l.loader(),
        }
    }
}

pub enum LoaderIter {
    Plain(DataLoaderIter),
    Prefetch(PrefetchIter),
}

impl Iterator for LoaderIter {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            LoaderIter::Plain(it) => it.next(),
            LoaderIter::Prefetch(it) => it.next(),
        }
    }
}

/// Build the dataloader for `dataset` according to its options.
///
/// `prefetch_mode: cpu` wraps the loader in a background prefetch queue;
/// any other mode (unset, `cuda`) returns the plain loader.
pub fn build_dataloader(
    dataset: Arc<dyn Dataset>,
    opts: &DatasetOptions,
    env: &RuntimeEnv,
    sampler: Option<Arc<dyn Sampler>>,
) -> Result<Loader> {
    let args = DataLoaderArgs::resolve(opts, env, sampler.is_some())?;
    debug!("Dataloader args for {}: {:?}", opts.name, args);
    let loader = DataLoader::new(dataset, args, sampler, env.process_rng());

    match opts.prefetch_mode.as_deref() {
        Some("cpu") => {
            let num_prefetch_queue = opts.num_prefetch_queue;
            info!(
                "Use cpu prefetch dataloader: num_prefetch_queue = {}",
                num_prefetch_queue
            );
            Ok(Loader::Prefetch(PrefetchDataLoader::new(loader, num_prefetch_queue)))
        }
        _ => Ok(Loader::Plain(loader)),
    }
}
