// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Prefetching on top of [`DataLoader`].
//!
//! `PrefetchDataLoader` is the loader-side queue selected by
//! `prefetch_mode: cpu`. The [`Prefetcher`]s are what the training loop
//! pulls batches from.

use std::sync::mpsc;
use std::thread::JoinHandle;
use tracing::{debug, info};

use crate::config::DatasetOptions;
use crate::data::loader::{DataLoader, Loader, LoaderIter};
use crate::data::Batch;
use crate::error::{DataError, Result};

/// Drains the loader on a background thread into a bounded queue.
#[derive(Debug, Clone)]
pub struct PrefetchDataLoader {
    loader: DataLoader,
    num_prefetch_queue: usize,
}

impl PrefetchDataLoader {
    pub fn new(loader: DataLoader, num_prefetch_queue: usize) -> Self {
        Self {
            loader,
            num_prefetch_queue: num_prefetch_queue.max(1),
        }
    }

    pub fn loader(&self) -> &DataLoader {
        &self.loader
    }

    pub fn num_prefetch_queue(&self) -> usize {
        self.num_prefetch_queue
    }

    pub fn iter(&self) -> Result<PrefetchIter> {
        let inner = self.loader.iter()?;
        let (tx, rx) = mpsc::sync_channel(self.num_prefetch_queue);
        let handle = std::thread::Builder::new()
            .name("prefetch-queue".to_string())
            .spawn(move || {
                for item in inner {
                    if tx.send(item).is_err() {
                        debug!("Prefetch queue: consumer dropped, stopping");
                        return;
                    }
                }
            })
            .map_err(DataError::Spawn)?;
        Ok(PrefetchIter {
            rx: Some(rx),
            handle: Some(handle),
        })
    }
}

pub struct PrefetchIter {
    rx: Option<mpsc::Receiver<Result<Batch>>>,
    handle: Option<JoinHandle<()>>,
}

impl Iterator for PrefetchIter {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.as_ref()?.recv().ok()
    }
}

impl Drop for PrefetchIter {
    fn drop(&mut self) {
        // Closing the queue unblocks the producer
        self.rx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Batch source for the training loop
pub trait Prefetcher: Send {
    /// Next batch of the epoch, `None` once exhausted
    fn next_batch(&mut self) -> Option<Result<Batch>>;

    /// Start a new epoch
    fn reset(&mut self) -> Result<()>;
}

/// Hands out batches in loader order.
pub struct CpuPrefetcher {
    loader: Loader,
    iter: LoaderIter,
}

impl CpuPrefetcher {
    pub fn new(loader: Loader) -> Result<Self> {
        let iter = loader.iter()?;
        Ok(Self { loader, iter })
    }
}

impl Prefetcher for CpuPrefetcher {
    fn next_batch(&mut self) -> Option<Result<Batch>> {
        self.iter.next()
    }

    fn reset(&mut self) -> Result<()> {
        self.iter = self.loader.iter()?;
        Ok(())
    }
}

/// Keeps the following batch staged while the current one is consumed,
/// for overlap with device transfer. Requires pinned host memory.
pub struct DevicePrefetcher {
    loader: Loader,
    iter: LoaderIter,
    staged: Option<Result<Batch>>,
}

impl DevicePrefetcher {
    pub fn new(loader: Loader) -> Result<Self> {
        if !loader.args().pin_memory {
            return Err(DataError::PinMemoryRequired);
        }
        let iter = loader.iter()?;
        let mut prefetcher = Self {
            loader,
            iter,
            staged: None,
        };
        prefetcher.preload();
        Ok(prefetcher)
    }

    fn preload(&mut self) {
        self.staged = self.iter.next();
    }

    /// Whether a batch is waiting
    pub fn has_staged(&self) -> bool {
        self.staged.is_some()
    }
}

impl Prefetcher for DevicePrefetcher {
    fn next_batch(&mut self) -> Option<Result<Batch>> {
        let batch = self.staged.take()?;
        self.preload();
        Some(batch)
    }

    fn reset(&mut self) -> Result<()> {
        self.staged = None;
        self.iter = self.loader.iter()?;
        self.preload();
        Ok(())
    }
}

/// Pick the training-loop prefetcher named by `prefetch_mode`.
pub fn create_prefetcher(loader: Loader, opts: &DatasetOptions) -> Result<Box<dyn Prefetcher>> {
    match opts.prefetch_mode.as_deref() {
        None | Some("cpu") => Ok(Box::new(CpuPrefetcher::new(loader)?)),
        Some("cuda") => {
            info!("Use cuda prefetch dataloader");
            Ok(Box::new(DevicePrefetcher::new(loader)?))
        }
        Some(other) => Err(DataError::InvalidPrefetchMode(other.to_string())),
    }
}
