// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Datasets, samplers and dataloaders.

use ndarray::{Array3, Array4, Axis};
use rand_chacha::ChaCha8Rng;
use std::path::PathBuf;

use crate::error::{DataError, Result};

pub mod imgutil;
pub mod loader;
pub mod paired_image_dataset;
pub mod prefetch;
pub mod realesrgan_dataset;
pub mod registry;
pub mod sampler;
pub mod single_image_dataset;
pub mod transforms;

pub use loader::{build_dataloader, worker_seed, DataLoader, DataLoaderArgs, Loader, LoaderIter};
pub use prefetch::{create_prefetcher, CpuPrefetcher, DevicePrefetcher, PrefetchDataLoader, Prefetcher};
pub use registry::{build_dataset, DatasetCtor, DatasetRegistry};
pub use sampler::{EnlargedSampler, Sampler};

/// RNG owned by whichever worker is loading samples
pub type WorkerRng = ChaCha8Rng;

/// A map-style dataset: random access by index.
pub trait Dataset: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load one sample. Random augmentation draws from `rng`, which is
    /// seeded per worker so results are reproducible for a fixed seed.
    fn get(&self, index: usize, rng: &mut WorkerRng) -> Result<Sample>;

    /// Registered type name
    fn type_name(&self) -> &'static str;
}

/// One training example; images are CHW in `[0, 1]`.
#[derive(Debug, Clone, Default)]
pub struct Sample {
    pub lq: Option<Array3<f32>>,
    pub gt: Option<Array3<f32>>,
    pub lq_path: Option<PathBuf>,
    pub gt_path: Option<PathBuf>,
}

/// Samples stacked into NCHW tensors.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub lq: Option<Array4<f32>>,
    pub gt: Option<Array4<f32>>,
    pub lq_paths: Vec<PathBuf>,
    pub gt_paths: Vec<PathBuf>,
    /// Dataset indices the batch was built from
    pub indices: Vec<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Stack samples; every sample must carry the same images with the same shape.
    pub fn collate(samples: Vec<(usize, Sample)>) -> Result<Self> {
        let mut batch = Batch {
            indices: samples.iter().map(|(i, _)| *i).collect(),
            ..Batch::default()
        };
        let (lq, gt): (Vec<_>, Vec<_>) = samples
            .into_iter()
            .map(|(_, s)| {
                batch.lq_paths.extend(s.lq_path);
                batch.gt_paths.extend(s.gt_path);
                (s.lq, s.gt)
            })
            .unzip();
        batch.lq = stack("lq", lq)?;
        batch.gt = stack("gt", gt)?;
        Ok(batch)
    }
}

fn stack(key: &str, images: Vec<Option<Array3<f32>>>) -> Result<Option<Array4<f32>>> {
    let present = images.iter().filter(|i| i.is_some()).count();
    if present == 0 {
        return Ok(None);
    }
    if present != images.len() {
        return Err(DataError::Collate(format!(
            "'{}' present in {} of {} samples",
            key,
            present,
            images.len()
        )));
    }
    let views: Vec<_> = images.iter().flatten().map(|a| a.view()).collect();
    ndarray::stack(Axis(0), &views)
        .map(Some)
        .map_err(|e| DataError::Collate(format!("'{}': {}", key, e)))
}
