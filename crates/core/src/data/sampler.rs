// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Index samplers.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{DataError, Result};

/// Produces the dataset indices visited in one epoch
pub trait Sampler: Send + Sync {
    fn indices(&self) -> Vec<usize>;

    /// Number of indices per epoch
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Distributed sampler over a virtually enlarged dataset.
///
/// Each of `num_replicas` processes sees `ceil(len * ratio / num_replicas)`
/// indices per epoch; the permutation depends only on the epoch so all
/// ranks agree on it. Enlarging avoids the per-epoch restart cost on small
/// datasets.
#[derive(Debug)]
pub struct EnlargedSampler {
    dataset_len: usize,
    num_replicas: usize,
    rank: usize,
    num_samples: usize,
    total_size: usize,
    epoch: AtomicU64,
}

impl EnlargedSampler {
    pub fn new(dataset_len: usize, num_replicas: usize, rank: usize, ratio: f64) -> Result<Self> {
        if num_replicas == 0 || rank >= num_replicas {
            return Err(DataError::InvalidOption {
                key: "rank".to_string(),
                reason: format!("rank {} >= num_replicas {}", rank, num_replicas),
            });
        }
        if ratio.is_nan() || ratio <= 0.0 {
            return Err(DataError::InvalidOption {
                key: "dataset_enlarge_ratio".to_string(),
                reason: format!("must be > 0, got {}", ratio),
            });
        }
        let num_samples = (dataset_len as f64 * ratio / num_replicas as f64).ceil() as usize;
        Ok(Self {
            dataset_len,
            num_replicas,
            rank,
            num_samples,
            total_size: num_samples * num_replicas,
            epoch: AtomicU64::new(0),
        })
    }

    /// Reshuffle for a new epoch; callable through a shared handle
    pub fn set_epoch(&self, epoch: u64) {
        self.epoch.store(epoch, Ordering::Relaxed);
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Relaxed)
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }
}

impl Sampler for EnlargedSampler {
    fn indices(&self) -> Vec<usize> {
        if self.dataset_len == 0 {
            return Vec::new();
        }
        let mut rng = ChaCha8Rng::seed_from_u64(self.epoch());
        let mut perm: Vec<usize> = (0..self.total_size).collect();
        perm.shuffle(&mut rng);
        perm.into_iter()
            .skip(self.rank)
            .step_by(self.num_replicas)
            .map(|v| v % self.dataset_len)
            .collect()
    }

    fn len(&self) -> usize {
        self.num_samples
    }
}

pub fn sequential_indices(len: usize) -> Vec<usize> {
    (0..len).collect()
}

pub fn random_indices(len: usize, rng: &mut ChaCha8Rng) -> Vec<usize> {
    let mut indices = sequential_indices(len);
    indices.shuffle(rng);
    indices
}
