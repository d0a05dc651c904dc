// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/core/src/pipeline.rs
//
// Train/val dataloader assembly for a full options file
//
use std::sync::Arc;
use tracing::info;

use crate::config::TrainOptions;
use crate::data::{build_dataloader, build_dataset, EnlargedSampler, Loader, Sampler};
use crate::dist::RuntimeEnv;
use crate::error::{DataError, Result};

/// Everything the training loop needs on the data side
pub struct TrainValLoaders {
    pub train_loader: Loader,
    /// Shared with the train loader; call `set_epoch` at every epoch start
    pub train_sampler: Arc<EnlargedSampler>,
    /// (dataset name, loader) for every val/test entry
    pub val_loaders: Vec<(String, Loader)>,
    pub num_iter_per_epoch: u64,
    pub total_iters: u64,
    pub total_epochs: u64,
}

pub fn create_train_val_dataloader(opts: &TrainOptions, env: &RuntimeEnv) -> Result<TrainValLoaders> {
    let total_iters = opts.total_iter().ok_or_else(|| DataError::MissingOption {
        dataset: opts.name.clone(),
        key: "train.total_iter".to_string(),
    })?;

    let mut train = None;
    let mut val_loaders = Vec::new();

    for dataset_opts in opts.dataset_options() {
        match dataset_opts.phase()? {
            "train" => {
                if train.is_some() {
                    return Err(DataError::InvalidOption {
                        key: "datasets".to_string(),
                        reason: "more than one train dataset".to_string(),
                    });
                }
                let ratio = dataset_opts.dataset_enlarge_ratio;
                let train_set = build_dataset(&dataset_opts)?;
                let sampler = Arc::new(EnlargedSampler::new(
                    train_set.len(),
                    env.world_size,
                    env.rank,
                    ratio,
                )?);
                let loader = build_dataloader(
                    train_set.clone(),
                    &dataset_opts,
                    env,
                    Some(sampler.clone() as Arc<dyn Sampler>),
                )?;

                let per_iter = dataset_opts.require_batch_size()? * env.world_size;
                let num_iter_per_epoch = (train_set.len() as f64 * ratio / per_iter as f64).ceil() as u64;
                if num_iter_per_epoch == 0 {
                    return Err(DataError::InvalidOption {
                        key: format!("datasets.{}", dataset_opts.name),
                        reason: "train dataset is empty".to_string(),
                    });
                }
                let total_epochs = total_iters.div_ceil(num_iter_per_epoch);
                info!(
                    "Training statistics:\n\tNumber of train images: {}\n\tDataset enlarge ratio: {}\n\tBatch size per gpu: {}\n\tWorld size (gpu number): {}\n\tRequire iter number per epoch: {}\n\tTotal epochs: {}; iters: {}.",
                    train_set.len(),
                    ratio,
                    dataset_opts.require_batch_size()?,
                    env.world_size,
                    num_iter_per_epoch,
                    total_epochs,
                    total_iters
                );
                train = Some((loader, sampler, num_iter_per_epoch, total_epochs));
            }
            "val" | "test" => {
                let val_set = build_dataset(&dataset_opts)?;
                let loader = build_dataloader(val_set.clone(), &dataset_opts, env, None)?;
                info!(
                    "Number of val images/folders in {}: {}",
                    dataset_opts.name,
                    val_set.len()
                );
                val_loaders.push((dataset_opts.name.clone(), loader));
            }
            other => return Err(DataError::InvalidPhase(other.to_string())),
        }
    }

    let (train_loader, train_sampler, num_iter_per_epoch, total_epochs) =
        train.ok_or_else(|| DataError::MissingOption {
            dataset: opts.name.clone(),
            key: "datasets.train".to_string(),
        })?;

    Ok(TrainValLoaders {
        train_loader,
        train_sampler,
        val_loaders,
        num_iter_per_epoch,
        total_iters,
        total_epochs,
    })
}
