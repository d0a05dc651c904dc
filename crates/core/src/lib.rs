// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Core library for trainner: dataset registry, dataloaders and option
//! templates for super-resolution training.

pub mod config;
pub mod data;
pub mod dist;
pub mod error;
pub mod pipeline;
pub mod templates;

pub use config::{DatasetOptions, TrainOptions};
pub use data::{build_dataloader, build_dataset, Batch, DataLoader, Dataset, Loader, Sample};
pub use dist::{DistInfo, RuntimeEnv};
pub use error::{DataError, Result};
pub use pipeline::{create_train_val_dataloader, TrainValLoaders};
pub use templates::OptionsGenerator;
