// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Error types for the data pipeline.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataError {
    // ========== Options ==========
    #[error("Wrong dataset phase: {0}. Supported ones are 'train', 'val' and 'test'.")]
    InvalidPhase(String),

    #[error("Wrong prefetch_mode {0}. Supported ones are: None, 'cuda', 'cpu'.")]
    InvalidPrefetchMode(String),

    #[error("Please set pin_memory=True for CUDAPrefetcher.")]
    PinMemoryRequired,

    #[error("Missing option '{key}' in dataset {dataset}")]
    MissingOption { dataset: String, key: String },

    #[error("Invalid option '{key}': {reason}")]
    InvalidOption { key: String, reason: String },

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse options: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to read environment variable {var}={value:?}")]
    InvalidEnv { var: String, value: String },

    // ========== Registry ==========
    #[error("No object named '{name}' found in 'dataset' registry! Registered: {available:?}")]
    UnknownDatasetType { name: String, available: Vec<String> },

    #[error("An object named '{0}' was already registered in 'dataset' registry!")]
    DuplicateRegistration(String),

    // ========== Data ==========
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("{path} has no LQ counterpart {expected} in {lq_root}")]
    MissingPair {
        path: PathBuf,
        expected: String,
        lq_root: PathBuf,
    },

    #[error("Scale mismatches. GT ({gt_h}, {gt_w}) is not {scale}x multiplication of LQ ({lq_h}, {lq_w}).")]
    ScaleMismatch {
        scale: usize,
        gt_h: usize,
        gt_w: usize,
        lq_h: usize,
        lq_w: usize,
    },

    #[error("LQ ({h}, {w}) is smaller than patch size ({patch}, {patch}). Please remove {path}.")]
    PatchTooLarge {
        h: usize,
        w: usize,
        patch: usize,
        path: PathBuf,
    },

    #[error("Index {index} out of range for dataset of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Cannot collate samples: {0}")]
    Collate(String),

    // ========== Workers ==========
    #[error("Dataloader worker {worker_id} panicked: {message}")]
    WorkerPanicked { worker_id: usize, message: String },

    #[error("Sample loading panicked: {message}")]
    LoadPanicked { message: String },

    #[error("Dataloader worker pool disconnected")]
    WorkerDisconnected,

    #[error("Failed to spawn dataloader worker: {0}")]
    Spawn(#[source] std::io::Error),
}

impl DataError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DataError::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true for failures caused by the options rather than the data
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            DataError::InvalidPhase(_)
                | DataError::InvalidPrefetchMode(_)
                | DataError::PinMemoryRequired
                | DataError::MissingOption { .. }
                | DataError::InvalidOption { .. }
                | DataError::Yaml(_)
                | DataError::Json(_)
                | DataError::UnknownDatasetType { .. }
        )
    }
}

/// Result type alias for data pipeline operations
pub type Result<T> = std::result::Result<T, DataError>;
