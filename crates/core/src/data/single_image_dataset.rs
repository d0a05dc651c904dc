// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! LQ-only images, for inference and test sets without ground truth.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::DatasetOptions;
use crate::data::imgutil::{read_image_chw, scan_roots};
use crate::data::{Dataset, Sample, WorkerRng};
use crate::error::{DataError, Result};

pub struct SingleImageDataset {
    paths: Vec<PathBuf>,
}

impl SingleImageDataset {
    pub const TYPE_NAME: &'static str = "SingleImageDataset";

    pub fn new(opts: &DatasetOptions) -> Result<Self> {
        let paths = scan_roots(&opts.require_dataroot_lq()?)?;
        Ok(Self { paths })
    }

    pub fn build(opts: &DatasetOptions) -> Result<Arc<dyn Dataset>> {
        Ok(Arc::new(Self::new(opts)?))
    }
}

impl Dataset for SingleImageDataset {
    fn len(&self) -> usize {
        self.paths.len()
    }

    fn get(&self, index: usize, _rng: &mut WorkerRng) -> Result<Sample> {
        let path = self.paths.get(index).ok_or(DataError::IndexOutOfRange {
            index,
            len: self.paths.len(),
        })?;
        Ok(Sample {
            lq: Some(read_image_chw(path)?),
            lq_path: Some(path.clone()),
            ..Sample::default()
        })
    }

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }
}
