// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! GT-only images for on-the-fly (OTF) degradation training.
//!
//! The LQ side is synthesised by the model from each GT patch, so this
//! dataset only crops and augments ground truth.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::DatasetOptions;
use crate::data::imgutil::{read_image_chw, scan_roots};
use crate::data::transforms::{random_crop, Augmentation};
use crate::data::{Dataset, Sample, WorkerRng};
use crate::error::{DataError, Result};

pub struct RealESRGANDataset {
    paths: Vec<PathBuf>,
    gt_patch: Option<usize>,
    use_hflip: bool,
    use_rot: bool,
}

impl RealESRGANDataset {
    pub const TYPE_NAME: &'static str = "RealESRGANDataset";

    pub fn new(opts: &DatasetOptions) -> Result<Self> {
        let paths = scan_roots(&opts.require_dataroot_gt()?)?;
        let gt_patch = match opts.phase.as_deref() {
            Some("train") => Some(opts.patch_size().ok_or_else(|| DataError::MissingOption {
                dataset: opts.name.clone(),
                key: "gt_size".to_string(),
            })?),
            _ => None,
        };
        Ok(Self {
            paths,
            gt_patch,
            use_hflip: opts.use_hflip,
            use_rot: opts.use_rot,
        })
    }

    pub fn build(opts: &DatasetOptions) -> Result<Arc<dyn Dataset>> {
        Ok(Arc::new(Self::new(opts)?))
    }
}

impl Dataset for RealESRGANDataset {
    fn len(&self) -> usize {
        self.paths.len()
    }

    fn get(&self, index: usize, rng: &mut WorkerRng) -> Result<Sample> {
        let path = self.paths.get(index).ok_or(DataError::IndexOutOfRange {
            index,
            len: self.paths.len(),
        })?;
        let mut gt = read_image_chw(path)?;
        if let Some(patch) = self.gt_patch {
            gt = random_crop(&gt, patch, path, rng)?;
            gt = Augmentation::sample(self.use_hflip, self.use_rot, rng).apply(gt);
        }
        Ok(Sample {
            gt: Some(gt),
            gt_path: Some(path.clone()),
            ..Sample::default()
        })
    }

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }
}
