// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! GT/LQ image pairs read from matching folders.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::DatasetOptions;
use crate::data::imgutil::{paired_paths_from_folders, read_image_chw};
use crate::data::transforms::{check_patch_divisible, crop_to_scale, paired_random_crop, Augmentation};
use crate::data::{Dataset, Sample, WorkerRng};
use crate::error::{DataError, Result};

/// Paired images for supervised SR.
///
/// In the train phase each sample is an aligned random crop of `gt_size`
/// (or `lq_size * scale`) with optional flips and rotation. Otherwise whole
/// images are returned with GT trimmed to exactly `scale` times the LQ.
pub struct PairedImageDataset {
    pairs: Vec<(PathBuf, PathBuf)>,
    scale: usize,
    /// GT patch size, only in the train phase
    gt_patch: Option<usize>,
    use_hflip: bool,
    use_rot: bool,
}

impl PairedImageDataset {
    pub const TYPE_NAME: &'static str = "PairedImageDataset";

    pub fn new(opts: &DatasetOptions) -> Result<Self> {
        let gt_roots = opts.require_dataroot_gt()?;
        let lq_roots = opts.require_dataroot_lq()?;
        let pairs = paired_paths_from_folders(&gt_roots, &lq_roots, opts.filename_tmpl())?;

        let gt_patch = if opts.phase.as_deref() == Some("train") {
            Some(opts.patch_size().ok_or_else(|| DataError::MissingOption {
                dataset: opts.name.clone(),
                key: "gt_size".to_string(),
            })?)
        } else {
            None
        };
        if let Some(patch) = gt_patch {
            check_patch_divisible(patch, opts.scale())?;
        }

        Ok(Self {
            pairs,
            scale: opts.scale(),
            gt_patch,
            use_hflip: opts.use_hflip,
            use_rot: opts.use_rot,
        })
    }

    pub fn build(opts: &DatasetOptions) -> Result<Arc<dyn Dataset>> {
        Ok(Arc::new(Self::new(opts)?))
    }
}

impl Dataset for PairedImageDataset {
    fn len(&self) -> usize {
        self.pairs.len()
    }

    fn get(&self, index: usize, rng: &mut WorkerRng) -> Result<Sample> {
        let (gt_path, lq_path) = self.pairs.get(index).ok_or(DataError::IndexOutOfRange {
            index,
            len: self.pairs.len(),
        })?;
        let gt = read_image_chw(gt_path)?;
        let lq = read_image_chw(lq_path)?;

        let (gt, lq) = match self.gt_patch {
            Some(patch) => {
                let (gt, lq) = paired_random_crop(&gt, &lq, patch, self.scale, gt_path, rng)?;
                let aug = Augmentation::sample(self.use_hflip, self.use_rot, rng);
                (aug.apply(gt), aug.apply(lq))
            }
            None => (crop_to_scale(gt, &lq, self.scale)?, lq),
        };

        Ok(Sample {
            lq: Some(lq),
            gt: Some(gt),
            lq_path: Some(lq_path.clone()),
            gt_path: Some(gt_path.clone()),
        })
    }

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }
}
