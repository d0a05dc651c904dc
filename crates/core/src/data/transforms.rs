// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Cropping and geometric augmentation on CHW arrays.

use ndarray::{s, Array3, Axis};
use rand::Rng;
use std::path::Path;

use crate::data::WorkerRng;
use crate::error::{DataError, Result};

fn hw(img: &Array3<f32>) -> (usize, usize) {
    (img.shape()[1], img.shape()[2])
}

/// The GT patch must map onto a whole number of LQ pixels
pub fn check_patch_divisible(gt_patch: usize, scale: usize) -> Result<()> {
    if scale == 0 || gt_patch % scale != 0 {
        return Err(DataError::InvalidOption {
            key: "gt_size".to_string(),
            reason: format!("{} is not a multiple of scale {}", gt_patch, scale),
        });
    }
    Ok(())
}

/// Aligned random crop: a `gt_patch` square from GT and the matching
/// `gt_patch / scale` square from LQ.
pub fn paired_random_crop(
    gt: &Array3<f32>,
    lq: &Array3<f32>,
    gt_patch: usize,
    scale: usize,
    gt_path: &Path,
    rng: &mut WorkerRng,
) -> Result<(Array3<f32>, Array3<f32>)> {
    check_patch_divisible(gt_patch, scale)?;
    let (h_lq, w_lq) = hw(lq);
    let (h_gt, w_gt) = hw(gt);
    if h_gt != h_lq * scale || w_gt != w_lq * scale {
        return Err(DataError::ScaleMismatch {
            scale,
            gt_h: h_gt,
            gt_w: w_gt,
            lq_h: h_lq,
            lq_w: w_lq,
        });
    }
    let lq_patch = gt_patch / scale;
    if lq_patch == 0 || h_lq < lq_patch || w_lq < lq_patch {
        return Err(DataError::PatchTooLarge {
            h: h_lq,
            w: w_lq,
            patch: lq_patch,
            path: gt_path.to_path_buf(),
        });
    }

    let top = rng.random_range(0..=h_lq - lq_patch);
    let left = rng.random_range(0..=w_lq - lq_patch);
    let lq = lq
        .slice(s![.., top..top + lq_patch, left..left + lq_patch])
        .to_owned();
    let (top_gt, left_gt) = (top * scale, left * scale);
    let gt = gt
        .slice(s![.., top_gt..top_gt + gt_patch, left_gt..left_gt + gt_patch])
        .to_owned();
    Ok((gt, lq))
}

pub fn random_crop(img: &Array3<f32>, patch: usize, path: &Path, rng: &mut WorkerRng) -> Result<Array3<f32>> {
    let (h, w) = hw(img);
    if patch == 0 || h < patch || w < patch {
        return Err(DataError::PatchTooLarge {
            h,
            w,
            patch,
            path: path.to_path_buf(),
        });
    }
    let top = rng.random_range(0..=h - patch);
    let left = rng.random_range(0..=w - patch);
    Ok(img.slice(s![.., top..top + patch, left..left + patch]).to_owned())
}

/// Trim GT to exactly `scale` times the LQ size.
pub fn crop_to_scale(gt: Array3<f32>, lq: &Array3<f32>, scale: usize) -> Result<Array3<f32>> {
    let (h_lq, w_lq) = hw(lq);
    let (h_gt, w_gt) = hw(&gt);
    if h_gt < h_lq * scale || w_gt < w_lq * scale {
        return Err(DataError::ScaleMismatch {
            scale,
            gt_h: h_gt,
            gt_w: w_gt,
            lq_h: h_lq,
            lq_w: w_lq,
        });
    }
    Ok(gt.slice(s![.., ..h_lq * scale, ..w_lq * scale]).to_owned())
}

/// Which flips/rotation to apply; drawn once and shared by paired images.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Augmentation {
    pub hflip: bool,
    pub vflip: bool,
    pub rot90: bool,
}

impl Augmentation {
    pub fn sample(use_hflip: bool, use_rot: bool, rng: &mut WorkerRng) -> Self {
        Self {
            hflip: use_hflip && rng.random::<f64>() < 0.5,
            vflip: use_rot && rng.random::<f64>() < 0.5,
            rot90: use_rot && rng.random::<f64>() < 0.5,
        }
    }

    pub fn apply(&self, mut img: Array3<f32>) -> Array3<f32> {
        if self.hflip {
            img.invert_axis(Axis(2));
        }
        if self.vflip {
            img.invert_axis(Axis(1));
        }
        if self.rot90 {
            img = img.permuted_axes([0, 2, 1]);
        }
        img.as_standard_layout().into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::path::PathBuf;

    fn ramp(h: usize, w: usize) -> Array3<f32> {
        Array3::from_shape_fn((3, h, w), |(c, y, x)| (c * 10000 + y * 100 + x) as f32)
    }

    #[test]
    fn test_paired_crop_is_aligned() {
        let mut rng = WorkerRng::seed_from_u64(0);
        let lq = ramp(8, 10);
        let gt = Array3::from_shape_fn((3, 16, 20), |(c, y, x)| lq[[c, y / 2, x / 2]]);
        for _ in 0..20 {
            let (gt_p, lq_p) = paired_random_crop(&gt, &lq, 8, 2, &PathBuf::from("x.png"), &mut rng).unwrap();
            assert_eq!(gt_p.shape(), &[3, 8, 8]);
            assert_eq!(lq_p.shape(), &[3, 4, 4]);
            assert_eq!(gt_p[[1, 0, 0]], lq_p[[1, 0, 0]]);
            assert_eq!(gt_p[[2, 7, 7]], lq_p[[2, 3, 3]]);
        }
    }

    #[test]
    fn test_paired_crop_scale_mismatch() {
        let mut rng = WorkerRng::seed_from_u64(0);
        let err = paired_random_crop(&ramp(10, 10), &ramp(4, 4), 4, 2, &PathBuf::from("x"), &mut rng).unwrap_err();
        assert!(err.to_string().starts_with("Scale mismatches"));
    }

    #[test]
    fn test_paired_crop_patch_too_large() {
        let mut rng = WorkerRng::seed_from_u64(0);
        let err = paired_random_crop(&ramp(8, 8), &ramp(4, 4), 16, 2, &PathBuf::from("x"), &mut rng).unwrap_err();
        assert!(matches!(err, DataError::PatchTooLarge { patch: 8, .. }));
    }

    #[test]
    fn test_paired_crop_rejects_indivisible_patch() {
        let mut rng = WorkerRng::seed_from_u64(0);
        let lq = ramp(8, 8);
        let gt = ramp(16, 16);
        for _ in 0..20 {
            let err = paired_random_crop(&gt, &lq, 15, 2, &PathBuf::from("x"), &mut rng).unwrap_err();
            assert!(matches!(&err, DataError::InvalidOption { key, .. } if key == "gt_size"));
        }
        assert!(paired_random_crop(&gt, &lq, 16, 2, &PathBuf::from("x"), &mut rng).is_ok());
    }

    #[test]
    fn test_crop_to_scale() {
        let gt = crop_to_scale(ramp(9, 11), &ramp(4, 5), 2).unwrap();
        assert_eq!(gt.shape(), &[3, 8, 10]);
        assert!(crop_to_scale(ramp(7, 10), &ramp(4, 5), 2).is_err());
    }

    #[test]
    fn test_augmentation_apply() {
        let img = ramp(2, 3);
        let flipped = Augmentation { hflip: true, ..Default::default() }.apply(img.clone());
        assert_eq!(flipped[[0, 0, 0]], img[[0, 0, 2]]);

        let vflipped = Augmentation { vflip: true, ..Default::default() }.apply(img.clone());
        assert_eq!(vflipped[[0, 0, 1]], img[[0, 1, 1]]);

        let rotated = Augmentation { rot90: true, ..Default::default() }.apply(img.clone());
        assert_eq!(rotated.shape(), &[3, 3, 2]);
        assert_eq!(rotated[[2, 2, 1]], img[[2, 1, 2]]);
        assert!(rotated.is_standard_layout());
    }

    #[test]
    fn test_augmentation_disabled() {
        let mut rng = WorkerRng::seed_from_u64(3);
        for _ in 0..10 {
            assert_eq!(Augmentation::sample(false, false, &mut rng), Augmentation::default());
        }
    }
}
