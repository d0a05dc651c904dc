// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/core/src/data/imgutil.rs
//
// Image folder scanning and decoding
//
use ndarray::Array3;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{DataError, Result};

pub const IMG_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff", "webp"];

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMG_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Image files directly inside `folder`, sorted by file name
pub fn scandir_images(folder: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in WalkDir::new(folder).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(folder).to_path_buf();
            DataError::io(path, e.into())
        })?;
        if entry.file_type().is_file() && is_image_file(entry.path()) {
            paths.push(entry.into_path());
        }
    }
    debug!("Found {} images in {:?}", paths.len(), folder);
    Ok(paths)
}

/// Image files of every folder, folder order preserved
pub fn scan_roots(roots: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for root in roots {
        paths.extend(scandir_images(root)?);
    }
    Ok(paths)
}

/// GT/LQ pairs matched by file name: for `gt/name.ext` the LQ file is
/// `filename_tmpl` with `{}` replaced by `name`, plus `.ext`.
pub fn paired_paths_from_folders(
    gt_roots: &[PathBuf],
    lq_roots: &[PathBuf],
    filename_tmpl: &str,
) -> Result<Vec<(PathBuf, PathBuf)>> {
    if gt_roots.len() != lq_roots.len() {
        return Err(DataError::InvalidOption {
            key: "dataroot_lq".to_string(),
            reason: format!(
                "{} GT folders but {} LQ folders; they must be given in matching pairs",
                gt_roots.len(),
                lq_roots.len()
            ),
        });
    }

    let mut pairs = Vec::new();
    for (gt_root, lq_root) in gt_roots.iter().zip(lq_roots) {
        let lq_names: HashSet<String> = scandir_images(lq_root)?
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .collect();

        for gt_path in scandir_images(gt_root)? {
            let stem = gt_path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            let ext = gt_path.extension().and_then(|s| s.to_str()).unwrap_or_default();
            let expected = format!("{}.{}", filename_tmpl.replace("{}", stem), ext);
            if !lq_names.contains(&expected) {
                return Err(DataError::MissingPair {
                    path: gt_path,
                    expected,
                    lq_root: lq_root.clone(),
                });
            }
            pairs.push((gt_path, lq_root.join(expected)));
        }
    }
    Ok(pairs)
}

/// Decode to RGB, CHW layout, values in `[0, 1]`
pub fn read_image_chw(path: &Path) -> Result<Array3<f32>> {
    let img = image::open(path)
        .map_err(|e| DataError::Image {
            path: path.to_path_buf(),
            source: e,
        })?
        .to_rgb8();
    let (w, h) = img.dimensions();
    let (w, h) = (w as usize, h as usize);
    let raw = img.into_raw();
    Ok(Array3::from_shape_fn((3, h, w), |(c, y, x)| {
        raw[(y * w + x) * 3 + c] as f32 / 255.0
    }))
}
