// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/core/src/config/options.rs
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{DataError, Result};

/// Top-level training options file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainOptions {
    pub name: String,
    #[serde(default = "default_scale")]
    pub scale: usize,
    #[serde(default)]
    pub num_gpu: NumGpu,
    #[serde(default)]
    pub manual_seed: Option<u64>,
    #[serde(default)]
    pub datasets: BTreeMap<String, DatasetOptions>,
    #[serde(default)]
    pub network_g: Option<serde_json::Value>,
    #[serde(default)]
    pub train: Option<TrainSchedule>,
    /// Everything the data pipeline does not interpret (path, val, logger, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainSchedule {
    pub total_iter: Option<u64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Options for one entry of the `datasets` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetOptions {
    pub name: String,
    #[serde(rename = "type")]
    pub dataset_type: String,
    /// Kept as a string: an unsupported value must reach the dataloader
    /// factory so it can be reported by name.
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub scale: Option<usize>,

    #[serde(default)]
    pub dataroot_gt: Option<DataRoot>,
    #[serde(default)]
    pub dataroot_lq: Option<DataRoot>,
    #[serde(default)]
    pub filename_tmpl: Option<String>,
    #[serde(default)]
    pub gt_size: Option<usize>,
    #[serde(default)]
    pub lq_size: Option<usize>,
    #[serde(default)]
    pub use_hflip: bool,
    #[serde(default)]
    pub use_rot: bool,

    #[serde(default)]
    pub batch_size_per_gpu: Option<usize>,
    #[serde(default)]
    pub num_worker_per_gpu: Option<usize>,
    #[serde(default = "default_enlarge_ratio")]
    pub dataset_enlarge_ratio: f64,
    #[serde(default)]
    pub pin_memory: bool,
    #[serde(default)]
    pub persistent_workers: bool,
    #[serde(default)]
    pub prefetch_mode: Option<String>,
    #[serde(default = "default_prefetch_queue")]
    pub num_prefetch_queue: usize,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A single folder or a list of folders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataRoot {
    Single(PathBuf),
    Multiple(Vec<PathBuf>),
}

impl DataRoot {
    pub fn paths(&self) -> Vec<PathBuf> {
        match self {
            DataRoot::Single(p) => vec![p.clone()],
            DataRoot::Multiple(ps) => ps.clone(),
        }
    }
}

/// `num_gpu: auto` or an explicit device count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "NumGpuRepr", into = "NumGpuRepr")]
pub enum NumGpu {
    #[default]
    Auto,
    Count(usize),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum NumGpuRepr {
    Count(usize),
    Keyword(String),
}

impl TryFrom<NumGpuRepr> for NumGpu {
    type Error = String;

    fn try_from(repr: NumGpuRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            NumGpuRepr::Count(n) => Ok(NumGpu::Count(n)),
            NumGpuRepr::Keyword(k) if k.eq_ignore_ascii_case("auto") => Ok(NumGpu::Auto),
            NumGpuRepr::Keyword(k) => Err(format!("num_gpu must be an integer or 'auto', got '{}'", k)),
        }
    }
}

impl From<NumGpu> for NumGpuRepr {
    fn from(n: NumGpu) -> Self {
        match n {
            NumGpu::Auto => NumGpuRepr::Keyword("auto".to_string()),
            NumGpu::Count(c) => NumGpuRepr::Count(c),
        }
    }
}

impl NumGpu {
    /// Resolve against the `CUDA_VISIBLE_DEVICES` environment variable
    pub fn resolve(&self) -> usize {
        let visible = std::env::var("CUDA_VISIBLE_DEVICES").ok();
        self.resolve_with(visible.as_deref())
    }

    pub fn resolve_with(&self, visible_devices: Option<&str>) -> usize {
        match self {
            NumGpu::Count(n) => *n,
            NumGpu::Auto => visible_devices
                .map(|v| v.split(',').filter(|d| !d.trim().is_empty()).count())
                .unwrap_or(0),
        }
    }
}

fn default_scale() -> usize {
    4
}

fn default_enlarge_ratio() -> f64 {
    1.0
}

fn default_prefetch_queue() -> usize {
    1
}

impl TrainOptions {
    /// Parse options from a JSON string
    pub fn from_json(json_str: &str) -> Result<Self> {
        Ok(serde_json::from_str(json_str)?)
    }

    /// Parse options from YAML by converting to JSON first
    pub fn from_yaml(yaml_str: &str) -> Result<Self> {
        let yaml_value: serde_yaml::Value = serde_yaml::from_str(yaml_str)?;
        let json_value = serde_json::to_value(&yaml_value)?;
        let opts: Self = serde_json::from_value(json_value)?;
        opts.validate()?;
        Ok(opts)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(&path).map_err(|e| DataError::io(path.as_ref(), e))?;
        Self::from_yaml(&text)
    }

    /// Dataset entries with `phase` taken from their key (`val_2` → `val`),
    /// replacing any `phase` written in the entry,
    /// and the top-level `scale` copied in.
    pub fn dataset_options(&self) -> Vec<DatasetOptions> {
        self.datasets
            .iter()
            .map(|(key, opts)| {
                let mut opts = opts.clone();
                let phase = key.split('_').next().unwrap_or(key);
                opts.phase = Some(phase.to_string());
                opts.scale = Some(self.scale);
                opts
            })
            .collect()
    }

    pub fn total_iter(&self) -> Option<u64> {
        self.train.as_ref().and_then(|t| t.total_iter)
    }

    pub fn validate(&self) -> Result<()> {
        if self.scale == 0 {
            return Err(DataError::InvalidOption {
                key: "scale".to_string(),
                reason: "must be >= 1".to_string(),
            });
        }
        for opts in self.dataset_options() {
            if opts.phase.as_deref() == Some("train") {
                opts.require_batch_size()?;
                opts.require_num_workers()?;
            }
            if opts.dataset_enlarge_ratio <= 0.0 {
                return Err(DataError::InvalidOption {
                    key: "dataset_enlarge_ratio".to_string(),
                    reason: format!("must be > 0, got {}", opts.dataset_enlarge_ratio),
                });
            }
        }
        Ok(())
    }
}

impl DatasetOptions {
    /// Minimal options for the given type and phase
    pub fn new(name: impl Into<String>, dataset_type: impl Into<String>, phase: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dataset_type: dataset_type.into(),
            phase: Some(phase.into()),
            scale: None,
            dataroot_gt: None,
            dataroot_lq: None,
            filename_tmpl: None,
            gt_size: None,
            lq_size: None,
            use_hflip: false,
            use_rot: false,
            batch_size_per_gpu: None,
            num_worker_per_gpu: None,
            dataset_enlarge_ratio: default_enlarge_ratio(),
            pin_memory: false,
            persistent_workers: false,
            prefetch_mode: None,
            num_prefetch_queue: default_prefetch_queue(),
            extra: BTreeMap::new(),
        }
    }

    pub fn phase(&self) -> Result<&str> {
        self.phase.as_deref().ok_or_else(|| self.missing("phase"))
    }

    pub fn scale(&self) -> usize {
        self.scale.unwrap_or_else(default_scale)
    }

    pub fn require_batch_size(&self) -> Result<usize> {
        self.batch_size_per_gpu.ok_or_else(|| self.missing("batch_size_per_gpu"))
    }

    pub fn require_num_workers(&self) -> Result<usize> {
        self.num_worker_per_gpu.ok_or_else(|| self.missing("num_worker_per_gpu"))
    }

    pub fn require_dataroot_gt(&self) -> Result<Vec<PathBuf>> {
        self.dataroot_gt
            .as_ref()
            .map(DataRoot::paths)
            .ok_or_else(|| self.missing("dataroot_gt"))
    }

    pub fn require_dataroot_lq(&self) -> Result<Vec<PathBuf>> {
        self.dataroot_lq
            .as_ref()
            .map(DataRoot::paths)
            .ok_or_else(|| self.missing("dataroot_lq"))
    }

    /// GT patch size, from `gt_size` or `lq_size * scale`
    pub fn patch_size(&self) -> Option<usize> {
        self.gt_size.or_else(|| self.lq_size.map(|lq| lq * self.scale()))
    }

    pub fn filename_tmpl(&self) -> &str {
        self.filename_tmpl.as_deref().unwrap_or("{}")
    }

    fn missing(&self, key: &str) -> DataError {
        DataError::MissingOption {
            dataset: self.name.clone(),
            key: key.to_string(),
        }
    }
}
