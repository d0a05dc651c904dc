// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/core/src/data/registry.rs
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

use crate::config::DatasetOptions;
use crate::data::paired_image_dataset::PairedImageDataset;
use crate::data::realesrgan_dataset::RealESRGANDataset;
use crate::data::single_image_dataset::SingleImageDataset;
use crate::data::Dataset;
use crate::error::{DataError, Result};

/// Constructor stored under a dataset type name
pub type DatasetCtor = fn(&DatasetOptions) -> Result<Arc<dyn Dataset>>;

/// Every `*_dataset.rs` module under `data/` registers here.
const BUILTIN_DATASETS: &[(&str, DatasetCtor)] = &[
    (PairedImageDataset::TYPE_NAME, PairedImageDataset::build),
    (RealESRGANDataset::TYPE_NAME, RealESRGANDataset::build),
    (SingleImageDataset::TYPE_NAME, SingleImageDataset::build),
];

/// String-keyed dataset constructors
#[derive(Clone, Default)]
pub struct DatasetRegistry {
    entries: BTreeMap<String, DatasetCtor>,
}

impl std::fmt::Debug for DatasetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetRegistry")
            .field("names", &self.names())
            .finish()
    }
}

static GLOBAL: OnceLock<RwLock<DatasetRegistry>> = OnceLock::new();

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for (name, ctor) in BUILTIN_DATASETS {
            registry.entries.insert(name.to_string(), *ctor);
        }
        registry
    }

    /// Process-wide registry, populated with the built-in datasets on first use
    pub fn global() -> &'static RwLock<DatasetRegistry> {
        GLOBAL.get_or_init(|| RwLock::new(Self::with_builtin()))
    }

    pub fn register(&mut self, name: impl Into<String>, ctor: DatasetCtor) -> Result<()> {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(DataError::DuplicateRegistration(name));
        }
        debug!("Registered dataset type {}", name);
        self.entries.insert(name, ctor);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<DatasetCtor> {
        self.entries
            .get(name)
            .copied()
            .ok_or_else(|| DataError::UnknownDatasetType {
                name: name.to_string(),
                available: self.names(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Instantiate the dataset named by `opts.type` from a private copy of the options
    pub fn build(&self, opts: &DatasetOptions) -> Result<Arc<dyn Dataset>> {
        let opts = opts.clone();
        info!("Building Dataset {}...", opts.name);
        let ctor = self.get(&opts.dataset_type)?;
        let dataset = ctor(&opts)?;
        info!("Dataset [{}] - {} is built.", dataset.type_name(), opts.name);
        Ok(dataset)
    }
}

/// Add a dataset type to the process-wide registry
pub fn register_dataset(name: impl Into<String>, ctor: DatasetCtor) -> Result<()> {
    DatasetRegistry::global().write().register(name, ctor)
}

/// Build a dataset through the process-wide registry
pub fn build_dataset(opts: &DatasetOptions) -> Result<Arc<dyn Dataset>> {
    // Snapshot so the lock is not held while images are scanned
    let registry = DatasetRegistry::global().read().clone();
    registry.build(opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Sample, WorkerRng};

    struct Constant;

    impl Dataset for Constant {
        fn len(&self) -> usize {
            3
        }
        fn get(&self, _index: usize, _rng: &mut WorkerRng) -> Result<Sample> {
            Ok(Sample::default())
        }
        fn type_name(&self) -> &'static str {
            "Constant"
        }
    }

    fn build_constant(_opts: &DatasetOptions) -> Result<Arc<dyn Dataset>> {
        Ok(Arc::new(Constant))
    }

    #[test]
    fn test_builtin_registrations() {
        let registry = DatasetRegistry::with_builtin();
        assert_eq!(
            registry.names(),
            vec!["PairedImageDataset", "RealESRGANDataset", "SingleImageDataset"]
        );
    }

    #[test]
    fn test_register_and_build() {
        let mut registry = DatasetRegistry::new();
        registry.register("Constant", build_constant).unwrap();
        let dataset = registry
            .build(&DatasetOptions::new("const", "Constant", "train"))
            .unwrap();
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.type_name(), "Constant");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = DatasetRegistry::with_builtin();
        let err = registry.register("PairedImageDataset", build_constant).unwrap_err();
        assert!(matches!(err, DataError::DuplicateRegistration(name) if name == "PairedImageDataset"));
    }

    #[test]
    fn test_unknown_type_names_the_type() {
        let registry = DatasetRegistry::with_builtin();
        let err = registry
            .build(&DatasetOptions::new("x", "NoSuchDataset", "train"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("NoSuchDataset"));
        assert!(err.is_config_error());
    }

    #[test]
    fn test_global_registration() {
        register_dataset("GlobalConstant", build_constant).unwrap();
        let dataset = build_dataset(&DatasetOptions::new("g", "GlobalConstant", "val")).unwrap();
        assert_eq!(dataset.len(), 3);
        assert!(register_dataset("GlobalConstant", build_constant).is_err());
    }
}
