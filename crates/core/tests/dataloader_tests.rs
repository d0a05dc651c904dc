// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use anyhow::Result;
use image::{Rgb, RgbImage};
use ndarray::Array3;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use trainner_core::config::DataRoot;
use trainner_core::data::loader::{DataLoaderArgs, Phase, DEFAULT_PREFETCH_FACTOR};
use trainner_core::data::{
    build_dataloader, create_prefetcher, DataLoader, Dataset, EnlargedSampler, Loader, Sample, Sampler, WorkerRng,
};
use trainner_core::{build_dataset, DataError, DatasetOptions, RuntimeEnv};

/// Write `n` GT/LQ pairs; every pixel of pair `i` has value `i * 10`
fn write_pairs(root: &Path, n: usize, lq_size: u32, scale: u32) -> Result<()> {
    std::fs::create_dir_all(root.join("hr"))?;
    std::fs::create_dir_all(root.join("lr"))?;
    for i in 0..n {
        let v = (i * 10) as u8;
        let gt_size = lq_size * scale;
        RgbImage::from_fn(gt_size, gt_size, |x, y| Rgb([v, x as u8, y as u8]))
            .save(root.join("hr").join(format!("{:04}.png", i)))?;
        RgbImage::from_fn(lq_size, lq_size, |x, y| Rgb([v, x as u8, y as u8]))
            .save(root.join("lr").join(format!("{:04}.png", i)))?;
    }
    Ok(())
}

fn paired_options(root: &Path, phase: &str) -> DatasetOptions {
    let mut opts = DatasetOptions::new("pairs", "PairedImageDataset", phase);
    opts.dataroot_gt = Some(DataRoot::Single(root.join("hr")));
    opts.dataroot_lq = Some(DataRoot::Single(root.join("lr")));
    opts.scale = Some(2);
    opts.lq_size = Some(4);
    opts.use_hflip = true;
    opts.use_rot = true;
    opts.batch_size_per_gpu = Some(2);
    opts.num_worker_per_gpu = Some(2);
    opts
}

/// Returns its index as a 1x1x1 image after sleeping longer for low indices
struct Indexed {
    len: usize,
    panic_at: Option<usize>,
}

impl Dataset for Indexed {
    fn len(&self) -> usize {
        self.len
    }

    fn get(&self, index: usize, _rng: &mut WorkerRng) -> trainner_core::Result<Sample> {
        if self.panic_at == Some(index) {
            panic!("bad sample {}", index);
        }
        std::thread::sleep(Duration::from_millis(((self.len - index) % 5) as u64));
        Ok(Sample {
            gt: Some(Array3::from_elem((1, 1, 1), index as f32)),
            ..Sample::default()
        })
    }

    fn type_name(&self) -> &'static str {
        "Indexed"
    }
}

fn sequential_args(batch_size: usize, num_workers: usize, persistent_workers: bool) -> DataLoaderArgs {
    DataLoaderArgs {
        phase: Phase::Val,
        batch_size,
        num_workers,
        shuffle: false,
        drop_last: false,
        worker_init: None,
        pin_memory: false,
        persistent_workers,
        prefetch_factor: DEFAULT_PREFETCH_FACTOR,
    }
}

fn indexed_loader(len: usize, args: DataLoaderArgs) -> DataLoader {
    let dataset = Arc::new(Indexed { len, panic_at: None });
    DataLoader::new(dataset, args, None, RuntimeEnv::local(1).with_seed(0).process_rng())
}

#[test]
fn test_workers_preserve_batch_order() -> Result<()> {
    let loader = indexed_loader(23, sequential_args(3, 4, false));
    assert_eq!(loader.len(), 8);

    let batches = loader.iter()?.collect::<trainner_core::Result<Vec<_>>>()?;
    let indices: Vec<usize> = batches.iter().flat_map(|b| b.indices.clone()).collect();
    assert_eq!(indices, (0..23).collect::<Vec<_>>());
    assert_eq!(batches.last().map(|b| b.len()), Some(2));
    for batch in &batches {
        let gt = batch.gt.as_ref().unwrap();
        for (row, &index) in batch.indices.iter().enumerate() {
            assert_eq!(gt[[row, 0, 0, 0]], index as f32);
        }
    }
    Ok(())
}

#[test]
fn test_persistent_workers_survive_abandoned_epoch() -> Result<()> {
    let loader = indexed_loader(20, sequential_args(2, 3, true));

    let mut first = loader.iter()?;
    let batch = first.next().unwrap()?;
    assert_eq!(batch.indices, vec![0, 1]);
    drop(first);

    for _ in 0..2 {
        let indices: Vec<usize> = loader
            .iter()?
            .map(|b| b.map(|b| b.indices))
            .collect::<trainner_core::Result<Vec<_>>>()?
            .concat();
        assert_eq!(indices, (0..20).collect::<Vec<_>>());
    }
    Ok(())
}

#[test]
fn test_worker_panic_is_reported() -> Result<()> {
    let dataset = Arc::new(Indexed {
        len: 8,
        panic_at: Some(5),
    });
    let loader = DataLoader::new(dataset, sequential_args(2, 2, false), None, RuntimeEnv::default().process_rng());

    let results: Vec<_> = loader.iter()?.collect();
    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok() && results[1].is_ok());
    match &results[2] {
        Err(DataError::WorkerPanicked { worker_id, message }) => {
            assert_eq!(*worker_id, 0);
            assert!(message.contains("bad sample 5"));
        }
        other => panic!("expected worker panic, got {:?}", other.as_ref().map(|b| b.indices.clone())),
    }
    Ok(())
}

#[test]
fn test_panic_on_calling_thread_is_reported() -> Result<()> {
    let dataset = Arc::new(Indexed {
        len: 8,
        panic_at: Some(5),
    });
    let loader = DataLoader::new(dataset, sequential_args(2, 0, false), None, RuntimeEnv::default().process_rng());

    let results: Vec<_> = loader.iter()?.collect();
    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok() && results[1].is_ok());
    match &results[2] {
        Err(DataError::LoadPanicked { message }) => assert!(message.contains("bad sample 5")),
        other => panic!("expected load panic, got {:?}", other.as_ref().map(|b| b.indices.clone())),
    }

    // the loader stays usable for the next epoch
    let mut next_epoch = loader.iter()?;
    assert_eq!(next_epoch.next().unwrap()?.indices, vec![0, 1]);
    Ok(())
}

#[test]
fn test_train_patch_must_divide_by_scale() -> Result<()> {
    let dir = TempDir::new()?;
    write_pairs(dir.path(), 2, 8, 2)?;
    let mut opts = paired_options(dir.path(), "train");
    opts.lq_size = None;
    opts.gt_size = Some(15);

    let err = build_dataset(&opts).err().unwrap();
    assert!(matches!(&err, DataError::InvalidOption { key, .. } if key == "gt_size"));
    assert!(err.is_config_error());

    opts.gt_size = Some(16);
    assert_eq!(build_dataset(&opts)?.len(), 2);
    Ok(())
}

#[test]
fn test_seeded_train_loader_is_reproducible() -> Result<()> {
    let dir = TempDir::new()?;
    write_pairs(dir.path(), 9, 6, 2)?;
    let opts = paired_options(dir.path(), "train");
    let env = RuntimeEnv::local(1).with_seed(1234);

    let run = || -> Result<Vec<(Vec<usize>, Vec<f32>)>> {
        let dataset = build_dataset(&opts)?;
        let loader = build_dataloader(dataset, &opts, &env, None)?;
        assert!(matches!(loader, Loader::Plain(_)));
        assert_eq!(loader.len(), 4);
        let mut out = Vec::new();
        for batch in loader.iter()? {
            let batch = batch?;
            let gt = batch.gt.unwrap();
            assert_eq!(gt.shape(), &[2, 3, 8, 8]);
            assert_eq!(batch.lq.unwrap().shape(), &[2, 3, 4, 4]);
            out.push((batch.indices, gt.iter().copied().collect()));
        }
        Ok(out)
    };

    let first = run()?;
    assert_eq!(first.len(), 4);
    assert_eq!(first, run()?);

    let mut seen: Vec<usize> = first.iter().flat_map(|(i, _)| i.clone()).collect();
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), 8, "shuffled indices are distinct");
    Ok(())
}

#[test]
fn test_train_crop_stays_aligned() -> Result<()> {
    let dir = TempDir::new()?;
    write_pairs(dir.path(), 4, 6, 2)?;
    let opts = paired_options(dir.path(), "train");
    let dataset = build_dataset(&opts)?;
    let loader = build_dataloader(dataset, &opts, &RuntimeEnv::local(1).with_seed(5), None)?;
    for batch in loader.iter()? {
        let batch = batch?;
        let (gt, lq) = (batch.gt.unwrap(), batch.lq.unwrap());
        for (row, &index) in batch.indices.iter().enumerate() {
            let expected = (index * 10) as f32 / 255.0;
            assert_eq!(gt[[row, 0, 0, 0]], expected);
            assert_eq!(lq[[row, 0, 3, 3]], expected);
        }
    }
    Ok(())
}

#[test]
fn test_val_loader_is_sequential_full_images() -> Result<()> {
    let dir = TempDir::new()?;
    write_pairs(dir.path(), 3, 5, 2)?;
    let opts = paired_options(dir.path(), "val");
    let dataset = build_dataset(&opts)?;
    let loader = build_dataloader(dataset, &opts, &RuntimeEnv::local(4), None)?;
    assert_eq!(loader.args().batch_size, 1);
    assert_eq!(loader.args().num_workers, 0);

    let batches = loader.iter()?.collect::<trainner_core::Result<Vec<_>>>()?;
    assert_eq!(batches.len(), 3);
    for (i, batch) in batches.iter().enumerate() {
        assert_eq!(batch.indices, vec![i]);
        assert_eq!(batch.gt.as_ref().unwrap().shape(), &[1, 3, 10, 10]);
        assert_eq!(batch.lq.as_ref().unwrap().shape(), &[1, 3, 5, 5]);
        assert_eq!(batch.gt_paths[0].file_name().unwrap(), format!("{:04}.png", i).as_str());
    }
    Ok(())
}

#[test]
fn test_cpu_prefetch_loader() -> Result<()> {
    let dir = TempDir::new()?;
    write_pairs(dir.path(), 5, 4, 2)?;
    let mut opts = paired_options(dir.path(), "val");
    opts.prefetch_mode = Some("cpu".to_string());
    opts.num_prefetch_queue = 2;

    let dataset = build_dataset(&opts)?;
    let loader = build_dataloader(dataset, &opts, &RuntimeEnv::default(), None)?;
    let Loader::Prefetch(prefetch) = &loader else {
        panic!("expected prefetch loader");
    };
    assert_eq!(prefetch.num_prefetch_queue(), 2);

    let indices: Vec<usize> = loader
        .iter()?
        .map(|b| b.map(|b| b.indices[0]))
        .collect::<trainner_core::Result<Vec<_>>>()?;
    assert_eq!(indices, vec![0, 1, 2, 3, 4]);

    // abandoning a prefetching epoch must not hang
    let mut partial = loader.iter()?;
    assert!(partial.next().is_some());
    drop(partial);
    Ok(())
}

#[test]
fn test_prefetcher_selection() -> Result<()> {
    let dir = TempDir::new()?;
    write_pairs(dir.path(), 3, 4, 2)?;
    let mut opts = paired_options(dir.path(), "val");
    let dataset = build_dataset(&opts)?;
    let env = RuntimeEnv::default();

    opts.prefetch_mode = Some("gpu".to_string());
    let loader = build_dataloader(dataset.clone(), &opts, &env, None)?;
    let err = create_prefetcher(loader, &opts).err().unwrap();
    assert!(matches!(&err, DataError::InvalidPrefetchMode(m) if m == "gpu"));

    opts.prefetch_mode = Some("cuda".to_string());
    let loader = build_dataloader(dataset.clone(), &opts, &env, None)?;
    let err = create_prefetcher(loader, &opts).err().unwrap();
    assert!(matches!(err, DataError::PinMemoryRequired));

    opts.pin_memory = true;
    let loader = build_dataloader(dataset.clone(), &opts, &env, None)?;
    let mut prefetcher = create_prefetcher(loader, &opts)?;
    for epoch in 0..2 {
        let mut count = 0;
        while let Some(batch) = prefetcher.next_batch() {
            assert_eq!(batch?.indices, vec![count]);
            count += 1;
        }
        assert_eq!(count, 3, "epoch {}", epoch);
        prefetcher.reset()?;
    }

    opts.prefetch_mode = None;
    let loader = build_dataloader(dataset, &opts, &env, None)?;
    let mut prefetcher = create_prefetcher(loader, &opts)?;
    assert_eq!(prefetcher.next_batch().unwrap()?.indices, vec![0]);
    Ok(())
}

#[test]
fn test_sampler_drives_train_loader() -> Result<()> {
    let dir = TempDir::new()?;
    write_pairs(dir.path(), 6, 4, 2)?;
    let mut opts = paired_options(dir.path(), "train");
    opts.num_worker_per_gpu = Some(1);
    let dataset = build_dataset(&opts)?;

    let env = RuntimeEnv {
        dist: true,
        rank: 1,
        world_size: 2,
        ..RuntimeEnv::local(2).with_seed(3)
    };
    let sampler = Arc::new(EnlargedSampler::new(dataset.len(), 2, 1, 2.0)?);
    let loader = build_dataloader(dataset, &opts, &env, Some(sampler.clone() as Arc<dyn Sampler>))?;
    assert!(!loader.args().shuffle);
    assert_eq!(loader.args().batch_size, 2);
    assert_eq!(loader.len(), 3);

    sampler.set_epoch(7);
    let expected: Vec<usize> = sampler.indices();
    let got: Vec<usize> = loader
        .iter()?
        .map(|b| b.map(|b| b.indices))
        .collect::<trainner_core::Result<Vec<_>>>()?
        .concat();
    assert_eq!(got, expected);
    Ok(())
}
