// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use trainner_core::config::yaml_to_json;
use trainner_core::data::create_prefetcher;
use trainner_core::templates::OptionsGenerator;
use trainner_core::{create_train_val_dataloader, Batch, DistInfo, RuntimeEnv, TrainOptions};

/// trainner – dataset, dataloader and option-file tooling for super-resolution training
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write per-architecture option files from the paired and OTF templates
    GenerateOptions {
        /// Output directory, one sub-folder per architecture
        #[arg(short, long, default_value = "options/train")]
        out: PathBuf,

        /// Directory holding default_options_paired.yml and default_options_otf.yml
        /// (defaults to the built-in templates)
        #[arg(long)]
        templates: Option<PathBuf>,
    },
    /// Validate a training options file without loading any data
    Validate {
        /// Path to a training options YAML file
        #[arg(short, long)]
        config: PathBuf,

        /// Convert YAML to JSON and print it
        #[arg(long)]
        to_json: bool,
    },
    /// Build the train/val dataloaders and report what they produce
    Inspect {
        /// Path to a training options YAML file
        #[arg(short, long)]
        config: PathBuf,

        /// Accelerator count; overrides num_gpu from the options file
        #[arg(long)]
        accelerators: Option<usize>,

        /// Use distributed mode; rank and world size come from RANK / WORLD_SIZE
        #[arg(long)]
        dist: bool,

        /// Number of train batches to pull
        #[arg(long, default_value_t = 2)]
        batches: usize,
    },
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Ignore errors if .env doesn't exist

    let args = Args::parse();

    let log_level = if args.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("trainner={0},trainner_core={0}", log_level))
        .init();

    info!("trainner v{} starting", env!("CARGO_PKG_VERSION"));

    let result = match args.command {
        Commands::GenerateOptions { out, templates } => generate_options(&out, templates.as_deref()),
        Commands::Validate { config, to_json } => validate_options(&config, to_json),
        Commands::Inspect {
            config,
            accelerators,
            dist,
            batches,
        } => inspect(&config, accelerators, dist, batches),
    };

    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

fn generate_options(out: &Path, templates: Option<&Path>) -> Result<()> {
    let generator = match templates {
        Some(dir) => OptionsGenerator::from_dir(dir)
            .with_context(|| format!("Failed to load templates from {}", dir.display()))?,
        None => OptionsGenerator::builtin(),
    };
    let written = generator
        .generate(out)
        .with_context(|| format!("Failed to write option files to {}", out.display()))?;
    for path in &written {
        println!("{}", path.display());
    }
    println!("✅ Generated {} option files", written.len());
    Ok(())
}

fn validate_options(config_path: &Path, to_json: bool) -> Result<()> {
    info!("Validating options: {:?}", config_path);

    let yaml_content = std::fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read {}", config_path.display()))?;

    if to_json {
        println!("{}", yaml_to_json(&yaml_content)?);
        return Ok(());
    }

    let opts = TrainOptions::from_yaml(&yaml_content)
        .with_context(|| format!("Invalid options file {}", config_path.display()))?;

    println!("✅ YAML parsing: SUCCESS");
    println!("✅ Name: {}", opts.name);
    println!("✅ Scale: {}", opts.scale);
    if let Some(network) = &opts.network_g {
        println!("✅ Network: {}", network.get("type").and_then(|t| t.as_str()).unwrap_or("?"));
    }
    for dataset in opts.dataset_options() {
        println!(
            "✅ Dataset {} ({}): phase={}, batch_size_per_gpu={:?}, num_worker_per_gpu={:?}, prefetch_mode={:?}",
            dataset.name,
            dataset.dataset_type,
            dataset.phase.as_deref().unwrap_or("?"),
            dataset.batch_size_per_gpu,
            dataset.num_worker_per_gpu,
            dataset.prefetch_mode
        );
    }
    match opts.total_iter() {
        Some(iters) => println!("✅ Total iterations: {}", iters),
        None => println!("⚠️  train.total_iter is not set"),
    }
    Ok(())
}

fn inspect(config_path: &Path, accelerators: Option<usize>, dist: bool, batches: usize) -> Result<()> {
    let opts = TrainOptions::from_yaml_file(config_path)
        .with_context(|| format!("Invalid options file {}", config_path.display()))?;

    let info = if dist { DistInfo::from_env()? } else { DistInfo::default() };
    let mut env = RuntimeEnv::from_options(&opts, info, dist);
    if let Some(n) = accelerators {
        env.num_gpu = n;
    }

    let loaders = create_train_val_dataloader(&opts, &env)?;
    let train_args = loaders.train_loader.args();
    println!("✅ Train dataset: {} images", loaders.train_loader.dataset().len());
    println!(
        "  - Batch size: {}, workers: {}, shuffle: {}, drop_last: {}",
        train_args.batch_size, train_args.num_workers, train_args.shuffle, train_args.drop_last
    );
    println!(
        "  - Iters per epoch: {}, total epochs: {}, total iters: {}",
        loaders.num_iter_per_epoch, loaders.total_epochs, loaders.total_iters
    );

    let train_opts = opts
        .dataset_options()
        .into_iter()
        .find(|d| d.phase.as_deref() == Some("train"))
        .context("No train dataset in options")?;
    loaders.train_sampler.set_epoch(0);
    let mut prefetcher = create_prefetcher(loaders.train_loader.clone(), &train_opts)?;
    for i in 0..batches {
        match prefetcher.next_batch() {
            Some(batch) => println!("  - Batch {}: {}", i, describe(&batch?)),
            None => break,
        }
    }

    for (name, loader) in &loaders.val_loaders {
        println!("✅ Val dataset {}: {} images", name, loader.dataset().len());
        if let Some(batch) = loader.iter()?.next() {
            println!("  - First batch: {}", describe(&batch?));
        }
    }
    Ok(())
}

fn describe(batch: &Batch) -> String {
    let shape = |a: Option<&[usize]>| a.map_or_else(|| "-".to_string(), |s| format!("{:?}", s));
    format!(
        "lq {} gt {} indices {:?}",
        shape(batch.lq.as_ref().map(|a| a.shape())),
        shape(batch.gt.as_ref().map(|a| a.shape())),
        batch.indices
    )
}
