// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Process placement within a distributed job.
//!
//! Rank and world size come from the launcher's environment (`RANK`,
//! `WORLD_SIZE`); nothing here talks to a communication backend.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::config::TrainOptions;
use crate::error::{DataError, Result};

/// Rank of this process and the total number of processes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistInfo {
    pub rank: usize,
    pub world_size: usize,
}

impl Default for DistInfo {
    fn default() -> Self {
        Self { rank: 0, world_size: 1 }
    }
}

impl DistInfo {
    pub fn new(rank: usize, world_size: usize) -> Result<Self> {
        if world_size == 0 || rank >= world_size {
            return Err(DataError::InvalidOption {
                key: "rank".to_string(),
                reason: format!("rank {} >= world_size {}", rank, world_size),
            });
        }
        Ok(Self { rank, world_size })
    }

    /// Read `RANK` and `WORLD_SIZE`; both default when unset
    pub fn from_env() -> Result<Self> {
        let rank = std::env::var("RANK").ok();
        let world_size = std::env::var("WORLD_SIZE").ok();
        Self::from_vars(rank.as_deref(), world_size.as_deref())
    }

    pub fn from_vars(rank: Option<&str>, world_size: Option<&str>) -> Result<Self> {
        let rank = parse_var("RANK", rank)?.unwrap_or(0);
        let world_size = parse_var("WORLD_SIZE", world_size)?.unwrap_or(1);
        let info = Self::new(rank, world_size)?;
        debug!("Dist info: rank {}/{}", info.rank, info.world_size);
        Ok(info)
    }

    pub fn is_distributed(&self) -> bool {
        self.world_size > 1
    }
}

fn parse_var(var: &str, value: Option<&str>) -> Result<Option<usize>> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => v.parse().map(Some).map_err(|_| DataError::InvalidEnv {
            var: var.to_string(),
            value: v.to_string(),
        }),
    }
}

/// Runtime inputs consumed by the dataloader factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeEnv {
    /// Accelerator count
    pub num_gpu: usize,
    /// Whether training runs under distributed synchronization
    pub dist: bool,
    pub rank: usize,
    pub world_size: usize,
    /// Base seed; worker seeding is only attached when set
    pub seed: Option<u64>,
}

impl Default for RuntimeEnv {
    fn default() -> Self {
        Self {
            num_gpu: 1,
            dist: false,
            rank: 0,
            world_size: 1,
            seed: None,
        }
    }
}

impl RuntimeEnv {
    /// Non-distributed run on `num_gpu` accelerators
    pub fn local(num_gpu: usize) -> Self {
        Self {
            num_gpu,
            ..Self::default()
        }
    }

    pub fn distributed(info: DistInfo, num_gpu: usize) -> Self {
        Self {
            num_gpu,
            dist: true,
            rank: info.rank,
            world_size: info.world_size,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Assemble from an options file: `num_gpu` is resolved, the seed is the
    /// configured one or a fresh random one.
    pub fn from_options(opts: &TrainOptions, info: DistInfo, dist: bool) -> Self {
        let seed = resolve_seed(opts.manual_seed);
        let env = Self {
            num_gpu: opts.num_gpu.resolve(),
            dist,
            rank: info.rank,
            world_size: info.world_size,
            seed: Some(seed),
        };
        info!(
            "Runtime: num_gpu={}, dist={}, rank={}/{}, seed={}",
            env.num_gpu, env.dist, env.rank, env.world_size, seed
        );
        env
    }

    /// RNG for work done on the main process, seeded with `seed + rank`
    pub fn process_rng(&self) -> ChaCha8Rng {
        match self.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed.wrapping_add(self.rank as u64)),
            None => ChaCha8Rng::from_rng(&mut rand::rng()),
        }
    }
}

/// The configured seed, or a random one in `1024..=10000`
pub fn resolve_seed(manual_seed: Option<u64>) -> u64 {
    manual_seed.unwrap_or_else(|| rand::rng().random_range(1024..=10000))
}
