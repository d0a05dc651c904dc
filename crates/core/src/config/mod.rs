// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/core/src/config/mod.rs
pub mod options;

pub use options::{DataRoot, DatasetOptions, NumGpu, TrainOptions, TrainSchedule};

/// Convert YAML to JSON - utility for CLI validation
pub fn yaml_to_json(yaml_str: &str) -> crate::Result<String> {
    let yaml_value: serde_yaml::Value = serde_yaml::from_str(yaml_str)?;
    Ok(serde_json::to_string_pretty(&yaml_value)?)
}
