// SPDX-FileCopyrightText: 2025 Russ Fellows <russ.fellows@gmail.com>
// SPDX-License-Identifier: GPL-3.0-or-later

// crates/core/src/templates.rs
//
// Per-architecture training option files generated from YAML templates
//
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{DataError, Result};

pub const ALL_SCALES: &[u32] = &[1, 2, 3, 4, 8];
pub const DEFAULT_SCALE: u32 = 4;

pub const PAIRED_TEMPLATE_FILE: &str = "default_options_paired.yml";
pub const OTF_TEMPLATE_FILE: &str = "default_options_otf.yml";

const BUILTIN_PAIRED: &str = include_str!("../templates/default_options_paired.yml");
const BUILTIN_OTF: &str = include_str!("../templates/default_options_otf.yml");

/// One network architecture and the variants sharing its option file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchInfo {
    /// Variant names, the first one is the default
    pub names: Vec<String>,
    pub scales: Vec<u32>,
    /// Extra `network_g` keys, written in order
    pub extras: Vec<(String, String)>,
}

impl ArchInfo {
    pub fn new(names: &[&str], scales: &[u32]) -> Self {
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
            scales: scales.to_vec(),
            extras: Vec::new(),
        }
    }

    pub fn with_extra(mut self, key: &str, value: &str) -> Self {
        self.extras.push((key.to_string(), value.to_string()));
        self
    }

    /// First name up to the first `_`
    pub fn folder_name(&self) -> &str {
        let first = self.names.first().map(String::as_str).unwrap_or_default();
        first.split('_').next().unwrap_or(first)
    }
}

/// Architectures with generated option files.
pub fn builtin_archs() -> Vec<ArchInfo> {
    vec![
        ArchInfo::new(&["ESRGAN", "ESRGAN_lite"], ALL_SCALES).with_extra("use_pixel_unshuffle", "true"),
        ArchInfo::new(&["ATD"], ALL_SCALES),
        ArchInfo::new(&["DAT_2"], ALL_SCALES),
        ArchInfo::new(&["HAT_L", "HAT_M", "HAT_S"], ALL_SCALES),
        ArchInfo::new(&["OmniSR"], ALL_SCALES),
        ArchInfo::new(&["PLKSR"], ALL_SCALES),
        ArchInfo::new(&["RealPLKSR"], ALL_SCALES)
            .with_extra("upsampler", "dysample  # dysample, pixelshuffle, conv (1x only)"),
        ArchInfo::new(&["RealCUGAN"], &[2, 3, 4])
            .with_extra("pro", "true")
            .with_extra("fast", "false"),
        ArchInfo::new(&["SPAN"], ALL_SCALES),
        ArchInfo::new(&["SRFormer", "SRFormer_light"], ALL_SCALES),
        ArchInfo::new(&["Compact", "UltraCompact", "SuperUltraCompact"], ALL_SCALES),
        ArchInfo::new(&["SwinIR_L", "SwinIR_M", "SwinIR_S"], ALL_SCALES),
        ArchInfo::new(&["RGT", "RGT_S"], ALL_SCALES),
        ArchInfo::new(&["DRCT", "DRCT_L", "DRCT_XL"], ALL_SCALES),
        ArchInfo::new(&["SPANPlus", "SPANPlus_STS", "SPANPlus_S", "SPANPlus_ST"], ALL_SCALES),
    ]
}

fn join<T: ToString>(items: &[T]) -> String {
    items.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// Fill the `%scale%` / `%archname%` placeholders of a template for `arch`.
///
/// Substitution order matters: the `scale:` and `type:` lines are expanded
/// first, then any remaining placeholders (names, paths) get the plain
/// first name and `4x`.
pub fn final_template(template: &str, arch: &ArchInfo) -> String {
    let first = arch.names.first().map(String::as_str).unwrap_or_default();

    let scale_line = format!("scale: {}  # {}", DEFAULT_SCALE, join(&arch.scales));
    let out = template.replace("scale: %scale%", &scale_line);

    let mut type_line = format!("type: {}", first);
    if arch.names.len() > 1 {
        type_line.push_str(&format!("  # {}", join(&arch.names)));
    }
    for (key, value) in &arch.extras {
        type_line.push_str(&format!("\n  {}: {}", key, value));
    }
    let out = out.replace("type: %archname%", &type_line);

    out.replace("%archname%", first)
        .replace("%scale%", &format!("{}x", DEFAULT_SCALE))
}

/// A rendered option file, relative to the output directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedOptions {
    pub relative_path: PathBuf,
    pub contents: String,
}

/// Renders the paired and OTF templates for every architecture.
#[derive(Debug, Clone)]
pub struct OptionsGenerator {
    paired_template: String,
    otf_template: String,
    archs: Vec<ArchInfo>,
}

impl Default for OptionsGenerator {
    fn default() -> Self {
        Self::builtin()
    }
}

impl OptionsGenerator {
    /// Templates shipped with the crate
    pub fn builtin() -> Self {
        Self {
            paired_template: BUILTIN_PAIRED.to_string(),
            otf_template: BUILTIN_OTF.to_string(),
            archs: builtin_archs(),
        }
    }

    /// Load `default_options_paired.yml` and `default_options_otf.yml` from `dir`
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let read = |name: &str| {
            let path = dir.join(name);
            fs::read_to_string(&path).map_err(|e| DataError::io(&path, e))
        };
        Ok(Self {
            paired_template: read(PAIRED_TEMPLATE_FILE)?,
            otf_template: read(OTF_TEMPLATE_FILE)?,
            archs: builtin_archs(),
        })
    }

    pub fn with_archs(mut self, archs: Vec<ArchInfo>) -> Self {
        self.archs = archs;
        self
    }

    pub fn archs(&self) -> &[ArchInfo] {
        &self.archs
    }

    pub fn render(&self, arch: &ArchInfo) -> [RenderedOptions; 2] {
        let folder = Path::new(arch.folder_name());
        [
            RenderedOptions {
                relative_path: folder.join(format!("{}.yml", arch.folder_name())),
                contents: final_template(&self.paired_template, arch),
            },
            RenderedOptions {
                relative_path: folder.join(format!("{}_OTF.yml", arch.folder_name())),
                contents: final_template(&self.otf_template, arch),
            },
        ]
    }

    pub fn render_all(&self) -> Vec<RenderedOptions> {
        self.archs.iter().flat_map(|arch| self.render(arch)).collect()
    }

    /// Write every rendered file under `out_dir`, overwriting existing ones.
    /// Returns the written paths.
    pub fn generate(&self, out_dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let out_dir = out_dir.as_ref();
        let mut written = Vec::new();
        for rendered in self.render_all() {
            let path = out_dir.join(&rendered.relative_path);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| DataError::io(parent, e))?;
            }
            fs::write(&path, rendered.contents.as_bytes()).map_err(|e| DataError::io(&path, e))?;
            debug!("Wrote {}", path.display());
            written.push(path);
        }
        info!(
            "Generated {} option files for {} architectures in {}",
            written.len(),
            self.archs.len(),
            out_dir.display()
        );
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainOptions;

    const TEMPLATE: &str = "name: %scale%_%archname%\nscale: %scale%\nnetwork_g:\n  type: %archname%\n";

    #[test]
    fn test_final_template_single_name() {
        let arch = ArchInfo::new(&["ATD"], ALL_SCALES);
        assert_eq!(
            final_template(TEMPLATE, &arch),
            "name: 4x_ATD\nscale: 4  # 1, 2, 3, 4, 8\nnetwork_g:\n  type: ATD\n"
        );
    }

    #[test]
    fn test_final_template_names_and_extras() {
        let arch = ArchInfo::new(&["RealCUGAN", "RealCUGAN_lite"], &[2, 3, 4])
            .with_extra("pro", "true")
            .with_extra("fast", "false");
        assert_eq!(
            final_template(TEMPLATE, &arch),
            "name: 4x_RealCUGAN\nscale: 4  # 2, 3, 4\nnetwork_g:\n  type: RealCUGAN  # RealCUGAN, RealCUGAN_lite\n  pro: true\n  fast: false\n"
        );
    }

    #[test]
    fn test_folder_name() {
        assert_eq!(ArchInfo::new(&["DAT_2"], ALL_SCALES).folder_name(), "DAT");
        assert_eq!(ArchInfo::new(&["SPANPlus", "SPANPlus_S"], ALL_SCALES).folder_name(), "SPANPlus");
    }

    #[test]
    fn test_builtin_templates_render_valid_options() {
        let generator = OptionsGenerator::builtin();
        for arch in generator.archs() {
            for rendered in generator.render(arch) {
                assert!(!rendered.contents.contains('%'), "{:?}", rendered.relative_path);
                let opts = TrainOptions::from_yaml(&rendered.contents)
                    .unwrap_or_else(|e| panic!("{:?}: {}", rendered.relative_path, e));
                assert_eq!(opts.scale, DEFAULT_SCALE as usize);
                let network = opts.network_g.as_ref().unwrap();
                assert_eq!(network["type"], arch.names[0].as_str());
                assert!(opts.datasets.contains_key("train"));
            }
        }
    }

    #[test]
    fn test_extras_land_in_network_g() {
        let generator = OptionsGenerator::builtin();
        let arch = ArchInfo::new(&["RealPLKSR"], ALL_SCALES)
            .with_extra("upsampler", "dysample  # dysample, pixelshuffle, conv (1x only)");
        let [paired, _] = generator.render(&arch);
        let opts = TrainOptions::from_yaml(&paired.contents).unwrap();
        assert_eq!(opts.network_g.unwrap()["upsampler"], "dysample");
    }
}
