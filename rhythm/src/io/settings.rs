//! Project persistence settings stored in `<project>/rhythm.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::{SaveOptions, Verbosity};

pub const SETTINGS_FILENAME: &str = "rhythm.toml";

/// Defaults applied to every save in a project (TOML).
///
/// This file is intended to be edited by humans. Missing fields fall back to
/// the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreSettings {
    /// Replace existing entries and data files instead of skipping.
    pub overwrite: bool,

    /// Compress arrays in run-data containers.
    pub use_compression: bool,

    /// zlib level, 0 (store) to 9 (smallest).
    pub compression_level: u32,

    /// Keep insertion order of run-data keys.
    pub track_order: bool,

    /// 0 = silent, 1 = warnings, 2 = all notices.
    pub verbosity: Verbosity,

    /// Warn when a freshly written data file looks older than this.
    pub stale_after_ms: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            overwrite: true,
            use_compression: true,
            compression_level: 4,
            track_order: true,
            verbosity: Verbosity::Warnings,
            stale_after_ms: 1_000,
        }
    }
}

impl StoreSettings {
    pub fn validate(&self) -> Result<()> {
        if self.compression_level > 9 {
            return Err(anyhow!(
                "compression_level must be between 0 and 9 (got {})",
                self.compression_level
            ));
        }
        if self.stale_after_ms == 0 {
            return Err(anyhow!("stale_after_ms must be > 0"));
        }
        Ok(())
    }

    pub fn save_options(&self) -> SaveOptions {
        SaveOptions {
            overwrite: self.overwrite,
            use_compression: self.use_compression,
            compression_level: self.compression_level,
            track_order: self.track_order,
            verbosity: self.verbosity,
            stale_after: Duration::from_millis(self.stale_after_ms),
        }
    }
}

/// Load settings from a TOML file.
///
/// If the file is missing, returns `StoreSettings::default()`.
pub fn load_settings(path: &Path) -> Result<StoreSettings> {
    if !path.exists() {
        let settings = StoreSettings::default();
        settings.validate()?;
        return Ok(settings);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let settings: StoreSettings =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    settings.validate()?;
    Ok(settings)
}

/// Atomically write settings to disk (temp file + rename).
pub fn write_settings(path: &Path, settings: &StoreSettings) -> Result<()> {
    settings.validate()?;
    let mut buf = toml::to_string_pretty(settings).context("serialize settings toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf, "toml.tmp")
        .with_context(|| format!("write settings {}", path.display()))
}
