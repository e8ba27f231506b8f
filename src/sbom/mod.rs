//! Software bill of materials.
//!
//! Generators read the installed package list and the finished layer; the
//! document layout belongs to each format.

pub mod spdx;

use anyhow::Result;
use std::path::Path;

use crate::apk::InstalledPackage;
use crate::arch::Architecture;
use crate::artifact::LayerInfo;
use crate::config::OsRelease;
use crate::error::ConfigError;

/// Everything a generator may describe.
pub struct SbomInput<'a> {
    /// Release metadata with defaults applied.
    pub os_release: &'a OsRelease,
    pub arch: &'a Architecture,
    pub packages: &'a [InstalledPackage],
    pub layer: &'a LayerInfo,
    pub source_date_epoch: u64,
}

pub trait SbomGenerator: Send + Sync {
    /// Format name as given on the command line.
    fn key(&self) -> &'static str;

    /// File extension, e.g. `spdx.json`.
    fn extension(&self) -> &'static str;

    fn generate(&self, input: &SbomInput<'_>, path: &Path) -> Result<()>;
}

pub fn generator_for(format: &str) -> Result<Box<dyn SbomGenerator>> {
    match format {
        "spdx" => Ok(Box::new(spdx::Spdx)),
        other => Err(ConfigError::UnsupportedSbomFormat(other.to_string()).into()),
    }
}

/// Resolve every requested format up front so a typo fails before building.
pub fn generators_for(formats: &[String]) -> Result<Vec<Box<dyn SbomGenerator>>> {
    formats.iter().map(|format| generator_for(format)).collect()
}
