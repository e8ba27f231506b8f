//! Reader for apk's installed-package database.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
    pub arch: String,
    pub license: String,
    pub origin: String,
    pub description: String,
    pub url: String,
    /// `Q1`-prefixed base64 SHA-1 of the control segment.
    pub checksum: String,
}

/// Parse the database text. Records are separated by blank lines; each line
/// is `<letter>:<value>`. Records without a `P:` line are dropped.
pub fn parse_installed(text: &str) -> Vec<InstalledPackage> {
    let mut packages = Vec::new();
    let mut current = InstalledPackage::default();

    for line in text.lines() {
        if line.trim().is_empty() {
            flush(&mut packages, &mut current);
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.to_string();
        match key {
            "P" => current.name = value,
            "V" => current.version = value,
            "A" => current.arch = value,
            "L" => current.license = value,
            "o" => current.origin = value,
            "T" => current.description = value,
            "U" => current.url = value,
            "C" => current.checksum = value,
            _ => {}
        }
    }
    flush(&mut packages, &mut current);
    packages
}

fn flush(packages: &mut Vec<InstalledPackage>, current: &mut InstalledPackage) {
    let package = std::mem::take(current);
    if !package.name.is_empty() {
        packages.push(package);
    }
}

pub fn read_installed(path: &Path) -> Result<Vec<InstalledPackage>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading installed database '{}'", path.display()))?;
    Ok(parse_installed(&text))
}
