//! Signing key discovery and installation.
//!
//! Keys land in `etc/apk/keys/` under the basename of their reference so apk
//! can verify package signatures during fixation.

use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::join::join_results;

/// Where a key reference points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    File(PathBuf),
    Https(String),
}

impl KeySource {
    /// Classify a reference by scheme. Bare paths are local files.
    pub fn classify(reference: &str) -> Result<Self> {
        if let Some(path) = reference.strip_prefix("file://") {
            return Ok(KeySource::File(PathBuf::from(path)));
        }
        if reference.starts_with("https://") {
            return Ok(KeySource::Https(reference.to_string()));
        }
        if let Some((scheme, _)) = reference.split_once("://") {
            bail!("key '{}' uses unsupported scheme '{}'", reference, scheme);
        }
        Ok(KeySource::File(PathBuf::from(reference)))
    }

    fn file_name(&self) -> Option<String> {
        match self {
            KeySource::File(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            KeySource::Https(url) => url
                .split(['?', '#'])
                .next()
                .and_then(|path| path.rsplit('/').next())
                .filter(|name| !name.is_empty())
                .map(str::to_string),
        }
    }
}

/// Decide which keys to install.
///
/// Configured entries win. Without any, every `*.pub` file in the existing
/// `system_dirs` is used; directories that do not exist are skipped, and
/// finding no key at all is an error. `extra` is always appended.
pub fn resolve_keyring(
    configured: &[String],
    extra: &[String],
    system_dirs: &[PathBuf],
) -> Result<Vec<String>> {
    let mut keys = if configured.is_empty() {
        scan_system_keys(system_dirs)?
    } else {
        configured.to_vec()
    };
    keys.extend(extra.iter().cloned());
    Ok(keys)
}

fn scan_system_keys(dirs: &[PathBuf]) -> Result<Vec<String>> {
    let mut keys = Vec::new();
    for dir in dirs {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(dir = %dir.display(), "system keyring directory missing");
                continue;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("reading keyring directory '{}'", dir.display()))
            }
        };

        let mut found: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "pub"))
            .map(|path| path.display().to_string())
            .collect();
        found.sort();
        keys.extend(found);
    }

    if keys.is_empty() {
        let searched = dirs
            .iter()
            .map(|d| d.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        bail!("no keyring configured and no *.pub keys found in {}", searched);
    }
    Ok(keys)
}

/// Keep the first reference for every destination file name.
///
/// System directories often carry the same key names; each key file must
/// have exactly one writer.
fn unique_by_file_name(references: &[String]) -> Vec<&String> {
    let mut seen = HashSet::new();
    references
        .iter()
        .filter(|reference| {
            let Some(name) = KeySource::classify(reference).ok().and_then(|s| s.file_name()) else {
                return true;
            };
            if seen.insert(name) {
                true
            } else {
                tracing::warn!(key = %reference, "key with the same file name already selected, skipping");
                false
            }
        })
        .collect()
}

/// Fetch every key concurrently and write it into `keys_dir`.
///
/// All fetches are attempted; any failure fails the step.
pub fn install_keys(
    keys_dir: &Path,
    references: &[String],
    client: &reqwest::blocking::Client,
) -> Result<()> {
    fs::create_dir_all(keys_dir)
        .with_context(|| format!("creating keys directory '{}'", keys_dir.display()))?;

    let references = unique_by_file_name(references);
    let results: Vec<Result<()>> = references
        .par_iter()
        .map(|reference| install_key(keys_dir, reference, client))
        .collect();
    join_results(results)?;

    tracing::info!(count = references.len(), "signing keys installed");
    Ok(())
}

fn install_key(keys_dir: &Path, reference: &str, client: &reqwest::blocking::Client) -> Result<()> {
    let source = KeySource::classify(reference)?;
    let Some(name) = source.file_name() else {
        bail!("key '{}' has no file name", reference);
    };

    let content = match &source {
        KeySource::File(path) => {
            fs::read(path).with_context(|| format!("reading key '{}'", path.display()))?
        }
        KeySource::Https(url) => fetch(client, url)?,
    };

    if !String::from_utf8_lossy(&content).contains("BEGIN PUBLIC KEY") {
        bail!("key '{}' is not a PEM public key", reference);
    }

    let key_path = keys_dir.join(&name);
    fs::write(&key_path, &content)
        .with_context(|| format!("writing key '{}'", key_path.display()))?;
    tracing::debug!(key = %reference, path = %key_path.display(), "installed key");
    Ok(())
}

fn fetch(client: &reqwest::blocking::Client, url: &str) -> Result<Vec<u8>> {
    let response = client
        .get(url)
        .send()
        .with_context(|| format!("fetching key '{}'", url))?;
    let status = response.status();
    if !status.is_success() {
        bail!("fetching key '{}': server returned {}", url, status);
    }
    let body = response
        .bytes()
        .with_context(|| format!("reading key body from '{}'", url))?;
    Ok(body.to_vec())
}
