//! Loading configuration documents and resolving `include`.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::ImageConfiguration;
use crate::error::ConfigError;

/// Load a configuration from a local path or an `https://` URL.
///
/// If the document sets `include`, the base is loaded (relative to the
/// including document's directory when it is a local relative path) and
/// merged underneath. The base itself may not include anything.
pub fn load(location: &str) -> Result<ImageConfiguration> {
    let config = load_document(location)?;
    let Some(include) = config.include.clone() else {
        return Ok(config);
    };

    let base_location = resolve_include(location, &include);
    let base = load_document(&base_location)
        .with_context(|| format!("loading '{}' included from '{}'", base_location, location))?;
    if base.include.is_some() {
        return Err(ConfigError::NestedInclude {
            base: PathBuf::from(base_location),
        }
        .into());
    }

    tracing::debug!(base = %base_location, "merging included configuration");
    let mut merged = merge(base, config);
    merged.include = None;
    Ok(merged)
}

/// Merge `overlay` on top of `base`.
///
/// Lists are concatenated base-first with no de-duplication; maps are
/// key-merged with `overlay` winning; scalar strings are replaced only when
/// the overlay value is non-empty.
pub fn merge(base: ImageConfiguration, overlay: ImageConfiguration) -> ImageConfiguration {
    let mut merged = base;

    merged.contents.repositories.extend(overlay.contents.repositories);
    merged.contents.keyring.extend(overlay.contents.keyring);
    merged.contents.packages.extend(overlay.contents.packages);

    if overlay.entrypoint.kind != Default::default() {
        merged.entrypoint.kind = overlay.entrypoint.kind;
    }
    override_scalar(&mut merged.entrypoint.command, overlay.entrypoint.command);
    merged.entrypoint.services.extend(overlay.entrypoint.services);

    override_scalar(&mut merged.accounts.run_as, overlay.accounts.run_as);
    merged.accounts.users.extend(overlay.accounts.users);
    merged.accounts.groups.extend(overlay.accounts.groups);

    merged.paths.extend(overlay.paths);

    let release = overlay.os_release;
    override_scalar(&mut merged.os_release.id, release.id);
    override_scalar(&mut merged.os_release.name, release.name);
    override_scalar(&mut merged.os_release.pretty_name, release.pretty_name);
    override_scalar(&mut merged.os_release.version_id, release.version_id);
    override_scalar(&mut merged.os_release.home_url, release.home_url);
    override_scalar(&mut merged.os_release.bug_report_url, release.bug_report_url);

    if !overlay.archs.is_empty() {
        merged.archs = overlay.archs;
    }
    merged.environment.extend(overlay.environment);
    merged.annotations.extend(overlay.annotations);
    merged.include = overlay.include;

    merged
}

fn override_scalar(target: &mut String, value: String) {
    if !value.is_empty() {
        *target = value;
    }
}

fn is_remote(location: &str) -> bool {
    location.starts_with("https://") || location.starts_with("http://")
}

fn resolve_include(location: &str, include: &str) -> String {
    if is_remote(include) || Path::new(include).is_absolute() || is_remote(location) {
        return include.to_string();
    }
    Path::new(location)
        .parent()
        .map(|dir| dir.join(include))
        .unwrap_or_else(|| PathBuf::from(include))
        .display()
        .to_string()
}

fn load_document(location: &str) -> Result<ImageConfiguration> {
    let text = if is_remote(location) {
        fetch_remote(location)?
    } else {
        fs::read_to_string(location)
            .with_context(|| format!("reading configuration '{}'", location))?
    };

    if location.ends_with(".toml") {
        toml::from_str(&text).with_context(|| format!("parsing configuration '{}'", location))
    } else {
        serde_yaml::from_str(&text)
            .with_context(|| format!("parsing configuration '{}'", location))
    }
}

fn fetch_remote(url: &str) -> Result<String> {
    let response = reqwest::blocking::get(url)
        .with_context(|| format!("fetching configuration '{}'", url))?
        .error_for_status()
        .with_context(|| format!("fetching configuration '{}'", url))?;
    response
        .text()
        .with_context(|| format!("reading configuration body from '{}'", url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path.display().to_string()
    }

    #[test]
    fn test_include_concatenates_lists_base_first() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "base.yaml",
            r#"
contents:
  repositories: [https://base/main]
  keyring: [base.pub]
  packages: [busybox, ca-certificates]
os-release: { id: alpine, name: Base }
"#,
        );
        let top = write(
            temp.path(),
            "image.yaml",
            r#"
include: base.yaml
contents:
  repositories: [https://top/main]
  keyring: [top.pub]
  packages: [busybox, curl]
os-release: { name: Top }
"#,
        );

        let config = load(&top).unwrap();
        assert_eq!(
            config.contents.repositories,
            vec!["https://base/main", "https://top/main"]
        );
        assert_eq!(config.contents.keyring, vec!["base.pub", "top.pub"]);
        assert_eq!(
            config.contents.packages,
            vec!["busybox", "ca-certificates", "busybox", "curl"]
        );
        assert_eq!(config.os_release.id, "alpine");
        assert_eq!(config.os_release.name, "Top");
        assert!(config.include.is_none());
    }

    #[test]
    fn test_nested_include_is_rejected() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "root.yaml", "contents: { packages: [a] }\n");
        write(temp.path(), "base.yaml", "include: root.yaml\n");
        let top = write(temp.path(), "image.yaml", "include: base.yaml\n");

        let err = load(&top).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::NestedInclude { .. })
        ));
    }

    #[test]
    fn test_load_toml() {
        let temp = TempDir::new().unwrap();
        let path = write(
            temp.path(),
            "image.toml",
            r#"
[contents]
packages = ["busybox"]

[accounts]
run-as = "65532"
"#,
        );
        let config = load(&path).unwrap();
        assert_eq!(config.contents.packages, vec!["busybox"]);
        assert_eq!(config.accounts.run_as, "65532");
    }

    #[test]
    fn test_merge_keeps_base_scalars_when_overlay_empty() {
        let mut base = ImageConfiguration::default();
        base.accounts.run_as = "app".into();
        base.archs = vec!["x86_64".into()];
        let merged = merge(base, ImageConfiguration::default());
        assert_eq!(merged.accounts.run_as, "app");
        assert_eq!(merged.archs, vec!["x86_64"]);
    }
}
