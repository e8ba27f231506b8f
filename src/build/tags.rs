//! Tags derived from an installed package's version.

use crate::apk::InstalledPackage;

/// Extra tags for `tags` using the version of `package`.
///
/// The repository part of each tag is kept and the tag replaced by the
/// version, with `+` turned into `_` (not allowed in tags) and `prefix`
/// prepended. With `stem`, every shorter version stem is added as well.
/// Returns an empty list, with a warning, when `package` is not installed.
pub fn package_version_tags(
    tags: &[String],
    installed: &[InstalledPackage],
    package: &str,
    stem: bool,
    prefix: &str,
) -> Vec<String> {
    let Some(found) = installed.iter().find(|p| p.name == package) else {
        tracing::warn!(package, "package for version tag is not installed");
        return Vec::new();
    };

    let versions = if stem {
        version_stems(&found.version)
    } else {
        vec![found.version.clone()]
    };

    let mut out = Vec::new();
    for tag in tags {
        let repository = repository_of(tag);
        for version in &versions {
            let derived = format!("{}:{}{}", repository, prefix, version.replace('+', "_"));
            if !out.contains(&derived) {
                out.push(derived);
            }
        }
    }
    out
}

/// `1.2.3-r4` → `1.2.3-r4`, `1.2.3`, `1.2`, `1`.
pub fn version_stems(version: &str) -> Vec<String> {
    let mut stems = vec![version.to_string()];
    let base = version.split_once('-').map_or(version, |(base, _)| base);
    let parts: Vec<&str> = base.split('.').collect();
    for len in (1..=parts.len()).rev() {
        let stem = parts[..len].join(".");
        if !stems.contains(&stem) {
            stems.push(stem);
        }
    }
    stems
}

/// Everything before the tag separator. A `:` inside a registry host
/// (`host:5000/app`) is not a tag separator.
fn repository_of(reference: &str) -> &str {
    match reference.rfind(':') {
        Some(index) if !reference[index + 1..].contains('/') => &reference[..index],
        _ => reference,
    }
}
