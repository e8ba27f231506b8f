//! `/etc/os-release` generation.

use anyhow::{Context, Result};
use std::fs;

use crate::config::OsRelease;
use crate::context::BuildContext;

pub const OS_RELEASE: &str = "etc/os-release";
pub const DEFAULT_NAME: &str = "layerkit-generated image";
pub const DEFAULT_ID: &str = "unknown";

/// Outcome of [`write_os_release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsReleaseOutcome {
    Written,
    /// A file installed by a package was kept.
    AlreadyPresent,
}

/// Fill unset fields with the built-in defaults.
pub fn with_defaults(release: &OsRelease) -> OsRelease {
    let mut release = release.clone();
    if release.id.is_empty() {
        release.id = DEFAULT_ID.to_string();
    }
    if release.name.is_empty() {
        release.name = DEFAULT_NAME.to_string();
    }
    release
}

/// Render the file. Only non-empty fields are emitted.
pub fn render(release: &OsRelease) -> String {
    let fields = [
        ("ID", &release.id, false),
        ("NAME", &release.name, true),
        ("PRETTY_NAME", &release.pretty_name, true),
        ("VERSION_ID", &release.version_id, false),
        ("HOME_URL", &release.home_url, false),
        ("BUG_REPORT_URL", &release.bug_report_url, false),
    ];

    let mut out = String::new();
    for (key, value, quoted) in fields {
        if value.is_empty() {
            continue;
        }
        if quoted {
            out.push_str(&format!("{}=\"{}\"\n", key, value.replace('"', "\\\"")));
        } else {
            out.push_str(&format!("{}={}\n", key, value));
        }
    }
    out
}

/// Write the release file unless a package already provided one and the
/// configuration did not name the image.
pub fn write_os_release(ctx: &BuildContext, configured: &OsRelease) -> Result<OsReleaseOutcome> {
    let release = with_defaults(configured);
    let path = ctx.path(OS_RELEASE);

    if path.exists() && release.name == DEFAULT_NAME {
        tracing::warn!(
            path = %path.display(),
            "os-release already present and no name configured, keeping it"
        );
        return Ok(OsReleaseOutcome::AlreadyPresent);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, render(&release))
        .with_context(|| format!("writing '{}'", path.display()))?;
    tracing::debug!(id = %release.id, name = %release.name, "wrote os-release");
    Ok(OsReleaseOutcome::Written)
}
