//! Busybox applet symlinks.
//!
//! Busybox provides many utilities through one binary; each utility is a
//! symlink to `/bin/busybox`.

use anyhow::{Context, Result};
use std::fs;

use crate::context::BuildContext;

pub const BUSYBOX: &str = "bin/busybox";
const LINK_TARGET: &str = "/bin/busybox";

/// Link every applet that does not already exist. Returns the number of
/// links created; nothing happens when busybox is not installed.
pub fn install_busybox_links(ctx: &BuildContext) -> Result<usize> {
    let busybox = ctx.path(BUSYBOX);
    if !busybox.is_file() {
        tracing::debug!("busybox not installed, skipping applet links");
        return Ok(0);
    }

    let applets = list_applets(ctx);
    let mut created = 0;
    for applet in &applets {
        let link = ctx.path(applet);
        // Standalone binaries from other packages take precedence.
        if link.exists() || link.is_symlink() {
            continue;
        }
        if let Some(parent) = link.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating '{}'", parent.display()))?;
        }
        std::os::unix::fs::symlink(LINK_TARGET, &link)
            .with_context(|| format!("linking '{}'", link.display()))?;
        created += 1;
    }

    tracing::info!(created, applets = applets.len(), "busybox applet links installed");
    Ok(created)
}

/// Applet paths relative to the image root, from `busybox --list-full`.
/// Falls back to a built-in table when busybox cannot be run.
fn list_applets(ctx: &BuildContext) -> Vec<String> {
    let cmd = ctx.image_command(BUSYBOX).arg("--list-full");
    match cmd.run() {
        Ok(output) => {
            let listed: Vec<String> = String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(|line| line.trim().trim_start_matches('/').to_string())
                .filter(|line| !line.is_empty() && line != BUSYBOX)
                .collect();
            if !listed.is_empty() {
                return listed;
            }
            tracing::debug!("busybox listed no applets, using built-in table");
        }
        Err(e) => {
            tracing::debug!(error = %format!("{:#}", e), "busybox --list-full failed, using built-in table");
        }
    }
    fallback_applets()
}

fn fallback_applets() -> Vec<String> {
    COMMON_APPLETS
        .iter()
        .map(|applet| {
            let dir = if SBIN_APPLETS.contains(applet) { "sbin" } else { "bin" };
            format!("{}/{}", dir, applet)
        })
        .collect()
}

/// Applets that belong in /sbin.
const SBIN_APPLETS: &[&str] = &[
    "adduser",
    "addgroup",
    "delgroup",
    "deluser",
    "ifconfig",
    "ip",
    "nologin",
    "route",
    "start-stop-daemon",
    "sysctl",
    "syslogd",
];

/// Applets linked when busybox cannot list its own.
const COMMON_APPLETS: &[&str] = &[
    "addgroup",
    "adduser",
    "ash",
    "awk",
    "base64",
    "basename",
    "cat",
    "chgrp",
    "chmod",
    "chown",
    "cp",
    "cut",
    "date",
    "dd",
    "delgroup",
    "deluser",
    "df",
    "diff",
    "dirname",
    "du",
    "echo",
    "env",
    "expr",
    "false",
    "find",
    "grep",
    "gzip",
    "head",
    "hostname",
    "id",
    "ifconfig",
    "ip",
    "kill",
    "less",
    "ln",
    "ls",
    "mkdir",
    "mktemp",
    "mv",
    "nc",
    "nologin",
    "ping",
    "printf",
    "ps",
    "pwd",
    "readlink",
    "realpath",
    "rm",
    "rmdir",
    "route",
    "sed",
    "sh",
    "sha256sum",
    "sleep",
    "sort",
    "start-stop-daemon",
    "stat",
    "sysctl",
    "syslogd",
    "tail",
    "tar",
    "tee",
    "test",
    "touch",
    "tr",
    "true",
    "uname",
    "uniq",
    "vi",
    "wc",
    "wget",
    "which",
    "whoami",
    "xargs",
    "yes",
    "zcat",
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Architecture;
    use crate::context::Options;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn context(temp: &TempDir) -> BuildContext {
        BuildContext::new(&temp.path().join("root"), Options::new(Architecture::host())).unwrap()
    }

    fn install(ctx: &BuildContext, content: &str, mode: u32) {
        let path = ctx.path(BUSYBOX);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
    }

    #[test]
    fn test_absent_busybox_is_skipped() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp);
        assert_eq!(install_busybox_links(&ctx).unwrap(), 0);
        assert!(!ctx.path("bin").exists());
    }

    #[test]
    fn test_links_from_list_full() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp);
        install(
            &ctx,
            "#!/bin/sh\nprintf 'bin/ash\\nbin/busybox\\nusr/bin/env\\nsbin/ifconfig\\n'\n",
            0o755,
        );

        assert_eq!(install_busybox_links(&ctx).unwrap(), 3);
        assert_eq!(fs::read_link(ctx.path("usr/bin/env")).unwrap(), PathBuf::from(LINK_TARGET));
        assert!(ctx.path("sbin/ifconfig").is_symlink());
    }

    #[test]
    fn test_existing_files_are_not_replaced() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp);
        install(&ctx, "#!/bin/sh\nprintf 'bin/ash\\nbin/sh\\n'\n", 0o755);
        fs::write(ctx.path("bin/sh"), "real shell").unwrap();

        assert_eq!(install_busybox_links(&ctx).unwrap(), 1);
        assert_eq!(fs::read_to_string(ctx.path("bin/sh")).unwrap(), "real shell");
    }

    #[test]
    fn test_unrunnable_busybox_uses_table() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp);
        install(&ctx, "not a program", 0o644);

        let created = install_busybox_links(&ctx).unwrap();
        assert_eq!(created, COMMON_APPLETS.len());
        assert!(ctx.path("sbin/nologin").is_symlink());
        assert!(ctx.path("bin/ls").is_symlink());
    }
}
