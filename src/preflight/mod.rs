//! Preflight checks for build validation.
//!
//! Validates that the host has the tools a build will invoke before any
//! working directory is touched.

use anyhow::{bail, Result};

use crate::context::Options;
use crate::process;

/// Tools every build needs, with the package that provides them.
///
/// Each tuple is (command_name, package_name).
pub fn required_tools(options: &Options) -> Result<Vec<(String, String)>> {
    let mut tools = vec![(options.apk.clone(), "apk-tools".to_string())];
    if options.needs_emulation()? {
        tools.push((options.emulation.wrapper.clone(), options.emulation.wrapper.clone()));
        tools.push((format!("qemu-{}", options.arch.to_qemu()), "qemu-user".to_string()));
    }
    Ok(tools)
}

/// Check that specific tools are available.
///
/// Returns an error listing every missing tool and its package.
pub fn check_required_tools<S: AsRef<str>>(tools: &[(S, S)]) -> Result<()> {
    let missing: Vec<_> = tools
        .iter()
        .filter(|(tool, _)| !process::exists(tool.as_ref()))
        .collect();

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t.as_ref(), p.as_ref()))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

/// Check everything a build with `options` will run.
pub fn check_host_tools(options: &Options) -> Result<()> {
    check_required_tools(&required_tools(options)?)
}
