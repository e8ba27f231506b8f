//! s6 supervision tree for service-bundle entrypoints.
//!
//! Each service gets `sv/<name>/run`, an execline script that s6-svscan
//! starts and restarts.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;

use crate::context::BuildContext;

pub const SERVICE_DIR: &str = "sv";
const RUN_HEADER: &str = "#!/bin/execlineb -P";

/// Write one run script per service. No services, no tree.
pub fn write_supervision_tree(
    ctx: &BuildContext,
    services: &BTreeMap<String, String>,
) -> Result<()> {
    if services.is_empty() {
        return Ok(());
    }

    let root = ctx.path(SERVICE_DIR);
    for (name, definition) in services {
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            bail!("invalid service name '{}'", name);
        }
        let dir = root.join(name);
        fs::create_dir_all(&dir).with_context(|| format!("creating '{}'", dir.display()))?;

        let run = dir.join("run");
        fs::write(&run, format!("{}\n{}\n", RUN_HEADER, definition))
            .with_context(|| format!("writing '{}'", run.display()))?;
        fs::set_permissions(&run, fs::Permissions::from_mode(0o755))?;
        tracing::debug!(service = %name, "wrote service");
    }

    tracing::info!(count = services.len(), "supervision tree written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Architecture;
    use crate::context::Options;
    use tempfile::TempDir;

    fn context(temp: &TempDir) -> BuildContext {
        BuildContext::new(&temp.path().join("root"), Options::new(Architecture::host())).unwrap()
    }

    #[test]
    fn test_writes_run_scripts() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp);
        let services = BTreeMap::from([
            ("nginx".to_string(), "nginx -g \"daemon off;\"".to_string()),
            ("php-fpm".to_string(), "php-fpm81 -F".to_string()),
        ]);

        write_supervision_tree(&ctx, &services).unwrap();

        let run = ctx.path("sv/nginx/run");
        assert_eq!(
            fs::read_to_string(&run).unwrap(),
            "#!/bin/execlineb -P\nnginx -g \"daemon off;\"\n"
        );
        assert_eq!(fs::metadata(&run).unwrap().permissions().mode() & 0o777, 0o755);
        assert!(ctx.path("sv/php-fpm/run").is_file());
    }

    #[test]
    fn test_no_services_writes_nothing() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp);
        write_supervision_tree(&ctx, &BTreeMap::new()).unwrap();
        assert!(!ctx.path(SERVICE_DIR).exists());
    }

    #[test]
    fn test_service_name_cannot_escape() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp);
        let services = BTreeMap::from([("../etc".to_string(), "true".to_string())]);
        assert!(write_supervision_tree(&ctx, &services).is_err());
    }
}
