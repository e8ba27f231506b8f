//! Package manager driver.
//!
//! The lifecycle for one build is fixed:
//!
//! ```text
//! init_db ──┬── init_keyring ──────┬── fixate_world ── normalize_scripts_tar
//!           ├── init_repositories ─┤
//!           └── init_world ────────┘
//! ```
//!
//! The three middle steps write disjoint files and run concurrently; all of
//! their errors are reported. Every fatal failure carries a [`Stage`]
//! context so callers can tell which step broke.
//!
//! [`ApkDriver`] drives the real `apk` binary. [`FakePackageManager`]
//! implements the same contract in-process for tests.

pub mod driver;
pub mod fake;
pub mod installed;
pub mod keys;
pub mod scripts;

use anyhow::{Context, Result};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::config::Contents;
use crate::context::BuildContext;
use crate::join::join_results;

pub use driver::ApkDriver;
pub use fake::FakePackageManager;
pub use installed::InstalledPackage;

pub const KEYS_DIR: &str = "etc/apk/keys";
pub const REPOSITORIES_FILE: &str = "etc/apk/repositories";
pub const WORLD_FILE: &str = "etc/apk/world";
pub const ARCH_FILE: &str = "etc/apk/arch";
pub const INSTALLED_DB: &str = "lib/apk/db/installed";
pub const SCRIPTS_TAR: &str = "lib/apk/db/scripts.tar";

/// Package manager lifecycle step, attached as context to failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    DbInit,
    Keyring,
    Repositories,
    World,
    Fixation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::DbInit => write!(f, "db-init"),
            Stage::Keyring => write!(f, "keyring"),
            Stage::Repositories => write!(f, "repositories"),
            Stage::World => write!(f, "world"),
            Stage::Fixation => write!(f, "fixation"),
        }
    }
}

/// Contract between the build orchestrator and a package manager.
pub trait PackageManager: Send + Sync {
    /// Create an empty package database under the working directory.
    fn init_db(&self, ctx: &BuildContext) -> Result<()>;

    /// Install signing keys. `keyring` is the configured list; operator
    /// extras come from the build options.
    fn init_keyring(&self, ctx: &BuildContext, keyring: &[String]) -> Result<()>;

    fn init_repositories(&self, ctx: &BuildContext, repositories: &[String]) -> Result<()>;

    fn init_world(&self, ctx: &BuildContext, packages: &[String]) -> Result<()>;

    /// Resolve and install the world against the configured repositories.
    fn fixate_world(&self, ctx: &BuildContext) -> Result<()>;

    /// Pin timestamps in the post-install scripts archive, if there is one.
    fn normalize_scripts_tar(&self, ctx: &BuildContext) -> Result<()> {
        let path = ctx.path(SCRIPTS_TAR);
        if !scripts::normalize_scripts_tar(&path, ctx.source_date_epoch())? {
            tracing::debug!(path = %path.display(), "no scripts archive to normalize");
        }
        Ok(())
    }

    fn installed_packages(&self, ctx: &BuildContext) -> Result<Vec<InstalledPackage>> {
        installed::read_installed(&ctx.path(INSTALLED_DB))
    }

    /// Run the whole lifecycle.
    fn initialize(&self, ctx: &BuildContext, contents: &Contents) -> Result<()> {
        let options = ctx.options();
        let repositories = [contents.repositories.as_slice(), &options.extra_repos].concat();
        let packages = [contents.packages.as_slice(), &options.extra_packages].concat();

        tracing::info!(arch = %ctx.arch(), "initializing package database");
        self.init_db(ctx).context(Stage::DbInit)?;

        let (keyring, (repos, world)) = rayon::join(
            || {
                self.init_keyring(ctx, &contents.keyring)
                    .context(Stage::Keyring)
            },
            || {
                rayon::join(
                    || {
                        self.init_repositories(ctx, &repositories)
                            .context(Stage::Repositories)
                    },
                    || self.init_world(ctx, &packages).context(Stage::World),
                )
            },
        );
        join_results([keyring, repos, world])?;

        tracing::info!(packages = packages.len(), "fixating world");
        self.fixate_world(ctx).context(Stage::Fixation)?;

        self.normalize_scripts_tar(ctx)
            .context("normalizing post-install scripts archive")?;
        Ok(())
    }
}

/// Write `entries` newline-joined, creating parent directories.
pub(crate) fn write_list(path: &Path, entries: &[String]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory '{}'", parent.display()))?;
    }
    fs::write(path, entries.join("\n"))
        .with_context(|| format!("writing '{}'", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Architecture;
    use crate::context::Options;
    use tempfile::TempDir;

    fn context(temp: &TempDir) -> BuildContext {
        let mut options = Options::new(Architecture::host());
        options.extra_repos = vec!["https://extra/main".into()];
        options.extra_packages = vec!["extra-pkg".into()];
        BuildContext::new(&temp.path().join("root"), options).unwrap()
    }

    fn contents() -> Contents {
        Contents {
            repositories: vec!["https://example/main".into()],
            keyring: vec!["test.rsa.pub".into()],
            packages: vec!["busybox".into()],
        }
    }

    #[test]
    fn test_stage_labels() {
        assert_eq!(Stage::DbInit.to_string(), "db-init");
        assert_eq!(Stage::Fixation.to_string(), "fixation");
    }

    #[test]
    fn test_initialize_runs_steps_in_order() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp);
        let pm = FakePackageManager::new();

        pm.initialize(&ctx, &contents()).unwrap();

        let calls = pm.calls();
        assert_eq!(calls.first().map(String::as_str), Some("init-db"));
        assert_eq!(calls.last().map(String::as_str), Some("fixate-world"));
        assert_eq!(calls.len(), 5);

        let repos = fs::read_to_string(ctx.path(REPOSITORIES_FILE)).unwrap();
        assert_eq!(repos, "https://example/main\nhttps://extra/main");
        let world = fs::read_to_string(ctx.path(WORLD_FILE)).unwrap();
        assert_eq!(world, "busybox\nextra-pkg");
    }

    #[test]
    fn test_fixation_failure_is_labelled() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp);
        let pm = FakePackageManager::new().failing_at(Stage::Fixation);

        let err = pm.initialize(&ctx, &contents()).unwrap_err();
        assert_eq!(err.downcast_ref::<Stage>(), Some(&Stage::Fixation));
    }

    #[test]
    fn test_db_init_failure_stops_pipeline() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp);
        let pm = FakePackageManager::new().failing_at(Stage::DbInit);

        let err = pm.initialize(&ctx, &contents()).unwrap_err();
        assert_eq!(err.downcast_ref::<Stage>(), Some(&Stage::DbInit));
        assert_eq!(pm.calls(), vec!["init-db".to_string()]);
    }

    #[test]
    fn test_branch_failure_is_joined_after_all_branches_ran() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp);
        let pm = FakePackageManager::new().failing_at(Stage::World);

        let err = pm.initialize(&ctx, &contents()).unwrap_err();
        assert_eq!(err.downcast_ref::<Stage>(), Some(&Stage::World));
        let calls = pm.calls();
        assert!(calls.contains(&"init-keyring".to_string()));
        assert!(calls.contains(&"init-repositories".to_string()));
        assert!(!calls.contains(&"fixate-world".to_string()));
    }
}
