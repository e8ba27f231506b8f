//! In-process package manager for tests.
//!
//! Writes the same files the real driver does, then "installs" the world by
//! fabricating an installed database and any files registered with
//! [`FakePackageManager::with_file`].

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::sync::Mutex;

use super::{
    write_list, PackageManager, Stage, ARCH_FILE, INSTALLED_DB, KEYS_DIR,
    REPOSITORIES_FILE, WORLD_FILE,
};
use crate::context::BuildContext;

const DEFAULT_VERSION: &str = "1.0.0-r0";

#[derive(Default)]
pub struct FakePackageManager {
    versions: BTreeMap<String, String>,
    files: BTreeMap<String, (Vec<u8>, u32)>,
    fail_at: Option<Stage>,
    calls: Mutex<Vec<String>>,
}

impl FakePackageManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Version reported for `package` once installed.
    pub fn with_version(mut self, package: &str, version: &str) -> Self {
        self.versions.insert(package.to_string(), version.to_string());
        self
    }

    /// File created under the working directory during fixation.
    pub fn with_file(mut self, path: &str, content: impl Into<Vec<u8>>, mode: u32) -> Self {
        self.files
            .insert(path.trim_start_matches('/').to_string(), (content.into(), mode));
        self
    }

    /// Make the given step fail.
    pub fn failing_at(mut self, stage: Stage) -> Self {
        self.fail_at = Some(stage);
        self
    }

    /// Steps invoked so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn enter(&self, stage: Stage, call: &str) -> Result<()> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(call.to_string());
        if self.fail_at == Some(stage) {
            bail!("injected failure in {}", call);
        }
        Ok(())
    }
}

impl PackageManager for FakePackageManager {
    fn init_db(&self, ctx: &BuildContext) -> Result<()> {
        self.enter(Stage::DbInit, "init-db")?;
        let db = ctx.path(INSTALLED_DB);
        if let Some(parent) = db.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&db, "")?;
        write_list(&ctx.path(ARCH_FILE), &[ctx.arch().to_apk()])
    }

    fn init_keyring(&self, ctx: &BuildContext, keyring: &[String]) -> Result<()> {
        self.enter(Stage::Keyring, "init-keyring")?;
        let dir = ctx.path(KEYS_DIR);
        fs::create_dir_all(&dir)?;
        for reference in [keyring, ctx.options().extra_keys.as_slice()].concat() {
            let name = reference.rsplit('/').next().unwrap_or(&reference);
            fs::write(dir.join(name), "")?;
        }
        Ok(())
    }

    fn init_repositories(&self, ctx: &BuildContext, repositories: &[String]) -> Result<()> {
        self.enter(Stage::Repositories, "init-repositories")?;
        write_list(&ctx.path(REPOSITORIES_FILE), repositories)
    }

    fn init_world(&self, ctx: &BuildContext, packages: &[String]) -> Result<()> {
        self.enter(Stage::World, "init-world")?;
        write_list(&ctx.path(WORLD_FILE), packages)
    }

    fn fixate_world(&self, ctx: &BuildContext) -> Result<()> {
        self.enter(Stage::Fixation, "fixate-world")?;
        let world = fs::read_to_string(ctx.path(WORLD_FILE)).context("reading world")?;
        let arch = ctx.arch().to_apk();

        let mut packages: Vec<&str> = world.lines().filter(|l| !l.is_empty()).collect();
        packages.sort_unstable();
        packages.dedup();

        let mut db = String::new();
        for package in packages {
            let version = self
                .versions
                .get(package)
                .map(String::as_str)
                .unwrap_or(DEFAULT_VERSION);
            db.push_str(&format!(
                "P:{package}\nV:{version}\nA:{arch}\nL:MIT\no:{package}\nT:{package} package\n\n"
            ));
        }
        fs::write(ctx.path(INSTALLED_DB), db)?;

        for (path, (content, mode)) in &self.files {
            let target = ctx.path(path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, content)?;
            fs::set_permissions(&target, fs::Permissions::from_mode(*mode))?;
        }
        Ok(())
    }
}
