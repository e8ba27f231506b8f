//! Production driver around the `apk` binary.

use anyhow::{Context, Result};

use super::{keys, write_list, PackageManager, KEYS_DIR, REPOSITORIES_FILE, WORLD_FILE};
use crate::context::BuildContext;
use crate::process::Cmd;

pub struct ApkDriver {
    client: reqwest::blocking::Client,
}

impl ApkDriver {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("layerkit/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("creating HTTP client")?;
        Ok(Self { client })
    }

    /// `apk add --initdb --arch <arch> --root <workdir>`
    pub fn init_db_command(&self, ctx: &BuildContext) -> Cmd {
        ctx.command(&ctx.options().apk)
            .args(["add", "--initdb", "--arch"])
            .arg(ctx.arch().to_apk())
            .arg("--root")
            .arg_path(ctx.workdir())
            .error_msg("apk could not initialize the package database")
    }

    /// `apk fix --root <workdir> --no-scripts --no-cache --update-cache --arch <arch>`
    pub fn fixate_command(&self, ctx: &BuildContext) -> Cmd {
        ctx.command(&ctx.options().apk)
            .args(["fix", "--root"])
            .arg_path(ctx.workdir())
            .args(["--no-scripts", "--no-cache", "--update-cache", "--arch"])
            .arg(ctx.arch().to_apk())
            .error_msg("apk could not resolve the world; check repositories and keys")
    }
}

impl PackageManager for ApkDriver {
    fn init_db(&self, ctx: &BuildContext) -> Result<()> {
        self.init_db_command(ctx).run()?;
        Ok(())
    }

    fn init_keyring(&self, ctx: &BuildContext, keyring: &[String]) -> Result<()> {
        let options = ctx.options();
        let references =
            keys::resolve_keyring(keyring, &options.extra_keys, &options.system_keyring_dirs)?;
        keys::install_keys(&ctx.path(KEYS_DIR), &references, &self.client)
    }

    fn init_repositories(&self, ctx: &BuildContext, repositories: &[String]) -> Result<()> {
        tracing::debug!(count = repositories.len(), "writing repositories");
        write_list(&ctx.path(REPOSITORIES_FILE), repositories)
    }

    fn init_world(&self, ctx: &BuildContext, packages: &[String]) -> Result<()> {
        tracing::debug!(count = packages.len(), "writing world");
        write_list(&ctx.path(WORLD_FILE), packages)
    }

    fn fixate_world(&self, ctx: &BuildContext) -> Result<()> {
        let output = self.fixate_command(ctx).run()?;
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            tracing::debug!(target: "apk", "{}", line);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apk::Stage;
    use crate::arch::Architecture;
    use crate::config::Contents;
    use crate::context::Options;
    use serial_test::serial;
    use tempfile::TempDir;

    fn options(arch: &str, host: &str) -> Options {
        let mut options = Options::new(Architecture::parse(arch));
        options.host = Architecture::parse(host);
        options
    }

    #[test]
    #[serial]
    fn test_native_commands() {
        let temp = TempDir::new().unwrap();
        let workdir = temp.path().join("root");
        let ctx = BuildContext::new(&workdir, options("amd64", "amd64")).unwrap();
        let driver = ApkDriver::new().unwrap();
        let root = workdir.display().to_string();

        let init = driver.init_db_command(&ctx);
        assert_eq!(init.program(), "apk");
        assert_eq!(
            init.get_args(),
            &["add", "--initdb", "--arch", "x86_64", "--root", root.as_str()]
        );

        let fix = driver.fixate_command(&ctx);
        assert_eq!(
            fix.get_args(),
            &[
                "fix",
                "--root",
                root.as_str(),
                "--no-scripts",
                "--no-cache",
                "--update-cache",
                "--arch",
                "x86_64",
            ]
        );
    }

    #[test]
    #[serial]
    fn test_foreign_fixation_goes_through_wrapper() {
        let temp = TempDir::new().unwrap();
        let ctx = BuildContext::new(&temp.path().join("root"), options("s390x", "amd64")).unwrap();
        let driver = ApkDriver::new().unwrap();

        let fix = driver.fixate_command(&ctx);
        assert_eq!(fix.program(), "proot");
        assert_eq!(&fix.get_args()[..4], &["-q", "qemu-s390x", "apk", "fix"]);
    }

    #[test]
    #[serial]
    fn test_init_repositories_and_world() {
        let temp = TempDir::new().unwrap();
        let ctx = BuildContext::new(&temp.path().join("root"), options("amd64", "amd64")).unwrap();
        let driver = ApkDriver::new().unwrap();

        driver
            .init_repositories(&ctx, &["https://a/main".into(), "https://a/community".into()])
            .unwrap();
        driver.init_world(&ctx, &["busybox".into()]).unwrap();

        assert_eq!(
            std::fs::read_to_string(ctx.path(REPOSITORIES_FILE)).unwrap(),
            "https://a/main\nhttps://a/community"
        );
        assert_eq!(std::fs::read_to_string(ctx.path(WORLD_FILE)).unwrap(), "busybox");
    }

    #[test]
    #[serial]
    fn test_unreachable_remote_key_fails_keyring_stage() {
        let temp = TempDir::new().unwrap();
        let mut opts = options("amd64", "amd64");
        opts.apk = "true".to_string();
        let ctx = BuildContext::new(&temp.path().join("root"), opts).unwrap();
        let driver = ApkDriver::new().unwrap();
        let contents = Contents {
            repositories: vec!["https://a/main".into()],
            keyring: vec!["https://127.0.0.1:1/k.rsa.pub".into()],
            packages: vec!["busybox".into()],
        };

        let err = driver.initialize(&ctx, &contents).unwrap_err();
        assert_eq!(err.downcast_ref::<Stage>(), Some(&Stage::Keyring));
        assert!(ctx.path(WORLD_FILE).is_file());
        assert!(!ctx.path(KEYS_DIR).join("k.rsa.pub").exists());
    }
}
