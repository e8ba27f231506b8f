//! Build orchestrator.
//!
//! One build turns a configuration into a populated working directory:
//!
//! 1. validate the configuration (service bundles rewrite the entrypoint)
//! 2. install packages through the [`PackageManager`]
//! 3. derive package-version tags
//! 4. write accounts
//! 5. apply path mutations
//! 6. link busybox applets, if busybox is installed
//! 7. refresh the linker cache, if `ldconfig` is installed
//! 8. write `/etc/os-release`
//! 9. write the supervision tree
//!
//! Each step runs only if the previous one succeeded. Nothing is rolled
//! back on failure; a failed working directory should be discarded.

pub mod busybox;
pub mod ldconfig;
pub mod os_release;
pub mod supervision;
pub mod tags;

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::accounts;
use crate::apk::{InstalledPackage, PackageManager};
use crate::config::ImageConfiguration;
use crate::context::BuildContext;
use crate::paths;

/// Result of a successful build.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub workdir: PathBuf,
    /// Configured tags followed by any package-version tags.
    pub tags: Vec<String>,
    /// Numeric when a symbolic run-as user was found in `/etc/passwd`.
    pub run_as: String,
    /// The configuration after validation and account defaults.
    pub config: ImageConfiguration,
    pub packages: Vec<InstalledPackage>,
}

pub struct Builder<P: PackageManager> {
    package_manager: P,
}

impl<P: PackageManager> Builder<P> {
    pub fn new(package_manager: P) -> Self {
        Self { package_manager }
    }

    pub fn package_manager(&self) -> &P {
        &self.package_manager
    }

    pub fn build(&self, ctx: &mut BuildContext, config: &ImageConfiguration) -> Result<BuildOutput> {
        let mut config = config.clone();
        config.validate().context("validating configuration")?;
        ctx.set_environment(config.environment.clone());
        let ctx: &BuildContext = ctx;

        tracing::info!(arch = %ctx.arch(), workdir = %ctx.workdir().display(), "building image");

        self.package_manager
            .initialize(ctx, &config.contents)
            .context("installing packages")?;
        let packages = self
            .package_manager
            .installed_packages(ctx)
            .context("reading installed packages")?;
        tracing::info!(count = packages.len(), "packages installed");

        let options = ctx.options();
        let mut image_tags = options.tags.clone();
        if let Some(package) = &options.package_version_tag {
            image_tags.extend(tags::package_version_tags(
                &options.tags,
                &packages,
                package,
                options.package_version_tag_stem,
                &options.package_version_tag_prefix,
            ));
        }

        accounts::mutate_accounts(ctx, &mut config.accounts).context("mutating accounts")?;
        paths::mutate_paths(ctx, &config.paths).context("mutating paths")?;
        busybox::install_busybox_links(ctx).context("installing busybox links")?;
        ldconfig::refresh_linker_cache(ctx)?;
        os_release::write_os_release(ctx, &config.os_release).context("writing os-release")?;
        supervision::write_supervision_tree(ctx, &config.entrypoint.services)
            .context("writing supervision tree")?;

        tracing::info!(arch = %ctx.arch(), "image filesystem ready");
        Ok(BuildOutput {
            workdir: ctx.workdir().to_path_buf(),
            tags: image_tags,
            run_as: config.accounts.run_as.clone(),
            config,
            packages,
        })
    }
}
