//! Path mutations applied after package installation.
//!
//! Every path is rooted under the working directory. Creation handlers only
//! create; mode and ownership are applied afterwards for every kind except
//! `permissions`, which is nothing but that step.

use anyhow::{bail, Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use walkdir::WalkDir;

use crate::config::{PathKind, PathMutation};
use crate::context::BuildContext;

/// Apply `mutations` in order, stopping at the first failure.
pub fn mutate_paths(ctx: &BuildContext, mutations: &[PathMutation]) -> Result<()> {
    for mutation in mutations {
        apply(ctx, mutation).with_context(|| {
            format!("applying {} mutation to '{}'", mutation.kind.as_str(), mutation.path)
        })?;
    }
    Ok(())
}

pub fn apply(ctx: &BuildContext, mutation: &PathMutation) -> Result<()> {
    let target = ctx.path(&mutation.path);
    tracing::debug!(path = %mutation.path, kind = mutation.kind.as_str(), "mutating path");

    match mutation.kind {
        PathKind::Directory => create_directory(ctx, &target, mutation)?,
        PathKind::EmptyFile => create_empty_file(&target)?,
        PathKind::Hardlink => create_hardlink(&target, &ctx.path(&mutation.source))?,
        PathKind::Symlink => create_symlink(&target, &mutation.source)?,
        PathKind::Permissions => {}
    }
    set_mode_and_owner(ctx, &target, mutation.permissions, mutation.uid, mutation.gid)
}

fn create_directory(ctx: &BuildContext, target: &Path, mutation: &PathMutation) -> Result<()> {
    fs::create_dir_all(target)?;
    fs::set_permissions(target, fs::Permissions::from_mode(mutation.permissions))?;

    if mutation.recursive {
        for entry in WalkDir::new(target).min_depth(1) {
            let entry = entry?;
            set_mode_and_owner(
                ctx,
                entry.path(),
                mutation.permissions,
                mutation.uid,
                mutation.gid,
            )?;
        }
    }
    Ok(())
}

fn create_parent(target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating '{}'", parent.display()))?;
    }
    Ok(())
}

fn create_empty_file(target: &Path) -> Result<()> {
    create_parent(target)?;
    fs::File::create(target).with_context(|| format!("creating '{}'", target.display()))?;
    Ok(())
}

/// Replace whatever non-directory sits at `target`.
fn clear(target: &Path) -> Result<()> {
    match fs::symlink_metadata(target) {
        Ok(metadata) if metadata.is_dir() => {
            bail!("'{}' is a directory", target.display())
        }
        Ok(_) => fs::remove_file(target)
            .with_context(|| format!("removing existing '{}'", target.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("inspecting '{}'", target.display())),
    }
}

fn create_hardlink(target: &Path, source: &Path) -> Result<()> {
    create_parent(target)?;
    clear(target)?;
    fs::hard_link(source, target)
        .with_context(|| format!("linking '{}' to '{}'", target.display(), source.display()))
}

fn create_symlink(target: &Path, source: &str) -> Result<()> {
    create_parent(target)?;
    clear(target)?;
    std::os::unix::fs::symlink(source, target)
        .with_context(|| format!("symlinking '{}' -> '{}'", target.display(), source))
}

/// Symlinks have no mode of their own on Linux; only their owner is set.
fn set_mode_and_owner(ctx: &BuildContext, path: &Path, mode: u32, uid: u32, gid: u32) -> Result<()> {
    let metadata =
        fs::symlink_metadata(path).with_context(|| format!("'{}' does not exist", path.display()))?;
    if !metadata.file_type().is_symlink() {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .with_context(|| format!("chmod {:o} '{}'", mode, path.display()))?;
    }
    ctx.set_owner(path, uid, gid)
}
