//! Account mutation: `/etc/group`, `/etc/passwd` and home directories.
//!
//! Entries installed by packages are kept and configured ones appended. The
//! group file and the passwd file (with home provisioning) are written on
//! separate rayon branches.

pub mod group;
pub mod passwd;

use anyhow::{bail, Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;

use crate::config::Accounts;
use crate::context::BuildContext;
use crate::join::join_results;

pub use group::{GroupEntry, GroupFile};
pub use passwd::{UserEntry, UserFile};

pub const PASSWD_FILE: &str = "etc/passwd";
pub const GROUP_FILE: &str = "etc/group";

const USER_INFO: &str = "Account created by layerkit";
const USER_SHELL: &str = "/bin/sh";
const NO_HOME: &str = "/dev/null";

/// Write the account files and resolve a symbolic `run-as`.
///
/// `accounts` is updated in place: defaulted gids and the resolved run-as
/// uid are visible to the caller afterwards.
pub fn mutate_accounts(ctx: &BuildContext, accounts: &mut Accounts) -> Result<()> {
    for user in &mut accounts.users {
        if user.gid == 0 {
            tracing::warn!(
                user = %user.username,
                uid = user.uid,
                "gid not set, defaulting to uid"
            );
            user.gid = user.uid;
        }
    }

    let configured: &Accounts = accounts;
    let (groups, users) = rayon::join(
        || write_groups(ctx, configured).context("writing group file"),
        || write_users(ctx, configured).context("writing passwd file"),
    );
    let users = match users {
        Ok(users) => {
            groups?;
            users
        }
        Err(e) => return join_results([groups, Err(e)]),
    };

    if let Some(uid) = resolve_run_as(&accounts.run_as, &users) {
        tracing::debug!(run_as = %accounts.run_as, uid, "resolved run-as user");
        accounts.run_as = uid.to_string();
    }
    Ok(())
}

fn write_groups(ctx: &BuildContext, accounts: &Accounts) -> Result<()> {
    let path = ctx.path(GROUP_FILE);
    let mut file = GroupFile::load(&path)?;
    for group in &accounts.groups {
        tracing::info!(group = %group.groupname, gid = group.gid, "adding group");
        file.entries.push(GroupEntry {
            name: group.groupname.clone(),
            password: "x".to_string(),
            gid: group.gid,
            members: group.members.clone(),
        });
    }
    file.save(&path)
}

fn write_users(ctx: &BuildContext, accounts: &Accounts) -> Result<UserFile> {
    let path = ctx.path(PASSWD_FILE);
    let mut file = UserFile::load(&path)?;
    for user in &accounts.users {
        tracing::info!(user = %user.username, uid = user.uid, gid = user.gid, "adding user");
        file.entries.push(UserEntry {
            username: user.username.clone(),
            password: "x".to_string(),
            uid: user.uid,
            gid: user.gid,
            info: USER_INFO.to_string(),
            home_dir: format!("/home/{}", user.username),
            shell: USER_SHELL.to_string(),
        });
    }
    file.save(&path)?;

    for entry in &file.entries {
        provision_home(ctx, entry)?;
    }
    Ok(file)
}

/// Create a missing home directory owned by the account with mode 0700.
///
/// Existing directories are left alone: system accounts may point home at
/// `/` or `/bin`.
fn provision_home(ctx: &BuildContext, entry: &UserEntry) -> Result<()> {
    if entry.home_dir.is_empty() || entry.home_dir == NO_HOME {
        return Ok(());
    }
    let home = ctx.path(&entry.home_dir);
    match fs::symlink_metadata(&home) {
        Ok(metadata) if metadata.is_dir() => return Ok(()),
        Ok(_) => bail!(
            "home directory '{}' of user '{}' exists and is not a directory",
            entry.home_dir,
            entry.username
        ),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("inspecting '{}'", home.display()));
        }
    }

    fs::create_dir_all(&home).with_context(|| format!("creating '{}'", home.display()))?;
    fs::set_permissions(&home, fs::Permissions::from_mode(0o700))
        .with_context(|| format!("chmod '{}'", home.display()))?;
    if ctx.skip_home_chown() {
        tracing::debug!(home = %entry.home_dir, "emulated without privilege, not chowning home");
    } else {
        ctx.set_owner(&home, entry.uid, entry.gid)?;
    }
    Ok(())
}

/// Numeric uid for a symbolic run-as. `None` when it is empty, already
/// numeric, or unknown.
fn resolve_run_as(run_as: &str, users: &UserFile) -> Option<u32> {
    if run_as.is_empty() || run_as.parse::<u32>().is_ok() {
        return None;
    }
    let found = users.find(run_as).map(|entry| entry.uid);
    if found.is_none() {
        tracing::warn!(run_as = %run_as, "run-as user not found in passwd, leaving as is");
    }
    found
}
