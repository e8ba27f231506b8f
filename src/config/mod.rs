//! Declarative image configuration.
//!
//! The document is YAML by default and TOML when the file name ends in
//! `.toml`. Field names are kebab-case. A configuration may `include` one
//! base document which is merged underneath it (see [`include`]).

pub mod include;

use std::collections::BTreeMap;
use std::path::{Component, Path};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub use include::{load, merge};

/// Entrypoint command used for service bundles.
pub const SUPERVISOR_COMMAND: &str = "/bin/s6-svscan /sv";

/// Package that provides the supervisor.
pub const SUPERVISOR_PACKAGE: &str = "s6";

/// Root configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ImageConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<String>,
    #[serde(default)]
    pub contents: Contents,
    #[serde(default)]
    pub entrypoint: Entrypoint,
    #[serde(default)]
    pub accounts: Accounts,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<PathMutation>,
    #[serde(default)]
    pub os_release: OsRelease,
    /// Raw names; resolved with [`crate::arch::Architecture::parse_all`] at build time.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub archs: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Contents {
    #[serde(default)]
    pub repositories: Vec<String>,
    #[serde(default)]
    pub keyring: Vec<String>,
    #[serde(default)]
    pub packages: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntrypointKind {
    /// Run `command` directly.
    #[default]
    #[serde(alias = "")]
    Command,
    /// Start a supervisor that runs every entry of `services`.
    ServiceBundle,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Entrypoint {
    #[serde(default, rename = "type")]
    pub kind: EntrypointKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Accounts {
    /// Numeric uid or a username resolved after `/etc/passwd` is written.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub run_as: String,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub groups: Vec<Group>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct User {
    pub username: String,
    pub uid: u32,
    /// Zero means "unset"; it defaults to `uid` when accounts are written.
    #[serde(default)]
    pub gid: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Group {
    pub groupname: String,
    pub gid: u32,
    #[serde(default)]
    pub members: Vec<String>,
}

/// Kind of filesystem mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PathKind {
    Directory,
    EmptyFile,
    Hardlink,
    Symlink,
    Permissions,
}

impl PathKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PathKind::Directory => "directory",
            PathKind::EmptyFile => "empty-file",
            PathKind::Hardlink => "hardlink",
            PathKind::Symlink => "symlink",
            PathKind::Permissions => "permissions",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathMutation {
    pub path: String,
    #[serde(rename = "type")]
    pub kind: PathKind,
    #[serde(default)]
    pub uid: u32,
    #[serde(default)]
    pub gid: u32,
    #[serde(default = "default_permissions")]
    pub permissions: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(default)]
    pub recursive: bool,
}

fn default_permissions() -> u32 {
    0o755
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct OsRelease {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pretty_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub home_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bug_report_url: String,
}

impl ImageConfiguration {
    /// Check invariants and apply the service-bundle rewrite.
    ///
    /// For a service bundle this replaces `entrypoint.command` with the
    /// supervisor invocation and appends the supervisor package to
    /// `contents.packages`, so it mutates `self`.
    pub fn validate(&mut self) -> Result<()> {
        for (index, user) in self.accounts.users.iter().enumerate() {
            if user.username.trim().is_empty() {
                return Err(ConfigError::EmptyUsername { index }.into());
            }
            check_account_name("user", &user.username)?;
            if user.uid == 0 {
                return Err(ConfigError::ZeroUid {
                    username: user.username.clone(),
                }
                .into());
            }
        }

        for (index, group) in self.accounts.groups.iter().enumerate() {
            if group.groupname.trim().is_empty() {
                return Err(ConfigError::EmptyGroupName { index }.into());
            }
            check_account_name("group", &group.groupname)?;
            for member in &group.members {
                check_account_name("group member", member)?;
            }
            if group.gid == 0 {
                return Err(ConfigError::ZeroGid {
                    groupname: group.groupname.clone(),
                }
                .into());
            }
        }

        for (index, mutation) in self.paths.iter().enumerate() {
            if mutation.path.is_empty() {
                return Err(ConfigError::EmptyPath { index }.into());
            }
            check_inside_root(&mutation.path)?;
            if mutation.kind == PathKind::Hardlink {
                check_inside_root(&mutation.source)?;
            }
            if matches!(mutation.kind, PathKind::Hardlink | PathKind::Symlink)
                && mutation.source.is_empty()
            {
                return Err(ConfigError::MissingSource {
                    path: mutation.path.clone(),
                    kind: mutation.kind.as_str(),
                }
                .into());
            }
        }

        if self.entrypoint.kind == EntrypointKind::ServiceBundle {
            self.entrypoint.command = SUPERVISOR_COMMAND.to_string();
            self.contents.packages.push(SUPERVISOR_PACKAGE.to_string());
        }

        Ok(())
    }
}

/// Account names end up as passwd/group fields and home directory names.
fn check_account_name(kind: &'static str, name: &str) -> Result<()> {
    let invalid = name.trim().is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', ':', ',', '\n']);
    if invalid {
        return Err(ConfigError::InvalidAccountName {
            kind,
            name: name.to_string(),
        }
        .into());
    }
    Ok(())
}

/// Image paths are joined onto the working directory and must stay in it.
fn check_inside_root(path: &str) -> Result<()> {
    if Path::new(path).components().any(|c| c == Component::ParentDir) {
        return Err(ConfigError::PathEscapesRoot {
            path: path.to_string(),
        }
        .into());
    }
    Ok(())
}
