//! Typed configuration errors.
//!
//! Everything else in the crate propagates `anyhow::Error`; configuration
//! problems get their own type so callers can tell "fix your config" apart
//! from a failed build with `err.downcast_ref::<ConfigError>()`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("user #{index} has an empty username")]
    EmptyUsername { index: usize },
    #[error("user '{username}' has uid 0; declared users must have a non-zero uid")]
    ZeroUid { username: String },
    #[error("group #{index} has an empty name")]
    EmptyGroupName { index: usize },
    #[error("group '{groupname}' has gid 0; declared groups must have a non-zero gid")]
    ZeroGid { groupname: String },
    #[error("{kind} name '{name}' is empty or contains '/', ':', ',' or a newline")]
    InvalidAccountName { kind: &'static str, name: String },
    #[error("'{path}' leaves the image root through '..'")]
    PathEscapesRoot { path: String },
    #[error("path mutation #{index} has an empty path")]
    EmptyPath { index: usize },
    #[error("path mutation for '{path}' is a {kind} and needs a source")]
    MissingSource { path: String, kind: &'static str },
    #[error("invalid source date epoch '{value}': {reason}")]
    SourceDateEpoch { value: String, reason: String },
    #[error("'{base}' sets include itself; only one level of include is supported")]
    NestedInclude { base: PathBuf },
    #[error("unsupported SBOM format '{0}' (expected: spdx)")]
    UnsupportedSbomFormat(String),
    #[error(
        "target architecture {target} cannot run natively on {host} and emulation is disabled"
    )]
    EmulationRequired { host: String, target: String },
}
