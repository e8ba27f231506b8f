//! External process helpers.

use anyhow::{bail, Context, Result};
use std::fmt;
use std::path::Path;
use std::process::{Command, Output};

/// Builder for an external command.
///
/// Kept as plain data until [`Cmd::run`] so callers (and tests) can inspect
/// the exact argv, e.g. to check that emulation wrapping happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    error_msg: Option<String>,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            error_msg: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }

    pub fn envs<I, K, V>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.envs
            .extend(envs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Hint appended to the error when the command fails.
    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    /// Run to completion, capturing output. Non-zero exit is an error that
    /// carries stderr.
    pub fn run(&self) -> Result<Output> {
        tracing::debug!(command = %self, "running");
        let output = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .output()
            .with_context(|| format!("spawning '{}'", self.program))?;

        if output.status.success() {
            return Ok(output);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut msg = format!(
            "'{}' exited with {}\n{}\n{}",
            self,
            output.status,
            stdout.trim(),
            stderr.trim()
        );
        if let Some(hint) = &self.error_msg {
            msg.push('\n');
            msg.push_str(hint);
        }
        bail!(msg.trim_end().to_string())
    }
}

impl fmt::Display for Cmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Check if a program is on `PATH` (or is an existing path).
pub fn exists(program: &str) -> bool {
    which::which(program).is_ok()
}

/// Fail with a readable message if `path` is missing.
pub fn ensure_exists(path: &Path, what: &str) -> Result<()> {
    if !path.exists() {
        bail!("{} not found at {}", what, path.display());
    }
    Ok(())
}
