//! Build options and the per-architecture build session.

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::arch::Architecture;
use crate::error::ConfigError;
use crate::process::Cmd;

/// Environment variable that pins the reproducibility epoch.
pub const SOURCE_DATE_EPOCH_ENV: &str = "SOURCE_DATE_EPOCH";

/// Default emulation launcher (`proot -q qemu-<arch> ...`).
pub const DEFAULT_EMULATION_WRAPPER: &str = "proot";

/// Where keys are looked up when the configuration lists none.
pub const DEFAULT_SYSTEM_KEYRING_DIRS: &[&str] = &["/etc/apk/keys", "/usr/share/apk/keys"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Emulation {
    /// Allow routing foreign-arch execution through `wrapper`.
    pub enabled: bool,
    pub wrapper: String,
}

impl Default for Emulation {
    fn default() -> Self {
        Self {
            enabled: true,
            wrapper: DEFAULT_EMULATION_WRAPPER.to_string(),
        }
    }
}

/// Inputs for one architecture's build. Immutable once the session starts.
#[derive(Debug, Clone)]
pub struct Options {
    pub arch: Architecture,
    pub host: Architecture,
    /// Seconds since the Unix epoch used for every timestamp we emit.
    pub source_date_epoch: u64,
    pub tags: Vec<String>,
    pub emulation: Emulation,
    pub sbom_formats: Vec<String>,
    pub extra_keys: Vec<String>,
    pub extra_repos: Vec<String>,
    pub extra_packages: Vec<String>,
    /// Installed package whose version becomes an additional tag.
    pub package_version_tag: Option<String>,
    pub package_version_tag_stem: bool,
    pub package_version_tag_prefix: String,
    /// apk binary. Under emulation it runs unrooted through the wrapper,
    /// so it must be built for the target architecture (a static apk).
    pub apk: String,
    pub system_keyring_dirs: Vec<PathBuf>,
}

impl Options {
    pub fn new(arch: Architecture) -> Self {
        let system_keyring_dirs = vec![
            PathBuf::from(DEFAULT_SYSTEM_KEYRING_DIRS[0]),
            PathBuf::from(DEFAULT_SYSTEM_KEYRING_DIRS[1]).join(arch.to_apk()),
        ];
        Self {
            arch,
            host: Architecture::host(),
            source_date_epoch: 0,
            tags: Vec::new(),
            emulation: Emulation::default(),
            sbom_formats: Vec::new(),
            extra_keys: Vec::new(),
            extra_repos: Vec::new(),
            extra_packages: Vec::new(),
            package_version_tag: None,
            package_version_tag_stem: false,
            package_version_tag_prefix: String::new(),
            apk: "apk".to_string(),
            system_keyring_dirs,
        }
    }

    /// Whether foreign-arch execution must go through the emulation wrapper.
    pub fn needs_emulation(&self) -> Result<bool> {
        if self.host.compatible(&self.arch) {
            return Ok(false);
        }
        if !self.emulation.enabled {
            return Err(ConfigError::EmulationRequired {
                host: self.host.to_string(),
                target: self.arch.to_string(),
            }
            .into());
        }
        Ok(true)
    }
}

/// Apply the `SOURCE_DATE_EPOCH` override to a configured epoch.
///
/// The environment value, when present and non-empty, always wins.
pub fn resolve_source_date_epoch(env_value: Option<&str>, configured: u64) -> Result<u64> {
    let Some(raw) = env_value else {
        return Ok(configured);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(configured);
    }
    trimmed.parse::<u64>().map_err(|e| {
        anyhow::Error::from(ConfigError::SourceDateEpoch {
            value: raw.to_string(),
            reason: e.to_string(),
        })
    })
}

/// One build session: a target architecture and the working directory it
/// owns exclusively for the session's lifetime.
pub struct BuildContext {
    options: Options,
    workdir: PathBuf,
    environment: BTreeMap<String, String>,
    emulated: bool,
    privileged: bool,
    ownership: Mutex<BTreeMap<PathBuf, (u32, u32)>>,
    _lock: WorkdirLock,
}

impl BuildContext {
    /// Start a session rooted at `workdir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Fails if another session holds the working directory, if
    /// `SOURCE_DATE_EPOCH` is malformed, or if the target needs emulation
    /// and emulation is disabled.
    pub fn new(workdir: &Path, mut options: Options) -> Result<Self> {
        let env_epoch = std::env::var(SOURCE_DATE_EPOCH_ENV).ok();
        options.source_date_epoch =
            resolve_source_date_epoch(env_epoch.as_deref(), options.source_date_epoch)?;
        let emulated = options.needs_emulation()?;

        fs::create_dir_all(workdir)
            .with_context(|| format!("creating working directory '{}'", workdir.display()))?;
        let lock = WorkdirLock::acquire(workdir)?;

        // SAFETY: geteuid has no preconditions and cannot fail.
        let privileged = unsafe { libc::geteuid() } == 0;

        tracing::debug!(
            workdir = %workdir.display(),
            arch = %options.arch,
            emulated,
            privileged,
            epoch = options.source_date_epoch,
            "build session started"
        );

        Ok(Self {
            options,
            workdir: workdir.to_path_buf(),
            environment: BTreeMap::new(),
            emulated,
            privileged,
            ownership: Mutex::new(BTreeMap::new()),
            _lock: lock,
        })
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn arch(&self) -> &Architecture {
        &self.options.arch
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn source_date_epoch(&self) -> u64 {
        self.options.source_date_epoch
    }

    pub fn emulated(&self) -> bool {
        self.emulated
    }

    pub fn privileged(&self) -> bool {
        self.privileged
    }

    /// Exported to every process launched through [`BuildContext::command`].
    pub fn set_environment(&mut self, environment: BTreeMap<String, String>) {
        self.environment = environment;
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    /// Resolve an image path (`/etc/passwd` or `etc/passwd`) under the
    /// working directory.
    pub fn path(&self, image_path: &str) -> PathBuf {
        self.workdir.join(image_path.trim_start_matches('/'))
    }

    /// Command for `program`, routed through the emulation wrapper when the
    /// target cannot run natively on the host.
    pub fn command(&self, program: &str) -> Cmd {
        let cmd = if self.emulated {
            Cmd::new(&self.options.emulation.wrapper)
                .arg("-q")
                .arg(format!("qemu-{}", self.options.arch.to_qemu()))
                .arg(program)
        } else {
            Cmd::new(program)
        };
        cmd.envs(self.environment.clone())
    }

    /// Command for a binary installed in the image, e.g. `sbin/ldconfig`.
    ///
    /// Under emulation the wrapper is rooted at the working directory
    /// (`-r`), so the binary and its dynamic loader resolve inside the
    /// image rather than on the host.
    pub fn image_command(&self, image_path: &str) -> Cmd {
        let cmd = if self.emulated {
            Cmd::new(&self.options.emulation.wrapper)
                .arg("-q")
                .arg(format!("qemu-{}", self.options.arch.to_qemu()))
                .arg("-r")
                .arg_path(&self.workdir)
                .arg(format!("/{}", image_path.trim_start_matches('/')))
        } else {
            Cmd::new(self.path(image_path).display().to_string())
        };
        cmd.envs(self.environment.clone())
    }

    /// The image root as seen by a command from [`BuildContext::image_command`].
    pub fn image_root(&self) -> PathBuf {
        if self.emulated {
            PathBuf::from("/")
        } else {
            self.workdir.clone()
        }
    }

    /// Home directories are not chowned when emulating without privilege.
    pub fn skip_home_chown(&self) -> bool {
        self.emulated && !self.privileged
    }

    /// Set ownership of `path` (not following symlinks).
    ///
    /// The ownership is also recorded for the archive: an unprivileged
    /// process cannot hand files to other users, so a refused chown is not
    /// an error there.
    pub fn set_owner(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
        match std::os::unix::fs::lchown(path, Some(uid), Some(gid)) {
            Ok(()) => {
                self.record_owner(path, uid, gid);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied && !self.privileged => {
                tracing::trace!(path = %path.display(), uid, gid, "chown refused, recording");
                self.record_owner(path, uid, gid);
                Ok(())
            }
            Err(e) => Err(e)
                .with_context(|| format!("chown {}:{} '{}'", uid, gid, path.display())),
        }
    }

    fn record_owner(&self, path: &Path, uid: u32, gid: u32) {
        let relative = path.strip_prefix(&self.workdir).unwrap_or(path).to_path_buf();
        let mut ownership = self
            .ownership
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        ownership.insert(relative, (uid, gid));
    }

    /// Ownership the archive should carry for `path`.
    ///
    /// Recorded ownership wins. Otherwise a privileged session trusts the
    /// filesystem and an unprivileged one assumes root, since everything it
    /// created is owned by the invoking user rather than the image's.
    pub fn effective_owner(&self, path: &Path, metadata: &fs::Metadata) -> (u32, u32) {
        let relative = path.strip_prefix(&self.workdir).unwrap_or(path);
        let ownership = self
            .ownership
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(owner) = ownership.get(relative) {
            return *owner;
        }
        if self.privileged {
            (metadata.uid(), metadata.gid())
        } else {
            (0, 0)
        }
    }
}

/// Advisory lock on `<workdir>.lock`, removed on drop.
struct WorkdirLock {
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

impl WorkdirLock {
    fn acquire(workdir: &Path) -> Result<Self> {
        let mut name = workdir
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "workdir".into());
        name.push(".lock");
        let path = workdir.with_file_name(name);

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("opening lock file '{}'", path.display()))?;
        if file.try_lock_exclusive().is_err() {
            bail!(
                "working directory '{}' is in use by another build (lock: {})",
                workdir.display(),
                path.display()
            );
        }
        Ok(Self { file, path })
    }
}

impl Drop for WorkdirLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
