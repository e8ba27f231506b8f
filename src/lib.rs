//! Daemonless, reproducible container image layer builder for apk-based
//! distributions.
//!
//! A declarative [`ImageConfiguration`] is turned into a populated root
//! filesystem per target architecture, then packed into a deterministic
//! layer archive with an optional SBOM.
//!
//! # Architecture
//!
//! ```text
//! config ──▶ build::Builder ──┬──▶ apk::PackageManager   (install, fixate)
//!                             ├──▶ accounts              (/etc/passwd, /etc/group)
//!                             └──▶ paths                 (directories, links, modes)
//!                                        │
//!                                        ▼
//!                             artifact::layer ──▶ sbom
//! ```
//!
//! Every build runs inside a [`BuildContext`], which owns the working
//! directory for the session and routes foreign-architecture commands
//! through the emulation wrapper.
//!
//! # Example
//!
//! ```rust,ignore
//! use layerkit::{apk::ApkDriver, arch::Architecture, build::Builder};
//! use layerkit::context::{BuildContext, Options};
//!
//! let config = layerkit::config::load("image.yaml")?;
//! let mut ctx = BuildContext::new(workdir, Options::new(Architecture::parse("arm64")))?;
//! let output = Builder::new(ApkDriver::new()?).build(&mut ctx, &config)?;
//! ```

pub mod accounts;
pub mod apk;
pub mod arch;
pub mod artifact;
pub mod build;
pub mod config;
pub mod context;
pub mod error;
pub mod join;
pub mod paths;
pub mod preflight;
pub mod process;
pub mod sbom;

pub use arch::Architecture;
pub use build::{BuildOutput, Builder};
pub use config::ImageConfiguration;
pub use context::{BuildContext, Options};
pub use error::ConfigError;
