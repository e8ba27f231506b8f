//! Architecture model.
//!
//! An [`Architecture`] is a canonical token (`amd64`, `arm64`, `arm/v7`, ...)
//! with total mappings to the spellings used by apk, QEMU, and compiler
//! target triplets. Unknown names pass through unchanged so new ports work
//! without a table update; they just use the default fallbacks.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Every architecture the builder knows how to target, sorted.
const ALL: &[&str] = &[
    "386", "amd64", "arm/v6", "arm/v7", "arm64", "loong64", "ppc64le", "riscv64", "s390x",
];

/// Canonical architecture token.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Architecture(String);

/// OCI-style platform descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Architecture {
    /// Parse a name, accepting apk spellings as aliases for the canonical form.
    pub fn parse(name: &str) -> Self {
        let canonical = match name {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "armhf" => "arm/v6",
            "armv7" => "arm/v7",
            "x86" | "i386" | "i686" => "386",
            "loongarch64" => "loong64",
            other => other,
        };
        Self(canonical.to_string())
    }

    /// Parse a list of names.
    ///
    /// `["all"]` expands to every supported architecture and `["host"]` to
    /// the running platform. Otherwise the result is deduplicated and sorted
    /// so that multi-arch builds iterate in a reproducible order.
    pub fn parse_all<S: AsRef<str>>(names: &[S]) -> Vec<Self> {
        if let [only] = names {
            match only.as_ref() {
                "all" => return ALL.iter().map(|a| Self((*a).to_string())).collect(),
                "host" => return vec![Self::host()],
                _ => {}
            }
        }
        let mut archs: Vec<Self> = names.iter().map(|n| Self::parse(n.as_ref())).collect();
        archs.sort();
        archs.dedup();
        archs
    }

    /// The architecture this binary was compiled for.
    pub fn host() -> Self {
        let name = match std::env::consts::ARCH {
            "x86" => "386",
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "arm" => "arm/v7",
            "powerpc64" => "ppc64le",
            "loongarch64" => "loong64",
            other => other,
        };
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if binaries for `target` run on `self` without emulation.
    pub fn compatible(&self, target: &Architecture) -> bool {
        if self == target {
            return true;
        }
        match self.as_str() {
            "arm64" => matches!(target.as_str(), "arm/v6" | "arm/v7"),
            "amd64" => target.as_str() == "386",
            _ => false,
        }
    }

    /// Spelling used by apk (`--arch`, `/etc/apk/arch`, repository paths).
    pub fn to_apk(&self) -> String {
        match self.as_str() {
            "386" => "x86",
            "amd64" => "x86_64",
            "arm64" => "aarch64",
            "arm/v6" => "armhf",
            "arm/v7" => "armv7",
            "loong64" => "loongarch64",
            other => other,
        }
        .to_string()
    }

    /// Spelling used by QEMU user-mode emulators (`qemu-<arch>`).
    pub fn to_qemu(&self) -> String {
        match self.as_str() {
            "386" => "i386".to_string(),
            "amd64" => "x86_64".to_string(),
            "arm64" => "aarch64".to_string(),
            "arm/v6" | "arm/v7" => "arm".to_string(),
            "loong64" => "loongarch64".to_string(),
            _ => self.to_apk(),
        }
    }

    /// C-style target triplet, e.g. `x86_64-pc-linux-gnu` for suffix `gnu`.
    pub fn to_triplet(&self, suffix: &str) -> String {
        match self.as_str() {
            "386" => format!("i686-pc-linux-{suffix}"),
            "amd64" => format!("x86_64-pc-linux-{suffix}"),
            "arm64" => format!("aarch64-unknown-linux-{suffix}"),
            "arm/v6" => format!("arm-unknown-linux-{suffix}eabihf"),
            "arm/v7" => format!("armv7-unknown-linux-{suffix}eabihf"),
            "ppc64le" => format!("powerpc64le-unknown-linux-{suffix}"),
            "s390x" => format!("s390x-ibm-linux-{suffix}"),
            _ => self.default_triplet(suffix),
        }
    }

    /// Rust-style target triplet, e.g. `x86_64-unknown-linux-musl`.
    pub fn to_rust_triplet(&self, suffix: &str) -> String {
        match self.as_str() {
            "386" => format!("i686-unknown-linux-{suffix}"),
            "amd64" => format!("x86_64-unknown-linux-{suffix}"),
            "arm64" => format!("aarch64-unknown-linux-{suffix}"),
            "arm/v6" => format!("arm-unknown-linux-{suffix}eabihf"),
            "arm/v7" => format!("armv7-unknown-linux-{suffix}eabihf"),
            "ppc64le" => format!("powerpc64le-unknown-linux-{suffix}"),
            "s390x" => format!("s390x-unknown-linux-{suffix}"),
            _ => self.default_triplet(suffix),
        }
    }

    fn default_triplet(&self, suffix: &str) -> String {
        format!("{}-unknown-linux-{suffix}", self.to_qemu())
    }

    pub fn to_platform(&self) -> Platform {
        let (architecture, variant) = match self.as_str().split_once('/') {
            Some((arch, variant)) => (arch.to_string(), Some(variant.to_string())),
            None => (self.0.clone(), None),
        };
        Platform {
            os: "linux".to_string(),
            architecture,
            variant,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Architecture {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Architecture {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_apk_aliases() {
        assert_eq!(Architecture::parse("x86_64").as_str(), "amd64");
        assert_eq!(Architecture::parse("aarch64").as_str(), "arm64");
        assert_eq!(Architecture::parse("armhf").as_str(), "arm/v6");
        assert_eq!(Architecture::parse("armv7").as_str(), "arm/v7");
        assert_eq!(Architecture::parse("amd64").as_str(), "amd64");
    }

    #[test]
    fn test_unknown_passes_through() {
        let arch = Architecture::parse("mips64el");
        assert_eq!(arch.as_str(), "mips64el");
        assert_eq!(arch.to_apk(), "mips64el");
        assert_eq!(arch.to_triplet("gnu"), "mips64el-unknown-linux-gnu");
    }

    #[test]
    fn test_apk_round_trip() {
        for name in ALL {
            let arch = Architecture::parse(name);
            assert_eq!(Architecture::parse(&arch.to_apk()), arch, "{name}");
        }
    }

    #[test]
    fn test_compatible_reflexive() {
        for name in ALL {
            let arch = Architecture::parse(name);
            assert!(arch.compatible(&arch), "{name}");
        }
    }

    #[test]
    fn test_compatible_pairs() {
        let amd64 = Architecture::parse("amd64");
        let arm64 = Architecture::parse("arm64");
        assert!(amd64.compatible(&Architecture::parse("386")));
        assert!(arm64.compatible(&Architecture::parse("arm/v7")));
        assert!(arm64.compatible(&Architecture::parse("arm/v6")));
        assert!(!amd64.compatible(&arm64));
        assert!(!arm64.compatible(&amd64));
        assert!(!Architecture::parse("386").compatible(&amd64));
    }

    #[test]
    fn test_parse_all_sentinels() {
        let all = Architecture::parse_all(&["all"]);
        assert_eq!(all.len(), ALL.len());
        assert_eq!(all, Architecture::parse_all(&["all"]));
        let mut sorted = all.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(all, sorted);

        assert_eq!(Architecture::parse_all(&["host"]), vec![Architecture::host()]);
    }

    #[test]
    fn test_parse_all_dedups_and_sorts() {
        let archs = Architecture::parse_all(&["aarch64", "x86_64", "arm64"]);
        let names: Vec<&str> = archs.iter().map(|a| a.as_str()).collect();
        assert_eq!(names, vec!["amd64", "arm64"]);
    }

    #[test]
    fn test_triplets() {
        let armv7 = Architecture::parse("arm/v7");
        assert_eq!(armv7.to_triplet("gnu"), "armv7-unknown-linux-gnueabihf");
        assert_eq!(armv7.to_rust_triplet("musl"), "armv7-unknown-linux-musleabihf");
        assert_eq!(
            Architecture::parse("s390x").to_triplet("gnu"),
            "s390x-ibm-linux-gnu"
        );
        assert_eq!(
            Architecture::parse("riscv64").to_rust_triplet("gnu"),
            "riscv64-unknown-linux-gnu"
        );
    }

    #[test]
    fn test_platform() {
        let platform = Architecture::parse("arm/v7").to_platform();
        assert_eq!(platform.os, "linux");
        assert_eq!(platform.architecture, "arm");
        assert_eq!(platform.variant.as_deref(), Some("v7"));
        assert_eq!(Architecture::parse("amd64").to_platform().variant, None);
    }

    #[test]
    fn test_qemu_spelling() {
        assert_eq!(Architecture::parse("arm/v6").to_qemu(), "arm");
        assert_eq!(Architecture::parse("386").to_qemu(), "i386");
        assert_eq!(Architecture::parse("ppc64le").to_qemu(), "ppc64le");
    }
}
