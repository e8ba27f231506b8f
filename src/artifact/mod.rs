//! Build outputs: the layer archive and the per-build summary.

pub mod layer;

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::arch::{Architecture, Platform};

pub use layer::{build_layer, Compression, LayerInfo};

pub const SUMMARY_FILE: &str = "layers.json";

pub fn layer_file_name(arch: &Architecture, compression: Compression) -> String {
    format!("layer-{}.{}", arch.to_apk(), compression.extension())
}

/// `extension` is the generator's, e.g. `spdx.json`.
pub fn sbom_file_name(arch: &Architecture, extension: &str) -> String {
    format!("sbom-{}.{}", arch.to_apk(), extension)
}

/// One architecture's entry in `layers.json`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchitectureArtifacts {
    pub architecture: Architecture,
    pub platform: Platform,
    pub layer: LayerInfo,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sboms: Vec<PathBuf>,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub run_as: String,
    pub packages: usize,
}

/// Write `layers.json` into `output_dir`.
pub fn write_summary(output_dir: &Path, artifacts: &[ArchitectureArtifacts]) -> Result<PathBuf> {
    let path = output_dir.join(SUMMARY_FILE);
    let json = serde_json::to_string_pretty(artifacts).context("serializing build summary")?;
    fs::write(&path, json + "\n").with_context(|| format!("writing '{}'", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_names_use_apk_spelling() {
        let arch = Architecture::parse("arm64");
        assert_eq!(layer_file_name(&arch, Compression::Gzip), "layer-aarch64.tar.gz");
        assert_eq!(layer_file_name(&arch, Compression::Zstd), "layer-aarch64.tar.zst");
        assert_eq!(sbom_file_name(&arch, "spdx.json"), "sbom-aarch64.spdx.json");
    }

    #[test]
    fn test_summary_is_json_array() {
        let temp = TempDir::new().unwrap();
        let arch = Architecture::parse("arm/v7");
        let artifacts = vec![ArchitectureArtifacts {
            platform: arch.to_platform(),
            architecture: arch,
            layer: LayerInfo {
                path: PathBuf::from("layer-armv7.tar.gz"),
                media_type: Compression::Gzip.media_type().to_string(),
                digest: "sha256:aa".into(),
                diff_id: "sha256:bb".into(),
                size: 10,
            },
            sboms: Vec::new(),
            tags: vec!["app:latest".into()],
            run_as: String::new(),
            packages: 3,
        }];

        let path = write_summary(temp.path(), &artifacts).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value[0]["architecture"], "arm/v7");
        assert_eq!(value[0]["platform"]["variant"], "v7");
        assert_eq!(value[0]["layer"]["diffId"], "sha256:bb");
        assert!(value[0].get("sboms").is_none());
    }
}
