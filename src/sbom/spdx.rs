//! SPDX 2.3 JSON documents.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::{SbomGenerator, SbomInput};
use crate::apk::InstalledPackage;

const SPDX_VERSION: &str = "SPDX-2.3";
const NOASSERTION: &str = "NOASSERTION";
const LAYER_ID: &str = "SPDXRef-Package-layer";

pub struct Spdx;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    #[serde(rename = "SPDXID")]
    spdx_id: String,
    name: String,
    spdx_version: String,
    creation_info: CreationInfo,
    data_license: String,
    document_namespace: String,
    document_describes: Vec<String>,
    packages: Vec<Package>,
    relationships: Vec<Relationship>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreationInfo {
    created: String,
    creators: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Package {
    #[serde(rename = "SPDXID")]
    spdx_id: String,
    name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    version_info: String,
    files_analyzed: bool,
    license_concluded: String,
    license_declared: String,
    download_location: String,
    copyright_text: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    description: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    homepage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    supplier: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    checksums: Vec<Checksum>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    external_refs: Vec<ExternalRef>,
}

#[derive(Debug, Serialize)]
struct Checksum {
    algorithm: String,
    #[serde(rename = "checksumValue")]
    value: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExternalRef {
    reference_category: String,
    reference_type: String,
    reference_locator: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Relationship {
    spdx_element_id: String,
    relationship_type: String,
    related_spdx_element: String,
}

/// SPDX identifiers allow letters, digits, `.` and `-` only.
fn spdx_id(kind: &str, name: &str, version: &str) -> String {
    let raw = format!("SPDXRef-{}-{}-{}", kind, name, version);
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '-' })
        .collect()
}

fn or_noassertion(value: &str) -> String {
    if value.is_empty() {
        NOASSERTION.to_string()
    } else {
        value.to_string()
    }
}

fn purl(package: &InstalledPackage, distro: &str, distro_version: &str) -> String {
    let mut purl = format!("pkg:apk/{}/{}@{}", distro, package.name, package.version);
    let mut qualifiers = Vec::new();
    if !package.arch.is_empty() {
        qualifiers.push(format!("arch={}", package.arch));
    }
    if !distro_version.is_empty() {
        qualifiers.push(format!("distro={}-{}", distro, distro_version));
    }
    if !qualifiers.is_empty() {
        purl.push('?');
        purl.push_str(&qualifiers.join("&"));
    }
    purl
}

fn created(epoch: u64) -> Result<String> {
    let seconds = i64::try_from(epoch).context("source date epoch out of range")?;
    OffsetDateTime::from_unix_timestamp(seconds)
        .context("source date epoch out of range")?
        .format(&Rfc3339)
        .context("formatting creation time")
}

impl Spdx {
    fn document(&self, input: &SbomInput<'_>) -> Result<Document> {
        let release = input.os_release;
        let digest_hex = input.layer.digest.trim_start_matches("sha256:");

        let mut packages = vec![Package {
            spdx_id: LAYER_ID.to_string(),
            name: input.layer.digest.clone(),
            version_info: String::new(),
            files_analyzed: false,
            license_concluded: NOASSERTION.to_string(),
            license_declared: NOASSERTION.to_string(),
            download_location: NOASSERTION.to_string(),
            copyright_text: NOASSERTION.to_string(),
            description: format!("{} layer for {}", release.name, input.arch),
            homepage: String::new(),
            supplier: None,
            checksums: vec![Checksum {
                algorithm: "SHA256".to_string(),
                value: digest_hex.to_string(),
            }],
            external_refs: Vec::new(),
        }];
        let mut relationships = vec![Relationship {
            spdx_element_id: "SPDXRef-DOCUMENT".to_string(),
            relationship_type: "DESCRIBES".to_string(),
            related_spdx_element: LAYER_ID.to_string(),
        }];

        for package in input.packages {
            let id = spdx_id("Package", &package.name, &package.version);
            packages.push(Package {
                spdx_id: id.clone(),
                name: package.name.clone(),
                version_info: package.version.clone(),
                files_analyzed: false,
                license_concluded: NOASSERTION.to_string(),
                license_declared: or_noassertion(&package.license),
                download_location: NOASSERTION.to_string(),
                copyright_text: NOASSERTION.to_string(),
                description: package.description.clone(),
                homepage: package.url.clone(),
                supplier: Some(format!("Organization: {}", release.name)),
                checksums: Vec::new(),
                external_refs: vec![ExternalRef {
                    reference_category: "PACKAGE-MANAGER".to_string(),
                    reference_type: "purl".to_string(),
                    reference_locator: purl(package, &release.id, &release.version_id),
                }],
            });
            relationships.push(Relationship {
                spdx_element_id: LAYER_ID.to_string(),
                relationship_type: "CONTAINS".to_string(),
                related_spdx_element: id,
            });
        }

        Ok(Document {
            spdx_id: "SPDXRef-DOCUMENT".to_string(),
            name: format!("sbom-{}", input.layer.digest),
            spdx_version: SPDX_VERSION.to_string(),
            creation_info: CreationInfo {
                created: created(input.source_date_epoch)?,
                creators: vec![format!("Tool: layerkit-{}", env!("CARGO_PKG_VERSION"))],
            },
            data_license: "CC0-1.0".to_string(),
            document_namespace: format!("https://spdx.org/spdxdocs/layerkit/{}", digest_hex),
            document_describes: vec![LAYER_ID.to_string()],
            packages,
            relationships,
        })
    }
}

impl SbomGenerator for Spdx {
    fn key(&self) -> &'static str {
        "spdx"
    }

    fn extension(&self) -> &'static str {
        "spdx.json"
    }

    fn generate(&self, input: &SbomInput<'_>, path: &Path) -> Result<()> {
        let document = self.document(input)?;
        let json = serde_json::to_string_pretty(&document).context("serializing SPDX document")?;
        fs::write(path, json + "\n").with_context(|| format!("writing '{}'", path.display()))?;
        tracing::info!(path = %path.display(), packages = input.packages.len(), "wrote SPDX SBOM");
        Ok(())
    }
}
