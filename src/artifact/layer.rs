//! Deterministic layer archive.
//!
//! The working directory is walked in file-name order and every entry is
//! written as a GNU tar header whose timestamps are the reproducibility
//! epoch. Identical trees give byte-identical archives.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use walkdir::WalkDir;

use crate::context::BuildContext;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compression {
    #[default]
    Gzip,
    Zstd,
}

impl Compression {
    pub fn extension(self) -> &'static str {
        match self {
            Compression::Gzip => "tar.gz",
            Compression::Zstd => "tar.zst",
        }
    }

    pub fn media_type(self) -> &'static str {
        match self {
            Compression::Gzip => "application/vnd.oci.image.layer.v1.tar+gzip",
            Compression::Zstd => "application/vnd.oci.image.layer.v1.tar+zstd",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::Gzip => write!(f, "gzip"),
            Compression::Zstd => write!(f, "zstd"),
        }
    }
}

impl FromStr for Compression {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gzip" | "gz" => Ok(Compression::Gzip),
            "zstd" | "zst" => Ok(Compression::Zstd),
            other => bail!("unsupported compression '{}' (expected gzip or zstd)", other),
        }
    }
}

/// Written layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerInfo {
    pub path: PathBuf,
    pub media_type: String,
    /// `sha256:` digest of the compressed file.
    pub digest: String,
    /// `sha256:` digest of the uncompressed tar stream.
    pub diff_id: String,
    /// Compressed size in bytes.
    pub size: u64,
}

/// Counts and hashes everything written through it.
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    fn finish(self) -> (W, String, u64) {
        let digest = format!("sha256:{:x}", self.hasher.finalize());
        (self.inner, digest, self.written)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

enum Encoder<W: Write> {
    Gzip(flate2::write::GzEncoder<W>),
    Zstd(zstd::stream::write::Encoder<'static, W>),
}

impl<W: Write> Encoder<W> {
    fn new(inner: W, compression: Compression) -> io::Result<Self> {
        Ok(match compression {
            Compression::Gzip => Encoder::Gzip(flate2::write::GzEncoder::new(
                inner,
                flate2::Compression::default(),
            )),
            Compression::Zstd => Encoder::Zstd(zstd::stream::write::Encoder::new(inner, 3)?),
        })
    }

    fn finish(self) -> io::Result<W> {
        match self {
            Encoder::Gzip(encoder) => encoder.finish(),
            Encoder::Zstd(encoder) => encoder.finish(),
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Gzip(encoder) => encoder.write(buf),
            Encoder::Zstd(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Gzip(encoder) => encoder.flush(),
            Encoder::Zstd(encoder) => encoder.flush(),
        }
    }
}

/// Archive the session's working directory into `out_path`.
pub fn build_layer(ctx: &BuildContext, out_path: &Path, compression: Compression) -> Result<LayerInfo> {
    let out = File::create(out_path)
        .with_context(|| format!("creating '{}'", out_path.display()))?;
    let compressed = HashingWriter::new(BufWriter::new(out));
    let encoder = Encoder::new(compressed, compression)?;
    let mut builder = tar::Builder::new(HashingWriter::new(encoder));

    let entries = append_tree(ctx, &mut builder)?;

    let (encoder, diff_id, _) = builder
        .into_inner()
        .context("finishing tar stream")?
        .finish();
    let (file, digest, size) = encoder.finish().context("finishing compression")?.finish();
    file.into_inner()
        .map_err(|e| e.into_error())
        .and_then(|file| file.sync_all())
        .with_context(|| format!("writing '{}'", out_path.display()))?;

    tracing::info!(
        path = %out_path.display(),
        entries,
        size,
        digest = %digest,
        "layer written"
    );
    Ok(LayerInfo {
        path: out_path.to_path_buf(),
        media_type: compression.media_type().to_string(),
        digest,
        diff_id,
        size,
    })
}

fn append_tree<W: Write>(ctx: &BuildContext, builder: &mut tar::Builder<W>) -> Result<usize> {
    let root = ctx.workdir();
    let epoch = ctx.source_date_epoch();
    let mut first_links: HashMap<(u64, u64), PathBuf> = HashMap::new();
    let mut count = 0;

    for entry in WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("walking '{}'", root.display()))?;
        let path = entry.path();
        let rel = path.strip_prefix(root).unwrap_or(path).to_path_buf();
        let metadata = fs::symlink_metadata(path)
            .with_context(|| format!("reading metadata of '{}'", path.display()))?;
        let (uid, gid) = ctx.effective_owner(path, &metadata);

        let mut header = tar::Header::new_gnu();
        header.set_mtime(epoch);
        if let Some(gnu) = header.as_gnu_mut() {
            gnu.set_atime(epoch);
            gnu.set_ctime(epoch);
        }
        header.set_uid(uid as u64);
        header.set_gid(gid as u64);
        header.set_mode(metadata.permissions().mode() & 0o7777);
        header.set_size(0);

        let file_type = metadata.file_type();
        if file_type.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            builder.append_data(&mut header, &rel, io::empty())?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(path)?;
            header.set_entry_type(tar::EntryType::Symlink);
            builder.append_link(&mut header, &rel, &target)?;
        } else if file_type.is_file() {
            // Later links to an inode become hard link entries.
            let key = (metadata.dev(), metadata.ino());
            let first = if metadata.nlink() > 1 {
                first_links.get(&key).cloned()
            } else {
                None
            };
            if let Some(first) = first {
                header.set_entry_type(tar::EntryType::Link);
                builder.append_link(&mut header, &rel, &first)?;
            } else {
                if metadata.nlink() > 1 {
                    first_links.insert(key, rel.clone());
                }
                header.set_entry_type(tar::EntryType::Regular);
                header.set_size(metadata.len());
                let file =
                    File::open(path).with_context(|| format!("opening '{}'", path.display()))?;
                builder
                    .append_data(&mut header, &rel, file)
                    .with_context(|| format!("archiving '{}'", rel.display()))?;
            }
        } else {
            tracing::warn!(path = %rel.display(), "skipping special file");
            continue;
        }
        count += 1;
    }
    Ok(count)
}
