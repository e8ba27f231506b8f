//! Timestamp normalization for apk's post-install scripts archive.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::Path;

/// Rewrite the archive at `path` with every entry's timestamps set to
/// `epoch`. Returns `false` when there is no archive.
///
/// Only a missing archive is tolerated; any other I/O failure is an error.
pub fn normalize_scripts_tar(path: &Path, epoch: u64) -> Result<bool> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e).with_context(|| format!("opening '{}'", path.display())),
    };

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let staged = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("creating temporary file in '{}'", dir.display()))?;

    {
        let mut archive = tar::Archive::new(BufReader::new(file));
        let mut builder = tar::Builder::new(BufWriter::new(staged.as_file()));

        for entry in archive
            .entries()
            .with_context(|| format!("reading '{}'", path.display()))?
        {
            let mut entry = entry.with_context(|| format!("reading entry in '{}'", path.display()))?;
            let name = entry.path()?.into_owned();
            let mut header = entry.header().clone();
            header.set_mtime(epoch);
            if let Some(gnu) = header.as_gnu_mut() {
                gnu.set_atime(epoch);
                gnu.set_ctime(epoch);
            }
            builder
                .append_data(&mut header, &name, &mut entry)
                .with_context(|| format!("rewriting '{}'", name.display()))?;
        }

        builder
            .into_inner()
            .context("finishing scripts archive")?
            .into_inner()
            .map_err(|e| e.into_error())
            .context("flushing scripts archive")?;
    }

    let permissions = fs::metadata(path)?.permissions();
    staged
        .persist(path)
        .with_context(|| format!("replacing '{}'", path.display()))?;
    fs::set_permissions(path, permissions)?;

    tracing::debug!(path = %path.display(), epoch, "normalized scripts archive");
    Ok(true)
}
