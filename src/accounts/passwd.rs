//! `/etc/passwd` model.

use anyhow::{bail, Context, Result};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntry {
    pub username: String,
    pub password: String,
    pub uid: u32,
    pub gid: u32,
    pub info: String,
    pub home_dir: String,
    pub shell: String,
}

impl fmt::Display for UserEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}:{}:{}",
            self.username, self.password, self.uid, self.gid, self.info, self.home_dir, self.shell
        )
    }
}

/// Parsed passwd file, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserFile {
    pub entries: Vec<UserEntry>,
}

impl UserFile {
    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for (number, line) in text.lines().enumerate() {
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() != 7 {
                bail!(
                    "passwd line {}: expected 7 fields, found {}",
                    number + 1,
                    fields.len()
                );
            }
            let uid = fields[2]
                .parse()
                .with_context(|| format!("passwd line {}: invalid uid '{}'", number + 1, fields[2]))?;
            let gid = fields[3]
                .parse()
                .with_context(|| format!("passwd line {}: invalid gid '{}'", number + 1, fields[3]))?;
            entries.push(UserEntry {
                username: fields[0].to_string(),
                password: fields[1].to_string(),
                uid,
                gid,
                info: fields[4].to_string(),
                home_dir: fields[5].to_string(),
                shell: fields[6].to_string(),
            });
        }
        Ok(Self { entries })
    }

    /// Load `path`; a missing file is an empty list.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text).with_context(|| format!("parsing '{}'", path.display())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("reading '{}'", path.display())),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating '{}'", parent.display()))?;
        }
        fs::write(path, self.to_string()).with_context(|| format!("writing '{}'", path.display()))
    }

    pub fn find(&self, username: &str) -> Option<&UserEntry> {
        self.entries.iter().find(|e| e.username == username)
    }
}

impl fmt::Display for UserFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{}", entry)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ALPINE: &str = "\
root:x:0:0:root:/root:/bin/sh
bin:x:1:1:bin:/bin:/sbin/nologin
nobody:x:65534:65534:nobody:/:/sbin/nologin
";

    #[test]
    fn test_parse_then_write_is_identity() {
        let file = UserFile::parse(ALPINE).unwrap();
        assert_eq!(file.entries.len(), 3);
        assert_eq!(file.entries[2].uid, 65534);
        assert_eq!(file.to_string(), ALPINE);
        assert_eq!(UserFile::parse(&file.to_string()).unwrap(), file);
    }

    #[test]
    fn test_empty_uid_is_rejected() {
        let err = UserFile::parse("svc:!::::/var/empty:\n").unwrap_err();
        assert!(err.to_string().contains("invalid uid"));
    }

    #[test]
    fn test_empty_optional_fields_survive() {
        let file = UserFile::parse("svc:!:10:10:::\n").unwrap();
        assert_eq!(file.entries[0].home_dir, "");
        assert_eq!(file.to_string(), "svc:!:10:10:::\n");
    }

    #[test]
    fn test_wrong_field_count_is_rejected() {
        assert!(UserFile::parse("root:x:0:0\n").is_err());
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let temp = TempDir::new().unwrap();
        let file = UserFile::load(&temp.path().join("passwd")).unwrap();
        assert!(file.entries.is_empty());
    }
}
