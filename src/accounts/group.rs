//! `/etc/group` model.

use anyhow::{bail, Context, Result};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupEntry {
    pub name: String,
    pub password: String,
    pub gid: u32,
    pub members: Vec<String>,
}

impl fmt::Display for GroupEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.name,
            self.password,
            self.gid,
            self.members.join(",")
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupFile {
    pub entries: Vec<GroupEntry>,
}

impl GroupFile {
    pub fn parse(text: &str) -> Result<Self> {
        let mut entries = Vec::new();
        for (number, line) in text.lines().enumerate() {
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() != 4 {
                bail!(
                    "group line {}: expected 4 fields, found {}",
                    number + 1,
                    fields.len()
                );
            }
            let gid = fields[2]
                .parse()
                .with_context(|| format!("group line {}: invalid gid '{}'", number + 1, fields[2]))?;
            let members = fields[3]
                .split(',')
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect();
            entries.push(GroupEntry {
                name: fields[0].to_string(),
                password: fields[1].to_string(),
                gid,
                members,
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
}

impl fmt::Display for GroupFile {
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

    #[test]
    fn test_round_trip_with_members() {
        let text = "root:x:0:root\nwheel:x:10:root,app\nnogroup:x:65533:\n";
        let file = GroupFile::parse(text).unwrap();
        assert_eq!(file.entries[1].members, vec!["root", "app"]);
        assert!(file.entries[2].members.is_empty());
        assert_eq!(file.to_string(), text);
    }

    #[test]
    fn test_invalid_gid_is_rejected() {
        let err = GroupFile::parse("wheel:x:ten:\n").unwrap_err();
        assert!(err.to_string().contains("invalid gid"));
    }
}
