//! Backup store: read-only listing of the fixed backup directory, plus copy
//! and delete of single files on explicit user request.
//!
//! Capture file names look like `capture-eth0_2024-01-01-00-00-00.pcap`
//! (rotated parts get a numeric suffix after the extension). The part before
//! the first `_` is the entry's label, the part between `_` and the first `.`
//! its date.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("invalid backup file name `{0}`")]
    InvalidName(String),

    #[error("backup file `{0}` not found")]
    NotFound(String),

    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl HistoryError {
    fn io(action: &'static str, path: &Path, source: std::io::Error) -> Self {
        HistoryError::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, HistoryError::Io { source, .. } if source.kind() == std::io::ErrorKind::PermissionDenied)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupFileEntry {
    pub name: String,
    pub modified_at: DateTime<Local>,
    pub label: String,
    pub date: String,
}

impl BackupFileEntry {
    fn new(name: String, modified_at: DateTime<Local>) -> Self {
        let (label, date) = split_name(&name);
        Self {
            label: label.to_string(),
            date: date.to_string(),
            name,
            modified_at,
        }
    }
}

/// `(label, date)` parts of a capture file name. Names without `_` have an
/// empty date.
pub fn split_name(name: &str) -> (&str, &str) {
    match name.split_once('_') {
        Some((label, rest)) => (label, rest.split('.').next().unwrap_or(rest)),
        None => (name, ""),
    }
}

pub struct BackupStore {
    dir: PathBuf,
}

impl BackupStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Regular files in the backup directory, newest first. Directories are
    /// skipped. A missing directory lists as empty.
    pub fn list(&self) -> Result<Vec<BackupFileEntry>, HistoryError> {
        let read = match fs::read_dir(&self.dir) {
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(HistoryError::io("listing", &self.dir, e)),
        };

        let mut entries = Vec::new();
        for entry in read {
            let entry = entry.map_err(|e| HistoryError::io("listing", &self.dir, e))?;
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::warn!("Skipping {}: {e}", entry.path().display());
                    continue;
                }
            };
            if !meta.is_file() {
                continue;
            }
            let modified = meta
                .modified()
                .map_err(|e| HistoryError::io("reading mtime of", &entry.path(), e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            entries.push(BackupFileEntry::new(name, DateTime::<Local>::from(modified)));
        }

        entries.sort_by(|a, b| b.modified_at.cmp(&a.modified_at).then_with(|| a.name.cmp(&b.name)));
        Ok(entries)
    }

    /// Copy `name` into `dest_dir`, keeping its file name.
    pub fn copy_to(&self, name: &str, dest_dir: &Path) -> Result<PathBuf, HistoryError> {
        let source = self.existing(name)?;
        let dest = dest_dir.join(name);
        fs::copy(&source, &dest).map_err(|e| HistoryError::io("copying to", &dest, e))?;
        tracing::info!("Copied {} to {}", source.display(), dest.display());
        Ok(dest)
    }

    pub fn remove(&self, name: &str) -> Result<(), HistoryError> {
        let path = self.existing(name)?;
        fs::remove_file(&path).map_err(|e| HistoryError::io("removing", &path, e))?;
        tracing::info!("Removed backup {}", path.display());
        Ok(())
    }

    fn existing(&self, name: &str) -> Result<PathBuf, HistoryError> {
        validate_name(name)?;
        let path = self.dir.join(name);
        if !path.is_file() {
            return Err(HistoryError::NotFound(name.to_string()));
        }
        Ok(path)
    }
}

/// Plain file names only: no separators, no `..`, not empty.
fn validate_name(name: &str) -> Result<(), HistoryError> {
    let bad = name.is_empty()
        || name == "."
        || name.contains("..")
        || name.contains('/')
        || name.contains('\\');
    if bad {
        return Err(HistoryError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn touch(dir: &Path, name: &str, age_secs: u64) {
        let path = dir.join(name);
        fs::write(&path, b"pcap").unwrap();
        let file = fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs)).unwrap();
    }

    #[test]
    fn test_split_name() {
        assert_eq!(
            split_name("capture-eth0_2024-01-01-00-00-00.pcap"),
            ("capture-eth0", "2024-01-01-00-00-00")
        );
        assert_eq!(
            split_name("capture_2024-01-01-00-00-00.pcap3"),
            ("capture", "2024-01-01-00-00-00")
        );
        assert_eq!(split_name("notes.txt"), ("notes.txt", ""));
    }

    #[test]
    fn test_list_skips_directories_and_sorts_newest_first() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "capture-eth0_2024-01-01-00-00-00.pcap", 300);
        touch(tmp.path(), "capture-br0_2024-01-03-00-00-00.pcap", 10);
        touch(tmp.path(), "capture-eth1_2024-01-02-00-00-00.pcap", 100);
        fs::create_dir(tmp.path().join("old")).unwrap();

        let entries = BackupStore::new(tmp.path()).list().unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "capture-br0_2024-01-03-00-00-00.pcap",
                "capture-eth1_2024-01-02-00-00-00.pcap",
                "capture-eth0_2024-01-01-00-00-00.pcap",
            ]
        );
        assert_eq!(entries[0].label, "capture-br0");
        assert_eq!(entries[0].date, "2024-01-03-00-00-00");
    }

    #[test]
    fn test_missing_directory_lists_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BackupStore::new(tmp.path().join("nope"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_copy_to_keeps_name() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        touch(src.path(), "capture-eth0_2024-01-01-00-00-00.pcap", 0);

        let copied = BackupStore::new(src.path())
            .copy_to("capture-eth0_2024-01-01-00-00-00.pcap", dst.path())
            .unwrap();
        assert_eq!(copied, dst.path().join("capture-eth0_2024-01-01-00-00-00.pcap"));
        assert_eq!(fs::read(&copied).unwrap(), b"pcap");
    }

    #[test]
    fn test_remove_deletes_file() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "capture_x.pcap", 0);
        let store = BackupStore::new(tmp.path());
        store.remove("capture_x.pcap").unwrap();
        assert!(store.list().unwrap().is_empty());
        assert!(matches!(store.remove("capture_x.pcap"), Err(HistoryError::NotFound(_))));
    }

    #[test]
    fn test_path_like_names_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BackupStore::new(tmp.path());
        for name in ["../etc/passwd", "a/b.pcap", "..", ""] {
            assert!(matches!(store.remove(name), Err(HistoryError::InvalidName(_))), "{name}");
        }
    }
}
