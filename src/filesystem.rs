// filesystem module: mount discovery, classification and the watcher that fans results out
mod classify;
mod scan;
mod watcher;

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

use crate::error::ScanError;

pub use classify::{Classifier, SizeThreshold};
pub use scan::DfScanner;
pub use watcher::{Subscription, Watcher, WatcherSettings, wait_for_connect, wait_for_disconnect};

/// Marker left at a source root once its contents have been copied.
pub const MARKER_FILE: &str = "backup-marker.txt";
/// Marker left inside a run directory once the run completed.
pub const SUCCESS_FILE: &str = "success.txt";

/// Capacity snapshot of one mounted filesystem, as reported by `df -B1`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilesystemRecord {
    pub size: u64,
    pub used: u64,
    pub available: u64,
    pub path: PathBuf,
}

impl FilesystemRecord {
    /// Whether this filesystem carries the "already backed up" marker at its root.
    pub fn has_marker(&self) -> bool {
        self.path.join(MARKER_FILE).is_file()
    }
}

/// Classified view of the current mounts. An empty slot means nothing is
/// attached in that role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilesystemPair {
    pub source: Option<FilesystemRecord>,
    pub destination: Option<FilesystemRecord>,
}

impl FilesystemPair {
    pub fn is_complete(&self) -> bool {
        self.source.is_some() && self.destination.is_some()
    }

    pub fn source_removed(&self) -> bool {
        self.source.is_none()
    }
}

/// Anything that can produce a fresh list of mounted filesystems.
pub trait Scanner: Send + Sync {
    fn scan(&self) -> Result<Vec<FilesystemRecord>, ScanError>;
}

/// Write a completion marker file `dir/name` carrying the current timestamp.
pub fn write_marker(dir: &Path, name: &str) -> std::io::Result<PathBuf> {
    let path = dir.join(name);
    let body = format!("Backup of these files completed on {}\n", Utc::now().to_rfc3339());
    std::fs::write(&path, body)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_roundtrip_on_record() {
        let dir = tempfile::tempdir().unwrap();
        let rec = FilesystemRecord { size: 10, used: 5, available: 5, path: dir.path().to_path_buf() };
        assert!(!rec.has_marker());
        let written = write_marker(dir.path(), MARKER_FILE).unwrap();
        assert!(rec.has_marker());
        let body = std::fs::read_to_string(written).unwrap();
        assert!(body.starts_with("Backup of these files completed on "));
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn pair_predicates() {
        let rec = FilesystemRecord { size: 1, used: 1, available: 0, path: PathBuf::from("/media/a") };
        let empty = FilesystemPair::default();
        assert!(!empty.is_complete());
        assert!(empty.source_removed());
        let full = FilesystemPair { source: Some(rec.clone()), destination: Some(rec) };
        assert!(full.is_complete());
        assert!(!full.source_removed());
    }
}
