use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use super::{FilesystemRecord, Scanner};
use crate::error::ScanError;
use crate::parse::parse_df_output;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Scans every entry under the media root with `df -B1`.
#[derive(Debug, Clone)]
pub struct DfScanner {
    media_root: PathBuf,
    df_path: PathBuf,
    timeout: Duration,
}

impl DfScanner {
    pub fn new(media_root: impl Into<PathBuf>, df_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self { media_root: media_root.into(), df_path: df_path.into(), timeout }
    }

    pub fn media_root(&self) -> &Path {
        &self.media_root
    }

    fn mountpoints(&self) -> Result<Vec<PathBuf>, ScanError> {
        let entries = std::fs::read_dir(&self.media_root)
            .map_err(|source| ScanError::MediaRoot { path: self.media_root.clone(), source })?;
        let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
        paths.sort();
        Ok(paths)
    }

    /// The root filesystem and the media root itself show up when an entry is
    /// a plain directory rather than a mount; neither is a candidate.
    fn is_candidate(&self, rec: &FilesystemRecord) -> bool {
        rec.path != Path::new("/") && rec.path != self.media_root
    }

    fn run_df(&self, paths: &[PathBuf]) -> Result<String, ScanError> {
        let program = self.df_path.display().to_string();
        let mut child = Command::new(&self.df_path)
            .arg("-B1")
            .args(paths)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ScanError::Spawn { program: program.clone(), source })?;

        // drain both pipes off-thread so a chatty df can't block on a full pipe
        let stdout = child.stdout.take().map(spawn_collector);
        let stderr = child.stderr.take().map(spawn_collector);

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ScanError::Timeout(self.timeout));
                }
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(source) => return Err(ScanError::Spawn { program, source }),
            }
        };

        let out = stdout.map(|h| h.join().unwrap_or_default()).unwrap_or_default();
        let err = stderr.map(|h| h.join().unwrap_or_default()).unwrap_or_default();
        if !status.success() {
            return Err(ScanError::Command { status, stderr: err.trim().to_string() });
        }
        Ok(out)
    }
}

fn spawn_collector<R: Read + Send + 'static>(mut reader: R) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = String::new();
        let _ = reader.read_to_string(&mut buf);
        buf
    })
}

impl Scanner for DfScanner {
    fn scan(&self) -> Result<Vec<FilesystemRecord>, ScanError> {
        let paths = self.mountpoints()?;
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let output = self.run_df(&paths)?;
        let records = parse_df_output(&output)?;
        let records: Vec<FilesystemRecord> =
            records.into_iter().filter(|r| self.is_candidate(r)).collect();
        tracing::debug!("[scan] {} candidate filesystem(s) under {}", records.len(), self.media_root.display());
        Ok(records)
    }
}
