// transfer module: runs rsync for one classified pair and supervises it to completion
mod drain;
mod log;
mod remount;

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Sender, bounded, select};
use serde::Serialize;

use self::drain::{DrainCtx, Stream, spawn_drain};
use self::log::TransferLog;
use self::remount::RemountGuard;
use crate::config::{CompletionMarkerMode, Config};
use crate::error::TransferError;
use crate::filesystem::{FilesystemPair, MARKER_FILE, SUCCESS_FILE, write_marker};

/// Run directory name, UTC with second precision.
pub const RUN_DIR_FORMAT: &str = "Backup-%Y-%m-%dT%H-%M-%SZ";
pub const LOG_FILE: &str = "rsync.log";

/// One snapshot of transfer progress parsed from rsync's `--info=progress2` output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub percent: u8,
    pub bytes_sent: u64,
    pub rate: String,
    pub elapsed: Duration,
    pub remaining: Duration,
}

/// What a successful transfer left behind.
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub run_dir: PathBuf,
    pub log_path: PathBuf,
    pub marker_path: PathBuf,
    pub elapsed: Duration,
    pub last_progress: Option<ProgressEvent>,
}

/// Runs one transfer for a classified pair. The orchestrator only depends on this.
pub trait TransferRunner: Send + Sync {
    fn run(
        &self,
        pair: &FilesystemPair,
        progress: Sender<ProgressEvent>,
    ) -> Result<TransferReport, TransferError>;
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub rsync_path: PathBuf,
    /// Everything before the two positional paths.
    pub rsync_args: Vec<String>,
    pub check_capacity: bool,
    /// Mount command used to flip the destination rw/ro; `None` skips remounting.
    pub remount: Option<Vec<String>>,
    pub completion: CompletionMarkerMode,
    pub sync_path: PathBuf,
    pub flush_interval: Duration,
    pub drain_grace: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl SupervisorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            rsync_path: config.rsync_path.clone(),
            rsync_args: default_rsync_args(),
            check_capacity: config.check_capacity,
            remount: config.remount.then(|| config.mount_command.clone()),
            completion: config.completion_marker,
            sync_path: config.sync_path.clone(),
            flush_interval: config.log_flush_interval(),
            drain_grace: config.drain_grace(),
        }
    }
}

/// Archive mode, per-file verbose lines, one aggregate progress line, and no
/// incremental recursion so files are visited in a stable order.
pub fn default_rsync_args() -> Vec<String> {
    ["-av", "--info=progress2", "--no-i-r"].iter().map(|s| s.to_string()).collect()
}

pub fn run_dir_name(at: DateTime<Utc>) -> String {
    at.format(RUN_DIR_FORMAT).to_string()
}

/// rsync copies a directory's contents only when the source ends with a separator.
fn source_arg(path: &Path) -> String {
    let s = path.to_string_lossy();
    if s.ends_with('/') { s.to_string() } else { format!("{}/", s) }
}

#[derive(Debug, Clone, Default)]
pub struct Supervisor {
    settings: SupervisorSettings,
}

impl Supervisor {
    pub fn new(settings: SupervisorSettings) -> Self {
        Self { settings }
    }

    fn sync(&self) -> Result<(), TransferError> {
        let output = Command::new(&self.settings.sync_path)
            .output()
            .map_err(|e| TransferError::SyncFailure(e.to_string()))?;
        if !output.status.success() {
            return Err(TransferError::SyncFailure(output.status.to_string()));
        }
        Ok(())
    }
}

impl TransferRunner for Supervisor {
    fn run(
        &self,
        pair: &FilesystemPair,
        progress: Sender<ProgressEvent>,
    ) -> Result<TransferReport, TransferError> {
        let (Some(src), Some(dst)) = (&pair.source, &pair.destination) else {
            return Err(TransferError::MissingEndpoint);
        };
        if self.settings.check_capacity && src.used > dst.available {
            return Err(TransferError::InsufficientSpace {
                needed: src.used,
                available: dst.available,
            });
        }

        let src_arg = source_arg(&src.path);
        let run_dir = dst.path.join(run_dir_name(Utc::now()));
        tracing::info!("[transfer] starting backup from {} to {}", src_arg, run_dir.display());

        // remounted read-only again when this goes out of scope, on every path
        let _remount = match &self.settings.remount {
            Some(cmd) => Some(RemountGuard::writable(cmd, &dst.path)?),
            None => None,
        };

        std::fs::create_dir(&run_dir)
            .map_err(|source| TransferError::RunDirectory { path: run_dir.clone(), source })?;
        let log_path = run_dir.join(LOG_FILE);
        let log = TransferLog::open(&log_path, self.settings.flush_interval)?;

        let _ = progress.try_send(ProgressEvent::default());

        let start = Instant::now();
        let spawned = Command::new(&self.settings.rsync_path)
            .args(&self.settings.rsync_args)
            .arg(&src_arg)
            .arg(&run_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();
        let mut child = match spawned {
            Ok(c) => c,
            Err(e) => {
                if let Err(log_err) = log.close() {
                    tracing::warn!("[transfer] {}", log_err);
                }
                return Err(TransferError::ProcessStart(e));
            }
        };

        let (done_tx, done_rx) = bounded(2);
        let mut drains = 0usize;
        if let Some(out) = child.stdout.take() {
            let ctx = DrainCtx {
                start,
                progress: Some(progress.clone()),
                log: log.writer(),
                done_tx: done_tx.clone(),
            };
            spawn_drain(out, Stream::Stdout, ctx);
            drains += 1;
        }
        if let Some(err) = child.stderr.take() {
            let ctx = DrainCtx { start, progress: None, log: log.writer(), done_tx: done_tx.clone() };
            spawn_drain(err, Stream::Stderr, ctx);
            drains += 1;
        }
        drop(done_tx);

        let status = child.wait();
        tracing::info!("[transfer] rsync completed with status {:?}", status);

        // bounded wait for the drains; a pipe held open by a stray grandchild must not hang us
        let deadline = crossbeam_channel::after(self.settings.drain_grace);
        let mut last_progress = None;
        'drains: for _ in 0..drains {
            select! {
                recv(done_rx) -> done => match done {
                    Ok(d) => {
                        tracing::debug!("[transfer] {:?} drained", d.stream);
                        if d.last_progress.is_some() {
                            last_progress = d.last_progress;
                        }
                    }
                    Err(_) => break 'drains,
                },
                recv(deadline) -> _ => {
                    tracing::warn!("[transfer] deadline exceeded waiting for log completion");
                    break 'drains;
                },
            }
        }

        tracing::info!("[transfer] flushing log file");
        log.close()?;

        let status = status.map_err(|e| TransferError::ProcessExit(e.to_string()))?;
        if !status.success() {
            return Err(TransferError::ProcessExit(status.to_string()));
        }

        let (marker_dir, marker_name) = match self.settings.completion {
            CompletionMarkerMode::RunDirectory => (run_dir.as_path(), SUCCESS_FILE),
            CompletionMarkerMode::BesideSource => (src.path.as_path(), MARKER_FILE),
        };
        let marker_path = write_marker(marker_dir, marker_name).map_err(|source| {
            TransferError::MarkerWrite { path: marker_dir.join(marker_name), source }
        })?;
        tracing::info!("[transfer] wrote completion marker {}", marker_path.display());

        // the operator may pull the drive as soon as success is shown
        tracing::info!("[transfer] running manual sync");
        self.sync()?;

        Ok(TransferReport { run_dir, log_path, marker_path, elapsed: start.elapsed(), last_progress })
    }
}
