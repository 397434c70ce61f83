use std::path::PathBuf;

use crate::util::human_bytes;

/// Which classification slot a scan could not fill unambiguously.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Source,
    Destination,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Source => f.write_str("source"),
            Role::Destination => f.write_str("destination"),
        }
    }
}

/// Failures while producing a fresh set of filesystem records.
///
/// The watcher absorbs these (the last good pair stays current); callers of
/// [`crate::filesystem::Scanner::scan`] see them directly.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("failed to read mountpoints under {}: {source}", .path.display())]
    MediaRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to start capacity command {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("capacity command timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("capacity command exited with {status}: {stderr}")]
    Command { status: std::process::ExitStatus, stderr: String },
    #[error("unexpected df line: {line}")]
    Parse { line: String },
    #[error("multiple filesystems classified as {role}")]
    AmbiguousClassification { role: Role },
}

/// Failures of a single transfer attempt. Every variant aborts the attempt;
/// none is retried automatically.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("missing backup source or destination")]
    MissingEndpoint,
    #[error("not enough space, need {} have {}", human_bytes(*.needed), human_bytes(*.available))]
    InsufficientSpace { needed: u64, available: u64 },
    #[error("remount {} {mode}: {message}", .path.display())]
    RemountFailure { path: PathBuf, mode: &'static str, message: String },
    #[error("creating run directory {}: {source}", .path.display())]
    RunDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to start backup: {0}")]
    ProcessStart(#[source] std::io::Error),
    #[error("backup failed: {0}")]
    ProcessExit(String),
    #[error("transfer log {op}: {message}")]
    LogIo { op: &'static str, message: String },
    #[error("writing completion marker {}: {source}", .path.display())]
    MarkerWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to sync: {0}")]
    SyncFailure(String),
}

impl TransferError {
    /// True when the attempt was rejected before anything was spawned or
    /// written to the destination.
    pub fn is_precondition(&self) -> bool {
        matches!(self, TransferError::MissingEndpoint | TransferError::InsufficientSpace { .. })
    }
}

/// Errors from loading or validating the appliance configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}
