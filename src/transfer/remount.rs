use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::TransferError;

/// Run `<command...> -o remount,{rw,ro} <path>`.
pub(super) fn remount(command: &[String], path: &Path, writable: bool) -> Result<(), TransferError> {
    let mode = if writable { "rw" } else { "ro" };
    let fail = |message: String| TransferError::RemountFailure { path: path.to_path_buf(), mode, message };
    let (program, args) = command.split_first().ok_or_else(|| fail("empty mount command".to_string()))?;
    let output = Command::new(program)
        .args(args)
        .arg("-o")
        .arg(format!("remount,{}", mode))
        .arg(path)
        .output()
        .map_err(|e| fail(e.to_string()))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(fail(format!("{}: {}", output.status, stderr)));
    }
    Ok(())
}

/// Keeps the destination writable for its lifetime and remounts it
/// read-only when dropped, whichever way the transfer ends.
pub(super) struct RemountGuard {
    command: Vec<String>,
    path: PathBuf,
}

impl RemountGuard {
    pub(super) fn writable(command: &[String], path: &Path) -> Result<Self, TransferError> {
        tracing::info!("[transfer] remounting {} writable", path.display());
        remount(command, path, true)?;
        Ok(Self { command: command.to_vec(), path: path.to_path_buf() })
    }
}

impl Drop for RemountGuard {
    fn drop(&mut self) {
        if let Err(e) = remount(&self.command, &self.path, false) {
            tracing::warn!("[transfer] {}", e);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh_recorder(log: &Path, exit: u8) -> Vec<String> {
        vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("echo \"$@\" >> '{}'; exit {}", log.display(), exit),
            "mount".to_string(),
        ]
    }

    #[test]
    fn guard_remounts_read_only_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls");
        let cmd = sh_recorder(&log, 0);
        {
            let _guard = RemountGuard::writable(&cmd, Path::new("/media/drive")).unwrap();
        }
        let calls = std::fs::read_to_string(&log).unwrap();
        assert_eq!(calls, "-o remount,rw /media/drive\n-o remount,ro /media/drive\n");
    }

    #[test]
    fn failed_writable_remount_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = sh_recorder(&dir.path().join("calls"), 32);
        let err = RemountGuard::writable(&cmd, Path::new("/media/drive")).err().unwrap();
        assert!(matches!(err, TransferError::RemountFailure { mode: "rw", .. }));
    }
}
