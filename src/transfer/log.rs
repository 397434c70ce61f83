use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded, select, unbounded};

use crate::error::TransferError;

const LOG_BUFFER: usize = 4096;

enum LogMsg {
    Line(String),
    Close(Sender<Result<(), TransferError>>),
}

/// Cloneable handle the drain threads use to append lines.
#[derive(Clone)]
pub(super) struct LogWriter {
    tx: Sender<LogMsg>,
}

impl LogWriter {
    pub(super) fn line(&self, line: String) {
        let _ = self.tx.send(LogMsg::Line(line));
    }
}

/// The transfer log, owned by a single thread. Lines, periodic flush ticks
/// and the final close are all serialized through that thread, so a flush
/// can never interleave with a write or race the close.
pub(super) struct TransferLog {
    tx: Sender<LogMsg>,
    handle: JoinHandle<()>,
}

impl TransferLog {
    pub(super) fn open(path: &Path, flush_interval: Duration) -> Result<Self, TransferError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| TransferError::LogIo { op: "open", message: format!("{}: {}", path.display(), e) })?;
        let (tx, rx) = unbounded();
        let handle = std::thread::spawn(move || run_owner(file, rx, flush_interval));
        Ok(Self { tx, handle })
    }

    pub(super) fn writer(&self) -> LogWriter {
        LogWriter { tx: self.tx.clone() }
    }

    /// Flush, fsync and close the file. Returns the first write error seen, if any.
    pub(super) fn close(self) -> Result<(), TransferError> {
        let (ack_tx, ack_rx) = bounded(1);
        let sent = self.tx.send(LogMsg::Close(ack_tx));
        let result = match sent {
            Ok(()) => ack_rx.recv().unwrap_or_else(|_| {
                Err(TransferError::LogIo { op: "close", message: "log owner exited".to_string() })
            }),
            Err(_) => Err(TransferError::LogIo { op: "close", message: "log owner exited".to_string() }),
        };
        let _ = self.handle.join();
        result
    }
}

fn run_owner(file: File, rx: Receiver<LogMsg>, flush_interval: Duration) {
    let mut w = BufWriter::with_capacity(LOG_BUFFER, file);
    let mut failure: Option<TransferError> = None;
    let ticker = crossbeam_channel::tick(flush_interval);
    loop {
        select! {
            recv(rx) -> msg => match msg {
                Ok(LogMsg::Line(line)) => {
                    if failure.is_none()
                        && let Err(e) = writeln!(w, "{}", line)
                    {
                        failure = Some(TransferError::LogIo { op: "write", message: e.to_string() });
                    }
                }
                Ok(LogMsg::Close(ack)) => {
                    let _ = ack.send(finish(w, failure));
                    return;
                }
                Err(_) => {
                    if let Err(e) = finish(w, failure) {
                        tracing::warn!("[transfer] log dropped without close: {}", e);
                    }
                    return;
                }
            },
            recv(ticker) -> _ => {
                if failure.is_none()
                    && let Err(e) = w.flush()
                {
                    failure = Some(TransferError::LogIo { op: "flush", message: e.to_string() });
                }
            },
        }
    }
}

fn finish(mut w: BufWriter<File>, failure: Option<TransferError>) -> Result<(), TransferError> {
    if let Some(e) = failure {
        return Err(e);
    }
    w.flush().map_err(|e| TransferError::LogIo { op: "flush", message: e.to_string() })?;
    let file = w
        .into_inner()
        .map_err(|e| TransferError::LogIo { op: "flush", message: e.error().to_string() })?;
    file.sync_all().map_err(|e| TransferError::LogIo { op: "sync", message: e.to_string() })?;
    Ok(())
}
