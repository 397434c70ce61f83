use std::io::{self, BufRead, BufReader, Read};
use std::time::Instant;

use crossbeam_channel::{Sender, TrySendError};

use super::ProgressEvent;
use super::log::LogWriter;
use crate::parse::parse_progress_line;

/// Which pipe of the transfer process a drain thread reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Stream {
    Stdout,
    Stderr,
}

/// Completion signal sent by a drain thread when its pipe closes.
pub(super) struct DrainDone {
    pub(super) stream: Stream,
    pub(super) last_progress: Option<ProgressEvent>,
}

/// Splits a byte stream into trimmed lines on both `\r` and `\n`; rsync
/// redraws its progress line with bare carriage returns.
pub(super) struct Lines<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
}

impl<R: Read> Lines<R> {
    pub(super) fn new(reader: R) -> Self {
        Self { reader: BufReader::new(reader), pending: Vec::new() }
    }

    fn take_pending(&mut self) -> String {
        let raw = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&raw).trim().to_string()
    }
}

impl<R: Read> Iterator for Lines<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let available = match self.reader.fill_buf() {
                Ok(buf) => buf,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Some(Err(e)),
            };
            if available.is_empty() {
                if self.pending.is_empty() {
                    return None;
                }
                return Some(Ok(self.take_pending()));
            }
            if let Some(i) = available.iter().position(|b| *b == b'\r' || *b == b'\n') {
                self.pending.extend_from_slice(&available[..i]);
                self.reader.consume(i + 1);
                return Some(Ok(self.take_pending()));
            }
            let n = available.len();
            self.pending.extend_from_slice(available);
            self.reader.consume(n);
        }
    }
}

/// Everything a drain thread needs besides its pipe.
pub(super) struct DrainCtx {
    pub(super) start: Instant,
    /// Only the stdout drain looks for progress lines.
    pub(super) progress: Option<Sender<ProgressEvent>>,
    pub(super) log: LogWriter,
    pub(super) done_tx: Sender<DrainDone>,
}

/// Spawn a thread that reads `reader` line by line until EOF, routing
/// progress lines to the sink and everything else to the transfer log.
pub(super) fn spawn_drain<R: Read + Send + 'static>(
    reader: R,
    stream: Stream,
    ctx: DrainCtx,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let DrainCtx { start, progress, log, done_tx } = ctx;
        let mut last_progress = None;
        for line in Lines::new(reader) {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    tracing::warn!("[transfer] {:?} read error: {}", stream, e);
                    break;
                }
            };
            if line.is_empty() {
                continue;
            }
            if let Some(sink) = progress.as_ref()
                && let Some(ev) = parse_progress_line(&line, start.elapsed())
            {
                last_progress = Some(ev.clone());
                // progress is ephemeral: a busy sink just misses this update
                if let Err(TrySendError::Disconnected(_)) = sink.try_send(ev) {
                    tracing::debug!("[transfer] progress sink closed");
                }
                continue;
            }
            log.line(line);
        }
        let _ = done_tx.send(DrainDone { stream, last_progress });
    })
}
