use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};

use crate::filesystem::{FilesystemPair, Watcher};
use crate::transfer::ProgressEvent;
use crate::util::{format_duration, human_bytes, truncate_seconds};

/// Characters per row on the 128px panel with a 7px font.
const SCREEN_COLUMNS: usize = 18;
const SCREEN_ROWS: usize = 4;
const RECONNECT_HINT: &str = "Disconnect and reconnect the card to try again.";

/// What the core tells the status surface. Implementations must not block for long;
/// they are called from the watcher forwarder and the orchestration loop.
pub trait StatusSink: Send + Sync {
    fn set_filesystems(&self, pair: FilesystemPair);
    fn set_progress(&self, progress: ProgressEvent);
    fn set_done(&self);
    fn set_already_done(&self);
    fn set_error(&self, message: String, at: DateTime<Utc>);
    fn reset(&self);
}

#[derive(Debug, Default)]
struct BoardState {
    pair: Option<FilesystemPair>,
    progress: Option<ProgressEvent>,
    done: bool,
    already_done: bool,
    error: Option<(String, DateTime<Utc>)>,
}

/// Latest status snapshot plus the text a small panel shows for it.
#[derive(Debug, Default)]
pub struct StatusBoard {
    state: Mutex<BoardState>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn progress(&self) -> Option<ProgressEvent> {
        self.state().progress.clone()
    }

    /// Screen rows for the current state at time `now`.
    pub fn screen(&self, now: DateTime<Utc>) -> Vec<String> {
        let st = self.state();
        if let Some((msg, at)) = &st.error {
            let secs = (now - *at).num_seconds().max(0);
            let text = if (4..=6).contains(&(secs % 7)) {
                RECONNECT_HINT.to_string()
            } else {
                format!("ERROR! {}", msg)
            };
            return wrap_words(&text, SCREEN_COLUMNS, SCREEN_ROWS);
        }

        let pair = match &st.pair {
            None => return detection_page(None, "Please wait..."),
            Some(p) => p,
        };
        if st.already_done {
            return detection_page(Some(pair), "Already backed up");
        }
        // a finished run keeps its summary up until the cycle resets
        if pair.destination.is_none() && !st.done {
            return detection_page(Some(pair), "* Connect Drive *");
        }
        if pair.source.is_none() && !st.done {
            return detection_page(Some(pair), "* Connect Card *");
        }
        let Some(p) = &st.progress else {
            return detection_page(Some(pair), "Starting...");
        };

        let mut rows = Vec::with_capacity(SCREEN_ROWS);
        if st.done {
            rows.push("Done!".to_string());
            rows.push(format!("{}%", p.percent));
            rows.push(format!(
                "{} in {}",
                human_bytes(p.bytes_sent),
                format_duration(truncate_seconds(p.elapsed))
            ));
        } else {
            rows.push("Transferring...".to_string());
            rows.push(format!("{}%", p.percent));
            rows.push(format!("ETA: {}", format_duration(truncate_seconds(p.remaining))));
        }
        if let Some(dst) = &pair.destination {
            rows.push(format!("Drive: {}", human_bytes(dst.used)));
        }
        rows
    }

    /// All rows of the current screen joined with ` | `, used as a one-line summary.
    pub fn headline(&self, now: DateTime<Utc>) -> String {
        self.screen(now).join(" | ")
    }
}

fn detection_page(pair: Option<&FilesystemPair>, line3: &str) -> Vec<String> {
    let drive = pair
        .and_then(|p| p.destination.as_ref())
        .map(|d| format!("Drive: {}", human_bytes(d.used)))
        .unwrap_or_else(|| "Drive: --".to_string());
    let card = pair
        .and_then(|p| p.source.as_ref())
        .map(|s| format!("Card:  {}", human_bytes(s.used)))
        .unwrap_or_else(|| "Card:  --".to_string());
    vec![drive, card, line3.to_string()]
}

/// Greedy word wrap, truncated to `rows` rows.
fn wrap_words(text: &str, columns: usize, rows: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + 1 + word.len() > columns {
            out.push(std::mem::take(&mut current));
            if out.len() == rows {
                return out;
            }
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() && out.len() < rows {
        out.push(current);
    }
    out
}

impl StatusSink for StatusBoard {
    fn set_filesystems(&self, pair: FilesystemPair) {
        self.state().pair = Some(pair);
    }

    fn set_progress(&self, progress: ProgressEvent) {
        self.state().progress = Some(progress);
    }

    fn set_done(&self) {
        let mut st = self.state();
        st.progress.get_or_insert_with(ProgressEvent::default).percent = 100;
        st.done = true;
    }

    fn set_already_done(&self) {
        self.state().already_done = true;
    }

    fn set_error(&self, message: String, at: DateTime<Utc>) {
        self.state().error = Some((message, at));
    }

    fn reset(&self) {
        let mut st = self.state();
        st.done = false;
        st.already_done = false;
        st.progress = None;
        st.error = None;
    }
}

/// Terminal stand-in for the panel: a status board mirrored onto an indicatif bar.
pub struct ConsoleStatus {
    board: StatusBoard,
    bar: ProgressBar,
}

impl ConsoleStatus {
    pub fn new() -> Self {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::with_template("{spinner:.green} [{bar:30.cyan/blue}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(200));
        Self { board: StatusBoard::new(), bar }
    }

    fn refresh(&self) {
        let pos = self.board.progress().map(|p| p.percent as u64).unwrap_or(0);
        self.bar.set_position(pos);
        self.bar.set_message(self.board.headline(Utc::now()));
    }
}

impl Default for ConsoleStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSink for ConsoleStatus {
    fn set_filesystems(&self, pair: FilesystemPair) {
        self.board.set_filesystems(pair);
        self.refresh();
    }

    fn set_progress(&self, progress: ProgressEvent) {
        self.board.set_progress(progress);
        self.refresh();
    }

    fn set_done(&self) {
        self.board.set_done();
        self.refresh();
    }

    fn set_already_done(&self) {
        self.board.set_already_done();
        self.refresh();
    }

    fn set_error(&self, message: String, at: DateTime<Utc>) {
        self.board.set_error(message, at);
        self.refresh();
    }

    fn reset(&self) {
        self.board.reset();
        self.refresh();
    }
}

/// Feed every pair the watcher delivers into `sink` on a dedicated thread.
/// The thread ends when the watcher goes away.
pub fn spawn_pair_forwarder(
    watcher: &Watcher,
    sink: Arc<dyn StatusSink>,
) -> std::thread::JoinHandle<()> {
    let sub = watcher.subscribe();
    std::thread::spawn(move || {
        while let Some(pair) = sub.recv() {
            sink.set_filesystems(pair);
        }
    })
}
