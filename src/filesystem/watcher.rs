use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, bounded, select, unbounded};
use notify::{RecommendedWatcher, RecursiveMode, Watcher as _};

use super::{Classifier, FilesystemPair, Scanner};
use crate::config::Config;

/// Timing knobs for the watcher loop.
#[derive(Debug, Clone, Copy)]
pub struct WatcherSettings {
    pub scan_period: Duration,
    pub debounce: Duration,
    /// How long delivery blocks on one full subscriber queue before skipping it.
    pub delivery_timeout: Duration,
    pub queue_depth: usize,
}

impl Default for WatcherSettings {
    fn default() -> Self {
        Self {
            scan_period: Duration::from_secs(10),
            debounce: Duration::from_secs(1),
            delivery_timeout: Duration::from_secs(2),
            queue_depth: 4,
        }
    }
}

impl WatcherSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            scan_period: config.scan_period(),
            debounce: config.debounce(),
            delivery_timeout: config.delivery_timeout(),
            ..Self::default()
        }
    }
}

enum Control {
    Subscribe { id: u64, tx: Sender<FilesystemPair> },
    Unsubscribe(u64),
    Shutdown,
}

/// Handle to the watcher thread. The thread owns the filesystem state;
/// consumers only ever see delivered copies through a [`Subscription`].
pub struct Watcher {
    control_tx: Sender<Control>,
    change_tx: Sender<()>,
    next_id: AtomicU64,
    queue_depth: usize,
    fs_watcher: Option<RecommendedWatcher>,
    handle: Option<JoinHandle<()>>,
}

impl Watcher {
    pub fn spawn(
        scanner: Arc<dyn Scanner>,
        classifier: Arc<dyn Classifier>,
        settings: WatcherSettings,
    ) -> Self {
        let (control_tx, control_rx) = unbounded();
        let (change_tx, change_rx) = unbounded();
        let state = WatchLoop {
            scanner,
            classifier,
            settings,
            subscribers: Vec::new(),
            last: None,
            schedule: RescanSchedule::new(settings.scan_period, settings.debounce),
        };
        let handle = std::thread::spawn(move || state.run(control_rx, change_rx));
        Self {
            control_tx,
            change_tx,
            next_id: AtomicU64::new(1),
            queue_depth: settings.queue_depth.max(1),
            fs_watcher: None,
            handle: Some(handle),
        }
    }

    /// Register for OS change notifications on `path` (normally the media root).
    /// Each event only schedules a debounced rescan.
    pub fn watch_mounts(&mut self, path: &Path) -> notify::Result<()> {
        let change_tx = self.change_tx.clone();
        let mut fs_watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
            match event {
                Ok(ev) => {
                    tracing::debug!("[watcher] change event {:?} on {:?}", ev.kind, ev.paths);
                    let _ = change_tx.send(());
                }
                Err(e) => tracing::warn!("[watcher] notify error: {}", e),
            }
        })?;
        fs_watcher.watch(path, RecursiveMode::NonRecursive)?;
        self.fs_watcher = Some(fs_watcher);
        Ok(())
    }

    /// Signal that mounts may have changed, exactly as an OS notification would.
    pub fn notify_change(&self) {
        let _ = self.change_tx.send(());
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = bounded(self.queue_depth);
        let _ = self.control_tx.send(Control::Subscribe { id, tx });
        Subscription { id, rx, control_tx: self.control_tx.clone() }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.fs_watcher.take();
        let _ = self.control_tx.send(Control::Shutdown);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// One consumer's view of pair updates. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    rx: Receiver<FilesystemPair>,
    control_tx: Sender<Control>,
}

impl Subscription {
    /// Block for the next pair; `None` once the watcher is gone.
    pub fn recv(&self) -> Option<FilesystemPair> {
        self.rx.recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<FilesystemPair, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    pub fn close(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.control_tx.send(Control::Unsubscribe(self.id));
    }
}

/// Block until a pair with both a source and a destination shows up.
pub fn wait_for_connect(watcher: &Watcher) -> Option<FilesystemPair> {
    wait_for(watcher, FilesystemPair::is_complete)
}

/// Block until a pair without a source shows up.
pub fn wait_for_disconnect(watcher: &Watcher) -> Option<FilesystemPair> {
    wait_for(watcher, FilesystemPair::source_removed)
}

fn wait_for(watcher: &Watcher, cond: impl Fn(&FilesystemPair) -> bool) -> Option<FilesystemPair> {
    let sub = watcher.subscribe();
    while let Some(pair) = sub.recv() {
        if cond(&pair) {
            return Some(pair);
        }
    }
    None
}

/// When the next rescan is due. A change notification opens a debounce
/// window; further notifications inside that window do not move it.
#[derive(Debug, Clone)]
struct RescanSchedule {
    period: Duration,
    debounce: Duration,
    deadline: Option<Instant>,
    debouncing: bool,
}

impl RescanSchedule {
    fn new(period: Duration, debounce: Duration) -> Self {
        Self { period, debounce, deadline: None, debouncing: false }
    }

    fn on_change(&mut self, now: Instant) {
        if self.debouncing {
            return;
        }
        self.debouncing = true;
        self.deadline = Some(now + self.debounce);
    }

    fn on_scanned(&mut self, now: Instant) {
        self.debouncing = false;
        self.deadline = Some(now + self.period);
    }

    fn idle(&mut self) {
        self.debouncing = false;
        self.deadline = None;
    }
}

struct WatchLoop {
    scanner: Arc<dyn Scanner>,
    classifier: Arc<dyn Classifier>,
    settings: WatcherSettings,
    subscribers: Vec<(u64, Sender<FilesystemPair>)>,
    last: Option<FilesystemPair>,
    schedule: RescanSchedule,
}

impl WatchLoop {
    fn run(mut self, control_rx: Receiver<Control>, change_rx: Receiver<()>) {
        loop {
            let timer = match self.schedule.deadline {
                Some(at) => crossbeam_channel::at(at),
                None => crossbeam_channel::never(),
            };
            select! {
                recv(control_rx) -> msg => match msg {
                    Ok(Control::Subscribe { id, tx }) => self.add(id, tx),
                    Ok(Control::Unsubscribe(id)) => self.remove(id),
                    Ok(Control::Shutdown) | Err(_) => break,
                },
                recv(change_rx) -> msg => match msg {
                    // idle watchers ignore changes; the first subscriber scans anyway
                    Ok(()) if !self.subscribers.is_empty() => self.schedule.on_change(Instant::now()),
                    Ok(()) => {}
                    Err(_) => break,
                },
                recv(timer) -> _ => self.rescan(),
            }
        }
        tracing::debug!("[watcher] loop stopped");
    }

    fn add(&mut self, id: u64, tx: Sender<FilesystemPair>) {
        let first = self.subscribers.is_empty();
        self.subscribers.push((id, tx));
        tracing::debug!("[watcher] subscriber {} added ({} total)", id, self.subscribers.len());
        if first {
            self.rescan();
        } else if let Some(pair) = self.last.clone()
            && let Some((_, tx)) = self.subscribers.last()
            && let Err(SendTimeoutError::Timeout(_)) =
                tx.send_timeout(pair, self.settings.delivery_timeout)
        {
            tracing::warn!("[watcher] subscriber {} did not take the initial state", id);
        }
    }

    fn remove(&mut self, id: u64) {
        self.subscribers.retain(|(sid, _)| *sid != id);
        tracing::debug!("[watcher] subscriber {} removed ({} left)", id, self.subscribers.len());
        if self.subscribers.is_empty() {
            self.schedule.idle();
        }
    }

    fn rescan(&mut self) {
        if self.subscribers.is_empty() {
            self.schedule.idle();
            return;
        }
        let result = self.scanner.scan().and_then(|records| self.classifier.classify(records));
        match result {
            Ok(pair) => {
                self.deliver(&pair);
                self.last = Some(pair);
            }
            Err(e) => tracing::warn!("[watcher] failed filesystem scan: {}", e),
        }
        self.schedule.on_scanned(Instant::now());
    }

    fn deliver(&mut self, pair: &FilesystemPair) {
        let timeout = self.settings.delivery_timeout;
        self.subscribers.retain(|(id, tx)| match tx.send_timeout(pair.clone(), timeout) {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(_)) => {
                tracing::warn!("[watcher] subscriber {} is not keeping up, update skipped", id);
                true
            }
            Err(SendTimeoutError::Disconnected(_)) => false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_of_changes_opens_one_window() {
        let mut s = RescanSchedule::new(Duration::from_secs(10), Duration::from_secs(1));
        let t0 = Instant::now();
        s.on_scanned(t0);
        assert_eq!(s.deadline, Some(t0 + Duration::from_secs(10)));
        s.on_change(t0 + Duration::from_millis(100));
        let window = s.deadline;
        assert_eq!(window, Some(t0 + Duration::from_millis(1100)));
        for ms in [200, 400, 900] {
            s.on_change(t0 + Duration::from_millis(ms));
            assert_eq!(s.deadline, window);
        }
        s.on_scanned(t0 + Duration::from_millis(1100));
        assert_eq!(s.deadline, Some(t0 + Duration::from_millis(11_100)));
    }

    #[test]
    fn idle_clears_deadline() {
        let mut s = RescanSchedule::new(Duration::from_secs(10), Duration::from_secs(1));
        s.on_change(Instant::now());
        s.idle();
        assert!(s.deadline.is_none());
        s.on_change(Instant::now());
        assert!(s.deadline.is_some());
    }
}
