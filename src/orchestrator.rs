use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{Sender, bounded, select};

use crate::config::{CompletionMarkerMode, Config};
use crate::error::TransferError;
use crate::filesystem::{FilesystemPair, Watcher, wait_for_connect, wait_for_disconnect};
use crate::status::StatusSink;
use crate::transfer::{TransferReport, TransferRunner};

const PROGRESS_QUEUE: usize = 16;

/// Where the appliance is in its insert → copy → remove cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    WaitingForMedia,
    /// Source already carries a completion marker; nothing to copy.
    AlreadyBackedUp,
    Settling,
    Transferring,
    Succeeded,
    Failed,
    WaitingForRemoval,
}

#[derive(Debug)]
pub enum CycleOutcome {
    Succeeded(TransferReport),
    Failed(TransferError),
    AlreadyBackedUp,
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    /// Pause between detection and starting the copy, so "detected" is visible.
    pub settle_delay: Duration,
    /// Skip sources that already carry `backup-marker.txt`.
    pub skip_marked_sources: bool,
}

impl OrchestratorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            settle_delay: config.settle_delay(),
            skip_marked_sources: config.completion_marker == CompletionMarkerMode::BesideSource,
        }
    }
}

pub struct Orchestrator {
    watcher: Arc<Watcher>,
    runner: Arc<dyn TransferRunner>,
    status: Arc<dyn StatusSink>,
    settings: OrchestratorSettings,
    observer: Option<Sender<Phase>>,
}

impl Orchestrator {
    pub fn new(
        watcher: Arc<Watcher>,
        runner: Arc<dyn TransferRunner>,
        status: Arc<dyn StatusSink>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self { watcher, runner, status, settings, observer: None }
    }

    /// Publish every phase change on `tx` in addition to logging it.
    pub fn with_observer(mut self, tx: Sender<Phase>) -> Self {
        self.observer = Some(tx);
        self
    }

    /// Run cycles forever. Only returns if the watcher stops delivering.
    pub fn run(&self) {
        loop {
            match self.run_cycle() {
                Some(outcome) => tracing::debug!("[orchestrator] cycle finished: {:?}", outcome),
                None => {
                    tracing::warn!("[orchestrator] watcher stopped, leaving loop");
                    return;
                }
            }
        }
    }

    /// One full insert → transfer → removal cycle.
    pub fn run_cycle(&self) -> Option<CycleOutcome> {
        self.enter(Phase::WaitingForMedia);
        let pair = wait_for_connect(&self.watcher)?;

        let already = self.settings.skip_marked_sources
            && pair.source.as_ref().is_some_and(|s| s.has_marker());
        let outcome = if already {
            self.enter(Phase::AlreadyBackedUp);
            self.status.set_already_done();
            CycleOutcome::AlreadyBackedUp
        } else {
            self.enter(Phase::Settling);
            std::thread::sleep(self.settings.settle_delay);
            self.enter(Phase::Transferring);
            match self.transfer(&pair) {
                Ok(report) => {
                    self.enter(Phase::Succeeded);
                    tracing::info!("[orchestrator] done! backup in {}", report.run_dir.display());
                    self.status.set_done();
                    CycleOutcome::Succeeded(report)
                }
                Err(e) => {
                    self.enter(Phase::Failed);
                    tracing::error!("[orchestrator] {}", e);
                    self.status.set_error(e.to_string(), Utc::now());
                    CycleOutcome::Failed(e)
                }
            }
        };

        self.enter(Phase::WaitingForRemoval);
        wait_for_disconnect(&self.watcher)?;
        self.status.reset();
        Some(outcome)
    }

    fn transfer(&self, pair: &FilesystemPair) -> Result<TransferReport, TransferError> {
        let (progress_tx, progress_rx) = bounded(PROGRESS_QUEUE);
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let status = self.status.clone();
        // stray drain threads may keep a sender alive, so stop is explicit
        let forwarder = std::thread::spawn(move || {
            loop {
                select! {
                    recv(progress_rx) -> p => match p {
                        Ok(p) => status.set_progress(p),
                        Err(_) => return,
                    },
                    recv(stop_rx) -> _ => {
                        while let Ok(p) = progress_rx.try_recv() {
                            status.set_progress(p);
                        }
                        return;
                    },
                }
            }
        });
        let result = self.runner.run(pair, progress_tx);
        let _ = stop_tx.send(());
        let _ = forwarder.join();
        result
    }

    fn enter(&self, phase: Phase) {
        tracing::info!("[orchestrator] -> {:?}", phase);
        if let Some(tx) = &self.observer {
            let _ = tx.send(phase);
        }
    }
}
