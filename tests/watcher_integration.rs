use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use offload::ScanError;
use offload::filesystem::{
    FilesystemRecord, Scanner, SizeThreshold, Watcher, WatcherSettings,
};

const GIB: u64 = 1 << 30;
const WAIT: Duration = Duration::from_secs(3);

/// Scripted mount table. `fail` makes every scan error out until cleared.
#[derive(Default)]
struct FakeMounts {
    records: Mutex<Vec<FilesystemRecord>>,
    fail: Mutex<bool>,
    scans: AtomicUsize,
}

impl FakeMounts {
    fn set(&self, records: Vec<FilesystemRecord>) {
        *self.records.lock().unwrap() = records;
    }

    fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

impl Scanner for FakeMounts {
    fn scan(&self) -> Result<Vec<FilesystemRecord>, ScanError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        if *self.fail.lock().unwrap() {
            return Err(ScanError::Parse { line: "garbage".to_string() });
        }
        Ok(self.records.lock().unwrap().clone())
    }
}

fn card() -> FilesystemRecord {
    FilesystemRecord { size: 64 * GIB, used: 12 * GIB, available: 52 * GIB, path: PathBuf::from("/media/card") }
}

fn drive() -> FilesystemRecord {
    FilesystemRecord { size: 2000 * GIB, used: 400 * GIB, available: 1600 * GIB, path: PathBuf::from("/media/drive") }
}

fn spawn(mounts: &Arc<FakeMounts>, scan_period: Duration, debounce: Duration) -> Watcher {
    let settings = WatcherSettings {
        scan_period,
        debounce,
        delivery_timeout: Duration::from_millis(200),
        queue_depth: 4,
    };
    Watcher::spawn(mounts.clone(), Arc::new(SizeThreshold::new(750 * GIB)), settings)
}

#[test]
fn first_subscriber_triggers_immediate_scan() {
    let mounts = Arc::new(FakeMounts::default());
    mounts.set(vec![card()]);
    let watcher = spawn(&mounts, Duration::from_secs(3600), Duration::from_millis(50));

    let sub = watcher.subscribe();
    let pair = sub.recv_timeout(WAIT).expect("initial pair");

    assert_eq!(pair.source, Some(card()));
    assert_eq!(pair.destination, None);
    assert_eq!(mounts.scans(), 1);
}

#[test]
fn burst_of_changes_causes_one_scan() {
    let mounts = Arc::new(FakeMounts::default());
    let watcher = spawn(&mounts, Duration::from_secs(3600), Duration::from_millis(150));
    let sub = watcher.subscribe();
    sub.recv_timeout(WAIT).expect("initial pair");

    mounts.set(vec![card(), drive()]);
    for _ in 0..10 {
        watcher.notify_change();
    }
    let pair = sub.recv_timeout(WAIT).expect("debounced pair");
    assert!(pair.is_complete());

    std::thread::sleep(Duration::from_millis(400));
    assert_eq!(mounts.scans(), 2);
    assert!(sub.recv_timeout(Duration::from_millis(50)).is_err());
}

#[test]
fn periodic_rescan_without_changes() {
    let mounts = Arc::new(FakeMounts::default());
    let watcher = spawn(&mounts, Duration::from_millis(30), Duration::from_millis(10));
    let sub = watcher.subscribe();
    for _ in 0..3 {
        sub.recv_timeout(WAIT).expect("periodic pair");
    }
    assert!(mounts.scans() >= 3);
}

#[test]
fn every_subscriber_sees_the_same_sequence() {
    let mounts = Arc::new(FakeMounts::default());
    let watcher = spawn(&mounts, Duration::from_secs(3600), Duration::from_millis(20));
    let a = watcher.subscribe();
    let b = watcher.subscribe();
    // b joined after the first scan and gets the replayed state
    let first_a = a.recv_timeout(WAIT).unwrap();
    let first_b = b.recv_timeout(WAIT).unwrap();
    assert_eq!(first_a, first_b);

    mounts.set(vec![card()]);
    watcher.notify_change();
    let second_a = a.recv_timeout(WAIT).unwrap();
    let second_b = b.recv_timeout(WAIT).unwrap();
    assert_eq!(second_a, second_b);
    assert_eq!(second_a.source, Some(card()));

    mounts.set(vec![card(), drive()]);
    watcher.notify_change();
    assert!(a.recv_timeout(WAIT).unwrap().is_complete());
    assert!(b.recv_timeout(WAIT).unwrap().is_complete());
}

#[test]
fn late_subscriber_gets_replay_without_new_scan() {
    let mounts = Arc::new(FakeMounts::default());
    mounts.set(vec![card(), drive()]);
    let watcher = spawn(&mounts, Duration::from_secs(3600), Duration::from_millis(20));
    let early = watcher.subscribe();
    early.recv_timeout(WAIT).unwrap();

    let late = watcher.subscribe();
    let replay = late.recv_timeout(WAIT).expect("replayed pair");

    assert!(replay.is_complete());
    assert_eq!(mounts.scans(), 1);
}

#[test]
fn failed_scan_keeps_previous_state_and_delivers_nothing() {
    let mounts = Arc::new(FakeMounts::default());
    mounts.set(vec![card()]);
    let watcher = spawn(&mounts, Duration::from_secs(3600), Duration::from_millis(20));
    let sub = watcher.subscribe();
    sub.recv_timeout(WAIT).unwrap();

    mounts.set_failing(true);
    watcher.notify_change();
    assert!(sub.recv_timeout(Duration::from_millis(300)).is_err());
    assert_eq!(mounts.scans(), 2);

    // the replay a newcomer receives is still the last good pair
    let newcomer = watcher.subscribe();
    assert_eq!(newcomer.recv_timeout(WAIT).unwrap().source, Some(card()));

    mounts.set_failing(false);
    mounts.set(vec![card(), drive()]);
    watcher.notify_change();
    assert!(sub.recv_timeout(WAIT).unwrap().is_complete());
}

#[test]
fn ambiguous_mounts_are_not_delivered() {
    let mounts = Arc::new(FakeMounts::default());
    let mut second_card = card();
    second_card.path = PathBuf::from("/media/card2");
    mounts.set(vec![card(), second_card]);
    let watcher = spawn(&mounts, Duration::from_secs(3600), Duration::from_millis(20));

    let sub = watcher.subscribe();
    assert!(sub.recv_timeout(Duration::from_millis(300)).is_err());

    mounts.set(vec![card()]);
    watcher.notify_change();
    assert_eq!(sub.recv_timeout(WAIT).unwrap().source, Some(card()));
}

#[test]
fn watcher_goes_idle_without_subscribers() {
    let mounts = Arc::new(FakeMounts::default());
    let watcher = spawn(&mounts, Duration::from_millis(30), Duration::from_millis(10));
    let sub = watcher.subscribe();
    sub.recv_timeout(WAIT).unwrap();
    sub.close();

    std::thread::sleep(Duration::from_millis(100));
    let settled = mounts.scans();
    watcher.notify_change();
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(mounts.scans(), settled);
}

#[test]
fn slow_subscriber_does_not_stall_others() {
    let mounts = Arc::new(FakeMounts::default());
    let watcher = spawn(&mounts, Duration::from_millis(20), Duration::from_millis(5));
    let _stalled = watcher.subscribe();
    let active = watcher.subscribe();

    // the stalled queue fills after four pairs; delivery then times out and moves on
    let mut received = 0;
    while received < 10 {
        active.recv_timeout(WAIT).expect("active subscriber starved");
        received += 1;
    }
}

#[test]
fn dropping_the_watcher_ends_subscriptions() {
    let mounts = Arc::new(FakeMounts::default());
    let watcher = spawn(&mounts, Duration::from_secs(3600), Duration::from_millis(20));
    let sub = watcher.subscribe();
    sub.recv_timeout(WAIT).unwrap();
    drop(watcher);
    assert!(sub.recv().is_none());
}
