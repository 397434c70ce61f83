use std::path::PathBuf;
use std::time::Duration;

use offload::config::{CompletionMarkerMode, Config};
use offload::filesystem::{Classifier, SizeThreshold};
use offload::parse;

const DF: &str = "\
Filesystem        1B-blocks          Used     Available Use% Mounted on
/dev/sda1     2000398934016  104857600000 1895541334016   6% /media/Backup Drive
/dev/mmcblk1p1  63847284736   41943040000   21904244736  66% /media/EOS_DIGITAL
";

#[test]
fn test_df_output_classifies_into_pair() {
    let records = parse::parse_df_output(DF).unwrap();
    let pair = SizeThreshold::new(750 << 30).classify(records).unwrap();
    assert!(pair.is_complete());
    assert_eq!(pair.destination.unwrap().path, PathBuf::from("/media/Backup Drive"));
    let source = pair.source.unwrap();
    assert_eq!(source.path, PathBuf::from("/media/EOS_DIGITAL"));
    assert_eq!(source.used, 41_943_040_000);
}

#[test]
fn test_rsync_transcript_splits_into_progress_and_log_lines() {
    let transcript = "sending incremental file list\n\
        DCIM/\n\
        DCIM/100CANON/IMG_0001.CR2\n\
        \x20    26,214,400  25%   25.00MB/s    0:00:01 (xfr#1, to-chk=3/5)\n\
        DCIM/100CANON/IMG_0002.CR2\n\
        \x20   104,857,600 100%   33.33MB/s    0:00:03 (xfr#4, to-chk=0/5)\n\
        \n\
        sent 104,870,012 bytes  received 96 bytes  29,962,888.00 bytes/sec\n\
        total size is 104,857,600  speedup is 1.00\n";

    let mut progress = Vec::new();
    let mut logged = Vec::new();
    for line in transcript.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match parse::parse_progress_line(line, Duration::from_secs(2)) {
            Some(p) => progress.push(p),
            None => logged.push(line),
        }
    }

    assert_eq!(progress.iter().map(|p| p.percent).collect::<Vec<_>>(), vec![25, 100]);
    assert_eq!(progress[0].remaining, Duration::from_secs(6));
    assert_eq!(progress[1].remaining, Duration::ZERO);
    assert_eq!(progress[1].bytes_sent, 104_857_600);
    assert_eq!(logged.len(), 6);
    assert!(logged.iter().any(|l| l.starts_with("sent 104,870,012 bytes")));
}

#[test]
fn test_config_file_partial_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(
        &path,
        r#"{ "media_root": "/mnt/media", "debounce_ms": 250, "completion_marker": "beside_source" }"#,
    )
    .unwrap();

    let cfg = Config::load(&path).unwrap();
    assert_eq!(cfg.media_root, PathBuf::from("/mnt/media"));
    assert_eq!(cfg.debounce(), Duration::from_millis(250));
    assert_eq!(cfg.completion_marker, CompletionMarkerMode::BesideSource);
    assert_eq!(cfg.scan_period(), Config::default().scan_period());
}

#[test]
fn test_config_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = Config::load(&dir.path().join("absent.json")).unwrap();
    assert_eq!(cfg.destination_threshold, 750 << 30);
    assert_eq!(cfg.completion_marker, CompletionMarkerMode::RunDirectory);
}

#[test]
fn test_config_rejects_zero_period() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, r#"{ "scan_period_secs": 0 }"#).unwrap();
    let err = Config::load(&path).unwrap_err();
    assert!(err.to_string().contains("scan_period_secs"));
}
