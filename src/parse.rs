use std::path::PathBuf;
use std::time::Duration;

use crate::error::ScanError;
use crate::filesystem::FilesystemRecord;
use crate::transfer::ProgressEvent;

/// Parse `df -B1` output: one header line, then
/// `filesystem size used available use% mountpoint` per line.
///
/// Blank lines are skipped. Any data line with fewer than six fields or a
/// non-numeric size column fails the whole parse; there are no partial results.
pub fn parse_df_output(output: &str) -> Result<Vec<FilesystemRecord>, ScanError> {
    let mut records = Vec::new();
    for line in output.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        if fields.len() < 6 {
            return Err(ScanError::Parse { line: line.to_string() });
        }
        let number = |s: &str| -> Result<u64, ScanError> {
            s.parse::<u64>().map_err(|_| ScanError::Parse { line: line.to_string() })
        };
        records.push(FilesystemRecord {
            size: number(fields[1])?,
            used: number(fields[2])?,
            available: number(fields[3])?,
            // mountpoints with spaces arrive split; the tail is the whole path
            path: PathBuf::from(fields[5..].join(" ")),
        });
    }
    Ok(records)
}

/// Try to read an rsync `--info=progress2` line such as
/// `1,048,576  42%  3.50MB/s  0:00:10`.
///
/// Returns `None` for anything that is not a progress line; the caller logs those.
pub fn parse_progress_line(line: &str, elapsed: Duration) -> Option<ProgressEvent> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 3 {
        return None;
    }
    let (pct, _) = fields[1].split_once('%')?;
    let percent: i64 = pct.parse().ok()?;
    if !(0..=100).contains(&percent) {
        return None;
    }
    let bytes_sent: u64 = fields[0].replace(',', "").parse().ok()?;

    let remaining = if percent > 0 {
        let total = elapsed.as_nanos() * 100 / percent as u128;
        Duration::from_nanos(u64::try_from(total).unwrap_or(u64::MAX)).saturating_sub(elapsed)
    } else {
        Duration::ZERO
    };

    Some(ProgressEvent {
        percent: percent as u8,
        bytes_sent,
        rate: fields[2].to_string(),
        elapsed,
        remaining,
    })
}
