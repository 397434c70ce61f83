use std::time::Duration;

/// Convert a byte count into a human readable string using IEC units (KiB/MiB/GiB/TiB).
pub fn human_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    const TB: f64 = GB * 1024.0;
    let b = bytes as f64;
    if b >= TB {
        format!("{:.2} TiB", b / TB)
    } else if b >= GB {
        format!("{:.2} GiB", b / GB)
    } else if b >= MB {
        format!("{:.2} MiB", b / MB)
    } else if b >= KB {
        format!("{:.2} KiB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}

/// Drop the sub-second part of a duration.
pub fn truncate_seconds(d: Duration) -> Duration {
    Duration::from_secs(d.as_secs())
}

/// Compact `1h2m3s` style rendering, whole seconds only. Leading zero units are omitted.
pub fn format_duration(d: Duration) -> String {
    let total = d.as_secs();
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}h{}m{}s", h, m, s)
    } else if m > 0 {
        format!("{}m{}s", m, s)
    } else {
        format!("{}s", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_bytes_units() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(1536), "1.50 KiB");
        assert_eq!(human_bytes(750 << 30), "750.00 GiB");
        assert_eq!(human_bytes(2 << 40), "2.00 TiB");
    }

    #[test]
    fn durations_render_whole_seconds() {
        assert_eq!(truncate_seconds(Duration::from_millis(13_800)), Duration::from_secs(13));
        assert_eq!(format_duration(Duration::from_millis(999)), "0s");
        assert_eq!(format_duration(Duration::from_secs(95)), "1m35s");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1h2m3s");
    }
}
