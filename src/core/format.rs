//! Human-readable rendering of sizes, counts and elapsed time.
//!
//! These strings appear in the audit log, clean result messages and CLI output,
//! so they favour short, stable forms ("1.5 GB", "3 hours ago").

#![allow(clippy::cast_precision_loss)]

const KB: u64 = 1024;
const MB: u64 = KB * 1024;
const GB: u64 = MB * 1024;

/// Sizes at or above this many bytes are shown in GB.
const GB_DISPLAY_FROM: u64 = 1000 * MB;

/// Format a byte count: `"0 B"`, `"512 B"`, `"4 KB"`, `"750 MB"`, `"1.5 GB"`.
///
/// GB values carry one decimal, dropped when it is zero. KB and MB are whole
/// numbers (floor).
pub fn format_size(bytes: u64) -> String {
    if bytes >= GB_DISPLAY_FROM {
        let tenths = (bytes as f64 / GB as f64 * 10.0).round() / 10.0;
        if (tenths - tenths.floor()).abs() < 0.01 {
            format!("{tenths:.0} GB")
        } else {
            format!("{tenths:.1} GB")
        }
    } else if bytes >= MB {
        format!("{} MB", bytes / MB)
    } else if bytes >= KB {
        format!("{} KB", bytes / KB)
    } else {
        format!("{bytes} B")
    }
}

/// Group digits with commas: `1250` → `"1,250"`.
pub fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Coarse duration in the largest whole unit: `"1 second"`, `"5 minutes"`, `"2 days"`.
pub fn format_duration(secs: u64) -> String {
    let (value, unit) = match secs {
        0..=59 => (secs, "second"),
        60..=3_599 => (secs / 60, "minute"),
        3_600..=86_399 => (secs / 3_600, "hour"),
        _ => (secs / 86_400, "day"),
    };
    if value == 1 {
        format!("1 {unit}")
    } else {
        format!("{value} {unit}s")
    }
}

/// `"Never"` for a zero timestamp, otherwise `"<duration> ago"` relative to `now`.
///
/// A timestamp in the future renders as `"0 seconds ago"`.
pub fn time_since(last_clean_timestamp: u64, now: u64) -> String {
    if last_clean_timestamp == 0 {
        return "Never".to_string();
    }
    format!(
        "{} ago",
        format_duration(now.saturating_sub(last_clean_timestamp))
    )
}

/// Current wall-clock time as unix seconds.
pub fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}
