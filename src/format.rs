use chrono::{DateTime, Local, Utc};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

pub fn usd(value: f64) -> String {
    if value < 0.0 {
        format!("-${:.4}", -value)
    } else {
        format!("${:.4}", value)
    }
}

/// 5_000_000_000 -> "5.0B"
pub fn compact(value: f64) -> String {
    let abs = value.abs();
    if abs >= 1_000_000_000.0 {
        format!("{:.1}B", value / 1_000_000_000.0)
    } else if abs >= 1_000_000.0 {
        format!("{:.1}M", value / 1_000_000.0)
    } else if abs >= 1_000.0 {
        format!("{:.1}K", value / 1_000.0)
    } else {
        format!("{:.0}", value)
    }
}

pub fn compact_usd(value: f64) -> String {
    format!("${}", compact(value))
}

pub fn pct(value: f64) -> String {
    format!("{:.2}%", value)
}

pub fn format_timestamp(ts_ms: i64) -> String {
    if ts_ms == 0 {
        return "Never".to_string();
    }
    let seconds = ts_ms.div_euclid(1000);
    let nanoseconds = (ts_ms.rem_euclid(1000) * 1_000_000) as u32;
    DateTime::from_timestamp(seconds, nanoseconds)
        .map(|dt| dt.format("%d-%m-%Y %H:%M:%S").to_string())
        .unwrap_or_else(|| "Unknown Time".to_string())
}

/// Chart axis label; the format coarsens as the visible span grows.
pub fn axis_label(ts_ms: i64, span_ms: i64) -> String {
    let Some(dt) = DateTime::from_timestamp_millis(ts_ms) else {
        return String::new();
    };
    let pattern = if span_ms > 365 * DAY_MS {
        "%Y/%m"
    } else if span_ms > 2 * DAY_MS {
        "%m/%d"
    } else {
        "%H:%M"
    };
    dt.format(pattern).to_string()
}

pub fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M:%S").to_string()
}
