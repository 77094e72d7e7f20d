//! Timestamp and interval parsing shared by the loader and the config layer.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// Parses an ISO-8601 style timestamp.
///
/// Offsets (RFC 3339) are normalized to UTC. Bare dates resolve to midnight.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(ts);
        }
    }

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Parses an interval such as `30s`, `15m`, `1h`, `1d`, `2w`, or a bare
/// number of seconds. Fractions are allowed (`0.5d`).
pub fn parse_interval(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let (number, unit_secs) = match raw.char_indices().last()? {
        (idx, 's') => (&raw[..idx], 1.0),
        (idx, 'm') => (&raw[..idx], 60.0),
        (idx, 'h') => (&raw[..idx], 3_600.0),
        (idx, 'd') => (&raw[..idx], 86_400.0),
        (idx, 'w') => (&raw[..idx], 604_800.0),
        _ => (raw, 1.0),
    };

    let value: f64 = number.trim().parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let millis = (value * unit_secs * 1_000.0).round();
    if millis >= i64::MAX as f64 {
        return None;
    }
    Duration::try_milliseconds(millis as i64)
}

/// Renders an interval in the largest unit that divides it evenly.
pub fn format_interval(interval: Duration) -> String {
    let secs = interval.num_seconds();
    if secs != 0 && interval.subsec_nanos() == 0 {
        for (unit, size) in [("w", 604_800), ("d", 86_400), ("h", 3_600), ("m", 60)] {
            if secs % size == 0 {
                return format!("{}{}", secs / size, unit);
            }
        }
    }
    if interval.subsec_nanos() == 0 {
        format!("{secs}s")
    } else {
        format!("{}ms", interval.num_milliseconds())
    }
}
