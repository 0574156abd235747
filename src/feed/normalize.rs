//! Shared normalization helpers used by both connectors (spec §4.7).

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};

/// Leniently coerce a JSON `string|number` into a finite `f64`, else `None`.
/// Matches spec §4.7's "numeric fields are parsed leniently" rule: upstream
/// feeds mix quoted and unquoted numerics, and sometimes send `""`.
pub fn parse_lenient_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
            }
        }
        _ => None,
    }
}

/// Parse an upstream timestamp, assuming JST (UTC+9) when no offset is
/// present, and always returning UTC.
pub fn parse_time_assume_jst(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    const FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y/%m/%d %H:%M:%S"];
    for fmt in FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw.trim(), fmt) {
            let jst = chrono::FixedOffset::east_opt(9 * 3600).unwrap();
            if let chrono::offset::LocalResult::Single(dt) = jst.from_local_datetime(&naive) {
                return Some(dt.with_timezone(&Utc));
            }
        }
    }
    None
}

/// Deterministic synthetic id for an authority payload that omits its own
/// id (spec §3 invariant).
pub fn synthetic_id(
    source: &str,
    time: &str,
    lat: Option<f64>,
    lon: Option<f64>,
    magnitude: Option<f64>,
    authority_code: &str,
    serial: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b"|");
    hasher.update(time.as_bytes());
    hasher.update(b"|");
    hasher.update(lat.map(|v| v.to_string()).unwrap_or_default().as_bytes());
    hasher.update(b"|");
    hasher.update(lon.map(|v| v.to_string()).unwrap_or_default().as_bytes());
    hasher.update(b"|");
    hasher.update(magnitude.map(|v| v.to_string()).unwrap_or_default().as_bytes());
    hasher.update(b"|");
    hasher.update(authority_code.as_bytes());
    hasher.update(b"|");
    hasher.update(serial.as_bytes());
    let digest = hasher.finalize();
    format!("synthetic-{}", hex::encode(&digest[..16]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenient_f64_accepts_quoted_and_bare_numbers() {
        assert_eq!(parse_lenient_f64(&serde_json::json!(3.5)), Some(3.5));
        assert_eq!(parse_lenient_f64(&serde_json::json!("3.5")), Some(3.5));
        assert_eq!(parse_lenient_f64(&serde_json::json!("")), None);
        assert_eq!(parse_lenient_f64(&serde_json::json!(null)), None);
    }

    #[test]
    fn synthetic_id_is_deterministic() {
        let a = synthetic_id("JMA", "2026-01-01T00:00:00Z", Some(1.0), Some(2.0), Some(3.0), "551", "1");
        let b = synthetic_id("JMA", "2026-01-01T00:00:00Z", Some(1.0), Some(2.0), Some(3.0), "551", "1");
        assert_eq!(a, b);
        let c = synthetic_id("JMA", "2026-01-01T00:00:00Z", Some(1.0), Some(2.0), Some(3.0), "551", "2");
        assert_ne!(a, c);
    }

    #[test]
    fn jst_naive_timestamp_normalizes_to_utc() {
        let dt = parse_time_assume_jst("2026-01-01 09:00:00").unwrap();
        assert_eq!(dt.to_rfc3339(), "2026-01-01T00:00:00+00:00");
    }
}
