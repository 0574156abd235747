//! Normalizer for the JMA EEW relay upstream (spec §4.7). The wire shape
//! mirrors the well-known Wolfx JMA EEW relay: quoted numerics, JST
//! timestamps without an offset, and a misspelled `Magunitude` field that
//! upstream has never corrected.

use canaria_protocol::{Event, ReportType, Source};
use serde::Deserialize;

use super::normalize::{parse_lenient_f64, parse_time_assume_jst, synthetic_id};
use super::{NormalizeOutcome, Normalizer};
use crate::error::FeedError;

const ALLOWED_CODES: &[&str] = &["551", "552", "556", "561", "9611"];

#[derive(Debug, Deserialize)]
struct JmaFrame {
    #[serde(default, rename = "type")]
    frame_type: Option<String>,
    #[serde(rename = "EventID")]
    event_id: Option<String>,
    #[serde(rename = "Serial")]
    serial: Option<String>,
    #[serde(rename = "CodeType")]
    code_type: Option<String>,
    #[serde(rename = "OriginTime")]
    origin_time: Option<String>,
    #[serde(rename = "AnnouncedTime")]
    announced_time: Option<String>,
    #[serde(rename = "Latitude")]
    latitude: Option<serde_json::Value>,
    #[serde(rename = "Longitude")]
    longitude: Option<serde_json::Value>,
    #[serde(rename = "Magunitude")]
    magnitude: Option<serde_json::Value>,
    #[serde(rename = "Depth")]
    depth: Option<serde_json::Value>,
    #[serde(rename = "MaxIntensity")]
    max_intensity: Option<String>,
    #[serde(rename = "Hypocenter")]
    hypocenter: Option<String>,
}

pub struct JmaNormalizer;

impl Normalizer for JmaNormalizer {
    fn normalize_frame(&self, raw: &str) -> Result<NormalizeOutcome, FeedError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| FeedError::Protocol(e.to_string()))?;
        if value.get("type").and_then(|v| v.as_str()) == Some("heartbeat") {
            return Ok(NormalizeOutcome::Heartbeat);
        }
        let frame: JmaFrame =
            serde_json::from_value(value).map_err(|e| FeedError::Protocol(e.to_string()))?;
        normalize_one(frame).map(|e| e.map(NormalizeOutcome::Event).unwrap_or(NormalizeOutcome::Ignored))
    }

    fn normalize_backlog(&self, raw: &str) -> Result<Vec<Event>, FeedError> {
        let frames: Vec<JmaFrame> =
            serde_json::from_str(raw).map_err(|e| FeedError::Protocol(e.to_string()))?;
        let mut out = Vec::new();
        for frame in frames {
            if let Some(event) = normalize_one(frame)? {
                out.push(event);
            }
        }
        Ok(out)
    }
}

fn normalize_one(frame: JmaFrame) -> Result<Option<Event>, FeedError> {
    let Some(code) = frame.code_type.clone() else { return Ok(None) };
    if !ALLOWED_CODES.contains(&code.as_str()) {
        return Ok(None);
    }
    let origin_raw = frame.origin_time.as_deref().unwrap_or_default();
    let time = parse_time_assume_jst(origin_raw)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| chrono::Utc::now().to_rfc3339());
    let issue_time = frame
        .announced_time
        .as_deref()
        .and_then(parse_time_assume_jst)
        .map(|dt| dt.to_rfc3339());

    let latitude = frame.latitude.as_ref().and_then(parse_lenient_f64);
    let longitude = frame.longitude.as_ref().and_then(parse_lenient_f64);
    let magnitude = frame.magnitude.as_ref().and_then(parse_lenient_f64);
    let depth = frame.depth.as_ref().and_then(parse_lenient_f64);

    let serial = frame.serial.clone().unwrap_or_default();
    let event_id = frame.event_id.clone().unwrap_or_else(|| {
        synthetic_id("JMA", &time, latitude, longitude, magnitude, &code, &serial)
    });

    Ok(Some(Event {
        event_id,
        source: Source::Jma,
        receive_source: "WolfX".to_owned(),
        kind: frame.frame_type.unwrap_or_else(|| "EEW".to_owned()),
        report_type: Some(ReportType::Text(code)),
        time,
        issue_time,
        receive_time: chrono::Utc::now().to_rfc3339(),
        latitude,
        longitude,
        magnitude,
        depth,
        intensity: frame.max_intensity.as_deref().and_then(parse_intensity_scale),
        region: frame.hypocenter,
        advisory: None,
        revision: frame.serial,
    }))
}

/// JMA reports intensity as a scale token (`5-`, `6+`, ...); map it onto a
/// numeric axis so it sits alongside the other numeric fields.
fn parse_intensity_scale(token: &str) -> Option<f64> {
    let trimmed = token.trim();
    let (digits, suffix) = trimmed.split_at(trimmed.trim_end_matches(['-', '+']).len());
    let base: f64 = digits.parse().ok()?;
    Some(match suffix {
        "-" => base - 0.3,
        "+" => base + 0.3,
        _ => base,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disallowed_code_is_ignored() {
        let frame = JmaFrame {
            frame_type: Some("EEW".to_owned()),
            event_id: Some("1".to_owned()),
            serial: Some("1".to_owned()),
            code_type: Some("000".to_owned()),
            origin_time: Some("2026/01/01 09:00:00".to_owned()),
            announced_time: None,
            latitude: None,
            longitude: None,
            magnitude: None,
            depth: None,
            max_intensity: None,
            hypocenter: None,
        };
        assert!(normalize_one(frame).unwrap().is_none());
    }

    #[test]
    fn missing_id_gets_a_synthetic_one() {
        let frame = JmaFrame {
            frame_type: Some("EEW".to_owned()),
            event_id: None,
            serial: Some("7".to_owned()),
            code_type: Some("551".to_owned()),
            origin_time: Some("2026/01/01 09:00:00".to_owned()),
            announced_time: None,
            latitude: Some(serde_json::json!("34.5")),
            longitude: Some(serde_json::json!("135.2")),
            magnitude: Some(serde_json::json!("5.0")),
            depth: None,
            max_intensity: Some("5-".to_owned()),
            hypocenter: Some("Osaka".to_owned()),
        };
        let event = normalize_one(frame).unwrap().unwrap();
        assert!(event.event_id.starts_with("synthetic-"));
        assert_eq!(event.magnitude, Some(5.0));
        assert_eq!(event.intensity, Some(4.7));
    }
}
