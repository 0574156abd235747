//! Normalizer for the P2P relay upstream (spec §4.7) — the public
//! P2PQuake-style feed. Distinct code paths exist for user-perception
//! reports (561, no epicenter) and area-detection aggregates (9611, a peer
//! count rather than a single reading).

use canaria_protocol::{Event, ReportType, Source};
use serde::Deserialize;

use super::normalize::{parse_lenient_f64, synthetic_id};
use super::{NormalizeOutcome, Normalizer};
use crate::error::FeedError;

const ALLOWED_CODES: &[i64] = &[551, 552, 556, 561, 9611];
const USER_REPORT_CODE: i64 = 561;
const AREA_DETECTION_CODE: i64 = 9611;

#[derive(Debug, Deserialize)]
struct P2pFrame {
    id: Option<String>,
    code: i64,
    time: Option<String>,
    issue: Option<P2pIssue>,
    earthquake: Option<P2pEarthquake>,
    #[serde(default)]
    points: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct P2pIssue {
    #[serde(default)]
    r#type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct P2pEarthquake {
    hypocenter: Option<P2pHypocenter>,
}

#[derive(Debug, Deserialize)]
struct P2pHypocenter {
    name: Option<String>,
    latitude: Option<serde_json::Value>,
    longitude: Option<serde_json::Value>,
    magnitude: Option<serde_json::Value>,
    depth: Option<serde_json::Value>,
}

pub struct P2pNormalizer;

impl Normalizer for P2pNormalizer {
    fn normalize_frame(&self, raw: &str) -> Result<NormalizeOutcome, FeedError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| FeedError::Protocol(e.to_string()))?;
        if value.get("ping").is_some() {
            return Ok(NormalizeOutcome::Heartbeat);
        }
        let frame: P2pFrame =
            serde_json::from_value(value).map_err(|e| FeedError::Protocol(e.to_string()))?;
        Ok(normalize_one(frame).map(NormalizeOutcome::Event).unwrap_or(NormalizeOutcome::Ignored))
    }

    fn normalize_backlog(&self, raw: &str) -> Result<Vec<Event>, FeedError> {
        let frames: Vec<P2pFrame> =
            serde_json::from_str(raw).map_err(|e| FeedError::Protocol(e.to_string()))?;
        Ok(frames.into_iter().filter_map(normalize_one).collect())
    }
}

fn normalize_one(frame: P2pFrame) -> Option<Event> {
    if !ALLOWED_CODES.contains(&frame.code) {
        return None;
    }
    let time = frame.time.clone().unwrap_or_else(|| chrono::Utc::now().to_rfc3339());

    let (latitude, longitude, magnitude, depth, region) = if frame.code == USER_REPORT_CODE {
        // User-perception reports carry no epicenter at all.
        (None, None, None, None, None)
    } else if frame.code == AREA_DETECTION_CODE {
        // Area-detection aggregates report a peer count, not a reading.
        (None, None, None, None, None)
    } else if let Some(hypo) = frame.earthquake.as_ref().and_then(|eq| eq.hypocenter.as_ref()) {
        (
            hypo.latitude.as_ref().and_then(parse_lenient_f64),
            hypo.longitude.as_ref().and_then(parse_lenient_f64),
            hypo.magnitude.as_ref().and_then(parse_lenient_f64),
            hypo.depth.as_ref().and_then(parse_lenient_f64),
            hypo.name.clone(),
        )
    } else {
        (None, None, None, None, None)
    };

    let report_type = if frame.code == AREA_DETECTION_CODE {
        Some(ReportType::Number(frame.points.len() as f64))
    } else {
        frame.issue.as_ref().and_then(|i| i.r#type.clone()).map(ReportType::Text)
    };

    let code_str = frame.code.to_string();
    let event_id = frame
        .id
        .clone()
        .unwrap_or_else(|| synthetic_id("P2PQUAKE", &time, latitude, longitude, magnitude, &code_str, ""));

    Some(Event {
        event_id,
        source: Source::P2pQuake,
        receive_source: "P2P".to_owned(),
        kind: code_str,
        report_type,
        time,
        issue_time: None,
        receive_time: chrono::Utc::now().to_rfc3339(),
        latitude,
        longitude,
        magnitude,
        depth,
        intensity: None,
        region,
        advisory: None,
        revision: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_code_is_dropped() {
        let frame = P2pFrame { id: Some("a".into()), code: 999, time: None, issue: None, earthquake: None, points: vec![] };
        assert!(normalize_one(frame).is_none());
    }

    #[test]
    fn user_report_has_no_epicenter() {
        let frame = P2pFrame {
            id: Some("u1".into()),
            code: USER_REPORT_CODE,
            time: Some("2026-01-01T00:00:00Z".into()),
            issue: Some(P2pIssue { r#type: Some("UserReport".into()) }),
            earthquake: None,
            points: vec![],
        };
        let event = normalize_one(frame).unwrap();
        assert!(event.latitude.is_none());
        assert_eq!(event.kind, "561");
    }

    #[test]
    fn area_detection_reports_peer_count() {
        let frame = P2pFrame {
            id: Some("d1".into()),
            code: AREA_DETECTION_CODE,
            time: Some("2026-01-01T00:00:00Z".into()),
            issue: None,
            earthquake: None,
            points: vec![serde_json::json!({}), serde_json::json!({}), serde_json::json!({})],
        };
        let event = normalize_one(frame).unwrap();
        assert!(matches!(event.report_type, Some(ReportType::Number(n)) if n == 3.0));
    }
}
