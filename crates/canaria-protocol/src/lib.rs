// canaria-protocol: wire types shared between the core engine, the feed
// connectors' upstream frames, and the authenticated poller's submissions.
//
// `Event` is the canonical shape (spec §3); everything else is the signed
// envelope / WebSocket frame shapes the HTTP and WS surfaces speak (spec §6).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Authority / source
// ---------------------------------------------------------------------------

/// Logical authority a bulletin originates from, distinct from the concrete
/// feed that delivered it (`Event::receive_source`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Source {
    #[serde(rename = "KMA")]
    Kma,
    #[serde(rename = "JMA")]
    Jma,
    #[serde(rename = "P2PQUAKE")]
    P2pQuake,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Kma => "KMA",
            Source::Jma => "JMA",
            Source::P2pQuake => "P2PQUAKE",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Source {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "KMA" => Ok(Source::Kma),
            "JMA" => Ok(Source::Jma),
            "P2PQUAKE" => Ok(Source::P2pQuake),
            other => Err(format!("unknown source: {other}")),
        }
    }
}

/// Authority sub-classification: `reportType` is authority-specific and may
/// arrive as free text or a numeric code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReportType {
    Text(String),
    Number(f64),
}

// ---------------------------------------------------------------------------
// Event (spec §3)
// ---------------------------------------------------------------------------

/// Canonical earthquake observation. Field names are camelCase on the wire
/// to match the HTTP/WS surface in spec §6.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_id: String,
    pub source: Source,
    pub receive_source: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_type: Option<ReportType>,
    pub time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_time: Option<String>,
    pub receive_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magnitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intensity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advisory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

// ---------------------------------------------------------------------------
// Heartbeat (poller -> ingest, spec §3 / §4.8)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub authority_reachable: bool,
    pub last_parse_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event_time: Option<String>,
    pub delay_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Poller submission body (POST /v1/events, spec §6)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<Heartbeat>,
    #[serde(default)]
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub sync: bool,
}

// ---------------------------------------------------------------------------
// Signed envelope (spec §4.3 / §6)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedEvent {
    pub payload: String,
    pub signature: String,
    pub timestamp: u64,
}

// ---------------------------------------------------------------------------
// WebSocket frames (server -> client, spec §6)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WsFrame {
    Ping {
        #[serde(rename = "type")]
        r#type: PingType,
        ts: u64,
    },
    Snapshot {
        event: Event,
    },
    SignedBatch {
        #[serde(rename = "signedEvents")]
        signed_events: Vec<SignedEvent>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PingType {
    Ping,
}

impl WsFrame {
    pub fn ping(ts: u64) -> Self {
        WsFrame::Ping { r#type: PingType::Ping, ts }
    }

    pub fn snapshot(event: Event) -> Self {
        WsFrame::Snapshot { event }
    }

    pub fn signed_batch(signed_events: Vec<SignedEvent>) -> Self {
        WsFrame::SignedBatch { signed_events }
    }
}

/// A `ping` frame stamped with the current time — what [`ConnectionHub`]'s
/// keepalive loop broadcasts every 60 seconds (spec §4.6).
///
/// [`ConnectionHub`]: ../canaria/hub/struct.ConnectionHub.html
pub fn ping() -> WsFrame {
    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    WsFrame::ping(ts)
}

// ---------------------------------------------------------------------------
// HTTP error envelope (grounded on the teacher's HttpErrorEnvelope)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Canonical payload serialization (spec §4.3: deterministic over `payload`)
// ---------------------------------------------------------------------------

/// Serializes `value` into a canonical JSON string with lexicographically
/// sorted object keys, so identical logical values always produce identical
/// byte strings regardless of field declaration order.
pub fn canonicalize<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let raw = serde_json::to_value(value)?;
    let sorted = sort_value(raw);
    serde_json::to_string(&sorted)
}

fn sort_value(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let sorted: BTreeMap<String, serde_json::Value> =
                map.into_iter().map(|(k, v)| (k, sort_value(v))).collect();
            serde_json::Value::Object(sorted.into_iter().collect())
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(sort_value).collect())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> Event {
        Event {
            event_id: "jma-1".to_owned(),
            source: Source::Jma,
            receive_source: "WolfX".to_owned(),
            kind: "EEW".to_owned(),
            report_type: Some(ReportType::Number(561.0)),
            time: "2026-07-28T00:00:00Z".to_owned(),
            issue_time: None,
            receive_time: "2026-07-28T00:00:01Z".to_owned(),
            latitude: Some(35.0),
            longitude: Some(139.0),
            magnitude: Some(5.2),
            depth: Some(10.0),
            intensity: None,
            region: Some("Tokyo".to_owned()),
            advisory: None,
            revision: None,
        }
    }

    #[test]
    fn canonicalize_is_order_independent() {
        let a = canonicalize(&sample_event()).unwrap();
        // A manually-built Value with keys in a different order must still
        // canonicalize to the same string as the struct's own serialization.
        let v = serde_json::to_value(sample_event()).unwrap();
        let reordered: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&v).unwrap()).unwrap();
        let b = canonicalize(&reordered).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn event_round_trips_through_camel_case_json() {
        let e = sample_event();
        let json = serde_json::to_string(&e).unwrap();
        assert!(json.contains("\"eventId\""));
        assert!(json.contains("\"receiveSource\""));
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }
}
