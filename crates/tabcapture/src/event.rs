//! Canonical captured events.
//!
//! A [`CapturedEvent`] is the immutable record of one observed occurrence:
//! an HTTP request, an HTTP response, a websocket open or a websocket frame.
//! Events are built by the correlator, admitted by the buffer and persisted
//! by the store in admission order.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::host::TargetId;

/// Number of hex characters in the display form of a digest.
pub const DISPLAY_HASH_LEN: usize = 8;

/// Source stream of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plane {
    /// Network traffic observed through the debugging protocol.
    Network,
}

/// Coarse event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// HTTP exchange.
    Http,
    /// Websocket traffic.
    Ws,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Ws => write!(f, "ws"),
        }
    }
}

/// Phase within the event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Outgoing HTTP request.
    Request,
    /// Completed HTTP response.
    Response,
    /// Websocket opened.
    WsOpen,
    /// Websocket frame.
    WsFrame,
}

impl Phase {
    /// The event type this phase belongs to.
    #[must_use]
    pub fn event_type(self) -> EventType {
        match self {
            Self::Request | Self::Response => EventType::Http,
            Self::WsOpen | Self::WsFrame => EventType::Ws,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request => write!(f, "request"),
            Self::Response => write!(f, "response"),
            Self::WsOpen => write!(f, "ws_open"),
            Self::WsFrame => write!(f, "ws_frame"),
        }
    }
}

/// Kind of body content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyKind {
    /// No body captured.
    None,
    /// UTF-8 text body.
    Text,
    /// Binary body.
    Binary,
}

/// Safe description of a request, response or frame body.
///
/// The hash is always the full digest of the complete content. Binary bodies
/// never carry a sample; text samples are redacted derivatives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyDescriptor {
    /// What kind of content was seen.
    pub kind: BodyKind,
    /// Size of the complete content in bytes.
    pub size: usize,
    /// Full hex digest of the complete content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Redacted, length-capped sample of text content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample: Option<String>,
    /// Whether the sample was cut short.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl BodyDescriptor {
    /// Marker appended to samples that were cut short.
    pub const TRUNCATION_MARKER: &'static str = "...<truncated>";

    /// A descriptor for an absent or skipped body.
    #[must_use]
    pub fn none() -> Self {
        Self {
            kind: BodyKind::None,
            size: 0,
            hash: None,
            sample: None,
            truncated: false,
        }
    }

    /// Check whether no body was captured.
    #[must_use]
    pub fn is_none(&self) -> bool {
        self.kind == BodyKind::None
    }

    /// Display form of the digest.
    #[must_use]
    pub fn short_hash(&self) -> Option<&str> {
        self.hash
            .as_deref()
            .map(|h| &h[..h.len().min(DISPLAY_HASH_LEN)])
    }

    /// Cap the sample to `max_chars` characters of content.
    ///
    /// A cut sample ends with [`Self::TRUNCATION_MARKER`]; an existing
    /// marker is not counted as content.
    #[must_use]
    pub fn with_sample_cap(mut self, max_chars: usize) -> Self {
        if let Some(sample) = self.sample.take() {
            let content = sample
                .strip_suffix(Self::TRUNCATION_MARKER)
                .filter(|_| self.truncated)
                .unwrap_or(&sample);
            if content.chars().count() > max_chars {
                let mut cut: String = content.chars().take(max_chars).collect();
                cut.push_str(Self::TRUNCATION_MARKER);
                self.sample = Some(cut);
                self.truncated = true;
            } else {
                self.sample = Some(sample);
            }
        }
        self
    }
}

impl Default for BodyDescriptor {
    fn default() -> Self {
        Self::none()
    }
}

/// Normalized, redacted URL.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UrlParts {
    /// URL scheme.
    pub scheme: String,
    /// Host, with port if one was given.
    pub host: String,
    /// Path as requested.
    pub path: String,
    /// Query parameters with PII-bearing keys masked.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, String>,
    /// Path with identifier segments replaced by placeholders.
    pub template: String,
}

/// Timing breakdown of a completed exchange, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Timing {
    /// DNS lookup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<f64>,
    /// TCP connect, including TLS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect: Option<f64>,
    /// TLS handshake.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<f64>,
    /// Request sent to first response header byte.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttfb: Option<f64>,
    /// Headers received to load finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download: Option<f64>,
    /// Request start to load finished.
    pub total: f64,
}

/// Cache information of a response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheInfo {
    /// Served from disk cache or a service worker.
    pub from_cache: bool,
    /// `cache-control` response header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control: Option<String>,
    /// `etag` response header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// Initiator of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Initiator {
    /// Initiator kind.
    #[serde(rename = "type")]
    pub kind: String,
    /// Redacted initiator URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<UrlParts>,
}

/// Request-phase payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: String,
    /// Normalized URL.
    pub url: UrlParts,
    /// Redacted request headers.
    pub headers: BTreeMap<String, String>,
    /// Outgoing body.
    pub body: BodyDescriptor,
    /// Resource type reported by the host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    /// Request initiator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator: Option<Initiator>,
}

/// Response-phase payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpResponse {
    /// Normalized URL.
    pub url: UrlParts,
    /// HTTP status.
    pub status: u16,
    /// MIME type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Redacted response headers.
    pub headers: BTreeMap<String, String>,
    /// Response body.
    pub body: BodyDescriptor,
    /// Timing breakdown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<Timing>,
    /// Cache details.
    pub cache: CacheInfo,
}

/// Websocket open payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsOpen {
    /// Normalized socket URL.
    pub url: UrlParts,
}

/// Frame direction relative to the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Page to server.
    Send,
    /// Server to page.
    Recv,
}

/// Websocket frame payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WsFrame {
    /// Normalized socket URL, when the open was observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<UrlParts>,
    /// Frame direction.
    pub direction: Direction,
    /// Websocket opcode.
    pub opcode: u8,
    /// Frame body; the sample is a short preview.
    pub body: BodyDescriptor,
}

/// Type-specific payload of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    /// HTTP request.
    Request(HttpRequest),
    /// HTTP response.
    Response(HttpResponse),
    /// Websocket open.
    WsOpen(WsOpen),
    /// Websocket frame.
    WsFrame(WsFrame),
}

impl EventPayload {
    /// The phase of this payload.
    #[must_use]
    pub fn phase(&self) -> Phase {
        match self {
            Self::Request(_) => Phase::Request,
            Self::Response(_) => Phase::Response,
            Self::WsOpen(_) => Phase::WsOpen,
            Self::WsFrame(_) => Phase::WsFrame,
        }
    }
}

/// Immutable record of one observed occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedEvent {
    /// Unique, strictly increasing id in emission order.
    pub id: u64,
    /// Source stream.
    pub plane: Plane,
    /// Coarse type, derived from the payload.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Target the occurrence was observed on.
    pub target_id: TargetId,
    /// Protocol request id shared by both halves of an exchange.
    pub correlation_id: String,
    /// Frame or loader id, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_id: Option<String>,
    /// When the event was built.
    pub timestamp: DateTime<Utc>,
    /// Type-specific payload.
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl CapturedEvent {
    /// Build an event on the network plane, stamped now.
    #[must_use]
    pub fn new(
        id: u64,
        target_id: TargetId,
        correlation_id: impl Into<String>,
        frame_id: Option<String>,
        payload: EventPayload,
    ) -> Self {
        Self {
            id,
            plane: Plane::Network,
            event_type: payload.phase().event_type(),
            target_id,
            correlation_id: correlation_id.into(),
            frame_id,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// The phase of this event.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.payload.phase()
    }

    /// Host of the URL this event refers to, if any.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Request(r) => Some(&r.url.host),
            EventPayload::Response(r) => Some(&r.url.host),
            EventPayload::WsOpen(w) => Some(&w.url.host),
            EventPayload::WsFrame(w) => w.url.as_ref().map(|u| u.host.as_str()),
        }
    }

    /// HTTP body of a request or response event.
    #[must_use]
    pub fn http_body(&self) -> Option<&BodyDescriptor> {
        match &self.payload {
            EventPayload::Request(r) => Some(&r.body),
            EventPayload::Response(r) => Some(&r.body),
            EventPayload::WsOpen(_) | EventPayload::WsFrame(_) => None,
        }
    }

    /// Timing of a response event.
    #[must_use]
    pub fn timing(&self) -> Option<&Timing> {
        match &self.payload {
            EventPayload::Response(r) => r.timing.as_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ws_open(id: u64) -> CapturedEvent {
        CapturedEvent::new(
            id,
            TargetId::from("tab-1"),
            "ws-1",
            None,
            EventPayload::WsOpen(WsOpen {
                url: UrlParts {
                    scheme: "wss".to_string(),
                    host: "stream.example.com".to_string(),
                    path: "/live".to_string(),
                    query: BTreeMap::new(),
                    template: "/live".to_string(),
                },
            }),
        )
    }

    #[test]
    fn test_phase_event_type() {
        assert_eq!(Phase::Request.event_type(), EventType::Http);
        assert_eq!(Phase::Response.event_type(), EventType::Http);
        assert_eq!(Phase::WsOpen.event_type(), EventType::Ws);
        assert_eq!(Phase::WsFrame.event_type(), EventType::Ws);
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::WsFrame.to_string(), "ws_frame");
        assert_eq!(EventType::Http.to_string(), "http");
    }

    #[test]
    fn test_new_event_derives_type() {
        let evt = ws_open(3);
        assert_eq!(evt.id, 3);
        assert_eq!(evt.event_type, EventType::Ws);
        assert_eq!(evt.phase(), Phase::WsOpen);
        assert_eq!(evt.plane, Plane::Network);
        assert_eq!(evt.host(), Some("stream.example.com"));
        assert!(evt.http_body().is_none());
    }

    #[test]
    fn test_event_serialization_shape() {
        let json = serde_json::to_value(ws_open(1)).unwrap();
        assert_eq!(json["type"], "ws");
        assert_eq!(json["phase"], "ws_open");
        assert_eq!(json["plane"], "network");
        assert_eq!(json["data"]["url"]["host"], "stream.example.com");

        let back: CapturedEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back.phase(), Phase::WsOpen);
    }

    #[test]
    fn test_body_descriptor_none() {
        let body = BodyDescriptor::none();
        assert!(body.is_none());
        assert_eq!(body.size, 0);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "none", "size": 0 }));
    }

    #[test]
    fn test_short_hash() {
        let body = BodyDescriptor {
            kind: BodyKind::Binary,
            size: 3,
            hash: Some("0123456789abcdef".to_string()),
            sample: None,
            truncated: false,
        };
        assert_eq!(body.short_hash(), Some("01234567"));
    }

    #[test]
    fn test_sample_cap() {
        let body = BodyDescriptor {
            kind: BodyKind::Text,
            size: 10,
            hash: None,
            sample: Some("abcdefghij".to_string()),
            truncated: false,
        };
        let capped = body.clone().with_sample_cap(4);
        assert_eq!(capped.sample.as_deref(), Some("abcd...<truncated>"));
        assert!(capped.truncated);

        let untouched = body.with_sample_cap(300);
        assert_eq!(untouched.sample.as_deref(), Some("abcdefghij"));
        assert!(!untouched.truncated);
    }

    #[test]
    fn test_sample_cap_replaces_existing_marker() {
        let body = BodyDescriptor {
            kind: BodyKind::Text,
            size: 100,
            hash: None,
            sample: Some(format!("abcdefghij{}", BodyDescriptor::TRUNCATION_MARKER)),
            truncated: true,
        };
        let capped = body.clone().with_sample_cap(4);
        assert_eq!(capped.sample.as_deref(), Some("abcd...<truncated>"));

        let kept = body.with_sample_cap(10);
        assert_eq!(kept.sample.as_deref(), Some("abcdefghij...<truncated>"));
        assert!(kept.truncated);
    }
}
