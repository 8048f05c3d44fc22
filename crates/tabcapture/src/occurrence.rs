//! Raw protocol occurrences.
//!
//! The debugging host reports network activity as `(method, params)` pairs.
//! [`Occurrence::from_protocol`] decodes the ones the correlator understands
//! into typed values; everything else is ignored.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

/// Header map as reported by the host.
pub type RawHeaders = BTreeMap<String, String>;

/// A decoded network occurrence.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum Occurrence {
    /// A request is about to be sent.
    #[serde(rename = "Network.requestWillBeSent")]
    RequestWillBeSent(RequestWillBeSent),

    /// Response headers and status are available.
    #[serde(rename = "Network.responseReceived")]
    ResponseReceived(ResponseReceived),

    /// The response body finished loading.
    #[serde(rename = "Network.loadingFinished")]
    LoadingFinished(LoadingFinished),

    /// The request failed before completing.
    #[serde(rename = "Network.loadingFailed")]
    LoadingFailed(LoadingFailed),

    /// A websocket was created.
    #[serde(rename = "Network.webSocketCreated")]
    WebSocketCreated(WebSocketCreated),

    /// A websocket frame was sent by the page.
    #[serde(rename = "Network.webSocketFrameSent")]
    WebSocketFrameSent(WebSocketFrame),

    /// A websocket frame was received by the page.
    #[serde(rename = "Network.webSocketFrameReceived")]
    WebSocketFrameReceived(WebSocketFrame),

    /// A websocket was closed.
    #[serde(rename = "Network.webSocketClosed")]
    WebSocketClosed(WebSocketClosed),
}

impl Occurrence {
    /// Method names this module can decode.
    pub const METHODS: &'static [&'static str] = &[
        "Network.requestWillBeSent",
        "Network.responseReceived",
        "Network.loadingFinished",
        "Network.loadingFailed",
        "Network.webSocketCreated",
        "Network.webSocketFrameSent",
        "Network.webSocketFrameReceived",
        "Network.webSocketClosed",
    ];

    /// Decode a protocol event.
    ///
    /// Returns `None` for methods that are not network occurrences of
    /// interest, and `Some(Err(_))` when a known method carries params that
    /// do not decode.
    #[must_use]
    pub fn from_protocol(method: &str, params: Value) -> Option<serde_json::Result<Self>> {
        if !Self::METHODS.contains(&method) {
            return None;
        }
        let tagged = serde_json::json!({ "method": method, "params": params });
        Some(serde_json::from_value(tagged))
    }

    /// The protocol request id this occurrence refers to.
    #[must_use]
    pub fn request_id(&self) -> &str {
        match self {
            Self::RequestWillBeSent(o) => &o.request_id,
            Self::ResponseReceived(o) => &o.request_id,
            Self::LoadingFinished(o) => &o.request_id,
            Self::LoadingFailed(o) => &o.request_id,
            Self::WebSocketCreated(o) => &o.request_id,
            Self::WebSocketFrameSent(o) | Self::WebSocketFrameReceived(o) => &o.request_id,
            Self::WebSocketClosed(o) => &o.request_id,
        }
    }
}

/// Params of `Network.requestWillBeSent`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWillBeSent {
    /// Protocol request id.
    pub request_id: String,
    /// Frame that issued the request.
    #[serde(default)]
    pub frame_id: Option<String>,
    /// Resource type such as `Document`, `Image` or `XHR`.
    #[serde(default, rename = "type")]
    pub resource_type: Option<String>,
    /// The outgoing request.
    pub request: RawRequest,
    /// What caused the request.
    #[serde(default)]
    pub initiator: Option<RawInitiator>,
}

/// Request data inside `Network.requestWillBeSent`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRequest {
    /// Full request URL.
    pub url: String,
    /// HTTP method.
    pub method: String,
    /// Request headers.
    #[serde(default)]
    pub headers: RawHeaders,
    /// Request body, if the host exposes it.
    #[serde(default)]
    pub post_data: Option<String>,
}

/// Request initiator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawInitiator {
    /// Initiator kind, e.g. `parser` or `script`.
    #[serde(rename = "type")]
    pub kind: String,
    /// URL of the initiating resource.
    #[serde(default)]
    pub url: Option<String>,
}

/// Params of `Network.responseReceived`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseReceived {
    /// Protocol request id.
    pub request_id: String,
    /// Frame the response belongs to.
    #[serde(default)]
    pub frame_id: Option<String>,
    /// Resource type.
    #[serde(default, rename = "type")]
    pub resource_type: Option<String>,
    /// Response metadata.
    pub response: RawResponse,
}

/// Response metadata inside `Network.responseReceived`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawResponse {
    /// Response URL.
    pub url: String,
    /// HTTP status code.
    pub status: u16,
    /// MIME type as sniffed by the browser.
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Response headers.
    #[serde(default)]
    pub headers: RawHeaders,
    /// Served from the disk cache.
    #[serde(default)]
    pub from_disk_cache: bool,
    /// Served by a service worker.
    #[serde(default)]
    pub from_service_worker: bool,
    /// Connection timing.
    #[serde(default)]
    pub timing: Option<ResourceTiming>,
}

/// Resource timing reported with a response.
///
/// `request_time` is an absolute monotonic timestamp in seconds; every other
/// field is a millisecond offset from it, or negative when not applicable.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTiming {
    /// Baseline, in seconds.
    pub request_time: f64,
    #[serde(default = "not_applicable")]
    pub dns_start: f64,
    #[serde(default = "not_applicable")]
    pub dns_end: f64,
    #[serde(default = "not_applicable")]
    pub connect_start: f64,
    #[serde(default = "not_applicable")]
    pub connect_end: f64,
    #[serde(default = "not_applicable")]
    pub ssl_start: f64,
    #[serde(default = "not_applicable")]
    pub ssl_end: f64,
    #[serde(default = "not_applicable")]
    pub send_start: f64,
    #[serde(default = "not_applicable")]
    pub send_end: f64,
    #[serde(default = "not_applicable")]
    pub receive_headers_end: f64,
}

fn not_applicable() -> f64 {
    -1.0
}

/// Params of `Network.loadingFinished`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFinished {
    /// Protocol request id.
    pub request_id: String,
    /// Monotonic timestamp in seconds, same clock as `requestTime`.
    pub timestamp: f64,
    /// Bytes received on the wire.
    #[serde(default)]
    pub encoded_data_length: f64,
}

/// Params of `Network.loadingFailed`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadingFailed {
    /// Protocol request id.
    pub request_id: String,
    /// Failure description.
    #[serde(default)]
    pub error_text: String,
    /// Whether the load was canceled.
    #[serde(default)]
    pub canceled: bool,
}

/// Params of `Network.webSocketCreated`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketCreated {
    /// Protocol request id of the socket.
    pub request_id: String,
    /// Socket URL.
    pub url: String,
}

/// Params of `Network.webSocketFrameSent` / `Network.webSocketFrameReceived`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketFrame {
    /// Protocol request id of the socket.
    pub request_id: String,
    /// The frame.
    pub response: RawFrame,
}

/// Frame data.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFrame {
    /// Websocket opcode; 1 is text, anything else carries base64 payload.
    pub opcode: u8,
    /// Whether the frame was masked.
    #[serde(default)]
    pub mask: bool,
    /// Frame payload.
    #[serde(default)]
    pub payload_data: String,
}

impl RawFrame {
    /// Opcode for text frames.
    pub const TEXT: u8 = 1;

    /// Whether the payload is text rather than base64.
    #[must_use]
    pub fn is_text(&self) -> bool {
        self.opcode == Self::TEXT
    }
}

/// Params of `Network.webSocketClosed`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketClosed {
    /// Protocol request id of the socket.
    pub request_id: String,
}
