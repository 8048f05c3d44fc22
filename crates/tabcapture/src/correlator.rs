//! Correlation of protocol occurrences into captured events.
//!
//! The [`Correlator`] consumes decoded [`Occurrence`]s for attached targets
//! and emits [`CapturedEvent`]s into the buffer:
//!
//! - a request event as soon as a request is observed;
//! - a response event once `loadingFinished` arrives for a request whose
//!   response metadata was seen before (otherwise nothing is emitted);
//! - websocket open and frame events directly.
//!
//! Every candidate passes the inclusion policy first. Raw counters are bumped
//! for every observed occurrence whether or not the event is admitted.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, trace, warn};

use crate::buffer::{BufferController, Counter};
use crate::event::{
    BodyDescriptor, CacheInfo, CapturedEvent, Direction, EventPayload, HttpRequest, HttpResponse,
    Initiator, Timing, UrlParts, WsFrame, WsOpen,
};
use crate::host::{DebuggerHost, TargetId};
use crate::lifecycle::RetryPolicy;
use crate::occurrence::{
    LoadingFailed, LoadingFinished, Occurrence, RequestWillBeSent, ResourceTiming,
    ResponseReceived, WebSocketCreated, WebSocketFrame,
};
use crate::redact::{self, Redactor};

/// Characters of a websocket frame sample kept as preview.
pub const FRAME_PREVIEW_CHARS: usize = 300;

/// Default minimum websocket frame size in bytes.
pub const DEFAULT_WS_MIN_BYTES: usize = 40;

/// Default cap on sampled body text in bytes.
pub const DEFAULT_BODY_CAP: usize = 128 * 1024;

/// Command used to fetch a finished response body.
const GET_BODY_METHOD: &str = "Network.getResponseBody";

/// Inclusion and redaction settings the correlator applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct CaptureSettings {
    /// Keep static assets (images, fonts, styles, scripts, media).
    pub http_assets: bool,
    /// Keep traffic to analytics hosts.
    pub analytics: bool,
    /// Keep websocket frames below `ws_min_bytes`.
    pub ws_small_frames: bool,
    /// Capture request bodies.
    pub request_bodies: bool,
    /// Capture response bodies.
    pub response_bodies: bool,
    /// Frames smaller than this are dropped unless they look like JSON.
    pub ws_min_bytes: usize,
    /// Bytes of body text sampled before truncation.
    pub body_cap: usize,
    /// Host suffixes treated as analytics.
    pub analytics_hosts: Vec<String>,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            http_assets: false,
            analytics: false,
            ws_small_frames: false,
            request_bodies: true,
            response_bodies: true,
            ws_min_bytes: DEFAULT_WS_MIN_BYTES,
            body_cap: DEFAULT_BODY_CAP,
            analytics_hosts: redact::default_analytics_hosts()
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl CaptureSettings {
    /// Check if an HTTP event with these attributes should be dropped.
    #[must_use]
    pub fn excludes_http(
        &self,
        url: &UrlParts,
        resource_type: Option<&str>,
        mime_type: Option<&str>,
    ) -> bool {
        (!self.http_assets && is_asset(url, resource_type, mime_type))
            || (!self.analytics && self.is_analytics_host(&url.host))
    }

    /// Check if a websocket frame should be dropped.
    ///
    /// `text` is `None` for binary frames, which never count as JSON.
    #[must_use]
    pub fn excludes_frame(&self, size: usize, text: Option<&str>) -> bool {
        !self.ws_small_frames && size < self.ws_min_bytes && !text.is_some_and(looks_like_json)
    }

    /// Check if the host matches one of the analytics suffixes.
    #[must_use]
    pub fn is_analytics_host(&self, host: &str) -> bool {
        let hostname = host
            .rsplit_once(':')
            .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
            .map_or(host, |(name, _)| name)
            .to_ascii_lowercase();
        self.analytics_hosts.iter().any(|suffix| {
            let suffix = suffix.to_ascii_lowercase();
            hostname == suffix || hostname.ends_with(&format!(".{suffix}"))
        })
    }
}

/// Check if the URL, resource type or content type names a static asset.
#[must_use]
pub fn is_asset(url: &UrlParts, resource_type: Option<&str>, mime_type: Option<&str>) -> bool {
    let by_extension = url
        .path
        .rsplit('/')
        .next()
        .and_then(|segment| segment.rsplit_once('.'))
        .is_some_and(|(_, ext)| {
            redact::asset_extensions()
                .iter()
                .any(|a| a.eq_ignore_ascii_case(ext))
        });
    let by_type = resource_type.is_some_and(|t| redact::asset_resource_types().contains(&t));
    let by_mime = mime_type.is_some_and(|m| {
        let m = m.to_ascii_lowercase();
        redact::asset_content_types()
            .iter()
            .any(|prefix| m.starts_with(prefix))
    });
    by_extension || by_type || by_mime
}

/// Check if the text structurally looks like JSON and parses.
#[must_use]
pub fn looks_like_json(text: &str) -> bool {
    matches!(text.trim_start().chars().next(), Some('{' | '[' | '"'))
        && serde_json::from_str::<serde_json::Value>(text).is_ok()
}

/// Compute the timing breakdown of a finished exchange in milliseconds.
///
/// Protocol offsets are milliseconds relative to `request_time`, which is in
/// seconds like `finished_at`. Spans with a negative bound are omitted.
#[must_use]
pub fn compute_timing(timing: &ResourceTiming, finished_at: f64) -> Timing {
    let span = |start: f64, end: f64| (start >= 0.0 && end >= 0.0).then(|| (end - start).max(0.0));
    let total = ((finished_at - timing.request_time) * 1000.0).max(0.0);
    Timing {
        dns: span(timing.dns_start, timing.dns_end),
        connect: span(timing.connect_start, timing.connect_end),
        tls: span(timing.ssl_start, timing.ssl_end),
        ttfb: span(timing.send_start, timing.receive_headers_end),
        download: (timing.receive_headers_end >= 0.0)
            .then(|| (total - timing.receive_headers_end).max(0.0)),
        total,
    }
}

/// Response metadata waiting for its completion occurrence.
#[derive(Debug, Clone)]
struct PendingExchange {
    frame_id: Option<String>,
    url: UrlParts,
    status: u16,
    mime_type: Option<String>,
    headers: std::collections::BTreeMap<String, String>,
    timing: Option<ResourceTiming>,
    cache: CacheInfo,
    included: bool,
}

/// Builds captured events from occurrences.
pub struct Correlator {
    settings: CaptureSettings,
    redactor: Redactor,
    host: Arc<dyn DebuggerHost>,
    retry: RetryPolicy,
    buffer: BufferController,
    pending: HashMap<String, PendingExchange>,
    sockets: HashMap<String, UrlParts>,
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("settings", &self.settings)
            .field("pending", &self.pending.len())
            .field("sockets", &self.sockets.len())
            .finish_non_exhaustive()
    }
}

impl Correlator {
    /// Create a correlator emitting into `buffer`.
    #[must_use]
    pub fn new(
        settings: CaptureSettings,
        host: Arc<dyn DebuggerHost>,
        retry: RetryPolicy,
        buffer: BufferController,
    ) -> Self {
        Self {
            settings,
            redactor: Redactor::new(),
            host,
            retry,
            buffer,
            pending: HashMap::new(),
            sockets: HashMap::new(),
        }
    }

    /// Current settings.
    #[must_use]
    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Replace the settings. Applies to occurrences observed from now on.
    pub fn set_settings(&mut self, settings: CaptureSettings) {
        self.settings = settings;
    }

    /// Number of exchanges waiting for completion.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Forget all in-flight exchanges and sockets.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.sockets.clear();
    }

    /// Process one occurrence observed on `target`.
    pub async fn handle(&mut self, target: &TargetId, occurrence: Occurrence) {
        trace!(target_id = %target, request_id = occurrence.request_id(), "Occurrence");
        match occurrence {
            Occurrence::RequestWillBeSent(o) => self.on_request(target, o),
            Occurrence::ResponseReceived(o) => self.on_response_meta(o),
            Occurrence::LoadingFinished(o) => self.on_load_finished(target, o).await,
            Occurrence::LoadingFailed(o) => self.on_load_failed(&o),
            Occurrence::WebSocketCreated(o) => self.on_ws_opened(target, o),
            Occurrence::WebSocketFrameSent(o) => self.on_ws_frame(target, o, Direction::Send),
            Occurrence::WebSocketFrameReceived(o) => {
                self.on_ws_frame(target, o, Direction::Recv);
            }
            Occurrence::WebSocketClosed(o) => {
                self.sockets.remove(&o.request_id);
            }
        }
    }

    fn emit(
        &self,
        target: &TargetId,
        correlation_id: String,
        frame_id: Option<String>,
        payload: EventPayload,
    ) {
        let event = CapturedEvent::new(
            self.buffer.next_id(),
            target.clone(),
            correlation_id,
            frame_id,
            payload,
        );
        self.buffer.add_event(event);
    }

    fn exclude(&self, what: &str, request_id: &str) {
        self.buffer.increment(Counter::Excluded);
        trace!(request_id, what, "Excluded by inclusion policy");
    }

    /// Body descriptor gate shared by every body: honours the per-direction
    /// toggle and degraded mode.
    fn body_allowed(&self, enabled: bool) -> bool {
        if !enabled {
            return false;
        }
        if self.buffer.is_degraded() {
            self.buffer.increment(Counter::DroppedBody);
            return false;
        }
        true
    }

    fn on_request(&self, target: &TargetId, raw: RequestWillBeSent) {
        self.buffer.increment(Counter::HttpRequest);

        let url = self.redactor.normalize_url(&raw.request.url);
        if self
            .settings
            .excludes_http(&url, raw.resource_type.as_deref(), None)
        {
            self.exclude("request", &raw.request_id);
            return;
        }

        let body = match raw.request.post_data.as_deref() {
            Some(data) if self.body_allowed(self.settings.request_bodies) => {
                self.redactor.describe_text(data, self.settings.body_cap)
            }
            _ => BodyDescriptor::none(),
        };

        let initiator = raw.initiator.map(|i| Initiator {
            kind: i.kind,
            url: i.url.as_deref().map(|u| self.redactor.normalize_url(u)),
        });

        let payload = EventPayload::Request(HttpRequest {
            method: raw.request.method,
            url,
            headers: self.redactor.redact_headers(&raw.request.headers),
            body,
            resource_type: raw.resource_type,
            initiator,
        });
        self.emit(target, raw.request_id, raw.frame_id, payload);
    }

    fn on_response_meta(&mut self, raw: ResponseReceived) {
        let response = raw.response;
        let url = self.redactor.normalize_url(&response.url);
        let included = !self.settings.excludes_http(
            &url,
            raw.resource_type.as_deref(),
            response.mime_type.as_deref(),
        );
        let headers = self.redactor.redact_headers(&response.headers);
        let header = |name: &str| {
            headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        };
        let cache = CacheInfo {
            from_cache: response.from_disk_cache || response.from_service_worker,
            control: header("cache-control"),
            etag: header("etag"),
        };

        self.pending.insert(
            raw.request_id,
            PendingExchange {
                frame_id: raw.frame_id,
                url,
                status: response.status,
                mime_type: response.mime_type,
                headers,
                timing: response.timing,
                cache,
                included,
            },
        );
    }

    async fn on_load_finished(&mut self, target: &TargetId, raw: LoadingFinished) {
        let Some(pending) = self.pending.remove(&raw.request_id) else {
            trace!(request_id = %raw.request_id, "Completion without response metadata");
            return;
        };
        self.buffer.increment(Counter::HttpResponse);

        if !pending.included {
            self.exclude("response", &raw.request_id);
            return;
        }

        let body = if self.body_allowed(self.settings.response_bodies) {
            self.fetch_body(target, &raw.request_id).await
        } else {
            BodyDescriptor::none()
        };

        let timing = pending
            .timing
            .as_ref()
            .map(|t| compute_timing(t, raw.timestamp));

        let payload = EventPayload::Response(HttpResponse {
            url: pending.url,
            status: pending.status,
            mime_type: pending.mime_type,
            headers: pending.headers,
            body,
            timing,
            cache: pending.cache,
        });
        self.emit(target, raw.request_id, pending.frame_id, payload);
    }

    async fn fetch_body(&self, target: &TargetId, request_id: &str) -> BodyDescriptor {
        let host = &self.host;
        let fetched = self
            .retry
            .run(move || {
                host.send_command(target, GET_BODY_METHOD, json!({ "requestId": request_id }))
            })
            .await;
        match fetched {
            Ok(value) => {
                let body = value
                    .get("body")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default();
                let base64_encoded = value
                    .get("base64Encoded")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                self.redactor
                    .describe_body(body, base64_encoded, self.settings.body_cap)
            }
            Err(e) => {
                warn!(request_id, error = %e, "Body fetch failed, emitting without body");
                BodyDescriptor::none()
            }
        }
    }

    fn on_load_failed(&mut self, raw: &LoadingFailed) {
        if self.pending.remove(&raw.request_id).is_some() {
            debug!(
                request_id = %raw.request_id,
                error = %raw.error_text,
                canceled = raw.canceled,
                "Dropped pending exchange after load failure"
            );
        }
    }

    fn on_ws_opened(&mut self, target: &TargetId, raw: WebSocketCreated) {
        self.buffer.increment(Counter::WsOpen);
        let url = self.redactor.normalize_url(&raw.url);
        self.sockets.insert(raw.request_id.clone(), url.clone());
        if !self.settings.analytics && self.settings.is_analytics_host(&url.host) {
            self.exclude("ws_open", &raw.request_id);
            return;
        }
        self.emit(target, raw.request_id, None, EventPayload::WsOpen(WsOpen { url }));
    }

    fn on_ws_frame(&self, target: &TargetId, raw: WebSocketFrame, direction: Direction) {
        self.buffer.increment(Counter::WsFrame);
        let frame = raw.response;

        let decoded = if frame.is_text() {
            None
        } else {
            Some(
                STANDARD
                    .decode(&frame.payload_data)
                    .unwrap_or_else(|_| frame.payload_data.as_bytes().to_vec()),
            )
        };
        let (size, text) = match &decoded {
            Some(bytes) => (bytes.len(), None),
            None => (frame.payload_data.len(), Some(frame.payload_data.as_str())),
        };

        if self.settings.excludes_frame(size, text) {
            self.exclude("ws_frame", &raw.request_id);
            return;
        }

        let body = match &decoded {
            _ if !self.body_allowed(true) => BodyDescriptor::none(),
            Some(bytes) => self.redactor.describe_binary(bytes),
            None => self
                .redactor
                .describe_text(&frame.payload_data, self.settings.body_cap)
                .with_sample_cap(FRAME_PREVIEW_CHARS),
        };

        let payload = EventPayload::WsFrame(WsFrame {
            url: self.sockets.get(&raw.request_id).cloned(),
            direction,
            opcode: frame.opcode,
            body,
        });
        self.emit(target, raw.request_id, None, payload);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::Value;

    use super::*;
    use crate::buffer::BufferPolicy;
    use crate::event::{BodyKind, Phase};
    use crate::host::testing::{HostCall, ScriptedHost};
    use crate::host::HostError;
    use crate::redact::{short_digest, REDACTED_VALUE};
    use crate::storage::Storage;

    struct Fixture {
        correlator: Correlator,
        buffer: BufferController,
        store: Arc<Storage>,
        host: Arc<ScriptedHost>,
        target: TargetId,
    }

    fn manual_policy() -> BufferPolicy {
        BufferPolicy {
            flush_count: usize::MAX,
            flush_interval: Duration::MAX,
            ..BufferPolicy::default()
        }
    }

    fn fixture_with(settings: CaptureSettings, policy: BufferPolicy) -> Fixture {
        let host = Arc::new(ScriptedHost::new());
        let store = Arc::new(Storage::open_in_memory().unwrap());
        let buffer = BufferController::new(policy, store.clone());
        let retry = RetryPolicy {
            max_retries: 1,
            base_delay: Duration::ZERO,
            step: Duration::ZERO,
        };
        let correlator = Correlator::new(settings, host.clone(), retry, buffer.clone());
        Fixture {
            correlator,
            buffer,
            store,
            host,
            target: TargetId::from("tab-1"),
        }
    }

    fn fixture() -> Fixture {
        fixture_with(CaptureSettings::default(), manual_policy())
    }

    fn occurrence(method: &str, params: Value) -> Occurrence {
        Occurrence::from_protocol(method, params).unwrap().unwrap()
    }

    fn request(id: &str, url: &str) -> Occurrence {
        occurrence(
            "Network.requestWillBeSent",
            json!({
                "requestId": id,
                "frameId": "F1",
                "type": "XHR",
                "request": {
                    "url": url,
                    "method": "POST",
                    "headers": { "Cookie": "a=1; b=2; c", "Content-Type": "application/json" },
                    "postData": "{\"email\":\"zoe@example.com\"}"
                }
            }),
        )
    }

    fn response(id: &str, url: &str, mime: &str) -> Occurrence {
        occurrence(
            "Network.responseReceived",
            json!({
                "requestId": id,
                "frameId": "F1",
                "type": "XHR",
                "response": {
                    "url": url,
                    "status": 200,
                    "mimeType": mime,
                    "headers": { "Cache-Control": "no-store", "ETag": "\"v1\"" },
                    "fromDiskCache": true,
                    "timing": {
                        "requestTime": 100.0,
                        "dnsStart": 1.0, "dnsEnd": 3.0,
                        "connectStart": 3.0, "connectEnd": 10.0,
                        "sslStart": 5.0, "sslEnd": 10.0,
                        "sendStart": 11.0, "sendEnd": 12.0,
                        "receiveHeadersEnd": 40.0
                    }
                }
            }),
        )
    }

    fn finished(id: &str) -> Occurrence {
        occurrence(
            "Network.loadingFinished",
            json!({ "requestId": id, "timestamp": 100.1, "encodedDataLength": 12 }),
        )
    }

    fn frame(id: &str, opcode: u8, payload: &str) -> Occurrence {
        occurrence(
            "Network.webSocketFrameReceived",
            json!({ "requestId": id, "response": { "opcode": opcode, "payloadData": payload } }),
        )
    }

    async fn drain(f: &Fixture) -> Vec<CapturedEvent> {
        f.buffer.flush().await.unwrap();
        f.store.read_events().unwrap()
    }

    #[tokio::test]
    async fn test_request_emits_immediately() {
        let mut f = fixture();
        f.correlator
            .handle(&f.target, request("1", "https://api.example.com/users/42?token=abc"))
            .await;
        assert_eq!(f.buffer.len(), 1);
        assert_eq!(f.buffer.counters().http_req, 1);

        let events = drain(&f).await;
        assert_eq!(events[0].phase(), Phase::Request);
        assert_eq!(events[0].correlation_id, "1");
        assert_eq!(events[0].frame_id.as_deref(), Some("F1"));
        let EventPayload::Request(req) = &events[0].payload else {
            panic!("expected request payload");
        };
        assert_eq!(req.method, "POST");
        assert_eq!(req.url.template, "/users/:id");
        assert_eq!(req.url.query["token"], REDACTED_VALUE);
        assert_eq!(
            req.headers["Cookie"],
            format!("a=<{}>; b=<{}>; c", short_digest(b"1"), short_digest(b"2"))
        );
        assert_eq!(req.body.kind, BodyKind::Text);
        assert_eq!(req.body.sample.as_deref(), Some("{\"email\":\"z***@example.com\"}"));
    }

    #[tokio::test]
    async fn test_request_body_disabled() {
        let mut f = fixture_with(
            CaptureSettings {
                request_bodies: false,
                ..CaptureSettings::default()
            },
            manual_policy(),
        );
        f.correlator
            .handle(&f.target, request("1", "https://api.example.com/login"))
            .await;
        let events = drain(&f).await;
        assert!(events[0].http_body().unwrap().is_none());
        assert_eq!(f.buffer.counters().dropped_bodies, 0);
    }

    #[tokio::test]
    async fn test_completion_without_metadata_emits_nothing() {
        let mut f = fixture();
        f.correlator.handle(&f.target, finished("ghost")).await;
        assert_eq!(f.buffer.len(), 0);
        assert_eq!(f.buffer.counters().http_res, 0);
        assert!(f.host.calls().is_empty());
    }

    #[tokio::test]
    async fn test_response_emitted_on_completion() {
        let mut f = fixture();
        f.host.set_body("7", "{\"ok\":true}", false);
        f.correlator
            .handle(&f.target, response("7", "https://api.example.com/v1/items", "application/json"))
            .await;
        assert_eq!(f.buffer.len(), 0);
        assert_eq!(f.correlator.pending_len(), 1);

        f.correlator.handle(&f.target, finished("7")).await;
        assert_eq!(f.buffer.len(), 1);
        assert_eq!(f.correlator.pending_len(), 0);
        assert_eq!(f.buffer.counters().http_res, 1);
        assert_eq!(
            f.host.count(&HostCall::Command(f.target.clone(), GET_BODY_METHOD.to_string())),
            1
        );

        let events = drain(&f).await;
        let EventPayload::Response(res) = &events[0].payload else {
            panic!("expected response payload");
        };
        assert_eq!(events[0].frame_id.as_deref(), Some("F1"));
        assert_eq!(res.status, 200);
        assert!(res.cache.from_cache);
        assert_eq!(res.cache.control.as_deref(), Some("no-store"));
        assert_eq!(res.cache.etag.as_deref(), Some("\"v1\""));
        assert_eq!(res.body.sample.as_deref(), Some("{\"ok\":true}"));
        let timing = res.timing.unwrap();
        assert_eq!(timing.ttfb, Some(29.0));
        assert!((timing.total - 100.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_body_fetch_failure_degrades_to_none() {
        let mut f = fixture();
        f.correlator
            .handle(&f.target, response("8", "https://api.example.com/x", "application/json"))
            .await;
        f.correlator.handle(&f.target, finished("8")).await;
        assert_eq!(f.buffer.len(), 1);

        let events = drain(&f).await;
        assert!(events[0].http_body().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_body_fetch_transient_failure_retried() {
        let mut f = fixture();
        f.host.set_body("8", "AAEC", true);
        f.host
            .fail_command(GET_BODY_METHOD, vec![HostError::transient("busy")]);
        f.correlator
            .handle(&f.target, response("8", "https://api.example.com/x", "application/octet-stream"))
            .await;
        f.correlator.handle(&f.target, finished("8")).await;

        let events = drain(&f).await;
        let body = events[0].http_body().unwrap();
        assert_eq!(body.kind, BodyKind::Binary);
        assert_eq!(body.size, 3);
        assert!(body.sample.is_none());
    }

    #[tokio::test]
    async fn test_degraded_mode_skips_bodies() {
        let policy = BufferPolicy {
            high_water_mark: 0,
            ..manual_policy()
        };
        let mut f = fixture_with(CaptureSettings::default(), policy);
        f.correlator
            .handle(&f.target, request("1", "https://api.example.com/a"))
            .await;
        assert!(f.buffer.is_degraded());

        f.host.set_body("2", "secret", false);
        f.correlator
            .handle(&f.target, request("2", "https://api.example.com/b"))
            .await;
        f.correlator
            .handle(&f.target, response("2", "https://api.example.com/b", "text/plain"))
            .await;
        f.correlator.handle(&f.target, finished("2")).await;

        let counters = f.buffer.counters();
        assert_eq!(counters.dropped_bodies, 2);
        let events = drain(&f).await;
        assert_eq!(events.len(), 3);
        assert!(events[0].http_body().unwrap().hash.is_some());
        assert!(events[1].http_body().unwrap().is_none());
        assert!(events[2].http_body().unwrap().is_none());
        assert_eq!(
            f.host.count(&HostCall::Command(f.target.clone(), GET_BODY_METHOD.to_string())),
            0
        );
    }

    #[tokio::test]
    async fn test_loading_failed_drops_pending() {
        let mut f = fixture();
        f.correlator
            .handle(&f.target, response("9", "https://api.example.com/x", "application/json"))
            .await;
        f.correlator
            .handle(
                &f.target,
                occurrence(
                    "Network.loadingFailed",
                    json!({ "requestId": "9", "errorText": "net::ERR_ABORTED", "canceled": true }),
                ),
            )
            .await;
        assert_eq!(f.correlator.pending_len(), 0);
        f.correlator.handle(&f.target, finished("9")).await;
        assert_eq!(f.buffer.len(), 0);
    }

    #[tokio::test]
    async fn test_assets_and_analytics_excluded() {
        let mut f = fixture();
        f.correlator
            .handle(&f.target, request("1", "https://cdn.example.com/logo.png"))
            .await;
        f.correlator
            .handle(&f.target, request("2", "https://www.google-analytics.com/collect"))
            .await;
        assert_eq!(f.buffer.len(), 0);
        let counters = f.buffer.counters();
        assert_eq!(counters.http_req, 2);
        assert_eq!(counters.excluded, 2);
    }

    #[tokio::test]
    async fn test_assets_kept_when_enabled() {
        let mut f = fixture_with(
            CaptureSettings {
                http_assets: true,
                analytics: true,
                ..CaptureSettings::default()
            },
            manual_policy(),
        );
        f.correlator
            .handle(&f.target, request("1", "https://cdn.example.com/logo.png"))
            .await;
        f.correlator
            .handle(&f.target, request("2", "https://www.google-analytics.com/collect"))
            .await;
        assert_eq!(f.buffer.len(), 2);
    }

    #[tokio::test]
    async fn test_excluded_response_skips_body_fetch() {
        let mut f = fixture();
        f.correlator
            .handle(&f.target, response("3", "https://cdn.example.com/app", "text/css"))
            .await;
        f.correlator.handle(&f.target, finished("3")).await;
        assert_eq!(f.buffer.len(), 0);
        assert_eq!(f.buffer.counters().http_res, 1);
        assert!(f.host.calls().is_empty());
    }

    #[tokio::test]
    async fn test_small_ws_frame_rules() {
        let mut f = fixture();
        f.correlator
            .handle(&f.target, frame("ws", 1, "hello12345"))
            .await;
        assert_eq!(f.buffer.len(), 0);

        f.correlator
            .handle(&f.target, frame("ws", 1, "{\"a\":1}"))
            .await;
        assert_eq!(f.buffer.len(), 1);
        assert_eq!(f.buffer.counters().ws_frames, 2);
        assert_eq!(f.buffer.counters().excluded, 1);
    }

    #[tokio::test]
    async fn test_ws_open_and_frame_carry_url() {
        let mut f = fixture();
        f.correlator
            .handle(
                &f.target,
                occurrence(
                    "Network.webSocketCreated",
                    json!({ "requestId": "ws", "url": "wss://stream.example.com/live?auth=xyz" }),
                ),
            )
            .await;
        let long = format!("{{\"msg\":\"{}\"}}", "x".repeat(500));
        f.correlator.handle(&f.target, frame("ws", 1, &long)).await;
        f.correlator
            .handle(&f.target, occurrence("Network.webSocketClosed", json!({ "requestId": "ws" })))
            .await;
        f.correlator.handle(&f.target, frame("ws", 1, &long)).await;

        let events = drain(&f).await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].phase(), Phase::WsOpen);
        let EventPayload::WsFrame(open_frame) = &events[1].payload else {
            panic!("expected frame payload");
        };
        let url = open_frame.url.as_ref().unwrap();
        assert_eq!(url.query["auth"], REDACTED_VALUE);
        assert_eq!(open_frame.direction, Direction::Recv);
        assert_eq!(open_frame.body.size, long.len());
        assert!(open_frame.body.truncated);
        let preview = open_frame.body.sample.as_deref().unwrap();
        let content = preview
            .strip_suffix(BodyDescriptor::TRUNCATION_MARKER)
            .unwrap();
        assert_eq!(content.chars().count(), FRAME_PREVIEW_CHARS);

        let EventPayload::WsFrame(closed_frame) = &events[2].payload else {
            panic!("expected frame payload");
        };
        assert!(closed_frame.url.is_none());
    }

    #[tokio::test]
    async fn test_event_ids_follow_emission_order() {
        let mut f = fixture();
        for i in 0..5 {
            f.correlator
                .handle(&f.target, request(&i.to_string(), "https://api.example.com/x"))
                .await;
        }
        let events = drain(&f).await;
        assert!(events.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[tokio::test]
    async fn test_small_binary_frame_fails_closed() {
        let mut f = fixture();
        let payload = STANDARD.encode(b"[1]");
        f.correlator
            .handle(&f.target, frame("ws", 2, &payload))
            .await;
        assert_eq!(f.buffer.len(), 0);
    }

    #[tokio::test]
    async fn test_small_frames_kept_when_enabled() {
        let mut f = fixture_with(
            CaptureSettings {
                ws_small_frames: true,
                ..CaptureSettings::default()
            },
            manual_policy(),
        );
        f.correlator
            .handle(&f.target, frame("ws", 1, "hello12345"))
            .await;
        assert_eq!(f.buffer.len(), 1);
    }

    #[tokio::test]
    async fn test_settings_apply_to_later_occurrences() {
        let mut f = fixture();
        f.correlator
            .handle(&f.target, frame("ws", 1, "tiny"))
            .await;
        f.correlator.set_settings(CaptureSettings {
            ws_small_frames: true,
            ..CaptureSettings::default()
        });
        f.correlator
            .handle(&f.target, frame("ws", 1, "tiny"))
            .await;
        assert_eq!(f.buffer.len(), 1);
        assert!(f.correlator.settings().ws_small_frames);
    }

    #[test]
    fn test_compute_timing() {
        let timing = ResourceTiming {
            request_time: 100.0,
            dns_start: 1.0,
            dns_end: 3.0,
            connect_start: -1.0,
            connect_end: -1.0,
            ssl_start: -1.0,
            ssl_end: -1.0,
            send_start: 11.0,
            send_end: 12.0,
            receive_headers_end: 40.0,
        };
        let t = compute_timing(&timing, 100.1);
        assert_eq!(t.dns, Some(2.0));
        assert_eq!(t.connect, None);
        assert_eq!(t.tls, None);
        assert_eq!(t.ttfb, Some(29.0));
        assert!((t.total - 100.0).abs() < 1e-6);
        assert!((t.download.unwrap() - 60.0).abs() < 1e-6);
    }

    #[test]
    fn test_looks_like_json() {
        assert!(looks_like_json("{\"a\":1}"));
        assert!(looks_like_json("  [1,2]"));
        assert!(looks_like_json("\"str\""));
        assert!(!looks_like_json("{not json"));
        assert!(!looks_like_json("42"));
        assert!(!looks_like_json("hello"));
    }

    #[test]
    fn test_is_analytics_host() {
        let settings = CaptureSettings::default();
        assert!(settings.is_analytics_host("www.google-analytics.com"));
        assert!(settings.is_analytics_host("sentry.io:443"));
        assert!(settings.is_analytics_host("o123.ingest.sentry.io"));
        assert!(!settings.is_analytics_host("notsentry.io"));
        assert!(!settings.is_analytics_host("api.example.com"));
    }

    #[test]
    fn test_is_asset() {
        let url = |path: &str| UrlParts {
            path: path.to_string(),
            ..UrlParts::default()
        };
        assert!(is_asset(&url("/static/app.CSS"), None, None));
        assert!(is_asset(&url("/x"), Some("Image"), None));
        assert!(is_asset(&url("/x"), None, Some("font/woff2")));
        assert!(!is_asset(&url("/api/users"), Some("XHR"), Some("application/json")));
    }

    #[test]
    fn test_default_settings() {
        let settings = CaptureSettings::default();
        assert!(!settings.http_assets);
        assert!(!settings.analytics);
        assert!(!settings.ws_small_frames);
        assert_eq!(settings.ws_min_bytes, 40);
        assert_eq!(settings.body_cap, 131_072);
        assert_eq!(settings.analytics_hosts.len(), 13);
    }
}
