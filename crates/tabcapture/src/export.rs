//! Export of persisted events and summary statistics.
//!
//! An export is two files: `capture.v1.jsonl` with one event per line in
//! persisted order, and `stats.v1.json` with an [`ExportSummary`].

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::buffer::Counters;
use crate::error::{Error, Result};
use crate::event::{CapturedEvent, Phase};
use crate::storage::RunMeta;

/// File name of the event stream.
pub const CAPTURE_FILE_NAME: &str = "capture.v1.jsonl";

/// File name of the summary.
pub const STATS_FILE_NAME: &str = "stats.v1.json";

/// Persisted events per type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeCounts {
    /// Request events.
    pub http_request: u64,
    /// Response events.
    pub http_response: u64,
    /// Websocket open events.
    pub ws_open: u64,
    /// Websocket frame events.
    pub ws_frame: u64,
}

/// Events seen for one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCount {
    /// Host, with port if non-default.
    pub host: String,
    /// Number of events.
    pub count: u64,
}

/// Summary statistics written next to the event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSummary {
    /// Run the events belong to.
    pub run_id: Option<String>,
    /// Run length in seconds, once the run has stopped.
    pub duration_s: Option<f64>,
    /// Requests observed, including excluded ones.
    pub http_count: u64,
    /// Websocket frames observed, including excluded ones.
    pub ws_frames: u64,
    /// Persisted events per type.
    pub counts_by_type: TypeCounts,
    /// Persisted events per host, most frequent first.
    pub hosts: Vec<HostCount>,
    /// 95th percentile of non-empty HTTP body sizes in KiB.
    pub p95_payload_kb: f64,
    /// Median time to first byte in milliseconds.
    pub median_ttfb_ms: f64,
}

/// The `p`th percentile of `values`.
///
/// Sorts ascending and picks index `floor(p / 100 * n)`, clamped to the last
/// element. Returns 0 for an empty slice.
#[must_use]
pub fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let index = ((p / 100.0) * values.len() as f64).floor() as usize;
    values[index.min(values.len() - 1)]
}

impl ExportSummary {
    /// Summarize `events` for the run.
    ///
    /// Raw counters come from `counters`, which should be the live counters
    /// of a running session or the snapshot stored with the run.
    #[must_use]
    pub fn compute(events: &[CapturedEvent], meta: Option<&RunMeta>, counters: Counters) -> Self {
        let mut counts = TypeCounts::default();
        let mut hosts: HashMap<&str, u64> = HashMap::new();
        let mut payload_kb = Vec::new();
        let mut ttfbs = Vec::new();

        for event in events {
            match event.phase() {
                Phase::Request => counts.http_request += 1,
                Phase::Response => counts.http_response += 1,
                Phase::WsOpen => counts.ws_open += 1,
                Phase::WsFrame => counts.ws_frame += 1,
            }
            if let Some(host) = event.host().filter(|h| !h.is_empty()) {
                *hosts.entry(host).or_default() += 1;
            }
            if let Some(body) = event.http_body().filter(|b| b.size > 0) {
                #[allow(clippy::cast_precision_loss)]
                payload_kb.push(body.size as f64 / 1024.0);
            }
            if let Some(ttfb) = event.timing().and_then(|t| t.ttfb).filter(|t| *t > 0.0) {
                ttfbs.push(ttfb);
            }
        }

        let mut hosts: Vec<HostCount> = hosts
            .into_iter()
            .map(|(host, count)| HostCount {
                host: host.to_string(),
                count,
            })
            .collect();
        hosts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.host.cmp(&b.host)));

        Self {
            run_id: meta.map(|m| m.run_id.clone()),
            duration_s: meta
                .filter(|m| m.stopped_at.is_some())
                .map(RunMeta::duration_secs),
            http_count: counters.http_req,
            ws_frames: counters.ws_frames,
            counts_by_type: counts,
            hosts,
            p95_payload_kb: percentile(&mut payload_kb, 95.0),
            median_ttfb_ms: percentile(&mut ttfbs, 50.0),
        }
    }
}

/// Events plus their summary, ready to be written out.
#[derive(Debug, Clone)]
pub struct ExportBundle {
    /// Events in persisted order.
    pub events: Vec<CapturedEvent>,
    /// Summary over `events`.
    pub summary: ExportSummary,
}

/// Where an export was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportPaths {
    /// The event stream.
    pub capture: PathBuf,
    /// The summary.
    pub stats: PathBuf,
}

impl ExportBundle {
    /// Bundle `events` with a freshly computed summary.
    #[must_use]
    pub fn new(events: Vec<CapturedEvent>, meta: Option<&RunMeta>, counters: Counters) -> Self {
        let summary = ExportSummary::compute(&events, meta, counters);
        Self { events, summary }
    }

    /// Serialize the events as JSON lines.
    ///
    /// # Errors
    ///
    /// Returns an error if an event cannot be serialized.
    pub fn to_jsonl(&self) -> Result<String> {
        let lines = self
            .events
            .iter()
            .map(serde_json::to_string)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(lines.join("\n"))
    }

    /// Serialize the summary as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the summary cannot be serialized.
    pub fn stats_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.summary)?)
    }

    /// Write both files into `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or a file cannot be written.
    pub fn write_to(&self, dir: &Path) -> Result<ExportPaths> {
        fs::create_dir_all(dir).map_err(|source| Error::DirectoryCreate {
            path: dir.to_path_buf(),
            source,
        })?;

        let paths = ExportPaths {
            capture: dir.join(CAPTURE_FILE_NAME),
            stats: dir.join(STATS_FILE_NAME),
        };
        fs::write(&paths.capture, self.to_jsonl()?)?;
        fs::write(&paths.stats, self.stats_json()?)?;

        info!(
            events = self.events.len(),
            path = %paths.capture.display(),
            "Export written"
        );
        Ok(paths)
    }
}
