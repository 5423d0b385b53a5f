//! Access-log ingestion
//!
//! A proxy keeps one long-lived connection open and pushes newline-delimited
//! JSON frames, each frame a batch of completed-request entries. Entries that
//! carry the credential header set on Allow become usage events; everything
//! else is dropped without error.

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use super::scheduler::MeteringPipeline;
use crate::auth::API_KEY_ID_HEADER;
use crate::db::UsageEvent;
use crate::error::GateError;

/// Frames above this size without a newline end the stream
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Frame that is not a valid batch; skipped
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    /// Connection-level failure; ends the stream
    #[error("transport error: {0}")]
    Transport(String),
}

/// One frame of the access-log stream
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LogBatch {
    #[serde(default)]
    pub log_entries: Vec<HttpLogEntry>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HttpLogEntry {
    #[serde(default)]
    pub request: LogRequest,
    #[serde(default)]
    pub response: LogResponse,
    /// Time to last downstream byte, computed by the proxy
    #[serde(default)]
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LogRequest {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub request_method: String,
    #[serde(default)]
    pub request_headers: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LogResponse {
    #[serde(default)]
    pub response_code: Option<u16>,
}

impl LogRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.request_headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Build a usage event from an attributed entry, stamped with `now`
pub fn extract_usage_event(entry: &HttpLogEntry, now: DateTime<Utc>) -> Result<UsageEvent, GateError> {
    let header = entry
        .request
        .header(API_KEY_ID_HEADER)
        .filter(|value| !value.is_empty())
        .ok_or(GateError::IngestDropped("no attribution header"))?;
    let api_key_id = Uuid::parse_str(header)
        .map_err(|_| GateError::IngestDropped("attribution header is not a credential id"))?;

    Ok(UsageEvent {
        api_key_id,
        endpoint: entry.request.path.clone(),
        method: entry.request.request_method.clone(),
        status_code: entry.response.response_code.map(i32::from).unwrap_or(0),
        response_time_ms: entry.duration_ms.unwrap_or(0),
        timestamp: now,
    })
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

/// Splits a byte stream into non-blank lines
#[derive(Default)]
struct LineFramer {
    buf: BytesMut,
    /// Prefix of `buf` already known to hold no newline
    scanned: usize,
}

impl LineFramer {
    fn push(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>, IngestError> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let line = self.buf.split_to(self.scanned + pos + 1).freeze();
            self.scanned = 0;
            if !is_blank(&line) {
                lines.push(line);
            }
        }
        self.scanned = self.buf.len();
        if self.buf.len() > MAX_FRAME_BYTES {
            return Err(IngestError::Transport(format!(
                "frame exceeds {} bytes",
                MAX_FRAME_BYTES
            )));
        }
        Ok(lines)
    }

    fn finish(&mut self) -> Option<Bytes> {
        self.scanned = 0;
        let rest = self.buf.split().freeze();
        if is_blank(&rest) {
            None
        } else {
            Some(rest)
        }
    }
}

/// Decode newline-delimited JSON batches from a byte stream. A transport
/// error is yielded once and ends the stream; a trailing frame without a
/// newline is decoded when the peer closes.
pub fn decode_ndjson<S, E>(bytes: S) -> impl Stream<Item = Result<LogBatch, IngestError>>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    struct State<S> {
        bytes: S,
        framer: LineFramer,
        pending: VecDeque<Bytes>,
        finished: bool,
    }

    let state = State {
        bytes,
        framer: LineFramer::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.pending.pop_front() {
                let item = serde_json::from_slice::<LogBatch>(&line).map_err(IngestError::from);
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => match state.framer.push(&chunk) {
                    Ok(lines) => state.pending.extend(lines),
                    Err(e) => {
                        state.finished = true;
                        state.pending.clear();
                        return Some((Err(e), state));
                    }
                },
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(IngestError::Transport(e.to_string())), state));
                }
                None => {
                    state.finished = true;
                    state.pending.extend(state.framer.finish());
                }
            }
        }
    })
}

/// Counters for one consumed connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct IngestSummary {
    pub batches: u64,
    pub ingested: u64,
    pub dropped: u64,
    pub malformed: u64,
}

/// Consumes access-log streams into the metering pipeline
#[derive(Clone)]
pub struct Ingestor {
    pipeline: Arc<MeteringPipeline>,
}

impl Ingestor {
    pub fn new(pipeline: Arc<MeteringPipeline>) -> Self {
        Self { pipeline }
    }

    /// Consume `stream` until the peer closes it, a transport error occurs or
    /// `shutdown` fires. A batch already received is always processed in
    /// full. On exit the pipeline is flushed.
    pub async fn consume<S>(&self, mut stream: S, shutdown: CancellationToken) -> IngestSummary
    where
        S: Stream<Item = Result<LogBatch, IngestError>> + Unpin,
    {
        let mut summary = IngestSummary::default();

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, closing access-log stream");
                    break;
                }
                next = stream.next() => next,
            };

            match next {
                Some(Ok(batch)) => {
                    summary.batches += 1;
                    self.ingest_batch(batch, &mut summary).await;
                }
                Some(Err(e @ IngestError::Malformed(_))) => {
                    summary.malformed += 1;
                    self.pipeline.stats().record_malformed_frame();
                    warn!(error = %e, "Skipping malformed access-log frame");
                }
                Some(Err(e @ IngestError::Transport(_))) => {
                    warn!(error = %e, "Access-log stream failed");
                    break;
                }
                None => {
                    debug!("Access-log stream closed by peer");
                    break;
                }
            }
        }

        self.pipeline.flush().await;

        info!(
            batches = summary.batches,
            ingested = summary.ingested,
            dropped = summary.dropped,
            "Access-log stream finished"
        );
        summary
    }

    async fn ingest_batch(&self, batch: LogBatch, summary: &mut IngestSummary) {
        let now = Utc::now();
        for entry in &batch.log_entries {
            match extract_usage_event(entry, now) {
                Ok(event) => {
                    summary.ingested += 1;
                    self.pipeline.record(event).await;
                }
                Err(e) => {
                    summary.dropped += 1;
                    self.pipeline.stats().record_dropped();
                    debug!(reason = %e, path = %entry.request.path, "Dropping unattributed log entry");
                }
            }
        }
    }
}
