//! Tracer - span sink writing finished spans to a JSONL file
//!
//! Every span also opens a `tracing` span so log lines emitted while it is
//! active carry the operation and trace id.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::TracingConfig;

/// Errors creating the span sink
#[derive(Debug, Error)]
pub enum TracerError {
    #[error("failed to open span sink {path}: {source}")]
    Sink {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Outcome recorded on a finished span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    Ok,
    Error,
}

/// One finished span, as written to the sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanRecord {
    pub trace_id: String,
    pub span_id: String,
    pub service: String,
    pub operation: String,
    pub started_at: DateTime<Utc>,
    pub duration_us: u64,
    pub status: SpanStatus,
}

struct TracerInner {
    service: String,
    sink: Option<Mutex<BufWriter<File>>>,
}

/// Cloneable tracing handle; clones share one sink
#[derive(Clone)]
pub struct Tracer {
    inner: Arc<TracerInner>,
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("service", &self.inner.service)
            .field("sink", &self.inner.sink.is_some())
            .finish()
    }
}

impl Tracer {
    /// Create a tracer for `service`, opening the span sink if one is configured
    pub fn open(service: &str, config: &TracingConfig) -> Result<Self, TracerError> {
        debug!(%service, ?config.spans_file, "Tracer::open: called");
        let sink = match &config.spans_file {
            Some(path) => Some(Mutex::new(BufWriter::new(open_sink(path)?))),
            None => None,
        };
        Ok(Self {
            inner: Arc::new(TracerInner {
                service: service.to_string(),
                sink,
            }),
        })
    }

    /// Tracer whose spans only reach the log
    pub fn log_only(service: &str) -> Self {
        Self {
            inner: Arc::new(TracerInner {
                service: service.to_string(),
                sink: None,
            }),
        }
    }

    pub fn service(&self) -> &str {
        &self.inner.service
    }

    /// Start a span for `operation` in a new trace
    pub fn start_span(&self, operation: &str) -> ActiveSpan {
        let trace_id = Uuid::now_v7().simple().to_string();
        let span = tracing::info_span!("span", service = %self.inner.service, %operation, %trace_id);
        ActiveSpan {
            tracer: self.clone(),
            trace_id,
            span_id: Uuid::now_v7().simple().to_string(),
            operation: operation.to_string(),
            started_at: Utc::now(),
            started: Instant::now(),
            span,
            finished: false,
        }
    }

    /// Flush buffered span records to disk
    pub fn flush(&self) {
        if let Some(sink) = &self.inner.sink {
            match sink.lock() {
                Ok(mut writer) => {
                    if let Err(e) = writer.flush() {
                        warn!(error = %e, "Failed to flush span sink");
                    }
                }
                Err(_) => warn!("Span sink lock poisoned, dropping flush"),
            }
        }
    }

    fn emit(&self, record: &SpanRecord) {
        debug!(
            operation = %record.operation,
            trace_id = %record.trace_id,
            duration_us = record.duration_us,
            status = ?record.status,
            "span finished"
        );
        let Some(sink) = &self.inner.sink else {
            return;
        };
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to serialize span");
                return;
            }
        };
        match sink.lock() {
            Ok(mut writer) => {
                if let Err(e) = writeln!(writer, "{}", line) {
                    warn!(error = %e, "Failed to write span");
                }
            }
            Err(_) => warn!("Span sink lock poisoned, dropping span"),
        }
    }
}

fn open_sink(path: &Path) -> Result<File, TracerError> {
    let sink_error = |source| TracerError::Sink {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(sink_error)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(sink_error)
}

/// A span in progress; recorded as `Ok` if dropped without [`ActiveSpan::finish`]
pub struct ActiveSpan {
    tracer: Tracer,
    trace_id: String,
    span_id: String,
    operation: String,
    started_at: DateTime<Utc>,
    started: Instant,
    span: tracing::Span,
    finished: bool,
}

impl ActiveSpan {
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// The `tracing` span to instrument work with
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn finish(mut self, status: SpanStatus) {
        self.record(status);
    }

    fn record(&mut self, status: SpanStatus) {
        if self.finished {
            return;
        }
        self.finished = true;
        let record = SpanRecord {
            trace_id: self.trace_id.clone(),
            span_id: self.span_id.clone(),
            service: self.tracer.service().to_string(),
            operation: self.operation.clone(),
            started_at: self.started_at,
            duration_us: u64::try_from(self.started.elapsed().as_micros()).unwrap_or(u64::MAX),
            status,
        };
        self.tracer.emit(&record);
    }
}

impl Drop for ActiveSpan {
    fn drop(&mut self) {
        self.record(SpanStatus::Ok);
    }
}

/// Read every span record from a sink file
pub fn read_spans(path: impl AsRef<Path>) -> eyre::Result<Vec<SpanRecord>> {
    let content = fs::read_to_string(path.as_ref())?;
    let mut records = Vec::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        records.push(serde_json::from_str(line)?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_spans_are_written_to_sink() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("traces").join("spans.jsonl");
        let tracer = Tracer::open(
            "jobs.test",
            &TracingConfig {
                spans_file: Some(path.clone()),
            },
        )
        .unwrap();

        tracer.start_span("CreateJob").finish(SpanStatus::Ok);
        tracer.start_span("DeleteJob").finish(SpanStatus::Error);
        tracer.flush();

        let spans = read_spans(&path).unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].service, "jobs.test");
        assert_eq!(spans[0].operation, "CreateJob");
        assert_eq!(spans[1].status, SpanStatus::Error);
        assert_ne!(spans[0].trace_id, spans[1].trace_id);
    }

    #[test]
    fn test_dropped_span_is_recorded_once() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("spans.jsonl");
        let tracer = Tracer::open(
            "jobs.test",
            &TracingConfig {
                spans_file: Some(path.clone()),
            },
        )
        .unwrap();

        {
            let _span = tracer.start_span("ListJobs");
        }
        tracer.flush();

        let spans = read_spans(&path).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].status, SpanStatus::Ok);
    }

    #[test]
    fn test_unwritable_sink_fails() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("file");
        fs::write(&blocker, "not a directory").unwrap();

        let result = Tracer::open(
            "jobs.test",
            &TracingConfig {
                spans_file: Some(blocker.join("spans.jsonl")),
            },
        );
        assert!(matches!(result, Err(TracerError::Sink { .. })));
    }

    #[test]
    fn test_log_only_tracer_has_no_sink() {
        let tracer = Tracer::log_only("jobs.test");
        assert_eq!(tracer.service(), "jobs.test");
        tracer.start_span("Ping").finish(SpanStatus::Ok);
        tracer.flush();
    }
}
