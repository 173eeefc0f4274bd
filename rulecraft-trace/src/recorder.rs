//! # Trace Recorders
//!
//! `TraceRecorder` is the raw recording capability. Implementations may fail;
//! callers that must not be disturbed by those failures go through
//! [`crate::Tracer`] instead of calling a recorder directly.
//!
//! `TraceLog` keeps the whole run/span tree in memory and treats open runs and
//! spans as one stack: the only frame that may be closed is the innermost
//! open one.

use crate::artifact::{ArtifactStore, MemoryArtifacts};
use crate::error::{Error, Result};
use crate::model::{
    Attributes, RunId, RunRecord, RunStatus, SpanId, SpanRecord, SpanStatus, TraceSnapshot,
};
use chrono::Utc;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Recording capability for runs, spans and artifacts
pub trait TraceRecorder: Send + Sync {
    fn start_run(&self, name: &str, parent: Option<RunId>) -> Result<RunId>;

    fn log_param(&self, run: RunId, key: &str, value: &str) -> Result<()>;

    /// Re-logging an existing name overwrites it
    fn log_artifact(&self, run: RunId, name: &str, content: &str) -> Result<()>;

    fn end_run(&self, run: RunId, status: RunStatus) -> Result<()>;

    fn start_span(&self, name: &str, parent: Option<SpanId>, inputs: Attributes) -> Result<SpanId>;

    fn end_span(&self, span: SpanId, status: SpanStatus, outputs: Attributes) -> Result<()>;
}

/// Recorder that records nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRecorder;

impl TraceRecorder for NoopRecorder {
    fn start_run(&self, _name: &str, _parent: Option<RunId>) -> Result<RunId> {
        Ok(RunId(0))
    }

    fn log_param(&self, _run: RunId, _key: &str, _value: &str) -> Result<()> {
        Ok(())
    }

    fn log_artifact(&self, _run: RunId, _name: &str, _content: &str) -> Result<()> {
        Ok(())
    }

    fn end_run(&self, _run: RunId, _status: RunStatus) -> Result<()> {
        Ok(())
    }

    fn start_span(&self, _name: &str, _parent: Option<SpanId>, _inputs: Attributes) -> Result<SpanId> {
        Ok(SpanId(0))
    }

    fn end_span(&self, _span: SpanId, _status: SpanStatus, _outputs: Attributes) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Run(RunId),
    Span(SpanId),
}

struct TraceState {
    runs: Vec<RunRecord>,
    spans: Vec<SpanRecord>,
    open: Vec<Frame>,
    artifacts: Box<dyn ArtifactStore>,
}

impl TraceState {
    fn running(&mut self, run: RunId) -> Result<&mut RunRecord> {
        match self.runs.get_mut(run.0) {
            Some(record) if record.status == RunStatus::Running => Ok(record),
            Some(_) => Err(Error::tracing(format!("{} is already closed", run))),
            None => Err(Error::tracing(format!("{} does not exist", run))),
        }
    }

    fn close(&mut self, frame: Frame) -> Result<()> {
        match self.open.last() {
            Some(top) if *top == frame => {
                self.open.pop();
                Ok(())
            }
            Some(top) => Err(Error::tracing(format!(
                "{} closed out of order; innermost open frame is {}",
                describe(frame),
                describe(*top)
            ))),
            None => Err(Error::tracing(format!(
                "{} closed but nothing is open",
                describe(frame)
            ))),
        }
    }
}

fn describe(frame: Frame) -> String {
    match frame {
        Frame::Run(id) => id.to_string(),
        Frame::Span(id) => id.to_string(),
    }
}

/// In-memory run/span tree with pluggable artifact storage
pub struct TraceLog {
    state: Mutex<TraceState>,
}

impl TraceLog {
    /// Trace log with in-memory artifacts
    pub fn new() -> Self {
        Self::with_store(MemoryArtifacts::new())
    }

    pub fn with_store(store: impl ArtifactStore + 'static) -> Self {
        Self {
            state: Mutex::new(TraceState {
                runs: Vec::new(),
                spans: Vec::new(),
                open: Vec::new(),
                artifacts: Box::new(store),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, TraceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> TraceSnapshot {
        let state = self.state();
        TraceSnapshot {
            runs: state.runs.clone(),
            spans: state.spans.clone(),
        }
    }

    /// Number of runs and spans still open
    pub fn open_depth(&self) -> usize {
        self.state().open.len()
    }

    pub fn artifact(&self, run: RunId, name: &str) -> Option<String> {
        let state = self.state();
        let record = state.runs.get(run.0)?;
        state.artifacts.read(&record.key, name)
    }

    pub fn artifact_count(&self) -> usize {
        self.state().runs.iter().map(|r| r.artifacts.len()).sum()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.snapshot()).map_err(|e| {
            Error::serialization_failed("failed to serialize trace")
                .with_operation("trace::to_json")
                .set_source(e)
        })
    }

    /// Write the snapshot as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = self.to_json()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json).map_err(|e| {
            Error::storage_failed(format!("failed to write {}", path.display()))
                .with_operation("trace::save")
                .set_source(e)
        })
    }
}

impl Default for TraceLog {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceRecorder for TraceLog {
    fn start_run(&self, name: &str, parent: Option<RunId>) -> Result<RunId> {
        let mut state = self.state();
        let uuid = Uuid::new_v4();
        let key = match parent {
            Some(parent) => {
                let record = state.running(parent).map_err(|e| e.with_operation("trace::start_run"))?;
                format!("{}/{}", record.key, uuid)
            }
            None => uuid.to_string(),
        };

        let id = RunId(state.runs.len());
        state.runs.push(RunRecord {
            id,
            uuid,
            key,
            name: name.to_string(),
            parent,
            params: Attributes::new(),
            artifacts: Vec::new(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
        });
        state.open.push(Frame::Run(id));

        tracing::debug!(run = %id, name, parent = ?parent, "run started");
        Ok(id)
    }

    fn log_param(&self, run: RunId, key: &str, value: &str) -> Result<()> {
        let mut state = self.state();
        let record = state.running(run).map_err(|e| e.with_operation("trace::log_param"))?;
        record.params.insert(key.to_string(), value.to_string());
        tracing::debug!(run = %run, key, value, "param logged");
        Ok(())
    }

    fn log_artifact(&self, run: RunId, name: &str, content: &str) -> Result<()> {
        let mut state = self.state();
        let key = state
            .running(run)
            .map_err(|e| e.with_operation("trace::log_artifact"))?
            .key
            .clone();

        state
            .artifacts
            .write(&key, name, content)
            .map_err(|e| e.with_operation("trace::log_artifact"))?;

        let record = state.running(run)?;
        if !record.artifacts.iter().any(|a| a == name) {
            record.artifacts.push(name.to_string());
        }

        tracing::debug!(run = %run, artifact = name, bytes = content.len(), "artifact logged");
        Ok(())
    }

    fn end_run(&self, run: RunId, status: RunStatus) -> Result<()> {
        let mut state = self.state();
        state.running(run).map_err(|e| e.with_operation("trace::end_run"))?;
        state
            .close(Frame::Run(run))
            .map_err(|e| e.with_operation("trace::end_run"))?;

        let record = state.running(run)?;
        record.status = status;
        record.ended_at = Some(Utc::now());

        tracing::debug!(run = %run, status = ?status, "run ended");
        Ok(())
    }

    fn start_span(&self, name: &str, parent: Option<SpanId>, inputs: Attributes) -> Result<SpanId> {
        let mut state = self.state();
        if let Some(parent) = parent {
            let open = state
                .spans
                .get(parent.0)
                .map(|s| s.status == SpanStatus::Open)
                .unwrap_or(false);
            if !open {
                return Err(Error::tracing(format!("parent {} is not open", parent))
                    .with_operation("trace::start_span"));
            }
        }

        let id = SpanId(state.spans.len());
        state.spans.push(SpanRecord {
            id,
            name: name.to_string(),
            parent,
            inputs,
            outputs: Attributes::new(),
            status: SpanStatus::Open,
            started_at: Utc::now(),
            ended_at: None,
        });
        state.open.push(Frame::Span(id));

        tracing::debug!(span = %id, name, parent = ?parent, "span started");
        Ok(id)
    }

    fn end_span(&self, span: SpanId, status: SpanStatus, outputs: Attributes) -> Result<()> {
        let mut state = self.state();
        state
            .close(Frame::Span(span))
            .map_err(|e| e.with_operation("trace::end_span"))?;

        let record = state
            .spans
            .get_mut(span.0)
            .ok_or_else(|| Error::tracing(format!("{} does not exist", span)))?;
        record.outputs.extend(outputs);
        record.status = status;
        record.ended_at = Some(Utc::now());

        tracing::debug!(span = %span, name = %record.name, status = ?status, "span ended");
        Ok(())
    }
}
