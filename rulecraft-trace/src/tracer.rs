//! # Tracer
//!
//! The explicit tracing context handed to the refinement loop. It wraps a
//! [`TraceRecorder`] and gives out guards that close their run or span when
//! dropped, so every exit path (including `?`) leaves the stack balanced.
//!
//! Recording is best-effort: recorder failures are logged with
//! `tracing::warn!` and swallowed. A guard whose start failed is inert.

use crate::model::{Attributes, RunId, RunStatus, SpanId, SpanStatus};
use crate::recorder::{NoopRecorder, TraceRecorder};
use std::fmt::Display;

static NOOP: NoopRecorder = NoopRecorder;

fn best_effort<T>(operation: &'static str, result: crate::error::Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(operation, error = %err, "trace recording failed");
            None
        }
    }
}

#[derive(Clone, Copy)]
pub struct Tracer<'r> {
    recorder: &'r dyn TraceRecorder,
}

impl<'r> Tracer<'r> {
    pub fn new(recorder: &'r dyn TraceRecorder) -> Self {
        Self { recorder }
    }

    /// Tracer backed by [`NoopRecorder`]
    pub fn disabled() -> Tracer<'static> {
        Tracer { recorder: &NOOP }
    }

    pub fn start_run(&self, name: &str, parent: Option<&RunGuard<'_>>) -> RunGuard<'r> {
        let parent = parent.and_then(|p| p.id);
        let id = best_effort("start_run", self.recorder.start_run(name, parent));
        RunGuard {
            recorder: self.recorder,
            id,
            closed: false,
        }
    }

    pub fn start_span(
        &self,
        name: &str,
        parent: Option<&SpanGuard<'_>>,
        inputs: Attributes,
    ) -> SpanGuard<'r> {
        let parent = parent.and_then(|p| p.id);
        let id = best_effort("start_span", self.recorder.start_span(name, parent, inputs));
        SpanGuard {
            recorder: self.recorder,
            id,
            outputs: Attributes::new(),
            closed: false,
        }
    }
}

/// An open run. Dropping it without [`RunGuard::finish`] marks it failed.
#[must_use = "dropping a RunGuard immediately closes the run as failed"]
pub struct RunGuard<'r> {
    recorder: &'r dyn TraceRecorder,
    id: Option<RunId>,
    closed: bool,
}

impl RunGuard<'_> {
    pub fn id(&self) -> Option<RunId> {
        self.id
    }

    pub fn log_param(&self, key: &str, value: impl Display) {
        if let Some(id) = self.id {
            best_effort("log_param", self.recorder.log_param(id, key, &value.to_string()));
        }
    }

    pub fn log_artifact(&self, name: &str, content: &str) {
        if let Some(id) = self.id {
            best_effort("log_artifact", self.recorder.log_artifact(id, name, content));
        }
    }

    pub fn finish(mut self) {
        self.close(RunStatus::Finished);
    }

    pub fn fail(mut self) {
        self.close(RunStatus::Failed);
    }

    fn close(&mut self, status: RunStatus) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(id) = self.id {
            best_effort("end_run", self.recorder.end_run(id, status));
        }
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.close(RunStatus::Failed);
    }
}

/// An open span. Outputs accumulate until the span closes; dropping it
/// without [`SpanGuard::finish`] records it as an error with whatever outputs
/// were set.
#[must_use = "dropping a SpanGuard immediately closes the span as failed"]
pub struct SpanGuard<'r> {
    recorder: &'r dyn TraceRecorder,
    id: Option<SpanId>,
    outputs: Attributes,
    closed: bool,
}

impl SpanGuard<'_> {
    pub fn id(&self) -> Option<SpanId> {
        self.id
    }

    pub fn set_output(&mut self, key: &str, value: impl Into<String>) {
        self.outputs.insert(key.to_string(), value.into());
    }

    pub fn finish(mut self) {
        self.close(SpanStatus::Ok);
    }

    /// Close as failed, recording the error message as an output
    pub fn fail(mut self, error: &dyn Display) {
        self.set_output("error", error.to_string());
        self.close(SpanStatus::Error);
    }

    fn close(&mut self, status: SpanStatus) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(id) = self.id {
            let outputs = std::mem::take(&mut self.outputs);
            best_effort("end_span", self.recorder.end_span(id, status, outputs));
        }
    }
}

impl Drop for SpanGuard<'_> {
    fn drop(&mut self) {
        self.close(SpanStatus::Error);
    }
}
