//! # rulecraft-trace
//!
//! Hierarchical tracing for refinement sessions.
//!
//! ## Core Concepts
//! - **Run**: a grouping of params and text artifacts; runs nest
//! - **Span**: one traced unit of work with inputs, outputs and a status
//! - **Recorder**: the raw capability (`TraceLog` in memory, `NoopRecorder`)
//! - **Tracer**: best-effort front end handing out guards that close on drop

pub mod error;
pub mod model;
pub mod artifact;
pub mod recorder;
pub mod tracer;

pub use error::{Error, ErrorKind, Result};
pub use model::{
    attributes, Attributes, RunId, RunRecord, RunStatus, SpanId, SpanRecord, SpanStatus,
    TraceSnapshot,
};
pub use artifact::{ArtifactStore, FileArtifacts, MemoryArtifacts};
pub use recorder::{NoopRecorder, TraceLog, TraceRecorder};
pub use tracer::{RunGuard, SpanGuard, Tracer};
