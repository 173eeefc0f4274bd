//! Trace records: runs, spans and their identifiers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Key/value attributes captured on a span or logged as run params
pub type Attributes = BTreeMap<String, String>;

/// Build [`Attributes`] from borrowed keys
pub fn attributes<'a, I>(pairs: I) -> Attributes
where
    I: IntoIterator<Item = (&'a str, String)>,
{
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpanId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub usize);

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "span#{}", self.0)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Open,
    Ok,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
}

/// One traced unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanRecord {
    pub id: SpanId,
    pub name: String,
    pub parent: Option<SpanId>,
    pub inputs: Attributes,
    pub outputs: Attributes,
    pub status: SpanStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// A grouping of params and artifacts; runs nest through `parent`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub uuid: Uuid,
    /// Artifact-store key: the parent's key, `/`, then this run's uuid
    pub key: String,
    pub name: String,
    pub parent: Option<RunId>,
    pub params: Attributes,
    /// Artifact names in first-logged order
    pub artifacts: Vec<String>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Everything recorded so far, in creation order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceSnapshot {
    pub runs: Vec<RunRecord>,
    pub spans: Vec<SpanRecord>,
}

impl TraceSnapshot {
    pub fn span(&self, id: SpanId) -> Option<&SpanRecord> {
        self.spans.iter().find(|s| s.id == id)
    }

    pub fn run(&self, id: RunId) -> Option<&RunRecord> {
        self.runs.iter().find(|r| r.id == id)
    }

    pub fn children(&self, parent: SpanId) -> impl Iterator<Item = &SpanRecord> {
        self.spans.iter().filter(move |s| s.parent == Some(parent))
    }

    pub fn roots(&self) -> impl Iterator<Item = &SpanRecord> {
        self.spans.iter().filter(|s| s.parent.is_none())
    }

    /// Runs without a parent, in start order
    pub fn root_runs(&self) -> impl Iterator<Item = &RunRecord> {
        self.runs.iter().filter(|r| r.parent.is_none())
    }

    pub fn artifact_count(&self) -> usize {
        self.runs.iter().map(|r| r.artifacts.len()).sum()
    }

    /// Indented span tree, one line per span
    pub fn render_tree(&self) -> String {
        let mut out = String::new();
        for root in self.roots() {
            self.render_span(root, 0, &mut out);
        }
        out
    }

    fn render_span(&self, span: &SpanRecord, depth: usize, out: &mut String) {
        let elapsed = span
            .ended_at
            .map(|end| format!(" {}ms", (end - span.started_at).num_milliseconds()))
            .unwrap_or_default();
        out.push_str(&format!(
            "{}{} [{:?}]{}\n",
            "  ".repeat(depth),
            span.name,
            span.status,
            elapsed
        ));
        for child in self.children(span.id) {
            self.render_span(child, depth + 1, out);
        }
    }
}
