//! Core data models used throughout Exopedia.
//!
//! These types represent the pages, chunks, creation jobs, and log entries
//! that flow between the stores, the resolver, and the HTTP surface.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Page metadata as stored in the `pages` table. The markdown body lives
/// in the blob store at `storage_path`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub summary: String,
    pub storage_path: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub last_visited_at: Option<i64>,
}

/// A page together with its markdown body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDocument {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub markdown: String,
}

/// Input to [`crate::pages::PageStore::persist_new_page`].
#[derive(Debug, Clone)]
pub struct NewPage {
    pub title: String,
    pub proposed_slug: String,
    pub summary: String,
    pub markdown: String,
}

/// Result of persisting a new page.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedPage {
    pub page_id: String,
    pub canonical_slug: String,
    pub storage_object_path: String,
}

/// Input to [`crate::pages::PageStore::persist_page_update`].
#[derive(Debug, Clone)]
pub struct PageUpdate {
    pub slug: String,
    pub markdown: String,
    pub summary: Option<String>,
}

/// A chunk of a page's markdown body.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub page_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// A semantic-index candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageMatch {
    pub slug: String,
    pub title: String,
    pub summary: String,
    pub score: f32,
}

/// A retrieval-index hit.
#[derive(Debug, Clone, Serialize)]
pub struct ContentHit {
    pub slug: String,
    pub title: String,
    pub chunk_index: i64,
    pub content: String,
    pub similarity: f32,
}

// ============ Creation jobs ============

/// Lifecycle of a creation job. `Succeeded` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            other => anyhow::bail!("unknown job status: {}", other),
        }
    }
}

/// A row of `creation_queue`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub source_slug: String,
    pub target_slug: String,
    pub status: JobStatus,
    pub result_slug: Option<String>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

/// Result of [`crate::jobs::JobLedger::get_or_create`].
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub id: String,
    pub status: JobStatus,
    pub result_slug: Option<String>,
    pub was_created: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub(crate) fn from_db(s: &str) -> Self {
        match s {
            "warn" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogPhase {
    Start,
    Model,
    Tool,
    Background,
    Exception,
}

impl LogPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogPhase::Start => "start",
            LogPhase::Model => "model",
            LogPhase::Tool => "tool",
            LogPhase::Background => "background",
            LogPhase::Exception => "exception",
        }
    }

    pub(crate) fn from_db(s: &str) -> Self {
        match s {
            "start" => LogPhase::Start,
            "model" => LogPhase::Model,
            "tool" => LogPhase::Tool,
            "exception" => LogPhase::Exception,
            _ => LogPhase::Background,
        }
    }
}

/// A log entry about to be appended.
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub level: LogLevel,
    pub phase: LogPhase,
    pub tool_name: Option<String>,
    pub message: String,
    pub args_snippet: Option<String>,
    pub result_snippet: Option<String>,
}

impl NewLogEntry {
    pub fn new(level: LogLevel, phase: LogPhase, message: impl Into<String>) -> Self {
        Self {
            level,
            phase,
            tool_name: None,
            message: message.into(),
            args_snippet: None,
            result_snippet: None,
        }
    }

    pub fn tool(mut self, name: impl Into<String>) -> Self {
        self.tool_name = Some(name.into());
        self
    }

    pub fn args(mut self, snippet: impl Into<String>) -> Self {
        self.args_snippet = Some(snippet.into());
        self
    }

    pub fn result(mut self, snippet: impl Into<String>) -> Self {
        self.result_snippet = Some(snippet.into());
        self
    }
}

/// A stored log entry. `seq` is monotonic within the whole table, so it
/// orders entries within a job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub seq: i64,
    pub ts: i64,
    pub level: LogLevel,
    pub phase: LogPhase,
    pub tool_name: Option<String>,
    pub message: String,
    pub args_snippet: Option<String>,
    pub result_snippet: Option<String>,
}
