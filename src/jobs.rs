//! Job Ledger: one creation job per `(source_slug, target_slug)` pair.
//!
//! Creation is idempotent through the table's unique key: concurrent
//! requests for the same pair race on a single `INSERT ... ON CONFLICT DO
//! NOTHING` and exactly one of them observes `was_created = true`.
//!
//! Status only moves forward:
//!
//! ```text
//!   queued ──▶ running ──▶ succeeded
//!     │           │
//!     └───────────┴──────▶ failed
//! ```
//!
//! Every transition is a guarded `UPDATE ... WHERE status IN (...)`, so a
//! late writer can never pull a terminal job back. Logs are append-only and
//! ordered by their table-wide sequence number.

use anyhow::Result;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

use crate::models::{Job, JobHandle, JobStatus, LogEntry, LogLevel, LogPhase, NewLogEntry};

pub struct JobLedger {
    pool: SqlitePool,
}

/// Optional fields written alongside a status change.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub result_slug: Option<String>,
    pub error_message: Option<String>,
}

impl JobLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Return the job for the pair, creating it in `queued` if absent.
    pub async fn get_or_create(&self, source_slug: &str, target_slug: &str) -> Result<JobHandle> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = chrono::Utc::now().timestamp();

        let inserted = sqlx::query(
            r#"
            INSERT INTO creation_queue (id, source_slug, target_slug, status, created_at)
            VALUES (?, ?, ?, 'queued', ?)
            ON CONFLICT(source_slug, target_slug) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(source_slug)
        .bind(target_slug)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 1 {
            return Ok(JobHandle {
                id,
                status: JobStatus::Queued,
                result_slug: None,
                was_created: true,
            });
        }

        let job = self
            .find_by_pair(source_slug, target_slug)
            .await?
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "creation job for {} -> {} vanished after conflict",
                    source_slug,
                    target_slug
                )
            })?;

        Ok(JobHandle {
            id: job.id,
            status: job.status,
            result_slug: job.result_slug,
            was_created: false,
        })
    }

    pub async fn find_by_pair(&self, source_slug: &str, target_slug: &str) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM creation_queue WHERE source_slug = ? AND target_slug = ?",
            JOB_COLUMNS
        ))
        .bind(source_slug)
        .bind(target_slug)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| job_from_row(&r)).transpose()
    }

    pub async fn get_job(&self, id: &str) -> Result<Option<Job>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM creation_queue WHERE id = ?",
            JOB_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| job_from_row(&r)).transpose()
    }

    /// Move a job to `status`. Backward or sideways moves are refused and
    /// return false.
    pub async fn set_status(&self, id: &str, status: JobStatus, update: StatusUpdate) -> Result<bool> {
        match status {
            JobStatus::Queued => Ok(false),
            JobStatus::Running => self.mark_running(id).await,
            JobStatus::Succeeded => {
                let slug = update.result_slug.ok_or_else(|| {
                    anyhow::anyhow!("succeeded status requires a result slug")
                })?;
                self.mark_succeeded(id, &slug).await
            }
            JobStatus::Failed => {
                let message = update
                    .error_message
                    .unwrap_or_else(|| "unknown error".to_string());
                self.mark_failed(id, &message).await
            }
        }
    }

    /// `queued -> running`. Returns false when the job was not queued.
    pub async fn mark_running(&self, id: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let changed = sqlx::query(
            "UPDATE creation_queue SET status = 'running', started_at = ? WHERE id = ? AND status = 'queued'",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(changed == 1)
    }

    /// Non-terminal -> `succeeded`. Returns false if the job had already
    /// reached a terminal state.
    pub async fn mark_succeeded(&self, id: &str, result_slug: &str) -> Result<bool> {
        self.finish(id, JobStatus::Succeeded, Some(result_slug), None)
            .await
    }

    /// Non-terminal -> `failed`. Returns false if the job had already
    /// reached a terminal state.
    pub async fn mark_failed(&self, id: &str, error_message: &str) -> Result<bool> {
        self.finish(id, JobStatus::Failed, None, Some(error_message))
            .await
    }

    async fn finish(
        &self,
        id: &str,
        status: JobStatus,
        result_slug: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let changed = sqlx::query(
            r#"
            UPDATE creation_queue
            SET status = ?, result_slug = ?, error_message = ?, finished_at = ?
            WHERE id = ? AND status IN ('queued', 'running')
            "#,
        )
        .bind(status.as_str())
        .bind(result_slug)
        .bind(error_message)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(changed == 1)
    }

    /// Append one log entry to a job.
    pub async fn append_log(&self, job_id: &str, entry: &NewLogEntry) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO creation_logs (queue_id, ts, level, phase, tool_name, message, args_snip, result_snip)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job_id)
        .bind(now)
        .bind(entry.level.as_str())
        .bind(entry.phase.as_str())
        .bind(&entry.tool_name)
        .bind(&entry.message)
        .bind(&entry.args_snippet)
        .bind(&entry.result_snippet)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All log entries of a job in append order.
    pub async fn logs(&self, job_id: &str) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT seq, ts, level, phase, tool_name, message, args_snip, result_snip
            FROM creation_logs
            WHERE queue_id = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| LogEntry {
                seq: row.get("seq"),
                ts: row.get("ts"),
                level: LogLevel::from_db(row.get::<String, _>("level").as_str()),
                phase: LogPhase::from_db(row.get::<String, _>("phase").as_str()),
                tool_name: row.get("tool_name"),
                message: row.get("message"),
                args_snippet: row.get("args_snip"),
                result_snippet: row.get("result_snip"),
            })
            .collect())
    }

    /// Fail every job stuck in `queued` or `running` for longer than
    /// `max_age_secs`, e.g. after a process restart. Returns how many were
    /// failed.
    pub async fn reconcile_stale(&self, max_age_secs: i64) -> Result<u64> {
        let now = chrono::Utc::now().timestamp();
        let cutoff = now - max_age_secs;

        let stale: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT id FROM creation_queue
            WHERE status IN ('queued', 'running')
              AND COALESCE(started_at, created_at) < ?
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut failed = 0;
        for id in &stale {
            if self
                .mark_failed(id, "job timed out without reaching a terminal state")
                .await?
            {
                self.append_log(
                    id,
                    &NewLogEntry::new(
                        LogLevel::Warn,
                        LogPhase::Background,
                        "reconciled stale job to failed",
                    ),
                )
                .await?;
                failed += 1;
            }
        }
        Ok(failed)
    }
}

const JOB_COLUMNS: &str =
    "id, source_slug, target_slug, status, result_slug, error_message, created_at, started_at, finished_at";

fn job_from_row(row: &SqliteRow) -> Result<Job> {
    let status: String = row.get("status");
    Ok(Job {
        id: row.get("id"),
        source_slug: row.get("source_slug"),
        target_slug: row.get("target_slug"),
        status: status.parse()?,
        result_slug: row.get("result_slug"),
        error_message: row.get("error_message"),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
    })
}
