//! Durable job records
//!
//! Status transitions are single conditional `UPDATE`s so a duplicate trigger
//! can never move a job twice. The progress log is append-only: one `INSERT`
//! per event, read back in `seq` order.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{OptionalExtension, params};
use tracing::{debug, info};

use super::database::SharedDatabase;
use crate::types::{
    ChaplinError, ChaplinSnapshot, Job, JobId, JobStatus, ProgressEvent, Result, ResultExt,
};

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context_fn(|| format!("Invalid timestamp '{}'", raw))
}

/// Job row without its progress log
type JobRow = (String, String, String, Option<String>, String, String);

/// Lightweight listing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub id: JobId,
    pub status: JobStatus,
    pub error: Option<String>,
    pub created_at: String,
}

/// SQLite-backed job store
#[derive(Clone)]
pub struct JobStore {
    db: SharedDatabase,
}

impl JobStore {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }

    /// Create a queued job with a fresh id
    pub fn create(&self, input: &str, snapshot: &ChaplinSnapshot) -> Result<Job> {
        let id = JobId::generate();
        let now = Utc::now();
        let data = serde_json::to_string(snapshot)?;

        self.db
            .connection()?
            .execute(
                "INSERT INTO jobs (id, status, input, chaplin_data, error, created_at, updated_at)
                 VALUES (?1, 'queued', ?2, ?3, NULL, ?4, ?4)",
                params![id.as_str(), input, data, timestamp(now)],
            )
            .with_context("Failed to create job")?;

        info!(job_id = %id, "Job created");

        Ok(Job {
            id,
            status: JobStatus::Queued,
            input: input.to_string(),
            chaplin_data: snapshot.clone(),
            progress: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn load_row(&self, id: &JobId) -> Result<JobRow> {
        self.db
            .connection()?
            .query_row(
                "SELECT status, input, chaplin_data, error, created_at, updated_at
                 FROM jobs WHERE id = ?1",
                params![id.as_str()],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                    ))
                },
            )
            .optional()
            .with_context("Failed to load job")?
            .ok_or_else(|| ChaplinError::NotFound(format!("job {}", id)))
    }

    /// Full record including the progress log
    pub fn get(&self, id: &JobId) -> Result<Job> {
        let (status, input, data, error, created_at, updated_at) = self.load_row(id)?;
        Ok(Job {
            id: id.clone(),
            status: status.parse().map_err(ChaplinError::Storage)?,
            input,
            chaplin_data: serde_json::from_str(&data)?,
            progress: self.progress_since(id, 0)?,
            error,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
        })
    }

    /// Current status only
    pub fn status(&self, id: &JobId) -> Result<JobStatus> {
        let status: Option<String> = self
            .db
            .connection()?
            .query_row(
                "SELECT status FROM jobs WHERE id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()
            .with_context("Failed to read job status")?;

        status
            .ok_or_else(|| ChaplinError::NotFound(format!("job {}", id)))?
            .parse()
            .map_err(ChaplinError::Storage)
    }

    /// Atomically move a queued job to running
    ///
    /// Returns `false` when the job exists but is not queued.
    pub fn try_claim(&self, id: &JobId) -> Result<bool> {
        let changed = self
            .db
            .connection()?
            .execute(
                "UPDATE jobs SET status = 'running', updated_at = ?2
                 WHERE id = ?1 AND status = 'queued'",
                params![id.as_str(), timestamp(Utc::now())],
            )
            .with_context("Failed to claim job")?;

        if changed == 0 {
            // Distinguish "not queued" from "missing"
            self.status(id)?;
            debug!(job_id = %id, "Claim lost: job not queued");
            return Ok(false);
        }
        Ok(true)
    }

    /// Append one event to the progress log; returns its sequence number
    pub fn append_progress(&self, id: &JobId, event: &ProgressEvent) -> Result<i64> {
        let payload = serde_json::to_string(event)?;
        let conn = self.db.connection()?;
        conn.execute(
            "INSERT INTO job_progress (job_id, event, created_at) VALUES (?1, ?2, ?3)",
            params![id.as_str(), payload, timestamp(Utc::now())],
        )
        .with_context_fn(|| format!("Failed to append progress for job {}", id))?;
        Ok(conn.last_insert_rowid())
    }

    /// Progress events after the first `offset`, in execution order
    pub fn progress_since(&self, id: &JobId, offset: usize) -> Result<Vec<ProgressEvent>> {
        let conn = self.db.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT event FROM job_progress WHERE job_id = ?1
                 ORDER BY seq LIMIT -1 OFFSET ?2",
            )
            .with_context("Failed to prepare progress query")?;

        let rows = stmt
            .query_map(params![id.as_str(), offset as i64], |row| {
                row.get::<_, String>(0)
            })
            .with_context("Failed to read progress")?;

        let mut events = Vec::new();
        for row in rows {
            let raw = row.with_context("Failed to read progress row")?;
            events.push(serde_json::from_str(&raw)?);
        }
        Ok(events)
    }

    /// running -> done
    pub fn mark_done(&self, id: &JobId) -> Result<()> {
        let changed = self
            .db
            .connection()?
            .execute(
                "UPDATE jobs SET status = 'done', error = NULL, updated_at = ?2
                 WHERE id = ?1 AND status = 'running'",
                params![id.as_str(), timestamp(Utc::now())],
            )
            .with_context("Failed to mark job done")?;

        if changed == 0 {
            let status = self.status(id)?;
            return Err(ChaplinError::Conflict(format!(
                "job {} is {}, expected running",
                id, status
            )));
        }
        info!(job_id = %id, "Job done");
        Ok(())
    }

    /// queued | running -> failed, storing the error message
    pub fn mark_failed(&self, id: &JobId, error: &str) -> Result<()> {
        let changed = self
            .db
            .connection()?
            .execute(
                "UPDATE jobs SET status = 'failed', error = ?2, updated_at = ?3
                 WHERE id = ?1 AND status IN ('queued', 'running')",
                params![id.as_str(), error, timestamp(Utc::now())],
            )
            .with_context("Failed to mark job failed")?;

        if changed == 0 {
            let status = self.status(id)?;
            return Err(ChaplinError::Conflict(format!(
                "job {} is {}, cannot fail",
                id, status
            )));
        }
        Ok(())
    }

    /// failed -> queued, clearing the stored error
    pub fn reset_for_retry(&self, id: &JobId) -> Result<()> {
        let changed = self
            .db
            .connection()?
            .execute(
                "UPDATE jobs SET status = 'queued', error = NULL, updated_at = ?2
                 WHERE id = ?1 AND status = 'failed'",
                params![id.as_str(), timestamp(Utc::now())],
            )
            .with_context("Failed to reset job")?;

        if changed == 0 {
            let status = self.status(id)?;
            return Err(ChaplinError::Conflict(format!(
                "job {} is {}; only failed jobs can be retried",
                id, status
            )));
        }
        info!(job_id = %id, "Job reset for retry");
        Ok(())
    }

    /// Delete jobs created more than `ttl` ago; returns how many were removed
    pub fn purge_expired(&self, ttl: Duration) -> Result<usize> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| ChaplinError::Config(format!("Invalid TTL: {}", e)))?;
        let cutoff = timestamp(Utc::now() - ttl);

        let removed = self.db.transaction(|conn| {
            conn.execute(
                "DELETE FROM job_progress WHERE job_id IN
                 (SELECT id FROM jobs WHERE created_at < ?1)",
                params![cutoff],
            )?;
            Ok(conn.execute("DELETE FROM jobs WHERE created_at < ?1", params![cutoff])?)
        })?;

        if removed > 0 {
            info!(removed, "Purged expired jobs");
        }
        Ok(removed)
    }

    /// Most recent jobs first
    pub fn list_recent(&self, limit: usize) -> Result<Vec<JobSummary>> {
        let conn = self.db.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, status, error, created_at FROM jobs
                 ORDER BY created_at DESC LIMIT ?1",
            )
            .with_context("Failed to prepare job listing")?;

        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .with_context("Failed to list jobs")?;

        let mut jobs = Vec::new();
        for row in rows {
            let (id, status, error, created_at) = row.with_context("Failed to read job row")?;
            jobs.push(JobSummary {
                id: JobId::new(id),
                status: status.parse().map_err(ChaplinError::Storage)?,
                error,
                created_at,
            });
        }
        Ok(jobs)
    }
}
