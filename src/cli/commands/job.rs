//! Job Command
//!
//! Durable asynchronous runs.
//!
//! Usage:
//!   chaplin job submit --request <file> [--wait] [--sse]
//!   chaplin job status <id> [--json]
//!   chaplin job replay <id> [--sse]
//!   chaplin job retry <id> [--wait] [--sse]
//!   chaplin job process --signature <jwt> <body.json>
//!   chaplin job list [--limit N]
//!   chaplin job purge [--ttl-secs N]
//!
//! Without `queue.destination` jobs run on an in-process worker, so `submit`
//! and `retry` always wait for the job to finish before exiting.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Deserialize;

use crate::cli::progress::ConsoleRenderer;
use crate::cli::ui::Output;
use crate::cli::util::{CommandContext, print_json, read_json};
use crate::constants::jobs;
use crate::engine::{FollowEvent, follow_job, start_frame};
use crate::jobs::{JobManager, WorkerHandle};
use crate::types::{ChaplinError, ChaplinSnapshot, JobId, JobStatus, Result};

/// Submit file: the user input plus the persona snapshot to run
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest {
    input: String,
    chaplin_data: ChaplinSnapshot,
}

/// How a followed job is shown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowMode {
    /// Print nothing until the job ends
    Silent,
    Console,
    Sse,
}

pub async fn submit(ctx: &CommandContext, request_path: &Path, follow: FollowMode) -> Result<()> {
    let request: SubmitRequest = read_json(request_path)?;
    let (manager, worker) = ctx.job_manager()?;
    let output = Output::new();

    let job = manager.submit(&request.input, &request.chaplin_data).await?;
    if follow != FollowMode::Sse {
        output.success(&format!("Submitted job {}", job.id));
    }

    finish(&manager, worker, &job.id, follow).await
}

pub async fn retry(ctx: &CommandContext, id: &str, follow: FollowMode) -> Result<()> {
    let id = JobId::new(id);
    let (manager, worker) = ctx.job_manager()?;

    manager.retry(&id).await?;
    if follow != FollowMode::Sse {
        Output::new().success(&format!("Requeued job {}", id));
    }

    finish(&manager, worker, &id, follow).await
}

/// Follow when asked to, or when the job runs in this process and must
/// finish before exit
async fn finish(
    manager: &Arc<JobManager>,
    worker: Option<WorkerHandle>,
    id: &JobId,
    follow: FollowMode,
) -> Result<()> {
    let Some(worker) = worker else {
        if follow != FollowMode::Silent {
            watch(manager, id, follow).await?;
        }
        return Ok(());
    };

    let status = watch(manager, id, follow).await?;
    worker
        .drain(Duration::from_secs(jobs::DRAIN_GRACE_SECS))
        .await?;

    if follow == FollowMode::Silent {
        let job = manager.get(id)?;
        let output = Output::new();
        match (status, job.error) {
            (Some(JobStatus::Failed), Some(error)) => output.error(&format!("Job failed: {}", error)),
            (Some(status), _) => output.info(&format!("Job {}", status)),
            (None, _) => output.warning("Job disappeared before finishing"),
        }
    }
    Ok(())
}

/// Print a job's progress until it is terminal; `None` if it vanished
async fn watch(
    manager: &JobManager,
    id: &JobId,
    mode: FollowMode,
) -> Result<Option<JobStatus>> {
    let total = manager
        .get(id)
        .map(|job| job.chaplin_data.workgroup.len())
        .unwrap_or(0);
    let mut renderer = ConsoleRenderer::new(total);
    let output = Output::new();
    let mut events = Box::pin(manager.follow(id));
    let mut terminal = None;

    if mode == FollowMode::Sse {
        print!("{}", start_frame(id));
    }

    while let Some(event) = events.next().await {
        match mode {
            FollowMode::Silent => {}
            FollowMode::Console => output.progress(&renderer.render_follow(&event)),
            FollowMode::Sse => print!("{}", event.to_frame()),
        }
        if let FollowEvent::Finished { status, .. } = event {
            terminal = Some(status);
        }
    }
    Ok(terminal)
}

pub fn status(ctx: &CommandContext, id: &str, as_json: bool) -> Result<()> {
    let job = ctx.open_store()?.get(&JobId::new(id))?;

    if as_json {
        return print_json(&job);
    }

    let output = Output::new();
    output.header(&format!("Job {}", job.id));
    output.field("Status", job.status.as_str());
    output.field("Agents", &job.chaplin_data.workgroup.len().to_string());
    output.field("Events", &job.progress.len().to_string());
    output.field("Created", &job.created_at.to_rfc3339());
    output.field("Updated", &job.updated_at.to_rfc3339());
    if let Some(error) = &job.error {
        output.field("Error", error);
    }
    Ok(())
}

/// Replay a job's recorded progress, tailing it if still running
pub async fn replay(ctx: &CommandContext, id: &str, sse: bool) -> Result<()> {
    let store = ctx.open_store()?;
    let id = JobId::new(id);
    let total = store
        .get(&id)
        .map(|job| job.chaplin_data.workgroup.len())
        .unwrap_or(0);

    if sse {
        print!("{}", start_frame(&id));
    }

    let mut renderer = ConsoleRenderer::new(total);
    let output = Output::new();
    let mut events = Box::pin(follow_job(
        store,
        id,
        Duration::from_millis(jobs::FOLLOW_INTERVAL_MS),
    ));
    while let Some(event) = events.next().await {
        if sse {
            print!("{}", event.to_frame());
        } else {
            output.progress(&renderer.render_follow(&event));
        }
    }
    Ok(())
}

/// Handle a trigger delivered by the queue: signature header value plus the
/// raw body file
pub async fn process(ctx: &CommandContext, signature: &str, body_path: &Path) -> Result<()> {
    let body = std::fs::read(body_path).map_err(|e| {
        ChaplinError::validation(format!("Cannot read '{}': {}", body_path.display(), e))
    })?;
    let (manager, worker) = ctx.job_manager()?;

    let outcome = manager.process_trigger(signature, &body).await;
    if let Some(worker) = worker {
        worker
            .drain(Duration::from_secs(jobs::DRAIN_GRACE_SECS))
            .await?;
    }

    let outcome = outcome?;
    print_json(&serde_json::json!({
        "jobId": outcome.job_id(),
        "status": outcome.status(),
    }))
}

pub fn list(ctx: &CommandContext, limit: Option<usize>) -> Result<()> {
    let recent = ctx
        .open_store()?
        .list_recent(limit.unwrap_or(jobs::LIST_LIMIT))?;
    let output = Output::new();

    if recent.is_empty() {
        output.info("No jobs");
        return Ok(());
    }

    output.section("Recent jobs");
    for job in recent {
        let mut line = format!("{}  {:<8} {}", job.id, job.status.as_str(), job.created_at);
        if let Some(error) = job.error {
            line.push_str(&format!("  {}", error));
        }
        println!("{}", line);
    }
    Ok(())
}

pub fn purge(ctx: &CommandContext, ttl_secs: Option<u64>) -> Result<()> {
    let ttl = Duration::from_secs(ttl_secs.unwrap_or(ctx.config.storage.job_ttl_secs));
    let removed = ctx.open_store()?.purge_expired(ttl)?;
    Output::new().success(&format!("Purged {} job(s) older than {}s", removed, ttl.as_secs()));
    Ok(())
}
