//! Job Lifecycle Manager
//!
//! ```text
//! queued ──claim──> running ──> done
//!    ^                 └──────> failed
//!    └──── retry ─────────────────┘
//! ```
//!
//! Only a queued job is ever processed. The claim is one conditional update,
//! so duplicate triggers resolve to a single run.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tracing::{error, info, instrument, warn};

use super::queue::SharedPublisher;
use super::signature::SignatureVerifier;
use crate::constants::jobs;
use crate::engine::{FollowEvent, WorkgroupRunner, follow_job, progress_channel};
use crate::storage::JobStore;
use crate::types::{
    ChaplinError, ChaplinSnapshot, Job, JobId, JobStatus, Result, RunRequest, TriggerPayload,
};

/// What a processing trigger did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// The job was claimed and driven to a terminal status
    Processed { job_id: JobId, status: JobStatus },
    /// The job was not queued; nothing changed
    Skipped { job_id: JobId, status: JobStatus },
}

impl TriggerOutcome {
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Processed { job_id, .. } | Self::Skipped { job_id, .. } => job_id,
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            Self::Processed { status, .. } | Self::Skipped { status, .. } => *status,
        }
    }
}

pub struct JobManager {
    store: JobStore,
    runner: WorkgroupRunner,
    publisher: SharedPublisher,
    verifier: SignatureVerifier,
    follow_interval: Duration,
}

impl JobManager {
    pub fn new(
        store: JobStore,
        runner: WorkgroupRunner,
        publisher: SharedPublisher,
        verifier: SignatureVerifier,
    ) -> Self {
        Self {
            store,
            runner,
            publisher,
            verifier,
            follow_interval: Duration::from_millis(jobs::FOLLOW_INTERVAL_MS),
        }
    }

    pub fn with_follow_interval(mut self, interval: Duration) -> Self {
        self.follow_interval = interval;
        self
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Create a queued job and publish its processing trigger
    ///
    /// A job whose trigger cannot be published is marked failed so it can be
    /// retried later.
    #[instrument(skip_all)]
    pub async fn submit(&self, input: &str, snapshot: &ChaplinSnapshot) -> Result<Job> {
        RunRequest::from_snapshot(input, snapshot).validate()?;

        let job = self.store.create(input, snapshot)?;
        if let Err(e) = self.publish(&job.id).await {
            let message = format!("Failed to enqueue job: {}", e);
            self.store.mark_failed(&job.id, &message)?;
            return Err(e);
        }
        Ok(job)
    }

    async fn publish(&self, id: &JobId) -> Result<()> {
        let payload = TriggerPayload { job_id: id.clone() };
        self.publisher.publish(&payload).await?;
        info!(job_id = %id, publisher = self.publisher.name(), "Trigger published");
        Ok(())
    }

    /// Handle a processing trigger
    ///
    /// The signature is checked against the raw body before anything else;
    /// a rejected trigger leaves every job untouched.
    #[instrument(skip_all)]
    pub async fn process_trigger(&self, signature: &str, raw_body: &[u8]) -> Result<TriggerOutcome> {
        self.verifier.verify(signature, raw_body)?;

        let payload: TriggerPayload = serde_json::from_slice(raw_body)
            .map_err(|e| ChaplinError::validation(format!("invalid trigger payload: {}", e)))?;
        if payload.job_id.as_str().trim().is_empty() {
            return Err(ChaplinError::validation("Missing jobId"));
        }

        self.process(&payload.job_id).await
    }

    /// Claim and drive one job; a job that is not queued is skipped
    #[instrument(skip(self), fields(job_id = %id))]
    pub async fn process(&self, id: &JobId) -> Result<TriggerOutcome> {
        if !self.store.try_claim(id)? {
            let status = self.store.status(id)?;
            warn!(%status, "Job already processed or in progress, ignoring trigger");
            return Ok(TriggerOutcome::Skipped {
                job_id: id.clone(),
                status,
            });
        }

        info!("Processing job");
        let recorded = match self.drive(id).await {
            Ok(()) => self.store.mark_done(id).map(|_| JobStatus::Done),
            Err(e) => {
                error!(error = %e, "Job failed");
                self.store
                    .mark_failed(id, &e.to_string())
                    .map(|_| JobStatus::Failed)
            }
        };

        // A claimed job must never stay running
        let status = match recorded {
            Ok(status) => status,
            Err(e) => {
                error!(error = %e, "Failed to record job outcome");
                self.store
                    .mark_failed(id, &format!("Failed to record job outcome: {}", e))?;
                JobStatus::Failed
            }
        };

        Ok(TriggerOutcome::Processed {
            job_id: id.clone(),
            status,
        })
    }

    /// Run the job's snapshot, spooling every event into the progress log
    async fn drive(&self, id: &JobId) -> Result<()> {
        let job = self.store.get(id)?;
        let request = RunRequest::from_snapshot(job.input, &job.chaplin_data);

        let (sender, mut log) = progress_channel();
        let runner = self.runner.clone();
        let run = tokio::spawn(async move { runner.run_with_progress(&request, &sender).await });

        while let Some(event) = log.recv().await {
            if let Err(e) = self.store.append_progress(id, &event) {
                warn!(error = %e, event = event.type_name(), "Failed to record progress");
            }
        }

        match run.await {
            Ok(result) => result.map(|_| ()),
            Err(e) => Err(ChaplinError::Queue(format!("job task aborted: {}", e))),
        }
    }

    /// failed -> queued, then publish a fresh trigger
    #[instrument(skip(self), fields(job_id = %id))]
    pub async fn retry(&self, id: &JobId) -> Result<()> {
        self.store.reset_for_retry(id)?;
        self.publish(id).await
    }

    pub fn get(&self, id: &JobId) -> Result<Job> {
        self.store.get(id)
    }

    /// Replay then tail a job's progress (reconnect path)
    pub fn follow(&self, id: &JobId) -> impl Stream<Item = FollowEvent> + Send + use<> {
        follow_job(self.store.clone(), id.clone(), self.follow_interval)
    }

    /// Delete jobs older than `ttl`
    pub fn purge(&self, ttl: Duration) -> Result<usize> {
        self.store.purge_expired(ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::provider::scripted::{ScriptedProvider, single_chain};
    use crate::config::EngineConfig;
    use crate::jobs::queue::{TriggerPublisher, local_queue};
    use crate::jobs::signature::sign_trigger;
    use crate::storage::{Database, SharedDatabase};
    use crate::types::{Agent, ErrorKind, ProgressEvent, ResponseFormat, Workgroup};
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::sync::Mutex;

    const KEY: &str = "signing-key";

    /// Records payloads instead of delivering them
    #[derive(Default)]
    struct RecordingPublisher {
        sent: Mutex<Vec<JobId>>,
    }

    #[async_trait]
    impl TriggerPublisher for RecordingPublisher {
        async fn publish(&self, payload: &TriggerPayload) -> Result<()> {
            self.sent.lock().unwrap().push(payload.job_id.clone());
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn snapshot() -> ChaplinSnapshot {
        ChaplinSnapshot {
            description: "A poet".into(),
            instructions: "Be brief".into(),
            workgroup: Workgroup::new(vec![Agent::new("Poet", "Write a haiku.")]),
            responseformat: ResponseFormat::new().with_field("poem", "The haiku"),
        }
    }

    fn database() -> SharedDatabase {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        Arc::new(db)
    }

    fn manager(provider: &Arc<ScriptedProvider>, publisher: SharedPublisher) -> JobManager {
        manager_on(database(), provider, publisher)
    }

    fn manager_on(
        db: SharedDatabase,
        provider: &Arc<ScriptedProvider>,
        publisher: SharedPublisher,
    ) -> JobManager {
        let store = JobStore::new(db);
        let config = EngineConfig {
            retry_delay_ms: 1,
            ..EngineConfig::default()
        };
        let runner = WorkgroupRunner::from_config(single_chain(provider.clone()), &config);
        JobManager::new(store, runner, publisher, SignatureVerifier::new(KEY, None))
            .with_follow_interval(Duration::from_millis(5))
    }

    fn trigger(id: &JobId) -> (String, Vec<u8>) {
        let body = serde_json::to_vec(&TriggerPayload { job_id: id.clone() }).unwrap();
        let signature = sign_trigger(KEY, "test", &body, Duration::from_secs(60)).unwrap();
        (signature, body)
    }

    #[tokio::test]
    async fn test_duplicate_trigger_runs_once() {
        let provider = Arc::new(
            ScriptedProvider::new("p")
                .then_ok("old pond")
                .then_ok(r#"{"poem": "old pond"}"#),
        );
        let publisher = Arc::new(RecordingPublisher::default());
        let manager = manager(&provider, publisher.clone());

        let job = manager.submit("frogs", &snapshot()).await.unwrap();
        assert_eq!(publisher.sent.lock().unwrap().as_slice(), &[job.id.clone()]);

        let (signature, body) = trigger(&job.id);
        let first = manager.process_trigger(&signature, &body).await.unwrap();
        let second = manager.process_trigger(&signature, &body).await.unwrap();

        assert_eq!(
            first,
            TriggerOutcome::Processed {
                job_id: job.id.clone(),
                status: JobStatus::Done
            }
        );
        assert!(matches!(second, TriggerOutcome::Skipped { status: JobStatus::Done, .. }));
        assert_eq!(provider.calls(), 2);

        let stored = manager.get(&job.id).unwrap();
        let types: Vec<_> = stored.progress.iter().map(|e| e.type_name()).collect();
        assert_eq!(
            types,
            vec![
                "agent_start",
                "agent_attempt",
                "agent_result",
                "integrator_start",
                "integrator_result",
                "done"
            ]
        );
    }

    #[tokio::test]
    async fn test_bad_signature_leaves_job_queued() {
        let provider = Arc::new(ScriptedProvider::new("p").always("x"));
        let manager = manager(&provider, Arc::new(RecordingPublisher::default()));
        let job = manager.submit("frogs", &snapshot()).await.unwrap();

        let body = serde_json::to_vec(&TriggerPayload { job_id: job.id.clone() }).unwrap();
        let forged = sign_trigger("wrong-key", "test", &body, Duration::from_secs(60)).unwrap();

        let err = manager.process_trigger(&forged, &body).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Signature);
        assert_eq!(manager.store().status(&job.id).unwrap(), JobStatus::Queued);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_then_retry() {
        let provider = Arc::new(
            ScriptedProvider::new("p")
                .then_err("down")
                .then_err("down")
                .then_err("down")
                .then_ok("old pond")
                .then_ok(r#"{"poem": "old pond"}"#),
        );
        let publisher = Arc::new(RecordingPublisher::default());
        let manager = manager(&provider, publisher.clone());
        let job = manager.submit("frogs", &snapshot()).await.unwrap();

        let outcome = manager.process(&job.id).await.unwrap();
        assert_eq!(outcome.status(), JobStatus::Failed);
        let failed = manager.get(&job.id).unwrap();
        assert!(failed.error.unwrap().contains("Poet"));

        // done and running jobs cannot be retried; failed ones can
        manager.retry(&job.id).await.unwrap();
        assert_eq!(publisher.sent.lock().unwrap().len(), 2);
        let retried = manager.get(&job.id).unwrap();
        assert_eq!(retried.status, JobStatus::Queued);
        assert!(retried.error.is_none());

        let outcome = manager.process(&job.id).await.unwrap();
        assert_eq!(outcome.status(), JobStatus::Done);
        let err = manager.retry(&job.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_invalid_snapshot_rejected_on_submit() {
        let provider = Arc::new(ScriptedProvider::new("p").always("x"));
        let publisher = Arc::new(RecordingPublisher::default());
        let manager = manager(&provider, publisher.clone());

        let empty = ChaplinSnapshot::default();
        let err = manager.submit("frogs", &empty).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(publisher.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_worker_end_to_end() {
        let provider = Arc::new(
            ScriptedProvider::new("p")
                .then_ok("old pond")
                .then_ok(r#"{"poem": "old pond"}"#),
        );
        let (publisher, worker) = local_queue(KEY, Duration::from_secs(60));
        let manager = Arc::new(manager(&provider, Arc::new(publisher)));
        let handle = worker.spawn(manager.clone());

        let job = manager.submit("frogs", &snapshot()).await.unwrap();
        let events: Vec<FollowEvent> = manager.follow(&job.id).collect().await;

        assert_eq!(
            events.last(),
            Some(&FollowEvent::Finished {
                status: JobStatus::Done,
                error: None
            })
        );
        assert!(events.iter().any(|e| matches!(
            e,
            FollowEvent::Progress(ProgressEvent::IntegratorResult { .. })
        )));

        let delivered = handle.drain(Duration::from_secs(5)).await.unwrap();
        assert_eq!(delivered, 1);
    }

    #[tokio::test]
    async fn test_unrecordable_success_falls_back_to_failed() {
        let provider = Arc::new(
            ScriptedProvider::new("p")
                .then_ok("old pond")
                .then_ok(r#"{"poem": "old pond"}"#),
        );
        let db = database();
        db.execute(
            "CREATE TRIGGER refuse_done BEFORE UPDATE OF status ON jobs
             WHEN NEW.status = 'done'
             BEGIN SELECT RAISE(ABORT, 'disk full'); END",
            &[],
        )
        .unwrap();
        let manager = manager_on(db, &provider, Arc::new(RecordingPublisher::default()));
        let job = manager.submit("frogs", &snapshot()).await.unwrap();

        let outcome = manager.process(&job.id).await.unwrap();
        assert_eq!(outcome.status(), JobStatus::Failed);

        let stored = manager.get(&job.id).unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.error.unwrap().contains("Failed to record job outcome"));

        // still recoverable through the normal retry path
        manager.retry(&job.id).await.unwrap();
        assert_eq!(manager.store().status(&job.id).unwrap(), JobStatus::Queued);
    }

    #[tokio::test]
    async fn test_local_worker_counts_deliveries_while_running() {
        let provider = Arc::new(
            ScriptedProvider::new("p")
                .then_ok("old pond")
                .then_ok(r#"{"poem": "old pond"}"#)
                .then_ok("new pond")
                .then_ok(r#"{"poem": "new pond"}"#),
        );
        let (publisher, worker) = local_queue(KEY, Duration::from_secs(60));
        let manager = Arc::new(manager(&provider, Arc::new(publisher)));
        let handle = worker.spawn(manager.clone());

        for input in ["frogs", "toads"] {
            let job = manager.submit(input, &snapshot()).await.unwrap();
            let events: Vec<FollowEvent> = manager.follow(&job.id).collect().await;
            assert!(matches!(
                events.last(),
                Some(FollowEvent::Finished {
                    status: JobStatus::Done,
                    ..
                })
            ));
        }

        let delivered = handle.drain(Duration::from_secs(5)).await.unwrap();
        assert_eq!(delivered, 2);
        assert_eq!(provider.calls(), 4);
    }
}
