//! Progress Streaming
//!
//! The executor pushes typed events into a [`ProgressSender`]; every
//! subscribed [`ProgressStream`] receives its own copy, so an HTTP response and
//! a durable progress log drain the same run independently. The sequence is
//! finite: streams end once the last sender handle is dropped.
//!
//! Server-sent event framing and the reconnect path ([`follow_job`]) live here
//! as well.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::storage::JobStore;
use crate::types::{JobId, JobStatus, ProgressEvent};

// =============================================================================
// Channel
// =============================================================================

/// Producer side of a progress channel
#[derive(Clone, Default)]
pub struct ProgressSender {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<ProgressEvent>>>>,
}

impl ProgressSender {
    /// Add an independent consumer; it sees only events sent after this call
    pub fn subscribe(&self) -> ProgressStream {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        ProgressStream { rx }
    }

    /// Deliver `event` to every live consumer
    ///
    /// A consumer that went away is dropped silently; the run continues.
    pub fn send(&self, event: ProgressEvent) {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            return;
        };
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of consumers still listening
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

/// Consumer side of a progress channel
pub struct ProgressStream {
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
}

impl ProgressStream {
    /// Next event, or `None` once the run is over
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }
}

impl Stream for ProgressStream {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// A sender with one consumer already attached
pub fn progress_channel() -> (ProgressSender, ProgressStream) {
    let sender = ProgressSender::default();
    let stream = sender.subscribe();
    (sender, stream)
}

// =============================================================================
// SSE framing
// =============================================================================

fn frame<T: Serialize>(payload: &T) -> String {
    let body = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string());
    format!("data: {}\n\n", body)
}

/// `data: {"type": ..., "data": ...}\n\n`
pub fn sse_frame(event: &ProgressEvent) -> String {
    frame(event)
}

/// Opening frame announcing the job being streamed
pub fn start_frame(job_id: &JobId) -> String {
    frame(&json!({"type": "start", "jobId": job_id}))
}

/// Closing frame carrying the job's terminal state
pub fn done_frame(status: JobStatus, error: Option<&str>) -> String {
    frame(&json!({"type": "done", "data": {"status": status, "error": error}}))
}

// =============================================================================
// Following a durable job
// =============================================================================

/// Item produced while following a job's durable log
#[derive(Debug, Clone, PartialEq)]
pub enum FollowEvent {
    /// A recorded progress event, in log order
    Progress(ProgressEvent),
    /// The job reached a terminal state
    Finished {
        status: JobStatus,
        error: Option<String>,
    },
    /// The job does not exist (never created, or purged)
    Missing,
}

impl FollowEvent {
    pub fn to_frame(&self) -> String {
        match self {
            Self::Progress(event) => sse_frame(event),
            Self::Finished { status, error } => done_frame(*status, error.as_deref()),
            Self::Missing => frame(&json!({
                "type": "error",
                "data": {"message": "Job not found or expired."}
            })),
        }
    }
}

struct FollowState {
    store: JobStore,
    id: JobId,
    offset: usize,
    interval: Duration,
    pending: VecDeque<FollowEvent>,
    finished: bool,
    polled: bool,
}

impl FollowState {
    /// Read status first, then the log, so a terminal status never hides
    /// events appended before it
    fn poll_store(&mut self) {
        let status = match self.store.status(&self.id) {
            Ok(status) => status,
            Err(e) => {
                debug!(job_id = %self.id, error = %e, "Job not readable while following");
                self.finished = true;
                self.pending.push_back(FollowEvent::Missing);
                return;
            }
        };

        match self.store.progress_since(&self.id, self.offset) {
            Ok(events) => {
                self.offset += events.len();
                self.pending.extend(
                    events
                        .into_iter()
                        .filter(|e| *e != ProgressEvent::Done)
                        .map(FollowEvent::Progress),
                );
            }
            Err(e) => warn!(job_id = %self.id, error = %e, "Failed to read progress log"),
        }

        if status.is_terminal() {
            self.finished = true;
            let error = self.store.get(&self.id).ok().and_then(|job| job.error);
            self.pending.push_back(FollowEvent::Finished { status, error });
        }
    }
}

/// Replay a job's progress log from the start, then tail it until the job is
/// terminal
///
/// Reading causes no side effects, so any number of clients may follow the
/// same job. The stream ends with [`FollowEvent::Finished`] (or
/// [`FollowEvent::Missing`]).
pub fn follow_job(
    store: JobStore,
    id: JobId,
    interval: Duration,
) -> impl Stream<Item = FollowEvent> + Send {
    let state = FollowState {
        store,
        id,
        offset: 0,
        interval,
        pending: VecDeque::new(),
        finished: false,
        polled: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((event, state));
            }
            if state.finished {
                return None;
            }
            if state.polled {
                tokio::time::sleep(state.interval).await;
            }
            state.polled = true;
            state.poll_store();
        }
    })
}
