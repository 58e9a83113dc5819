//! Trigger delivery
//!
//! A [`TriggerPublisher`] hands a signed `{jobId}` message to whatever will
//! eventually call [`JobManager::process_trigger`]. Delivery is at-least-once;
//! the manager's claim makes duplicates harmless.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use super::lifecycle::{JobManager, TriggerOutcome};
use super::signature::sign_trigger;
use crate::ai::timeout::with_timeout_map;
use crate::config::{QueueConfig, SigningConfig};
use crate::constants::network;
use crate::types::{ChaplinError, Result, TriggerPayload};

#[async_trait]
pub trait TriggerPublisher: Send + Sync {
    /// Queue a processing trigger for `payload.job_id`
    async fn publish(&self, payload: &TriggerPayload) -> Result<()>;

    fn name(&self) -> &str;
}

pub type SharedPublisher = Arc<dyn TriggerPublisher>;

// =============================================================================
// In-process queue
// =============================================================================

/// A trigger as it arrives at the worker: signature header plus raw body
#[derive(Debug, Clone)]
pub struct Delivery {
    pub signature: String,
    pub body: Vec<u8>,
}

/// Publishes into an in-process channel drained by a [`LocalWorker`]
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<Delivery>,
    key: SecretString,
    ttl: Duration,
}

/// Publisher/worker pair sharing one signing key
pub fn local_queue(key: impl Into<String>, ttl: Duration) -> (ChannelPublisher, LocalWorker) {
    let (tx, rx) = mpsc::unbounded_channel();
    let publisher = ChannelPublisher {
        tx,
        key: SecretString::from(key.into()),
        ttl,
    };
    (publisher, LocalWorker { rx })
}

/// Local queue signing with the configured key, or a throwaway key when none
/// is set
///
/// Returns the key so the verifier can be built from the same secret.
pub fn local_queue_from_config(signing: &SigningConfig) -> (ChannelPublisher, LocalWorker, String) {
    let key = signing
        .current_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
    let (publisher, worker) =
        local_queue(key.clone(), Duration::from_secs(signing.signature_ttl_secs));
    (publisher, worker, key)
}

#[async_trait]
impl TriggerPublisher for ChannelPublisher {
    async fn publish(&self, payload: &TriggerPayload) -> Result<()> {
        let body = serde_json::to_vec(payload)?;
        let signature = sign_trigger(self.key.expose_secret(), "local", &body, self.ttl)?;
        self.tx
            .send(Delivery { signature, body })
            .map_err(|_| ChaplinError::Queue("local worker is not running".to_string()))?;
        debug!(job_id = %payload.job_id, "Trigger queued locally");
        Ok(())
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// Consumer side of [`local_queue`]
pub struct LocalWorker {
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl LocalWorker {
    /// Start delivering triggers, each on its own task
    pub fn spawn(self, manager: Arc<JobManager>) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(self.run(manager, shutdown_rx));
        WorkerHandle {
            shutdown: shutdown_tx,
            handle,
        }
    }

    async fn run(mut self, manager: Arc<JobManager>, mut shutdown: oneshot::Receiver<()>) -> usize {
        let mut tasks = JoinSet::new();
        let mut delivered = 0;

        loop {
            tokio::select! {
                delivery = self.rx.recv() => match delivery {
                    Some(delivery) => {
                        tasks.spawn(deliver(manager.clone(), delivery));
                    }
                    None => break,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    delivered += tally(joined);
                }
                _ = &mut shutdown => break,
            }
        }

        // Triggers published before shutdown are still delivered
        while let Ok(delivery) = self.rx.try_recv() {
            tasks.spawn(deliver(manager.clone(), delivery));
        }

        while let Some(joined) = tasks.join_next().await {
            delivered += tally(joined);
        }
        info!(delivered, "Local worker stopped");
        delivered
    }
}

fn tally(joined: std::result::Result<bool, tokio::task::JoinError>) -> usize {
    match joined {
        Ok(true) => 1,
        Ok(false) => 0,
        Err(e) => {
            warn!(error = %e, "Trigger task panicked");
            0
        }
    }
}

async fn deliver(manager: Arc<JobManager>, delivery: Delivery) -> bool {
    match manager
        .process_trigger(&delivery.signature, &delivery.body)
        .await
    {
        Ok(TriggerOutcome::Processed { job_id, status }) => {
            debug!(%job_id, %status, "Trigger processed");
            true
        }
        Ok(TriggerOutcome::Skipped { job_id, status }) => {
            debug!(%job_id, %status, "Trigger skipped");
            true
        }
        Err(e) => {
            warn!(error = %e, "Trigger rejected");
            false
        }
    }
}

/// Running [`LocalWorker`]
pub struct WorkerHandle {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<usize>,
}

impl WorkerHandle {
    /// Stop accepting new triggers and wait up to `grace` for in-flight ones
    ///
    /// Returns how many triggers were delivered over the worker's lifetime.
    pub async fn drain(self, grace: Duration) -> Result<usize> {
        let _ = self.shutdown.send(());
        with_timeout_map(grace, self.handle, "local worker drain")
            .await?
            .map_err(|e| ChaplinError::Queue(format!("local worker failed: {}", e)))
    }
}

// =============================================================================
// QStash
// =============================================================================

/// Publishes through the QStash HTTP API; QStash signs and retries delivery
pub struct QstashPublisher {
    client: Client,
    api_base: String,
    destination: String,
    token: SecretString,
    delay: Duration,
}

impl QstashPublisher {
    pub fn from_config(config: &QueueConfig) -> Result<Self> {
        let destination = config
            .destination
            .clone()
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| ChaplinError::Config("queue.destination is not set".to_string()))?;
        url::Url::parse(&destination)
            .map_err(|e| ChaplinError::Config(format!("queue.destination is not a URL: {}", e)))?;
        let token = config
            .token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ChaplinError::Config("queue.token is not set".to_string()))?;

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(network::CONNECTION_TIMEOUT_SECS))
            .timeout(Duration::from_secs(network::DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ChaplinError::Queue(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            destination,
            token: SecretString::from(token),
            delay: Duration::from_secs(config.delay_secs),
        })
    }

    fn publish_url(&self) -> String {
        format!("{}/v2/publish/{}", self.api_base, self.destination)
    }
}

#[async_trait]
impl TriggerPublisher for QstashPublisher {
    async fn publish(&self, payload: &TriggerPayload) -> Result<()> {
        let response = self
            .client
            .post(self.publish_url())
            .bearer_auth(self.token.expose_secret())
            .header("Upstash-Delay", format!("{}s", self.delay.as_secs()))
            .json(payload)
            .send()
            .await
            .map_err(|e| ChaplinError::Queue(format!("publish failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChaplinError::Queue(format!(
                "publish rejected ({}): {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        info!(job_id = %payload.job_id, "Trigger published");
        Ok(())
    }

    fn name(&self) -> &str {
        "qstash"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::signature::SignatureVerifier;
    use crate::types::JobId;

    #[tokio::test]
    async fn test_channel_publisher_signs_payload() {
        let (publisher, mut worker) = local_queue("secret", Duration::from_secs(60));
        let payload = TriggerPayload {
            job_id: JobId::new("abc"),
        };
        publisher.publish(&payload).await.unwrap();

        let delivery = worker.rx.recv().await.unwrap();
        assert_eq!(delivery.body, br#"{"jobId":"abc"}"#.to_vec());
        assert!(
            SignatureVerifier::new("secret", None)
                .verify(&delivery.signature, &delivery.body)
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_publish_after_worker_dropped_fails() {
        let (publisher, worker) = local_queue("secret", Duration::from_secs(60));
        drop(worker);
        let err = publisher
            .publish(&TriggerPayload {
                job_id: JobId::new("abc"),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ChaplinError::Queue(_)));
    }

    #[test]
    fn test_qstash_requires_destination_and_token() {
        assert!(QstashPublisher::from_config(&QueueConfig::default()).is_err());

        let config = QueueConfig {
            destination: Some("https://worker.example.com/api/process-job".into()),
            token: Some("t".into()),
            ..QueueConfig::default()
        };
        let publisher = QstashPublisher::from_config(&config).unwrap();
        assert_eq!(
            publisher.publish_url(),
            "https://qstash.upstash.io/v2/publish/https://worker.example.com/api/process-job"
        );
    }
}
