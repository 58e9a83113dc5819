//! Durable asynchronous runs
//!
//! A submitted job is stored as `queued`, a signed trigger is published, and
//! whichever worker receives the trigger claims the job and drives it while
//! spooling progress into the store.

pub mod lifecycle;
pub mod queue;
pub mod signature;

pub use lifecycle::{JobManager, TriggerOutcome};
pub use queue::{
    ChannelPublisher, Delivery, LocalWorker, QstashPublisher, SharedPublisher, TriggerPublisher,
    WorkerHandle, local_queue, local_queue_from_config,
};
pub use signature::{SignatureVerifier, sign_trigger};
