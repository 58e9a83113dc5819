//! CLI Common Utilities
//!
//! Shared initialization for command handlers: configuration, the provider
//! chain, the job store and request files.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::ai::ProviderChain;
use crate::config::{Config, ConfigLoader};
use crate::engine::{WorkgroupDesigner, WorkgroupRunner};
use crate::jobs::{
    JobManager, QstashPublisher, SharedPublisher, SignatureVerifier, WorkerHandle,
    local_queue_from_config,
};
use crate::storage::{Database, JobStore};
use crate::types::{ChaplinError, Result};

/// Command execution context
#[derive(Clone)]
pub struct CommandContext {
    pub config: Config,
    pub chain: ProviderChain,
}

impl CommandContext {
    /// Load configuration (from `config_path` alone when given) and build the
    /// provider chain
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load()?,
        };
        let chain = ProviderChain::from_config(&config);
        Ok(Self { config, chain })
    }

    pub fn runner(&self) -> WorkgroupRunner {
        WorkgroupRunner::from_config(self.chain.clone(), &self.config.engine)
    }

    pub fn designer(&self) -> WorkgroupDesigner {
        WorkgroupDesigner::from_config(self.chain.clone(), &self.config.engine)
    }

    /// Open the job database and bring its schema up to date
    pub fn open_store(&self) -> Result<JobStore> {
        let db = Database::open(&self.config.storage.path)?;
        db.initialize()?;
        Ok(JobStore::new(Arc::new(db)))
    }

    /// Job manager wired to the configured queue
    ///
    /// With `queue.destination` set, triggers go to QStash and must carry its
    /// signature. Otherwise an in-process worker is started and its handle
    /// returned so the caller can drain it.
    pub fn job_manager(&self) -> Result<(Arc<JobManager>, Option<WorkerHandle>)> {
        let store = self.open_store()?;

        if self.config.queue.destination.is_some() {
            let publisher: SharedPublisher = Arc::new(QstashPublisher::from_config(&self.config.queue)?);
            let verifier = SignatureVerifier::from_config(&self.config.signing)?;
            let manager = JobManager::new(store, self.runner(), publisher, verifier);
            return Ok((Arc::new(manager), None));
        }

        let (publisher, worker, key) = local_queue_from_config(&self.config.signing);
        let verifier = SignatureVerifier::new(key, self.config.signing.next_key.clone())
            .with_tolerance(Duration::from_secs(self.config.signing.clock_tolerance_secs));
        let manager = Arc::new(JobManager::new(
            store,
            self.runner(),
            Arc::new(publisher),
            verifier,
        ));
        let handle = worker.spawn(manager.clone());
        Ok((manager, Some(handle)))
    }
}

/// Read and parse a JSON file; `-` reads standard input
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(path).map_err(|e| {
            ChaplinError::validation(format!("Cannot read '{}': {}", path.display(), e))
        })?
    };

    serde_json::from_str(&raw).map_err(|e| {
        ChaplinError::validation(format!("Invalid JSON in '{}': {}", path.display(), e))
    })
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RunRequest;
    use std::io::Write;

    #[test]
    fn test_read_json_request() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"input": "hi", "workgroup": [{{"name": "A", "prompt": "p"}}],
                "workgroupResponse": {{"a": "done"}}, "responseformat": {{"k": "v"}}}}"#
        )
        .unwrap();

        let request: RunRequest = read_json(file.path()).unwrap();
        assert_eq!(request.input, "hi");
        assert_eq!(request.workgroup.len(), 1);
        assert!(request.workgroup_response.has_value("A"));
        assert_eq!(request.response_format.len(), 1);
    }

    #[test]
    fn test_read_json_reports_bad_input() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = read_json::<RunRequest>(file.path()).unwrap_err();
        assert!(err.to_string().contains("Invalid JSON"));
    }

    #[test]
    fn test_open_store_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.storage.path = dir.path().join("nested/jobs.db");
        let ctx = CommandContext {
            chain: ProviderChain::from_config(&config),
            config,
        };

        ctx.open_store().unwrap();
        assert!(dir.path().join("nested/jobs.db").exists());
    }
}
