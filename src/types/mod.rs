pub mod error;
pub mod job;
pub mod progress;
pub mod workgroup;

pub use error::{
    ChaplinError, ErrorCategory, ErrorClassifier, ErrorKind, LlmError, Result, ResultExt,
    ValidationError, ValidationErrorKind,
};
pub use job::{ChaplinSnapshot, Job, JobStatus, RunRequest, TriggerPayload};
pub use progress::{IntegratorValidation, ProgressEvent};
pub use workgroup::{
    Agent, AgentOutput, GeneratedOutput, OutputSource, Persona, ResponseFormat, Workgroup,
    WorkgroupResponseMap, normalize_name,
};

// =============================================================================
// Domain Newtypes
// =============================================================================

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::constants::jobs;

/// Type-safe wrapper for job IDs
///
/// Prevents accidental mixing of job IDs with other string types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh random id: lowercase hex of [`jobs::ID_BYTES`] random bytes
    pub fn generate() -> Self {
        let mut bytes = [0u8; jobs::ID_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes.iter().map(|b| format!("{:02x}", b)).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Coarse size hint selecting a provider priority list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionSize {
    #[default]
    Small,
    Big,
}

impl fmt::Display for SessionSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Small => write!(f, "small"),
            Self::Big => write!(f, "big"),
        }
    }
}

#[cfg(test)]
mod newtype_tests {
    use super::*;

    #[test]
    fn test_job_id_generate() {
        let id = JobId::generate();
        assert_eq!(id.as_str().len(), jobs::ID_BYTES * 2);
        assert!(
            id.as_str()
                .chars()
                .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        );
        assert_ne!(JobId::generate(), id);
    }

    #[test]
    fn test_job_id_display() {
        let id = JobId::new("job-123");
        assert_eq!(id.as_str(), "job-123");
        assert_eq!(format!("{}", id), "job-123");
    }

    #[test]
    fn test_session_size_serde() {
        assert_eq!(serde_json::to_string(&SessionSize::Big).unwrap(), "\"big\"");
        let parsed: SessionSize = serde_json::from_str("\"small\"").unwrap();
        assert_eq!(parsed, SessionSize::Small);
    }
}
