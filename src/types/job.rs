//! Durable job record

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::JobId;
use super::progress::ProgressEvent;
use super::error::ValidationError;
use super::workgroup::{ResponseFormat, Workgroup, WorkgroupResponseMap};

/// Job state machine: queued -> running -> done | failed, failed -> queued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status '{}'", other)),
        }
    }
}

/// Published persona snapshot frozen into a job at submit time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChaplinSnapshot {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub instructions: String,
    pub workgroup: Workgroup,
    #[serde(default)]
    pub responseformat: ResponseFormat,
}

/// Synchronous run request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub input: String,
    pub workgroup: Workgroup,
    #[serde(default)]
    pub workgroup_response: WorkgroupResponseMap,
    #[serde(default, rename = "responseformat")]
    pub response_format: ResponseFormat,
}

impl RunRequest {
    pub fn new(input: impl Into<String>, workgroup: Workgroup) -> Self {
        Self {
            input: input.into(),
            workgroup,
            ..Default::default()
        }
    }

    pub fn with_prefilled(mut self, map: WorkgroupResponseMap) -> Self {
        self.workgroup_response = map;
        self
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = format;
        self
    }

    /// Request a job replays: its input and snapshot, nothing prefilled
    pub fn from_snapshot(input: impl Into<String>, snapshot: &ChaplinSnapshot) -> Self {
        Self {
            input: input.into(),
            workgroup: snapshot.workgroup.clone(),
            workgroup_response: WorkgroupResponseMap::new(),
            response_format: snapshot.responseformat.clone(),
        }
    }

    /// Check the workgroup and response format against the data model limits
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.workgroup.validate()?;
        self.response_format.validate()
    }
}

/// A durable record of one asynchronous run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub input: String,
    pub chaplin_data: ChaplinSnapshot,
    pub progress: Vec<ProgressEvent>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Queue message that asks a worker to process a job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerPayload {
    pub job_id: JobId,
}
