//! The remote job-submission API the lifecycle talks to.

use crate::errors::StepError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Remote batch job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// The input file is being checked.
    Validating,
    /// Requests are running.
    InProgress,
    /// Results are being collected.
    Finalizing,
    /// Finished; output files are available.
    Completed,
    /// The job failed.
    Failed,
    /// Cancellation was requested.
    Cancelling,
    /// The job was cancelled.
    Cancelled,
    /// The completion window passed.
    Expired,
    /// A status this client does not know.
    #[serde(other)]
    Unknown,
}

impl BatchStatus {
    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::InProgress => "in_progress",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
            Self::Unknown => "unknown",
        }
    }

    /// Returns true for statuses that need no further polling.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Expired
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request tallies reported by the remote job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestCounts {
    /// Requests in the input file.
    pub total: u64,
    /// Requests that succeeded.
    pub completed: u64,
    /// Requests that failed.
    pub failed: u64,
}

/// A remote batch job record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchJob {
    /// Job identifier.
    pub id: String,
    /// Current status.
    pub status: BatchStatus,
    /// Results file, once the job is terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file_id: Option<String>,
    /// Per-request errors file, once the job is terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_file_id: Option<String>,
    /// Request tallies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_counts: Option<RequestCounts>,
}

impl BatchJob {
    /// Creates a job record with no files.
    pub fn new(id: impl Into<String>, status: BatchStatus) -> Self {
        Self {
            id: id.into(),
            status,
            output_file_id: None,
            error_file_id: None,
            request_counts: None,
        }
    }

    /// Sets the output file.
    #[must_use]
    pub fn with_output_file(mut self, file_id: impl Into<String>) -> Self {
        self.output_file_id = Some(file_id.into());
        self
    }

    /// Sets the error file.
    #[must_use]
    pub fn with_error_file(mut self, file_id: impl Into<String>) -> Self {
        self.error_file_id = Some(file_id.into());
        self
    }
}

/// Parameters for creating a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateBatchRequest {
    /// The uploaded input file.
    pub input_file_id: String,
    /// The endpoint every request line targets.
    pub endpoint: String,
    /// How long the remote side may take, e.g. `24h`.
    pub completion_window: String,
}

/// File and job operations of a remote batch service.
#[async_trait]
pub trait BatchApi: Send + Sync {
    /// Uploads a local JSONL file and returns its file id.
    async fn upload_file(&self, path: &Path) -> Result<String, StepError>;

    /// Creates a job over an uploaded file.
    async fn create_batch(&self, request: &CreateBatchRequest) -> Result<BatchJob, StepError>;

    /// Fetches the current job record.
    async fn retrieve_batch(&self, batch_id: &str) -> Result<BatchJob, StepError>;

    /// Streams a remote file to `dest` and returns the bytes written.
    async fn download_file(&self, file_id: &str, dest: &Path) -> Result<u64, StepError>;
}
