/*!
Server-facing ports for the snapshot copy.

The transfer orchestrator only talks to a [`SnapshotSource`] and a
[`SnapshotSink`]. [`IpfClient`] implements both against the IP Fabric REST
API; tests substitute in-memory fakes.
*/

pub mod ipf;

use crate::archive::LocalArchive;
use crate::snapshot::SnapshotInfo;
use crate::Result;
use async_trait::async_trait;
use std::path::Path;

pub use ipf::IpfClient;

/// Server-side export job name for snapshot downloads
pub const EXPORT_JOB_NAME: &str = "snapshotDownload";

/// An export requested on the source server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportJob {
    pub snapshot_id: String,
    /// Set when the server reported the job id in its response
    pub job_id: Option<String>,
    /// Lower bound for the job's `startedAt`, epoch milliseconds
    pub requested_at_ms: i64,
}

/// State of an export job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportStatus {
    Pending(String),
    Ready { job_id: String },
    Failed(String),
}

impl ExportStatus {
    /// Classify a job row reported by the server
    pub fn from_job_state(job_id: String, state: &str) -> Self {
        match state.to_ascii_lowercase().as_str() {
            "done" | "completed" => ExportStatus::Ready { job_id },
            "failed" | "error" | "aborted" | "cancelled" => {
                ExportStatus::Failed(format!("export job {job_id} ended with status '{state}'"))
            }
            _ => ExportStatus::Pending(state.to_string()),
        }
    }
}

/// Server the snapshot is copied from
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Base URL, used in logs and errors
    fn server(&self) -> &str;

    async fn list_snapshots(&self) -> Result<Vec<SnapshotInfo>>;

    /// Ask the server to prepare a downloadable archive
    async fn request_export(&self, snapshot: &SnapshotInfo) -> Result<ExportJob>;

    async fn export_status(&self, job: &ExportJob) -> Result<ExportStatus>;

    /// Write the finished export to `dest`, returning the bytes written
    async fn download(&self, job_id: &str, dest: &Path) -> Result<u64>;
}

/// Server the snapshot is copied to
#[async_trait]
pub trait SnapshotSink: Send + Sync {
    fn server(&self) -> &str;

    /// Upload an archive and return the id the destination assigned to it
    async fn upload(&self, archive: &LocalArchive) -> Result<String>;
}
