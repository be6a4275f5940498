/*!
Transfer orchestrator: export, download, upload and clean up one snapshot
at a time.

Every step runs strictly after the previous one. The local archive is
removed once the upload has been attempted unless the run is configured to
keep it, so a failed upload does not leave stray archives behind.
*/

use crate::archive::{archive_file_name, LocalArchive};
use crate::client::{ExportStatus, SnapshotSink, SnapshotSource};
use crate::config::TransferConfig;
use crate::snapshot::{SnapshotInfo, SnapshotRef};
use crate::{Result, SnapCopyError};
use snapcopy_retry::{poll_until_ready, PollError, PollPolicy, Readiness};
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Per-run settings of the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOptions {
    pub poll: PollPolicy,
    pub keep_archive: bool,
    pub download_dir: PathBuf,
}

impl From<&TransferConfig> for TransferOptions {
    fn from(config: &TransferConfig) -> Self {
        Self {
            poll: config.poll,
            keep_archive: config.keep_archive,
            download_dir: config.download_dir.clone(),
        }
    }
}

/// Outcome of a successful copy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub source_id: String,
    pub name: Option<String>,
    pub destination_id: String,
    pub archive_path: PathBuf,
    pub archive_size: u64,
    pub archive_sha256: String,
    pub archive_kept: bool,
}

/// Outcome of a multi-snapshot run
#[derive(Debug, Default)]
pub struct TransferSummary {
    pub succeeded: Vec<TransferReport>,
    pub failed: Vec<(SnapshotInfo, SnapCopyError)>,
}

impl TransferSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Copies snapshots from a source server to a destination server
pub struct SnapshotTransfer<S, D>
where
    S: SnapshotSource,
    D: SnapshotSink,
{
    source: S,
    destination: D,
    options: TransferOptions,
}

impl<S, D> SnapshotTransfer<S, D>
where
    S: SnapshotSource,
    D: SnapshotSink,
{
    pub fn new(source: S, destination: D, options: TransferOptions) -> Self {
        Self {
            source,
            destination,
            options,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn options(&self) -> &TransferOptions {
        &self.options
    }

    /// Look a reference up in the source's snapshot list
    pub async fn resolve(&self, reference: &SnapshotRef) -> Result<SnapshotInfo> {
        let snapshots = self.source.list_snapshots().await?;
        reference
            .resolve(&snapshots)
            .cloned()
            .ok_or_else(|| SnapCopyError::not_found(reference.to_string(), self.source.server()))
    }

    /// Resolve `reference` on the source and copy it
    pub async fn copy_reference(&self, reference: &SnapshotRef) -> Result<TransferReport> {
        let snapshot = self.resolve(reference).await?;
        self.copy(&snapshot).await
    }

    /// Copy one snapshot: export, download, upload, then clean up
    pub async fn copy(&self, snapshot: &SnapshotInfo) -> Result<TransferReport> {
        info!(
            server = %self.source.server(),
            name = %snapshot.display_name(),
            id = %snapshot.id,
            "SOURCE snapshot selected"
        );

        let archive = self.export_archive(snapshot).await?;
        info!(
            path = %archive.path().display(),
            size = archive.size(),
            sha256 = %archive.sha256(),
            "Download completed"
        );

        info!(server = %self.destination.server(), "Initiating upload");
        let uploaded = self.destination.upload(&archive).await;
        let cleanup = self.finish_archive(&archive);

        let destination_id = match uploaded {
            Ok(id) => id,
            Err(e) => {
                error!(snapshot = %snapshot.id, error = %e, "Could not upload the archive");
                if let Err(cleanup_err) = cleanup {
                    error!(error = %cleanup_err, "Could not delete the archive");
                }
                return Err(e);
            }
        };
        cleanup?;

        info!(
            server = %self.destination.server(),
            name = %snapshot.display_name(),
            source_id = %snapshot.id,
            new_id = %destination_id,
            "DESTINATION snapshot uploaded; import continues on the server"
        );

        Ok(TransferReport {
            source_id: snapshot.id.clone(),
            name: snapshot.name.clone(),
            destination_id,
            archive_path: archive.path().to_path_buf(),
            archive_size: archive.size(),
            archive_sha256: archive.sha256().to_string(),
            archive_kept: self.options.keep_archive,
        })
    }

    /// Copy several snapshots in order, collecting failures instead of stopping
    pub async fn copy_many(&self, snapshots: &[SnapshotInfo]) -> TransferSummary {
        let mut summary = TransferSummary::default();
        let total = snapshots.len();

        for (index, snapshot) in snapshots.iter().enumerate() {
            info!(
                "Processing snapshot {}/{}: {} ({})",
                index + 1,
                total,
                snapshot.display_name(),
                snapshot.id
            );
            match self.copy(snapshot).await {
                Ok(report) => summary.succeeded.push(report),
                Err(e) => {
                    error!(snapshot = %snapshot.id, error = %e, "Snapshot copy failed");
                    summary.failed.push((snapshot.clone(), e));
                }
            }
        }

        summary
    }

    async fn export_archive(&self, snapshot: &SnapshotInfo) -> Result<LocalArchive> {
        let job = self.source.request_export(snapshot).await?;
        info!(
            snapshot = %snapshot.id,
            interval_secs = self.options.poll.interval.as_secs(),
            timeout_secs = self.options.poll.timeout.as_secs(),
            max_checks = self.options.poll.max_checks(),
            "Waiting for export"
        );

        let source = &self.source;
        let job_ref = &job;
        let job_id = poll_until_ready("snapshot export", self.options.poll, || async move {
            source
                .export_status(job_ref)
                .await
                .and_then(|status| match status {
                    ExportStatus::Ready { job_id } => Ok(Readiness::Ready(job_id)),
                    ExportStatus::Pending(state) => Ok(Readiness::Pending(state)),
                    ExportStatus::Failed(reason) => Err(SnapCopyError::transfer(reason)),
                })
        })
        .await
        .map_err(|e| match e {
            PollError::TimedOut { waited, .. } => SnapCopyError::Timeout {
                snapshot: snapshot.id.clone(),
                waited_secs: waited.as_secs(),
            },
            PollError::Failed { error, .. } => error,
        })?;

        let dest = self
            .options
            .download_dir
            .join(archive_file_name(&snapshot.id));
        info!(job_id = %job_id, path = %dest.display(), "Downloading export");
        self.source.download(&job_id, &dest).await?;

        match LocalArchive::open(&dest) {
            Ok(archive) => Ok(archive),
            Err(e) => {
                error!(path = %dest.display(), error = %e, "Downloaded archive is unreadable");
                if !self.options.keep_archive {
                    if let Err(cleanup) = std::fs::remove_file(&dest) {
                        warn!(path = %dest.display(), error = %cleanup, "Could not delete the archive");
                    }
                }
                Err(e)
            }
        }
    }

    fn finish_archive(&self, archive: &LocalArchive) -> Result<()> {
        if self.options.keep_archive {
            info!(path = %archive.path().display(), "Archive kept");
            return Ok(());
        }
        archive.remove()?;
        if archive.exists() {
            warn!(path = %archive.path().display(), "Archive still present after delete");
        } else {
            info!(path = %archive.path().display(), "Archive deleted");
        }
        Ok(())
    }
}
