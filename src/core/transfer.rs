//! Directory backup/restore with a progress monitor running alongside.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span};

use crate::core::platform::{CopyOptions, FileSystem};
use crate::core::progress::{DEFAULT_SAMPLE_INTERVAL, ProgressMonitor, ProgressReport, directory_size};

/// Only affects how a transfer is logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Backup,
    Restore,
}

impl fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Backup => "backup",
            Self::Restore => "restore",
        })
    }
}

#[derive(Debug, Clone)]
pub struct TransferJob {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub direction: TransferDirection,
    pub options: CopyOptions,
}

impl TransferJob {
    /// Full recursive copy of `source` into `destination`.
    pub fn tree(source: &Path, destination: &Path, direction: TransferDirection) -> Self {
        Self {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            direction,
            options: CopyOptions::tree(),
        }
    }

    pub fn with_options(mut self, options: CopyOptions) -> Self {
        self.options = options;
        self
    }
}

pub struct BulkDirectoryTransfer {
    fs: Arc<dyn FileSystem>,
    sample_interval: Duration,
    reports: Option<mpsc::UnboundedSender<ProgressReport>>,
}

impl BulkDirectoryTransfer {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            reports: None,
        }
    }

    pub fn with_sample_interval(mut self, interval: Duration) -> Self {
        self.sample_interval = interval;
        self
    }

    pub fn with_reports(mut self, tx: mpsc::UnboundedSender<ProgressReport>) -> Self {
        self.reports = Some(tx);
        self
    }

    /// Copy the job's tree while a monitor samples the destination.
    ///
    /// Never fails outward: copy errors are logged with the paths involved and
    /// reported as `false`. The monitor is stopped on every exit path.
    pub async fn run(&self, job: &TransferJob) -> bool {
        let span = info_span!(
            "bulk_transfer",
            direction = %job.direction,
            source = %job.source.display(),
            destination = %job.destination.display()
        );

        async {
            let total_bytes = directory_size(&job.source, &job.options).await;
            info!(total_bytes, "Starting {}", job.direction);

            let mut monitor = ProgressMonitor::new(
                &job.destination,
                total_bytes,
                job.direction.to_string(),
            )
            .with_interval(self.sample_interval)
            .with_options(job.options.clone());
            if let Some(tx) = &self.reports {
                monitor = monitor.with_reports(tx.clone());
            }

            let token = CancellationToken::new();
            let handle = monitor.spawn(token.clone());
            // Cancels the monitor even if this future is dropped mid-copy.
            let guard = token.drop_guard();

            let start = Instant::now();
            let result = self
                .fs
                .copy_directory(&job.source, &job.destination, &job.options)
                .await;

            drop(guard);
            let _ = handle.await;

            match result {
                Ok(()) => {
                    info!(
                        duration_secs = start.elapsed().as_secs(),
                        "Completed {}", job.direction
                    );
                    true
                }
                Err(e) => {
                    let message = format!("{e:#}");
                    error!(error = %message, "Failed during {}", job.direction);
                    false
                }
            }
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::LocalFileSystem;
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use std::fs;
    use tempfile::tempdir;

    struct FailingCopy;

    #[async_trait]
    impl FileSystem for FailingCopy {
        async fn copy_file(&self, _s: &Path, _d: &Path) -> Result<()> {
            Ok(())
        }

        async fn copy_directory(&self, source: &Path, _d: &Path, _o: &CopyOptions) -> Result<()> {
            bail!("Failed to read directory {}: device not ready", source.display())
        }

        async fn delete_directory(&self, _p: &Path) -> Result<()> {
            Ok(())
        }

        async fn unzip(&self, _a: &Path, _d: &Path) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn copies_tree_including_empty_directories() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("tomcat");
        let backup = temp.path().join("backup");
        fs::create_dir_all(source.join("logs/archive")).unwrap();
        fs::create_dir_all(source.join("conf")).unwrap();
        fs::write(source.join("conf/server.xml"), b"<Server/>").unwrap();

        let transfer = BulkDirectoryTransfer::new(Arc::new(LocalFileSystem::default()));
        let job = TransferJob::tree(&source, &backup, TransferDirection::Backup);

        assert!(transfer.run(&job).await);
        assert!(backup.join("logs/archive").is_dir());
        assert_eq!(
            fs::read_to_string(backup.join("conf/server.xml")).unwrap(),
            "<Server/>"
        );
    }

    #[tokio::test]
    async fn copy_failure_is_reported_as_false() {
        let temp = tempdir().unwrap();
        let transfer = BulkDirectoryTransfer::new(Arc::new(FailingCopy));
        let job = TransferJob::tree(
            &temp.path().join("src"),
            &temp.path().join("dst"),
            TransferDirection::Restore,
        );

        assert!(!transfer.run(&job).await);
    }

    #[tokio::test]
    async fn monitor_channel_closes_after_transfer() {
        let temp = tempdir().unwrap();
        let source = temp.path().join("src");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("a.bin"), vec![1u8; 1024]).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let transfer = BulkDirectoryTransfer::new(Arc::new(LocalFileSystem::default()))
            .with_reports(tx);
        let job = TransferJob::tree(&source, &temp.path().join("dst"), TransferDirection::Restore);

        assert!(transfer.run(&job).await);
        drop(transfer);

        // The monitor task has been joined, so only already-sent samples remain.
        while rx.try_recv().is_ok() {}
        assert!(rx.recv().await.is_none());
    }
}
