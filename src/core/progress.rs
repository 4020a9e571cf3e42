//! Background progress sampling for long directory copies.
//!
//! The monitor measures the destination tree on a fixed interval and reports
//! how much of the known source size has arrived. It runs as its own task and
//! is stopped through a `CancellationToken`; a sample that completes after
//! cancellation is discarded rather than reported.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::platform::CopyOptions;

/// Default time between two samples.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(10);

/// One progress sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressReport {
    pub bytes_copied: u64,
    pub total_bytes: u64,
    pub percentage: u64,
}

/// Whole percent of `total` reached by `copied`, rounded down.
///
/// `None` while nothing is known to report: an empty source or an empty
/// destination.
pub fn percent_complete(copied: u64, total: u64) -> Option<u64> {
    if total == 0 || copied == 0 {
        return None;
    }
    Some(((copied as u128 * 100) / total as u128) as u64)
}

pub struct ProgressMonitor {
    destination: PathBuf,
    options: CopyOptions,
    total_bytes: u64,
    interval: Duration,
    label: String,
    reports: Option<mpsc::UnboundedSender<ProgressReport>>,
}

impl ProgressMonitor {
    /// `total_bytes` is the source size captured before the copy starts.
    pub fn new(destination: &Path, total_bytes: u64, label: impl Into<String>) -> Self {
        Self {
            destination: destination.to_path_buf(),
            options: CopyOptions::tree(),
            total_bytes,
            interval: DEFAULT_SAMPLE_INTERVAL,
            label: label.into(),
            reports: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Measure the destination with the same filter the copy uses.
    pub fn with_options(mut self, options: CopyOptions) -> Self {
        self.options = options;
        self
    }

    /// Also publish every reported sample on `tx`.
    pub fn with_reports(mut self, tx: mpsc::UnboundedSender<ProgressReport>) -> Self {
        self.reports = Some(tx);
        self
    }

    /// Start sampling until `token` is cancelled. The first sample is taken
    /// one interval after the start.
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(token).await })
    }

    async fn run(self, token: CancellationToken) {
        let period = self.interval.max(Duration::from_millis(1));
        let mut ticker = time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let copied = directory_size(&self.destination, &self.options).await;

            if token.is_cancelled() {
                debug!(label = %self.label, "Discarding sample taken after completion");
                break;
            }

            if let Some(percentage) = percent_complete(copied, self.total_bytes) {
                info!(
                    label = %self.label,
                    bytes_copied = copied,
                    total_bytes = self.total_bytes,
                    "{}% done",
                    percentage
                );
                if let Some(tx) = &self.reports {
                    let _ = tx.send(ProgressReport {
                        bytes_copied: copied,
                        total_bytes: self.total_bytes,
                        percentage,
                    });
                }
            }
        }
    }
}

/// Total size in bytes of the regular files under `root` that `options`
/// would copy. Unreadable entries count as zero; a missing root is empty.
pub async fn directory_size(root: &Path, options: &CopyOptions) -> u64 {
    let root = root.to_path_buf();
    let options = options.clone();

    tokio::task::spawn_blocking(move || {
        let mut total = 0;
        size_recursive(&root, &options, &mut total);
        total
    })
    .await
    .unwrap_or(0)
}

fn size_recursive(current: &Path, options: &CopyOptions, total: &mut u64) {
    let Ok(entries) = fs::read_dir(current) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        // symlink_metadata so links are never followed
        let Ok(metadata) = path.symlink_metadata() else {
            continue;
        };

        if metadata.is_dir() {
            if options.recursive {
                size_recursive(&path, options, total);
            }
        } else if metadata.is_file() && options.accepts(&path) {
            *total += metadata.len();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn percent_is_floored() {
        assert_eq!(percent_complete(1, 3), Some(33));
        assert_eq!(percent_complete(2, 3), Some(66));
        assert_eq!(percent_complete(3, 3), Some(100));
    }

    #[test]
    fn percent_never_divides_by_zero() {
        assert_eq!(percent_complete(0, 0), None);
        assert_eq!(percent_complete(512, 0), None);
        assert_eq!(percent_complete(0, 512), None);
    }

    #[tokio::test]
    async fn sizes_nested_tree() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("a.war"), b"12345").unwrap();
        fs::create_dir_all(temp.path().join("sub/empty")).unwrap();
        fs::write(temp.path().join("sub/b.txt"), b"123").unwrap();

        assert_eq!(directory_size(temp.path(), &CopyOptions::tree()).await, 8);
        assert_eq!(
            directory_size(temp.path(), &CopyOptions::flat_with_extension("war")).await,
            5
        );
        assert_eq!(
            directory_size(&temp.path().join("missing"), &CopyOptions::tree()).await,
            0
        );
    }

    #[tokio::test(start_paused = true)]
    async fn zero_sized_source_reports_nothing() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("partial.bin"), b"data").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let handle = ProgressMonitor::new(temp.path(), 0, "backup")
            .with_interval(Duration::from_secs(10))
            .with_reports(tx)
            .spawn(token.clone());

        tokio::time::sleep(Duration::from_secs(35)).await;
        token.cancel();
        handle.await.unwrap();

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn first_sample_arrives_after_one_interval() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("half.bin"), vec![0u8; 50]).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let start = Instant::now();
        let handle = ProgressMonitor::new(temp.path(), 100, "restore")
            .with_interval(Duration::from_secs(10))
            .with_reports(tx)
            .spawn(token.clone());

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(rx.try_recv().is_err());

        let first = rx.recv().await.unwrap();
        assert_eq!(first.percentage, 50);
        assert!(start.elapsed() >= Duration::from_secs(10));

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stops_reporting_once_cancelled() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("half.bin"), vec![0u8; 50]).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let handle = ProgressMonitor::new(temp.path(), 100, "restore")
            .with_interval(Duration::from_secs(10))
            .with_reports(tx)
            .spawn(token.clone());

        assert_eq!(rx.recv().await.unwrap().percentage, 50);
        token.cancel();
        handle.await.unwrap();

        fs::write(temp.path().join("rest.bin"), vec![0u8; 50]).unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
        assert!(rx.recv().await.is_none());
    }
}
