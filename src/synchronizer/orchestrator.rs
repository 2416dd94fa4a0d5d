use std::io;
use std::path::{Path, PathBuf};

use futures_channel::mpsc;
use snafu::{ResultExt, Snafu};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::transfer::ChangeDetection;
use super::{
    ActionDispatcher, DestinationScanner, PendingMode, ScanError, ScanSummary, SourceScanner,
    SyncReport,
};
use crate::ext::BestEffortPathExt;
use crate::filesystem::{Filesystem, LocalFilesystem};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Actions a queue holds before its scanner has to wait for the dispatcher
    pub queue_capacity: usize,
    pub change_detection: ChangeDetection,
}

/// Mirrors `source` onto `destination` on the local disk with default options.
pub async fn synchronize(
    cancellation: &CancellationToken,
    source: &Path,
    destination: &Path,
) -> Result<SyncReport, SyncError> {
    Synchronizer::new(LocalFilesystem, SyncOptions::default())
        .synchronize(cancellation, source, destination)
        .await
}

pub struct Synchronizer<F> {
    fs: F,
    options: SyncOptions,
}

impl<F: Filesystem> Synchronizer<F> {
    pub fn new(fs: F, options: SyncOptions) -> Self {
        Self { fs, options }
    }

    /// Runs one synchronization.
    ///
    /// Both scanners run concurrently with the dispatcher. The queues close only once
    /// both scanners have returned, and this does not return before the dispatcher
    /// has stopped. A scanner failure becomes the run's error; whatever the
    /// dispatcher applied until then stays applied.
    ///
    /// Directory modes that would lock the run out of its own tree are applied last,
    /// after the dispatcher has stopped, whatever the outcome.
    pub async fn synchronize(
        &self,
        cancellation: &CancellationToken,
        source: &Path,
        destination: &Path,
    ) -> Result<SyncReport, SyncError> {
        if cancellation.is_cancelled() {
            return CancelledSnafu.fail();
        }
        info!(
            "Synchronizing {} into {}",
            source.best_effort_path_display(),
            destination.best_effort_path_display()
        );
        self.check_source_root(source).await?;
        self.prepare_destination_root(destination).await?;

        let (mut sync_sender, sync_receiver) = mpsc::channel(self.options.queue_capacity);
        let (mut delete_sender, delete_receiver) = mpsc::channel(self.options.queue_capacity);

        let dispatcher = ActionDispatcher::new(
            &self.fs,
            source,
            destination,
            self.options.change_detection,
        );
        // Borrowed, so its held back directory modes outlive the scanning future
        let source_scanner = &SourceScanner::new(&self.fs, source, destination);
        let destination_scanner = DestinationScanner::new(&self.fs, destination, source);

        let scanning = async move {
            let results = futures::join!(
                source_scanner.scan(&mut sync_sender, cancellation),
                destination_scanner.scan(&mut delete_sender, cancellation),
            );
            // Both scanners are done, so nothing can be sending anymore
            drop(sync_sender);
            drop(delete_sender);
            debug!("Scanners finished, action queues closed");
            results
        };
        let ((source_result, destination_result), exit) = futures::join!(
            scanning,
            dispatcher.run(sync_receiver, delete_receiver, cancellation)
        );

        let cancelled = exit.is_cancelled() || cancellation.is_cancelled();
        let mut report = exit.into_report();
        self.restore_directory_modes(destination, source_scanner.take_pending_modes(), &mut report)
            .await;
        let source_summary = Self::settle_scan(source_result, destination_result)?;

        if cancelled {
            info!(%report, "Synchronization cancelled");
            return CancelledSnafu.fail();
        }
        debug!(queued = source_summary.queued, "Source scan finished");
        report.record_source_scan(source_summary);
        info!(%report, "Synchronization finished");
        Ok(report)
    }

    /// Deepest directories first, so a parent is locked only after its children
    async fn restore_directory_modes(
        &self,
        destination: &Path,
        pending: Vec<PendingMode>,
        report: &mut SyncReport,
    ) {
        for PendingMode {
            relative_path,
            mode,
        } in pending.into_iter().rev()
        {
            let target = destination.join(&relative_path);
            match self.fs.set_permissions(&target, mode).await {
                Ok(()) => debug!(path = %relative_path.display(), "Applied mode {mode:o}"),
                Err(error) => {
                    report.failed += 1;
                    error!(
                        path = %relative_path.display(),
                        error = %error,
                        "Failed to apply directory mode {mode:o}"
                    );
                }
            }
        }
    }

    /// Turns the scanner results into the run's error, preferring the source side.
    /// Interruptions are not failures of their own and surface as cancellation.
    fn settle_scan(
        source_result: Result<ScanSummary, ScanError>,
        destination_result: Result<ScanSummary, ScanError>,
    ) -> Result<ScanSummary, SyncError> {
        let destination_error = match destination_result {
            Ok(summary) => {
                debug!(
                    directories = summary.directories,
                    files = summary.files,
                    orphans = summary.queued,
                    "Destination scan finished"
                );
                None
            }
            Err(error) if error.is_interruption() => None,
            Err(error) => Some(error),
        };

        match source_result {
            Err(error) if !error.is_interruption() => {
                if let Some(destination_error) = destination_error {
                    error!(
                        error = %snafu::Report::from_error(destination_error),
                        "Destination scan failed as well"
                    );
                }
                Err(error).context(SourceScanSnafu)
            }
            source_result => match destination_error {
                Some(error) => Err(error).context(DestinationScanSnafu),
                None => Ok(source_result.unwrap_or_default()),
            },
        }
    }

    async fn check_source_root(&self, source: &Path) -> Result<(), SyncError> {
        let metadata = self
            .fs
            .metadata(source)
            .await
            .context(SourceRootSnafu { path: source })?;
        if !metadata.is_dir() {
            return RootNotDirectorySnafu { path: source }.fail();
        }
        Ok(())
    }

    async fn prepare_destination_root(&self, destination: &Path) -> Result<(), SyncError> {
        match self.fs.metadata(destination).await {
            Ok(metadata) if metadata.is_dir() => Ok(()),
            Ok(_) => RootNotDirectorySnafu { path: destination }.fail(),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                info!(
                    "Creating destination root {}",
                    destination.best_effort_path_display()
                );
                self.fs
                    .create_dir_all(destination)
                    .await
                    .context(DestinationRootSnafu { path: destination })
            }
            Err(error) => Err(error).context(DestinationRootSnafu { path: destination }),
        }
    }
}

#[derive(Debug, Snafu)]
pub enum SyncError {
    #[snafu(display("Cannot read source root {}", path.best_effort_path_display()))]
    SourceRootError { path: PathBuf, source: io::Error },
    #[snafu(display("Cannot prepare destination root {}", path.best_effort_path_display()))]
    DestinationRootError { path: PathBuf, source: io::Error },
    #[snafu(display("{} is not a directory", path.best_effort_path_display()))]
    RootNotDirectoryError { path: PathBuf },
    #[snafu(display("Scanning the source tree failed"))]
    SourceScanError { source: ScanError },
    #[snafu(display("Scanning the destination tree failed"))]
    DestinationScanError { source: ScanError },
    #[snafu(display("Synchronization was cancelled before it completed"))]
    CancelledError,
}
