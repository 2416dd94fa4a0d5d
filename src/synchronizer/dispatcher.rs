use std::io;
use std::path::{Path, PathBuf};

use futures::{FutureExt, StreamExt, pin_mut, select, stream};
use futures_channel::mpsc::Receiver;
use snafu::{ResultExt, Snafu};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::source_scanner::OWNER_ACCESS;
use super::transfer::{ChangeDetection, TransferError, TransferOutcome, transfer_file};
use super::{Action, DeleteAction, SyncAction, SyncReport};
use crate::ext::{BestEffortPathExt, ByteSizeExt};
use crate::filesystem::Filesystem;

const OWNER_WRITE: u32 = 0o200;

/// How the dispatcher loop ended, with the work it got done
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatcherExit {
    /// Both queues were closed and everything on them was applied
    Drained(SyncReport),
    /// Stopped on the cancellation signal, queued actions were left alone
    Cancelled(SyncReport),
}

impl DispatcherExit {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DispatcherExit::Cancelled(_))
    }

    pub fn into_report(self) -> SyncReport {
        match self {
            DispatcherExit::Drained(report) | DispatcherExit::Cancelled(report) => report,
        }
    }
}

/// The single consumer of both action queues.
///
/// Being the only task that writes file contents into the destination or deletes
/// from it, it needs no locking around those mutations. A failing action is logged
/// and counted, then the loop moves on to the next one.
pub struct ActionDispatcher<'a, F> {
    fs: &'a F,
    source: &'a Path,
    destination: &'a Path,
    change_detection: ChangeDetection,
}

impl<'a, F: Filesystem> ActionDispatcher<'a, F> {
    pub fn new(
        fs: &'a F,
        source: &'a Path,
        destination: &'a Path,
        change_detection: ChangeDetection,
    ) -> Self {
        Self {
            fs,
            source,
            destination,
            change_detection,
        }
    }

    /// Applies actions until both queues are drained or `cancellation` fires.
    ///
    /// The two queues are polled round-robin, so neither can starve the other.
    pub async fn run(
        &self,
        sync_queue: Receiver<SyncAction>,
        delete_queue: Receiver<DeleteAction>,
        cancellation: &CancellationToken,
    ) -> DispatcherExit {
        let mut actions = stream::select(
            sync_queue.map(Action::Sync),
            delete_queue.map(Action::Delete),
        );
        let cancelled = cancellation.cancelled().fuse();
        pin_mut!(cancelled);
        let mut report = SyncReport::default();

        loop {
            let next = select! {
                next = actions.next() => next,
                () = cancelled => None,
            };
            if cancellation.is_cancelled() {
                info!("Dispatcher stopped by cancellation");
                return DispatcherExit::Cancelled(report);
            }
            let Some(action) = next else {
                debug!("Both action queues drained");
                return DispatcherExit::Drained(report);
            };

            if let Err(error) = self.apply(action, &mut report).await {
                report.failed += 1;
                error!(error = %snafu::Report::from_error(error), "Action failed");
            }
        }
    }

    async fn apply(&self, action: Action, report: &mut SyncReport) -> Result<(), ActionError> {
        match action {
            Action::Sync(SyncAction { relative_path }) => {
                let source = self.source.join(&relative_path);
                let destination = self.destination.join(&relative_path);
                let outcome = transfer_file(self.fs, &source, &destination, self.change_detection)
                    .await
                    .context(SyncFailedSnafu {
                        relative_path: &relative_path,
                    })?;

                match outcome {
                    TransferOutcome::Transferred { bytes } => {
                        debug!(
                            path = %relative_path.display(),
                            size = %bytes.human_size(),
                            "Transferred file"
                        );
                        report.transferred += 1;
                        report.bytes_transferred += bytes;
                    }
                    TransferOutcome::Skipped => {
                        debug!(path = %relative_path.display(), "File is up to date");
                        report.skipped += 1;
                    }
                }
            }
            Action::Delete(DeleteAction { relative_path }) => {
                let target = self.destination.join(&relative_path);
                match self.remove(&target).await {
                    Ok(()) => {
                        debug!(path = %relative_path.display(), "Deleted");
                        report.deleted += 1;
                    }
                    Err(error) if is_already_gone(&error) => {
                        debug!(
                            path = %relative_path.display(),
                            "Nothing left to delete"
                        );
                    }
                    Err(error) => {
                        return Err(error).context(DeleteFailedSnafu {
                            relative_path: &relative_path,
                            path: &target,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Removes `target`, first opening a parent directory its owner cannot write.
    ///
    /// A parent inside the tree stays open; mirrored directories get their modes
    /// back once the run is over. The destination root is locked again right away.
    async fn remove(&self, target: &Path) -> io::Result<()> {
        let Some(parent) = target.parent() else {
            return self.fs.remove_all(target).await;
        };
        let locked = match self.fs.symlink_metadata(parent).await {
            Ok(metadata) if metadata.is_dir() && metadata.mode & OWNER_WRITE == 0 => {
                Some(metadata.mode)
            }
            _ => None,
        };

        if let Some(mode) = locked {
            debug!(
                "Opening read-only directory {} to delete from it",
                parent.best_effort_path_display()
            );
            self.fs.set_permissions(parent, mode | OWNER_ACCESS).await?;
        }
        let removed = self.fs.remove_all(target).await;
        if let Some(mode) = locked
            && parent == self.destination
        {
            self.fs.set_permissions(parent, mode).await?;
        }
        removed
    }
}

fn is_already_gone(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

#[derive(Debug, Snafu)]
pub enum ActionError {
    #[snafu(display("Failed to synchronize {}", relative_path.display()))]
    SyncFailedError {
        relative_path: PathBuf,
        source: TransferError,
    },
    #[snafu(display("Failed to delete {}", path.best_effort_path_display()))]
    DeleteFailedError {
        relative_path: PathBuf,
        path: PathBuf,
        source: io::Error,
    },
}
