use std::io;
use std::path::Path;

use futures_channel::mpsc::Sender;
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::scan::{CancelledSnafu, ScanError, TraversalSnafu, enqueue};
use super::{DeleteAction, ScanSummary};
use crate::ext::ByteSizeExt;
use crate::filesystem::{EntryKind, Filesystem, TreeWalker};

/// Walks the destination tree and queues a [`DeleteAction`] for every entry whose
/// relative path no longer exists in the source.
///
/// An orphaned directory is deleted as a whole, so the walk does not descend into it.
pub struct DestinationScanner<'a, F> {
    fs: &'a F,
    destination: &'a Path,
    source: &'a Path,
}

impl<'a, F: Filesystem> DestinationScanner<'a, F> {
    pub fn new(fs: &'a F, destination: &'a Path, source: &'a Path) -> Self {
        Self {
            fs,
            destination,
            source,
        }
    }

    pub async fn scan(
        &self,
        queue: &mut Sender<DeleteAction>,
        cancellation: &CancellationToken,
    ) -> Result<ScanSummary, ScanError> {
        let mut walker = TreeWalker::new(self.fs, self.destination);
        let mut summary = ScanSummary::default();

        loop {
            if cancellation.is_cancelled() {
                return CancelledSnafu.fail();
            }
            let Some(entry) = walker.next().await.context(TraversalSnafu)? else {
                break;
            };
            match entry.metadata.kind {
                EntryKind::Directory => summary.directories += 1,
                EntryKind::File | EntryKind::Symlink => summary.files += 1,
            }

            let counterpart = self.source.join(&entry.relative_path);
            // A source link counts as present even when it dangles
            match self.fs.symlink_metadata(&counterpart).await {
                Ok(source_metadata) => {
                    // The transfer replaces the whole directory with the source file
                    if entry.metadata.is_dir() && !source_metadata.is_dir() {
                        walker.skip_current_dir();
                    }
                    continue;
                }
                Err(error) if is_absent(&error) => {}
                Err(error) => {
                    warn!(
                        path = %entry.relative_path.display(),
                        error = %error,
                        "Cannot tell whether the source still has this entry, keeping it"
                    );
                    continue;
                }
            }

            info!(
                path = %entry.relative_path.display(),
                size = %entry.metadata.len.human_size(),
                "Deleting {} missing from source", entry.metadata.kind
            );
            if entry.metadata.is_dir() {
                debug!(
                    path = %entry.relative_path.display(),
                    "Not descending into orphaned directory"
                );
                walker.skip_current_dir();
            }
            enqueue(queue, DeleteAction::new(entry.relative_path), cancellation).await?;
            summary.queued += 1;
        }

        Ok(summary)
    }
}

fn is_absent(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}
