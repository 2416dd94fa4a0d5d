use std::cell::RefCell;
use std::path::{Path, PathBuf};

use futures_channel::mpsc::Sender;
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::scan::{CancelledSnafu, DirectoryCreateSnafu, ScanError, TraversalSnafu, enqueue};
use super::{ScanSummary, SyncAction};
use crate::ext::ByteSizeExt;
use crate::filesystem::{EntryKind, EntryMetadata, Filesystem, TreeWalker, WalkEntry};

pub(super) const OWNER_ACCESS: u32 = 0o700;

/// Walks the source tree top-down.
///
/// Directories are mirrored into the destination on the spot, before anything inside
/// them is visited. Every file becomes a [`SyncAction`] on the sync queue.
///
/// A mirrored directory stays writable by its owner while the run fills it. Modes
/// that lack owner access are collected as [`PendingMode`]s, to be applied once no
/// more actions will touch the tree.
pub struct SourceScanner<'a, F> {
    fs: &'a F,
    source: &'a Path,
    destination: &'a Path,
    pending_modes: RefCell<Vec<PendingMode>>,
}

/// A directory mode held back until the destination tree is complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMode {
    pub relative_path: PathBuf,
    pub mode: u32,
}

impl<'a, F: Filesystem> SourceScanner<'a, F> {
    pub fn new(fs: &'a F, source: &'a Path, destination: &'a Path) -> Self {
        Self {
            fs,
            source,
            destination,
            pending_modes: RefCell::new(Vec::new()),
        }
    }

    /// Held back modes, parents before their children
    pub fn take_pending_modes(&self) -> Vec<PendingMode> {
        self.pending_modes.take()
    }

    pub async fn scan(
        &self,
        queue: &mut Sender<SyncAction>,
        cancellation: &CancellationToken,
    ) -> Result<ScanSummary, ScanError> {
        let mut walker = TreeWalker::new(self.fs, self.source);
        let mut summary = ScanSummary::default();

        loop {
            if cancellation.is_cancelled() {
                return CancelledSnafu.fail();
            }
            let Some(entry) = walker.next().await.context(TraversalSnafu)? else {
                break;
            };

            match entry.metadata.kind {
                EntryKind::Directory => {
                    info!(
                        path = %entry.relative_path.display(),
                        size = %entry.metadata.len.human_size(),
                        "Synchronizing directory"
                    );
                    self.mirror_directory(&entry).await?;
                    summary.directories += 1;
                }
                // Links are copied as the content they point to
                EntryKind::File | EntryKind::Symlink => {
                    info!(
                        path = %entry.relative_path.display(),
                        size = %entry.metadata.len.human_size(),
                        "Synchronizing file"
                    );
                    summary.files += 1;
                    enqueue(queue, SyncAction::new(entry.relative_path), cancellation).await?;
                    summary.queued += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Makes sure the destination has a real directory at the entry's path.
    ///
    /// Whatever else sits there is removed first, a symbolic link included, so
    /// nothing below the destination root is ever written through a link.
    async fn mirror_directory(&self, entry: &WalkEntry) -> Result<(), ScanError> {
        let target = self.destination.join(&entry.relative_path);
        let existing = self.fs.symlink_metadata(&target).await.ok();
        let wanted = entry.metadata.mode;
        let working = wanted | OWNER_ACCESS;

        if let Some(existing) = existing.as_ref().filter(|existing| !existing.is_dir()) {
            warn!(
                path = %entry.relative_path.display(),
                "Replacing destination {} with a directory",
                existing.kind
            );
            self.fs
                .remove_all(&target)
                .await
                .context(DirectoryCreateSnafu { path: &target })?;
        }
        let existing = existing.filter(EntryMetadata::is_dir);
        if existing.is_none() {
            self.fs
                .create_dir_all(&target)
                .await
                .context(DirectoryCreateSnafu { path: &target })?;
        }
        if existing.is_none_or(|existing| existing.mode != working) {
            self.fs
                .set_permissions(&target, working)
                .await
                .context(DirectoryCreateSnafu { path: &target })?;
        }
        if working != wanted {
            self.pending_modes.borrow_mut().push(PendingMode {
                relative_path: entry.relative_path.clone(),
                mode: wanted,
            });
        }
        Ok(())
    }
}
