use std::path::PathBuf;

use snafu::{ResultExt, Snafu};

use super::{EntryMetadata, Filesystem};
use crate::ext::BestEffortPathExt;

/// An entry produced by [`TreeWalker`], identified by its path relative to the walk root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub relative_path: PathBuf,
    pub metadata: EntryMetadata,
}

/// Depth-first, pre-order traversal of a tree below `root`.
///
/// A directory is yielded before any of its children, and its children are only
/// listed on the following call to [`TreeWalker::next`]. The caller can therefore act
/// on a directory (create its mirror, schedule its removal) before anything inside it
/// is seen, and can call [`TreeWalker::skip_current_dir`] to not descend at all.
/// Siblings are visited in name order. The root itself is never yielded.
pub struct TreeWalker<'a, F> {
    fs: &'a F,
    root: PathBuf,
    pending: Vec<WalkEntry>,
    descend_into: Option<PathBuf>,
    started: bool,
}

impl<'a, F: Filesystem> TreeWalker<'a, F> {
    pub fn new(fs: &'a F, root: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            root: root.into(),
            pending: Vec::new(),
            descend_into: None,
            started: false,
        }
    }

    /// Do not visit the children of the directory returned by the last `next` call
    pub fn skip_current_dir(&mut self) {
        self.descend_into = None;
    }

    pub async fn next(&mut self) -> Result<Option<WalkEntry>, WalkError> {
        if !self.started {
            self.started = true;
            self.expand(PathBuf::new()).await?;
        } else if let Some(directory) = self.descend_into.take() {
            self.expand(directory).await?;
        }

        let Some(entry) = self.pending.pop() else {
            return Ok(None);
        };
        if entry.metadata.is_dir() {
            self.descend_into = Some(entry.relative_path.clone());
        }
        Ok(Some(entry))
    }

    async fn expand(&mut self, relative_directory: PathBuf) -> Result<(), WalkError> {
        let directory = if relative_directory.as_os_str().is_empty() {
            self.root.clone()
        } else {
            self.root.join(&relative_directory)
        };

        let children = self
            .fs
            .read_dir(&directory)
            .await
            .context(WalkSnafu { path: directory })?;

        // Reversed so that popping yields name order
        self.pending
            .extend(children.into_iter().rev().map(|child| WalkEntry {
                relative_path: relative_directory.join(&child.name),
                metadata: child.metadata,
            }));
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(display("Failed to list directory {}", path.best_effort_path_display()))]
pub struct WalkError {
    pub path: PathBuf,
    source: std::io::Error,
}
