use std::path::PathBuf;

use derive_more::Display;

/// Make the destination file at `relative_path` match the source file.
///
/// Only files are queued. Directories are mirrored by the source scanner itself.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[display("sync {}", relative_path.display())]
pub struct SyncAction {
    pub relative_path: PathBuf,
}

impl SyncAction {
    pub fn new(relative_path: impl Into<PathBuf>) -> Self {
        Self {
            relative_path: relative_path.into(),
        }
    }
}

/// Remove the destination entry at `relative_path`, recursively for directories.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
#[display("delete {}", relative_path.display())]
pub struct DeleteAction {
    pub relative_path: PathBuf,
}

impl DeleteAction {
    pub fn new(relative_path: impl Into<PathBuf>) -> Self {
        Self {
            relative_path: relative_path.into(),
        }
    }
}

/// Both action streams merged into one, labelled by origin
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum Action {
    Sync(SyncAction),
    Delete(DeleteAction),
}
