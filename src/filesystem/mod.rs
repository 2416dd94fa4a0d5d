//! Filesystem access used by the synchronizer.
//!
//! Everything the scanners and the dispatcher do to a tree goes through the
//! [`Filesystem`] trait, so the whole pipeline can run against the local disk
//! ([`LocalFilesystem`]) or, in tests, against an in-memory tree.

mod entry;
mod local;
#[cfg(test)]
mod memory;
mod walker;

use std::io;
use std::path::Path;
use std::time::SystemTime;

pub use entry::{DirEntry, EntryKind, EntryMetadata};
pub use local::LocalFilesystem;
#[cfg(test)]
pub use memory::MemoryFilesystem;
pub use walker::{TreeWalker, WalkEntry, WalkError};

/// The filesystem operations a synchronization run needs.
///
/// Permission bits are exchanged as Unix-style modes (`0o644`). Platforms without
/// mode bits map them onto whatever they support.
pub trait Filesystem {
    /// Lists the direct children of a directory, sorted by name.
    ///
    /// Entry metadata describes the entry itself; symbolic links are not followed.
    async fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>>;
    /// Stat-like lookup that follows symbolic links.
    async fn metadata(&self, path: &Path) -> io::Result<EntryMetadata>;
    /// Like [`Filesystem::metadata`], but a symbolic link describes itself.
    ///
    /// Anything about to be written through must be checked with this one, or a
    /// link planted in the destination redirects the write out of the tree.
    async fn symlink_metadata(&self, path: &Path) -> io::Result<EntryMetadata>;
    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    /// Streams the content of `from` into `to`, creating `to` if missing and
    /// truncating it otherwise. Returns the number of bytes copied.
    async fn copy(&self, from: &Path, to: &Path) -> io::Result<u64>;
    async fn set_permissions(&self, path: &Path, mode: u32) -> io::Result<()>;
    async fn set_modified(&self, path: &Path, modified: SystemTime) -> io::Result<()>;
    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    /// Removes a file, or a directory together with everything below it.
    async fn remove_all(&self, path: &Path) -> io::Result<()>;
}
