use std::ffi::OsString;
use std::time::SystemTime;

use derive_more::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum EntryKind {
    #[display("directory")]
    Directory,
    #[display("file")]
    File,
    /// Only reported by lookups that do not follow links. The link itself is
    /// mirrored as file content, never traversed.
    #[display("symbolic link")]
    Symlink,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMetadata {
    pub kind: EntryKind,
    pub len: u64,
    pub mode: u32,
    pub modified: Option<SystemTime>,
}

impl EntryMetadata {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

// std metadata comes out of directory listings, compio metadata out of path lookups
macro_rules! entry_metadata_from {
    ($metadata:ty) => {
        impl From<&$metadata> for EntryMetadata {
            fn from(metadata: &$metadata) -> Self {
                let file_type = metadata.file_type();
                let kind = if file_type.is_symlink() {
                    EntryKind::Symlink
                } else if file_type.is_dir() {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                };

                #[cfg(unix)]
                let mode = {
                    use std::os::unix::fs::PermissionsExt;
                    metadata.permissions().mode() & 0o7777
                };
                #[cfg(not(unix))]
                let mode = if metadata.permissions().readonly() { 0o444 } else { 0o666 };

                Self {
                    kind,
                    len: metadata.len(),
                    mode,
                    modified: metadata.modified().ok(),
                }
            }
        }
    };
}

entry_metadata_from!(std::fs::Metadata);
entry_metadata_from!(compio::fs::Metadata);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: OsString,
    pub metadata: EntryMetadata,
}
