use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Path, PathBuf};

use snafu::{ResultExt, Snafu};
use tracing::{debug, warn};

use crate::ext::BestEffortPathExt;
use crate::filesystem::{EntryKind, EntryMetadata, Filesystem};

const PARTIAL_SUFFIX: &str = ".mirror-partial";
const PARTIAL_ATTEMPTS: usize = 64;

/// How the transfer decides that a destination file is already up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChangeDetection {
    /// Skip files whose size, modification time and permission bits match
    #[default]
    SizeAndModified,
    /// Always rewrite the destination
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Transferred { bytes: u64 },
    Skipped,
}

/// Makes `destination` a copy of the file at `source`: same bytes, same permission
/// bits, same modification time.
///
/// The content is staged in a hidden sibling of `destination` that did not exist
/// before, then renamed over it, so the destination path only ever holds a complete
/// copy and no other entry is ever overwritten. A directory sitting where the file
/// belongs is removed first; a symbolic link is replaced, never written through.
/// On error the staged copy is discarded and the previous destination, if any, is
/// left untouched.
pub async fn transfer_file<F: Filesystem>(
    fs: &F,
    source: &Path,
    destination: &Path,
    change_detection: ChangeDetection,
) -> Result<TransferOutcome, TransferError> {
    let source_metadata = fs
        .metadata(source)
        .await
        .context(SourceMetadataSnafu { path: source })?;
    if source_metadata.is_dir() {
        return SourceIsDirectorySnafu { path: source }.fail();
    }

    let existing = fs.symlink_metadata(destination).await.ok();
    if change_detection == ChangeDetection::SizeAndModified
        && existing
            .as_ref()
            .is_some_and(|existing| is_up_to_date(&source_metadata, existing))
    {
        return Ok(TransferOutcome::Skipped);
    }
    if existing.as_ref().is_some_and(EntryMetadata::is_dir) {
        debug!(
            "Replacing directory {} with a file",
            destination.best_effort_path_display()
        );
        fs.remove_all(destination)
            .await
            .context(ClearDirectorySnafu { path: destination })?;
    }

    let partial = partial_path(fs, destination).await?;
    let replaced = match stage(fs, source, &partial, &source_metadata).await {
        Ok(bytes) => fs
            .rename(&partial, destination)
            .await
            .map(|()| bytes)
            .context(ReplaceSnafu { path: destination }),
        Err(error) => Err(error),
    };

    match replaced {
        Ok(bytes) => Ok(TransferOutcome::Transferred { bytes }),
        Err(error) => {
            discard_partial(fs, &partial).await;
            Err(error)
        }
    }
}

fn is_up_to_date(source: &EntryMetadata, destination: &EntryMetadata) -> bool {
    destination.kind == EntryKind::File
        && destination.len == source.len
        && destination.mode == source.mode
        && source.modified.is_some()
        && destination.modified == source.modified
}

/// Picks the first staging name next to `destination` that nothing occupies.
///
/// A mirrored tree can legitimately contain files named like staging copies, so a
/// taken name is skipped rather than reused.
async fn partial_path<F: Filesystem>(
    fs: &F,
    destination: &Path,
) -> Result<PathBuf, TransferError> {
    for attempt in 0..PARTIAL_ATTEMPTS {
        let candidate = partial_candidate(destination, attempt);
        match fs.symlink_metadata(&candidate).await {
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(candidate),
            Err(error) => return Err(error).context(StagingSnafu { path: destination }),
            Ok(_) => debug!(
                "Staging name {} is taken",
                candidate.best_effort_path_display()
            ),
        }
    }
    Err(io::Error::from(io::ErrorKind::AlreadyExists)).context(StagingSnafu { path: destination })
}

/// `.name.mirror-partial`, then `.name.mirror-partial.1` and so on
fn partial_candidate(destination: &Path, attempt: usize) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(destination.file_name().unwrap_or(OsStr::new("file")));
    name.push(PARTIAL_SUFFIX);
    if attempt > 0 {
        name.push(format!(".{attempt}"));
    }
    destination.with_file_name(name)
}

async fn stage<F: Filesystem>(
    fs: &F,
    source: &Path,
    partial: &Path,
    source_metadata: &EntryMetadata,
) -> Result<u64, TransferError> {
    let bytes = fs.copy(source, partial).await.context(CopySnafu {
        from: source,
        path: partial,
    })?;
    fs.set_permissions(partial, source_metadata.mode)
        .await
        .context(PermissionsSnafu { path: partial })?;
    if let Some(modified) = source_metadata.modified {
        fs.set_modified(partial, modified)
            .await
            .context(ModifiedTimeSnafu { path: partial })?;
    }
    Ok(bytes)
}

async fn discard_partial<F: Filesystem>(fs: &F, partial: &Path) {
    match fs.remove_all(partial).await {
        Ok(()) => debug!("Discarded {}", partial.best_effort_path_display()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => warn!(
            "Failed to discard partial copy {}: {}",
            partial.best_effort_path_display(),
            error
        ),
    }
}

#[derive(Debug, Snafu)]
pub enum TransferError {
    #[snafu(display("Failed to stat source file {}", path.best_effort_path_display()))]
    SourceMetadataError {
        source: std::io::Error,
        path: PathBuf,
    },
    #[snafu(display("Source {} turned into a directory", path.best_effort_path_display()))]
    SourceIsDirectoryError {
        path: PathBuf,
    },
    #[snafu(display("Failed to remove directory {} standing in for a file", path.best_effort_path_display()))]
    ClearDirectoryError {
        source: std::io::Error,
        path: PathBuf,
    },
    #[snafu(display("No free staging name next to {}", path.best_effort_path_display()))]
    StagingError {
        source: std::io::Error,
        path: PathBuf,
    },
    #[snafu(display("Failed to copy {} to {}", from.best_effort_path_display(), path.best_effort_path_display()))]
    CopyError {
        source: std::io::Error,
        from: PathBuf,
        path: PathBuf,
    },
    #[snafu(display("Failed to set permissions of {}", path.best_effort_path_display()))]
    PermissionsError {
        source: std::io::Error,
        path: PathBuf,
    },
    #[snafu(display("Failed to set modification time of {}", path.best_effort_path_display()))]
    ModifiedTimeError {
        source: std::io::Error,
        path: PathBuf,
    },
    #[snafu(display("Failed to move the new copy into place at {}", path.best_effort_path_display()))]
    ReplaceError {
        source: std::io::Error,
        path: PathBuf,
    },
}
