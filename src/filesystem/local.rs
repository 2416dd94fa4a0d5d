use std::fs;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use compio::BufResult;
use compio::fs::{self as async_fs, File};
use compio::io::{AsyncReadAt, AsyncWriteAtExt};
use compio::runtime::spawn_blocking;
use filetime::FileTime;

use super::{DirEntry, EntryMetadata, Filesystem};

const COPY_CHUNK_SIZE: usize = 128 * 1024;

/// The local disk, driven through compio.
///
/// Directory listings, recursive removal and timestamps have no compio
/// counterpart and run on the blocking pool instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFilesystem;

impl Filesystem for LocalFilesystem {
    async fn read_dir(&self, path: &Path) -> io::Result<Vec<DirEntry>> {
        let path = path.to_path_buf();
        unblock(move || {
            let mut entries = fs::read_dir(path)?
                .map(|entry| {
                    let entry = entry?;
                    let metadata = entry.metadata()?;
                    Ok(DirEntry {
                        name: entry.file_name(),
                        metadata: EntryMetadata::from(&metadata),
                    })
                })
                .collect::<io::Result<Vec<_>>>()?;
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(entries)
        })
        .await
    }

    async fn metadata(&self, path: &Path) -> io::Result<EntryMetadata> {
        let metadata = async_fs::metadata(path).await?;
        Ok(EntryMetadata::from(&metadata))
    }

    async fn symlink_metadata(&self, path: &Path) -> io::Result<EntryMetadata> {
        let metadata = async_fs::symlink_metadata(path).await?;
        Ok(EntryMetadata::from(&metadata))
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        async_fs::create_dir_all(path).await
    }

    async fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
        let source = File::open(from).await?;
        let mut target = File::create(to).await?;
        let mut buffer = Vec::with_capacity(COPY_CHUNK_SIZE);
        let mut position = 0u64;

        loop {
            // Reads fill the vector from its start, up to capacity
            buffer.clear();
            let BufResult(read, returned) = source.read_at(buffer, position).await;
            buffer = returned;
            if read? == 0 {
                break;
            }

            let BufResult(written, returned) = target.write_all_at(buffer, position).await;
            buffer = returned;
            written?;
            position += buffer.len() as u64;
        }

        target.close().await?;
        Ok(position)
    }

    async fn set_permissions(&self, path: &Path, mode: u32) -> io::Result<()> {
        async_fs::set_permissions(path, permissions_for(path, mode).await?).await
    }

    async fn set_modified(&self, path: &Path, modified: SystemTime) -> io::Result<()> {
        let path = path.to_path_buf();
        unblock(move || filetime::set_file_mtime(path, FileTime::from_system_time(modified))).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        async_fs::rename(from, to).await
    }

    async fn remove_all(&self, path: &Path) -> io::Result<()> {
        if async_fs::symlink_metadata(path).await?.is_dir() {
            let path = path.to_path_buf();
            unblock(move || fs::remove_dir_all(path)).await
        } else {
            async_fs::remove_file(path).await
        }
    }
}

async fn unblock<T, F>(operation: F) -> io::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> io::Result<T> + Send + 'static,
{
    spawn_blocking(operation)
        .await
        .unwrap_or_else(|_| Err(io::Error::other("blocking filesystem call panicked")))
}

#[cfg(unix)]
async fn permissions_for(_path: &Path, mode: u32) -> io::Result<async_fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;

    Ok(async_fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
async fn permissions_for(path: &Path, mode: u32) -> io::Result<async_fs::Permissions> {
    let mut permissions = async_fs::metadata(path).await?.permissions();
    permissions.set_readonly(mode & 0o200 == 0);
    Ok(permissions)
}
